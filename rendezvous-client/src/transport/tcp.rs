//! TCP transport using length-prefixed frames.

use super::{Transport, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rendezvous_types::{EventCodec, Frame, DEFAULT_MAX_FRAME_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

type Reader = FramedRead<OwnedReadHalf, EventCodec>;
type Writer = FramedWrite<OwnedWriteHalf, EventCodec>;

/// TCP transport.
///
/// Read and write halves sit behind separate locks so a task blocked in
/// [`recv`](Transport::recv) does not hold up senders. [`close`](Transport::close)
/// wakes any pending `recv` without waiting for the relay.
#[derive(Debug)]
pub struct TcpTransport {
    max_frame_size: usize,
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Option<Writer>>,
    connected: AtomicBool,
    /// Cancelled by `close`; replaced on every `connect`.
    closed: Mutex<CancellationToken>,
}

impl TcpTransport {
    /// Create an unconnected transport with the default frame limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create an unconnected transport with a custom frame limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: Mutex::new(CancellationToken::new()),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", address, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {}", e);
        }

        let (read, write) = stream.into_split();
        *self.reader.lock().await = Some(FramedRead::new(
            read,
            EventCodec::with_max_size(self.max_frame_size),
        ));
        *self.writer.lock().await = Some(FramedWrite::new(
            write,
            EventCodec::with_max_size(self.max_frame_size),
        ));
        *self.closed.lock().await = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Connected to {}", address);
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        writer
            .send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let closed = self.closed.lock().await.clone();
        let mut guard = tokio::select! {
            biased;
            _ = closed.cancelled() => return Err(TransportError::ConnectionClosed),
            guard = self.reader.lock() => guard,
        };
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::Framing(e))
            }
            None => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        // Wake a parked recv() first so the reader lock comes free.
        self.closed.lock().await.cancel();
        self.reader.lock().await.take();
        if let Some(mut writer) = self.writer.lock().await.take() {
            writer
                .close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}
