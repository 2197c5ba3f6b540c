//! Per-connection session management.
//!
//! Each accepted TCP connection gets a Session: it reserves an id in the
//! registry, writes `setup`, then reads frames and hands them to the router
//! until the connection ends. Writes go through a dedicated writer task fed
//! by the connection's outbound queue, so frames from many senders are
//! serialized per connection.

use crate::error::RelayError;
use crate::server::RendezvousRelay;
use crate::stats::RelayMetrics;
use futures_util::{SinkExt, StreamExt};
use rendezvous_types::{ClientId, Event, EventCodec, Frame, WireError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::{FramedRead, FramedWrite};

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer closed the connection.
    Eof,
    /// Read failed or the stream lost framing.
    ReadError,
    /// Writer task ended (peer stopped reading or the socket broke).
    WriterFailed,
    /// No frame within the configured idle timeout.
    IdleTimeout,
    /// The relay is shutting down.
    Shutdown,
}

/// A per-connection session.
pub struct Session {
    relay: Arc<RendezvousRelay>,
    id: ClientId,
    peer: SocketAddr,
}

impl Session {
    /// Register a new client for `peer`, retrying on the (unlikely) id collision.
    pub fn open(
        relay: Arc<RendezvousRelay>,
        peer: SocketAddr,
    ) -> Result<(Self, mpsc::Receiver<Frame>), RelayError> {
        let (tx, rx) = mpsc::channel(relay.config().limits.outbound_queue);
        let mut attempts = 0;
        let id = loop {
            let id = ClientId::random();
            match relay.registry().add(id, tx.clone()) {
                Ok(()) => break id,
                Err(e) if attempts >= 3 => return Err(e.into()),
                Err(_) => attempts += 1,
            }
        };
        Ok((Self { relay, id, peer }, rx))
    }

    /// The id assigned to this connection.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Run the session until the connection ends.
    ///
    /// The registry entry is removed exactly once on every exit path.
    pub async fn run<R, W>(
        self,
        reader: R,
        writer: W,
        outbound: mpsc::Receiver<Frame>,
    ) -> Result<CloseReason, RelayError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(client = %self.id, peer = %self.peer, "Client connected");

        let result = self.serve(reader, writer, outbound).await;

        if self.relay.registry().remove(&self.id) {
            if self.relay.config().server.announce_membership
                && !self.relay.shutdown_signal().is_cancelled()
            {
                self.relay.announce(&format!("{} left", self.id));
            }
        } else {
            tracing::error!(client = %self.id, "Registry entry already gone at session end");
        }

        match &result {
            Ok(reason) => {
                tracing::info!(client = %self.id, ?reason, "Client disconnected")
            }
            Err(e) => tracing::warn!(client = %self.id, "Session ended with error: {}", e),
        }
        result
    }

    async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        outbound: mpsc::Receiver<Frame>,
    ) -> Result<CloseReason, RelayError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let limits = &self.relay.config().limits;
        let max = limits.max_frame_size;
        let mut reader = FramedRead::new(reader, EventCodec::with_max_size(max));
        let mut writer = FramedWrite::new(writer, EventCodec::with_max_size(max));

        // setup goes out before the writer task starts draining the queue.
        let setup = Frame::from_event(&Event::Setup { client_id: self.id })?;
        writer.send(setup).await?;

        let mut writer_task = spawn_writer(self.id, writer, outbound);
        // Aborts the writer on every exit, including cancellation at shutdown.
        let _abort_writer = AbortOnDrop(writer_task.abort_handle());
        if self.relay.config().server.announce_membership {
            self.relay.announce(&format!("{} joined", self.id));
        }

        let idle = match limits.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let reason = loop {
            let next = tokio::select! {
                next = next_frame(&mut reader, idle) => next,
                _ = &mut writer_task => Err(ReadFailure::WriterGone),
                _ = self.relay.shutdown_signal().cancelled() => Err(ReadFailure::Shutdown),
            };

            match next {
                Ok(Some(frame)) => self.on_frame(frame),
                Ok(None) => break CloseReason::Eof,
                Err(ReadFailure::Idle) => {
                    tracing::info!(client = %self.id, "Idle timeout");
                    break CloseReason::IdleTimeout;
                }
                Err(ReadFailure::Wire(e)) => {
                    tracing::warn!(client = %self.id, "Read error: {}", e);
                    break CloseReason::ReadError;
                }
                Err(ReadFailure::WriterGone) => break CloseReason::WriterFailed,
                Err(ReadFailure::Shutdown) => break CloseReason::Shutdown,
            }
        };

        Ok(reason)
    }

    fn on_frame(&self, frame: Frame) {
        let metrics = self.relay.metrics();
        RelayMetrics::incr(&metrics.frames_received);

        if let Err(e) = self.relay.rate_limits().check_message(&self.id) {
            RelayMetrics::incr(&metrics.rate_limit_hits);
            tracing::warn!(client = %self.id, "Dropped frame: {}", e);
            return;
        }

        self.relay.router().dispatch(self.id, frame);
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum ReadFailure {
    Idle,
    Wire(WireError),
    WriterGone,
    Shutdown,
}

async fn next_frame<R>(
    reader: &mut FramedRead<R, EventCodec>,
    idle: Option<Duration>,
) -> Result<Option<Frame>, ReadFailure>
where
    R: AsyncRead + Unpin,
{
    let next = match idle {
        Some(limit) => tokio::time::timeout(limit, reader.next())
            .await
            .map_err(|_| ReadFailure::Idle)?,
        None => reader.next().await,
    };
    next.transpose().map_err(ReadFailure::Wire)
}

fn spawn_writer<W>(
    id: ClientId,
    mut writer: FramedWrite<W, EventCodec>,
    mut outbound: mpsc::Receiver<Frame>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match writer.send(frame).await {
                Ok(()) => {}
                Err(e @ WireError::FrameTooLarge { .. }) => {
                    tracing::warn!(client = %id, "Skipped outbound frame: {}", e);
                }
                Err(e) => {
                    tracing::debug!(client = %id, "Write failed: {}", e);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RelayConfig, MIN_FRAME_SIZE};
    use tokio::io::{duplex, split, DuplexStream, ReadHalf, WriteHalf};

    type ClientReader = FramedRead<ReadHalf<DuplexStream>, EventCodec>;
    type ClientWriter = FramedWrite<WriteHalf<DuplexStream>, EventCodec>;

    /// Start a session over an in-memory pipe and return the client's ends.
    fn start(
        relay: &Arc<RendezvousRelay>,
    ) -> (
        ClientId,
        ClientReader,
        ClientWriter,
        JoinHandle<Result<CloseReason, RelayError>>,
    ) {
        let (client, server) = duplex(64 * 1024);
        let (server_read, server_write) = split(server);
        let (client_read, client_write) = split(client);

        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let (session, outbound) = Session::open(relay.clone(), peer).unwrap();
        let id = session.id();
        let task = tokio::spawn(session.run(server_read, server_write, outbound));

        (
            id,
            FramedRead::new(client_read, EventCodec::new()),
            FramedWrite::new(client_write, EventCodec::new()),
            task,
        )
    }

    async fn recv(reader: &mut ClientReader) -> Event {
        tokio::time::timeout(Duration::from_secs(2), reader.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("decode failed")
            .event()
            .unwrap()
    }

    async fn send(writer: &mut ClientWriter, event: Event) {
        writer.send(Frame::from_event(&event).unwrap()).await.unwrap();
    }

    fn relay(config: RelayConfig) -> Arc<RendezvousRelay> {
        Arc::new(RendezvousRelay::new(config))
    }

    #[tokio::test]
    async fn setup_is_first_frame() {
        let relay = relay(RelayConfig::default());
        let (id, mut reader, _writer, _task) = start(&relay);

        assert_eq!(recv(&mut reader).await, Event::Setup { client_id: id });
        assert!(relay.registry().contains(&id));
    }

    #[tokio::test]
    async fn discover_after_setup_lists_self() {
        let relay = relay(RelayConfig::default());
        let (id, mut reader, mut writer, _task) = start(&relay);
        recv(&mut reader).await;

        send(&mut writer, Event::DiscoverRequest { requester: id }).await;
        assert_eq!(
            recv(&mut reader).await,
            Event::DiscoverResponse { clients: vec![id] }
        );
    }

    #[tokio::test]
    async fn eof_deregisters_once() {
        let relay = relay(RelayConfig::default());
        let (id, mut reader, mut writer, task) = start(&relay);
        recv(&mut reader).await;

        writer.close().await.unwrap();
        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::Eof);
        assert!(!relay.registry().contains(&id));
        assert!(relay.registry().is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_keeps_connection_open() {
        let relay = relay(RelayConfig::default());
        let (id, mut reader, mut writer, _task) = start(&relay);
        recv(&mut reader).await;

        writer
            .send(Frame::from_body(&b"{\"event\":\"nope\",\"data\":[]}"[..]))
            .await
            .unwrap();
        send(&mut writer, Event::DiscoverRequest { requester: id }).await;

        assert!(matches!(
            recv(&mut reader).await,
            Event::DiscoverResponse { .. }
        ));
        assert_eq!(relay.metrics().snapshot().malformed_frames, 1);
    }

    #[tokio::test]
    async fn oversized_frame_closes_connection() {
        let mut config = RelayConfig::default();
        config.limits.max_frame_size = MIN_FRAME_SIZE;
        config.validate().unwrap();
        let relay = relay(config);
        let (id, mut reader, mut writer, task) = start(&relay);
        recv(&mut reader).await;

        // Client codec allows it; relay codec refuses the header.
        writer
            .send(Frame::from_body(vec![b'x'; MIN_FRAME_SIZE + 1]))
            .await
            .unwrap();
        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason, CloseReason::ReadError);
        assert!(!relay.registry().contains(&id));
    }

    #[tokio::test]
    async fn shutdown_signal_ends_session_and_deregisters() {
        let relay = relay(RelayConfig::default());
        let (id, mut reader, _writer, task) = start(&relay);
        recv(&mut reader).await;

        relay.shutdown_signal().cancel();
        let reason = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
        assert!(!relay.registry().contains(&id));
        let end = tokio::time::timeout(Duration::from_secs(2), reader.next())
            .await
            .unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn idle_timeout_ends_session() {
        let mut config = RelayConfig::default();
        config.limits.idle_timeout_secs = 1;
        let relay = relay(config);
        let (id, mut reader, _writer, task) = start(&relay);
        recv(&mut reader).await;

        let reason = tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::IdleTimeout);
        assert!(!relay.registry().contains(&id));
    }

    #[tokio::test]
    async fn rate_limited_frames_are_dropped() {
        let mut config = RelayConfig::default();
        config.limits.messages_per_minute = 1;
        let relay = relay(config);
        let (id, mut reader, mut writer, _task) = start(&relay);
        recv(&mut reader).await;

        send(&mut writer, Event::DiscoverRequest { requester: id }).await;
        send(&mut writer, Event::DiscoverRequest { requester: id }).await;
        send(
            &mut writer,
            Event::Broadcast {
                sender: id,
                text: "x".into(),
            },
        )
        .await;

        assert!(matches!(
            recv(&mut reader).await,
            Event::DiscoverResponse { .. }
        ));
        let nothing = tokio::time::timeout(Duration::from_millis(200), reader.next()).await;
        assert!(nothing.is_err());
        assert_eq!(relay.metrics().snapshot().rate_limit_hits, 2);
    }

    #[tokio::test]
    async fn membership_is_announced() {
        let mut config = RelayConfig::default();
        config.server.announce_membership = true;
        let relay = relay(config);

        let (a, mut reader_a, _writer_a, _task_a) = start(&relay);
        recv(&mut reader_a).await;
        assert_eq!(
            recv(&mut reader_a).await,
            Event::Broadcast {
                sender: ClientId::SERVER,
                text: format!("{} joined", a),
            }
        );

        let (b, mut reader_b, mut writer_b, task_b) = start(&relay);
        recv(&mut reader_b).await;
        assert_eq!(
            recv(&mut reader_a).await,
            Event::Broadcast {
                sender: ClientId::SERVER,
                text: format!("{} joined", b),
            }
        );

        writer_b.close().await.unwrap();
        task_b.await.unwrap().unwrap();
        assert_eq!(
            recv(&mut reader_a).await,
            Event::Broadcast {
                sender: ClientId::SERVER,
                text: format!("{} left", b),
            }
        );
    }
}
