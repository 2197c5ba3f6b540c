//! Mock transport for testing.
//!
//! Allows queueing inbound events and capturing sent frames for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use rendezvous_types::{Event, Frame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the client owns
/// another. `recv()` on an empty queue reports the connection as closed.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    sent: Vec<Frame>,
    receive_queue: VecDeque<Frame>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame to be returned by a later `recv()` call.
    pub fn queue_frame(&self, frame: Frame) {
        self.lock().receive_queue.push_back(frame);
    }

    /// Queue an event to be returned by a later `recv()` call.
    ///
    /// # Panics
    ///
    /// If the event cannot be serialized.
    pub fn queue_event(&self, event: &Event) {
        let frame = Frame::from_event(event).unwrap_or_else(|e| panic!("encode {event:?}: {e}"));
        self.queue_frame(frame);
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock().sent.clone()
    }

    /// Sent frames decoded as events; undecodable frames are skipped.
    pub fn sent_events(&self) -> Vec<Event> {
        self.lock()
            .sent
            .iter()
            .filter_map(|f| f.event().ok())
            .collect()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<Frame> {
        self.lock().sent.last().cloned()
    }

    /// Get the address that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.lock().connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
    }

    /// Clear all state (frames, queue, connection).
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent.push(frame);
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(error) = inner.fail_next_recv.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        inner
            .receive_queue
            .pop_front()
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rendezvous_types::ClientId;

    fn broadcast(text: &str) -> Event {
        Event::Broadcast {
            sender: ClientId::random(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn mock_transport_connect() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("localhost:3000").await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_address(),
            Some("localhost:3000".to_string())
        );
    }

    #[tokio::test]
    async fn mock_transport_send_captures_frames() {
        let transport = MockTransport::new();
        transport.connect("localhost:3000").await.unwrap();

        let event = broadcast("hi");
        transport
            .send(Frame::from_event(&event).unwrap())
            .await
            .unwrap();
        transport.send(Frame::from_body(&b"junk"[..])).await.unwrap();

        assert_eq!(transport.sent_frames().len(), 2);
        assert_eq!(transport.sent_events(), vec![event]);
        assert_eq!(transport.last_sent().unwrap().body(), b"junk");
    }

    #[tokio::test]
    async fn mock_transport_recv_in_order() {
        let transport = MockTransport::new();
        transport.connect("localhost:3000").await.unwrap();

        transport.queue_event(&broadcast("one"));
        transport.queue_event(&broadcast("two"));

        let first = transport.recv().await.unwrap().event().unwrap();
        assert!(matches!(first, Event::Broadcast { text, .. } if text == "one"));
        let second = transport.recv().await.unwrap().event().unwrap();
        assert!(matches!(second, Event::Broadcast { text, .. } if text == "two"));

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn mock_transport_requires_connection() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.send(Frame::from_body(&b"{}"[..])).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn mock_transport_forced_failures() {
        let transport = MockTransport::new();

        transport.fail_next_connect("refused");
        assert!(matches!(
            transport.connect("x").await,
            Err(TransportError::ConnectionFailed(msg)) if msg == "refused"
        ));
        transport.connect("x").await.unwrap();

        transport.fail_next_send("broken pipe");
        assert!(transport.send(Frame::from_body(&b"{}"[..])).await.is_err());
        assert!(transport.send(Frame::from_body(&b"{}"[..])).await.is_ok());

        transport.fail_next_recv("reset");
        transport.queue_event(&broadcast("after"));
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));
        assert!(transport.recv().await.is_ok());
    }

    #[tokio::test]
    async fn mock_transport_clones_share_state() {
        let transport = MockTransport::new();
        let handle = transport.clone();
        transport.connect("x").await.unwrap();
        transport.send(Frame::from_body(&b"{}"[..])).await.unwrap();

        assert!(handle.is_connected());
        assert_eq!(handle.sent_frames().len(), 1);

        handle.reset();
        assert!(!transport.is_connected());
        assert!(transport.sent_frames().is_empty());
    }
}
