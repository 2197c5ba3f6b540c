//! Kind-dispatch of frames received from clients.
//!
//! The router decodes each frame only far enough to find its addressee and
//! forwards the original bytes. Encrypted payloads are never looked at.

use crate::error::RouteError;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::stats::RelayMetrics;
use rendezvous_types::{ClientId, Event, EventKind, Frame, DEFAULT_MAX_FRAME_SIZE};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

/// What happened to a routed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Discover response queued to the requester.
    Replied {
        /// Number of ids in the response.
        clients: usize,
    },
    /// Frame queued to one recipient.
    Forwarded {
        /// Recipient id.
        to: ClientId,
    },
    /// Frame fanned out to every registered client.
    Broadcast {
        /// Recipients whose queue accepted the frame.
        delivered: usize,
    },
    /// Recipient is connected but its queue was full.
    Dropped {
        /// Recipient id.
        to: ClientId,
    },
}

/// Routes frames between registered connections.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<RelayMetrics>,
    max_frame_size: usize,
}

impl Router {
    /// Create a router over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            registry,
            metrics,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Largest frame the connection writers accept; bigger replies are refused.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Route a frame and record the outcome in logs and metrics.
    ///
    /// Never fails: every routing error is confined to the frame.
    pub fn dispatch(&self, from: ClientId, frame: Frame) {
        match self.route(from, frame) {
            Ok(delivery) => tracing::debug!(client = %from, ?delivery, "routed"),
            Err(err) => {
                match &err {
                    RouteError::RecipientNotFound { .. } => {
                        RelayMetrics::incr(&self.metrics.recipients_not_found)
                    }
                    RouteError::ReplyTooLarge { .. } => {
                        RelayMetrics::incr(&self.metrics.frames_dropped)
                    }
                    RouteError::Malformed { .. }
                    | RouteError::UnknownKind { .. }
                    | RouteError::Unexpected { .. } => {
                        RelayMetrics::incr(&self.metrics.malformed_frames)
                    }
                }
                tracing::warn!("Dropped frame: {}", err);
            }
        }
    }

    /// Route one frame received on connection `from`.
    pub fn route(&self, from: ClientId, frame: Frame) -> Result<Delivery, RouteError> {
        let event = frame
            .event()
            .map_err(|e| RouteError::from_wire(from, e))?;

        match event {
            Event::DiscoverRequest { requester } => {
                if requester != from {
                    tracing::debug!(client = %from, %requester, "discover requester differs from connection");
                }
                self.reply_discover(from)
            }
            Event::Broadcast { sender, .. } => {
                self.note_sender(from, sender, EventKind::Broadcast);
                Ok(Delivery::Broadcast {
                    delivered: self.broadcast(&frame),
                })
            }
            Event::Message {
                sender, recipient, ..
            }
            | Event::MessageEncrypted {
                sender, recipient, ..
            }
            | Event::KeyExchangeRequest {
                sender, recipient, ..
            } => {
                let kind = event.kind();
                self.note_sender(from, sender, kind);
                self.forward(from, recipient, kind, frame)
            }
            Event::KeyExchangeAck {
                requester,
                responder,
            } => {
                self.note_sender(from, responder, EventKind::KeyExchangeAck);
                self.forward(from, requester, EventKind::KeyExchangeAck, frame)
            }
            Event::Setup { .. } | Event::DiscoverResponse { .. } => Err(RouteError::Unexpected {
                from,
                kind: event.kind(),
            }),
        }
    }

    /// Queue `frame` to every registered client, sender included.
    ///
    /// Returns how many queues accepted it.
    pub fn broadcast(&self, frame: &Frame) -> usize {
        self.registry
            .handles()
            .into_iter()
            .filter(|(to, handle)| self.enqueue(*to, handle, frame.clone()).is_ok())
            .count()
    }

    fn reply_discover(&self, from: ClientId) -> Result<Delivery, RouteError> {
        let clients = self.registry.snapshot();
        let count = clients.len();
        let reply = Frame::from_event(&Event::DiscoverResponse { clients })
            .map_err(|e| RouteError::from_wire(from, e))?;
        if reply.len() > self.max_frame_size {
            return Err(RouteError::ReplyTooLarge {
                from,
                size: reply.len(),
                limit: self.max_frame_size,
            });
        }
        self.forward(from, from, EventKind::Discover, reply)
            .map(|delivery| match delivery {
                Delivery::Forwarded { .. } => Delivery::Replied { clients: count },
                other => other,
            })
    }

    fn forward(
        &self,
        from: ClientId,
        to: ClientId,
        kind: EventKind,
        frame: Frame,
    ) -> Result<Delivery, RouteError> {
        let not_found = || RouteError::RecipientNotFound {
            from,
            recipient: to,
            kind,
        };
        let handle = self.registry.get(&to).ok_or_else(not_found)?;
        match self.enqueue(to, &handle, frame) {
            Ok(()) => Ok(Delivery::Forwarded { to }),
            Err(NotQueued) if !handle.is_closed() => Ok(Delivery::Dropped { to }),
            Err(NotQueued) => Err(not_found()),
        }
    }

    fn enqueue(
        &self,
        to: ClientId,
        handle: &ConnectionHandle,
        frame: Frame,
    ) -> Result<(), NotQueued> {
        match handle.try_send(frame) {
            Ok(()) => {
                RelayMetrics::incr(&self.metrics.frames_routed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                RelayMetrics::incr(&self.metrics.frames_dropped);
                tracing::warn!(client = %to, "Outbound queue full, dropping frame");
                Err(NotQueued)
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(client = %to, "Outbound queue closed");
                Err(NotQueued)
            }
        }
    }

    fn note_sender(&self, from: ClientId, claimed: ClientId, kind: EventKind) {
        if claimed != from && !claimed.is_server() {
            tracing::debug!(client = %from, %claimed, %kind, "sender field differs from connection");
        }
    }
}

/// Frame not accepted by a recipient queue (full or closed).
#[derive(Debug)]
struct NotQueued;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    struct Harness {
        router: Router,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<RelayMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            let registry = Arc::new(ConnectionRegistry::new());
            let metrics = Arc::new(RelayMetrics::default());
            Self {
                router: Router::new(registry.clone(), metrics.clone()),
                registry,
                metrics,
            }
        }

        fn connect(&self, capacity: usize) -> (ClientId, mpsc::Receiver<Frame>) {
            let id = ClientId::random();
            let (tx, rx) = mpsc::channel(capacity);
            self.registry.add(id, tx).unwrap();
            (id, rx)
        }
    }

    fn frame(event: Event) -> Frame {
        Frame::from_event(&event).unwrap()
    }

    #[tokio::test]
    async fn discover_replies_to_requester_only() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);
        let (b, mut rx_b) = h.connect(8);

        let delivery = h
            .router
            .route(a, frame(Event::DiscoverRequest { requester: a }))
            .unwrap();
        assert_eq!(delivery, Delivery::Replied { clients: 2 });

        let reply = rx_a.try_recv().unwrap().event().unwrap();
        assert_eq!(
            reply,
            Event::DiscoverResponse {
                clients: vec![a, b]
            }
        );
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn discover_reply_over_frame_limit_is_refused() {
        let h = Harness::new();
        let router = Router::new(h.registry.clone(), h.metrics.clone()).with_max_frame_size(100);
        let (a, mut rx_a) = h.connect(8);
        h.connect(8);
        h.connect(8);

        // Three quoted uuids alone are over 100 bytes.
        let result = router.route(a, frame(Event::DiscoverRequest { requester: a }));
        assert!(matches!(
            result,
            Err(RouteError::ReplyTooLarge { from, limit: 100, .. }) if from == a
        ));
        assert!(rx_a.try_recv().is_err());

        router.dispatch(a, frame(Event::DiscoverRequest { requester: a }));
        assert_eq!(h.metrics.snapshot().frames_dropped, 1);
    }

    #[tokio::test]
    async fn message_is_forwarded_byte_for_byte() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(8);
        let (b, mut rx_b) = h.connect(8);

        let original = frame(Event::Message {
            sender: a,
            recipient: b,
            text: "hi".into(),
        });
        let delivery = h.router.route(a, original.clone()).unwrap();
        assert_eq!(delivery, Delivery::Forwarded { to: b });
        assert_eq!(rx_b.try_recv().unwrap().body(), original.body());
    }

    #[tokio::test]
    async fn encrypted_payload_is_not_inspected() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(8);
        let (b, mut rx_b) = h.connect(8);

        let original = frame(Event::MessageEncrypted {
            sender: a,
            recipient: b,
            ciphertext: "not even base64 !!".into(),
        });
        h.router.route(a, original.clone()).unwrap();
        assert_eq!(rx_b.try_recv().unwrap(), original);
    }

    #[tokio::test]
    async fn key_exchange_request_goes_to_recipient() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);
        let (b, mut rx_b) = h.connect(8);

        let request = frame(Event::KeyExchangeRequest {
            sender: a,
            recipient: b,
            public_key: "AAAA".into(),
        });
        h.router.route(a, request.clone()).unwrap();
        assert_eq!(rx_b.try_recv().unwrap(), request);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn ack_goes_to_original_requester() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);
        let (b, mut rx_b) = h.connect(8);

        let ack = frame(Event::KeyExchangeAck {
            requester: a,
            responder: b,
        });
        let delivery = h.router.route(b, ack.clone()).unwrap();
        assert_eq!(delivery, Delivery::Forwarded { to: a });
        assert_eq!(rx_a.try_recv().unwrap(), ack);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_including_sender() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);
        let (_b, mut rx_b) = h.connect(8);
        let (_c, mut rx_c) = h.connect(8);

        let original = frame(Event::Broadcast {
            sender: a,
            text: "all".into(),
        });
        let delivery = h.router.route(a, original.clone()).unwrap();
        assert_eq!(delivery, Delivery::Broadcast { delivered: 3 });

        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            assert_eq!(rx.try_recv().unwrap(), original);
        }
    }

    #[tokio::test]
    async fn sentinel_broadcast_is_not_suppressed() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);

        let original = frame(Event::Broadcast {
            sender: ClientId::SERVER,
            text: "notice".into(),
        });
        h.router.route(a, original.clone()).unwrap();
        assert_eq!(rx_a.try_recv().unwrap(), original);
    }

    #[tokio::test]
    async fn absent_recipient_is_reported_not_fatal() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);
        let ghost = ClientId::random();

        let result = h.router.route(
            a,
            frame(Event::Message {
                sender: a,
                recipient: ghost,
                text: "anyone?".into(),
            }),
        );
        assert!(matches!(
            result,
            Err(RouteError::RecipientNotFound { recipient, .. }) if recipient == ghost
        ));
        // Sender is not notified.
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_queue_counts_as_recipient_gone() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(8);
        let (b, rx_b) = h.connect(8);
        drop(rx_b);

        let result = h.router.route(
            a,
            frame(Event::Message {
                sender: a,
                recipient: b,
                text: "late".into(),
            }),
        );
        assert!(matches!(result, Err(RouteError::RecipientNotFound { .. })));
    }

    #[tokio::test]
    async fn full_queue_drops_frame() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(8);
        let (b, mut rx_b) = h.connect(1);

        let msg = |text: &str| {
            frame(Event::Message {
                sender: a,
                recipient: b,
                text: text.into(),
            })
        };
        assert_eq!(
            h.router.route(a, msg("one")).unwrap(),
            Delivery::Forwarded { to: b }
        );
        assert_eq!(
            h.router.route(a, msg("two")).unwrap(),
            Delivery::Dropped { to: b }
        );
        assert_eq!(h.metrics.frames_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx_b.try_recv().unwrap(), msg("one"));
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_are_dropped() {
        let h = Harness::new();
        let (a, mut rx_a) = h.connect(8);

        let unknown = Frame::from_body(&br#"{"event":"KE","data":[]}"#[..]);
        assert!(matches!(
            h.router.route(a, unknown),
            Err(RouteError::UnknownKind { .. })
        ));

        let garbage = Frame::from_body(&b"\x00\x01 not json"[..]);
        assert!(matches!(
            h.router.route(a, garbage),
            Err(RouteError::Malformed { .. })
        ));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn client_sent_setup_is_unexpected() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(8);

        let result = h.router.route(a, frame(Event::Setup { client_id: a }));
        assert!(matches!(
            result,
            Err(RouteError::Unexpected {
                kind: EventKind::Setup,
                ..
            })
        ));

        let result = h.router.route(a, frame(Event::DiscoverResponse { clients: vec![a] }));
        assert!(matches!(result, Err(RouteError::Unexpected { .. })));
    }

    #[tokio::test]
    async fn dispatch_counts_failures() {
        let h = Harness::new();
        let (a, _rx_a) = h.connect(8);

        h.router.dispatch(
            a,
            frame(Event::Message {
                sender: a,
                recipient: ClientId::random(),
                text: "x".into(),
            }),
        );
        h.router.dispatch(a, Frame::from_body(&b"{}"[..]));

        let snap = h.metrics.snapshot();
        assert_eq!(snap.recipients_not_found, 1);
        assert_eq!(snap.malformed_frames, 1);
    }
}
