//! Relay server: shared state, accept loop and shutdown.
//!
//! [`RendezvousRelay`] owns everything sessions share (registry, router,
//! metrics, rate limiters). [`RelayServer`] owns the listener and spawns one
//! [`Session`] per accepted connection.

use crate::config::RelayConfig;
use crate::error::Result;
use crate::limits::{RateLimitError, RateLimits};
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::session::Session;
use crate::stats::{spawn_stats_task, RelayMetrics};
use rendezvous_types::{ClientId, Event, Frame};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for sessions to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Why a connection was refused at accept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Peer exceeded its connection quota.
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    /// The relay is at `limits.max_concurrent_sessions`.
    #[error("session limit reached ({current}/{limit})")]
    AtCapacity {
        /// Registered clients.
        current: usize,
        /// Configured cap.
        limit: usize,
    },
}

/// Shared relay state.
pub struct RendezvousRelay {
    config: RelayConfig,
    registry: Arc<ConnectionRegistry>,
    router: Router,
    /// Rate limiters for connections and frames.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: Arc<RelayMetrics>,
    /// Cancelled once when the server stops; sessions watch it.
    shutdown: CancellationToken,
}

impl std::fmt::Debug for RendezvousRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("clients", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl RendezvousRelay {
    /// Create relay state from configuration.
    pub fn new(config: RelayConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let metrics = Arc::new(RelayMetrics::default());
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            router: Router::new(registry.clone(), metrics.clone())
                .with_max_frame_size(config.limits.max_frame_size),
            config,
            registry,
            rate_limits,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the frame router.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Signal that ends every session.
    pub fn shutdown_signal(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Number of registered clients.
    pub fn total_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Decide whether a new connection from `peer` may proceed.
    pub fn admit(&self, peer: SocketAddr) -> std::result::Result<(), Rejection> {
        let result = self.check_admission(peer);
        if result.is_err() {
            RelayMetrics::incr(&self.metrics.connections_rejected);
        }
        result
    }

    fn check_admission(&self, peer: SocketAddr) -> std::result::Result<(), Rejection> {
        if let Err(e) = self.rate_limits.check_connection(peer.ip()) {
            RelayMetrics::incr(&self.metrics.rate_limit_hits);
            return Err(e.into());
        }

        let limit = self.config.limits.max_concurrent_sessions;
        let current = self.total_sessions();
        if current >= limit {
            return Err(Rejection::AtCapacity { current, limit });
        }
        Ok(())
    }

    /// Broadcast `text` to every client as the relay sentinel.
    pub fn announce(&self, text: &str) {
        let event = Event::Broadcast {
            sender: ClientId::SERVER,
            text: text.to_string(),
        };
        match Frame::from_event(&event) {
            Ok(frame) => {
                let delivered = self.router.broadcast(&frame);
                tracing::debug!(delivered, "Announced: {}", text);
            }
            Err(e) => tracing::warn!("Failed to encode announcement: {}", e),
        }
    }
}

/// TCP relay server.
pub struct RelayServer {
    listener: TcpListener,
    relay: Arc<RendezvousRelay>,
}

impl RelayServer {
    /// Bind `config.server.bind_address`.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.server.bind_address).await?;
        Ok(Self {
            listener,
            relay: Arc::new(RendezvousRelay::new(config)),
        })
    }

    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared relay state.
    pub fn relay(&self) -> Arc<RendezvousRelay> {
        self.relay.clone()
    }

    /// Serve until the process is killed.
    pub async fn run(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` completes, then close every session.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        tracing::info!("Relay listening on {}", local);

        let stats = spawn_stats_task(
            self.relay.metrics.clone(),
            self.relay.registry.clone(),
            self.relay.rate_limits.clone(),
            self.relay.config.stats.clone(),
        );

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            // Reap finished sessions so the set does not grow.
            while sessions.try_join_next().is_some() {}

            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.accept(&mut sessions, stream, peer),
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    tracing::error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!(
            clients = self.relay.total_sessions(),
            "Shutting down relay"
        );
        stats.abort();

        // Sessions leave through their normal cleanup and deregister.
        self.relay.shutdown.cancel();
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("Sessions still running after {:?}, aborting", SHUTDOWN_GRACE);
            sessions.shutdown().await;
        }
        Ok(())
    }

    fn accept(&self, sessions: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.relay.admit(peer) {
            tracing::warn!("Rejected connection from {}: {}", peer, e);
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed for {}: {}", peer, e);
        }

        let (session, outbound) = match Session::open(self.relay.clone(), peer) {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("Could not register {}: {}", peer, e);
                return;
            }
        };
        RelayMetrics::incr(&self.relay.metrics.connections_total);

        let (reader, writer) = stream.into_split();
        // Spawn session handler - don't block the accept loop
        sessions.spawn(async move {
            if let Err(e) = session.run(reader, writer, outbound).await {
                tracing::debug!("Session error: {}", e);
            }
        });
    }
}
