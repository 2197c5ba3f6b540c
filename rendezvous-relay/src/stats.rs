//! Operational metrics and the periodic stats task.
//!
//! Counters are monotonically increasing (reset only on restart) and are
//! updated with relaxed atomics; no locks are taken on the routing path.

use crate::config::StatsConfig;
use crate::limits::RateLimits;
use crate::registry::ConnectionRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Operational metrics for monitoring relay activity.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Connections accepted and assigned an id.
    pub connections_total: AtomicU64,
    /// Connections refused at accept (rate limit or session cap).
    pub connections_rejected: AtomicU64,
    /// Frames read from clients.
    pub frames_received: AtomicU64,
    /// Frames written into a recipient's outbound queue.
    pub frames_routed: AtomicU64,
    /// Frames dropped because a recipient queue was full.
    pub frames_dropped: AtomicU64,
    /// Frames that failed to decode or carried an unexpected kind.
    pub malformed_frames: AtomicU64,
    /// Frames addressed to a client that is not connected.
    pub recipients_not_found: AtomicU64,
    /// Frames or connections refused by a rate limiter.
    pub rate_limit_hits: AtomicU64,
}

/// Plain copy of [`RelayMetrics`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// See [`RelayMetrics::connections_total`].
    pub connections_total: u64,
    /// See [`RelayMetrics::connections_rejected`].
    pub connections_rejected: u64,
    /// See [`RelayMetrics::frames_received`].
    pub frames_received: u64,
    /// See [`RelayMetrics::frames_routed`].
    pub frames_routed: u64,
    /// See [`RelayMetrics::frames_dropped`].
    pub frames_dropped: u64,
    /// See [`RelayMetrics::malformed_frames`].
    pub malformed_frames: u64,
    /// See [`RelayMetrics::recipients_not_found`].
    pub recipients_not_found: u64,
    /// See [`RelayMetrics::rate_limit_hits`].
    pub rate_limit_hits: u64,
}

impl RelayMetrics {
    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_routed: self.frames_routed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            recipients_not_found: self.recipients_not_found.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
        }
    }
}

/// Spawn the periodic stats task.
///
/// Each tick logs a metrics summary and evicts idle rate-limiter keys.
/// Returns a handle that can be used to abort the task.
pub fn spawn_stats_task(
    metrics: Arc<RelayMetrics>,
    registry: Arc<ConnectionRegistry>,
    rate_limits: RateLimits,
    config: StatsConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Stats task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Stats task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));
        // First tick completes immediately.
        timer.tick().await;

        loop {
            timer.tick().await;

            rate_limits.shrink();
            let m = metrics.snapshot();
            tracing::info!(
                clients = registry.len(),
                connections = m.connections_total,
                rejected = m.connections_rejected,
                received = m.frames_received,
                routed = m.frames_routed,
                dropped = m.frames_dropped,
                malformed = m.malformed_frames,
                not_found = m.recipients_not_found,
                rate_limited = m.rate_limit_hits,
                "relay stats"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;

    #[test]
    fn snapshot_reads_counters() {
        let metrics = RelayMetrics::default();
        RelayMetrics::incr(&metrics.frames_routed);
        RelayMetrics::incr(&metrics.frames_routed);
        RelayMetrics::incr(&metrics.recipients_not_found);

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_routed, 2);
        assert_eq!(snap.recipients_not_found, 1);
        assert_eq!(snap.frames_dropped, 0);
    }

    #[tokio::test]
    async fn stats_task_disabled() {
        let config = StatsConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_stats_task(
            Arc::new(RelayMetrics::default()),
            Arc::new(ConnectionRegistry::new()),
            RateLimits::new(&LimitsConfig::default()),
            config,
        );

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn stats_task_runs_until_aborted() {
        let config = StatsConfig {
            interval_secs: 1,
            enabled: true,
        };

        let handle = spawn_stats_task(
            Arc::new(RelayMetrics::default()),
            Arc::new(ConnectionRegistry::new()),
            RateLimits::new(&LimitsConfig::default()),
            config,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
