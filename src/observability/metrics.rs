//! Per-connection metrics
//!
//! Atomic counters for the hot paths (publish, receive) and a snapshot type
//! that serializes for the CLI status output. Each [`crate::connection::Connection`]
//! owns its own [`LinkMetrics`]; nothing here is process-global.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe counters for one connection
#[derive(Debug)]
pub struct LinkMetrics {
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnects: AtomicU64,
    connection_start_time: AtomicU64,

    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    duplicates_dropped: AtomicU64,
    messages_intercepted: AtomicU64,

    subscriptions_replayed: AtomicU64,
    subscribe_failures: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            duplicates_dropped: AtomicU64::new(0),
            messages_intercepted: AtomicU64::new(0),
            subscriptions_replayed: AtomicU64::new(0),
            subscribe_failures: AtomicU64::new(0),
        }
    }

    // Connection lifecycle
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.connection_established();
    }

    // Message flow
    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicate_dropped(&self) {
        self.duplicates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_intercepted(&self) {
        self.messages_intercepted.fetch_add(1, Ordering::Relaxed);
    }

    // Subscriptions
    pub fn subscription_replayed(&self) {
        self.subscriptions_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_failed(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if self.connected.load(Ordering::Relaxed) {
            let start_time = self.connection_start_time.load(Ordering::Relaxed);
            if start_time > 0 {
                now.saturating_sub(start_time)
            } else {
                0
            }
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                reconnects: self.reconnects.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            messages: MessageMetrics {
                published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                received: self.messages_received.load(Ordering::Relaxed),
                duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
                intercepted: self.messages_intercepted.load(Ordering::Relaxed),
            },
            subscriptions: SubscriptionMetrics {
                replayed: self.subscriptions_replayed.load(Ordering::Relaxed),
                failures: self.subscribe_failures.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub subscriptions: SubscriptionMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub reconnects: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMetrics {
    pub published: u64,
    pub publish_failures: u64,
    pub received: u64,
    pub duplicates_dropped: u64,
    pub intercepted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionMetrics {
    pub replayed: u64,
    pub failures: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let metrics = LinkMetrics::new();
        metrics.connection_attempt();
        metrics.connection_established();

        let snapshot = metrics.snapshot();
        assert!(snapshot.connection.connected);
        assert_eq!(snapshot.connection.connection_attempts, 1);
        assert_eq!(snapshot.connection.connections_established, 1);

        metrics.connection_lost();
        metrics.reconnected();
        let snapshot = metrics.snapshot();
        assert!(snapshot.connection.connected);
        assert_eq!(snapshot.connection.connections_lost, 1);
        assert_eq!(snapshot.connection.reconnects, 1);
        assert_eq!(snapshot.connection.connections_established, 2);
    }

    #[test]
    fn test_message_metrics() {
        let metrics = LinkMetrics::new();
        metrics.message_received();
        metrics.message_received();
        metrics.duplicate_dropped();
        metrics.message_intercepted();
        metrics.message_published();
        metrics.publish_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages.received, 2);
        assert_eq!(snapshot.messages.duplicates_dropped, 1);
        assert_eq!(snapshot.messages.intercepted, 1);
        assert_eq!(snapshot.messages.published, 1);
        assert_eq!(snapshot.messages.publish_failures, 1);
    }

    #[test]
    fn test_disconnected_has_no_duration() {
        let metrics = LinkMetrics::new();
        metrics.connection_established();
        metrics.disconnected();
        let snapshot = metrics.snapshot();
        assert!(!snapshot.connection.connected);
        assert_eq!(snapshot.connection.connection_duration_seconds, 0);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(LinkMetrics::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.message_received();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().messages.received, 1000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = LinkMetrics::new();
        metrics.subscription_replayed();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["subscriptions"]["replayed"], 1);
        assert_eq!(json["connection"]["connected"], false);
    }
}
