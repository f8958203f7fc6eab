//! Actor counters and mailbox monitoring.
//!
//! Mailbox depth thresholds:
//!
//! | Actor Type | Elevated above | Critical above |
//! |------------|----------------|----------------|
//! | Controller | 100            | 500            |
//! | Venue      | 100            | 500            |
//! | Connection | 50             | 200            |
//!
//! Depth is also exported as the `venue_actor_mailbox_depth` gauge.

use crate::observability::metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depths above which a mailbox is considered backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub elevated: usize,
    pub critical: usize,
}

const VENUE_THRESHOLDS: Thresholds = Thresholds {
    elevated: 100,
    critical: 500,
};

const CONNECTION_THRESHOLDS: Thresholds = Thresholds {
    elevated: 50,
    critical: 200,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// Singleton owning the loaded-venue table.
    Controller,
    /// One per loaded venue.
    Venue,
    /// One per client connection.
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Venue => "venue",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> Thresholds {
        match self {
            ActorType::Controller | ActorType::Venue => VENUE_THRESHOLDS,
            ActorType::Connection => CONNECTION_THRESHOLDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Pressure {
    Normal,
    Elevated,
    Critical,
}

impl Thresholds {
    #[must_use]
    pub const fn pressure(&self, depth: usize) -> Pressure {
        if depth > self.critical {
            Pressure::Critical
        } else if depth > self.elevated {
            Pressure::Elevated
        } else {
            Pressure::Normal
        }
    }
}

/// Queue depth of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        let thresholds = self.actor_type.thresholds();
        match thresholds.pressure(depth) {
            Pressure::Critical => warn!(
                target: "venue.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                threshold = thresholds.critical,
                "Mailbox depth critical"
            ),
            // Logged once per crossing.
            Pressure::Elevated if depth == thresholds.elevated + 1 => debug!(
                target: "venue.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    pub fn record_dequeue(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_actor_mailbox_depth(self.actor_type.as_str(), depth);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pressure(&self) -> Pressure {
        self.actor_type.thresholds().pressure(self.current_depth())
    }
}

/// Process-wide actor counters, shared by every actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub loaded_venues: AtomicUsize,
    pub active_connections: AtomicUsize,
    /// Actor tasks that ended in a panic.
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn venue_loaded(&self) {
        let count = self.loaded_venues.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_venues_loaded(count as u64);
    }

    pub fn venue_unloaded(&self) {
        let count = self
            .loaded_venues
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_venues_loaded(count as u64);
        metrics::record_venue_unloaded();
    }

    pub fn connection_opened(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_connections_active(count as u64);
    }

    pub fn connection_closed(&self) {
        let count = self
            .active_connections
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_connections_active(count as u64);
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "venue.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn venue_count(&self) -> usize {
        self.loaded_venues.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Controller.as_str(), "controller");
        assert_eq!(ActorType::Venue.as_str(), "venue");
        assert_eq!(ActorType::Connection.as_str(), "connection");
    }

    #[test]
    fn test_mailbox_depth_tracking() {
        let monitor = MailboxMonitor::new(ActorType::Venue, "venue-1");

        for _ in 0..3 {
            monitor.record_enqueue();
        }
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_pressure_levels() {
        let thresholds = ActorType::Connection.thresholds();
        assert_eq!(thresholds.pressure(50), Pressure::Normal);
        assert_eq!(thresholds.pressure(51), Pressure::Elevated);
        assert_eq!(thresholds.pressure(201), Pressure::Critical);

        let monitor = MailboxMonitor::new(ActorType::Controller, "controller");
        for _ in 0..101 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.pressure(), Pressure::Elevated);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();
        metrics.venue_loaded();
        metrics.venue_loaded();
        metrics.venue_unloaded();
        assert_eq!(metrics.venue_count(), 1);

        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        assert_eq!(metrics.connection_count(), 1);
    }

    #[test]
    fn test_record_panic() {
        let metrics = ActorMetrics::new();
        metrics.record_panic(ActorType::Venue);
        assert_eq!(metrics.actor_panics.load(Ordering::Relaxed), 1);
    }
}
