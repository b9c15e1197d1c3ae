//! Broadcast Channel Adapter
//!
//! Throttled fan-out of live updates using a tokio broadcast channel.
//!
//! # Architecture
//!
//! Every update passes the per-symbol [`EmitThrottle`] first; admitted
//! updates go into one broadcast channel. Each subscriber owns a receiver,
//! which behaves as a bounded queue: when a subscriber falls behind by more
//! than the channel capacity, its oldest entries are overwritten and the
//! subscriber skips ahead. Publishing never waits on a subscriber.
//!
//! A [`Subscription`] yields the snapshot first and live updates after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::domain::streaming::{NormalizedUpdate, SubscriberEvent};
use crate::domain::throttle::EmitThrottle;
use crate::infrastructure::config::MAX_SUBSCRIBER_QUEUE_CAPACITY;
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Broadcaster configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Minimum interval between deliveries for the same symbol.
    pub min_emit_interval: Duration,
    /// Per-subscriber queue capacity.
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            min_emit_interval: Duration::from_millis(1_000),
            queue_capacity: 256,
        }
    }
}

impl From<&crate::BroadcastSettings> for BroadcastConfig {
    fn from(settings: &crate::BroadcastSettings) -> Self {
        Self {
            min_emit_interval: settings.min_emit_interval,
            queue_capacity: settings.subscriber_queue_capacity,
        }
    }
}

// =============================================================================
// Broadcaster
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    emitted: AtomicU64,
    throttled: AtomicU64,
    dropped: AtomicU64,
    subscribers: AtomicUsize,
}

/// Throttled live-update fan-out.
///
/// # Example
///
/// ```rust
/// use tick_relay::infrastructure::broadcast::{BroadcastConfig, Broadcaster};
///
/// let broadcaster = Broadcaster::new(BroadcastConfig::default());
/// let subscription = broadcaster.subscribe(Vec::new);
/// assert_eq!(broadcaster.stats().subscribers, 1);
/// drop(subscription);
/// assert_eq!(broadcaster.stats().subscribers, 0);
/// ```
#[derive(Debug)]
pub struct Broadcaster {
    tx: broadcast::Sender<NormalizedUpdate>,
    throttle: Mutex<EmitThrottle>,
    counters: Arc<Counters>,
}

impl Broadcaster {
    /// Create a broadcaster.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        let capacity = config.queue_capacity.clamp(1, MAX_SUBSCRIBER_QUEUE_CAPACITY);
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            throttle: Mutex::new(EmitThrottle::new(config.min_emit_interval)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Offer an update observed now.
    ///
    /// Returns `true` if the throttle admitted it.
    pub fn publish(&self, update: NormalizedUpdate) -> bool {
        self.publish_at(update, Instant::now())
    }

    /// Offer an update observed at `now`.
    ///
    /// Returns `true` if the throttle admitted it. An admitted update is
    /// queued for every current subscriber; with none it is simply gone.
    pub fn publish_at(&self, update: NormalizedUpdate, now: Instant) -> bool {
        if !self.throttle.lock().admit(&update.symbol, now) {
            self.counters.throttled.fetch_add(1, Ordering::Relaxed);
            metrics::record_update_throttled();
            tracing::trace!(symbol = %update.symbol, "Update throttled");
            return false;
        }

        self.counters.emitted.fetch_add(1, Ordering::Relaxed);
        metrics::record_update_emitted();
        let _ = self.tx.send(update);
        true
    }

    /// Open a subscription.
    ///
    /// The live receiver is attached before `snapshot` runs, so nothing
    /// published after the snapshot was taken can be missed. An update
    /// published in between may be seen in both.
    pub fn subscribe<F>(&self, snapshot: F) -> Subscription
    where
        F: FnOnce() -> Vec<NormalizedUpdate>,
    {
        let rx = self.tx.subscribe();
        let snapshot = snapshot();
        let active = self.counters.subscribers.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_subscribers(active);

        Subscription {
            snapshot: Some(snapshot),
            rx,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Broadcast statistics.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.counters.subscribers.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Statistics about the broadcaster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct BroadcastStats {
    /// Active subscriptions.
    pub subscribers: usize,
    /// Updates admitted by the throttle.
    pub emitted: u64,
    /// Updates suppressed by the throttle.
    pub throttled: u64,
    /// Queued updates dropped for slow subscribers.
    pub dropped: u64,
}

// =============================================================================
// Subscription
// =============================================================================

/// One subscriber's view: snapshot first, then live updates.
#[derive(Debug)]
pub struct Subscription {
    snapshot: Option<Vec<NormalizedUpdate>>,
    rx: broadcast::Receiver<NormalizedUpdate>,
    counters: Arc<Counters>,
}

impl Subscription {
    /// Next event for this subscriber.
    ///
    /// The first call returns `InitialData`. Returns `None` once the
    /// broadcaster is gone.
    pub async fn next(&mut self) -> Option<SubscriberEvent> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(SubscriberEvent::InitialData(snapshot));
        }

        loop {
            match self.rx.recv().await {
                Ok(update) => return Some(SubscriberEvent::RateUpdate(update)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.counters.dropped.fetch_add(skipped, Ordering::Relaxed);
                    metrics::record_updates_dropped(skipped);
                    tracing::warn!(skipped, "Subscriber lagged, oldest updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = self
            .counters
            .subscribers
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        metrics::set_subscribers(remaining);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn update(symbol: &str, price: f64) -> NormalizedUpdate {
        NormalizedUpdate {
            symbol: symbol.to_string(),
            current: Some(price),
            timestamp: Some(Utc::now()),
            hourly_average: 0.0,
        }
    }

    fn broadcaster(capacity: usize) -> Broadcaster {
        Broadcaster::new(BroadcastConfig {
            min_emit_interval: Duration::from_millis(1_000),
            queue_capacity: capacity,
        })
    }

    #[tokio::test]
    async fn snapshot_comes_first() {
        let broadcaster = broadcaster(16);
        let mut sub = broadcaster.subscribe(|| vec![update("A", 1.0)]);
        assert!(broadcaster.publish(update("A", 2.0)));

        let first = sub.next().await.unwrap();
        assert!(matches!(first, SubscriberEvent::InitialData(ref s) if s.len() == 1));
        let second = sub.next().await.unwrap();
        assert!(
            matches!(second, SubscriberEvent::RateUpdate(ref u) if u.current == Some(2.0))
        );
    }

    #[tokio::test]
    async fn oversized_queue_capacity_is_capped() {
        let broadcaster = broadcaster(usize::MAX);
        let mut sub = broadcaster.subscribe(Vec::new);
        assert!(broadcaster.publish(update("A", 1.0)));

        assert!(matches!(sub.next().await, Some(SubscriberEvent::InitialData(_))));
        assert!(matches!(sub.next().await, Some(SubscriberEvent::RateUpdate(_))));
    }

    #[tokio::test]
    async fn throttled_updates_are_not_delivered() {
        let broadcaster = broadcaster(16);
        let mut sub = broadcaster.subscribe(Vec::new);
        let start = Instant::now();

        assert!(broadcaster.publish_at(update("A", 1.0), start));
        assert!(!broadcaster.publish_at(update("A", 2.0), start + Duration::from_millis(400)));
        assert!(broadcaster.publish_at(update("A", 3.0), start + Duration::from_millis(1_200)));

        let _ = sub.next().await;
        let prices: Vec<_> = [sub.next().await.unwrap(), sub.next().await.unwrap()]
            .into_iter()
            .map(|event| match event {
                SubscriberEvent::RateUpdate(u) => u.current,
                SubscriberEvent::InitialData(_) => None,
            })
            .collect();
        assert_eq!(prices, vec![Some(1.0), Some(3.0)]);

        let stats = broadcaster.stats();
        assert_eq!(stats.emitted, 2);
        assert_eq!(stats.throttled, 1);
    }

    #[tokio::test]
    async fn every_subscriber_receives_each_update() {
        let broadcaster = broadcaster(16);
        let mut a = broadcaster.subscribe(Vec::new);
        let mut b = broadcaster.subscribe(Vec::new);
        let _ = a.next().await;
        let _ = b.next().await;

        broadcaster.publish(update("A", 1.0));

        assert!(matches!(a.next().await, Some(SubscriberEvent::RateUpdate(_))));
        assert!(matches!(b.next().await, Some(SubscriberEvent::RateUpdate(_))));
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest() {
        let broadcaster = broadcaster(2);
        let mut sub = broadcaster.subscribe(Vec::new);
        let _ = sub.next().await;
        let start = Instant::now();

        for (i, symbol) in ["A", "B", "C", "D"].into_iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            broadcaster.publish_at(update(symbol, i as f64), start);
        }

        let SubscriberEvent::RateUpdate(first) = sub.next().await.unwrap() else {
            panic!("expected live update");
        };
        assert_eq!(first.symbol, "C");
        assert_eq!(broadcaster.stats().dropped, 2);
    }

    #[test]
    fn publish_without_subscribers_still_throttles() {
        let broadcaster = broadcaster(4);
        let start = Instant::now();
        assert!(broadcaster.publish_at(update("A", 1.0), start));
        assert!(!broadcaster.publish_at(update("A", 1.0), start + Duration::from_millis(10)));
    }

    #[test]
    fn subscriber_count_tracks_drops() {
        let broadcaster = broadcaster(4);
        let a = broadcaster.subscribe(Vec::new);
        let b = broadcaster.subscribe(Vec::new);
        assert_eq!(broadcaster.stats().subscribers, 2);
        drop(a);
        assert_eq!(broadcaster.stats().subscribers, 1);
        drop(b);
        assert_eq!(broadcaster.stats().subscribers, 0);
    }
}
