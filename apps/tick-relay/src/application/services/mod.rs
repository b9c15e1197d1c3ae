//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CoreService`: owns aggregation, broadcast and persistence for one relay
//! - `RecurringSchedule`: periodic trigger for the average computation

pub mod schedule;

use std::sync::Arc;
use std::time::Instant as StdInstant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use schedule::{RecurringSchedule, next_boundary_delay};

use crate::application::ports::{AverageStore, SubscriberSink};
use crate::domain::aggregation::{Aggregator, AveragesOutcome};
use crate::domain::connection::{ConnectionMonitor, ConnectionStatus};
use crate::domain::streaming::{AverageMapping, NormalizedUpdate, Symbol, Tick, TrackedSymbols};
use crate::infrastructure::broadcast::{BroadcastConfig, BroadcastStats, Broadcaster, Subscription};
use crate::infrastructure::finnhub::StreamEvent;
use crate::infrastructure::metrics::{self, TickOutcome};

// =============================================================================
// Health Snapshot
// =============================================================================

/// Read-only view of the relay for the health surface.
///
/// # Wire Format (JSON)
/// ```json
/// {"finnhub":"connected","uptime":12.5,"symbols":["BINANCE:ETHUSDT"],"hourlyAverages":{"BINANCE:ETHUSDT":2012.4}, ...}
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Upstream connection status.
    pub finnhub: ConnectionStatus,
    /// Detailed connection state name.
    pub connection_state: &'static str,
    /// Seconds since the service started.
    pub uptime: f64,
    /// Service start time.
    pub started_at: DateTime<Utc>,
    /// Tracked symbols.
    pub symbols: Vec<Symbol>,
    /// Current average mapping.
    pub hourly_averages: AverageMapping,
    /// Last successful upstream open.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Reconnect attempts since startup.
    pub reconnect_attempts: u64,
    /// Upstream frames received since startup.
    pub messages_received: u64,
    /// Delivery statistics.
    pub broadcast: BroadcastStats,
}

// =============================================================================
// Subscriber Handle
// =============================================================================

/// A registered push subscriber.
#[derive(Debug)]
pub struct SubscriberHandle {
    /// Subscriber id, used in logs.
    pub id: Uuid,
    /// Task driving the sink. Ends when the sink fails or on cancellation.
    pub task: JoinHandle<()>,
}

// =============================================================================
// Core Service
// =============================================================================

/// Owns the relay's domain state and wires ingestion, aggregation,
/// broadcast and persistence together.
pub struct CoreService {
    aggregator: Aggregator,
    broadcaster: Broadcaster,
    store: Arc<dyn AverageStore>,
    connection: Arc<ConnectionMonitor>,
    started_at: StdInstant,
    started_at_utc: DateTime<Utc>,
}

impl CoreService {
    /// Create the service, loading persisted averages from `store`.
    #[must_use]
    pub fn new(
        symbols: TrackedSymbols,
        store: Arc<dyn AverageStore>,
        connection: Arc<ConnectionMonitor>,
        broadcast: BroadcastConfig,
    ) -> Self {
        let initial = store.load();
        tracing::info!(
            symbols = symbols.len(),
            persisted = initial.len(),
            "Core service initialized"
        );

        Self {
            aggregator: Aggregator::new(symbols, initial),
            broadcaster: Broadcaster::new(broadcast),
            store,
            connection,
            started_at: StdInstant::now(),
            started_at_utc: Utc::now(),
        }
    }

    /// The aggregator.
    #[must_use]
    pub const fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// The shared connection monitor.
    #[must_use]
    pub fn connection(&self) -> Arc<ConnectionMonitor> {
        Arc::clone(&self.connection)
    }

    /// Current state of every tracked symbol; nulls where no tick was seen.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NormalizedUpdate> {
        self.aggregator.snapshot()
    }

    /// Open a pull-style subscription: snapshot first, then live updates.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.subscribe(|| self.aggregator.snapshot())
    }

    /// Register a push subscriber driven from its own task.
    ///
    /// A delivery error ends only this subscriber; ingestion and other
    /// subscribers are unaffected.
    pub fn register_subscriber(
        &self,
        sink: Arc<dyn SubscriberSink>,
        cancel: CancellationToken,
    ) -> SubscriberHandle {
        let id = Uuid::new_v4();
        let mut subscription = self.subscribe();
        tracing::info!(subscriber = %id, "Subscriber registered");

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = subscription.next() => event,
                };
                let Some(event) = event else { break };

                let delivered = tokio::select! {
                    () = cancel.cancelled() => break,
                    delivered = sink.deliver(event) => delivered,
                };
                if let Err(e) = delivered {
                    tracing::warn!(subscriber = %id, error = %e, "Subscriber delivery failed, detaching");
                    break;
                }
            }
            tracing::info!(subscriber = %id, "Subscriber detached");
        });

        SubscriberHandle { id, task }
    }

    /// Apply one tick and offer the resulting update for delivery.
    ///
    /// Returns `true` if the update was delivered to subscribers.
    pub fn ingest_tick(&self, tick: &Tick) -> bool {
        self.ingest_tick_at(tick, Instant::now())
    }

    /// [`Self::ingest_tick`] with an explicit receipt time for the throttle.
    pub fn ingest_tick_at(&self, tick: &Tick, now: Instant) -> bool {
        match self.aggregator.apply_tick(tick) {
            Some(update) => {
                metrics::record_tick(TickOutcome::Applied);
                self.broadcaster.publish_at(update, now)
            }
            None => {
                metrics::record_tick(TickOutcome::Ignored);
                tracing::trace!(symbol = %tick.symbol, "Ignoring tick for untracked symbol");
                false
            }
        }
    }

    /// Collapse all windows into averages and persist the mapping.
    ///
    /// Nothing is written when no symbol received a tick during the cycle.
    /// A failed save is logged; the in-memory mapping stays authoritative.
    pub async fn compute_and_persist_averages(&self) -> AveragesOutcome {
        let started = StdInstant::now();
        let outcome = self.aggregator.compute_averages();

        for update in &outcome.updated {
            tracing::info!(
                symbol = %update.symbol,
                average = %format!("{:.2}", update.average),
                samples = update.samples,
                "Hourly average computed"
            );
        }

        if outcome.has_changes() {
            let store = Arc::clone(&self.store);
            let averages = outcome.averages.clone();
            match tokio::task::spawn_blocking(move || store.save(&averages)).await {
                Ok(Ok(())) => tracing::debug!("Averages persisted"),
                Ok(Err(e)) => {
                    metrics::record_persistence_failure();
                    tracing::error!(error = %e, "Failed to persist averages");
                }
                Err(e) => {
                    metrics::record_persistence_failure();
                    tracing::error!(error = %e, "Persistence task failed");
                }
            }
        } else {
            tracing::debug!("No ticks since last cycle, averages unchanged");
        }

        metrics::record_average_cycle(started.elapsed());
        outcome
    }

    /// Consume stream client events until cancelled or the channel closes.
    pub async fn run_ingestion(
        &self,
        mut events: mpsc::Receiver<StreamEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };

            match event {
                StreamEvent::Trades(ticks) => {
                    for tick in &ticks {
                        self.ingest_tick(tick);
                    }
                }
                StreamEvent::Connected => tracing::debug!("Ingestion observed upstream connect"),
                StreamEvent::Disconnected => {
                    tracing::debug!("Ingestion observed upstream disconnect");
                }
                StreamEvent::Reconnecting { attempt } => {
                    tracing::debug!(attempt, "Ingestion observed reconnect");
                }
                StreamEvent::Error(msg) => tracing::debug!(msg = %msg, "Upstream error event"),
            }
        }
        tracing::info!("Ingestion stopped");
    }

    /// Run the average computation on `schedule` until cancelled.
    pub async fn run_average_schedule(
        &self,
        mut schedule: RecurringSchedule,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            period_secs = schedule.period().as_secs(),
            aligned = schedule.is_aligned(),
            "Average schedule started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                () = schedule.tick() => {
                    self.compute_and_persist_averages().await;
                }
            }
        }
        tracing::info!("Average schedule stopped");
    }

    /// Broadcast statistics.
    #[must_use]
    pub fn broadcast_stats(&self) -> BroadcastStats {
        self.broadcaster.stats()
    }

    /// Health snapshot.
    #[must_use]
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            finnhub: self.connection.status(),
            connection_state: self.connection.state().as_str(),
            uptime: self.started_at.elapsed().as_secs_f64(),
            started_at: self.started_at_utc,
            symbols: self.aggregator.symbols().as_slice().to_vec(),
            hourly_averages: self.aggregator.averages(),
            last_connected_at: self.connection.last_connected_at(),
            reconnect_attempts: self.connection.reconnect_attempts(),
            messages_received: self.connection.messages_received(),
            broadcast: self.broadcaster.stats(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
