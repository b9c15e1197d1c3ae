//! Rolling Aggregation
//!
//! Per-symbol rolling state and the periodic window-to-average collapse.
//!
//! # Design
//!
//! All symbol state and the average mapping live behind a single lock so
//! that a tick is either fully inside the window being averaged or fully in
//! the next one. The lock is held only for the duration of one tick
//! application or one collapse; persistence happens after release.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::streaming::{AverageMapping, NormalizedUpdate, Symbol, Tick, TrackedSymbols};

// =============================================================================
// Symbol State
// =============================================================================

/// In-memory rolling state for one tracked symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolState {
    /// Last observed price.
    pub current: Option<f64>,
    /// Timestamp of the last observed tick.
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Prices observed since the last average computation.
    pub window: Vec<f64>,
}

impl SymbolState {
    /// Record one observation.
    fn observe(&mut self, price: f64, timestamp: DateTime<Utc>) {
        self.current = Some(price);
        self.last_timestamp = Some(timestamp);
        self.window.push(price);
    }

    /// Collapse the window into its arithmetic mean and clear it.
    ///
    /// Returns `None` (and leaves state untouched) for an empty window,
    /// otherwise the mean and the number of samples it covered.
    fn take_average(&mut self) -> Option<(f64, usize)> {
        if self.window.is_empty() {
            return None;
        }
        let samples = self.window.len();
        let sum: f64 = self.window.iter().sum();
        #[allow(clippy::cast_precision_loss)]
        let average = sum / samples as f64;
        self.window.clear();
        Some((average, samples))
    }
}

// =============================================================================
// Averages Outcome
// =============================================================================

/// One symbol's window collapse.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageUpdate {
    /// Symbol that was averaged.
    pub symbol: Symbol,
    /// New rolling average.
    pub average: f64,
    /// Number of prices in the collapsed window.
    pub samples: usize,
}

/// Result of one average computation cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AveragesOutcome {
    /// Full mapping after the cycle.
    pub averages: AverageMapping,
    /// Symbols averaged in this cycle.
    pub updated: Vec<AverageUpdate>,
}

impl AveragesOutcome {
    /// Whether any symbol was averaged.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.updated.is_empty()
    }
}

// =============================================================================
// Aggregator
// =============================================================================

#[derive(Debug)]
struct AggregateBook {
    states: Vec<SymbolState>,
    averages: AverageMapping,
}

/// Single-writer owner of all symbol state and the average mapping.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use tick_relay::domain::aggregation::Aggregator;
/// use tick_relay::domain::streaming::{Tick, TrackedSymbols};
///
/// let aggregator = Aggregator::new(TrackedSymbols::new(["SYM"]), Default::default());
///
/// for price in [100.0, 200.0, 150.0] {
///     aggregator.apply_tick(&Tick::new("SYM", price, Utc::now()));
/// }
///
/// let outcome = aggregator.compute_averages();
/// assert!((outcome.averages["SYM"] - 150.0).abs() < 1e-9);
/// ```
#[derive(Debug)]
pub struct Aggregator {
    symbols: TrackedSymbols,
    book: Mutex<AggregateBook>,
}

impl Aggregator {
    /// Create an aggregator, merging `initial` averages over zero defaults.
    ///
    /// Keys in `initial` that are not tracked are ignored.
    #[must_use]
    pub fn new(symbols: TrackedSymbols, initial: AverageMapping) -> Self {
        let mut averages = symbols.zero_averages();
        for (symbol, value) in initial {
            if let Some(slot) = averages.get_mut(&symbol) {
                *slot = value;
            } else {
                tracing::debug!(symbol = %symbol, "Ignoring persisted average for untracked symbol");
            }
        }

        let states = vec![SymbolState::default(); symbols.len()];
        Self {
            symbols,
            book: Mutex::new(AggregateBook { states, averages }),
        }
    }

    /// Tracked symbols.
    #[must_use]
    pub const fn symbols(&self) -> &TrackedSymbols {
        &self.symbols
    }

    /// Apply one tick.
    ///
    /// Returns `None` for untracked symbols (ignored, not an error).
    pub fn apply_tick(&self, tick: &Tick) -> Option<NormalizedUpdate> {
        let index = self.symbols.index_of(&tick.symbol)?;

        let mut book = self.book.lock();
        book.states[index].observe(tick.price, tick.timestamp);
        let hourly_average = book.averages.get(&tick.symbol).copied().unwrap_or(0.0);
        drop(book);

        Some(NormalizedUpdate {
            symbol: tick.symbol.clone(),
            current: Some(tick.price),
            timestamp: Some(tick.timestamp),
            hourly_average,
        })
    }

    /// Collapse every non-empty window into a new average.
    ///
    /// Symbols with an empty window keep their previous average.
    pub fn compute_averages(&self) -> AveragesOutcome {
        let mut book = self.book.lock();
        let AggregateBook { states, averages } = &mut *book;

        let mut updated = Vec::new();
        for (symbol, state) in self.symbols.iter().zip(states.iter_mut()) {
            if let Some((average, samples)) = state.take_average() {
                averages.insert(symbol.clone(), average);
                updated.push(AverageUpdate {
                    symbol: symbol.clone(),
                    average,
                    samples,
                });
            }
        }

        AveragesOutcome {
            averages: averages.clone(),
            updated,
        }
    }

    /// Current state of every tracked symbol, in configuration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<NormalizedUpdate> {
        let book = self.book.lock();
        self.symbols
            .iter()
            .zip(book.states.iter())
            .map(|(symbol, state)| NormalizedUpdate {
                symbol: symbol.clone(),
                current: state.current,
                timestamp: state.last_timestamp,
                hourly_average: book.averages.get(symbol).copied().unwrap_or(0.0),
            })
            .collect()
    }

    /// Copy of the current average mapping.
    #[must_use]
    pub fn averages(&self) -> AverageMapping {
        self.book.lock().averages.clone()
    }

    /// Copy of one symbol's state.
    #[must_use]
    pub fn state(&self, symbol: &str) -> Option<SymbolState> {
        let index = self.symbols.index_of(symbol)?;
        Some(self.book.lock().states[index].clone())
    }

    /// Number of prices buffered for a symbol since the last computation.
    #[must_use]
    pub fn window_len(&self, symbol: &str) -> Option<usize> {
        let index = self.symbols.index_of(symbol)?;
        Some(self.book.lock().states[index].window.len())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    fn aggregator() -> Aggregator {
        Aggregator::new(TrackedSymbols::new(["SYM", "OTHER"]), AverageMapping::new())
    }

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick::new(symbol, price, Utc::now())
    }

    #[test]
    fn untracked_tick_is_ignored() {
        let agg = aggregator();
        let before = agg.snapshot();

        assert!(agg.apply_tick(&tick("UNKNOWN", 10.0)).is_none());

        assert_eq!(agg.snapshot(), before);
        assert_eq!(agg.averages(), TrackedSymbols::new(["SYM", "OTHER"]).zero_averages());
    }

    #[test]
    fn apply_tick_updates_state_and_returns_update() {
        let agg = aggregator();
        let t = tick("SYM", 2000.0);

        let update = agg.apply_tick(&t).unwrap();

        assert_eq!(update.symbol, "SYM");
        assert_eq!(update.current, Some(2000.0));
        assert_eq!(update.timestamp, Some(t.timestamp));
        assert_eq!(update.hourly_average, 0.0);

        let state = agg.state("SYM").unwrap();
        assert_eq!(state.current, Some(2000.0));
        assert_eq!(state.window, vec![2000.0]);
    }

    #[test]
    fn compute_averages_mean_and_reset() {
        let agg = aggregator();
        for price in [100.0, 200.0, 150.0] {
            agg.apply_tick(&tick("SYM", price));
        }

        let outcome = agg.compute_averages();

        assert!((outcome.averages["SYM"] - 150.0).abs() < 1e-9);
        assert_eq!(agg.window_len("SYM"), Some(0));
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].symbol, "SYM");
        assert_eq!(outcome.updated[0].samples, 3);
    }

    #[test]
    fn empty_window_keeps_previous_average() {
        let mut initial = AverageMapping::new();
        initial.insert("OTHER".to_string(), 42.0);
        let agg = Aggregator::new(TrackedSymbols::new(["SYM", "OTHER"]), initial);

        agg.apply_tick(&tick("SYM", 10.0));
        let outcome = agg.compute_averages();

        assert_eq!(outcome.averages["OTHER"], 42.0);
        assert!(outcome.updated.iter().all(|u| u.symbol != "OTHER"));
    }

    #[test]
    fn cycle_without_ticks_reports_no_changes() {
        let agg = aggregator();
        let outcome = agg.compute_averages();
        assert!(!outcome.has_changes());
    }

    #[test]
    fn initial_averages_ignore_untracked_keys() {
        let mut initial = AverageMapping::new();
        initial.insert("SYM".to_string(), 150.0);
        initial.insert("STALE".to_string(), 1.0);

        let agg = Aggregator::new(TrackedSymbols::new(["SYM"]), initial);

        let averages = agg.averages();
        assert_eq!(averages.len(), 1);
        assert_eq!(averages["SYM"], 150.0);
    }

    #[test]
    fn snapshot_reports_nulls_before_first_tick() {
        let agg = aggregator();
        let snapshot = agg.snapshot();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].symbol, "SYM");
        assert!(snapshot.iter().all(|u| u.current.is_none() && u.timestamp.is_none()));
    }

    #[test]
    fn update_carries_last_computed_average() {
        let agg = aggregator();
        agg.apply_tick(&tick("SYM", 100.0));
        agg.apply_tick(&tick("SYM", 300.0));
        agg.compute_averages();

        let update = agg.apply_tick(&tick("SYM", 500.0)).unwrap();
        assert_eq!(update.hourly_average, 200.0);
    }

    #[test]
    fn concurrent_ticks_are_never_lost_across_collapse() {
        let agg = Arc::new(Aggregator::new(TrackedSymbols::new(["SYM"]), AverageMapping::new()));
        let mut handles = Vec::new();

        for _ in 0..4 {
            let agg = Arc::clone(&agg);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1_000 {
                    agg.apply_tick(&Tick::new("SYM", 1.0, Utc::now()));
                }
            }));
        }

        let mut collapsed = 0usize;
        for _ in 0..50 {
            let outcome = agg.compute_averages();
            collapsed += outcome.updated.iter().map(|u| u.samples).sum::<usize>();
            std::thread::yield_now();
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let outcome = agg.compute_averages();
        collapsed += outcome.updated.iter().map(|u| u.samples).sum::<usize>();

        assert_eq!(collapsed, 4_000);
        assert!((agg.averages()["SYM"] - 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn average_is_arithmetic_mean(prices in prop::collection::vec(0.01f64..1_000_000.0, 1..64)) {
            let agg = Aggregator::new(TrackedSymbols::new(["SYM"]), AverageMapping::new());
            for price in &prices {
                agg.apply_tick(&Tick::new("SYM", *price, Utc::now()));
            }

            let outcome = agg.compute_averages();
            #[allow(clippy::cast_precision_loss)]
            let expected = prices.iter().sum::<f64>() / prices.len() as f64;
            prop_assert!((outcome.averages["SYM"] - expected).abs() <= expected.abs() * 1e-9);
            prop_assert_eq!(agg.window_len("SYM"), Some(0));
        }
    }
}
