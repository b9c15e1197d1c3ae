//! Market Data Streaming Types
//!
//! Core domain types for the tick relay: tracked symbols, decoded ticks,
//! and the normalized updates republished to subscribers. These types are
//! codec-agnostic and represent the canonical internal representation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// A symbol string (e.g. `BINANCE:ETHUSDT`).
pub type Symbol = String;

/// Mapping from symbol to its most recently computed rolling average.
///
/// A symbol that has never been averaged maps to `0.0`. Zero is a valid
/// sentinel here, not "unknown": downstream consumers may divide by it.
pub type AverageMapping = BTreeMap<Symbol, f64>;

// =============================================================================
// Tracked Symbols
// =============================================================================

/// The fixed set of symbols relayed for the lifetime of the process.
///
/// Configuration order is preserved; duplicates and blank entries are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedSymbols {
    symbols: Vec<Symbol>,
}

impl TrackedSymbols {
    /// Build the tracked set from any list of symbol strings.
    #[must_use]
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let mut unique: Vec<Symbol> = Vec::new();
        for symbol in symbols {
            let symbol: Symbol = symbol.into();
            let trimmed = symbol.trim();
            if trimmed.is_empty() || unique.iter().any(|s| s == trimmed) {
                continue;
            }
            unique.push(trimmed.to_string());
        }
        Self { symbols: unique }
    }

    /// Check whether a symbol is tracked.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Position of a symbol in configuration order.
    #[must_use]
    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Iterate symbols in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Symbols as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Number of tracked symbols.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Zero-initialized average mapping covering every tracked symbol.
    #[must_use]
    pub fn zero_averages(&self) -> AverageMapping {
        self.symbols.iter().map(|s| (s.clone(), 0.0)).collect()
    }
}

// =============================================================================
// Tick
// =============================================================================

/// One decoded price observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Upstream symbol.
    pub symbol: Symbol,
    /// Trade price.
    pub price: f64,
    /// Upstream trade time.
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }
}

// =============================================================================
// Normalized Update
// =============================================================================

/// Update value object delivered to subscribers.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol":"BINANCE:ETHUSDT","current":2000.5,"timestamp":"2024-01-01T00:00:00Z","hourlyAverage":1990.1}
/// ```
///
/// `hourly_average` is the last computed average at emit time and is not
/// necessarily in sync with `current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedUpdate {
    /// Symbol the update refers to.
    pub symbol: Symbol,
    /// Latest observed price, `None` before the first tick.
    pub current: Option<f64>,
    /// Time of the latest tick, `None` before the first tick.
    pub timestamp: Option<DateTime<Utc>>,
    /// Last computed rolling average (0 until the first computation).
    pub hourly_average: f64,
}

// =============================================================================
// Subscriber Events
// =============================================================================

/// Event delivered to a subscriber.
///
/// # Wire Format (JSON)
/// ```json
/// {"event":"initialData","data":[{"symbol":"SYM","current":null,"timestamp":null,"hourlyAverage":0.0}]}
/// {"event":"rateUpdate","data":{"symbol":"SYM","current":2000.0,"timestamp":"...","hourlyAverage":0.0}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum SubscriberEvent {
    /// Snapshot of every tracked symbol, sent once on registration.
    InitialData(Vec<NormalizedUpdate>),
    /// One throttled live update.
    RateUpdate(NormalizedUpdate),
}

impl SubscriberEvent {
    /// Event name on the subscriber protocol.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InitialData(_) => "initialData",
            Self::RateUpdate(_) => "rateUpdate",
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
