#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call,
        clippy::type_complexity
    )
)]

//! Tick Relay - Price Tick Aggregation and Fan-out
//!
//! Maintains a single connection to the Finnhub trade stream for a fixed
//! set of symbols, keeps per-symbol rolling state, persists periodic
//! averages across restarts and republishes throttled updates to any number
//! of subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and pure logic
//!   - `streaming`: Symbols, ticks and normalized updates
//!   - `aggregation`: Rolling windows and periodic averages
//!   - `connection`: Upstream connection state machine
//!   - `throttle`: Per-symbol emit throttle
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream transport, average storage, subscriber sinks
//!   - `services`: `CoreService` and the recurring schedule
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `finnhub`: Reconnecting WebSocket client
//!   - `broadcast`: Throttled fan-out with bounded per-subscriber queues
//!   - `persistence`: JSON file store
//!   - `gateway`: Subscriber WebSocket endpoint and HTTP server
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Finnhub WS ──► StreamClient ──► CoreService ──► Aggregator
//!                                     │               │
//!                                     ▼               ▼ (hourly)
//!                               Broadcaster      JsonFileStore
//!                                     │
//!                        ┌────────────┼────────────┐
//!                        ▼            ▼            ▼
//!                   Subscriber 1  Subscriber 2  Subscriber N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregation::{Aggregator, AverageUpdate, AveragesOutcome, SymbolState};
pub use domain::connection::{ConnectionMonitor, ConnectionState, ConnectionStatus};
pub use domain::streaming::{
    AverageMapping, NormalizedUpdate, SubscriberEvent, Symbol, Tick, TrackedSymbols,
};

// Ports
pub use application::ports::{
    AverageStore, PersistenceError, SinkError, SubscriberSink, TransportError,
    UpstreamConnector, UpstreamFrame, UpstreamSession,
};

// Services
pub use application::services::{
    CoreService, HealthSnapshot, RecurringSchedule, SubscriberHandle,
};

// Infrastructure config
pub use infrastructure::config::{
    AverageSettings, BroadcastSettings, ConfigError, Credentials, RelayConfig, ServerSettings,
    UpstreamSettings,
};

// Adapters
pub use infrastructure::broadcast::{BroadcastConfig, BroadcastStats, Broadcaster, Subscription};
pub use infrastructure::finnhub::{
    StreamClient, StreamClientConfig, StreamClientError, StreamEvent, TungsteniteConnector,
};
pub use infrastructure::gateway::{HttpServer, HttpServerError};
pub use infrastructure::persistence::JsonFileStore;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
