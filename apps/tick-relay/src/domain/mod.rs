//! Domain Layer - Core relay types and business logic.
//!
//! This layer contains the core domain types for tick aggregation with no
//! I/O. All types here are pure Rust with serialization support.

/// Market data types (symbols, ticks, normalized updates).
pub mod streaming;

/// Per-symbol rolling state and periodic averages.
pub mod aggregation;

/// Upstream connection state machine.
pub mod connection;

/// Per-symbol emit throttling.
pub mod throttle;
