//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Finnhub WebSocket client adapters.
pub mod finnhub;

/// Throttled broadcast channel for live updates.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// JSON file persistence for rolling averages.
pub mod persistence;

/// Subscriber WebSocket endpoint and HTTP server.
pub mod gateway;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
