//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamConnector` / `UpstreamSession`: WebSocket connection to the tick source
//! - `AverageStore`: durable storage for the rolling-average mapping
//!
//! ## Driver Ports (Inbound)
//!
//! - `SubscriberSink`: a downstream consumer of snapshot and live updates

use async_trait::async_trait;

use crate::domain::streaming::{AverageMapping, SubscriberEvent};

// =============================================================================
// Upstream Transport
// =============================================================================

/// Transport-level errors from the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Handshake or connect failed.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Sending a frame failed.
    #[error("send failed: {0}")]
    Send(String),
    /// Receiving a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// One inbound frame from the upstream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// Text payload.
    Text(String),
    /// Peer sent a close frame.
    Close,
}

/// An established upstream session.
#[async_trait]
pub trait UpstreamSession: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next frame. `None` means the stream ended.
    async fn recv(&mut self) -> Option<Result<UpstreamFrame, TransportError>>;
}

/// Opens upstream sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connect to `url` and complete the handshake.
    async fn connect(&self, url: &str) -> Result<Box<dyn UpstreamSession>, TransportError>;
}

// =============================================================================
// Persistence
// =============================================================================

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Filesystem failure.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable storage for the average mapping.
#[cfg_attr(test, mockall::automock)]
pub trait AverageStore: Send + Sync {
    /// Load the persisted mapping. Never fails: missing or corrupt storage
    /// yields an empty mapping.
    fn load(&self) -> AverageMapping;

    /// Persist the full mapping atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping could not be written.
    fn save(&self, averages: &AverageMapping) -> Result<(), PersistenceError>;
}

// =============================================================================
// Subscriber Sink
// =============================================================================

/// Delivery failure for one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The subscriber went away.
    #[error("subscriber disconnected")]
    Disconnected,
    /// Delivery failed.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A downstream consumer of subscriber events.
///
/// Each sink is driven from its own task; an error ends only that sink.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    /// Deliver one event.
    async fn deliver(&self, event: SubscriberEvent) -> Result<(), SinkError>;
}
