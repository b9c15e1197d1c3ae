//! Finnhub Stream Integration
//!
//! WebSocket client for the Finnhub trade stream.
//!
//! # Modules
//!
//! - [`messages`]: wire format types
//! - [`codec`]: frame decoding and subscribe encoding
//! - [`reconnect`]: fixed-delay reconnect policy
//! - [`transport`]: `tokio-tungstenite` connector
//! - [`client`]: reconnecting stream client

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use client::{StreamClient, StreamClientConfig, StreamClientError, StreamEvent};
pub use codec::{CodecError, InboundFrame, JsonCodec};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use transport::TungsteniteConnector;
