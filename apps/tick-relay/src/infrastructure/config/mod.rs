//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    AVERAGES_FILE_NAME, AverageSettings, BroadcastSettings, ConfigError, Credentials,
    DEFAULT_STREAM_URL, DEFAULT_SYMBOLS, MAX_AVERAGE_PERIOD, MAX_EVENT_CHANNEL_CAPACITY,
    MAX_SUBSCRIBER_QUEUE_CAPACITY, RelayConfig, ServerSettings, UpstreamSettings,
};
