//! Relay Configuration Settings
//!
//! Configuration types for the tick relay, loaded from environment variables.
//! A missing upstream credential is not a configuration error: the relay
//! starts in degraded mode and keeps retrying.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::streaming::TrackedSymbols;

/// Symbols relayed when `TICK_RELAY_SYMBOLS` is not set.
pub const DEFAULT_SYMBOLS: [&str; 3] = ["BINANCE:ETHUSDC", "BINANCE:ETHUSDT", "BINANCE:ETHBTC"];

/// Default Finnhub WebSocket endpoint.
pub const DEFAULT_STREAM_URL: &str = "wss://ws.finnhub.io";

/// Name of the persisted averages file inside the data directory.
pub const AVERAGES_FILE_NAME: &str = "hourly-averages.json";

/// Longest accepted average period.
pub const MAX_AVERAGE_PERIOD: Duration = Duration::from_secs(7 * 24 * 3_600);

/// Largest accepted per-subscriber queue. Every slot is allocated up front.
pub const MAX_SUBSCRIBER_QUEUE_CAPACITY: usize = 65_536;

/// Largest accepted client → ingestion channel capacity.
pub const MAX_EVENT_CHANNEL_CAPACITY: usize = 1_048_576;

/// Finnhub API credential.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    /// Create new credentials. Returns `None` for a blank key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Option<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            None
        } else {
            Some(Self { api_key })
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Upstream stream connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket base URL.
    pub url: String,
    /// API credential, if configured.
    pub credentials: Option<Credentials>,
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Jitter fraction applied to the reconnect delay (0 = fixed).
    pub reconnect_jitter: f64,
    /// Capacity of the client → ingestion event channel.
    pub event_channel_capacity: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            credentials: None,
            reconnect_delay: Duration::from_secs(5),
            reconnect_jitter: 0.0,
            event_channel_capacity: 1_024,
        }
    }
}

/// Rolling-average schedule settings.
#[derive(Debug, Clone)]
pub struct AverageSettings {
    /// Period between average computations.
    pub period: Duration,
    /// Fire on wall-clock multiples of the period (top of the hour for 1h).
    pub align_to_wall_clock: bool,
    /// Directory holding the persisted averages file.
    pub data_dir: PathBuf,
}

impl Default for AverageSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(3_600),
            align_to_wall_clock: true,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl AverageSettings {
    /// Full path of the averages file.
    #[must_use]
    pub fn averages_path(&self) -> PathBuf {
        self.data_dir.join(AVERAGES_FILE_NAME)
    }
}

/// Broadcast settings.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    /// Minimum interval between two deliveries for the same symbol.
    pub min_emit_interval: Duration,
    /// Per-subscriber queue capacity (oldest dropped on overflow).
    pub subscriber_queue_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            min_emit_interval: Duration::from_millis(1_000),
            subscriber_queue_capacity: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP port for the subscriber WebSocket and health endpoints.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 3_001 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Tracked symbols.
    pub symbols: TrackedSymbols,
    /// Upstream connection settings.
    pub upstream: UpstreamSettings,
    /// Average schedule settings.
    pub averages: AverageSettings,
    /// Broadcast settings.
    pub broadcast: BroadcastSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            symbols: TrackedSymbols::new(DEFAULT_SYMBOLS),
            upstream: UpstreamSettings::default(),
            averages: AverageSettings::default(),
            broadcast: BroadcastSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol list or a period is unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol list is empty, the average period is
    /// zero or too long, or a queue capacity exceeds its cap.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let symbols = match lookup("TICK_RELAY_SYMBOLS") {
            Some(raw) => {
                let symbols = TrackedSymbols::new(raw.split(','));
                if symbols.is_empty() {
                    return Err(ConfigError::EmptyValue("TICK_RELAY_SYMBOLS".to_string()));
                }
                symbols
            }
            None => defaults.symbols,
        };

        let upstream = UpstreamSettings {
            url: lookup("FINNHUB_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.upstream.url),
            credentials: lookup("FINNHUB_API_KEY").and_then(Credentials::new),
            reconnect_delay: parse_duration_millis(
                &lookup,
                "TICK_RELAY_RECONNECT_DELAY_MS",
                defaults.upstream.reconnect_delay,
            ),
            reconnect_jitter: parse_finite(
                &lookup,
                "TICK_RELAY_RECONNECT_JITTER",
                defaults.upstream.reconnect_jitter,
            )
            .clamp(0.0, 1.0),
            event_channel_capacity: parse_or(
                &lookup,
                "TICK_RELAY_EVENT_CHANNEL_CAPACITY",
                defaults.upstream.event_channel_capacity,
            )
            .max(1),
        };

        let averages = AverageSettings {
            period: parse_duration_secs(
                &lookup,
                "TICK_RELAY_AVERAGE_PERIOD_SECS",
                defaults.averages.period,
            ),
            align_to_wall_clock: lookup("TICK_RELAY_ALIGN_TO_WALL_CLOCK")
                .map_or(defaults.averages.align_to_wall_clock, |v| {
                    !matches!(v.to_lowercase().as_str(), "false" | "0" | "no")
                }),
            data_dir: lookup("TICK_RELAY_DATA_DIR")
                .filter(|v| !v.trim().is_empty())
                .map_or(defaults.averages.data_dir, PathBuf::from),
        };

        if averages.period.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "TICK_RELAY_AVERAGE_PERIOD_SECS".to_string(),
                reason: "period must be greater than zero".to_string(),
            });
        }
        if averages.period > MAX_AVERAGE_PERIOD {
            return Err(ConfigError::InvalidValue {
                key: "TICK_RELAY_AVERAGE_PERIOD_SECS".to_string(),
                reason: format!("period must not exceed {}s", MAX_AVERAGE_PERIOD.as_secs()),
            });
        }
        check_capacity(
            "TICK_RELAY_EVENT_CHANNEL_CAPACITY",
            upstream.event_channel_capacity,
            MAX_EVENT_CHANNEL_CAPACITY,
        )?;

        let broadcast = BroadcastSettings {
            min_emit_interval: parse_duration_millis(
                &lookup,
                "TICK_RELAY_MIN_EMIT_INTERVAL_MS",
                defaults.broadcast.min_emit_interval,
            ),
            subscriber_queue_capacity: parse_or(
                &lookup,
                "TICK_RELAY_SUBSCRIBER_QUEUE_CAPACITY",
                defaults.broadcast.subscriber_queue_capacity,
            )
            .max(1),
        };

        check_capacity(
            "TICK_RELAY_SUBSCRIBER_QUEUE_CAPACITY",
            broadcast.subscriber_queue_capacity,
            MAX_SUBSCRIBER_QUEUE_CAPACITY,
        )?;

        let server = ServerSettings {
            http_port: parse_or(&lookup, "TICK_RELAY_HTTP_PORT", defaults.server.http_port),
        };

        Ok(Self {
            symbols,
            upstream,
            averages,
            broadcast,
            server,
        })
    }

    /// Full stream URL including the credential, if one is configured.
    #[must_use]
    pub fn stream_url(&self) -> Option<String> {
        self.upstream
            .credentials
            .as_ref()
            .map(|c| format!("{}?token={}", self.upstream.url, c.api_key()))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_finite<F>(lookup: &F, key: &str, default: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn check_capacity(key: &str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("capacity must not exceed {max}"),
        });
    }
    Ok(())
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
