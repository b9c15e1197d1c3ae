//! Finnhub Stream Client
//!
//! Maintains exactly one logical connection to the upstream trade stream.
//! After every handshake one subscribe request per tracked symbol is sent;
//! decoded ticks are forwarded to the ingestion task over a bounded channel.
//!
//! # Failure Handling
//!
//! Close, transport error and a missing credential all end the session the
//! same way: the [`ConnectionMonitor`] records the failure and hands out a
//! reconnect ticket, the client waits out the fixed backoff, and the next
//! attempt starts. Retries never stop on their own; only cancellation ends
//! the loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, InboundFrame, JsonCodec};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{TransportError, UpstreamConnector, UpstreamFrame};
use crate::domain::connection::{ConnectionMonitor, FailureKind};
use crate::domain::streaming::{Tick, TrackedSymbols};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one upstream session.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// No upstream credential is configured.
    #[error("upstream credential not configured")]
    MissingCredentials,

    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Codec error while encoding an outbound message.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Connection closed by the peer or end of stream.
    #[error("connection closed")]
    ConnectionClosed,
}

impl StreamClientError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::MissingCredentials => FailureKind::MissingCredentials,
            Self::ConnectionClosed => FailureKind::Closed,
            Self::Transport(_) | Self::Codec(_) => FailureKind::Errored(self.to_string()),
        }
    }

    const fn metric_label(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::Transport(TransportError::Connect(_)) => "connect",
            Self::Transport(TransportError::Send(_)) => "send",
            Self::Transport(TransportError::Receive(_)) => "receive",
            Self::Codec(_) => "codec",
            Self::ConnectionClosed => "closed",
        }
    }
}

// =============================================================================
// Stream Events
// =============================================================================

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Connected and subscribed.
    Connected,
    /// Session ended.
    Disconnected,
    /// Waiting out the backoff before the given attempt.
    Reconnecting {
        /// Reconnection attempt number since the last successful connection.
        attempt: u32,
    },
    /// A batch of decoded ticks.
    Trades(Vec<Tick>),
    /// Server-side error report.
    Error(String),
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the stream client.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Full stream URL including the token, `None` when no credential is set.
    pub url: Option<String>,
    /// Symbols subscribed after every handshake.
    pub symbols: TrackedSymbols,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl StreamClientConfig {
    /// Build client configuration from the relay configuration.
    #[must_use]
    pub fn from_relay_config(config: &crate::RelayConfig) -> Self {
        Self {
            url: config.stream_url(),
            symbols: config.symbols.clone(),
            reconnect: ReconnectConfig::from_upstream_settings(&config.upstream),
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// Reconnecting upstream client.
pub struct StreamClient {
    config: StreamClientConfig,
    connector: Arc<dyn UpstreamConnector>,
    codec: JsonCodec,
    monitor: Arc<ConnectionMonitor>,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub fn new(
        config: StreamClientConfig,
        connector: Arc<dyn UpstreamConnector>,
        monitor: Arc<ConnectionMonitor>,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            codec: JsonCodec::new(),
            monitor,
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut reconnect_policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream client cancelled");
                return;
            }

            let error = match self.connect_and_run(&mut reconnect_policy).await {
                Ok(()) => {
                    tracing::info!("Stream client stopped");
                    return;
                }
                Err(e) => e,
            };

            match &error {
                StreamClientError::MissingCredentials => {
                    tracing::warn!("FINNHUB_API_KEY not set; retrying after backoff");
                }
                other => tracing::warn!(error = %other, "Upstream connection error"),
            }
            metrics::record_upstream_error(error.metric_label());
            metrics::set_upstream_connected(false);

            let ticket = self.monitor.fail(error.failure_kind());
            let _ = self.event_tx.send(StreamEvent::Disconnected).await;

            let delay = reconnect_policy.next_delay();
            let attempt = reconnect_policy.attempt_count();
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis(),
                "Reconnecting to upstream stream"
            );
            let _ = self
                .event_tx
                .send(StreamEvent::Reconnecting { attempt })
                .await;

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Stream client cancelled during reconnect delay");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            if let Some(ticket) = ticket {
                if self.monitor.reconnect_due(ticket) {
                    metrics::record_reconnect();
                }
            }
        }
    }

    /// Connect, subscribe and pump frames until error or cancellation.
    async fn connect_and_run(
        &self,
        reconnect_policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamClientError> {
        let Some(url) = self.config.url.as_deref() else {
            return Err(StreamClientError::MissingCredentials);
        };

        if !self.monitor.connecting() {
            tracing::debug!("Connect attempted while a reconnect is still pending");
        }
        tracing::info!(symbols = self.config.symbols.len(), "Connecting to upstream stream");

        let mut session = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            session = self.connector.connect(url) => session?,
        };

        for symbol in self.config.symbols.iter() {
            let request = self.codec.encode_subscribe(symbol)?;
            session.send_text(request).await?;
            tracing::debug!(symbol = %symbol, "Subscribed");
        }

        self.monitor.opened();
        reconnect_policy.reset();
        metrics::set_upstream_connected(true);
        tracing::info!("Upstream stream connected");
        let _ = self.event_tx.send(StreamEvent::Connected).await;

        loop {
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                frame = session.recv() => frame,
            };

            match frame {
                Some(Ok(UpstreamFrame::Text(text))) => {
                    self.monitor.increment_messages();
                    metrics::record_frame_received();
                    self.handle_text(&text).await;
                }
                Some(Ok(UpstreamFrame::Close)) => {
                    tracing::info!("Upstream sent close frame");
                    return Err(StreamClientError::ConnectionClosed);
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    tracing::info!("Upstream stream ended");
                    return Err(StreamClientError::ConnectionClosed);
                }
            }
        }
    }

    /// Decode one text frame and forward anything of interest.
    async fn handle_text(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(InboundFrame::Trades(ticks)) => {
                let _ = self.event_tx.send(StreamEvent::Trades(ticks)).await;
            }
            Ok(InboundFrame::Ping) => tracing::trace!("Upstream ping"),
            Ok(InboundFrame::Error(msg)) => {
                tracing::warn!(msg = %msg, "Upstream reported an error");
                let _ = self.event_tx.send(StreamEvent::Error(msg)).await;
            }
            Ok(InboundFrame::Other) => tracing::trace!("Ignoring non-trade frame"),
            Err(e) => tracing::warn!(error = %e, "Dropping malformed upstream frame"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::UpstreamSession;
    use crate::domain::connection::ConnectionState;

    struct RefusingConnector {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamConnector for RefusingConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn UpstreamSession>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Connect("refused".to_string()))
        }
    }

    fn client(
        url: Option<&str>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> (Arc<StreamClient>, Arc<ConnectionMonitor>, mpsc::Receiver<StreamEvent>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let monitor = Arc::new(ConnectionMonitor::new());
        let cancel = CancellationToken::new();
        let config = StreamClientConfig {
            url: url.map(str::to_string),
            symbols: TrackedSymbols::new(["SYM"]),
            reconnect: ReconnectConfig {
                delay: Duration::from_secs(5),
                jitter_factor: 0.0,
            },
        };
        let client = Arc::new(StreamClient::new(
            config,
            connector,
            Arc::clone(&monitor),
            tx,
            cancel.clone(),
        ));
        (client, monitor, rx, cancel)
    }

    #[test]
    fn failure_kinds() {
        assert_eq!(
            StreamClientError::MissingCredentials.failure_kind(),
            FailureKind::MissingCredentials
        );
        assert_eq!(
            StreamClientError::ConnectionClosed.failure_kind(),
            FailureKind::Closed
        );
        assert!(matches!(
            StreamClientError::Transport(TransportError::Receive("x".into())).failure_kind(),
            FailureKind::Errored(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credentials_skip_handshake_and_retry() {
        let connector = Arc::new(RefusingConnector {
            attempts: AtomicUsize::new(0),
        });
        let (client, monitor, mut rx, cancel) = client(None, connector.clone());
        let handle = tokio::spawn(Arc::clone(&client).run());

        assert_eq!(rx.recv().await, Some(StreamEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(StreamEvent::Reconnecting { attempt: 1 }));
        assert!(matches!(monitor.state(), ConnectionState::Errored { .. }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.recv().await, Some(StreamEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(StreamEvent::Reconnecting { attempt: 2 }));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert!(monitor.reconnect_attempts() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failures_retry_on_fixed_delay() {
        let connector = Arc::new(RefusingConnector {
            attempts: AtomicUsize::new(0),
        });
        let (client, _monitor, mut rx, cancel) = client(Some("wss://test"), connector.clone());
        let handle = tokio::spawn(Arc::clone(&client).run());

        assert_eq!(rx.recv().await, Some(StreamEvent::Disconnected));
        assert_eq!(rx.recv().await, Some(StreamEvent::Reconnecting { attempt: 1 }));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(rx.recv().await, Some(StreamEvent::Disconnected));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
