//! WebSocket Transport
//!
//! `tokio-tungstenite` implementation of the upstream connector ports.
//! Control frames are handled here: pings are answered with pongs and never
//! reach the stream client.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{
    TransportError, UpstreamConnector, UpstreamFrame, UpstreamSession,
};

/// Connector backed by `tokio_tungstenite::connect_async`.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UpstreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn UpstreamSession>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(TungsteniteSession { stream }))
    }
}

/// An open tungstenite WebSocket.
pub struct TungsteniteSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl UpstreamSession for TungsteniteSession {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<UpstreamFrame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(Ok(UpstreamFrame::Text(text.as_str().to_owned())));
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(TransportError::Send(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Upstream sent close frame");
                    return Some(Ok(UpstreamFrame::Close));
                }
                Ok(_) => {
                    // Binary, pong and raw frames carry nothing for us.
                }
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
