//! Subscriber Gateway
//!
//! WebSocket endpoint for downstream subscribers and the HTTP server that
//! hosts it next to the health routes.
//!
//! # Protocol
//!
//! `GET /ws` upgrades to a WebSocket. The server sends JSON text frames:
//!
//! ```json
//! {"event":"initialData","data":[{"symbol":"SYM","current":null,"timestamp":null,"hourlyAverage":0.0}]}
//! {"event":"rateUpdate","data":{"symbol":"SYM","current":2000.0,"timestamp":"...","hourlyAverage":0.0}}
//! ```
//!
//! Client messages are ignored; a close frame ends the session.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{SinkError, SubscriberSink};
use crate::application::services::CoreService;
use crate::domain::streaming::SubscriberEvent;
use crate::infrastructure::health;

// =============================================================================
// WebSocket Sink
// =============================================================================

/// Writes subscriber events to one WebSocket as JSON text frames.
pub struct WebSocketSink {
    sender: AsyncMutex<SplitSink<WebSocket, Message>>,
}

impl WebSocketSink {
    /// Wrap the write half of a socket.
    #[must_use]
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sender: AsyncMutex::new(sender),
        }
    }
}

#[async_trait]
impl SubscriberSink for WebSocketSink {
    async fn deliver(&self, event: SubscriberEvent) -> Result<(), SinkError> {
        let json = event
            .to_json()
            .map_err(|e| SinkError::Delivery(e.to_string()))?;
        self.sender
            .lock()
            .await
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SinkError::Disconnected)
    }
}

// =============================================================================
// Router
// =============================================================================

#[derive(Clone)]
struct GatewayState {
    service: Arc<CoreService>,
    cancel: CancellationToken,
}

/// Subscriber WebSocket route bound to `service`. Open sessions close when
/// `cancel` fires.
pub fn router(service: Arc<CoreService>, cancel: CancellationToken) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(GatewayState { service, cancel })
}

/// Full application: subscriber gateway plus health routes.
pub fn app(service: Arc<CoreService>, cancel: CancellationToken) -> Router {
    router(Arc::clone(&service), cancel).merge(health::router(service))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (sender, mut receiver) = socket.split();
    let session = state.cancel.child_token();
    let mut handle = state
        .service
        .register_subscriber(Arc::new(WebSocketSink::new(sender)), session.clone());

    loop {
        tokio::select! {
            () = session.cancelled() => break,
            _ = &mut handle.task => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    session.cancel();
    if !handle.task.is_finished() {
        let _ = handle.task.await;
    }
    tracing::debug!(subscriber = %handle.id, "WebSocket session closed");
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP server for the gateway and health routes.
pub struct HttpServer {
    port: u16,
    service: Arc<CoreService>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, service: Arc<CoreService>, cancel: CancellationToken) -> Self {
        Self {
            port,
            service,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = app(self.service, self.cancel.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
