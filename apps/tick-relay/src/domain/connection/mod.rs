//! Upstream Connection State
//!
//! Explicit state machine for the upstream stream connection, plus the
//! shared monitor the health surface reads from.
//!
//! # States
//!
//! ```text
//! Disconnected ──► Connecting ──► Open
//!      ▲               │           │
//!      │               ▼           ▼
//!      └──── (Closed | Errored) { pending reconnect }
//! ```
//!
//! A failure while a reconnect is already pending is absorbed: at most one
//! reconnect ticket exists at any time.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

// =============================================================================
// Types
// =============================================================================

/// Token identifying one scheduled reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReconnectTicket(u64);

impl ReconnectTicket {
    /// Ticket sequence number.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Why a connection attempt or session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport closed (server close frame or end of stream).
    Closed,
    /// Transport or handshake error.
    Errored(String),
    /// No upstream credential configured.
    MissingCredentials,
}

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no reconnect pending.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Connected and subscribed.
    Open,
    /// Closed by the peer; a reconnect is pending.
    Closed {
        /// Pending reconnect.
        reconnect: ReconnectTicket,
    },
    /// Failed with an error; a reconnect is pending.
    Errored {
        /// Failure description.
        reason: String,
        /// Pending reconnect.
        reconnect: ReconnectTicket,
    },
}

impl ConnectionState {
    /// The pending reconnect ticket, if any.
    #[must_use]
    pub const fn pending_reconnect(&self) -> Option<ReconnectTicket> {
        match self {
            Self::Closed { reconnect } | Self::Errored { reconnect, .. } => Some(*reconnect),
            Self::Disconnected | Self::Connecting | Self::Open => None,
        }
    }

    /// Short state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed { .. } => "closed",
            Self::Errored { .. } => "errored",
        }
    }
}

/// Coarse connection status exposed to the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Upstream session is open.
    Connected,
    /// Anything else.
    Disconnected,
}

impl ConnectionStatus {
    /// Status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Connection state machine.
///
/// # Example
///
/// ```rust
/// use tick_relay::domain::connection::{ConnectionMachine, FailureKind};
///
/// let mut machine = ConnectionMachine::new();
/// machine.connecting();
/// machine.opened();
///
/// let ticket = machine.fail(FailureKind::Closed);
/// assert!(ticket.is_some());
///
/// // A second failure while the reconnect is pending schedules nothing.
/// assert!(machine.fail(FailureKind::Closed).is_none());
///
/// assert!(machine.reconnect_due(ticket.unwrap()));
/// ```
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    next_ticket: u64,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    /// Create a machine in the `Disconnected` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            next_ticket: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Begin a connection attempt.
    ///
    /// Returns `false` if a reconnect is still pending, in which case the
    /// state is left unchanged.
    pub fn connecting(&mut self) -> bool {
        if self.state.pending_reconnect().is_some() {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Handshake completed and subscriptions were issued.
    pub fn opened(&mut self) {
        self.state = ConnectionState::Open;
    }

    /// Record a failure.
    ///
    /// Returns the ticket of a newly scheduled reconnect, or `None` if one
    /// is already pending.
    pub fn fail(&mut self, failure: FailureKind) -> Option<ReconnectTicket> {
        if self.state.pending_reconnect().is_some() {
            return None;
        }

        self.next_ticket += 1;
        let reconnect = ReconnectTicket(self.next_ticket);
        self.state = match failure {
            FailureKind::Closed => ConnectionState::Closed { reconnect },
            FailureKind::Errored(reason) => ConnectionState::Errored { reason, reconnect },
            FailureKind::MissingCredentials => ConnectionState::Errored {
                reason: "upstream credential not configured".to_string(),
                reconnect,
            },
        };
        Some(reconnect)
    }

    /// The backoff for `ticket` elapsed.
    ///
    /// Returns `true` and moves to `Disconnected` if `ticket` is the pending
    /// one; stale tickets are ignored.
    pub fn reconnect_due(&mut self, ticket: ReconnectTicket) -> bool {
        if self.state.pending_reconnect() == Some(ticket) {
            self.state = ConnectionState::Disconnected;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Connection Monitor
// =============================================================================

/// Shared, thread-safe view of the upstream connection.
///
/// The stream client is the only writer; everything else reads.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    machine: Mutex<ConnectionMachine>,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
    reconnect_attempts: AtomicU64,
    messages_received: AtomicU64,
}

impl ConnectionMonitor {
    /// Create a monitor in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`ConnectionMachine::connecting`].
    pub fn connecting(&self) -> bool {
        self.machine.lock().connecting()
    }

    /// See [`ConnectionMachine::opened`].
    pub fn opened(&self) {
        self.machine.lock().opened();
        *self.last_connected_at.lock() = Some(Utc::now());
    }

    /// See [`ConnectionMachine::fail`].
    pub fn fail(&self, failure: FailureKind) -> Option<ReconnectTicket> {
        self.machine.lock().fail(failure)
    }

    /// See [`ConnectionMachine::reconnect_due`]. Counts the attempt.
    pub fn reconnect_due(&self, ticket: ReconnectTicket) -> bool {
        let due = self.machine.lock().reconnect_due(ticket);
        if due {
            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        }
        due
    }

    /// Increment the inbound frame counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.machine.lock().state().clone()
    }

    /// Coarse status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        if self.machine.lock().state() == &ConnectionState::Open {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    /// Time of the last successful open.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.lock()
    }

    /// Total reconnect attempts since startup.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Total inbound frames since startup.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}
