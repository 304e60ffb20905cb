//! Connection status and its transition table
//!
//! [`SessionState`] is the single owner of the connection status. It lives
//! behind the connection's session lock; every read-modify-write of the
//! status goes through [`SessionState::transition`] while that lock is held.

use crate::transport::ConnectRequest;
use std::fmt;
use tracing::{info, warn};

/// Authoritative connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    ConnectFailed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::ConnectFailed => "connect_failed",
        };
        f.write_str(name)
    }
}

/// Events that move the status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Connect or manual reconnect handed to the transport
    ConnectRequested,
    /// Connect request acknowledged by the broker
    ConnectSucceeded,
    /// Connect request refused locally or by the broker
    ConnectFailed,
    /// Transport reported an established session (initial or reconnect)
    SessionEstablished,
    /// Clean disconnect completed
    DisconnectCompleted,
    /// Established session dropped
    ConnectionLost,
}

/// What `connect` should do given the current status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAdmission {
    Proceed,
    InProgress,
    AlreadyConnected,
}

/// Pure transition rules
pub struct StatusTransitions;

impl StatusTransitions {
    /// Determine next status after an event (pure function)
    pub fn next(_current: ConnectionStatus, event: StatusEvent) -> ConnectionStatus {
        match event {
            StatusEvent::ConnectRequested => ConnectionStatus::Connecting,
            StatusEvent::ConnectSucceeded | StatusEvent::SessionEstablished => {
                ConnectionStatus::Connected
            }
            StatusEvent::ConnectFailed => ConnectionStatus::ConnectFailed,
            StatusEvent::DisconnectCompleted | StatusEvent::ConnectionLost => {
                ConnectionStatus::Disconnected
            }
        }
    }

    /// Guard evaluated by `connect` before anything else
    pub fn admit_connect(current: ConnectionStatus) -> ConnectAdmission {
        match current {
            ConnectionStatus::Connecting => ConnectAdmission::InProgress,
            ConnectionStatus::Connected => ConnectAdmission::AlreadyConnected,
            ConnectionStatus::Idle
            | ConnectionStatus::Disconnected
            | ConnectionStatus::ConnectFailed => ConnectAdmission::Proceed,
        }
    }

    /// Log connection status transition
    pub fn log_transition(from: ConnectionStatus, to: ConnectionStatus) {
        match (from, to) {
            (ConnectionStatus::Connecting, ConnectionStatus::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionStatus::Connected, ConnectionStatus::Disconnected) => {
                warn!("MQTT connection closed");
            }
            (ConnectionStatus::Disconnected, ConnectionStatus::Connected) => {
                info!("MQTT session restored");
            }
            (_, ConnectionStatus::ConnectFailed) => {
                warn!("MQTT connect attempt failed (was {})", from);
            }
            _ if from != to => {
                info!("MQTT connection status: {} -> {}", from, to);
            }
            _ => {}
        }
    }
}

/// Status plus the last connect request, owned by the session lock
#[derive(Debug)]
pub struct SessionState {
    status: ConnectionStatus,
    request: Option<ConnectRequest>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            request: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Apply an event and return the resulting status
    pub fn transition(&mut self, event: StatusEvent) -> ConnectionStatus {
        let next = StatusTransitions::next(self.status, event);
        StatusTransitions::log_transition(self.status, next);
        self.status = next;
        next
    }

    /// Last request handed to the transport; `None` until the first connect
    pub fn connect_request(&self) -> Option<&ConnectRequest> {
        self.request.as_ref()
    }

    pub fn set_connect_request(&mut self, request: ConnectRequest) {
        self.request = Some(request);
    }

    /// True once a session was ever requested from the transport
    pub fn has_session(&self) -> bool {
        self.request.is_some()
    }
}
