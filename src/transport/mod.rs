//! Transport collaborator contract
//!
//! The connection state machine never talks to sockets directly. It drives a
//! [`Transport`] through non-blocking requests, each tagged with a
//! [`RequestId`], and receives every outcome back as a [`TransportEvent`] on a
//! single channel. Implementations must deliver events asynchronously: a
//! request method must never call back into the connection on the caller's
//! stack.

use bytes::Bytes;
use rumqttc::QoS;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Correlates a request with its eventual [`TransportEvent::ActionCompleted`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// An application message, inbound or outbound
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Packet identifier (0 for QoS 0 deliveries)
    pub id: u16,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

impl Message {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: 0,
            qos: QoS::AtMostOnce,
            retain: false,
            payload: payload.into(),
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_id(mut self, id: u16) -> Self {
        self.id = id;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Policy for publishes requested while the transport is not connected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOptions {
    pub enabled: bool,
    /// Maximum number of buffered publishes
    pub size: usize,
    /// Not applied by the rumqttc transport; a full channel refuses the publish
    pub delete_oldest: bool,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            size: 1024,
            delete_oldest: false,
        }
    }
}

/// Caller-supplied connect options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub keep_alive: Duration,
    pub connection_timeout: Duration,
    pub automatic_reconnect: bool,
    pub clean_session: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(240),
            connection_timeout: Duration::from_secs(8),
            automatic_reconnect: true,
            clean_session: true,
        }
    }
}

/// Fully resolved connect request handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub server_uri: String,
    pub client_id: String,
    pub username: String,
    pub password: Option<String>,
    pub options: ConnectOptions,
    pub buffer: Option<BufferOptions>,
}

/// Successful completion of a request, one variant per operation kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionAck {
    Connected,
    Disconnected,
    Published { message_id: u16 },
    Subscribed { granted_qos: Vec<u8> },
    Unsubscribed,
}

/// Everything the transport reports back to the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Session (re)established; `reconnect` is true for transport-driven reconnects
    ConnectComplete { reconnect: bool, server_uri: String },
    /// Established session dropped
    ConnectionLost { cause: String },
    /// A caller-requested reconnect of a stopped session could not reach the broker
    ReconnectFailed { cause: String },
    /// Inbound application message
    MessageArrived { topic: String, message: Message },
    /// Outcome of a previously accepted request
    ActionCompleted {
        request: RequestId,
        outcome: Result<ActionAck, String>,
    },
}

/// Sending half handed to transports at construction
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
/// Receiving half drained by [`crate::connection::Connection::spawn_event_loop`]
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the single completion channel shared by a transport and its connection
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Local refusals raised by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport has no session, connect first")]
    NotStarted,
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Invalid server URI: {0}")]
    InvalidServerUri(String),
    #[error("No async runtime available to drive the transport")]
    NoRuntime,
}

/// Narrow contract the connection state machine consumes
///
/// Every request method returns as soon as the request was accepted for
/// transmission or refused locally; the outcome arrives later as a
/// [`TransportEvent::ActionCompleted`] carrying the same [`RequestId`].
pub trait Transport: Send + Sync {
    /// Start a session with the given credentials and options
    fn connect(&self, request: &ConnectRequest, id: RequestId) -> Result<(), TransportError>;

    /// Re-establish the last session using the transport's own reconnect facility
    fn reconnect(&self) -> Result<(), TransportError>;

    /// Close the session, waiting at most `timeout` for in-flight work
    fn disconnect(&self, timeout: Option<Duration>, id: RequestId) -> Result<(), TransportError>;

    /// Queue a publish (written immediately when connected, buffered otherwise)
    fn publish(&self, topic: &str, message: &Message, id: RequestId) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str, qos: QoS, id: RequestId) -> Result<(), TransportError>;

    fn unsubscribe(&self, topic: &str, id: RequestId) -> Result<(), TransportError>;

    /// Check if the transport currently holds an established session
    fn is_connected(&self) -> bool;
}

/// Convert a numeric QoS level (0, 1, 2) into [`QoS`]
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Numeric level of a [`QoS`]
pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
