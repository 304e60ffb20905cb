//! gatelink - device-side MQTT connection manager
//!
//! A device connects to its broker with time-limited HMAC credentials, keeps
//! its subscriptions across reconnects, and can act as a gateway that reports
//! logical sub-devices online and offline.
//!
//! # Overview
//!
//! - [`credentials`] - broker username/password derivation
//! - [`connection`] - the connection state machine, subscription registry,
//!   delivery deduplication and the message interceptor chain
//! - [`gateway`] - sub-device directory and online/offline reports
//! - [`protocol`] - gateway wire messages and topic rules
//! - [`transport`] - the transport contract and a `rumqttc` implementation
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use gatelink::connection::{Connection, ConnectionSettings, NoopListener};
//! use gatelink::credentials::DeviceIdentity;
//! use gatelink::gateway::{Gateway, GatewayProfile};
//! use gatelink::transport::{event_channel, mqtt::RumqttcTransport, ConnectOptions};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let identity = DeviceIdentity::new("PID", "gw-1").with_secret("c2VjcmV0");
//! let settings = ConnectionSettings::new("tcp://localhost:1883", identity);
//!
//! let (events, receiver) = event_channel();
//! let transport = Arc::new(RumqttcTransport::new(events)?);
//! let connection = Arc::new(Connection::new(settings, transport, Arc::new(NoopListener)));
//! connection.spawn_event_loop(receiver);
//!
//! let gateway = Gateway::new(Arc::clone(&connection), GatewayProfile::new("hall gateway"));
//! connection.connect(Some(ConnectOptions::default()), None)?;
//! gateway.report_online("lamp", "l-1")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, LinkConfig};
pub use connection::{Connection, ConnectionListener, ConnectionSettings, ConnectionStatus};
pub use credentials::{CredentialSigner, Credentials, DeviceIdentity};
pub use error::{LinkError, LinkResult, Status};
pub use gateway::{Gateway, GatewayProfile, SubdevStatus};
pub use transport::{Message, Transport, TransportEvent};
