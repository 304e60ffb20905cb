//! rumqttc-backed MQTT transport
//!
//! Pure functions are kept apart from I/O so the routing and bookkeeping
//! can be tested without a broker.
//!
//! - [`connection`] - Broker URI parsing, option building and reconnect backoff
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`correlator`] - Request id to packet id bookkeeping
//! - [`client`] - The spawned event loop and the [`Transport`](crate::transport::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use gatelink::transport::{event_channel, mqtt::RumqttcTransport};
//!
//! # tokio_test::block_on(async {
//! let (events, _receiver) = event_channel();
//! let transport = RumqttcTransport::new(events)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod correlator;
pub mod message_handler;

pub use client::RumqttcTransport;
pub use connection::{configure_mqtt_options, BrokerAddress, ReconnectConfig};
pub use correlator::RequestCorrelator;
pub use message_handler::{EventRoute, MessageHandler};
