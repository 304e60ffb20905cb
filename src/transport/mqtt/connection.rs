//! Pure connection configuration for the rumqttc transport
//!
//! Broker URI parsing, `MqttOptions` construction from a [`ConnectRequest`],
//! and the reconnect backoff schedule.

use crate::transport::{BufferOptions, ConnectRequest, TransportError};
use rumqttc::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Smallest keep-alive interval handed to rumqttc
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
/// Request channel capacity when no buffer policy is configured
pub const DEFAULT_REQUEST_CAPACITY: usize = 64;

/// Backoff schedule between automatic reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for given attempt using custom pattern
    /// Pattern: 25ms, 50ms, 100ms, 250ms, then sustain at 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Host, port and TLS flag parsed from a server URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerAddress {
    /// Parse `tcp://`, `mqtt://`, `ssl://` or `mqtts://` URIs
    pub fn parse(server_uri: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidServerUri(server_uri.to_string());
        let url = Url::parse(server_uri).map_err(|_| invalid())?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "mqtts" => true,
            _ => return Err(invalid()),
        };
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self { host, port, tls })
    }
}

/// Capacity of the rumqttc request channel for a buffer policy
pub fn request_capacity(buffer: Option<&BufferOptions>) -> usize {
    match buffer {
        Some(buffer) if buffer.enabled && buffer.size > 0 => buffer.size,
        _ => DEFAULT_REQUEST_CAPACITY,
    }
}

/// Build rumqttc options from a fully resolved connect request (pure function)
pub fn configure_mqtt_options(request: &ConnectRequest) -> Result<MqttOptions, TransportError> {
    let address = BrokerAddress::parse(&request.server_uri)?;
    let mut mqtt_options = MqttOptions::new(request.client_id.clone(), address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(
        request.username.clone(),
        request.password.clone().unwrap_or_default(),
    );
    mqtt_options.set_keep_alive(request.options.keep_alive.max(MIN_KEEP_ALIVE));
    mqtt_options.set_clean_session(request.options.clean_session);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConnectOptions;

    fn request(server_uri: &str) -> ConnectRequest {
        ConnectRequest {
            server_uri: server_uri.to_string(),
            client_id: "PIDgw-1".to_string(),
            username: "PIDgw-1;12010126;abcde;2147483647".to_string(),
            password: Some("sig;hmacsha256".to_string()),
            options: ConnectOptions::default(),
            buffer: None,
        }
    }

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![25, 50, 100, 250]);
        assert_eq!(config.sustained_delay, 250);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();
        assert_eq!(config.calculate_backoff_delay(1), 25);
        assert_eq!(config.calculate_backoff_delay(2), 50);
        assert_eq!(config.calculate_backoff_delay(3), 100);
        assert_eq!(config.calculate_backoff_delay(4), 250);
        assert_eq!(config.calculate_backoff_delay(5), 250);
        assert_eq!(config.calculate_backoff_delay(100), 250);
    }

    #[test]
    fn test_custom_backoff_pattern() {
        let config = ReconnectConfig {
            backoff_pattern: vec![10],
            sustained_delay: 1000,
        };
        assert_eq!(config.calculate_backoff_delay(0), 10);
        assert_eq!(config.calculate_backoff_delay(1), 10);
        assert_eq!(config.calculate_backoff_delay(2), 1000);
    }

    #[test]
    fn test_broker_address_schemes() {
        assert_eq!(
            BrokerAddress::parse("tcp://broker.local:1884").unwrap(),
            BrokerAddress {
                host: "broker.local".to_string(),
                port: 1884,
                tls: false
            }
        );
        let ssl = BrokerAddress::parse("ssl://broker.local").unwrap();
        assert!(ssl.tls);
        assert_eq!(ssl.port, 8883);
        assert_eq!(BrokerAddress::parse("mqtt://h").unwrap().port, 1883);
        assert!(BrokerAddress::parse("mqtts://h").unwrap().tls);
    }

    #[test]
    fn test_invalid_broker_uri() {
        for uri in ["invalid-url", "http://broker:80", "tcp://"] {
            assert!(
                matches!(
                    BrokerAddress::parse(uri),
                    Err(TransportError::InvalidServerUri(_))
                ),
                "accepted {uri}"
            );
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&request("tcp://localhost:1883")).unwrap();
        assert_eq!(options.client_id(), "PIDgw-1");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(240));
        assert!(options.clean_session());
    }

    #[test]
    fn test_keep_alive_is_clamped() {
        let mut req = request("tcp://localhost:1883");
        req.options.keep_alive = Duration::from_secs(1);
        let options = configure_mqtt_options(&req).unwrap();
        assert_eq!(options.keep_alive(), MIN_KEEP_ALIVE);
    }

    #[test]
    fn test_request_capacity() {
        assert_eq!(request_capacity(None), DEFAULT_REQUEST_CAPACITY);
        assert_eq!(request_capacity(Some(&BufferOptions::default())), 1024);
        let disabled = BufferOptions {
            enabled: false,
            ..BufferOptions::default()
        };
        assert_eq!(request_capacity(Some(&disabled)), DEFAULT_REQUEST_CAPACITY);
    }
}
