//! Caller-facing status vocabulary and synchronous rejection errors
//!
//! Every public operation either accepts a request (`Ok(())`) or rejects it
//! locally with a [`LinkError`]. Asynchronous outcomes reach the caller through
//! [`crate::connection::ConnectionListener`] as a [`Status`] plus a detail string.

use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result codes shared by synchronous returns and completion callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    Error,
    ParameterInvalid,
    MqttNoConn,
    MqttConnectInProgress,
    SubdevStatNotExist,
    SubdevStatOffline,
}

impl Status {
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::Error => "ERROR",
            Status::ParameterInvalid => "PARAMETER_INVALID",
            Status::MqttNoConn => "MQTT_NO_CONN",
            Status::MqttConnectInProgress => "MQTT_CONNECT_IN_PROGRESS",
            Status::SubdevStatNotExist => "SUBDEV_STAT_NOT_EXIST",
            Status::SubdevStatOffline => "SUBDEV_STAT_OFFLINE",
        };
        f.write_str(name)
    }
}

/// Local rejection of a request before (or while) handing it to the transport
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    #[error("No active transport connection")]
    NoConnection,

    #[error("A connect attempt is already in progress")]
    ConnectInProgress,

    #[error("Not connected and no disconnected publish buffer is enabled")]
    PublishUnavailable,

    #[error("Transport is not connected, nothing to disconnect")]
    AlreadyDisconnected,

    #[error("Transport rejected request: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to encode gateway message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sub-device {product_id}/{device_name} does not exist")]
    SubdevNotExist {
        product_id: String,
        device_name: String,
    },

    #[error("Sub-device {product_id}/{device_name} is offline")]
    SubdevOffline {
        product_id: String,
        device_name: String,
    },
}

impl LinkError {
    /// Map the rejection onto the caller-facing status vocabulary
    pub fn status(&self) -> Status {
        match self {
            LinkError::InvalidParameter { .. } => Status::ParameterInvalid,
            LinkError::NoConnection => Status::MqttNoConn,
            LinkError::ConnectInProgress => Status::MqttConnectInProgress,
            LinkError::SubdevNotExist { .. } => Status::SubdevStatNotExist,
            LinkError::SubdevOffline { .. } => Status::SubdevStatOffline,
            LinkError::PublishUnavailable
            | LinkError::AlreadyDisconnected
            | LinkError::Transport(_)
            | LinkError::Serialization(_) => Status::Error,
        }
    }

    pub fn invalid_parameter<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn subdev_not_exist(product_id: &str, device_name: &str) -> Self {
        Self::SubdevNotExist {
            product_id: product_id.to_string(),
            device_name: device_name.to_string(),
        }
    }

    pub fn subdev_offline(product_id: &str, device_name: &str) -> Self {
        Self::SubdevOffline {
            product_id: product_id.to_string(),
            device_name: device_name.to_string(),
        }
    }
}

impl From<&LinkResult> for Status {
    fn from(result: &LinkResult) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(e) => e.status(),
        }
    }
}

/// Result of a request-issuing operation
pub type LinkResult = Result<(), LinkError>;
