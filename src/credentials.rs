//! Time-limited broker credentials derived from a device shared secret
//!
//! Username layout: `{client_id};{app_id};{connection_id};{expiry}` where the
//! client id is the product id directly followed by the device name.
//! Password layout: `hex(HMAC-SHA256(key = base64_decode(secret), username));hmacsha256`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Application id embedded in every username
pub const DEFAULT_APP_ID: &str = "12010126";
/// Length of the random per-attempt connection id
pub const CONNECTION_ID_LEN: usize = 5;
/// Expiry written when the session reconnects automatically
pub const NEVER_EXPIRES: i64 = i32::MAX as i64;
/// Lifetime of credentials for sessions without automatic reconnect
pub const CREDENTIAL_LIFETIME_SECS: i64 = 600;

const SIGNATURE_SUFFIX: &str = ";hmacsha256";

/// Who the device is and the secret it signs with
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub product_id: String,
    pub device_name: String,
    pub app_id: String,
    /// Base64-encoded shared secret; `None` connects without a password
    pub secret: Option<String>,
}

impl DeviceIdentity {
    pub fn new(product_id: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            device_name: device_name.into(),
            app_id: DEFAULT_APP_ID.to_string(),
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn client_id(&self) -> String {
        format!("{}{}", self.product_id, self.device_name)
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("product_id", &self.product_id)
            .field("device_name", &self.device_name)
            .field("app_id", &self.app_id)
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Expiry encoded in the username
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    At(i64),
}

impl Expiry {
    pub fn as_unix_secs(self) -> i64 {
        match self {
            Expiry::Never => NEVER_EXPIRES,
            Expiry::At(secs) => secs,
        }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_unix_secs())
    }
}

/// Credentials for one connect attempt, never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub username: String,
    pub connection_id: String,
    pub expiry: Expiry,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("connection_id", &self.connection_id)
            .field("expiry", &self.expiry)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Signing failures; never fatal, the caller connects without a password
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Shared secret is not valid base64: {0}")]
    InvalidSecret(#[from] base64::DecodeError),
    #[error("Shared secret cannot be used as an HMAC key")]
    InvalidKey,
}

/// Pure credential derivation
pub struct CredentialSigner;

impl CredentialSigner {
    /// Derive credentials using the thread RNG and the current time
    pub fn sign(identity: &DeviceIdentity, automatic_reconnect: bool) -> Credentials {
        Self::sign_with(
            identity,
            automatic_reconnect,
            &mut rand::thread_rng(),
            Utc::now().timestamp(),
        )
    }

    /// Derive credentials with an explicit RNG and clock
    pub fn sign_with<R: Rng + ?Sized>(
        identity: &DeviceIdentity,
        automatic_reconnect: bool,
        rng: &mut R,
        now_secs: i64,
    ) -> Credentials {
        let client_id = identity.client_id();
        let connection_id = Self::generate_connection_id(rng);
        let expiry = if automatic_reconnect {
            Expiry::Never
        } else {
            Expiry::At(now_secs + CREDENTIAL_LIFETIME_SECS)
        };
        let username = format!(
            "{};{};{};{}",
            client_id, identity.app_id, connection_id, expiry
        );

        let password = match identity.secret.as_deref() {
            Some(secret) if !secret.is_empty() => match Self::password(&username, secret) {
                Ok(password) => Some(password),
                Err(e) => {
                    debug!("Failed to derive broker password, connecting without one: {}", e);
                    None
                }
            },
            _ => None,
        };

        Credentials {
            client_id,
            username,
            connection_id,
            expiry,
            password,
        }
    }

    /// Random `[a-zA-Z0-9]` string of [`CONNECTION_ID_LEN`] characters
    pub fn generate_connection_id<R: Rng + ?Sized>(rng: &mut R) -> String {
        (&mut *rng)
            .sample_iter(Alphanumeric)
            .take(CONNECTION_ID_LEN)
            .map(char::from)
            .collect()
    }

    /// Signed password for `username`
    pub fn password(username: &str, secret: &str) -> Result<String, CredentialError> {
        Ok(format!("{}{}", Self::signature(username, secret)?, SIGNATURE_SUFFIX))
    }

    /// Lowercase hex HMAC-SHA256 of `data` keyed by the decoded secret
    pub fn signature(data: &str, secret: &str) -> Result<String, CredentialError> {
        let key = STANDARD.decode(secret.trim())?;
        let mut mac =
            Hmac::<Sha256>::new_from_slice(&key).map_err(|_| CredentialError::InvalidKey)?;
        mac.update(data.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
