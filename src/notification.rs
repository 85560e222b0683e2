//! Change notification codec.
//!
//! The upstream publishes one JSON message per change:
//!
//! ```json
//! {"command":"PolicyChanged","payload":"...","signature":"<hex>","algorithm":5}
//! ```
//!
//! `algorithm` 5 is a plain SHA-256 digest over `command || payload`. It
//! only detects corruption; anyone can compute it. Deployments that need
//! authentic notifications share a key and sign with HMAC-SHA256
//! (`algorithm` 100); the loader then drops anything that does not verify.

use hmac::{Hmac, Mac};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthzError, AuthzResult};

type HmacSha256 = Hmac<Sha256>;

/// What changed upstream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationCommand {
    PolicyChanged,
    SecretChanged,
    /// Anything else; decoded so the listener can log and skip it
    Other(String),
}

impl NotificationCommand {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationCommand::PolicyChanged => "PolicyChanged",
            NotificationCommand::SecretChanged => "SecretChanged",
            NotificationCommand::Other(raw) => raw,
        }
    }

    /// Whether this command requires a reload.
    pub fn triggers_reload(&self) -> bool {
        matches!(
            self,
            NotificationCommand::PolicyChanged | NotificationCommand::SecretChanged
        )
    }
}

impl From<String> for NotificationCommand {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "PolicyChanged" => NotificationCommand::PolicyChanged,
            "SecretChanged" => NotificationCommand::SecretChanged,
            _ => NotificationCommand::Other(raw),
        }
    }
}

impl From<NotificationCommand> for String {
    fn from(command: NotificationCommand) -> Self {
        command.as_str().to_string()
    }
}

impl std::fmt::Display for NotificationCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature scheme, serialised as an integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum SignatureAlgorithm {
    Sha256,
    HmacSha256,
    Unknown(u32),
}

impl SignatureAlgorithm {
    const SHA256_CODE: u32 = 5;
    const HMAC_SHA256_CODE: u32 = 100;
}

impl Default for SignatureAlgorithm {
    fn default() -> Self {
        SignatureAlgorithm::Unknown(0)
    }
}

impl From<u32> for SignatureAlgorithm {
    fn from(code: u32) -> Self {
        match code {
            Self::SHA256_CODE => SignatureAlgorithm::Sha256,
            Self::HMAC_SHA256_CODE => SignatureAlgorithm::HmacSha256,
            other => SignatureAlgorithm::Unknown(other),
        }
    }
}

impl From<SignatureAlgorithm> for u32 {
    fn from(algorithm: SignatureAlgorithm) -> Self {
        match algorithm {
            SignatureAlgorithm::Sha256 => SignatureAlgorithm::SHA256_CODE,
            SignatureAlgorithm::HmacSha256 => SignatureAlgorithm::HMAC_SHA256_CODE,
            SignatureAlgorithm::Unknown(code) => code,
        }
    }
}

/// A change notification as carried on the pub/sub channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub command: NotificationCommand,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub algorithm: SignatureAlgorithm,
}

/// Hex SHA-256 digest over `command || payload`. Deterministic.
pub fn sign(command: &NotificationCommand, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_str().as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex HMAC-SHA256 over `command || payload` with a shared key.
pub fn sign_with_key(command: &NotificationCommand, payload: &str, key: &[u8]) -> AuthzResult<String> {
    let mut mac = keyed_mac(key)?;
    mac.update(command.as_str().as_bytes());
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn keyed_mac(key: &[u8]) -> AuthzResult<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|e| AuthzError::Config(format!("invalid signing key: {}", e)))
}

impl Notification {
    /// Builds a notification carrying a plain SHA-256 digest.
    pub fn new(command: NotificationCommand, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            signature: sign(&command, &payload),
            algorithm: SignatureAlgorithm::Sha256,
            command,
            payload,
        }
    }

    /// Builds a notification signed with HMAC-SHA256.
    pub fn new_signed(
        command: NotificationCommand,
        payload: impl Into<String>,
        key: &[u8],
    ) -> AuthzResult<Self> {
        let payload = payload.into();
        Ok(Self {
            signature: sign_with_key(&command, &payload, key)?,
            algorithm: SignatureAlgorithm::HmacSha256,
            command,
            payload,
        })
    }

    /// Parses a raw channel message.
    pub fn decode(raw: &str) -> AuthzResult<Self> {
        serde_json::from_str(raw).map_err(|e| AuthzError::Decode(format!("malformed notification: {}", e)))
    }

    pub fn encode(&self) -> AuthzResult<String> {
        serde_json::to_string(self).map_err(|e| AuthzError::Decode(e.to_string()))
    }

    /// Structural check of a SHA-256 digest. Proves nothing about the sender.
    pub fn digest_matches(&self) -> bool {
        self.algorithm == SignatureAlgorithm::Sha256
            && self.signature.eq_ignore_ascii_case(&sign(&self.command, &self.payload))
    }

    /// Verifies an HMAC-SHA256 signature in constant time.
    pub fn verify(&self, key: &[u8]) -> AuthzResult<()> {
        if self.algorithm != SignatureAlgorithm::HmacSha256 {
            return Err(AuthzError::InvalidSignature);
        }
        let expected = hex::decode(&self.signature).map_err(|_| AuthzError::InvalidSignature)?;
        let mut mac = keyed_mac(key)?;
        mac.update(self.command.as_str().as_bytes());
        mac.update(self.payload.as_bytes());
        mac.verify_slice(&expected)
            .map_err(|_| AuthzError::InvalidSignature)
    }
}

/// What the listener should do with a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationOutcome {
    Reload(NotificationCommand),
    UnknownCommand(String),
}

/// Decodes one channel message and decides whether it requests a reload.
///
/// With a `signing_key`, messages that fail HMAC verification are rejected
/// with [`AuthzError::InvalidSignature`].
pub fn classify(raw: &str, signing_key: Option<&[u8]>) -> AuthzResult<NotificationOutcome> {
    let notification = Notification::decode(raw)?;
    info!(
        "Received notification: command={}, payload={}",
        notification.command, notification.payload
    );

    if let Some(key) = signing_key {
        notification.verify(key)?;
    }

    if notification.command.triggers_reload() {
        Ok(NotificationOutcome::Reload(notification.command))
    } else {
        warn!("Unknown notification command: {:?}", notification.command.as_str());
        Ok(NotificationOutcome::UnknownCommand(
            notification.command.as_str().to_string(),
        ))
    }
}
