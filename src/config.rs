//! Service configuration: defaults with `AUTHZ_*` environment overrides.

use crate::error::{AuthzError, AuthzResult};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the authorization cache service.
#[derive(Clone, Debug)]
pub struct AuthzConfig {
    /// Base URL of the upstream policy/secret source
    pub upstream_url: String,
    /// Per-request timeout for upstream calls
    pub upstream_timeout: Duration,
    /// Attempts per upstream list call
    pub fetch_attempts: u32,
    /// Base delay between upstream attempts
    pub retry_delay: Duration,
    /// Pub/sub server URL
    pub pubsub_url: String,
    /// Channel carrying change notifications
    pub pubsub_channel: String,
    /// Debounce window between coalesced reloads
    pub reload_interval: Duration,
    /// Cap on completion callbacks held between ticks
    pub max_pending_callbacks: usize,
    /// Shared HMAC key; when set, unsigned or forged notifications are dropped
    pub signing_key: Option<String>,
    /// Where the last good snapshot is persisted
    pub snapshot_path: Option<PathBuf>,
    /// Directory for audit log files
    pub audit_dir: Option<PathBuf>,
    /// Fraction of decisions recorded (0.0 - 1.0)
    pub audit_sample_rate: f64,
    /// Audit records buffered before new ones are dropped
    pub audit_buffer: usize,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            upstream_url: "http://127.0.0.1:8081".to_string(),
            upstream_timeout: Duration::from_secs(5),
            fetch_attempts: 3,
            retry_delay: Duration::from_millis(100),
            pubsub_url: "nats://127.0.0.1:4222".to_string(),
            pubsub_channel: "authz.notifications".to_string(),
            reload_interval: Duration::from_secs(1),
            max_pending_callbacks: 1024,
            signing_key: None,
            snapshot_path: None,
            audit_dir: None,
            audit_sample_rate: 1.0,
            audit_buffer: 1024,
        }
    }
}

impl AuthzConfig {
    /// Defaults overlaid with `AUTHZ_*` environment variables.
    pub fn from_env() -> AuthzResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> AuthzResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("AUTHZ_UPSTREAM_URL") {
            config.upstream_url = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "AUTHZ_UPSTREAM_TIMEOUT_MS")? {
            config.upstream_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "AUTHZ_FETCH_ATTEMPTS")? {
            config.fetch_attempts = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "AUTHZ_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("AUTHZ_PUBSUB_URL") {
            config.pubsub_url = v;
        }
        if let Some(v) = lookup("AUTHZ_PUBSUB_CHANNEL") {
            config.pubsub_channel = v;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "AUTHZ_RELOAD_INTERVAL_MS")? {
            config.reload_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "AUTHZ_MAX_PENDING_CALLBACKS")? {
            config.max_pending_callbacks = n;
        }
        if let Some(v) = lookup("AUTHZ_SIGNING_KEY").filter(|v| !v.is_empty()) {
            config.signing_key = Some(v);
        }
        if let Some(v) = lookup("AUTHZ_SNAPSHOT_PATH").filter(|v| !v.is_empty()) {
            config.snapshot_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("AUTHZ_AUDIT_DIR").filter(|v| !v.is_empty()) {
            config.audit_dir = Some(PathBuf::from(v));
        }
        if let Some(rate) = parse_var(&lookup, "AUTHZ_AUDIT_SAMPLE_RATE")? {
            config.audit_sample_rate = rate;
        }
        if let Some(n) = parse_var(&lookup, "AUTHZ_AUDIT_BUFFER")? {
            config.audit_buffer = n;
        }

        Ok(config)
    }

    /// Rejects values the loader and audit recorder cannot run with.
    pub fn validate(&self) -> AuthzResult<()> {
        if self.reload_interval.is_zero() {
            return Err(AuthzError::Config(
                "reload interval must be greater than zero".into(),
            ));
        }
        if self.fetch_attempts == 0 {
            return Err(AuthzError::Config(
                "fetch attempts must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.audit_sample_rate) {
            return Err(AuthzError::Config(format!(
                "audit sample rate {} is outside [0.0, 1.0]",
                self.audit_sample_rate
            )));
        }
        if self.audit_buffer == 0 {
            return Err(AuthzError::Config(
                "audit buffer must hold at least one record".into(),
            ));
        }
        Ok(())
    }

    pub fn signing_key_bytes(&self) -> Option<Vec<u8>> {
        self.signing_key.as_ref().map(|k| k.as_bytes().to_vec())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> AuthzResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AuthzError::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}
