//! Audit trail for authorization decisions.
//!
//! The authorizer hands one [`AuditRecord`] per decision to an
//! [`AuditRecorder`], which never blocks the caller. A background worker
//! forwards records to every configured [`AuditSink`].

pub mod recorder;
pub mod writer;

pub use recorder::{AuditConfig, AuditRecorder, AuditStats, AuditWorker};
pub use writer::{AuditLogConfig, AuditLogStats, AuditLogWriter, RotationPolicy};

use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AuthzResult;
use crate::types::{now_secs, AccessPolicy, AccessRequest, Effect};

/// One authorization decision, as recorded for analytics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    /// Seconds since epoch
    pub timestamp: i64,
    pub username: String,
    pub subject: String,
    pub effect: Effect,
    pub conclusion: String,
    /// JSON encoding of the request
    pub request: String,
    /// JSON encoding of the candidate policies
    pub policies: String,
    /// JSON encoding of the deciding policies
    pub deciders: String,
}

impl AuditRecord {
    pub fn new(
        request: &AccessRequest,
        effect: Effect,
        conclusion: String,
        policies: &[AccessPolicy],
        deciders: &[&AccessPolicy],
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now_secs(),
            username: request.username().to_string(),
            subject: request.subject.clone(),
            effect,
            conclusion,
            request: serde_json::to_string(request).unwrap_or_default(),
            policies: serde_json::to_string(policies).unwrap_or_default(),
            deciders: serde_json::to_string(deciders).unwrap_or_default(),
        }
    }

    pub fn is_granted(&self) -> bool {
        self.effect == Effect::Allow
    }
}

/// Destination for audit records. Called from the audit worker thread.
pub trait AuditSink: Send + Sync {
    fn write(&self, record: &AuditRecord) -> AuthzResult<()>;

    fn flush(&self) -> AuthzResult<()> {
        Ok(())
    }
}

/// Writes each record through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl AuditSink for LogSink {
    fn write(&self, record: &AuditRecord) -> AuthzResult<()> {
        let verdict = if record.is_granted() { "granted" } else { "rejected" };
        info!(
            "Log {} access request: username={}, conclusion={}, request={}",
            verdict, record.username, record.conclusion, record.request
        );
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditSink for MemorySink {
    fn write(&self, record: &AuditRecord) -> AuthzResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
