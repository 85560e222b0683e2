//! Core data types shared by the cache, loader and authorizer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Seconds since UNIX epoch.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

// ================================================================================================
// SECRETS
// ================================================================================================

/// An API secret issued to a user. Immutable once loaded, identified by `id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub username: String,
    #[serde(alias = "secret_id")]
    pub id: String,
    #[serde(alias = "secret_key")]
    pub key: String,
    /// Expiry as unix seconds, 0 means never
    #[serde(default, alias = "expires")]
    pub expires_at: i64,
}

impl Secret {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at != 0 && self.expires_at <= now_secs
    }
}

// ================================================================================================
// POLICIES
// ================================================================================================

/// Outcome a policy produces when it matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "allow",
            Effect::Deny => "deny",
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A condition evaluated against one key of the request context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options")]
pub enum Condition {
    /// Context value must be a string equal to `equals`
    #[serde(rename = "StringEqualCondition")]
    StringEqual { equals: String },
    /// Context value must be a string matching the regex `matches`
    #[serde(rename = "StringMatchCondition")]
    StringMatch { matches: String },
    /// Context value must equal the request subject
    #[serde(rename = "EqualsSubjectCondition")]
    EqualsSubject,
    /// Context value must be a boolean equal to `value`
    #[serde(rename = "BooleanCondition")]
    Boolean { value: bool },
}

/// An access-control policy scoped to a subject.
///
/// Subject, resource and action entries are patterns: literal text with
/// optional `<regex>` segments, e.g. `resources:articles:<.*>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    pub effect: Effect,
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
}

impl AccessPolicy {
    /// Builds a condition-free policy.
    pub fn new(
        id: impl Into<String>,
        effect: Effect,
        subjects: &[&str],
        resources: &[&str],
        actions: &[&str],
    ) -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            id: id.into(),
            description: String::new(),
            subjects: owned(subjects),
            resources: owned(resources),
            actions: owned(actions),
            effect,
            conditions: BTreeMap::new(),
        }
    }

    pub fn with_condition(mut self, key: impl Into<String>, condition: Condition) -> Self {
        self.conditions.insert(key.into(), condition);
        self
    }

    pub fn allows(&self) -> bool {
        self.effect == Effect::Allow
    }
}

// ================================================================================================
// REQUEST / DECISION
// ================================================================================================

/// Context key carrying the authenticated username.
pub const USERNAME_CONTEXT_KEY: &str = "username";

/// An access request to evaluate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl AccessRequest {
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            resource: resource.into(),
            action: action.into(),
            context: HashMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Username used for the policy lookup: the context entry when set,
    /// otherwise the subject.
    pub fn username(&self) -> &str {
        self.context
            .get(USERNAME_CONTEXT_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or(&self.subject)
    }
}

/// Authorization outcome returned to callers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub denied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            ..Default::default()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            denied: true,
            reason: Some(reason.into()),
            ..Default::default()
        }
    }
}
