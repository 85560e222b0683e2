//! Upstream source of truth for secrets and policies.
//!
//! The loader only depends on [`UpstreamClient`]; it always asks for the
//! full set (`offset = 0`, `limit = -1`).

pub mod http;
pub mod memory;
pub mod retry;

pub use http::HttpUpstream;
pub use memory::MemoryUpstream;
pub use retry::{with_retry, RetryPolicy};

use async_trait::async_trait;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::cache::CacheSnapshot;
use crate::error::AuthzResult;
use crate::types::{AccessPolicy, Secret};

/// Request every item in one call.
pub const LIST_ALL: i64 = -1;

/// A policy row as stored upstream. `policy_shadow` is the JSON encoding
/// of an [`AccessPolicy`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub username: String,
    pub name: String,
    pub policy_shadow: String,
}

impl PolicyRecord {
    pub fn from_policy(username: impl Into<String>, policy: &AccessPolicy) -> AuthzResult<Self> {
        Ok(Self {
            username: username.into(),
            name: policy.id.clone(),
            policy_shadow: serde_json::to_string(policy)
                .map_err(|e| crate::error::AuthzError::Decode(e.to_string()))?,
        })
    }
}

/// Paginated list envelope returned by the upstream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub total_count: i64,
    pub items: Vec<T>,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn list_secrets(&self, offset: i64, limit: i64) -> AuthzResult<Vec<Secret>>;

    async fn list_policies(&self, offset: i64, limit: i64) -> AuthzResult<Vec<PolicyRecord>>;
}

/// Fetches the complete secret and policy sets and builds a snapshot.
///
/// Each list call gets its own retry budget. Policies whose shadow fails
/// to parse are skipped; the rest still load.
pub async fn fetch_all(client: &dyn UpstreamClient, retry: &RetryPolicy) -> AuthzResult<CacheSnapshot> {
    info!("Loading secrets");
    let secret_items = with_retry(retry, "list secrets", || client.list_secrets(0, LIST_ALL)).await?;
    info!("Secrets found ({} total)", secret_items.len());

    let secrets: HashMap<String, Secret> = secret_items
        .into_iter()
        .map(|secret| (secret.id.clone(), secret))
        .collect();

    info!("Loading policies");
    let records = with_retry(retry, "list policies", || client.list_policies(0, LIST_ALL)).await?;
    info!("Policies found ({} total)", records.len());

    let mut policies: HashMap<String, Vec<AccessPolicy>> = HashMap::new();
    for record in records {
        match serde_json::from_str::<AccessPolicy>(&record.policy_shadow) {
            Ok(policy) => policies.entry(record.username).or_default().push(policy),
            Err(e) => warn!("Failed to load policy {} for {}: {}", record.name, record.username, e),
        }
    }

    Ok(CacheSnapshot::new(secrets, policies))
}
