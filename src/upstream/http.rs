//! HTTP upstream client.
//!
//! Talks JSON to the API server's cache endpoints:
//! - `GET {base}/v1/secrets?offset=&limit=`
//! - `GET {base}/v1/policies?offset=&limit=`
//!
//! Both return `{"total_count": n, "items": [...]}`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::{ListResponse, PolicyRecord, UpstreamClient};
use crate::error::{AuthzError, AuthzResult};
use crate::types::Secret;

/// reqwest-backed [`UpstreamClient`].
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: &str, timeout: Duration) -> AuthzResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthzError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/v1/{}", self.base_url, resource)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        resource: &str,
        offset: i64,
        limit: i64,
    ) -> AuthzResult<Vec<T>> {
        let response = self
            .client
            .get(self.endpoint(resource))
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await
            .map_err(|e| AuthzError::Transport(format!("GET {} failed: {}", resource, e)))?
            .error_for_status()
            .map_err(|e| AuthzError::Transport(format!("GET {} failed: {}", resource, e)))?;

        let body: ListResponse<T> = response.json().await.map_err(|e| {
            if e.is_decode() {
                AuthzError::Decode(format!("Invalid {} response: {}", resource, e))
            } else {
                AuthzError::Transport(format!("Reading {} response failed: {}", resource, e))
            }
        })?;

        Ok(body.items)
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn list_secrets(&self, offset: i64, limit: i64) -> AuthzResult<Vec<Secret>> {
        self.list("secrets", offset, limit).await
    }

    async fn list_policies(&self, offset: i64, limit: i64) -> AuthzResult<Vec<PolicyRecord>> {
        self.list("policies", offset, limit).await
    }
}
