//! NATS transport.

use async_trait::async_trait;
use futures::StreamExt;
use log::info;

use super::{Publisher, Subscriber};
use crate::error::{AuthzError, AuthzResult};

/// Connection to a NATS server, bound to one notification subject.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    subject: String,
}

impl NatsBus {
    pub async fn connect(url: &str, subject: &str) -> AuthzResult<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| AuthzError::PubSub(format!("Failed to connect to {}: {}", url, e)))?;
        info!("Connected to NATS at {}", url);

        Ok(Self {
            client,
            subject: subject.to_string(),
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn subscribe(&self) -> AuthzResult<NatsSubscriber> {
        let inner = self
            .client
            .subscribe(self.subject.clone())
            .await
            .map_err(|e| AuthzError::PubSub(format!("Failed to subscribe to {}: {}", self.subject, e)))?;
        info!("Subscribed to {}", self.subject);

        Ok(NatsSubscriber { inner: Some(inner) })
    }
}

#[async_trait]
impl Publisher for NatsBus {
    async fn publish_raw(&self, message: String) -> AuthzResult<()> {
        self.client
            .publish(self.subject.clone(), message.into())
            .await
            .map_err(|e| AuthzError::PubSub(format!("Failed to publish to {}: {}", self.subject, e)))
    }
}

/// Subscription returned by [`NatsBus::subscribe`].
pub struct NatsSubscriber {
    inner: Option<async_nats::Subscriber>,
}

#[async_trait]
impl Subscriber for NatsSubscriber {
    async fn next_message(&mut self) -> Option<AuthzResult<String>> {
        let message = self.inner.as_mut()?.next().await?;
        Some(
            String::from_utf8(message.payload.to_vec())
                .map_err(|e| AuthzError::PubSub(format!("Non UTF-8 notification: {}", e))),
        )
    }

    async fn close(&mut self) -> AuthzResult<()> {
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| AuthzError::PubSub("subscription already closed".into()))?;
        inner
            .unsubscribe()
            .await
            .map_err(|e| AuthzError::PubSub(format!("Failed to unsubscribe: {}", e)))
    }
}
