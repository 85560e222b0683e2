//! In-process notification bus on a tokio broadcast channel.

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::broadcast;

use super::{Publisher, Subscriber};
use crate::error::{AuthzError, AuthzResult};

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast bus; every subscriber sees every message.
#[derive(Clone, Debug)]
pub struct LocalBus {
    sender: broadcast::Sender<String>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> LocalSubscriber {
        LocalSubscriber {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl Publisher for LocalBus {
    async fn publish_raw(&self, message: String) -> AuthzResult<()> {
        if self.sender.send(message).is_err() {
            debug!("Notification published with no subscribers");
        }
        Ok(())
    }
}

/// Receiving end of a [`LocalBus`].
#[derive(Debug)]
pub struct LocalSubscriber {
    receiver: Option<broadcast::Receiver<String>>,
}

#[async_trait]
impl Subscriber for LocalSubscriber {
    async fn next_message(&mut self) -> Option<AuthzResult<String>> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(message) => return Some(Ok(message)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Notification subscriber lagged, {} messages skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn close(&mut self) -> AuthzResult<()> {
        match self.receiver.take() {
            Some(_) => Ok(()),
            None => Err(AuthzError::PubSub("subscription already closed".into())),
        }
    }
}
