//! Change-notification transport.
//!
//! The loader reads raw messages from a [`Subscriber`]; producers write
//! through a [`Publisher`]. Two transports are provided: an in-process
//! [`LocalBus`] and [`NatsBus`].

pub mod local;
pub mod nats;

pub use local::{LocalBus, LocalSubscriber};
pub use nats::{NatsBus, NatsSubscriber};

use async_trait::async_trait;

use crate::error::AuthzResult;
use crate::notification::Notification;

/// A live subscription on the notification channel.
#[async_trait]
pub trait Subscriber: Send {
    /// Waits for the next raw message.
    ///
    /// `None` means the subscription has ended. `Some(Err(_))` is a
    /// receive failure; the caller may keep reading.
    async fn next_message(&mut self) -> Option<AuthzResult<String>>;

    /// Releases the underlying subscription.
    async fn close(&mut self) -> AuthzResult<()>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_raw(&self, message: String) -> AuthzResult<()>;

    async fn publish(&self, notification: &Notification) -> AuthzResult<()> {
        let encoded = notification.encode()?;
        self.publish_raw(encoded).await
    }
}
