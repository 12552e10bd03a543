//! Delivery transports

pub mod graph;
pub mod mock;
pub mod smtp;

pub use graph::GraphTransport;
pub use mock::{RecordedMessage, RecordingSession};
pub use smtp::{RelaySession, SmtpTransport};

use crate::error::MailerResult;
use crate::models::Message;
use async_trait::async_trait;

/// A way of delivering a [`Message`].
///
/// `send` makes a single attempt. `Ok(true)` means the remote side accepted
/// the message, `Ok(false)` that it answered without accepting it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Render and deliver a message
    async fn send(&self, message: &Message) -> MailerResult<bool>;

    /// Check that the transport can reach and authenticate against its endpoint
    async fn health_check(&self) -> MailerResult<()>;

    /// Get transport name
    fn name(&self) -> &'static str;
}
