//! Mailer façade.
//!
//! The mailer owns one transport, chosen from configuration when it is built,
//! and never falls back to the other one: a broken Graph setup must not be
//! hidden by a message that happened to go out over SMTP.

use crate::config::MailerConfig;
use crate::error::MailerResult;
use crate::models::{Message, DEFAULT_CHARSET};
use crate::transport::{GraphTransport, SmtpTransport, Transport};
use std::sync::Arc;
use tracing::{debug, info};

/// Composes messages and sends them through the configured transport.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn Transport>,
    charset: String,
}

impl Mailer {
    /// Create a mailer from configuration.
    ///
    /// Validation happens here, so missing Graph credentials (or an SMTP
    /// setup without a host) fail immediately rather than on first send.
    pub fn new(config: MailerConfig) -> MailerResult<Self> {
        config.validate()?;

        let transport: Arc<dyn Transport> = match config {
            MailerConfig::Smtp(settings) => Arc::new(SmtpTransport::new(&settings)?),
            MailerConfig::Graph(settings) => Arc::new(GraphTransport::new(settings)?),
        };

        info!(transport = transport.name(), "Mailer configured");
        Ok(Self::with_transport(transport))
    }

    /// Create a mailer from environment variables.
    ///
    /// See [`MailerConfig::from_env`]; `MAIL_CHARSET` overrides the default charset.
    pub fn from_env() -> MailerResult<Self> {
        let mailer = Self::new(MailerConfig::from_env()?)?;
        Ok(match std::env::var("MAIL_CHARSET") {
            Ok(charset) if !charset.trim().is_empty() => mailer.with_charset(charset.trim()),
            _ => mailer,
        })
    }

    /// Create a mailer around an existing transport.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            charset: DEFAULT_CHARSET.to_string(),
        }
    }

    /// Charset handed to every composed message.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Start a new, empty message.
    pub fn compose(&self) -> Message {
        Message::with_charset(self.charset.clone())
    }

    /// Deliver a message with a single attempt.
    ///
    /// Returns the transport's own verdict. Errors are passed through
    /// unchanged; retrying is up to the caller.
    pub async fn send(&self, message: Message) -> MailerResult<bool> {
        debug!(
            transport = self.transport.name(),
            subject = %message.subject(),
            "Dispatching message"
        );
        self.transport.send(&message).await
    }

    /// Check that the transport can reach its endpoint.
    pub async fn health_check(&self) -> MailerResult<()> {
        self.transport.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{with_env, GraphSettings, SmtpSettings};
    use crate::error::MailerError;
    use crate::transport::MockTransport;

    #[test]
    fn test_compose_uses_mailer_charset() {
        let mailer = Mailer::with_transport(Arc::new(MockTransport::new())).with_charset("iso-8859-1");

        let message = mailer.compose();
        assert_eq!(message.charset(), "iso-8859-1");
        assert!(message.to().is_empty());
    }

    #[tokio::test]
    async fn test_send_delegates_once() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|message| message.subject() == "Hello")
            .times(1)
            .returning(|_| Ok(true));
        transport.expect_name().return_const("mock");

        let mailer = Mailer::with_transport(Arc::new(transport));
        let mut message = mailer.compose();
        message.set_from("a@x.com").set_to("b@y.com").set_subject("Hello");

        assert!(mailer.send(message).await.unwrap());
    }

    #[tokio::test]
    async fn test_send_propagates_error_without_fallback() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| Err(MailerError::Authentication("no token".to_string())));
        transport.expect_name().return_const("mock");

        let mailer = Mailer::with_transport(Arc::new(transport));
        let err = mailer.send(mailer.compose()).await.unwrap_err();

        assert!(matches!(err, MailerError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_send_returns_false_verdict() {
        let mut transport = MockTransport::new();
        transport.expect_send().returning(|_| Ok(false));
        transport.expect_name().return_const("mock");

        let mailer = Mailer::with_transport(Arc::new(transport));
        assert!(!mailer.send(mailer.compose()).await.unwrap());
    }

    #[test]
    fn test_graph_without_secret_fails_at_construction() {
        let config = MailerConfig::Graph(GraphSettings::new("client", "", "tenant"));

        let result = Mailer::new(config);
        assert!(matches!(result, Err(MailerError::Config(_))));
    }

    #[test]
    fn test_transport_selected_from_config() {
        let graph = Mailer::new(MailerConfig::Graph(GraphSettings::new("id", "secret", "tenant"))).unwrap();
        assert_eq!(graph.transport_name(), "graph");

        let smtp = Mailer::new(MailerConfig::Smtp(SmtpSettings::new("localhost", 1025))).unwrap();
        assert_eq!(smtp.transport_name(), "smtp");
    }

    #[test]
    fn test_from_env_applies_charset() {
        with_env(
            &[
                ("MAIL_TRANSPORT", "smtp"),
                ("SMTP_HOST", "localhost"),
                ("SMTP_PORT", "1025"),
                ("MAIL_CHARSET", "gb2312"),
            ],
            || {
                let mailer = Mailer::from_env().unwrap();
                assert_eq!(mailer.charset(), "gb2312");
                assert_eq!(mailer.compose().charset(), "gb2312");
            },
        );
    }
}
