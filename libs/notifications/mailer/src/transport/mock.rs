//! In-memory relay session for testing

use super::smtp::RelaySession;
use crate::error::{MailerError, MailerResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A message as the relay would have received it.
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    /// Envelope sender
    pub envelope_from: Option<String>,
    /// Envelope recipients (to, cc and bcc)
    pub envelope_to: Vec<String>,
    /// Full RFC 5322 text
    pub raw: String,
}

impl RecordedMessage {
    /// Whether the rendered message is an HTML message.
    pub fn is_html(&self) -> bool {
        self.raw.contains("Content-Type: text/html")
    }

    /// Whether any header line carries the given value.
    pub fn has_header(&self, name: &str, value: &str) -> bool {
        let expected = format!("{}: {}", name, value);
        self.raw.lines().any(|line| line == expected)
    }
}

/// Relay session that records submitted messages instead of sending them
#[derive(Clone)]
pub struct RecordingSession {
    sent: Arc<Mutex<Vec<RecordedMessage>>>,
    outcome: Outcome,
}

#[derive(Clone)]
enum Outcome {
    Accept,
    Reject,
    Fail(String),
}

impl RecordingSession {
    /// Create a session that accepts everything
    pub fn new() -> Self {
        Self::with_outcome(Outcome::Accept)
    }

    /// Create a session whose relay answers without accepting
    pub fn rejecting() -> Self {
        Self::with_outcome(Outcome::Reject)
    }

    /// Create a session that always fails with the given diagnostic
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_outcome(Outcome::Fail(message.into()))
    }

    fn with_outcome(outcome: Outcome) -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            outcome,
        }
    }

    /// Get all recorded messages
    pub async fn sent_messages(&self) -> Vec<RecordedMessage> {
        self.sent.lock().await.clone()
    }

    /// Get the count of recorded messages
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Check if a message was addressed to a specific recipient
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent
            .lock()
            .await
            .iter()
            .any(|m| m.envelope_to.iter().any(|to| to == email))
    }

    /// Clear all recorded messages
    pub async fn clear(&self) {
        self.sent.lock().await.clear();
    }
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelaySession for RecordingSession {
    async fn submit(&self, message: lettre::Message) -> MailerResult<bool> {
        if let Outcome::Fail(diagnostic) = &self.outcome {
            return Err(MailerError::Delivery(diagnostic.clone()));
        }

        let envelope = message.envelope();
        let recorded = RecordedMessage {
            envelope_from: envelope.from().map(|a| a.to_string()),
            envelope_to: envelope.to().iter().map(|a| a.to_string()).collect(),
            raw: String::from_utf8_lossy(&message.formatted()).into_owned(),
        };
        self.sent.lock().await.push(recorded);

        Ok(matches!(self.outcome, Outcome::Accept))
    }

    async fn test_connection(&self) -> MailerResult<bool> {
        Ok(!matches!(self.outcome, Outcome::Fail(_)))
    }
}
