//! Error types for the mailer.

use thiserror::Error;

/// Result type for mailer operations.
pub type MailerResult<T> = Result<T, MailerError>;

/// Errors that can occur while configuring a mailer or delivering a message.
#[derive(Debug, Error)]
pub enum MailerError {
    /// Configuration is incomplete or inconsistent. Raised at construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable access token could be obtained, or the endpoint rejected it.
    #[error("Authentication unavailable: {0}")]
    Authentication(String),

    /// The relay or the REST endpoint refused the message.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Timeout or connectivity failure.
    #[error("Network error: {0}")]
    Network(String),
}

impl MailerError {
    /// Whether this error is a timeout or connectivity failure.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether the message was definitely not accepted.
    ///
    /// Network failures leave the outcome unknown: the request may have
    /// reached the server before the connection dropped.
    pub fn definitely_not_sent(&self) -> bool {
        !self.is_network()
    }
}

impl From<reqwest::Error> for MailerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            MailerError::Network(err.to_string())
        } else {
            MailerError::Delivery(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MailerError {
    fn from(err: serde_json::Error) -> Self {
        MailerError::Delivery(format!("JSON serialization error: {}", err))
    }
}

impl From<lettre::error::Error> for MailerError {
    fn from(err: lettre::error::Error) -> Self {
        MailerError::Delivery(format!("Failed to build message: {}", err))
    }
}

impl From<lettre::address::AddressError> for MailerError {
    fn from(err: lettre::address::AddressError) -> Self {
        MailerError::Delivery(format!("Invalid address: {}", err))
    }
}

impl From<lettre::transport::smtp::Error> for MailerError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        if err.is_timeout() {
            MailerError::Network(err.to_string())
        } else {
            MailerError::Delivery(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_leave_outcome_unknown() {
        let err = MailerError::Network("connection reset".to_string());
        assert!(err.is_network());
        assert!(!err.definitely_not_sent());

        let err = MailerError::Delivery("550 mailbox unavailable".to_string());
        assert!(!err.is_network());
        assert!(err.definitely_not_sent());
    }

    #[test]
    fn test_display_carries_diagnostic() {
        let err = MailerError::Authentication("token endpoint returned 400".to_string());
        assert_eq!(
            err.to_string(),
            "Authentication unavailable: token endpoint returned 400"
        );
    }
}
