//! Transport configuration.
//!
//! A mailer runs in exactly one of two modes: SMTP relay or Microsoft Graph.
//! The configuration is validated once, when the [`Mailer`](crate::Mailer) is
//! built, so a missing credential is reported before anything is sent.

use crate::error::{MailerError, MailerResult};
use reqwest::Url;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Which transport to use, and its settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum MailerConfig {
    Smtp(SmtpSettings),
    Graph(GraphSettings),
}

impl MailerConfig {
    /// Load configuration from environment variables.
    ///
    /// `MAIL_TRANSPORT` (`smtp` or `graph`) picks the mode explicitly.
    /// Without it, any `GRAPH_*` credential variable selects Graph and SMTP
    /// is used otherwise.
    pub fn from_env() -> MailerResult<Self> {
        match std::env::var("MAIL_TRANSPORT") {
            Ok(mode) => match mode.trim().to_ascii_lowercase().as_str() {
                "graph" => Ok(Self::Graph(GraphSettings::from_env()?)),
                "smtp" => Ok(Self::Smtp(SmtpSettings::from_env()?)),
                other => Err(MailerError::Config(format!(
                    "Invalid MAIL_TRANSPORT '{}': expected 'smtp' or 'graph'",
                    other
                ))),
            },
            Err(_) => {
                let graph_selected = ["GRAPH_CLIENT_ID", "GRAPH_CLIENT_SECRET", "GRAPH_TENANT_ID"]
                    .iter()
                    .any(|key| std::env::var(key).is_ok());
                if graph_selected {
                    Ok(Self::Graph(GraphSettings::from_env()?))
                } else {
                    Ok(Self::Smtp(SmtpSettings::from_env()?))
                }
            }
        }
    }

    /// Check that the selected mode has everything it needs.
    pub fn validate(&self) -> MailerResult<()> {
        match self {
            Self::Smtp(settings) => settings.validate(),
            Self::Graph(settings) => settings.validate(),
        }
    }

    pub fn is_graph(&self) -> bool {
        matches!(self, Self::Graph(_))
    }
}

/// Connection security for the SMTP relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Plain connection upgraded with STARTTLS.
    Tls,
    /// Implicit TLS from the first byte (SMTPS).
    Ssl,
    /// No encryption (local relays such as Mailpit).
    #[default]
    None,
}

impl FromStr for Encryption {
    type Err = MailerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" | "starttls" => Ok(Self::Tls),
            "ssl" | "smtps" => Ok(Self::Ssl),
            "" | "none" => Ok(Self::None),
            other => Err(MailerError::Config(format!(
                "Invalid SMTP encryption '{}': expected tls, ssl or none",
                other
            ))),
        }
    }
}

/// SASL mechanism used to authenticate against the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMechanism {
    Plain,
    Login,
    Xoauth2,
}

impl FromStr for AuthMechanism {
    type Err = MailerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "LOGIN" => Ok(Self::Login),
            "XOAUTH2" => Ok(Self::Xoauth2),
            other => Err(MailerError::Config(format!(
                "Invalid SMTP auth type '{}': expected PLAIN, LOGIN or XOAUTH2",
                other
            ))),
        }
    }
}

/// SMTP relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Restrict authentication to one mechanism. `None` lets the relay pick.
    #[serde(default)]
    pub auth_mechanism: Option<AuthMechanism>,
    /// Credentials are only sent when this is set.
    #[serde(default)]
    pub auth_required: bool,
    /// Falls back to the SMTP client's own default when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_smtp_port() -> u16 {
    587
}

impl SmtpSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            encryption: Encryption::None,
            username: String::new(),
            password: String::new(),
            auth_mechanism: None,
            auth_required: false,
            timeout_secs: None,
        }
    }

    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }

    /// Set credentials and require authentication.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self.auth_required = true;
        self
    }

    pub fn with_auth_mechanism(mut self, mechanism: AuthMechanism) -> Self {
        self.auth_mechanism = Some(mechanism);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Create settings from environment variables
    ///
    /// Expects:
    /// - `SMTP_HOST`
    /// - `SMTP_PORT` (default 587)
    /// - `SMTP_ENCRYPTION` (`tls`, `ssl` or `none`, default `none`)
    /// - `SMTP_USERNAME` / `SMTP_PASSWORD` (optional)
    /// - `SMTP_AUTH_TYPE` (optional: `PLAIN`, `LOGIN`, `XOAUTH2`)
    /// - `SMTP_AUTH_REQUIRED` (default: true when a username is set)
    /// - `SMTP_TIMEOUT_SECS` (optional)
    pub fn from_env() -> MailerResult<Self> {
        let host = env_required("SMTP_HOST")?;
        let port = env_parse("SMTP_PORT")?.unwrap_or_else(default_smtp_port);
        let encryption = env_parse("SMTP_ENCRYPTION")?.unwrap_or_default();
        let username = std::env::var("SMTP_USERNAME").unwrap_or_default();
        let password = std::env::var("SMTP_PASSWORD").unwrap_or_default();
        let auth_mechanism = env_parse("SMTP_AUTH_TYPE")?;
        let auth_required = match std::env::var("SMTP_AUTH_REQUIRED") {
            Ok(v) => v == "true" || v == "1",
            Err(_) => !username.is_empty(),
        };
        let timeout_secs = env_parse("SMTP_TIMEOUT_SECS")?;

        Ok(Self {
            host,
            port,
            encryption,
            username,
            password,
            auth_mechanism,
            auth_required,
            timeout_secs,
        })
    }

    pub fn validate(&self) -> MailerResult<()> {
        if self.host.trim().is_empty() {
            return Err(MailerError::Config("SMTP transport requires a host".to_string()));
        }
        if self.port == 0 {
            return Err(MailerError::Config("SMTP port must be non-zero".to_string()));
        }
        if self.auth_required && self.username.trim().is_empty() {
            return Err(MailerError::Config(
                "SMTP authentication is required but no username is configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Microsoft Graph settings (OAuth2 client credentials).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphSettings {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
    /// Mailbox to send as. Defaults to the message's first `from` address.
    #[serde(default)]
    pub sender_mailbox: Option<String>,
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub save_to_sent_items: bool,
}

fn default_authority_url() -> String {
    DEFAULT_AUTHORITY_URL.to_string()
}

fn default_graph_url() -> String {
    DEFAULT_GRAPH_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl GraphSettings {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tenant_id: tenant_id.into(),
            sender_mailbox: None,
            authority_url: default_authority_url(),
            graph_url: default_graph_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            save_to_sent_items: true,
        }
    }

    pub fn with_sender_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.sender_mailbox = Some(mailbox.into());
        self
    }

    /// Point the token request at another identity host (national clouds, tests).
    pub fn with_authority_url(mut self, url: impl Into<String>) -> Self {
        self.authority_url = url.into();
        self
    }

    pub fn with_graph_url(mut self, url: impl Into<String>) -> Self {
        self.graph_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `{authority}/{tenant}/oauth2/v2.0/token`
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// `{graph}/users/{sender}/sendMail`, with the sender as one encoded path segment.
    pub fn send_mail_url(&self, sender: &str) -> MailerResult<Url> {
        let mut url = Url::parse(&self.graph_url)
            .map_err(|e| MailerError::Config(format!("Invalid graph_url '{}': {}", self.graph_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                MailerError::Config(format!("graph_url '{}' cannot be a base URL", self.graph_url))
            })?
            .pop_if_empty()
            .extend(["users", sender, "sendMail"]);
        Ok(url)
    }

    /// Create settings from environment variables
    ///
    /// Expects:
    /// - `GRAPH_CLIENT_ID`, `GRAPH_CLIENT_SECRET`, `GRAPH_TENANT_ID`
    /// - `GRAPH_SENDER_MAILBOX` (optional)
    /// - `GRAPH_AUTHORITY_URL`, `GRAPH_API_URL` (optional overrides)
    /// - `GRAPH_TIMEOUT_SECS` (default 30)
    ///
    /// Missing credentials are left empty here and rejected by `validate`.
    pub fn from_env() -> MailerResult<Self> {
        let mut settings = Self::new(
            std::env::var("GRAPH_CLIENT_ID").unwrap_or_default(),
            std::env::var("GRAPH_CLIENT_SECRET").unwrap_or_default(),
            std::env::var("GRAPH_TENANT_ID").unwrap_or_default(),
        );
        settings.sender_mailbox = std::env::var("GRAPH_SENDER_MAILBOX")
            .ok()
            .filter(|m| !m.trim().is_empty());
        if let Ok(url) = std::env::var("GRAPH_AUTHORITY_URL") {
            settings.authority_url = url;
        }
        if let Ok(url) = std::env::var("GRAPH_API_URL") {
            settings.graph_url = url;
        }
        if let Some(secs) = env_parse("GRAPH_TIMEOUT_SECS")? {
            settings.timeout_secs = secs;
        }
        Ok(settings)
    }

    pub fn validate(&self) -> MailerResult<()> {
        let missing: Vec<&str> = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("tenant_id", &self.tenant_id),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(key, _)| key)
        .collect();

        if !missing.is_empty() {
            return Err(MailerError::Config(format!(
                "Graph transport requires client_id, client_secret and tenant_id; missing: {}",
                missing.join(", ")
            )));
        }
        self.send_mail_url("sender@example.com")?;
        Ok(())
    }
}

fn env_required(key: &str) -> MailerResult<String> {
    std::env::var(key).map_err(|_| MailerError::Config(format!("{} not set", key)))
}

fn env_parse<T>(key: &str) -> MailerResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| MailerError::Config(format!("Invalid {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

/// Runs a closure with exactly the given mailer variables set; every other
/// variable the mailer reads is removed for the duration.
#[cfg(test)]
pub(crate) fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    const ALL_VARS: [&str; 17] = [
        "MAIL_TRANSPORT",
        "MAIL_CHARSET",
        "SMTP_HOST",
        "SMTP_PORT",
        "SMTP_ENCRYPTION",
        "SMTP_USERNAME",
        "SMTP_PASSWORD",
        "SMTP_AUTH_TYPE",
        "SMTP_AUTH_REQUIRED",
        "SMTP_TIMEOUT_SECS",
        "GRAPH_CLIENT_ID",
        "GRAPH_CLIENT_SECRET",
        "GRAPH_TENANT_ID",
        "GRAPH_SENDER_MAILBOX",
        "GRAPH_AUTHORITY_URL",
        "GRAPH_API_URL",
        "GRAPH_TIMEOUT_SECS",
    ];

    let env: Vec<(&str, Option<&str>)> = ALL_VARS
        .iter()
        .map(|key| {
            let value = vars.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
            (*key, value)
        })
        .collect();
    temp_env::with_vars(env, f);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_from_env_with_defaults() {
        with_env(&[("SMTP_HOST", "mail.example.com")], || {
            let config = MailerConfig::from_env().unwrap();
            let MailerConfig::Smtp(settings) = config else {
                panic!("expected SMTP config");
            };
            assert_eq!(settings.host, "mail.example.com");
            assert_eq!(settings.port, 587);
            assert_eq!(settings.encryption, Encryption::None);
            assert!(!settings.auth_required);
            assert_eq!(settings.timeout(), None);
        });
    }

    #[test]
    fn test_smtp_from_env_full() {
        with_env(
            &[
                ("SMTP_HOST", "smtp.office365.com"),
                ("SMTP_PORT", "465"),
                ("SMTP_ENCRYPTION", "SSL"),
                ("SMTP_USERNAME", "user@example.com"),
                ("SMTP_PASSWORD", "secret"),
                ("SMTP_AUTH_TYPE", "login"),
                ("SMTP_TIMEOUT_SECS", "10"),
            ],
            || {
                let MailerConfig::Smtp(settings) = MailerConfig::from_env().unwrap() else {
                    panic!("expected SMTP config");
                };
                assert_eq!(settings.port, 465);
                assert_eq!(settings.encryption, Encryption::Ssl);
                assert_eq!(settings.auth_mechanism, Some(AuthMechanism::Login));
                assert!(settings.auth_required);
                assert_eq!(settings.timeout(), Some(Duration::from_secs(10)));
            },
        );
    }

    #[test]
    fn test_invalid_port_is_config_error() {
        with_env(&[("SMTP_HOST", "h"), ("SMTP_PORT", "not-a-port")], || {
            let err = MailerConfig::from_env().unwrap_err();
            assert!(matches!(err, MailerError::Config(_)));
            assert!(err.to_string().contains("SMTP_PORT"));
        });
    }

    #[test]
    fn test_graph_selected_by_credentials() {
        with_env(
            &[
                ("GRAPH_CLIENT_ID", "id"),
                ("GRAPH_CLIENT_SECRET", "secret"),
                ("GRAPH_TENANT_ID", "tenant"),
                ("GRAPH_SENDER_MAILBOX", "noreply@contoso.com"),
            ],
            || {
                let config = MailerConfig::from_env().unwrap();
                assert!(config.is_graph());
                assert!(config.validate().is_ok());
            },
        );
    }

    #[test]
    fn test_explicit_graph_mode_with_missing_secret_fails_validation() {
        with_env(
            &[
                ("MAIL_TRANSPORT", "graph"),
                ("GRAPH_CLIENT_ID", "id"),
                ("GRAPH_TENANT_ID", "tenant"),
            ],
            || {
                let config = MailerConfig::from_env().unwrap();
                let err = config.validate().unwrap_err();
                assert!(matches!(err, MailerError::Config(_)));
                assert!(err.to_string().contains("client_secret"));
            },
        );
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        with_env(&[("MAIL_TRANSPORT", "carrier-pigeon")], || {
            assert!(matches!(
                MailerConfig::from_env(),
                Err(MailerError::Config(_))
            ));
        });
    }

    #[test]
    fn test_graph_urls() {
        let settings = GraphSettings::new("id", "secret", "tenant-1")
            .with_authority_url("http://127.0.0.1:9000/")
            .with_graph_url("http://127.0.0.1:9001/v1.0/");

        assert_eq!(
            settings.token_url(),
            "http://127.0.0.1:9000/tenant-1/oauth2/v2.0/token"
        );
        assert_eq!(
            settings.send_mail_url("a@x.com").unwrap().as_str(),
            "http://127.0.0.1:9001/v1.0/users/a@x.com/sendMail"
        );
    }

    #[test]
    fn test_sender_is_a_single_path_segment() {
        let settings = GraphSettings::new("id", "secret", "tenant-1")
            .with_graph_url("https://graph.microsoft.com/v1.0");

        let url = settings.send_mail_url("ops/team#1?x@contoso.com").unwrap();

        assert_eq!(
            url.as_str(),
            "https://graph.microsoft.com/v1.0/users/ops%2Fteam%231%3Fx@contoso.com/sendMail"
        );
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_invalid_graph_url_fails_validation() {
        let err = GraphSettings::new("id", "secret", "tenant-1")
            .with_graph_url("not a url")
            .validate()
            .unwrap_err();
        assert!(matches!(err, MailerError::Config(_)));
    }

    #[test]
    fn test_default_graph_urls() {
        let settings = GraphSettings::new("id", "secret", "contoso");
        assert_eq!(
            settings.token_url(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(settings.timeout(), Duration::from_secs(30));
        assert!(settings.save_to_sent_items);
    }

    #[test]
    fn test_whitespace_credentials_are_missing() {
        let err = GraphSettings::new("id", "   ", "")
            .validate()
            .unwrap_err()
            .to_string();
        assert!(err.contains("client_secret, tenant_id"));
    }

    #[test]
    fn test_smtp_auth_required_needs_username() {
        let mut settings = SmtpSettings::new("smtp.example.com", 587);
        settings.auth_required = true;
        assert!(settings.validate().is_err());

        let settings = SmtpSettings::new("smtp.example.com", 587).with_credentials("u", "p");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_deserialize_tagged_config() {
        let json = serde_json::json!({
            "transport": "smtp",
            "host": "smtp.126.com",
            "port": 465,
            "encryption": "ssl",
            "username": "me@126.com",
            "password": "app-password",
            "auth_mechanism": "LOGIN",
            "auth_required": true
        });
        let config: MailerConfig = serde_json::from_value(json).unwrap();
        let MailerConfig::Smtp(settings) = config else {
            panic!("expected SMTP config");
        };
        assert_eq!(settings.encryption, Encryption::Ssl);
        assert_eq!(settings.auth_mechanism, Some(AuthMechanism::Login));

        let json = serde_json::json!({
            "transport": "graph",
            "client_id": "id",
            "client_secret": "secret",
            "tenant_id": "tenant"
        });
        let config: MailerConfig = serde_json::from_value(json).unwrap();
        let MailerConfig::Graph(settings) = config else {
            panic!("expected Graph config");
        };
        assert_eq!(settings.graph_url, DEFAULT_GRAPH_URL);
        assert_eq!(settings.sender_mailbox, None);
    }
}
