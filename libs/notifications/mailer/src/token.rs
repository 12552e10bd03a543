//! OAuth2 client-credentials token provider for Microsoft Graph.
//!
//! The provider keeps the current access token and its expiry in memory.
//! A cached token is reused while `now < expires_at - safety_margin`;
//! otherwise a new one is requested from
//! `{authority}/{tenant}/oauth2/v2.0/token`.
//!
//! The cache sits behind an async mutex that stays locked for the whole
//! refresh, so callers that miss at the same time wait for the one request
//! in flight instead of issuing their own.

use crate::clock::{Clock, SystemClock};
use crate::config::{GraphSettings, GRAPH_SCOPE};
use crate::error::{MailerError, MailerResult};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Tokens closer than this to expiry are treated as expired.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 60;

/// Lifetime assumed when the endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Where the cached token stands relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    NoToken,
    Valid,
    ExpiringSoon,
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn status(&self, now: DateTime<Utc>, margin: Duration) -> TokenStatus {
        if now < self.expires_at - margin {
            TokenStatus::Valid
        } else {
            TokenStatus::ExpiringSoon
        }
    }
}

/// Token response from the identity endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error body returned by the identity endpoint
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Acquires and caches Graph access tokens.
pub struct TokenProvider {
    token_url: String,
    client_id: String,
    client_secret: String,
    client: Client,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    /// Create a provider sharing an existing HTTP client.
    pub fn new(settings: &GraphSettings, client: Client) -> Self {
        Self {
            token_url: settings.token_url(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            client,
            clock: Arc::new(SystemClock),
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            cache: Mutex::new(None),
        }
    }

    /// Create a provider with its own HTTP client bounded by the configured timeout.
    pub fn from_settings(settings: &GraphSettings) -> MailerResult<Self> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| MailerError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self::new(settings, client))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Current cache state as seen at `now`.
    pub async fn status(&self) -> TokenStatus {
        let cache = self.cache.lock().await;
        match cache.as_ref() {
            Some(cached) => cached.status(self.clock.now(), self.safety_margin),
            None => TokenStatus::NoToken,
        }
    }

    /// Return a usable access token, requesting a new one only when needed.
    ///
    /// A failed request clears the cache and is returned to the caller as
    /// `Authentication` (rejected or unusable response) or `Network`
    /// (timeout, connection failure).
    pub async fn get_token(&self) -> MailerResult<String> {
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.status(self.clock.now(), self.safety_margin) == TokenStatus::Valid {
                return Ok(cached.access_token.clone());
            }
        }

        let refreshed = self.request_token().await.and_then(|response| {
            Ok(CachedToken {
                expires_at: expiry_instant(self.clock.now(), response.expires_in)?,
                access_token: response.access_token,
            })
        });

        match refreshed {
            Ok(token) => {
                debug!(expires_at = %token.expires_at, "Graph access token refreshed");
                let access_token = token.access_token.clone();
                *cache = Some(token);
                Ok(access_token)
            }
            Err(e) => {
                *cache = None;
                error!(error = %e, "Failed to obtain Microsoft OAuth access token");
                Err(e)
            }
        }
    }

    /// Drop the cached token so the next call requests a fresh one.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    async fn request_token(&self) -> MailerResult<TokenResponse> {
        debug!(url = %self.token_url, "Requesting Graph access token");

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    MailerError::Network(format!("Token request failed: {}", e))
                } else {
                    MailerError::Authentication(format!("Token request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                MailerError::Network(format!("Token response interrupted: {}", e))
            } else {
                MailerError::Authentication(format!("Failed to read token response: {}", e))
            }
        })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|err| format!("{}: {}", err.error, err.error_description))
                .unwrap_or(body);
            return Err(MailerError::Authentication(format!(
                "Token endpoint returned {}: {}",
                status, detail
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            MailerError::Authentication(format!("Failed to parse token response: {}", e))
        })?;

        if token.access_token.is_empty() {
            return Err(MailerError::Authentication(
                "Token response did not contain an access_token".to_string(),
            ));
        }

        Ok(token)
    }
}

/// Absolute expiry for a token issued at `now` with the given lifetime.
fn expiry_instant(now: DateTime<Utc>, expires_in: Option<i64>) -> MailerResult<DateTime<Utc>> {
    let secs = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    if secs <= 0 {
        return Err(MailerError::Authentication(format!(
            "Token response has non-positive expires_in: {}",
            secs
        )));
    }

    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| {
            MailerError::Authentication(format!(
                "Token response has out-of-range expires_in: {}",
                secs
            ))
        })
}
