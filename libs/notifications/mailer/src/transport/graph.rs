//! Microsoft Graph transport
//!
//! Sends mail with `POST {graph}/users/{sender}/sendMail`, authenticated with
//! an app-only token from [`TokenProvider`]. Graph answers `202 Accepted`
//! when the message is queued for delivery; anything else is a failure.
//!
//! Attachments and embedded items are sent as base64 `fileAttachment`
//! entries. Graph limits a single request to roughly 4 MB, so large files
//! are better sent through SMTP.

use super::Transport;
use crate::clock::Clock;
use crate::config::GraphSettings;
use crate::error::{MailerError, MailerResult};
use crate::models::{Address, AddressSet, Attachment, Message};
use crate::token::TokenProvider;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

const FILE_ATTACHMENT_TYPE: &str = "#microsoft.graph.fileAttachment";

/// Graph sendMail request payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMailRequest {
    message: GraphMessage,
    save_to_sent_items: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    subject: String,
    body: ItemBody,
    to_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc_recipients: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reply_to: Vec<Recipient>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<FileAttachment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody {
    content_type: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileAttachment {
    #[serde(rename = "@odata.type")]
    odata_type: &'static str,
    name: String,
    content_type: String,
    content_bytes: String,
    is_inline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_id: Option<String>,
}

impl From<&Address> for Recipient {
    fn from(address: &Address) -> Self {
        Self {
            email_address: EmailAddress {
                address: address.email.clone(),
                name: address.display_name().map(str::to_string),
            },
        }
    }
}

fn recipients(set: &AddressSet) -> Vec<Recipient> {
    set.iter().map(Recipient::from).collect()
}

async fn file_attachment(
    attachment: &Attachment,
    content_id: Option<&str>,
) -> MailerResult<FileAttachment> {
    let bytes = attachment.load().await?;
    Ok(FileAttachment {
        odata_type: FILE_ATTACHMENT_TYPE,
        name: attachment.file_name.clone(),
        content_type: attachment.resolved_content_type(),
        content_bytes: base64::engine::general_purpose::STANDARD.encode(bytes),
        is_inline: content_id.is_some(),
        content_id: content_id.map(str::to_string),
    })
}

/// Microsoft Graph REST transport
pub struct GraphTransport {
    settings: GraphSettings,
    client: Client,
    tokens: TokenProvider,
}

impl GraphTransport {
    /// Create a new Graph transport.
    ///
    /// Fails with a configuration error when client id, secret or tenant is missing.
    pub fn new(settings: GraphSettings) -> MailerResult<Self> {
        settings.validate()?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| MailerError::Config(format!("Failed to build HTTP client: {}", e)))?;
        let tokens = TokenProvider::new(&settings, client.clone());

        Ok(Self {
            settings,
            client,
            tokens,
        })
    }

    /// Replace the clock used for token expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = TokenProvider::new(&self.settings, self.client.clone()).with_clock(clock);
        self
    }

    pub fn token_provider(&self) -> &TokenProvider {
        &self.tokens
    }

    /// Mailbox the message is sent as: the configured one, else the first `from`.
    pub fn sender(&self, message: &Message) -> MailerResult<String> {
        self.settings
            .sender_mailbox
            .as_deref()
            .map(str::trim)
            .filter(|mailbox| !mailbox.is_empty())
            .map(str::to_string)
            .or_else(|| message.from().first().map(|a| a.email.clone()))
            .ok_or_else(|| {
                MailerError::Delivery(
                    "No sender mailbox: configure sender_mailbox or set a from address".to_string(),
                )
            })
    }

    /// Build the sendMail JSON payload.
    pub async fn build_request(&self, message: &Message) -> MailerResult<SendMailRequest> {
        let body = if message.is_html() {
            ItemBody {
                content_type: "HTML",
                content: message.html_body().to_string(),
            }
        } else {
            ItemBody {
                content_type: "Text",
                content: message.text_body().to_string(),
            }
        };

        let mut attachments = Vec::new();
        for attachment in message.attachments() {
            attachments.push(file_attachment(attachment, None).await?);
        }
        for item in message.embedded() {
            attachments.push(file_attachment(&item.part, Some(&item.content_id)).await?);
        }

        Ok(SendMailRequest {
            message: GraphMessage {
                subject: message.subject().to_string(),
                body,
                to_recipients: recipients(message.to()),
                cc_recipients: recipients(message.cc()),
                bcc_recipients: recipients(message.bcc()),
                reply_to: recipients(message.reply_to()),
                attachments,
            },
            save_to_sent_items: self.settings.save_to_sent_items,
        })
    }
}

#[async_trait]
impl Transport for GraphTransport {
    async fn send(&self, message: &Message) -> MailerResult<bool> {
        let sender = self.sender(message)?;
        let request = self.build_request(message).await?;

        let access_token = self.tokens.get_token().await?;

        let url = self.settings.send_mail_url(&sender)?;
        debug!(
            sender = %sender,
            subject = %message.subject(),
            to_count = message.to().len(),
            attachments = request.message.attachments.len(),
            "Sending email via Microsoft Graph"
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            info!(
                sender = %sender,
                to = ?message.to().emails(),
                subject = %message.subject(),
                "Email sent successfully"
            );
            return Ok(true);
        }

        let error_body = response.text().await.unwrap_or_default();
        error!(
            status = %status,
            error = %error_body,
            "Graph API error"
        );

        match status {
            StatusCode::UNAUTHORIZED => {
                // The cached token was refused; make the next send fetch a new one.
                self.tokens.invalidate().await;
                Err(MailerError::Authentication(format!(
                    "Graph rejected the access token ({}): {}",
                    status, error_body
                )))
            }
            StatusCode::FORBIDDEN => Err(MailerError::Authentication(format!(
                "Graph denied sending as {} ({}): {}",
                sender, status, error_body
            ))),
            _ => Err(MailerError::Delivery(format!(
                "Graph sendMail returned {}: {}",
                status, error_body
            ))),
        }
    }

    async fn health_check(&self) -> MailerResult<()> {
        self.tokens.get_token().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "graph"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttachOptions;
    use serde_json::json;

    fn transport() -> GraphTransport {
        GraphTransport::new(GraphSettings::new("id", "secret", "tenant")).unwrap()
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let result = GraphTransport::new(GraphSettings::new("id", "", "tenant"));
        assert!(matches!(result, Err(MailerError::Config(_))));
    }

    #[test]
    fn test_sender_prefers_configured_mailbox() {
        let transport = GraphTransport::new(
            GraphSettings::new("id", "secret", "tenant").with_sender_mailbox("noreply@contoso.com"),
        )
        .unwrap();
        let mut message = Message::new();
        message.set_from("someone@contoso.com");

        assert_eq!(transport.sender(&message).unwrap(), "noreply@contoso.com");
    }

    #[test]
    fn test_sender_falls_back_to_from() {
        let mut message = Message::new();
        message.set_from([("first@contoso.com", "First"), ("second@contoso.com", "")]);

        assert_eq!(transport().sender(&message).unwrap(), "first@contoso.com");
        assert!(transport().sender(&Message::new()).is_err());
    }

    #[tokio::test]
    async fn test_html_payload() {
        let mut message = Message::new();
        message
            .set_from("a@x.com")
            .set_to(("b@y.com", "Bob"))
            .set_subject("S")
            .set_text_body("ignored alternative")
            .set_html_body("<p>H</p>");

        let request = transport().build_request(&message).await.unwrap();
        let payload = serde_json::to_value(&request).unwrap();

        assert_eq!(
            payload,
            json!({
                "message": {
                    "subject": "S",
                    "body": { "contentType": "HTML", "content": "<p>H</p>" },
                    "toRecipients": [
                        { "emailAddress": { "address": "b@y.com", "name": "Bob" } }
                    ]
                },
                "saveToSentItems": true
            })
        );
    }

    #[tokio::test]
    async fn test_text_payload_with_cc_bcc_and_reply_to() {
        let mut message = Message::new();
        message
            .set_from("a@x.com")
            .set_to("b@y.com")
            .set_cc("c@y.com")
            .set_bcc("d@y.com")
            .set_reply_to("r@x.com")
            .set_subject("Plain")
            .set_text_body("just text");

        let request = transport().build_request(&message).await.unwrap();
        let payload = serde_json::to_value(&request).unwrap();
        let graph_message = &payload["message"];

        assert_eq!(graph_message["body"]["contentType"], "Text");
        assert_eq!(graph_message["body"]["content"], "just text");
        assert_eq!(graph_message["ccRecipients"][0]["emailAddress"]["address"], "c@y.com");
        assert_eq!(graph_message["bccRecipients"][0]["emailAddress"]["address"], "d@y.com");
        assert_eq!(graph_message["replyTo"][0]["emailAddress"]["address"], "r@x.com");
        assert!(graph_message["toRecipients"][0]["emailAddress"].get("name").is_none());
    }

    #[tokio::test]
    async fn test_attachments_are_base64_file_attachments() {
        let mut message = Message::new();
        message.set_from("a@x.com").set_to("b@y.com").set_subject("Files");
        message.attach_content(
            "hello",
            AttachOptions::new()
                .with_file_name("hello.txt")
                .with_content_type("text/plain"),
        );
        let cid = message.embed_content(b"png".to_vec(), AttachOptions::new().with_cid("logo"));
        message.set_html_body(format!("<img src=\"cid:{}\">", cid));

        let request = transport().build_request(&message).await.unwrap();
        let payload = serde_json::to_value(&request).unwrap();
        let attachments = payload["message"]["attachments"].as_array().unwrap();

        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0]["@odata.type"], "#microsoft.graph.fileAttachment");
        assert_eq!(attachments[0]["name"], "hello.txt");
        assert_eq!(attachments[0]["contentBytes"], "aGVsbG8=");
        assert_eq!(attachments[0]["isInline"], false);
        assert!(attachments[0].get("contentId").is_none());
        assert_eq!(attachments[1]["isInline"], true);
        assert_eq!(attachments[1]["contentId"], "logo");
        assert_eq!(attachments[1]["contentType"], "image/png");
    }

    #[tokio::test]
    async fn test_save_to_sent_items_follows_settings() {
        let mut settings = GraphSettings::new("id", "secret", "tenant");
        settings.save_to_sent_items = false;
        let transport = GraphTransport::new(settings).unwrap();
        let mut message = Message::new();
        message.set_from("a@x.com").set_to("b@y.com").set_text_body("x");

        let payload = serde_json::to_value(transport.build_request(&message).await.unwrap()).unwrap();
        assert_eq!(payload["saveToSentItems"], false);
        assert_eq!(transport.name(), "graph");
    }
}
