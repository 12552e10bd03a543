//! SMTP transport using lettre
//!
//! The message is rendered into a lettre `Message` in a fixed order (charset,
//! from, to, cc, bcc, reply-to, subject, body, attachments, embedded items)
//! and handed to a [`RelaySession`] exactly once.

use super::Transport;
use crate::config::{AuthMechanism, Encryption, SmtpSettings};
use crate::error::{MailerError, MailerResult};
use crate::models::{Address, Attachment, Message, TransferEncoding};
use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use lettre::{
    message::{
        header::{ContentTransferEncoding, ContentType},
        Attachment as MimeAttachment, Body, Mailbox, MultiPart, MultiPartBuilder, SinglePart,
    },
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use tracing::{debug, info, warn};

/// The stateful side of an SMTP delivery: something that takes a rendered
/// message and reports whether the relay accepted it.
#[async_trait]
pub trait RelaySession: Send + Sync {
    /// Submit a rendered message. `Ok(false)` means the relay answered
    /// without a positive completion reply.
    async fn submit(&self, message: lettre::Message) -> MailerResult<bool>;

    /// Open a connection and say hello without sending anything.
    async fn test_connection(&self) -> MailerResult<bool>;
}

#[async_trait]
impl RelaySession for AsyncSmtpTransport<Tokio1Executor> {
    async fn submit(&self, message: lettre::Message) -> MailerResult<bool> {
        let response = AsyncTransport::send(self, message).await?;

        if !response.is_positive() {
            let diagnostic: Vec<&str> = response.message().collect();
            warn!(
                code = %response.code(),
                message = %diagnostic.join(" "),
                "SMTP relay did not accept the message"
            );
        }
        Ok(response.is_positive())
    }

    async fn test_connection(&self) -> MailerResult<bool> {
        Ok(AsyncSmtpTransport::test_connection(self).await?)
    }
}

impl From<AuthMechanism> for Mechanism {
    fn from(mechanism: AuthMechanism) -> Self {
        match mechanism {
            AuthMechanism::Plain => Mechanism::Plain,
            AuthMechanism::Login => Mechanism::Login,
            AuthMechanism::Xoauth2 => Mechanism::Xoauth2,
        }
    }
}

/// SMTP relay transport
pub struct SmtpTransport<S = AsyncSmtpTransport<Tokio1Executor>> {
    session: S,
    relay: String,
}

impl SmtpTransport {
    /// Create a transport connected to the configured relay.
    pub fn new(settings: &SmtpSettings) -> MailerResult<Self> {
        settings.validate()?;
        Ok(Self {
            session: Self::build_session(settings)?,
            relay: format!("{}:{}", settings.host, settings.port),
        })
    }

    /// Build the lettre transport from settings.
    fn build_session(settings: &SmtpSettings) -> MailerResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = match settings.encryption {
            Encryption::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailerError::Config(format!("Failed to create SMTPS relay: {}", e)))?,
            Encryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
                .map_err(|e| MailerError::Config(format!("Failed to create STARTTLS relay: {}", e)))?,
            Encryption::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host),
        }
        .port(settings.port);

        if settings.auth_required {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
            if let Some(mechanism) = settings.auth_mechanism {
                builder = builder.authentication(vec![mechanism.into()]);
            }
        }

        if let Some(timeout) = settings.timeout() {
            builder = builder.timeout(Some(timeout));
        }

        Ok(builder.build())
    }
}

impl<S: RelaySession> SmtpTransport<S> {
    /// Use an existing session, e.g. a [`RecordingSession`](super::RecordingSession).
    pub fn with_session(session: S, relay: impl Into<String>) -> Self {
        Self {
            session,
            relay: relay.into(),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

#[async_trait]
impl<S: RelaySession> Transport for SmtpTransport<S> {
    async fn send(&self, message: &Message) -> MailerResult<bool> {
        let rendered = render_message(message).await?;

        debug!(
            relay = %self.relay,
            subject = %message.subject(),
            to_count = message.to().len(),
            cc_count = message.cc().len(),
            bcc_count = message.bcc().len(),
            attachments = message.attachments().len(),
            embedded = message.embedded().len(),
            "Sending email via SMTP"
        );

        let accepted = self.session.submit(rendered).await?;

        if accepted {
            info!(
                relay = %self.relay,
                to = ?message.to().emails(),
                subject = %message.subject(),
                "Email sent successfully"
            );
        }
        Ok(accepted)
    }

    async fn health_check(&self) -> MailerResult<()> {
        if self.session.test_connection().await? {
            Ok(())
        } else {
            Err(MailerError::Delivery(format!(
                "SMTP relay {} did not respond",
                self.relay
            )))
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

/// Either half of a MIME tree under construction.
enum Part {
    Single(SinglePart),
    Multi(MultiPart),
}

impl Part {
    fn start(self, builder: MultiPartBuilder) -> MultiPart {
        match self {
            Part::Single(part) => builder.singlepart(part),
            Part::Multi(part) => builder.multipart(part),
        }
    }

    fn append_to(self, multi: MultiPart) -> MultiPart {
        match self {
            Part::Single(part) => multi.singlepart(part),
            Part::Multi(part) => multi.multipart(part),
        }
    }
}

/// Render a message into a lettre message.
///
/// HTML messages become `multipart/alternative` when a text body is also
/// present; embedded items wrap the HTML part in `multipart/related`; file
/// attachments wrap everything in `multipart/mixed`.
pub async fn render_message(message: &Message) -> MailerResult<lettre::Message> {
    let charset = message.charset();

    let sender = message
        .from()
        .first()
        .ok_or_else(|| MailerError::Delivery("Message has no from address".to_string()))?;

    let mut builder = lettre::Message::builder().from(mailbox(sender)?);
    for address in message.to() {
        builder = builder.to(mailbox(address)?);
    }
    for address in message.cc() {
        builder = builder.cc(mailbox(address)?);
    }
    for address in message.bcc() {
        builder = builder.bcc(mailbox(address)?);
    }
    for address in message.reply_to() {
        builder = builder.reply_to(mailbox(address)?);
    }
    builder = builder.subject(message.subject());

    let text_part = || -> MailerResult<SinglePart> {
        Ok(SinglePart::builder()
            .header(content_type(&format!("text/plain; charset={}", charset))?)
            .body(charset_body(message.text_body(), charset)?))
    };

    // Inline items only make sense next to an HTML body; without one they
    // travel as ordinary parts of the mixed container.
    let mut loose_inline = Vec::new();

    let content = if message.is_html() {
        let html_part = SinglePart::builder()
            .header(content_type(&format!("text/html; charset={}", charset))?)
            .body(charset_body(message.html_body(), charset)?);

        let html = if message.embedded().is_empty() {
            Part::Single(html_part)
        } else {
            let mut related = MultiPart::related().singlepart(html_part);
            for item in message.embedded() {
                related = related.singlepart(mime_part(&item.part, Some(&item.content_id)).await?);
            }
            Part::Multi(related)
        };

        if message.text_body().is_empty() {
            html
        } else {
            Part::Multi(html.append_to(MultiPart::alternative().singlepart(text_part()?)))
        }
    } else {
        for item in message.embedded() {
            loose_inline.push(mime_part(&item.part, Some(&item.content_id)).await?);
        }
        Part::Single(text_part()?)
    };

    let content = if message.attachments().is_empty() && loose_inline.is_empty() {
        content
    } else {
        let mut mixed = content.start(MultiPart::mixed());
        for attachment in message.attachments() {
            mixed = mixed.singlepart(mime_part(attachment, None).await?);
        }
        for part in loose_inline {
            mixed = mixed.singlepart(part);
        }
        Part::Multi(mixed)
    };

    let rendered = match content {
        Part::Single(part) => builder.singlepart(part)?,
        Part::Multi(part) => builder.multipart(part)?,
    };
    Ok(rendered)
}

fn mailbox(address: &Address) -> MailerResult<Mailbox> {
    let email = address.email.parse().map_err(|e| {
        MailerError::Delivery(format!("Invalid address '{}': {}", address.email, e))
    })?;
    Ok(Mailbox::new(address.display_name().map(str::to_string), email))
}

/// Encode body text in the charset its part is labelled with.
fn charset_body(text: &str, charset: &str) -> MailerResult<Body> {
    let encoding = Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| MailerError::Delivery(format!("Unsupported charset '{}'", charset)))?;
    if encoding == UTF_8 {
        return Ok(Body::new(text.to_string()));
    }

    let (bytes, used, had_errors) = encoding.encode(text);
    if had_errors || used != encoding {
        return Err(MailerError::Delivery(format!(
            "Body cannot be represented in charset '{}'",
            charset
        )));
    }
    Ok(Body::new(bytes.into_owned()))
}

fn content_type(value: &str) -> MailerResult<ContentType> {
    ContentType::parse(value)
        .map_err(|e| MailerError::Delivery(format!("Invalid content type '{}': {}", value, e)))
}

/// Build an attachment part, inline when a content id is given.
async fn mime_part(attachment: &Attachment, content_id: Option<&str>) -> MailerResult<SinglePart> {
    let bytes = attachment.load().await?;
    let content_type = content_type(&attachment.resolved_content_type())?;

    let encoding = match attachment.encoding {
        TransferEncoding::Base64 => ContentTransferEncoding::Base64,
        TransferEncoding::QuotedPrintable => ContentTransferEncoding::QuotedPrintable,
        TransferEncoding::SevenBit => ContentTransferEncoding::SevenBit,
        TransferEncoding::EightBit => ContentTransferEncoding::EightBit,
    };
    // Content that cannot be carried in the requested encoding falls back
    // to whatever lettre picks for it.
    let body = Body::new_with_encoding(bytes, encoding).unwrap_or_else(Body::new);

    let part = match content_id {
        Some(cid) => MimeAttachment::new_inline_with_name(cid.to_string(), attachment.file_name.clone())
            .body(body, content_type),
        None => MimeAttachment::new(attachment.file_name.clone()).body(body, content_type),
    };
    Ok(part)
}
