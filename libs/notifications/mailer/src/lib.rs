//! Email delivery over SMTP or Microsoft Graph
//!
//! Compose a message once and deliver it through either transport:
//!
//! - **SMTP**: an authenticated session with a mail relay (lettre)
//! - **Graph**: the Microsoft Graph `sendMail` REST API, authenticated with an
//!   OAuth2 client-credentials token that is cached until shortly before it
//!   expires
//!
//! ## Components
//!
//! - **Models**: `Message`, `AddressSet`, `Attachment`, `EmbeddedItem`
//! - **Configuration**: `MailerConfig` with `SmtpSettings` / `GraphSettings`
//! - **Transports**: `SmtpTransport`, `GraphTransport`, and `RecordingSession`
//!   for tests
//! - **Tokens**: `TokenProvider` with an injectable `Clock`
//! - **Façade**: `Mailer`
//!
//! ## Usage
//!
//! ```ignore
//! use mailer::{AttachOptions, Mailer};
//!
//! let mailer = Mailer::from_env()?;
//!
//! let mut message = mailer.compose();
//! message
//!     .set_from(("noreply@contoso.com", "Contoso"))
//!     .set_to("user@example.com")
//!     .set_subject("Monthly report");
//! let logo = message.embed("assets/logo.png", AttachOptions::new());
//! message.set_html_body(format!("<img src=\"cid:{logo}\"><p>See attached.</p>"));
//! message.attach("reports/2024-05.pdf", AttachOptions::new());
//!
//! let accepted = mailer.send(message).await?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod service;
pub mod token;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthMechanism, Encryption, GraphSettings, MailerConfig, SmtpSettings};
pub use error::{MailerError, MailerResult};
pub use models::{
    Address, AddressSet, AttachOptions, Attachment, AttachmentSource, EmbeddedItem, Message,
    TransferEncoding,
};
pub use service::Mailer;
pub use token::{TokenProvider, TokenStatus};
pub use transport::{
    GraphTransport, RecordedMessage, RecordingSession, RelaySession, SmtpTransport, Transport,
};
