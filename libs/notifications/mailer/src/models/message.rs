//! Transport-agnostic message model.

use super::address::AddressSet;
use crate::error::{MailerError, MailerResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default charset for composed messages.
pub const DEFAULT_CHARSET: &str = "utf-8";

const DEFAULT_CONTENT_NAME: &str = "attachment";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const DEFAULT_EMBEDDED_NAME: &str = "embedded";
const DEFAULT_EMBEDDED_TYPE: &str = "image/png";

/// Where the bytes of an attachment come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentSource {
    /// Read from disk when the message is rendered.
    File(PathBuf),
    /// Supplied in memory by the caller.
    Content(Vec<u8>),
}

/// Content-Transfer-Encoding requested for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferEncoding {
    #[default]
    Base64,
    QuotedPrintable,
    SevenBit,
    EightBit,
}

impl TransferEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::QuotedPrintable => "quoted-printable",
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
        }
    }
}

impl FromStr for TransferEncoding {
    type Err = MailerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(Self::Base64),
            "quoted-printable" => Ok(Self::QuotedPrintable),
            "7bit" => Ok(Self::SevenBit),
            "8bit" => Ok(Self::EightBit),
            other => Err(MailerError::Config(format!(
                "Unsupported transfer encoding '{}'",
                other
            ))),
        }
    }
}

/// Options accepted by `attach*` and `embed*`.
///
/// Anything left unset falls back to a per-method default.
#[derive(Debug, Clone, Default)]
pub struct AttachOptions {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub encoding: Option<TransferEncoding>,
    /// Only meaningful for embedded items.
    pub content_id: Option<String>,
}

impl AttachOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_encoding(mut self, encoding: TransferEncoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_cid(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub source: AttachmentSource,
    pub file_name: String,
    /// Empty means "infer from the file name".
    pub content_type: String,
    pub encoding: TransferEncoding,
}

impl Attachment {
    /// Content type to put on the wire.
    pub fn resolved_content_type(&self) -> String {
        if !self.content_type.is_empty() {
            return self.content_type.clone();
        }

        let guess_from = match &self.source {
            AttachmentSource::File(path) => path.as_path(),
            AttachmentSource::Content(_) => Path::new(&self.file_name),
        };
        mime_guess::from_path(guess_from)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }

    /// Load the attachment bytes, reading the file if needed.
    pub async fn load(&self) -> MailerResult<Vec<u8>> {
        match &self.source {
            AttachmentSource::Content(bytes) => Ok(bytes.clone()),
            AttachmentSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
                MailerError::Delivery(format!(
                    "Could not read attachment '{}': {}",
                    path.display(),
                    e
                ))
            }),
        }
    }
}

/// Inline content referenced from the HTML body as `cid:<content_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedItem {
    pub content_id: String,
    pub part: Attachment,
}

/// An email composed once and delivered through any transport.
///
/// Setters take `&mut self` and return `&mut Self` so they chain. `embed*`
/// returns the content id instead, so it can be spliced into the HTML body
/// being built. The message is consumed by [`Mailer::send`](crate::Mailer::send).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    charset: String,
    from: AddressSet,
    to: AddressSet,
    cc: AddressSet,
    bcc: AddressSet,
    reply_to: AddressSet,
    subject: String,
    text_body: String,
    html_body: String,
    attachments: Vec<Attachment>,
    embedded: Vec<EmbeddedItem>,
}

impl Default for Message {
    fn default() -> Self {
        Self::with_charset(DEFAULT_CHARSET)
    }
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty message using the given charset.
    pub fn with_charset(charset: impl Into<String>) -> Self {
        Self {
            charset: charset.into(),
            from: AddressSet::new(),
            to: AddressSet::new(),
            cc: AddressSet::new(),
            bcc: AddressSet::new(),
            reply_to: AddressSet::new(),
            subject: String::new(),
            text_body: String::new(),
            html_body: String::new(),
            attachments: Vec::new(),
            embedded: Vec::new(),
        }
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn set_charset(&mut self, charset: impl Into<String>) -> &mut Self {
        self.charset = charset.into();
        self
    }

    pub fn from(&self) -> &AddressSet {
        &self.from
    }

    pub fn set_from(&mut self, from: impl Into<AddressSet>) -> &mut Self {
        self.from = from.into();
        self
    }

    pub fn to(&self) -> &AddressSet {
        &self.to
    }

    pub fn set_to(&mut self, to: impl Into<AddressSet>) -> &mut Self {
        self.to = to.into();
        self
    }

    pub fn cc(&self) -> &AddressSet {
        &self.cc
    }

    pub fn set_cc(&mut self, cc: impl Into<AddressSet>) -> &mut Self {
        self.cc = cc.into();
        self
    }

    pub fn bcc(&self) -> &AddressSet {
        &self.bcc
    }

    pub fn set_bcc(&mut self, bcc: impl Into<AddressSet>) -> &mut Self {
        self.bcc = bcc.into();
        self
    }

    pub fn reply_to(&self) -> &AddressSet {
        &self.reply_to
    }

    pub fn set_reply_to(&mut self, reply_to: impl Into<AddressSet>) -> &mut Self {
        self.reply_to = reply_to.into();
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn set_subject(&mut self, subject: impl Into<String>) -> &mut Self {
        self.subject = subject.into();
        self
    }

    pub fn text_body(&self) -> &str {
        &self.text_body
    }

    pub fn set_text_body(&mut self, text: impl Into<String>) -> &mut Self {
        self.text_body = text.into();
        self
    }

    pub fn html_body(&self) -> &str {
        &self.html_body
    }

    pub fn set_html_body(&mut self, html: impl Into<String>) -> &mut Self {
        self.html_body = html.into();
        self
    }

    /// A non-empty HTML body makes this an HTML message; the text body then
    /// becomes the plain-text alternative.
    pub fn is_html(&self) -> bool {
        !self.html_body.is_empty()
    }

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn embedded(&self) -> &[EmbeddedItem] {
        &self.embedded
    }

    /// Attach a file from disk. The file is read when the message is sent.
    pub fn attach(&mut self, path: impl AsRef<Path>, options: AttachOptions) -> &mut Self {
        let path = path.as_ref();
        let attachment = Attachment {
            file_name: options.file_name.unwrap_or_else(|| base_name(path)),
            content_type: options.content_type.unwrap_or_default(),
            encoding: options.encoding.unwrap_or_default(),
            source: AttachmentSource::File(path.to_path_buf()),
        };
        self.attachments.push(attachment);
        self
    }

    /// Attach in-memory content.
    pub fn attach_content(&mut self, content: impl Into<Vec<u8>>, options: AttachOptions) -> &mut Self {
        let attachment = Attachment {
            file_name: options
                .file_name
                .unwrap_or_else(|| DEFAULT_CONTENT_NAME.to_string()),
            content_type: options
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            encoding: options.encoding.unwrap_or_default(),
            source: AttachmentSource::Content(content.into()),
        };
        self.attachments.push(attachment);
        self
    }

    /// Embed a file for inline use and return its content id.
    pub fn embed(&mut self, path: impl AsRef<Path>, options: AttachOptions) -> String {
        let path = path.as_ref();
        let part = Attachment {
            file_name: options.file_name.unwrap_or_else(|| base_name(path)),
            content_type: options.content_type.unwrap_or_default(),
            encoding: options.encoding.unwrap_or_default(),
            source: AttachmentSource::File(path.to_path_buf()),
        };
        self.push_embedded(options.content_id, part)
    }

    /// Embed in-memory content for inline use and return its content id.
    pub fn embed_content(&mut self, content: impl Into<Vec<u8>>, options: AttachOptions) -> String {
        let part = Attachment {
            file_name: options
                .file_name
                .unwrap_or_else(|| DEFAULT_EMBEDDED_NAME.to_string()),
            content_type: options
                .content_type
                .unwrap_or_else(|| DEFAULT_EMBEDDED_TYPE.to_string()),
            encoding: options.encoding.unwrap_or_default(),
            source: AttachmentSource::Content(content.into()),
        };
        self.push_embedded(options.content_id, part)
    }

    /// Content ids stay unique: reusing one replaces the earlier item.
    fn push_embedded(&mut self, content_id: Option<String>, part: Attachment) -> String {
        let content_id = content_id
            .map(|cid| cid.trim().to_string())
            .filter(|cid| !cid.is_empty())
            .unwrap_or_else(generate_content_id);

        let item = EmbeddedItem {
            content_id: content_id.clone(),
            part,
        };
        match self
            .embedded
            .iter_mut()
            .find(|existing| existing.content_id == content_id)
        {
            Some(existing) => *existing = item,
            None => self.embedded.push(item),
        }

        content_id
    }
}

fn generate_content_id() -> String {
    format!("cid_{}", uuid::Uuid::new_v4().simple())
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_CONTENT_NAME.to_string())
}
