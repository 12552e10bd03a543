//! Message data model shared by every transport.

mod address;
mod message;

pub use address::{Address, AddressSet};
pub use message::{
    AttachOptions, Attachment, AttachmentSource, EmbeddedItem, Message, TransferEncoding,
    DEFAULT_CHARSET,
};
