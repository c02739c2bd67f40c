//! Serialization of [`Message`]s to and from the bytes carried by a broker.
//!
//! Every encoded message is framed with a format identifier and a crc32 checksum of the encoded
//! data, so a consumer can tell a message written in another format (or corrupted in transit)
//! apart from one it can decode:
//!
//! ```text
//! +----------------------+-------------------+------------------+
//! | identifier (8 bytes) | crc32 (u32, BE)   | encoded message  |
//! +----------------------+-------------------+------------------+
//! ```
//!
//! The delivery handle of a message is never encoded.
use std::{fmt::Debug, sync::Arc};

use bytes::Bytes;
use shardq_types::Message;
use thiserror::Error;

mod frame;

mod json;
pub use json::JsonCodec;

mod compact;
pub use compact::BitcodeCodec;

#[derive(Debug, Error)]
pub enum Error {
    #[error("message is {len} bytes, shorter than the {header} byte frame header")]
    Truncated { len: usize, header: usize },

    #[error("unexpected format identifier {found:?}, expected {expected:?}")]
    WrongFormat {
        found: Vec<u8>,
        expected: &'static [u8],
    },

    #[error("crc32 checksum mismatch")]
    Crc32Mismatch,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bitcode error: {0}")]
    Bitcode(#[from] bitcode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Converts [`Message`]s to broker payload bytes and back.
///
/// Implementations must round-trip the sequence key and payload of a message.
pub trait MessageCodec: Debug + Send + Sync {
    /// The MIME type published alongside encoded messages.
    fn content_type(&self) -> &'static str;

    fn encode(&self, message: &Message) -> Result<Bytes>;

    /// Decode a message. The returned message never carries a delivery handle.
    fn decode(&self, bytes: &[u8]) -> Result<Message>;
}

impl<T> MessageCodec for Arc<T>
where
    T: MessageCodec + ?Sized,
{
    fn content_type(&self) -> &'static str {
        (**self).content_type()
    }

    fn encode(&self, message: &Message) -> Result<Bytes> {
        (**self).encode(message)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        (**self).decode(bytes)
    }
}
