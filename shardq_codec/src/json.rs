use bytes::Bytes;
use shardq_types::Message;

use crate::{
    MessageCodec, Result,
    frame::{IDENTIFIER_LEN, frame, unframe},
};

const IDENTIFIER: &[u8; IDENTIFIER_LEN] = b"shq.j001";

/// Encodes messages as JSON.
///
/// Slower and larger than [`BitcodeCodec`](crate::BitcodeCodec) but readable with standard broker
/// tooling, which makes it the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, message: &Message) -> Result<Bytes> {
        let data = serde_json::to_vec(message)?;
        Ok(frame(IDENTIFIER, &data))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let data = unframe(IDENTIFIER, bytes)?;
        Ok(serde_json::from_slice(data)?)
    }
}
