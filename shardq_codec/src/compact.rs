use bytes::Bytes;
use shardq_types::Message;

use crate::{
    MessageCodec, Result,
    frame::{IDENTIFIER_LEN, frame, unframe},
};

const IDENTIFIER: &[u8; IDENTIFIER_LEN] = b"shq.b001";

/// Encodes messages with `bitcode`, a compact binary format.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitcodeCodec;

impl MessageCodec for BitcodeCodec {
    fn content_type(&self) -> &'static str {
        "application/x-bitcode"
    }

    fn encode(&self, message: &Message) -> Result<Bytes> {
        let data = bitcode::serialize(message)?;
        Ok(frame(IDENTIFIER, &data))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let data = unframe(IDENTIFIER, bytes)?;
        Ok(bitcode::deserialize(data)?)
    }
}
