use std::{io::Cursor, mem::size_of};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;

use crate::{Error, Result};

/// Length of the format identifier at the start of every frame.
pub(crate) const IDENTIFIER_LEN: usize = 8;

const CHECKSUM_LEN: usize = size_of::<u32>();

const HEADER_LEN: usize = IDENTIFIER_LEN + CHECKSUM_LEN;

/// Prefix `data` with `identifier` and its crc32 checksum.
pub(crate) fn frame(identifier: &'static [u8; IDENTIFIER_LEN], data: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(HEADER_LEN + data.len());
    buf.extend_from_slice(identifier);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    buf.extend_from_slice(&hasher.finalize().to_be_bytes());

    buf.extend_from_slice(data);
    buf.into()
}

/// Verify the identifier and checksum of a frame, returning the encoded data.
pub(crate) fn unframe<'a>(
    identifier: &'static [u8; IDENTIFIER_LEN],
    contents: &'a [u8],
) -> Result<&'a [u8]> {
    if contents.len() < HEADER_LEN {
        return Err(Error::Truncated {
            len: contents.len(),
            header: HEADER_LEN,
        });
    }

    let file_type = &contents[..IDENTIFIER_LEN];
    if file_type != identifier {
        return Err(Error::WrongFormat {
            found: file_type.to_vec(),
            expected: identifier,
        });
    }

    let mut cursor = Cursor::new(&contents[IDENTIFIER_LEN..HEADER_LEN]);
    let crc32_checksum = cursor.read_u32::<BigEndian>()?;

    let data = &contents[HEADER_LEN..];
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    if hasher.finalize() != crc32_checksum {
        return Err(Error::Crc32Mismatch);
    }

    Ok(data)
}
