//! Log record encoding and decoding
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: size of type + payload + crc (not including length itself)
//! - **type**: decision tag (1=Committed, 2=RolledBack)
//! - **payload**: bincode-serialized `LogRecord`
//! - **crc32**: CRC32 over \[type\]\[payload\]
//!
//! All integers are little-endian.

use crate::record::LogRecord;
use crc32fast::Hasher;
use txcoord_core::error::{Error, Result};
use txcoord_core::Decision;

/// Type tag for a commit decision
pub const TYPE_COMMITTED: u8 = 1;
/// Type tag for a rollback decision
pub const TYPE_ROLLED_BACK: u8 = 2;

/// Smallest legal value of the length field: type(1) + crc(4)
const MIN_BODY_LEN: usize = 5;

fn type_tag(decision: Decision) -> u8 {
    match decision {
        Decision::Committed => TYPE_COMMITTED,
        Decision::RolledBack => TYPE_ROLLED_BACK,
    }
}

fn checksum(type_tag: u8, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(payload);
    hasher.finalize()
}

/// Encode a record to bytes ready for a single append
pub fn encode_record(record: &LogRecord) -> Result<Vec<u8>> {
    let tag = type_tag(record.decision);
    let payload = bincode::serialize(record)?;
    let total_len = 1 + payload.len() + 4;

    let mut buf = Vec::with_capacity(4 + total_len);
    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.push(tag);
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&checksum(tag, &payload).to_le_bytes());
    Ok(buf)
}

/// Decode one record from the front of `buf`
///
/// Returns the record and the number of bytes consumed. `offset` is the file
/// position of `buf[0]` and only feeds error messages.
///
/// # Errors
///
/// - `Error::IncompleteEntry` if `buf` ends before the record does
/// - `Error::Corruption` on a bad length, CRC mismatch, undecodable payload,
///   or a type tag that disagrees with the payload's decision
pub fn decode_record(buf: &[u8], offset: u64) -> Result<(LogRecord, usize)> {
    if buf.len() < 4 {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4,
        });
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..4]);
    let total_len = u32::from_le_bytes(len_bytes) as usize;

    if total_len < MIN_BODY_LEN {
        return Err(Error::Corruption(format!(
            "offset {}: invalid record length {} (minimum is {})",
            offset, total_len, MIN_BODY_LEN
        )));
    }

    if buf.len() < 4 + total_len {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let tag = buf[4];
    let payload = &buf[5..4 + total_len - 4];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[4 + total_len - 4..4 + total_len]);
    let expected_crc = u32::from_le_bytes(crc_bytes);

    let actual_crc = checksum(tag, payload);
    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    let record: LogRecord = bincode::deserialize(payload).map_err(|e| {
        Error::Corruption(format!("offset {}: deserialization failed: {}", offset, e))
    })?;

    if type_tag(record.decision) != tag {
        return Err(Error::Corruption(format!(
            "offset {}: type tag {} does not match decision {}",
            offset, tag, record.decision
        )));
    }

    Ok((record, 4 + total_len))
}

/// Declared size of the record at the front of `buf`, if the length field is readable
pub(crate) fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[..4]);
    Some(4 + u32::from_le_bytes(len_bytes) as usize)
}
