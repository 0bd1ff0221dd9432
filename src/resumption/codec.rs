//! Binary framing for the resumption snapshot file.
//!
//! ```text
//! [MAGIC: 4 bytes "GFNC"][VERSION: 1 byte]
//! [length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
//! ```
//!
//! JSON keeps the serde attributes of the data model authoritative; the CRC
//! catches torn writes and bit rot.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::{de::DeserializeOwned, Serialize};

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying a snapshot file.
pub const MAGIC: [u8; 4] = *b"GFNC";

/// Snapshots are tiny; anything larger than this is a corrupt length prefix.
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Writes header plus one checksummed record.
pub fn write_record<T: Serialize>(writer: &mut impl Write, value: &T) -> IoResult<()> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;

    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "record too large to frame"))?;

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&data)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Reads and verifies header plus one record.
///
/// # Errors
/// - `InvalidData` on bad magic, unsupported version, oversized length,
///   checksum mismatch or undecodable JSON.
/// - `UnexpectedEof` on a truncated file.
pub fn read_record<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_RECORD_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("record size {len} exceeds maximum {MAX_RECORD_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored_crc = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed_crc = hasher.finalize();
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}
