//! Per-entry deflate compression for pack payloads.
//!
//! Compressed payload layout: `"DFZ1" | raw size u32 LE | compressed size u32 LE | deflate data`.

use crate::error::PackError;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const COMPRESSED_MAGIC: &[u8; 4] = b"DFZ1";
const HEADER_LEN: usize = 12;

/// Entries smaller than this are stored raw.
pub const MIN_COMPRESS_SIZE: usize = 256;

/// Deflate `data` if it is large enough and the result is actually smaller.
pub fn maybe_compress(data: &[u8]) -> Result<Option<Vec<u8>>, PackError> {
    if data.len() < MIN_COMPRESS_SIZE || data.len() > u32::MAX as usize {
        return Ok(None);
    }
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    let deflated = encoder.finish()?;

    if deflated.len() + HEADER_LEN >= data.len() {
        return Ok(None);
    }

    let mut out = Vec::with_capacity(deflated.len() + HEADER_LEN);
    out.extend_from_slice(COMPRESSED_MAGIC);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
    out.extend_from_slice(&deflated);
    Ok(Some(out))
}

pub fn has_header(payload: &[u8]) -> bool {
    payload.len() >= HEADER_LEN && &payload[..4] == COMPRESSED_MAGIC
}

/// Undo [`maybe_compress`]. Only call this for entries the pack directory
/// marks as compressed; raw entries may start with the same magic.
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, PackError> {
    if !has_header(payload) {
        return Err(PackError::Corrupt(
            "entry is marked compressed but has no DFZ1 header".to_string(),
        ));
    }
    let raw_len = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]) as usize;
    let packed_len = u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]) as usize;
    let body = &payload[HEADER_LEN..];
    if body.len() != packed_len {
        return Err(PackError::Corrupt(format!(
            "compressed entry declares {} bytes but holds {}",
            packed_len,
            body.len()
        )));
    }

    let mut out = Vec::with_capacity(raw_len);
    DeflateDecoder::new(body).read_to_end(&mut out)?;
    if out.len() != raw_len {
        return Err(PackError::Corrupt(format!(
            "compressed entry inflated to {} bytes, expected {}",
            out.len(),
            raw_len
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_entries_stay_raw() {
        assert!(maybe_compress(&[7u8; 100]).unwrap().is_none());
    }

    #[test]
    fn test_incompressible_entries_stay_raw() {
        // xorshift noise does not deflate below its own size
        let mut state = 0x2545_f491u32;
        let noise: Vec<u8> = (0..1024)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect();
        assert!(maybe_compress(&noise).unwrap().is_none());
    }

    #[test]
    fn test_repetitive_entry_shrinks() {
        let text = "void main() { gl_FragColor = vec4(1.0); }\n".repeat(40);
        let packed = maybe_compress(text.as_bytes()).unwrap().unwrap();
        assert!(packed.len() < text.len());
        assert!(has_header(&packed));
        assert_eq!(decompress(&packed).unwrap(), text.as_bytes());
    }

    #[test]
    fn test_truncated_payload_is_corrupt() {
        let text = "abcd".repeat(200);
        let mut packed = maybe_compress(text.as_bytes()).unwrap().unwrap();
        packed.truncate(packed.len() - 3);
        assert!(matches!(decompress(&packed), Err(PackError::Corrupt(_))));
    }

    #[test]
    fn test_headerless_payload_is_corrupt() {
        assert!(matches!(decompress(b"DFZ"), Err(PackError::Corrupt(_))));
    }
}
