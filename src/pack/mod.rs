//! Packed executable format.
//!
//! A self-contained demo is the runtime executable with the project data
//! appended:
//!
//! ```text
//! [runtime exe][entry payloads][directory][directory offset: u64 LE][MAGIC]
//! ```
//!
//! The directory is a `u32` entry count followed by, per entry, a `u32` path
//! length, the UTF-8 path, the absolute `u64` payload offset, the `u64`
//! payload size and a `u8` flags byte. The runtime finds the directory by
//! reading the trailer from the end of its own file. Flag bit 0 marks a
//! deflated payload (see [`compress`]).

pub mod compress;

use crate::error::PackError;
use std::collections::HashSet;
use std::fs;
use std::io::{Seek, Write};
use std::path::Path;

/// Trailer magic, 14 bytes.
pub const PACK_MAGIC: &[u8; 14] = b"DEMOFORGE_PACK";
const TRAILER_LEN: usize = 8 + PACK_MAGIC.len();

const FLAG_COMPRESSED: u8 = 1 << 0;

/// Forward slashes, no leading `./` or `/`, no empty segments.
pub fn normalize_pack_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Entry staged for packing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub path: String,
    pub data: Vec<u8>,
}

/// Directory record of a written pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedEntry {
    pub path: String,
    /// Absolute offset of the payload inside the packed file.
    pub offset: u64,
    /// Stored payload size (compressed size for deflated entries).
    pub size: u64,
    pub compressed: bool,
}

/// Collects entries in insertion order, skipping duplicate paths.
#[derive(Debug, Default)]
pub struct PackBuilder {
    entries: Vec<PackEntry>,
    names: HashSet<String>,
    compress: bool,
}

impl PackBuilder {
    pub fn new(compress: bool) -> Self {
        PackBuilder {
            entries: Vec::new(),
            names: HashSet::new(),
            compress,
        }
    }

    /// Returns false when an entry with the same normalized path exists.
    pub fn add_bytes(&mut self, path: &str, data: Vec<u8>) -> bool {
        let path = normalize_pack_path(path);
        if path.is_empty() || !self.names.insert(path.clone()) {
            return false;
        }
        self.entries.push(PackEntry { path, data });
        true
    }

    pub fn add_file(&mut self, path: &str, source: &Path) -> Result<bool, PackError> {
        let key = normalize_pack_path(path);
        if self.names.contains(&key) {
            return Ok(false);
        }
        let data = fs::read(source)?;
        Ok(self.add_bytes(&key, data))
    }

    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append the pack behind `exe` into `out`. Returns the directory and the
    /// total number of bytes written.
    pub fn write_packed<W: Write>(
        &self,
        exe: &[u8],
        out: &mut W,
    ) -> Result<(Vec<PackedEntry>, u64), PackError> {
        out.write_all(exe)?;
        let mut cursor = exe.len() as u64;
        let mut directory = Vec::with_capacity(self.entries.len());

        for entry in &self.entries {
            let compressed = if self.compress {
                compress::maybe_compress(&entry.data)?
            } else {
                None
            };
            let payload = compressed.as_deref().unwrap_or(&entry.data);
            out.write_all(payload)?;
            directory.push(PackedEntry {
                path: entry.path.clone(),
                offset: cursor,
                size: payload.len() as u64,
                compressed: compressed.is_some(),
            });
            cursor += payload.len() as u64;
        }

        let dir_offset = cursor;
        let mut blob = Vec::new();
        blob.extend_from_slice(&(directory.len() as u32).to_le_bytes());
        for record in &directory {
            let bytes = record.path.as_bytes();
            blob.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            blob.extend_from_slice(bytes);
            blob.extend_from_slice(&record.offset.to_le_bytes());
            blob.extend_from_slice(&record.size.to_le_bytes());
            blob.push(if record.compressed { FLAG_COMPRESSED } else { 0 });
        }
        out.write_all(&blob)?;
        out.write_all(&dir_offset.to_le_bytes())?;
        out.write_all(PACK_MAGIC)?;
        out.flush()?;

        let total = dir_offset + blob.len() as u64 + TRAILER_LEN as u64;
        Ok((directory, total))
    }

    /// Write a zip archive: the runtime at the root, entries next to it.
    pub fn write_zip<W: Write + Seek>(
        &self,
        runtime_name: &str,
        runtime: &[u8],
        out: W,
    ) -> Result<W, PackError> {
        let mut zip = zip::ZipWriter::new(out);
        let exec_options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o755);
        let data_options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        zip.start_file(runtime_name, exec_options)?;
        zip.write_all(runtime)?;
        for entry in &self.entries {
            zip.start_file(entry.path.as_str(), data_options)?;
            zip.write_all(&entry.data)?;
        }
        Ok(zip.finish()?)
    }
}

/// Read-only view of a packed executable.
#[derive(Debug)]
pub struct PackReader {
    bytes: Vec<u8>,
    entries: Vec<PackedEntry>,
}

impl PackReader {
    pub fn open(path: &Path) -> Result<Self, PackError> {
        Self::from_bytes(fs::read(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PackError> {
        if bytes.len() < TRAILER_LEN || !bytes.ends_with(PACK_MAGIC) {
            return Err(PackError::Corrupt("no pack trailer found".to_string()));
        }
        let trailer = bytes.len() - TRAILER_LEN;
        let dir_offset = read_u64(&bytes, trailer)? as usize;
        if dir_offset > trailer {
            return Err(PackError::Corrupt(format!(
                "directory offset {} is past the trailer",
                dir_offset
            )));
        }

        let mut pos = dir_offset;
        let count = read_u32(&bytes, pos)? as usize;
        pos += 4;
        let mut entries = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let name_len = read_u32(&bytes, pos)? as usize;
            pos += 4;
            let name_end = pos
                .checked_add(name_len)
                .filter(|end| *end <= trailer)
                .ok_or_else(|| PackError::Corrupt("entry name runs past directory".to_string()))?;
            let path = String::from_utf8(bytes[pos..name_end].to_vec())
                .map_err(|_| PackError::Corrupt("entry name is not UTF-8".to_string()))?;
            pos = name_end;
            let offset = read_u64(&bytes, pos)?;
            let size = read_u64(&bytes, pos + 8)?;
            let flags = *bytes
                .get(pos + 16)
                .filter(|_| pos + 16 < trailer)
                .ok_or_else(|| PackError::Corrupt(format!("truncated flags at {}", pos + 16)))?;
            pos += 17;
            if flags & !FLAG_COMPRESSED != 0 {
                return Err(PackError::Corrupt(format!(
                    "entry '{}' has unknown flags {:#04x}",
                    path, flags
                )));
            }
            if offset.checked_add(size).map_or(true, |end| end > dir_offset as u64) {
                return Err(PackError::Corrupt(format!(
                    "entry '{}' points outside the pack data",
                    path
                )));
            }
            entries.push(PackedEntry {
                path,
                offset,
                size,
                compressed: flags & FLAG_COMPRESSED != 0,
            });
        }
        if pos != trailer {
            return Err(PackError::Corrupt("directory size mismatch".to_string()));
        }
        Ok(PackReader { bytes, entries })
    }

    pub fn entries(&self) -> &[PackedEntry] {
        &self.entries
    }

    /// Size of the runtime executable in front of the pack.
    pub fn executable_len(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.offset)
            .min()
            .unwrap_or_else(|| {
                let trailer = self.bytes.len() - TRAILER_LEN;
                read_u64(&self.bytes, trailer).unwrap_or(0)
            })
    }

    pub fn entry(&self, path: &str) -> Result<&PackedEntry, PackError> {
        let key = normalize_pack_path(path);
        self.entries
            .iter()
            .find(|e| e.path == key)
            .ok_or(PackError::EntryNotFound(key))
    }

    /// Stored payload, possibly compressed.
    pub fn raw(&self, path: &str) -> Result<&[u8], PackError> {
        let entry = self.entry(path)?;
        let start = entry.offset as usize;
        Ok(&self.bytes[start..start + entry.size as usize])
    }

    /// Entry contents with compression undone.
    pub fn read(&self, path: &str) -> Result<Vec<u8>, PackError> {
        let payload = self.raw(path)?;
        if self.entry(path)?.compressed {
            compress::decompress(payload)
        } else {
            Ok(payload.to_vec())
        }
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, PackError> {
    bytes
        .get(pos..pos + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| PackError::Corrupt(format!("truncated u32 at {}", pos)))
}

fn read_u64(bytes: &[u8], pos: usize) -> Result<u64, PackError> {
    bytes
        .get(pos..pos + 8)
        .map(|b| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            u64::from_le_bytes(buf)
        })
        .ok_or_else(|| PackError::Corrupt(format!("truncated u64 at {}", pos)))
}
