//! Memo file access for `.dbt` (dBase) and `.fpt` (FoxPro) companions.
//!
//! Memo fields in the table hold a block number; the text itself lives in a
//! block-structured side file whose layout depends on the producing product:
//! - dBase III: 512-byte blocks, text terminated by 0x1A
//! - dBase IV: block size in the header, each entry prefixed by
//!   `FF FF 08 00` and a little-endian length that includes the prefix
//! - FoxPro: big-endian block size in the header, each entry prefixed by a
//!   big-endian type and length

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::Result;
use crate::error::DbfCopyError;

const DBASE3_BLOCK_SIZE: u64 = 512;
const DBASE4_ENTRY_MARKER: [u8; 4] = [0xFF, 0xFF, 0x08, 0x00];
const FOXPRO_DEFAULT_BLOCK_SIZE: u64 = 64;
/// Upper bound on a single memo entry
const MAX_MEMO_LENGTH: u64 = 64 * 1024 * 1024;
const END_OF_TEXT: u8 = 0x1A;

/// Layout of a memo file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoFormat {
    DBase3,
    DBase4,
    FoxPro,
}

/// Random-access reader over a memo file.
#[derive(Debug)]
pub struct MemoFile<M> {
    reader: M,
    format: MemoFormat,
    block_size: u64,
}

impl<M: Read + Seek> MemoFile<M> {
    /// Reads the memo header and prepares block access.
    ///
    /// # Errors
    /// Returns a `Source` error if the header cannot be read.
    pub fn new(mut reader: M, format: MemoFormat) -> Result<Self> {
        let mut header = [0u8; 32];
        reader
            .seek(SeekFrom::Start(0))
            .and_then(|_| reader.read_exact(&mut header))
            .map_err(|e| DbfCopyError::source_failed("Failed to read memo header", e))?;

        let block_size = match format {
            MemoFormat::DBase3 => DBASE3_BLOCK_SIZE,
            MemoFormat::DBase4 => match u64::from(u16::from_le_bytes([header[20], header[21]])) {
                0 => DBASE3_BLOCK_SIZE,
                size => size,
            },
            MemoFormat::FoxPro => match u64::from(u16::from_be_bytes([header[6], header[7]])) {
                0 => FOXPRO_DEFAULT_BLOCK_SIZE,
                size => size,
            },
        };

        Ok(Self {
            reader,
            format,
            block_size,
        })
    }

    pub fn format(&self) -> MemoFormat {
        self.format
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Reads the memo stored at `block`. Block 0 means "no memo".
    ///
    /// # Errors
    /// Returns a `Source` error when the block lies outside the file or its
    /// entry header is corrupt.
    pub fn read(&mut self, block: u64) -> Result<Option<Vec<u8>>> {
        if block == 0 {
            return Ok(None);
        }
        let offset = block.checked_mul(self.block_size).ok_or_else(|| {
            DbfCopyError::malformed_source("memo file", format!("block {} out of range", block))
        })?;
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| DbfCopyError::source_failed(format!("Failed to seek to memo block {}", block), e))?;

        let data = match self.format {
            MemoFormat::FoxPro => self.read_foxpro_entry(block)?,
            MemoFormat::DBase4 => self.read_dbase4_entry(block)?,
            MemoFormat::DBase3 => self.read_terminated()?,
        };
        Ok(Some(data))
    }

    fn read_foxpro_entry(&mut self, block: u64) -> Result<Vec<u8>> {
        let mut entry = [0u8; 8];
        self.reader
            .read_exact(&mut entry)
            .map_err(|e| DbfCopyError::source_failed(format!("Failed to read memo block {}", block), e))?;
        let length = u64::from(u32::from_be_bytes([entry[4], entry[5], entry[6], entry[7]]));
        self.read_exact_length(block, length)
    }

    fn read_dbase4_entry(&mut self, block: u64) -> Result<Vec<u8>> {
        let mut entry = [0u8; 8];
        self.reader
            .read_exact(&mut entry)
            .map_err(|e| DbfCopyError::source_failed(format!("Failed to read memo block {}", block), e))?;
        if entry[..4] != DBASE4_ENTRY_MARKER {
            // Files written by dBase III tools but flagged as dBase IV
            self.reader
                .seek(SeekFrom::Current(-8))
                .map_err(|e| DbfCopyError::source_failed("Failed to rewind memo block", e))?;
            return self.read_terminated();
        }
        let length = u64::from(u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]));
        self.read_exact_length(block, length.saturating_sub(8))
    }

    fn read_exact_length(&mut self, block: u64, length: u64) -> Result<Vec<u8>> {
        if length > MAX_MEMO_LENGTH {
            return Err(DbfCopyError::malformed_source(
                "memo file",
                format!("memo block {} declares {} bytes", block, length),
            ));
        }
        let mut data = Vec::new();
        let read = self
            .reader
            .by_ref()
            .take(length)
            .read_to_end(&mut data)
            .map_err(|e| DbfCopyError::source_failed(format!("Failed to read memo block {}", block), e))?;
        if (read as u64) < length {
            return Err(DbfCopyError::malformed_source(
                "memo file",
                format!("memo block {} is truncated", block),
            ));
        }
        Ok(data)
    }

    fn read_terminated(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut chunk = [0u8; DBASE3_BLOCK_SIZE as usize];
        loop {
            let read = match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(DbfCopyError::source_failed("Failed to read memo text", e)),
            };
            if let Some(end) = chunk[..read].iter().position(|&b| b == END_OF_TEXT) {
                data.extend_from_slice(&chunk[..end]);
                break;
            }
            data.extend_from_slice(&chunk[..read]);
            if data.len() as u64 > MAX_MEMO_LENGTH {
                return Err(DbfCopyError::malformed_source(
                    "memo file",
                    "unterminated memo text",
                ));
            }
        }
        Ok(data)
    }
}

/// Finds the memo file next to a table, preferring the layout the table version implies.
///
/// Returns the path and the format to read it with.
pub fn find_memo_file(table_path: &Path, version: u8) -> Option<(PathBuf, MemoFormat)> {
    let foxpro = matches!(version, 0x30 | 0x31 | 0x32 | 0xF5 | 0xFB);
    let dbase4 = matches!(version, 0x8B | 0xCB);
    let candidates: &[&str] = if foxpro {
        &["fpt", "FPT", "dbt", "DBT"]
    } else {
        &["dbt", "DBT", "fpt", "FPT"]
    };

    candidates.iter().find_map(|extension| {
        let path = table_path.with_extension(extension);
        if !path.is_file() {
            return None;
        }
        let format = if extension.eq_ignore_ascii_case("fpt") {
            MemoFormat::FoxPro
        } else if dbase4 {
            MemoFormat::DBase4
        } else {
            MemoFormat::DBase3
        };
        Some((path, format))
    })
}
