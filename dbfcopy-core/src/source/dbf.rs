//! dBase III/IV and (Visual) FoxPro table reader.
//!
//! Reads the fixed header and field descriptor array up front, then
//! streams records one at a time. Character data is decoded with the
//! table's code page (language driver byte) unless an explicit encoding
//! is configured.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use encoding_rs::Encoding;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::RecordSource;
use super::memo::{self, MemoFile};
use crate::Result;
use crate::error::DbfCopyError;
use crate::models::{ColumnSchema, FieldValue, SourceType};

const HEADER_LENGTH: usize = 32;
const DESCRIPTOR_LENGTH: usize = 32;
const FIELD_TERMINATOR: u8 = 0x0D;
const END_OF_FILE: u8 = 0x1A;
const DELETED: u8 = b'*';
const SYSTEM_FIELD_FLAG: u8 = 0x01;
/// Julian day number of 0001-01-01 minus one
const JULIAN_DAY_OFFSET: i32 = 1_721_425;
const MILLIS_PER_DAY: i32 = 86_400_000;

/// Options controlling how a table is read.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbfOptions {
    /// Skip records carrying the deletion marker
    pub skip_deleted: bool,
    /// Code page override; `None` uses the table's language driver
    pub encoding: Option<&'static Encoding>,
}

impl DbfOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_skip_deleted(mut self, skip_deleted: bool) -> Self {
        self.skip_deleted = skip_deleted;
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Sets the encoding from a WHATWG label such as `cp866` or `windows-1251`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for labels encoding_rs does not know.
    pub fn with_encoding_label(self, label: &str) -> Result<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
            DbfCopyError::invalid_argument(format!("Unknown encoding label '{}'", label))
        })?;
        Ok(self.with_encoding(encoding))
    }
}

/// Maps a dBase language driver id to its code page.
pub fn encoding_for_language_driver(id: u8) -> Option<&'static Encoding> {
    match id {
        0x01 | 0x02 | 0x03 | 0x57 | 0x58 | 0x59 => Some(encoding_rs::WINDOWS_1252),
        0x26 | 0x65 => Some(encoding_rs::IBM866),
        0x13 | 0x7B => Some(encoding_rs::SHIFT_JIS),
        0x4D | 0x7A => Some(encoding_rs::GBK),
        0x4E | 0x79 => Some(encoding_rs::EUC_KR),
        0x4F | 0x78 => Some(encoding_rs::BIG5),
        0x7C => Some(encoding_rs::WINDOWS_874),
        0x7D => Some(encoding_rs::WINDOWS_1255),
        0x7E => Some(encoding_rs::WINDOWS_1256),
        0xC8 => Some(encoding_rs::WINDOWS_1250),
        0xC9 => Some(encoding_rs::WINDOWS_1251),
        0xCA => Some(encoding_rs::WINDOWS_1254),
        0xCB => Some(encoding_rs::WINDOWS_1253),
        _ => None,
    }
}

/// Fixed table header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbfHeader {
    pub version: u8,
    pub last_update: Option<NaiveDate>,
    pub record_count: u32,
    pub header_length: u16,
    pub record_length: u16,
    pub language_driver: u8,
}

impl DbfHeader {
    /// Parses the 32-byte table header.
    ///
    /// # Errors
    /// Returns a `Source` error for unknown version bytes or lengths that
    /// cannot describe a table.
    pub fn parse(bytes: &[u8; HEADER_LENGTH]) -> Result<Self> {
        let version = bytes[0];
        if !is_known_version(version) {
            return Err(DbfCopyError::malformed_source(
                "table header",
                format!("unrecognized version byte 0x{:02X}", version),
            ));
        }

        let header = Self {
            version,
            last_update: NaiveDate::from_ymd_opt(
                1900 + i32::from(bytes[1]),
                u32::from(bytes[2]),
                u32::from(bytes[3]),
            ),
            record_count: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            header_length: u16::from_le_bytes([bytes[8], bytes[9]]),
            record_length: u16::from_le_bytes([bytes[10], bytes[11]]),
            language_driver: bytes[29],
        };

        if usize::from(header.header_length) < HEADER_LENGTH + 1 || header.record_length == 0 {
            return Err(DbfCopyError::malformed_source(
                "table header",
                format!(
                    "header length {} / record length {} is invalid",
                    header.header_length, header.record_length
                ),
            ));
        }
        Ok(header)
    }

    pub fn is_visual_foxpro(&self) -> bool {
        matches!(self.version, 0x30..=0x32)
    }
}

fn is_known_version(version: u8) -> bool {
    matches!(
        version,
        0x02 | 0x03 | 0x04 | 0x05 | 0x30 | 0x31 | 0x32 | 0x43 | 0x63 | 0x83 | 0x8B | 0x8E | 0xCB | 0xF5 | 0xFB
    )
}

#[derive(Debug, Clone)]
struct FieldDescriptor {
    name: String,
    tag: u8,
    length: usize,
    decimal_count: u8,
    /// Byte offset within a record, deletion flag included
    offset: usize,
    hidden: bool,
}

impl FieldDescriptor {
    fn parse(bytes: &[u8; DESCRIPTOR_LENGTH], offset: usize, visual_foxpro: bool) -> Self {
        let name_end = bytes[..11].iter().position(|&b| b == 0).unwrap_or(11);
        let name = String::from_utf8_lossy(&bytes[..name_end]).trim().to_string();
        let tag = bytes[11].to_ascii_uppercase();
        let (length, decimal_count) = if tag == b'C' {
            // Clipper and FoxPro store the high byte of long character fields in the decimals slot
            (usize::from(bytes[16]) | (usize::from(bytes[17]) << 8), 0)
        } else {
            (usize::from(bytes[16]), bytes[17])
        };
        let hidden = tag == b'0' || (visual_foxpro && bytes[18] & SYSTEM_FIELD_FLAG != 0);

        Self {
            name,
            tag,
            length,
            decimal_count,
            offset,
            hidden,
        }
    }

    fn column_schema(&self, visual_foxpro: bool) -> ColumnSchema {
        let length = u32::try_from(self.length).unwrap_or(u32::MAX);
        let (source_type, length, decimal_count) = match self.tag {
            b'C' => (SourceType::String, length, 0),
            b'M' => (SourceType::Memo, length, 0),
            b'N' | b'F' if self.decimal_count == 0 && length < 10 => (SourceType::Int32, length, 0),
            b'N' | b'F' if self.decimal_count == 0 => (SourceType::Int64, length, 0),
            b'N' | b'F' => (SourceType::Decimal, length, self.decimal_count),
            b'I' => (SourceType::Int32, length, 0),
            b'L' => (SourceType::Boolean, length, 0),
            b'D' | b'T' => (SourceType::DateTime, length, 0),
            b'Y' => (SourceType::Decimal, 19, 4),
            tag => (
                SourceType::Other(unmapped_type_name(tag, visual_foxpro)),
                length,
                self.decimal_count,
            ),
        };
        ColumnSchema::new(&self.name, source_type)
            .with_length(length)
            .with_decimal_count(decimal_count)
    }
}

fn unmapped_type_name(tag: u8, visual_foxpro: bool) -> String {
    match tag {
        b'B' if visual_foxpro => "Double".to_string(),
        b'B' => "Binary".to_string(),
        b'O' => "Double".to_string(),
        b'G' => "General".to_string(),
        b'P' => "Picture".to_string(),
        b'V' => "Varchar".to_string(),
        b'Q' => "Varbinary".to_string(),
        b'W' => "Blob".to_string(),
        b'+' => "Autoincrement".to_string(),
        b'@' => "Timestamp".to_string(),
        other => format!("Unknown('{}')", char::from(other)),
    }
}

/// Streaming reader over a dBase table.
pub struct DbfReader<R, M = File> {
    reader: R,
    memo: Option<MemoFile<M>>,
    header: DbfHeader,
    fields: Vec<FieldDescriptor>,
    columns: Vec<ColumnSchema>,
    encoding: &'static Encoding,
    skip_deleted: bool,
    buffer: Vec<u8>,
    position: u32,
    deleted_skipped: u64,
    finished: bool,
}

impl<R, M> std::fmt::Debug for DbfReader<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbfReader")
            .field("header", &self.header)
            .field("columns", &self.columns)
            .field("encoding", &self.encoding.name())
            .field("has_memo", &self.memo.is_some())
            .field("position", &self.position)
            .finish()
    }
}

impl DbfReader<BufReader<File>, File> {
    /// Opens a table and its memo file, if it has memo columns.
    ///
    /// # Errors
    /// Returns `Io` if the table cannot be opened and `Source` if its header
    /// is malformed.
    pub fn open(path: impl AsRef<Path>, options: DbfOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| DbfCopyError::io(format!("Failed to open {}", path.display()), e))?;
        let mut reader = BufReader::new(file);
        let (header, fields) = read_table_header(&mut reader)?;

        let memo = if fields.iter().any(|field| field.tag == b'M') {
            match memo::find_memo_file(path, header.version) {
                Some((memo_path, format)) => {
                    debug!("Reading memo values from {}", memo_path.display());
                    let file = File::open(&memo_path).map_err(|e| {
                        DbfCopyError::io(format!("Failed to open {}", memo_path.display()), e)
                    })?;
                    Some(MemoFile::new(file, format)?)
                }
                None => None,
            }
        } else {
            None
        };

        Ok(Self::assemble(reader, memo, header, fields, options))
    }
}

impl<R: Read, M: Read + Seek> DbfReader<R, M> {
    /// Builds a reader over an already opened table stream.
    ///
    /// # Errors
    /// Returns a `Source` error if the header is malformed.
    pub fn from_reader(mut reader: R, memo: Option<MemoFile<M>>, options: DbfOptions) -> Result<Self> {
        let (header, fields) = read_table_header(&mut reader)?;
        Ok(Self::assemble(reader, memo, header, fields, options))
    }

    fn assemble(
        reader: R,
        memo: Option<MemoFile<M>>,
        header: DbfHeader,
        fields: Vec<FieldDescriptor>,
        options: DbfOptions,
    ) -> Self {
        let visual_foxpro = header.is_visual_foxpro();
        let fields: Vec<FieldDescriptor> = fields.into_iter().filter(|field| !field.hidden).collect();
        let columns = fields
            .iter()
            .map(|field| field.column_schema(visual_foxpro))
            .collect();

        if memo.is_none() && fields.iter().any(|field| field.tag == b'M') {
            warn!("Memo file not found; memo values will be loaded as NULL");
        }

        let encoding = options
            .encoding
            .or_else(|| encoding_for_language_driver(header.language_driver))
            .unwrap_or(encoding_rs::WINDOWS_1252);
        debug!(
            "Table version 0x{:02X}, {} records, code page {}",
            header.version,
            header.record_count,
            encoding.name()
        );

        Self {
            reader,
            memo,
            buffer: vec![0; usize::from(header.record_length)],
            header,
            fields,
            columns,
            encoding,
            skip_deleted: options.skip_deleted,
            position: 0,
            deleted_skipped: 0,
            finished: false,
        }
    }

    pub fn header(&self) -> &DbfHeader {
        &self.header
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Number of deleted records skipped so far
    pub fn deleted_skipped(&self) -> u64 {
        self.deleted_skipped
    }

    fn read_next(&mut self) -> Result<Option<Vec<FieldValue>>> {
        loop {
            if self.position >= self.header.record_count {
                return Ok(None);
            }

            let filled = fill(&mut self.reader, &mut self.buffer)?;
            if filled == 0 || self.buffer[0] == END_OF_FILE {
                if self.position < self.header.record_count {
                    warn!(
                        "Table declares {} records but ends after {}",
                        self.header.record_count, self.position
                    );
                }
                return Ok(None);
            }
            if filled < self.buffer.len() {
                return Err(DbfCopyError::malformed_source(
                    "table data",
                    format!("record {} is truncated", u64::from(self.position) + 1),
                ));
            }
            self.position += 1;

            if self.buffer[0] == DELETED && self.skip_deleted {
                self.deleted_skipped += 1;
                continue;
            }

            let mut values = Vec::with_capacity(self.fields.len());
            for field in &self.fields {
                let raw = &self.buffer[field.offset..field.offset + field.length];
                values.push(decode_value(field, raw, self.encoding, &mut self.memo)?);
            }
            return Ok(Some(values));
        }
    }
}

impl<R: Read, M: Read + Seek> RecordSource for DbfReader<R, M> {
    fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    fn record_count(&self) -> u64 {
        u64::from(self.header.record_count)
    }

    fn next_record(&mut self) -> Option<Result<Vec<FieldValue>>> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(values)) => Some(Ok(values)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read, M: Read + Seek> Iterator for DbfReader<R, M> {
    type Item = Result<Vec<FieldValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

fn read_table_header<R: Read>(reader: &mut R) -> Result<(DbfHeader, Vec<FieldDescriptor>)> {
    let mut bytes = [0u8; HEADER_LENGTH];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| DbfCopyError::source_failed("Failed to read table header", e))?;
    let header = DbfHeader::parse(&bytes)?;
    let visual_foxpro = header.is_visual_foxpro();
    let header_length = usize::from(header.header_length);

    let mut fields = Vec::new();
    let mut consumed = HEADER_LENGTH;
    let mut offset = 1;
    loop {
        let mut descriptor = [0u8; DESCRIPTOR_LENGTH];
        reader
            .read_exact(&mut descriptor[..1])
            .map_err(|e| DbfCopyError::source_failed("Failed to read field descriptors", e))?;
        consumed += 1;
        if descriptor[0] == FIELD_TERMINATOR {
            break;
        }
        if consumed + DESCRIPTOR_LENGTH - 1 >= header_length {
            return Err(DbfCopyError::malformed_source(
                "table header",
                "field descriptor array is not terminated",
            ));
        }
        reader
            .read_exact(&mut descriptor[1..])
            .map_err(|e| DbfCopyError::source_failed("Failed to read field descriptors", e))?;
        consumed += DESCRIPTOR_LENGTH - 1;

        let field = FieldDescriptor::parse(&descriptor, offset, visual_foxpro);
        offset += field.length;
        fields.push(field);
    }

    if offset > usize::from(header.record_length) {
        return Err(DbfCopyError::malformed_source(
            "table header",
            format!(
                "fields span {} bytes but records are {} bytes",
                offset, header.record_length
            ),
        ));
    }

    // Visual FoxPro keeps a backlink area between the descriptors and the data
    let remaining = header_length.saturating_sub(consumed) as u64;
    let skipped = io::copy(&mut reader.by_ref().take(remaining), &mut io::sink())
        .map_err(|e| DbfCopyError::source_failed("Failed to read table header", e))?;
    if skipped < remaining {
        return Err(DbfCopyError::malformed_source("table header", "header is truncated"));
    }

    Ok((header, fields))
}

/// Reads until `buffer` is full or the stream ends; returns the bytes read.
fn fill<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DbfCopyError::source_failed("Failed to read table data", e)),
        }
    }
    Ok(filled)
}

fn decode_value<M: Read + Seek>(
    field: &FieldDescriptor,
    raw: &[u8],
    encoding: &'static Encoding,
    memo: &mut Option<MemoFile<M>>,
) -> Result<FieldValue> {
    let value = match field.tag {
        b'C' => FieldValue::Text(decode_text(raw, encoding)),
        b'N' | b'F' => decode_number(field, raw, encoding),
        b'I' => match <[u8; 4]>::try_from(raw) {
            Ok(bytes) => FieldValue::Integer(i64::from(i32::from_le_bytes(bytes))),
            Err(_) => FieldValue::Null,
        },
        b'Y' => match <[u8; 8]>::try_from(raw) {
            Ok(bytes) => FieldValue::Decimal(Decimal::new(i64::from_le_bytes(bytes), 4)),
            Err(_) => FieldValue::Null,
        },
        b'L' => match raw.first() {
            Some(b'T' | b't' | b'Y' | b'y') => FieldValue::Boolean(true),
            Some(b'F' | b'f' | b'N' | b'n') => FieldValue::Boolean(false),
            Some(b'?' | b' ' | 0) | None => FieldValue::Null,
            Some(_) => FieldValue::Text(decode_text(raw, encoding)),
        },
        b'D' => decode_date(raw, encoding),
        b'T' => decode_timestamp(raw),
        b'M' => decode_memo(raw, encoding, memo)?,
        _ => FieldValue::Null,
    };
    Ok(value)
}

fn decode_text(raw: &[u8], encoding: &'static Encoding) -> String {
    let (text, _) = encoding.decode_without_bom_handling(raw);
    text.trim_end_matches([' ', '\0']).to_string()
}

fn ascii_trimmed(raw: &[u8]) -> Option<&str> {
    std::str::from_utf8(raw)
        .ok()
        .map(|text| text.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
}

fn decode_number(field: &FieldDescriptor, raw: &[u8], encoding: &'static Encoding) -> FieldValue {
    let Some(text) = ascii_trimmed(raw) else {
        return FieldValue::Text(decode_text(raw, encoding));
    };
    if text.is_empty() {
        return FieldValue::Null;
    }
    if field.decimal_count == 0 {
        if let Ok(value) = text.parse::<i64>() {
            return FieldValue::Integer(value);
        }
    }
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .map(FieldValue::Decimal)
        .unwrap_or_else(|_| FieldValue::Text(text.to_string()))
}

fn decode_date(raw: &[u8], encoding: &'static Encoding) -> FieldValue {
    let Some(text) = ascii_trimmed(raw) else {
        return FieldValue::Text(decode_text(raw, encoding));
    };
    if text.is_empty() || text.bytes().all(|b| b == b'0') {
        return FieldValue::Null;
    }
    NaiveDate::parse_from_str(text, "%Y%m%d")
        .map(FieldValue::Date)
        .unwrap_or_else(|_| FieldValue::Text(text.to_string()))
}

/// Decodes a FoxPro datetime: julian day number and milliseconds since midnight.
fn decode_timestamp(raw: &[u8]) -> FieldValue {
    let Ok(bytes) = <[u8; 8]>::try_from(raw) else {
        return FieldValue::Null;
    };
    let day = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let millis = i32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if day == 0 {
        return FieldValue::Null;
    }
    julian_to_datetime(day, millis).map_or(FieldValue::Null, FieldValue::DateTime)
}

fn julian_to_datetime(day: i32, millis: i32) -> Option<NaiveDateTime> {
    if !(0..MILLIS_PER_DAY).contains(&millis) {
        return None;
    }
    let date = NaiveDate::from_num_days_from_ce_opt(day.checked_sub(JULIAN_DAY_OFFSET)?)?;
    let millis = u32::try_from(millis).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(millis / 1000, (millis % 1000) * 1_000_000)?;
    Some(date.and_time(time))
}

fn decode_memo<M: Read + Seek>(
    raw: &[u8],
    encoding: &'static Encoding,
    memo: &mut Option<MemoFile<M>>,
) -> Result<FieldValue> {
    let Some(memo) = memo.as_mut() else {
        return Ok(FieldValue::Null);
    };
    let block = match <[u8; 4]>::try_from(raw) {
        // Visual FoxPro stores the block number as a binary integer
        Ok(bytes) => Some(u64::from(u32::from_le_bytes(bytes))),
        Err(_) => ascii_trimmed(raw).and_then(|text| text.parse::<u64>().ok()),
    };
    let Some(block) = block else {
        return Ok(FieldValue::Null);
    };
    Ok(memo
        .read(block)?
        .map_or(FieldValue::Null, |bytes| FieldValue::Text(decode_text(&bytes, encoding))))
}
