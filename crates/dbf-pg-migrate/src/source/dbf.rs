//! dBase / FoxPro table file reader.
//!
//! Reads the field directory and streams fixed-width records as
//! [`RawRecord`]s. Field bytes are handed over untouched (except for the
//! Visual FoxPro binary numeric and datetime types) so the sanitizer decides
//! how to interpret them. Memo fields are resolved through the sibling
//! `.dbt`/`.fpt` file.
//!
//! Layout:
//!
//! Header (32 bytes): version (1) + last update YMD (3) + record count (u32 LE)
//! + header length (u16 LE) + record length (u16 LE) + reserved (20)
//! Field descriptors (32 bytes each) until a 0x0D terminator:
//! name (11, NUL padded) + type (1) + displacement (4) + length (1) + decimals (1) + reserved (14)
//! Records start at `header length`: deletion flag (1, `*` = deleted) + field data.
//! An optional 0x1A byte marks the end of data.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Buf;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use super::memo::{is_memo_field, MemoFile, MemoReader};
use super::types::{FieldDescriptor, RawRecord, RawValue};
use crate::error::{MigrateError, Result};

/// Fixed header size.
const HEADER_SIZE: usize = 32;

/// Size of one field descriptor.
const DESCRIPTOR_SIZE: usize = 32;

/// Terminates the field directory.
const FIELD_TERMINATOR: u8 = 0x0D;

/// Marks the end of record data.
const EOF_MARKER: u8 = 0x1A;

/// Deletion flag of a deleted record.
const DELETED_FLAG: u8 = b'*';

/// Visual FoxPro `_NullFlags` system column type.
const NULL_FLAGS_TYPE: u8 = b'0';

/// Julian day number of 0001-01-01 minus one (`num_days_from_ce` origin).
const JULIAN_DAY_CE_OFFSET: i32 = 1_721_425;

/// Position of a visible field inside a record.
#[derive(Debug, Clone, Copy)]
struct FieldSlot {
    offset: usize,
    length: usize,
    code: u8,
    memo: bool,
}

/// An opened source table: header metadata and field directory.
#[derive(Debug, Clone)]
pub struct DbfFile {
    path: PathBuf,
    version: u8,
    record_count: u32,
    header_length: u16,
    record_length: u16,
    fields: Vec<FieldDescriptor>,
    slots: Arc<[FieldSlot]>,
    memo: Option<MemoFile>,
}

impl DbfFile {
    /// Open a file and parse its header and field directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; HEADER_SIZE];
        read_exact_or(&mut reader, &mut header, path, "file is shorter than a DBF header")?;

        let mut buf = &header[..];
        let version = buf.get_u8();
        buf.advance(3);
        let record_count = buf.get_u32_le();
        let header_length = buf.get_u16_le();
        let record_length = buf.get_u16_le();

        if (header_length as usize) < HEADER_SIZE + 1 {
            return Err(MigrateError::source(
                path,
                format!("invalid header length {}", header_length),
            ));
        }
        if record_length == 0 {
            return Err(MigrateError::source(path, "record length is zero"));
        }

        let mut directory = vec![0u8; header_length as usize - HEADER_SIZE];
        read_exact_or(&mut reader, &mut directory, path, "field directory is truncated")?;

        let (fields, slots) = parse_directory(&directory, record_length as usize, path)?;

        let memo = if slots.iter().any(|slot| slot.memo) {
            let memo = MemoFile::find(path)?;
            if memo.is_none() {
                warn!("{}: memo file not found, memo fields load as NULL", path.display());
            }
            memo
        } else {
            None
        };

        debug!(
            "{}: version 0x{:02x}, {} records, {} fields",
            path.display(),
            version,
            record_count,
            fields.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            version,
            record_count,
            header_length,
            record_length,
            fields,
            slots: slots.into(),
            memo,
        })
    }

    /// Version byte (0x03 dBase III, 0x30 Visual FoxPro, ...).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Record count from the header, deleted records included.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Visible field descriptors in file order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Stream the active (non-deleted) records.
    pub fn records(&self) -> Result<DbfRecords> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(self.header_length as u64))?;

        let names: Arc<[String]> = self.fields.iter().map(|f| f.name.clone()).collect();
        let memo = self.memo.as_ref().map(MemoFile::reader).transpose()?;

        Ok(DbfRecords {
            reader,
            memo,
            path: self.path.clone(),
            names,
            slots: self.slots.clone(),
            buf: vec![0u8; self.record_length as usize],
            remaining: self.record_count,
            done: false,
        })
    }

    /// Count active records by scanning the file.
    pub fn active_record_count(&self) -> Result<u64> {
        let mut count = 0u64;
        for record in self.records()? {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

/// Lazy, single-pass iterator over the active records of a [`DbfFile`].
pub struct DbfRecords {
    reader: BufReader<File>,
    memo: Option<MemoReader>,
    path: PathBuf,
    names: Arc<[String]>,
    slots: Arc<[FieldSlot]>,
    buf: Vec<u8>,
    remaining: u32,
    done: bool,
}

impl DbfRecords {
    fn read_record(&mut self) -> Result<Option<bool>> {
        // The first byte is read on its own so a bare EOF marker ends the table.
        let mut flag = [0u8; 1];
        match self.reader.read_exact(&mut flag) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        if flag[0] == EOF_MARKER {
            return Ok(None);
        }

        self.buf[0] = flag[0];
        let rest = &mut self.buf[1..];
        match self.reader.read_exact(rest) {
            Ok(()) => Ok(Some(flag[0] != DELETED_FLAG)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(MigrateError::source(
                &self.path,
                format!("truncated record ({} records left)", self.remaining),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn decode(&mut self) -> RawRecord {
        let Self {
            buf,
            slots,
            memo,
            names,
            ..
        } = self;
        let values = slots
            .iter()
            .map(|slot| {
                let bytes = &buf[slot.offset..slot.offset + slot.length];
                match (slot.memo, memo.as_mut()) {
                    (true, Some(memo)) => memo.resolve(bytes),
                    (true, None) => RawValue::Absent,
                    (false, _) => decode_field(slot.code, bytes),
                }
            })
            .collect();
        RawRecord::new(names.clone(), values)
    }
}

impl Iterator for DbfRecords {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.remaining > 0 {
            self.remaining -= 1;
            match self.read_record() {
                Ok(Some(true)) => return Some(Ok(self.decode())),
                Ok(Some(false)) => continue,
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Parse the field directory that follows the fixed header.
fn parse_directory(
    directory: &[u8],
    record_length: usize,
    path: &Path,
) -> Result<(Vec<FieldDescriptor>, Vec<FieldSlot>)> {
    let mut fields = Vec::new();
    let mut slots = Vec::new();
    let mut offset = 1; // deletion flag

    for chunk in directory.chunks(DESCRIPTOR_SIZE) {
        if chunk[0] == FIELD_TERMINATOR {
            break;
        }
        if chunk.len() < DESCRIPTOR_SIZE {
            return Err(MigrateError::source(path, "field directory is not terminated"));
        }

        let name_bytes = &chunk[..11];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(11);
        let name: String = name_bytes[..name_len]
            .iter()
            .map(|&b| b as char)
            .collect::<String>()
            .trim()
            .to_string();
        let code = chunk[11];
        let length = chunk[16];
        let decimal_count = chunk[17];

        let slot = FieldSlot {
            offset,
            length: length as usize,
            code,
            memo: is_memo_field(code, length),
        };
        offset += length as usize;
        if offset > record_length {
            return Err(MigrateError::source(
                path,
                format!(
                    "field {} ends at byte {} past record length {}",
                    name, offset, record_length
                ),
            ));
        }

        if code == NULL_FLAGS_TYPE {
            continue;
        }

        fields.push(FieldDescriptor::new(name, code, length, decimal_count));
        slots.push(slot);
    }

    Ok((fields, slots))
}

/// Turn one field's bytes into a raw value.
///
/// Visual FoxPro stores integers, doubles, currency and datetimes in binary;
/// those are decoded here. Everything else stays raw bytes.
fn decode_field(code: u8, bytes: &[u8]) -> RawValue {
    let mut buf = bytes;
    match (code.to_ascii_uppercase(), bytes.len()) {
        (b'I', 4) => RawValue::Number(buf.get_i32_le() as f64),
        (b'B', 8) => RawValue::Number(buf.get_f64_le()),
        (b'Y', 8) => RawValue::Number(buf.get_i64_le() as f64 / 10_000.0),
        (b'T', 8) => {
            let day = buf.get_i32_le();
            let millis = buf.get_i32_le();
            decode_datetime(day, millis).map_or(RawValue::Absent, |ts| {
                RawValue::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            })
        }
        _ => RawValue::Binary(bytes.to_vec()),
    }
}

/// Julian day number + milliseconds since midnight.
fn decode_datetime(day: i32, millis: i32) -> Option<NaiveDateTime> {
    if day <= 0 || !(0..86_400_000).contains(&millis) {
        return None;
    }
    let date = NaiveDate::from_num_days_from_ce_opt(day.checked_sub(JULIAN_DAY_CE_OFFSET)?)?;
    if date.year() < 1 {
        return None;
    }
    let millis = millis as u32;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(millis / 1000, (millis % 1000) * 1_000_000)?;
    Some(date.and_time(time))
}

fn read_exact_or(reader: &mut impl Read, buf: &mut [u8], path: &Path, message: &str) -> Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(MigrateError::source(path, message)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::ValueSanitizer;
    use crate::source::testing::DbfBuilder;
    use crate::source::FieldType;
    use crate::target::SqlValue;

    #[test]
    fn test_reads_field_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = DbfBuilder::new()
            .field("CODIGO", b'N', 5, 0)
            .field("NOMBRE", b'C', 20, 0)
            .field("ACTIVO", b'L', 1, 0)
            .write(dir.path(), "CLIENTE.DBF");

        let dbf = DbfFile::open(&path).unwrap();
        let fields = dbf.fields();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[0].name, "CODIGO");
        assert_eq!(fields[0].field_type, FieldType::Numeric);
        assert_eq!(fields[0].length, 5);
        assert_eq!(fields[1].field_type, FieldType::Other(b'C'));
        assert_eq!(fields[2].field_type, FieldType::Logical);
        assert_eq!(dbf.record_count(), 0);
    }

    #[test]
    fn test_streams_records_and_skips_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = DbfBuilder::new()
            .field("CODIGO", b'N', 5, 0)
            .field("NOMBRE", b'C', 10, 0)
            .row(&["1", "ANA"])
            .deleted_row(&["2", "BORRADO"])
            .row(&["3", "LUIS"])
            .write(dir.path(), "cliente.dbf");

        let dbf = DbfFile::open(&path).unwrap();
        assert_eq!(dbf.record_count(), 3);

        let records: Vec<RawRecord> = dbf.records().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].get("CODIGO"),
            Some(&RawValue::Binary(b"    1".to_vec()))
        );
        assert_eq!(
            records[1].get("NOMBRE"),
            Some(&RawValue::Binary(b"LUIS      ".to_vec()))
        );
        assert_eq!(dbf.active_record_count().unwrap(), 2);
    }

    #[test]
    fn test_stops_at_eof_marker() {
        let dir = tempfile::tempdir().unwrap();
        // Header claims more records than are stored.
        let path = DbfBuilder::new()
            .field("X", b'C', 2, 0)
            .row(&["a"])
            .record_count_override(5)
            .write(dir.path(), "short.dbf");

        let dbf = DbfFile::open(&path).unwrap();
        let records: Vec<_> = dbf.records().unwrap().collect();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_ok());
    }

    #[test]
    fn test_truncated_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = DbfBuilder::new()
            .field("X", b'C', 10, 0)
            .row(&["abcdefghij"])
            .build();
        // Drop EOF marker and half of the only record.
        bytes.truncate(bytes.len() - 6);
        let path = dir.path().join("broken.dbf");
        std::fs::write(&path, bytes).unwrap();

        let dbf = DbfFile::open(&path).unwrap();
        let mut records = dbf.records().unwrap();
        assert!(matches!(records.next(), Some(Err(MigrateError::Source { .. }))));
        assert!(records.next().is_none());
    }

    #[test]
    fn test_short_file_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.dbf");
        std::fs::write(&path, [0x03, 0x7b]).unwrap();

        assert!(matches!(
            DbfFile::open(&path),
            Err(MigrateError::Source { .. })
        ));
    }

    #[test]
    fn test_decodes_foxpro_binary_numbers() {
        assert_eq!(decode_field(b'I', &42i32.to_le_bytes()), RawValue::Number(42.0));
        assert_eq!(decode_field(b'B', &2.5f64.to_le_bytes()), RawValue::Number(2.5));
        assert_eq!(
            decode_field(b'Y', &123_4500i64.to_le_bytes()),
            RawValue::Number(123.45)
        );
        assert_eq!(decode_field(b'C', b"ab"), RawValue::Binary(b"ab".to_vec()));
    }

    #[test]
    fn test_decodes_foxpro_datetime() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        let day = date.num_days_from_ce() + JULIAN_DAY_CE_OFFSET;
        let millis: i32 = (10 * 3600 + 30 * 60) * 1000;

        let mut bytes = day.to_le_bytes().to_vec();
        bytes.extend_from_slice(&millis.to_le_bytes());
        assert_eq!(
            decode_field(b'T', &bytes),
            RawValue::Text("2023-12-31 10:30:00".to_string())
        );

        // 1970-01-01 is Julian day 2440588.
        let mut bytes = 2_440_588i32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1_500i32.to_le_bytes());
        assert_eq!(
            decode_field(b'T', &bytes),
            RawValue::Text("1970-01-01 00:00:01.500".to_string())
        );

        assert_eq!(decode_field(b'T', &[0u8; 8]), RawValue::Absent);
        assert_eq!(decode_field(b'T', b"20231231"), RawValue::Absent);
    }

    #[test]
    fn test_resolves_memo_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = DbfBuilder::new()
            .field("CODIGO", b'N', 3, 0)
            .field("NOTAS", b'M', 10, 0)
            .row(&["1", "1"])
            .row(&["2", ""])
            .row(&["3", "2"])
            .row(&["4", "77"])
            .memos(&["Cliente preferente", "Pago a 30 d\u{ed}as"])
            .write(dir.path(), "CLIENTE.DBF");

        let dbf = DbfFile::open(&path).unwrap();
        let records: Vec<RawRecord> = dbf.records().unwrap().map(|r| r.unwrap()).collect();
        let notas: Vec<&RawValue> = records.iter().map(|r| r.value(1)).collect();
        assert_eq!(
            notas,
            vec![
                &RawValue::Binary(b"Cliente preferente".to_vec()),
                &RawValue::Absent,
                &RawValue::Binary("Pago a 30 d\u{ed}as".as_bytes().to_vec()),
                &RawValue::Absent,
            ]
        );

        let row = ValueSanitizer::default().sanitize_record(&records[0], dbf.fields());
        assert_eq!(row[1], SqlValue::Text("Cliente preferente".to_string()));
        let row = ValueSanitizer::default().sanitize_record(&records[1], dbf.fields());
        assert_eq!(row[1], SqlValue::Null);
    }

    #[test]
    fn test_memo_without_memo_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = DbfBuilder::new()
            .field("NOTAS", b'M', 10, 0)
            .row(&["1"])
            .write(dir.path(), "sin_memo.dbf");

        let dbf = DbfFile::open(&path).unwrap();
        let record = dbf.records().unwrap().next().unwrap().unwrap();
        assert_eq!(record.value(0), &RawValue::Absent);
    }

    #[test]
    fn test_hides_null_flags_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = DbfBuilder::new()
            .field("NOMBRE", b'C', 4, 0)
            .field("_NullFlags", b'0', 1, 0)
            .field("EDAD", b'N', 3, 0)
            .raw_row(vec![b"JUAN".to_vec(), vec![0u8], b" 42".to_vec()])
            .write(dir.path(), "vfp.dbf");

        let dbf = DbfFile::open(&path).unwrap();
        let names: Vec<&str> = dbf.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["NOMBRE", "EDAD"]);

        let record = dbf.records().unwrap().next().unwrap().unwrap();
        assert_eq!(record.get("EDAD"), Some(&RawValue::Binary(b" 42".to_vec())));
    }
}
