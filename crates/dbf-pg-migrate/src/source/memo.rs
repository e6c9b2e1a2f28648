//! Memo companion files (`.dbt`, `.fpt`).
//!
//! Memo, general and picture fields store a block number in the record; the
//! contents live in a sibling file split into fixed-size blocks.
//!
//! FoxPro `.fpt`: header with block size (u16 BE at offset 6); each memo
//! starts with type (u32 BE) + length (u32 BE) + data.
//! dBase `.dbt`: 512-byte blocks unless the header says otherwise (u16 LE at
//! offset 20). dBase IV blocks start with `FF FF 08 00` + total length
//! (u32 LE, header included); dBase III blocks are text ended by `0x1A`.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Buf;
use tracing::debug;

use super::types::RawValue;
use crate::error::Result;

const FPT_DEFAULT_BLOCK_SIZE: u64 = 64;
const DBT_DEFAULT_BLOCK_SIZE: u64 = 512;
const DB4_BLOCK_SIGNATURE: [u8; 4] = [0xFF, 0xFF, 0x08, 0x00];
const MEMO_END: u8 = 0x1A;
const DB4_FIELD_END: u8 = 0x1F;

/// Whether a field stores a memo block pointer instead of inline data.
///
/// `B` is a double in Visual FoxPro (width 8) and a binary memo in dBase IV
/// (width 10).
pub(crate) fn is_memo_field(code: u8, length: u8) -> bool {
    match code.to_ascii_uppercase() {
        b'M' | b'G' | b'P' => true,
        b'B' => length == 10,
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemoFormat {
    FoxPro,
    DBase,
}

/// A located memo file and its block layout.
#[derive(Debug, Clone)]
pub(crate) struct MemoFile {
    path: PathBuf,
    format: MemoFormat,
    block_size: u64,
}

impl MemoFile {
    /// Find and read the header of the memo file next to `table`.
    pub(crate) fn find(table: &Path) -> Result<Option<Self>> {
        let candidates = [
            ("fpt", MemoFormat::FoxPro),
            ("FPT", MemoFormat::FoxPro),
            ("dbt", MemoFormat::DBase),
            ("DBT", MemoFormat::DBase),
        ];
        let Some((path, format)) = candidates
            .iter()
            .map(|(ext, format)| (table.with_extension(ext), *format))
            .find(|(path, _)| path.is_file())
        else {
            return Ok(None);
        };

        let mut header = Vec::with_capacity(32);
        File::open(&path)?.take(32).read_to_end(&mut header)?;

        let block_size = match format {
            MemoFormat::FoxPro if header.len() >= 8 => (&header[6..8]).get_u16() as u64,
            MemoFormat::DBase if header.len() >= 22 => (&header[20..22]).get_u16_le() as u64,
            _ => 0,
        };
        let block_size = match (block_size, format) {
            (0, MemoFormat::FoxPro) => FPT_DEFAULT_BLOCK_SIZE,
            (0, MemoFormat::DBase) => DBT_DEFAULT_BLOCK_SIZE,
            (size, _) => size,
        };

        debug!(
            "{}: {:?} memo file, block size {}",
            path.display(),
            format,
            block_size
        );
        Ok(Some(Self {
            path,
            format,
            block_size,
        }))
    }

    pub(crate) fn reader(&self) -> Result<MemoReader> {
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        Ok(MemoReader {
            reader: BufReader::new(file),
            path: self.path.clone(),
            format: self.format,
            block_size: self.block_size,
            len,
        })
    }
}

/// Resolves block pointers against an open memo file.
pub(crate) struct MemoReader {
    reader: BufReader<File>,
    path: PathBuf,
    format: MemoFormat,
    block_size: u64,
    len: u64,
}

impl MemoReader {
    /// Memo contents for a pointer field; empty or unresolvable pointers are absent.
    pub(crate) fn resolve(&mut self, pointer: &[u8]) -> RawValue {
        let Some(block) = block_number(pointer) else {
            return RawValue::Absent;
        };
        match self.read_block(block) {
            Ok(Some(data)) => RawValue::Binary(data),
            Ok(None) => {
                debug!("{}: memo block {} is out of range", self.path.display(), block);
                RawValue::Absent
            }
            Err(e) => {
                debug!("{}: memo block {}: {}", self.path.display(), block, e);
                RawValue::Absent
            }
        }
    }

    fn read_block(&mut self, block: u64) -> io::Result<Option<Vec<u8>>> {
        let Some(start) = block.checked_mul(self.block_size) else {
            return Ok(None);
        };
        if start >= self.len {
            return Ok(None);
        }
        self.reader.seek(SeekFrom::Start(start))?;

        match self.format {
            MemoFormat::FoxPro => {
                let mut head = [0u8; 8];
                self.reader.read_exact(&mut head)?;
                let length = (&head[4..]).get_u32() as u64;
                self.read_body(start + 8, length)
            }
            MemoFormat::DBase => {
                let first = self.next_block()?;
                if first.len() >= 8 && first[..4] == DB4_BLOCK_SIGNATURE {
                    let length = (&first[4..8]).get_u32_le() as u64;
                    let data = self.read_body(start + 8, length.saturating_sub(8))?;
                    return Ok(data.map(|mut data| {
                        let end = data.iter().position(|&b| b == DB4_FIELD_END || b == MEMO_END);
                        if let Some(end) = end {
                            data.truncate(end);
                        }
                        data
                    }));
                }

                let mut data = Vec::new();
                let mut chunk = first;
                loop {
                    if let Some(end) = chunk.iter().position(|&b| b == MEMO_END) {
                        data.extend_from_slice(&chunk[..end]);
                        break;
                    }
                    if chunk.is_empty() {
                        break;
                    }
                    data.extend_from_slice(&chunk);
                    chunk = self.next_block()?;
                }
                Ok(Some(data))
            }
        }
    }

    fn read_body(&mut self, offset: u64, length: u64) -> io::Result<Option<Vec<u8>>> {
        if offset.saturating_add(length) > self.len {
            return Ok(None);
        }
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; length as usize];
        self.reader.read_exact(&mut data)?;
        Ok(Some(data))
    }

    fn next_block(&mut self) -> io::Result<Vec<u8>> {
        let mut chunk = Vec::with_capacity(self.block_size as usize);
        (&mut self.reader).take(self.block_size).read_to_end(&mut chunk)?;
        Ok(chunk)
    }
}

/// Block number stored in a record: ASCII digits in dBase files, u32 LE in
/// Visual FoxPro files. Block 0 is the header and means "no memo".
fn block_number(pointer: &[u8]) -> Option<u64> {
    let block = if pointer.len() == 4 {
        (&pointer[..]).get_u32_le() as u64
    } else {
        let text = std::str::from_utf8(pointer)
            .ok()?
            .trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if text.is_empty() {
            return None;
        }
        text.parse().ok()?
    };
    (block > 0).then_some(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memo_field_codes() {
        assert!(is_memo_field(b'M', 10));
        assert!(is_memo_field(b'M', 4));
        assert!(is_memo_field(b'G', 4));
        assert!(is_memo_field(b'B', 10));
        assert!(!is_memo_field(b'B', 8));
        assert!(!is_memo_field(b'C', 10));
    }

    #[test]
    fn test_block_number() {
        assert_eq!(block_number(b"         1"), Some(1));
        assert_eq!(block_number(b"0000000012"), Some(12));
        assert_eq!(block_number(b"          "), None);
        assert_eq!(block_number(b"         0"), None);
        assert_eq!(block_number(b"12ab      "), None);
        assert_eq!(block_number(&3u32.to_le_bytes()), Some(3));
        assert_eq!(block_number(&0u32.to_le_bytes()), None);
    }

    fn memo_at(dir: &Path, file_name: &str, bytes: &[u8]) -> MemoReader {
        let table = dir.join("t.dbf");
        std::fs::write(dir.join(file_name), bytes).unwrap();
        MemoFile::find(&table).unwrap().unwrap().reader().unwrap()
    }

    #[test]
    fn test_dbase3_memo_runs_to_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0u8; 512];
        bytes.extend_from_slice(b"primera linea\r\nsegunda");
        bytes.extend_from_slice(&[MEMO_END, MEMO_END]);
        let mut memo = memo_at(dir.path(), "t.dbt", &bytes);

        assert_eq!(
            memo.resolve(b"         1"),
            RawValue::Binary(b"primera linea\r\nsegunda".to_vec())
        );
        assert_eq!(memo.resolve(b"         9"), RawValue::Absent);
        assert_eq!(memo.resolve(b"          "), RawValue::Absent);
    }

    #[test]
    fn test_dbase4_memo_uses_block_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0u8; 512];
        bytes.extend_from_slice(&DB4_BLOCK_SIGNATURE);
        bytes.extend_from_slice(&(8u32 + 4).to_le_bytes());
        bytes.extend_from_slice(b"nota");
        bytes.extend_from_slice(&[DB4_FIELD_END]);
        let mut memo = memo_at(dir.path(), "t.dbt", &bytes);

        assert_eq!(memo.resolve(b"         1"), RawValue::Binary(b"nota".to_vec()));
    }

    #[test]
    fn test_foxpro_memo() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = vec![0u8; 512];
        bytes[6..8].copy_from_slice(&64u16.to_be_bytes());
        // Block 8 = offset 512.
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&5u32.to_be_bytes());
        bytes.extend_from_slice(b"hola!");
        // Block 9 claims more data than the file holds.
        bytes.resize(576, 0);
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(&500u32.to_be_bytes());
        let mut memo = memo_at(dir.path(), "t.FPT", &bytes);

        assert_eq!(memo.resolve(&8u32.to_le_bytes()), RawValue::Binary(b"hola!".to_vec()));
        assert_eq!(memo.resolve(&9u32.to_le_bytes()), RawValue::Absent);
        assert_eq!(memo.resolve(&0u32.to_le_bytes()), RawValue::Absent);
    }

    #[test]
    fn test_missing_memo_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MemoFile::find(&dir.path().join("t.dbf")).unwrap().is_none());
    }
}
