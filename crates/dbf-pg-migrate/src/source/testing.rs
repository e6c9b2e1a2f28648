//! Builds small DBF files for tests.

use std::path::{Path, PathBuf};

struct FieldSpec {
    name: String,
    code: u8,
    length: u8,
    decimals: u8,
}

/// Writes a dBase III style file with the given fields and rows.
pub(crate) struct DbfBuilder {
    fields: Vec<FieldSpec>,
    rows: Vec<(bool, Vec<Vec<u8>>)>,
    record_count: Option<u32>,
    memos: Vec<String>,
}

impl DbfBuilder {
    pub(crate) fn new() -> Self {
        Self {
            fields: Vec::new(),
            rows: Vec::new(),
            record_count: None,
            memos: Vec::new(),
        }
    }

    pub(crate) fn field(mut self, name: &str, code: u8, length: u8, decimals: u8) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            code,
            length,
            decimals,
        });
        self
    }

    /// Add an active row; values are padded to the field width.
    pub(crate) fn row(mut self, values: &[&str]) -> Self {
        let row = self.pad(values);
        self.rows.push((false, row));
        self
    }

    pub(crate) fn deleted_row(mut self, values: &[&str]) -> Self {
        let row = self.pad(values);
        self.rows.push((true, row));
        self
    }

    /// Add an active row with exact field bytes.
    pub(crate) fn raw_row(mut self, values: Vec<Vec<u8>>) -> Self {
        self.rows.push((false, values));
        self
    }

    /// Store memo texts in a dBase III `.dbt` next to the table; the n-th
    /// memo (from 0) starts at block n + 1 as long as each fits in one block.
    pub(crate) fn memos(mut self, texts: &[&str]) -> Self {
        self.memos = texts.iter().map(|t| t.to_string()).collect();
        self
    }

    pub(crate) fn record_count_override(mut self, count: u32) -> Self {
        self.record_count = Some(count);
        self
    }

    fn pad(&self, values: &[&str]) -> Vec<Vec<u8>> {
        self.fields
            .iter()
            .enumerate()
            .map(|(idx, field)| {
                let value = values.get(idx).copied().unwrap_or("");
                let width = field.length as usize;
                let padded = if field.code == b'N' {
                    format!("{:>width$}", value, width = width)
                } else {
                    format!("{:<width$}", value, width = width)
                };
                let mut bytes = padded.into_bytes();
                bytes.truncate(width);
                bytes
            })
            .collect()
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let header_length = 32 + 32 * self.fields.len() as u16 + 1;
        let record_length = 1 + self.fields.iter().map(|f| f.length as u16).sum::<u16>();
        let record_count = self.record_count.unwrap_or(self.rows.len() as u32);

        let mut out = Vec::new();
        out.push(if self.memos.is_empty() { 0x03 } else { 0x83 });
        out.extend_from_slice(&[124, 1, 15]);
        out.extend_from_slice(&record_count.to_le_bytes());
        out.extend_from_slice(&header_length.to_le_bytes());
        out.extend_from_slice(&record_length.to_le_bytes());
        out.extend_from_slice(&[0u8; 20]);

        for field in &self.fields {
            let mut name = [0u8; 11];
            for (slot, b) in name.iter_mut().zip(field.name.bytes().take(10)) {
                *slot = b;
            }
            out.extend_from_slice(&name);
            out.push(field.code);
            out.extend_from_slice(&[0u8; 4]);
            out.push(field.length);
            out.push(field.decimals);
            out.extend_from_slice(&[0u8; 14]);
        }
        out.push(0x0D);

        for (deleted, values) in &self.rows {
            out.push(if *deleted { b'*' } else { b' ' });
            for value in values {
                out.extend_from_slice(value);
            }
        }
        out.push(0x1A);
        out
    }

    fn build_memo(&self) -> Vec<u8> {
        const BLOCK: usize = 512;
        let mut out = vec![0u8; BLOCK];
        for text in &self.memos {
            let mut block = text.as_bytes().to_vec();
            block.extend_from_slice(&[0x1A, 0x1A]);
            block.resize(block.len().div_ceil(BLOCK) * BLOCK, 0);
            out.extend_from_slice(&block);
        }
        let next_free = (out.len() / BLOCK) as u32;
        out[..4].copy_from_slice(&next_free.to_le_bytes());
        out
    }

    pub(crate) fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        std::fs::write(&path, self.build()).unwrap();
        if !self.memos.is_empty() {
            std::fs::write(path.with_extension("dbt"), self.build_memo()).unwrap();
        }
        path
    }
}
