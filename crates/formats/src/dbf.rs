//! dBASE III attribute codec for shapefile `.dbf` sidecars.

use crate::table::{AttributeTable, CellValue, Column};

const TERMINATOR: u8 = 0x0D;
const EOF_MARKER: u8 = 0x1A;
const MAX_NAME: usize = 10;
const MAX_TEXT: usize = 254;
const NUMERIC_WIDTH: u8 = 24;
const NUMERIC_DECIMALS: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbfError {
    UnexpectedEof,
    InvalidHeader { reason: String },
    InvalidField { name: String, reason: String },
}

impl std::fmt::Display for DbfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbfError::UnexpectedEof => write!(f, "attribute table (.dbf) is truncated"),
            DbfError::InvalidHeader { reason } => {
                write!(f, "invalid attribute table header: {reason}")
            }
            DbfError::InvalidField { name, reason } => {
                write!(f, "invalid attribute field '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for DbfError {}

/// Character encoding of text fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Encoding {
    Utf8,
    Latin1,
    /// UTF-8 when the bytes are valid UTF-8, Latin-1 otherwise.
    #[default]
    Auto,
}

impl Encoding {
    /// Interprets the contents of a `.cpg` sidecar.
    pub fn from_cpg(text: &str) -> Encoding {
        let label = text.trim().to_ascii_uppercase().replace(['-', '_', ' '], "");
        match label.as_str() {
            "UTF8" | "65001" => Encoding::Utf8,
            "LATIN1" | "ISO88591" | "88591" | "1252" | "CP1252" | "WINDOWS1252" | "ANSI1252" => {
                Encoding::Latin1
            }
            _ => Encoding::Auto,
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Auto => match std::str::from_utf8(bytes) {
                Ok(s) => s.to_string(),
                Err(_) => Encoding::Latin1.decode(bytes),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct FieldDescriptor {
    name: String,
    kind: u8,
    length: usize,
}

/// Decoded records plus the deletion flag of each one.
#[derive(Debug, Clone, PartialEq)]
pub struct DbfRecords {
    pub table: AttributeTable,
    pub deleted: Vec<bool>,
}

pub fn read_dbf(bytes: &[u8], encoding: Encoding) -> Result<DbfRecords, DbfError> {
    if bytes.len() < 32 {
        return Err(DbfError::UnexpectedEof);
    }
    let num_records = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let record_len = u16::from_le_bytes([bytes[10], bytes[11]]) as usize;
    if header_len < 33 || header_len > bytes.len() {
        return Err(DbfError::InvalidHeader {
            reason: format!("header length {header_len}"),
        });
    }

    let mut fields = Vec::new();
    let mut offset = 32;
    while offset + 32 <= header_len && bytes[offset] != TERMINATOR {
        let d = &bytes[offset..offset + 32];
        let name_end = d[..11].iter().position(|&b| b == 0).unwrap_or(11);
        let name = encoding.decode(&d[..name_end]).trim().to_string();
        fields.push(FieldDescriptor {
            name,
            kind: d[11].to_ascii_uppercase(),
            length: d[16] as usize,
        });
        offset += 32;
    }

    let field_bytes: usize = fields.iter().map(|f| f.length).sum();
    if record_len < field_bytes + 1 {
        return Err(DbfError::InvalidHeader {
            reason: format!("record length {record_len} shorter than its {field_bytes} field bytes"),
        });
    }
    if header_len + num_records.saturating_mul(record_len) > bytes.len() {
        return Err(DbfError::UnexpectedEof);
    }

    let mut values: Vec<Vec<CellValue>> = fields
        .iter()
        .map(|_| Vec::with_capacity(num_records))
        .collect();
    let mut deleted = Vec::with_capacity(num_records);
    for i in 0..num_records {
        let start = header_len + i * record_len;
        let record = &bytes[start..start + record_len];
        deleted.push(record[0] == b'*');
        let mut pos = 1;
        for (field, column) in fields.iter().zip(values.iter_mut()) {
            let raw = &record[pos..pos + field.length];
            column.push(decode_value(field, raw, encoding)?);
            pos += field.length;
        }
    }

    let columns = fields
        .into_iter()
        .zip(values)
        .map(|(f, v)| Column::new(f.name, v))
        .collect();
    let table = AttributeTable::from_columns(num_records, columns).map_err(|e| {
        DbfError::InvalidHeader {
            reason: e.to_string(),
        }
    })?;
    Ok(DbfRecords { table, deleted })
}

fn decode_value(field: &FieldDescriptor, raw: &[u8], encoding: Encoding) -> Result<CellValue, DbfError> {
    let value = match field.kind {
        b'C' => {
            let text = encoding.decode(raw);
            let text = text.trim_end_matches([' ', '\0']);
            if text.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(text.to_string())
            }
        }
        b'N' | b'F' => {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim().trim_matches('\0');
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => CellValue::Number(v),
                // Blank or overflow ('****') fields carry no value.
                _ => CellValue::Null,
            }
        }
        b'L' => match raw.first() {
            Some(b'T' | b't' | b'Y' | b'y') => CellValue::Bool(true),
            Some(b'F' | b'f' | b'N' | b'n') => CellValue::Bool(false),
            _ => CellValue::Null,
        },
        b'D' => {
            let text = String::from_utf8_lossy(raw);
            let text = text.trim();
            if text.len() == 8 && text.bytes().all(|b| b.is_ascii_digit()) {
                CellValue::Text(format!("{}-{}-{}", &text[..4], &text[4..6], &text[6..]))
            } else {
                CellValue::Null
            }
        }
        b'I' => {
            let b: [u8; 4] = raw.try_into().map_err(|_| DbfError::InvalidField {
                name: field.name.clone(),
                reason: format!("integer field of length {}", raw.len()),
            })?;
            CellValue::Number(f64::from(i32::from_le_bytes(b)))
        }
        b'O' => {
            let b: [u8; 8] = raw.try_into().map_err(|_| DbfError::InvalidField {
                name: field.name.clone(),
                reason: format!("double field of length {}", raw.len()),
            })?;
            let v = f64::from_le_bytes(b);
            if v.is_finite() {
                CellValue::Number(v)
            } else {
                CellValue::Null
            }
        }
        // Memo and binary fields point into a sidecar that is not read.
        _ => CellValue::Null,
    };
    Ok(value)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum WriteKind {
    Numeric,
    Logical,
    Text(usize),
}

fn write_kind(column: &Column) -> WriteKind {
    let mut numbers = 0usize;
    let mut bools = 0usize;
    let mut width = 1usize;
    for v in &column.values {
        match v {
            CellValue::Null => {}
            CellValue::Number(_) => numbers += 1,
            CellValue::Bool(_) => bools += 1,
            CellValue::Text(s) => width = width.max(s.len()),
        }
    }
    let non_null = column.values.iter().filter(|v| !v.is_null()).count();
    if non_null > 0 && numbers == non_null {
        WriteKind::Numeric
    } else if non_null > 0 && bools == non_null {
        WriteKind::Logical
    } else {
        // Mixed columns are written as their text rendering.
        for v in &column.values {
            if let CellValue::Number(n) = v {
                width = width.max(crate::table::format_number(*n).len());
            }
        }
        WriteKind::Text(width.min(MAX_TEXT))
    }
}

/// Field names limited to ten bytes and made unique.
fn field_names(table: &AttributeTable) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let base = truncate_utf8(&column.name, MAX_NAME).to_string();
        let mut name = base.clone();
        let mut n = 1;
        while names.iter().any(|existing| existing.eq_ignore_ascii_case(&name)) {
            let suffix = format!("_{n}");
            name = format!("{}{suffix}", truncate_utf8(&base, MAX_NAME - suffix.len()));
            n += 1;
        }
        names.push(name);
    }
    names
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn encode_number(v: f64) -> Vec<u8> {
    let width = NUMERIC_WIDTH as usize;
    if !v.is_finite() {
        return vec![b' '; width];
    }
    let mut text = format!("{v:.prec$}", prec = NUMERIC_DECIMALS as usize);
    if text.len() > width {
        text = format!("{v:e}");
    }
    if text.len() > width {
        return vec![b'*'; width];
    }
    format!("{text:>width$}").into_bytes()
}

/// Serializes a table as dBASE III with UTF-8 text. A table without columns
/// gets a single `FID` column so the file stays valid.
pub fn write_dbf(table: &AttributeTable) -> Vec<u8> {
    let fid;
    let table = if table.columns().is_empty() {
        let ids = (0..table.row_count())
            .map(|i| CellValue::Number(i as f64))
            .collect();
        fid = AttributeTable::from_columns(table.row_count(), vec![Column::new("FID", ids)])
            .unwrap_or_default();
        &fid
    } else {
        table
    };

    let kinds: Vec<WriteKind> = table.columns().iter().map(write_kind).collect();
    let names = field_names(table);
    let widths: Vec<usize> = kinds
        .iter()
        .map(|k| match k {
            WriteKind::Numeric => NUMERIC_WIDTH as usize,
            WriteKind::Logical => 1,
            WriteKind::Text(w) => *w,
        })
        .collect();

    let header_len = 32 + 32 * kinds.len() + 1;
    let record_len = 1 + widths.iter().sum::<usize>();
    let mut out = Vec::with_capacity(header_len + record_len * table.row_count() + 1);

    out.push(0x03);
    // Fixed modification date keeps output reproducible.
    out.extend_from_slice(&[70, 1, 1]);
    out.extend_from_slice(&(table.row_count() as u32).to_le_bytes());
    out.extend_from_slice(&(header_len as u16).to_le_bytes());
    out.extend_from_slice(&(record_len as u16).to_le_bytes());
    out.extend_from_slice(&[0u8; 20]);

    for ((name, kind), width) in names.iter().zip(&kinds).zip(&widths) {
        let mut d = [0u8; 32];
        d[..name.len()].copy_from_slice(name.as_bytes());
        let (tag, decimals) = match kind {
            WriteKind::Numeric => (b'N', NUMERIC_DECIMALS),
            WriteKind::Logical => (b'L', 0),
            WriteKind::Text(_) => (b'C', 0),
        };
        d[11] = tag;
        d[16] = *width as u8;
        d[17] = decimals;
        out.extend_from_slice(&d);
    }
    out.push(TERMINATOR);

    for row in 0..table.row_count() {
        out.push(b' ');
        for ((column, kind), width) in table.columns().iter().zip(&kinds).zip(&widths) {
            let value = &column.values[row];
            match (kind, value) {
                (WriteKind::Numeric, CellValue::Number(v)) => out.extend(encode_number(*v)),
                (WriteKind::Logical, CellValue::Bool(b)) => out.push(if *b { b'T' } else { b'F' }),
                (WriteKind::Logical, _) => out.push(b'?'),
                (WriteKind::Text(_), v) => {
                    let text = v.to_text().unwrap_or_default();
                    let text = truncate_utf8(&text, *width);
                    out.extend_from_slice(text.as_bytes());
                    out.extend(std::iter::repeat_n(b' ', width - text.len()));
                }
                _ => out.extend(std::iter::repeat_n(b' ', *width)),
            }
        }
    }
    out.push(EOF_MARKER);
    out
}
