//! Companion tables (CSV or spreadsheet) and CSV export.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use crate::table::{AttributeTable, CellValue, Column};
use crate::FormatError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parses a companion table, choosing the decoder from the file extension.
pub fn read_companion_table(file_name: &str, bytes: &[u8]) -> Result<AttributeTable, FormatError> {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => read_csv(bytes),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_spreadsheet(bytes),
        _ => Err(FormatError::Table(format!(
            "unsupported table format '{file_name}'; expected .csv, .xlsx, .xls or .ods"
        ))),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        // Spreadsheet exports on Windows are usually Latin-1.
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// `;` when the header line has more semicolons than commas, `,` otherwise.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas { b';' } else { b',' }
}

/// Trimmed header names; blanks become `Unnamed: i` and repeats get `.1`, `.2`, ...
fn header_names(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for (i, name) in raw.into_iter().enumerate() {
        let base = match name.trim() {
            "" => format!("Unnamed: {i}"),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while names.contains(&candidate) {
            candidate = format!("{base}.{n}");
            n += 1;
        }
        names.push(candidate);
    }
    names
}

/// A text cell that should stay text even though it parses as a number,
/// such as a zero-padded folio.
fn has_leading_zero(s: &str) -> bool {
    let digits = s.trim_start_matches(['-', '+']);
    digits.len() > 1 && digits.starts_with('0') && digits.as_bytes()[1].is_ascii_digit()
}

/// Turns raw text cells into a column: numeric when every non-empty cell parses.
fn infer_column(name: String, raw: Vec<String>) -> Column {
    let numeric = raw.iter().any(|s| !s.trim().is_empty())
        && raw.iter().all(|s| {
            let t = s.trim();
            t.is_empty() || (t.parse::<f64>().is_ok_and(f64::is_finite) && !has_leading_zero(t))
        });
    let values = raw
        .into_iter()
        .map(|s| {
            let t = s.trim();
            if t.is_empty() {
                CellValue::Null
            } else if numeric {
                t.parse::<f64>().map_or(CellValue::Null, CellValue::Number)
            } else {
                CellValue::Text(s)
            }
        })
        .collect();
    Column::new(name, values)
}

pub fn read_csv(bytes: &[u8]) -> Result<AttributeTable, FormatError> {
    let text = decode_text(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(&text))
        .has_headers(true)
        .from_reader(text.as_bytes());
    let csv_error = |e: csv::Error| FormatError::Table(format!("could not parse CSV: {e}"));

    let headers = reader.headers().map_err(csv_error)?.clone();
    let names = header_names(headers.iter().map(str::to_string));
    let mut cells: Vec<Vec<String>> = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        for (column, field) in cells.iter_mut().zip(record.iter()) {
            column.push(field.to_string());
        }
    }

    let rows = cells.first().map_or(0, Vec::len);
    let columns = names
        .into_iter()
        .zip(cells)
        .map(|(name, raw)| infer_column(name, raw))
        .collect();
    AttributeTable::from_columns(rows, columns)
}

fn data_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) if f.is_finite() => CellValue::Number(*f),
        Data::Float(_) => CellValue::Null,
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) if s.trim().is_empty() => CellValue::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::DateTime(d) => CellValue::Number(d.as_f64()),
    }
}

/// First worksheet, first non-empty row as header.
pub fn read_spreadsheet(bytes: &[u8]) -> Result<AttributeTable, FormatError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| FormatError::Table(format!("could not open spreadsheet: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| FormatError::Table("spreadsheet has no worksheets".to_string()))?
        .map_err(|e| FormatError::Table(format!("could not read worksheet: {e}")))?;

    let mut rows = range
        .rows()
        .filter(|row| row.iter().any(|c| !data_cell(c).is_null()));
    let header = rows
        .next()
        .ok_or_else(|| FormatError::Table("worksheet has no header row".to_string()))?;
    let names = header_names(header.iter().map(|c| data_cell(c).to_text().unwrap_or_default()));

    let mut values: Vec<Vec<CellValue>> = vec![Vec::new(); names.len()];
    for row in rows {
        for (i, column) in values.iter_mut().enumerate() {
            column.push(row.get(i).map_or(CellValue::Null, data_cell));
        }
    }
    let row_count = values.first().map_or(0, Vec::len);
    let columns = names
        .into_iter()
        .zip(values)
        .map(|(name, v)| Column::new(name, v))
        .collect();
    AttributeTable::from_columns(row_count, columns)
}

/// CSV with a UTF-8 byte-order mark so spreadsheet programs pick the right
/// encoding. `columns` are `(column, header)` pairs; missing columns are skipped.
pub fn write_csv(table: &AttributeTable, columns: &[(String, String)]) -> Result<Vec<u8>, FormatError> {
    let present: Vec<(&Column, &str)> = columns
        .iter()
        .filter_map(|(name, header)| Some((table.column(name)?, header.as_str())))
        .collect();

    let mut out = UTF8_BOM.to_vec();
    {
        let mut writer = csv::Writer::from_writer(&mut out);
        let csv_error = |e: csv::Error| FormatError::Table(format!("could not write CSV: {e}"));
        writer
            .write_record(present.iter().map(|(_, header)| *header))
            .map_err(csv_error)?;
        for row in 0..table.row_count() {
            writer
                .write_record(
                    present
                        .iter()
                        .map(|(column, _)| column.values[row].to_text().unwrap_or_default()),
                )
                .map_err(csv_error)?;
        }
        writer
            .flush()
            .map_err(|e| FormatError::Table(format!("could not write CSV: {e}")))?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn csv_with_semicolons_and_latin1() {
        let mut bytes = b"FOLIO;MONTO;MUNICIPIO\n".to_vec();
        bytes.extend_from_slice(b"A-001;500;Pe\xF1on\n");
        bytes.extend_from_slice(b"A-002;;Tequila\n");
        let t = read_companion_table("datos.CSV", &bytes).unwrap();
        assert_eq!(t.column_names(), vec!["FOLIO", "MONTO", "MUNICIPIO"]);
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.value(0, "MONTO"), Some(&CellValue::Number(500.0)));
        assert_eq!(t.value(1, "MONTO"), Some(&CellValue::Null));
        assert_eq!(t.value(0, "MUNICIPIO"), Some(&"Peñon".into()));
    }

    #[test]
    fn headers_are_mangled_like_dataframes() {
        let t = read_csv("\u{feff}A,,A, B \n1,2,3,4\n".as_bytes()).unwrap();
        assert_eq!(t.column_names(), vec!["A", "Unnamed: 1", "A.1", "B"]);
    }

    #[test]
    fn zero_padded_codes_stay_text() {
        let t = read_csv(b"FOLIO,MONTO\n007,1.5\n010,2\n").unwrap();
        assert_eq!(t.value(0, "FOLIO"), Some(&"007".into()));
        assert_eq!(t.value(1, "MONTO"), Some(&CellValue::Number(2.0)));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = read_csv(b"A,B\n1,2\n3\n").unwrap_err();
        assert!(err.to_string().starts_with("could not parse CSV"), "{err}");
    }

    #[test]
    fn blank_lines_are_skipped() {
        let t = read_csv(b"A,B\n1,x\n,\n2,y\n").unwrap();
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.value(1, "A"), Some(&CellValue::Number(2.0)));
    }

    #[test]
    fn unknown_extension_and_bad_spreadsheet() {
        assert!(matches!(
            read_companion_table("datos.json", b"{}"),
            Err(FormatError::Table(_))
        ));
        let err = read_companion_table("datos.xlsx", b"not a zip").unwrap_err();
        assert!(err.to_string().starts_with("could not open spreadsheet"), "{err}");
    }

    #[test]
    fn data_cells_map_to_values() {
        assert_eq!(data_cell(&Data::Int(3)), CellValue::Number(3.0));
        assert_eq!(data_cell(&Data::String("  ".into())), CellValue::Null);
        assert_eq!(data_cell(&Data::Bool(true)), CellValue::Bool(true));
        assert_eq!(data_cell(&Data::Empty), CellValue::Null);
    }

    #[test]
    fn csv_export_uses_headers_and_bom() {
        let t = AttributeTable::from_columns(
            2,
            vec![
                Column::new("FOL_PROG", vec!["A,1".into(), "B".into()]),
                Column::new("MONTO_TOT", vec![1500.0.into(), 2.5.into()]),
            ],
        )
        .unwrap();
        let headers = vec![
            ("FOL_PROG".to_string(), "FOLIO".to_string()),
            ("NOPE".to_string(), "X".to_string()),
            ("MONTO_TOT".to_string(), "INVERSIÓN_TOTAL".to_string()),
        ];
        let bytes = write_csv(&t, &headers).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "\u{feff}FOLIO,INVERSIÓN_TOTAL\n\"A,1\",1500\nB,2.5\n"
        );
    }
}
