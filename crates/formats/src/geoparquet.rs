//! GeoParquet 1.0 artifacts: attributes as typed Arrow columns plus a WKB
//! `geometry` column, described by the `geo` key-value metadata entry.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, UInt32Type};
use arrow_array::{
    Array, ArrayRef, ArrowPrimitiveType, BinaryArray, BooleanArray, Float64Array, PrimitiveArray,
    RecordBatch, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use foundation::Crs;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde_json::{json, Value};
use tracing::warn;

use crate::table::{AttributeTable, CellValue, Column, GeoTable};
use crate::{wkb, FormatError, GEOMETRY_COLUMN};

const GEO_KEY: &str = "geo";
const GEO_VERSION: &str = "1.0.0";
/// pandas writes its index under this prefix; it is never data.
const INDEX_PREFIX: &str = "__index_level_";

enum Kind {
    Number,
    Bool,
    Text,
}

fn column_kind(column: &Column) -> Kind {
    let mut numbers = 0;
    let mut bools = 0;
    let mut other = 0;
    for v in &column.values {
        match v {
            CellValue::Null => {}
            CellValue::Number(_) => numbers += 1,
            CellValue::Bool(_) => bools += 1,
            CellValue::Text(_) => other += 1,
        }
    }
    match (numbers, bools, other) {
        (n, 0, 0) if n > 0 => Kind::Number,
        (0, b, 0) if b > 0 => Kind::Bool,
        _ => Kind::Text,
    }
}

fn column_array(column: &Column) -> (DataType, ArrayRef) {
    match column_kind(column) {
        Kind::Number => {
            let values: Vec<Option<f64>> = column.values.iter().map(CellValue::to_number).collect();
            (DataType::Float64, Arc::new(Float64Array::from(values)))
        }
        Kind::Bool => {
            let values: Vec<Option<bool>> = column
                .values
                .iter()
                .map(|v| match v {
                    CellValue::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            (DataType::Boolean, Arc::new(BooleanArray::from(values)))
        }
        Kind::Text => {
            let values: Vec<Option<String>> = column.values.iter().map(CellValue::to_text).collect();
            (DataType::Utf8, Arc::new(StringArray::from(values)))
        }
    }
}

fn crs_json(crs: Option<&Crs>) -> Value {
    match crs {
        None => Value::Null,
        Some(Crs { epsg: Some(code), .. }) => json!({ "id": { "authority": "EPSG", "code": code } }),
        Some(crs) => json!({ "name": crs.name }),
    }
}

/// The `geo` metadata document for `table`.
pub fn geo_metadata(table: &GeoTable) -> Value {
    let types: BTreeSet<&str> = table.geometries.iter().map(wkb::type_name).collect();
    let mut column = json!({
        "encoding": "WKB",
        "geometry_types": types.into_iter().collect::<Vec<_>>(),
        "crs": crs_json(table.crs.as_ref()),
    });
    if let Some(b) = table.bounds() {
        column["bbox"] = json!([b.min[0], b.min[1], b.max[0], b.max[1]]);
    }
    json!({
        "version": GEO_VERSION,
        "primary_column": GEOMETRY_COLUMN,
        "columns": { GEOMETRY_COLUMN: column },
    })
}

/// Writes `table` as a single-row-group GeoParquet stream.
pub fn write_geoparquet<W: Write + Send>(writer: W, table: &GeoTable) -> Result<(), FormatError> {
    let mut fields = Vec::with_capacity(table.attributes.columns().len() + 1);
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(fields.capacity());
    for column in table.attributes.columns() {
        if column.name == GEOMETRY_COLUMN {
            continue;
        }
        let (data_type, array) = column_array(column);
        fields.push(Field::new(column.name.as_str(), data_type, true));
        arrays.push(array);
    }
    let encoded: Vec<Vec<u8>> = table.geometries.iter().map(wkb::encode).collect();
    let slices: Vec<&[u8]> = encoded.iter().map(Vec::as_slice).collect();
    fields.push(Field::new(GEOMETRY_COLUMN, DataType::Binary, false));
    arrays.push(Arc::new(BinaryArray::from(slices)));

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(vec![KeyValue::new(
            GEO_KEY.to_string(),
            geo_metadata(table).to_string(),
        )]))
        .build();

    let mut w = ArrowWriter::try_new(writer, schema, Some(props))?;
    w.write(&batch)?;
    w.close()?;
    Ok(())
}

pub fn write_geoparquet_file(path: &Path, table: &GeoTable) -> Result<(), FormatError> {
    let file = File::create(path).map_err(|e| FormatError::io(path, e))?;
    write_geoparquet(file, table)
}

fn crs_from_json(value: Option<&Value>) -> Result<Option<Crs>, FormatError> {
    match value {
        // An absent key means OGC:CRS84.
        None => Ok(Some(Crs::wgs84())),
        Some(Value::Null) => Ok(None),
        Some(v) => {
            let code = v
                .pointer("/id/code")
                .and_then(|c| c.as_u64().or_else(|| c.as_str().and_then(|s| s.parse().ok())));
            match code {
                Some(code) => Ok(Some(Crs::from_epsg(code as u32)?)),
                None => Err(FormatError::Parquet(format!("unsupported crs description {v}"))),
            }
        }
    }
}

fn numbers<T: ArrowPrimitiveType>(
    array: &PrimitiveArray<T>,
    to_f64: impl Fn(T::Native) -> f64,
) -> Vec<CellValue> {
    array
        .iter()
        .map(|v| match v.map(&to_f64) {
            Some(n) if n.is_finite() => CellValue::Number(n),
            _ => CellValue::Null,
        })
        .collect()
}

/// Cells of an attribute array, or `None` for types the table model cannot hold.
fn cell_values(array: &dyn Array) -> Option<Vec<CellValue>> {
    let values = match array.data_type() {
        DataType::Float64 => numbers(array.as_primitive::<Float64Type>(), |v| v),
        DataType::Float32 => numbers(array.as_primitive::<Float32Type>(), f64::from),
        DataType::Int64 => numbers(array.as_primitive::<Int64Type>(), |v| v as f64),
        DataType::Int32 => numbers(array.as_primitive::<Int32Type>(), f64::from),
        DataType::Int16 => numbers(array.as_primitive::<Int16Type>(), f64::from),
        DataType::UInt32 => numbers(array.as_primitive::<UInt32Type>(), f64::from),
        DataType::Boolean => array
            .as_boolean()
            .iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::Bool))
            .collect(),
        DataType::Utf8 => array
            .as_string::<i32>()
            .iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::from))
            .collect(),
        DataType::LargeUtf8 => array
            .as_string::<i64>()
            .iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::from))
            .collect(),
        DataType::Null => vec![CellValue::Null; array.len()],
        _ => return None,
    };
    Some(values)
}

fn geometry_values(array: &dyn Array) -> Result<Vec<Option<Vec<u8>>>, FormatError> {
    let values = match array.data_type() {
        DataType::Binary => array
            .as_binary::<i32>()
            .iter()
            .map(|v| v.map(<[u8]>::to_vec))
            .collect(),
        DataType::LargeBinary => array
            .as_binary::<i64>()
            .iter()
            .map(|v| v.map(<[u8]>::to_vec))
            .collect(),
        other => {
            return Err(FormatError::Parquet(format!(
                "geometry column has type {other}, expected WKB binary"
            )))
        }
    };
    Ok(values)
}

/// Reads a GeoParquet file. Rows whose geometry is null are dropped with a
/// warning; attribute columns of unsupported types are skipped.
pub fn read_geoparquet_file(path: &Path) -> Result<GeoTable, FormatError> {
    let file = File::open(path).map_err(|e| FormatError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let geo: Option<Value> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .and_then(|kv| kv.iter().find(|e| e.key == GEO_KEY))
        .and_then(|e| e.value.as_deref())
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|e| FormatError::Parquet(format!("invalid geo metadata: {e}")))?;

    let (geometry_column, crs) = match &geo {
        Some(meta) => {
            let primary = meta
                .get("primary_column")
                .and_then(Value::as_str)
                .unwrap_or(GEOMETRY_COLUMN)
                .to_string();
            let crs = crs_from_json(meta.pointer(&format!("/columns/{primary}/crs")))?;
            (primary, crs)
        }
        None => {
            warn!("{}: no geo metadata, assuming WKB in '{GEOMETRY_COLUMN}'", path.display());
            (GEOMETRY_COLUMN.to_string(), Some(Crs::wgs84()))
        }
    };

    let schema = builder.schema().clone();
    let geometry_idx = schema
        .index_of(&geometry_column)
        .map_err(|_| FormatError::Parquet(format!("missing geometry column '{geometry_column}'")))?;

    let mut names = Vec::new();
    let mut columns: Vec<(usize, Vec<CellValue>)> = Vec::new();
    for (i, field) in schema.fields().iter().enumerate() {
        if i != geometry_idx && !field.name().starts_with(INDEX_PREFIX) {
            names.push(field.name().clone());
            columns.push((i, Vec::new()));
        }
    }
    let mut skipped = vec![false; columns.len()];
    let mut wkbs = Vec::new();

    for batch in builder.build()? {
        let batch = batch?;
        wkbs.extend(geometry_values(batch.column(geometry_idx).as_ref())?);
        for (slot, (idx, values)) in columns.iter_mut().enumerate() {
            match cell_values(batch.column(*idx).as_ref()) {
                Some(cells) => values.extend(cells),
                None => skipped[slot] = true,
            }
        }
    }

    let mut keep = Vec::with_capacity(wkbs.len());
    let mut geometries = Vec::with_capacity(wkbs.len());
    for (row, bytes) in wkbs.iter().enumerate() {
        if let Some(bytes) = bytes {
            geometries.push(wkb::decode(bytes)?);
            keep.push(row);
        }
    }

    let mut attributes = AttributeTable::new(wkbs.len());
    for ((name, (_, values)), skip) in names.into_iter().zip(columns).zip(skipped) {
        if skip {
            warn!("{}: skipping column '{name}' of unsupported type", path.display());
            continue;
        }
        attributes.push_column(name, values)?;
    }
    if keep.len() < wkbs.len() {
        warn!(
            "{}: dropped {} rows with null geometry",
            path.display(),
            wkbs.len() - keep.len()
        );
        attributes = attributes.take_rows(&keep);
    }
    GeoTable::new(attributes, geometries, crs)
}
