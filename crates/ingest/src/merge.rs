//! Left join of shapefile attributes with an optional companion table.

use std::collections::HashMap;
use std::fmt;

use catalog::CanonicalSchema;
use formats::{AttributeTable, CellValue, Column, FormatError, GeoTable};
use tracing::{info, warn};

use crate::resolver::{map_schema, ColumnResolver, FieldMatch};

/// What the merge step did.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// No companion table was supplied.
    NoTable,
    /// The join key could not be found; attributes were left untouched.
    Skipped { reason: String },
    Joined(JoinSummary),
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::NoTable => write!(f, "no companion table"),
            MergeOutcome::Skipped { reason } => write!(f, "join skipped: {reason}"),
            MergeOutcome::Joined(s) => write!(
                f,
                "joined on {} = {}: {} matched, {} unmatched",
                s.geometry_key, s.table_key, s.matched_rows, s.unmatched_rows
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinSummary {
    pub geometry_key: String,
    pub table_key: String,
    pub matched_rows: usize,
    pub unmatched_rows: usize,
    /// Canonical fields whose values were taken from the companion table.
    pub replaced_fields: Vec<String>,
    /// Companion rows ignored because an earlier row had the same key.
    pub duplicate_keys: usize,
}

/// Join key as compared: text, trimmed, case-folded. Blank keys never match.
fn join_key(value: &CellValue) -> Option<String> {
    let text = value.to_text()?;
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_uppercase())
}

fn trimmed_text(value: &CellValue) -> CellValue {
    match value.to_text() {
        Some(text) => CellValue::Text(text.trim().to_string()),
        None => CellValue::Null,
    }
}

fn matched_column<'m>(matches: &'m [FieldMatch], field: &str) -> Option<&'m str> {
    matches
        .iter()
        .find(|m| m.field == field)
        .and_then(|m| m.column.as_deref())
}

/// Joins `external` onto `geo` by folio. Every geometry row is kept; for
/// canonical fields present in both sources the companion value wins.
pub fn merge_attributes(
    mut geo: GeoTable,
    layer_code: &str,
    external: Option<&AttributeTable>,
    schema: &CanonicalSchema,
) -> Result<(GeoTable, MergeOutcome), FormatError> {
    let Some(external) = external else {
        return Ok((geo, MergeOutcome::NoTable));
    };

    let geo_names = geo.attributes.column_names();
    let ext_names = external.column_names();
    let geo_matches = map_schema(&geo_names, schema);
    let ext_matches = map_schema(&ext_names, schema);
    let key_field = schema.join_key().name.as_str();
    let resolver = ColumnResolver::new(schema);
    let (geo_key, ext_key) = match (
        resolver.resolve(&geo_names, key_field, &[]),
        resolver.resolve(&ext_names, key_field, &[]),
    ) {
        (Some(g), Some(e)) => (g.to_string(), e.to_string()),
        (g, e) => {
            let missing = match (g, e) {
                (None, None) => "the shapefile or the companion table",
                (None, _) => "the shapefile",
                _ => "the companion table",
            };
            let reason = format!("no folio column ({key_field}) in {missing}");
            warn!("{layer_code}: join skipped, {reason}");
            return Ok((geo, MergeOutcome::Skipped { reason }));
        }
    };

    // Normalize the geometry key in place.
    if let Some(column) = geo.attributes.column_mut(&geo_key) {
        column.values = column.values.iter().map(trimmed_text).collect();
    }

    // Canonical fields backed by both sources: drop the shapefile copy and give
    // the companion copy its canonical name.
    let mut replaced_fields = Vec::new();
    let mut ext_names = ext_names;
    for field in schema.fields().iter().filter(|f| f.name != key_field) {
        let (Some(g), Some(e)) = (
            matched_column(&geo_matches, &field.name),
            matched_column(&ext_matches, &field.name),
        ) else {
            continue;
        };
        if g == geo_key || e == ext_key {
            continue;
        }
        geo.attributes.remove_column(g);
        if let Some(slot) = ext_names.iter().position(|n| n == e) {
            ext_names[slot] = field.name.clone();
        }
        replaced_fields.push(field.name.clone());
    }

    // First companion row wins for each key.
    let ext_key_values = external
        .column(&ext_key)
        .map(|c| c.values.as_slice())
        .unwrap_or_default();
    let mut index: HashMap<String, usize> = HashMap::with_capacity(ext_key_values.len());
    let mut duplicate_keys = 0;
    for (row, value) in ext_key_values.iter().enumerate() {
        if let Some(key) = join_key(value) {
            if index.contains_key(&key) {
                duplicate_keys += 1;
            } else {
                index.insert(key, row);
            }
        }
    }
    if duplicate_keys > 0 {
        warn!("{layer_code}: {duplicate_keys} companion rows repeat an earlier folio and were ignored");
    }

    let rows: Vec<Option<usize>> = geo
        .attributes
        .column(&geo_key)
        .map(|c| {
            c.values
                .iter()
                .map(|v| join_key(v).and_then(|k| index.get(&k).copied()))
                .collect()
        })
        .unwrap_or_else(|| vec![None; geo.len()]);
    let matched_rows = rows.iter().filter(|r| r.is_some()).count();

    // Assemble: shapefile columns, then companion columns minus its key.
    let geo_names = geo.attributes.column_names();
    let ext_columns: Vec<(String, &Column)> = ext_names
        .into_iter()
        .zip(external.columns())
        .filter(|(_, c)| c.name != ext_key)
        .collect();
    let collides = |name: &str, other: &[String]| other.iter().any(|n| n == name);
    let ext_only: Vec<String> = ext_columns.iter().map(|(n, _)| n.clone()).collect();

    let mut joined = AttributeTable::new(geo.len());
    for column in geo.attributes.columns() {
        let name = if collides(&column.name, &ext_only) {
            format!("{}_x", column.name)
        } else {
            column.name.clone()
        };
        joined.push_column(name, column.values.clone())?;
    }
    for (name, column) in ext_columns {
        let name = if collides(&name, &geo_names) {
            format!("{name}_y")
        } else {
            name
        };
        let values = rows
            .iter()
            .map(|r| r.map_or(CellValue::Null, |i| column.values[i].clone()))
            .collect();
        joined.push_column(name, values)?;
    }
    geo.attributes = joined;

    let summary = JoinSummary {
        geometry_key: geo_key,
        table_key: ext_key,
        matched_rows,
        unmatched_rows: geo.len() - matched_rows,
        replaced_fields,
        duplicate_keys,
    };
    info!(
        "{layer_code}: joined companion table on {} = {} ({} of {} rows matched)",
        summary.geometry_key,
        summary.table_key,
        summary.matched_rows,
        geo.len()
    );
    Ok((geo, MergeOutcome::Joined(summary)))
}
