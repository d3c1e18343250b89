//! Canonical schema enforcement.

use catalog::{CanonicalSchema, FieldKind};
use formats::{CellValue, FormatError, GeoTable};
use tracing::{debug, info};

use crate::resolver::map_schema;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    /// `(canonical field, source column)` for fields found in the input.
    pub resolved: Vec<(String, String)>,
    /// Fields absent from the input and synthesized with their default.
    pub defaulted: Vec<String>,
    /// `(canonical field, cells)` replaced by the default because they were
    /// null or could not be coerced.
    pub filled_cells: Vec<(String, usize)>,
    /// Later duplicate columns that were dropped.
    pub dropped_duplicates: Vec<String>,
}

fn needs_default(kind: FieldKind, value: &CellValue) -> bool {
    match kind {
        FieldKind::Numeric => value.to_number().is_none(),
        FieldKind::Text => value.is_null(),
    }
}

/// Renames, synthesizes and coerces columns so `table` carries every
/// canonical field, then stamps `layer_code` on every row. Output columns are
/// the canonical fields in schema order and the layer field, followed by the
/// remaining source columns when `keep_extra_columns` is set.
pub fn normalize(
    mut table: GeoTable,
    layer_code: &str,
    schema: &CanonicalSchema,
    keep_extra_columns: bool,
) -> Result<(GeoTable, NormalizeReport), FormatError> {
    let mut report = NormalizeReport::default();
    let rows = table.len();
    let matches = map_schema(&table.attributes.column_names(), schema);

    for (m, field) in matches.iter().zip(schema.fields()) {
        match &m.column {
            Some(source) => {
                if let Some(idx) = table.attributes.position(source) {
                    table.attributes.rename_at(idx, field.name.clone());
                }
                if source != &field.name {
                    debug!("{source} -> {}", field.name);
                }
                report.resolved.push((field.name.clone(), source.clone()));
            }
            None => {
                table
                    .attributes
                    .push_column(field.name.clone(), vec![field.kind.default_value(); rows])?;
                report.defaulted.push(field.name.clone());
            }
        }
    }

    report.dropped_duplicates = table.attributes.dedup_columns();

    for field in schema.fields() {
        if let Some(column) = table.attributes.column_mut(&field.name) {
            let filled = column
                .values
                .iter()
                .filter(|v| needs_default(field.kind, v))
                .count();
            column.values = column.values.iter().map(|v| field.kind.coerce(v)).collect();
            if filled > 0 && !report.defaulted.contains(&field.name) {
                report.filled_cells.push((field.name.clone(), filled));
            }
        }
    }

    table.attributes.set_column(
        schema.layer_field(),
        vec![CellValue::Text(layer_code.to_string()); rows],
    )?;
    table
        .attributes
        .reorder(&schema.output_columns(), keep_extra_columns);

    if !report.defaulted.is_empty() {
        info!(
            "{layer_code}: no source column for {}; filled with defaults",
            report.defaulted.join(", ")
        );
    }
    Ok((table, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{parcels, parcels_with};
    use catalog::SENTINEL;
    use formats::Column;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_canonical_field_is_present_and_non_null() {
        let geo = parcels_with(
            &["A", "B"],
            vec![
                Column::new("MONTO", vec!["1,000".into(), 250.0.into()]),
                Column::new("MUN", vec![CellValue::Null, "Tapalpa".into()]),
            ],
        );
        let schema = CanonicalSchema::default();
        let (out, report) = normalize(geo, "PSA", &schema, false).unwrap();

        assert_eq!(out.attributes.column_names(), schema.output_columns());
        for field in schema.fields() {
            let column = out.attributes.column(&field.name).unwrap();
            for v in &column.values {
                match field.kind {
                    FieldKind::Numeric => assert!(matches!(v, CellValue::Number(n) if n.is_finite())),
                    FieldKind::Text => assert!(matches!(v, CellValue::Text(_))),
                }
            }
        }
        assert_eq!(out.attributes.value(0, "MONTO_TOT"), Some(&CellValue::Number(0.0)));
        assert_eq!(out.attributes.value(1, "MONTO_TOT"), Some(&CellValue::Number(250.0)));
        assert_eq!(out.attributes.value(0, "MUNICIPIO"), Some(&SENTINEL.into()));
        assert_eq!(out.attributes.value(1, "TIPO_CAPA"), Some(&"PSA".into()));
        assert_eq!(out.attributes.value(1, "FOL_PROG"), Some(&"B".into()));

        assert_eq!(
            report.resolved,
            vec![
                ("FOL_PROG".to_string(), "FOLIO".to_string()),
                ("MONTO_TOT".to_string(), "MONTO".to_string()),
                ("MUNICIPIO".to_string(), "MUN".to_string()),
            ]
        );
        assert!(report.defaulted.contains(&"SUPERFICIE".to_string()));
        assert_eq!(
            report.filled_cells,
            vec![("MONTO_TOT".to_string(), 1), ("MUNICIPIO".to_string(), 1)]
        );
    }

    #[test]
    fn missing_municipality_gets_sentinel() {
        let (out, report) =
            normalize(parcels(&["X"]), "CA", &CanonicalSchema::default(), false).unwrap();
        assert_eq!(out.attributes.value(0, "MUNICIPIO"), Some(&"Sin Dato".into()));
        assert!(report.defaulted.contains(&"MUNICIPIO".to_string()));
    }

    #[test]
    fn extra_columns_are_optional() {
        let geo = parcels_with(&["A"], vec![Column::new("OBSERVACIONES", vec!["ok".into()])]);
        let schema = CanonicalSchema::default();
        let (lean, _) = normalize(geo.clone(), "PSA", &schema, false).unwrap();
        assert!(lean.attributes.column("OBSERVACIONES").is_none());

        let (full, _) = normalize(geo, "PSA", &schema, true).unwrap();
        let names = full.attributes.column_names();
        assert_eq!(names.last().map(String::as_str), Some("OBSERVACIONES"));
        assert_eq!(names.len(), schema.output_columns().len() + 1);
    }

    #[test]
    fn existing_layer_field_is_overwritten() {
        let geo = parcels_with(&["A"], vec![Column::new("TIPO_CAPA", vec!["OLD".into()])]);
        let (out, _) = normalize(geo, "PFC", &CanonicalSchema::default(), true).unwrap();
        assert_eq!(out.attributes.value(0, "TIPO_CAPA"), Some(&"PFC".into()));
        assert_eq!(
            out.attributes.columns().iter().filter(|c| c.name == "TIPO_CAPA").count(),
            1
        );
    }

    #[test]
    fn duplicate_names_keep_the_first() {
        let geo = parcels_with(
            &["A"],
            vec![
                Column::new("EXTRA", vec!["first".into()]),
                Column::new("EXTRA", vec!["second".into()]),
            ],
        );
        let (out, report) = normalize(geo, "PSA", &CanonicalSchema::default(), true).unwrap();
        assert_eq!(report.dropped_duplicates, vec!["EXTRA".to_string()]);
        assert_eq!(out.attributes.value(0, "EXTRA"), Some(&"first".into()));
    }
}
