//! Upload processing: archive -> geometry -> companion join -> simplify -> normalize.

use std::fmt;
use std::sync::Arc;

use catalog::{CanonicalSchema, LayerCatalog};
use formats::tabular::read_companion_table;
use formats::{FormatError, GeoTable};
use thiserror::Error;
use tracing::info;

use crate::geometry::{load_geometry, simplify_table, GeometryError};
use crate::merge::{merge_attributes, MergeOutcome};
use crate::normalize::{normalize, NormalizeReport};

/// Degrees; about 50 m at the latitudes the dashboard covers.
pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 0.0005;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Stage {
    Archive,
    Geometry,
    Table,
    Layer,
    Storage,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Archive => "archive",
            Stage::Geometry => "geometry",
            Stage::Table => "table",
            Stage::Layer => "layer",
            Stage::Storage => "storage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an upload was rejected. `Display` is the message shown to the operator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown layer code '{0}'")]
    UnknownLayer(String),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("Could not read the companion table: {0}")]
    Table(#[source] FormatError),

    #[error("Could not normalize the layer attributes: {0}")]
    Attributes(#[source] FormatError),

    #[error("Could not save the processed layer: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn storage(err: impl fmt::Display) -> Self {
        PipelineError::Storage(err.to_string())
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::UnknownLayer(_) => Stage::Layer,
            PipelineError::Geometry(e) if e.is_structural() => Stage::Archive,
            PipelineError::Geometry(_) => Stage::Geometry,
            PipelineError::Table(_) | PipelineError::Attributes(_) => Stage::Table,
            PipelineError::Storage(_) => Stage::Storage,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Douglas-Peucker tolerance in degrees; `None` keeps geometries as read.
    pub simplify_tolerance: Option<f64>,
    /// Keep non-canonical source columns after the canonical ones.
    pub keep_extra_columns: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            simplify_tolerance: Some(DEFAULT_SIMPLIFY_TOLERANCE),
            keep_extra_columns: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompanionTable {
    /// Original file name; its extension selects the decoder.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub layer_code: String,
    /// Zip archive holding the shapefile.
    pub archive: Vec<u8>,
    pub table: Option<CompanionTable>,
}

/// A normalized layer ready to be written to the store.
#[derive(Debug, Clone)]
pub struct ProcessedLayer {
    /// Catalog spelling of the requested code.
    pub layer_code: String,
    pub table: GeoTable,
    pub merge: MergeOutcome,
    pub report: NormalizeReport,
}

pub struct Pipeline {
    catalog: Arc<LayerCatalog>,
    schema: Arc<CanonicalSchema>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<LayerCatalog>,
        schema: Arc<CanonicalSchema>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            catalog,
            schema,
            options,
        }
    }

    pub fn process(&self, request: &UploadRequest) -> Result<ProcessedLayer, PipelineError> {
        let layer = self
            .catalog
            .resolve(&request.layer_code)
            .map_err(|_| PipelineError::UnknownLayer(request.layer_code.trim().to_string()))?;
        let code = layer.code.as_str();
        info!("{code}: processing upload ({} bytes)", request.archive.len());

        let geo = load_geometry(&request.archive)?;
        info!("{code}: {} features loaded", geo.len());

        let external = match &request.table {
            Some(t) => {
                let table =
                    read_companion_table(&t.file_name, &t.bytes).map_err(PipelineError::Table)?;
                info!(
                    "{code}: companion table {} has {} rows",
                    t.file_name,
                    table.row_count()
                );
                Some(table)
            }
            None => None,
        };

        let (mut geo, merge) = merge_attributes(geo, code, external.as_ref(), &self.schema)
            .map_err(PipelineError::Attributes)?;

        if let Some(tolerance) = self.options.simplify_tolerance {
            simplify_table(&mut geo, tolerance);
        }

        let (table, report) = normalize(geo, code, &self.schema, self.options.keep_extra_columns)
            .map_err(PipelineError::Attributes)?;
        info!(
            "{code}: normalized {} records ({} fields resolved, {} defaulted)",
            table.len(),
            report.resolved.len(),
            report.defaulted.len()
        );

        Ok(ProcessedLayer {
            layer_code: code.to_string(),
            table,
            merge,
            report,
        })
    }

    /// Loads the basin boundary shipped as a zipped shapefile. Attributes are
    /// kept as read; geometry is reprojected and simplified like a layer.
    pub fn process_boundary(&self, archive: &[u8]) -> Result<GeoTable, PipelineError> {
        let mut boundary = load_geometry(archive)?;
        if let Some(tolerance) = self.options.simplify_tolerance {
            simplify_table(&mut boundary, tolerance);
        }
        info!("boundary: {} features loaded", boundary.len());
        Ok(boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use formats::{CellValue, Column};
    use pretty_assertions::assert_eq;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(LayerCatalog::builtin()),
            Arc::new(CanonicalSchema::default()),
            PipelineOptions::default(),
        )
    }

    fn request(code: &str, archive: Vec<u8>, table: Option<(&str, &[u8])>) -> UploadRequest {
        UploadRequest {
            layer_code: code.to_string(),
            archive,
            table: table.map(|(name, bytes)| CompanionTable {
                file_name: name.to_string(),
                bytes: bytes.to_vec(),
            }),
        }
    }

    #[test]
    fn folio_join_end_to_end() {
        let archive =
            fixtures::shapefile_zip("predios.shp", &fixtures::parcels(&["A-001", "A-002"]));
        let csv = b"FOLIO,MONTO_TOT\n a-001 ,500\n";
        let out = pipeline()
            .process(&request("psa", archive, Some(("extra.csv", csv.as_slice()))))
            .unwrap();

        assert_eq!(out.layer_code, "PSA");
        let t = &out.table.attributes;
        assert_eq!(t.value(0, "FOL_PROG"), Some(&"A-001".into()));
        assert_eq!(t.value(0, "MONTO_TOT"), Some(&CellValue::Number(500.0)));
        assert_eq!(t.value(1, "MONTO_TOT"), Some(&CellValue::Number(0.0)));
        assert_eq!(t.value(1, "MUNICIPIO"), Some(&"Sin Dato".into()));
        assert_eq!(t.value(1, "TIPO_CAPA"), Some(&"PSA".into()));
        assert!(matches!(out.merge, MergeOutcome::Joined(_)));
    }

    #[test]
    fn without_table_only_normalizes() {
        let parcels = fixtures::parcels_with(
            &["B-1"],
            vec![Column::new("SUP_HA", vec![12.5.into()])],
        );
        let archive = fixtures::shapefile_zip("capa.shp", &parcels);
        let out = pipeline().process(&request("MFC", archive, None)).unwrap();
        assert_eq!(out.merge, MergeOutcome::NoTable);
        assert_eq!(
            out.table.attributes.value(0, "SUPERFICIE"),
            Some(&CellValue::Number(12.5))
        );
    }

    #[test]
    fn stages_are_reported() {
        let p = pipeline();
        let err = p.process(&request("XYZ", Vec::new(), None)).unwrap_err();
        assert_eq!(err.stage(), Stage::Layer);
        assert_eq!(err.to_string(), "Unknown layer code 'XYZ'");

        let csv_only = fixtures::zip_bytes(&[("datos.csv", b"A\n1\n".as_slice())]);
        let err = p.process(&request("PSA", csv_only, None)).unwrap_err();
        assert_eq!(err.stage(), Stage::Archive);
        assert_eq!(err.to_string(), "No .shp file found in the archive");

        let archive = fixtures::shapefile_zip("capa.shp", &fixtures::parcels(&["A"]));
        let err = p
            .process(&request("PSA", archive, Some(("datos.pdf", b"%PDF".as_slice()))))
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Table);

        assert_eq!(PipelineError::storage("disk full").stage(), Stage::Storage);
    }

    #[test]
    fn processing_is_deterministic() {
        let archive = fixtures::shapefile_zip("capa.shp", &fixtures::parcels(&["A", "B", "C"]));
        let csv = b"FOLIO;CONCEPTO\nB;Vivero\n";
        let req = request("PFC", archive, Some(("t.csv", csv.as_slice())));
        let a = pipeline().process(&req).unwrap();
        let b = pipeline().process(&req).unwrap();
        assert_eq!(a.table, b.table);
        assert_eq!(a.table.attributes.value(1, "CONCEPTO"), Some(&"Vivero".into()));
    }

    #[test]
    fn boundary_is_loaded_as_is() {
        let archive = fixtures::shapefile_zip("cuenca.shp", &fixtures::parcels(&["C1"]));
        let boundary = pipeline().process_boundary(&archive).unwrap();
        assert_eq!(boundary.len(), 1);
        assert_eq!(boundary.attributes.column_names(), vec!["FOLIO"]);
    }
}
