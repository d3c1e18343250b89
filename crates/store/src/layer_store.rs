//! One GeoParquet artifact per layer in a flat data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use catalog::{CanonicalSchema, LayerCatalog};
use formats::geoparquet::{read_geoparquet_file, write_geoparquet};
use formats::{CellValue, FormatError, GeoTable};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const BOUNDARY_FILE: &str = "cuenca_web.parquet";
/// Single pre-merged artifact from before per-layer files existed.
pub const LEGACY_FILE: &str = "db_master.parquet";

pub fn artifact_file_name(code: &str) -> String {
    format!("capa_{code}_procesada.parquet")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown layer code '{0}'")]
    UnknownLayer(String),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Artifacts are replaced wholesale; concurrent writers race and the last
/// rename wins.
#[derive(Debug, Clone)]
pub struct LayerStore {
    dir: PathBuf,
    catalog: Arc<LayerCatalog>,
    schema: Arc<CanonicalSchema>,
}

impl LayerStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        catalog: Arc<LayerCatalog>,
        schema: Arc<CanonicalSchema>,
    ) -> Self {
        Self {
            dir: dir.into(),
            catalog,
            schema,
        }
    }

    /// Like [`LayerStore::new`], creating the directory if needed.
    pub fn open(
        dir: impl Into<PathBuf>,
        catalog: Arc<LayerCatalog>,
        schema: Arc<CanonicalSchema>,
    ) -> Result<Self, StoreError> {
        let store = Self::new(dir, catalog, schema);
        fs::create_dir_all(&store.dir).map_err(|e| StoreError::io(&store.dir, e))?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn catalog(&self) -> &LayerCatalog {
        &self.catalog
    }

    pub fn artifact_path(&self, code: &str) -> PathBuf {
        self.dir.join(artifact_file_name(code))
    }

    fn catalog_code(&self, code: &str) -> Result<String, StoreError> {
        self.catalog
            .resolve(code)
            .map(|l| l.code.clone())
            .map_err(|_| StoreError::UnknownLayer(code.trim().to_string()))
    }

    /// Writes through a temporary file in the same directory and renames it
    /// over `path`, so readers never see a partial artifact.
    fn write_atomic(&self, path: &Path, table: &GeoTable) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut tmp =
            NamedTempFile::new_in(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        write_geoparquet(tmp.as_file_mut(), table)?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        Ok(())
    }

    /// Replaces the artifact of `code` with `table`.
    pub fn write_layer(&self, code: &str, table: &GeoTable) -> Result<PathBuf, StoreError> {
        let code = self.catalog_code(code)?;
        let path = self.artifact_path(&code);
        self.write_atomic(&path, table)?;
        info!("{code}: wrote {} records to {}", table.len(), path.display());
        Ok(path)
    }

    /// Removes the artifact of `code`. Returns whether one existed.
    pub fn delete_layer(&self, code: &str) -> Result<bool, StoreError> {
        let code = self.catalog_code(code)?;
        let path = self.artifact_path(&code);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("{code}: removed {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn read_optional(path: &Path) -> Result<Option<GeoTable>, StoreError> {
        if !path.is_file() {
            return Ok(None);
        }
        let table = read_geoparquet_file(path)?;
        if table.crs.is_none() {
            warn!(
                "{}: no coordinate reference recorded, using coordinates as stored",
                path.display()
            );
        } else if table.needs_reprojection() {
            info!("{}: reprojecting to WGS 84", path.display());
        }
        Ok(Some(table.into_wgs84()))
    }

    /// The artifact of `code`, with the layer field filled in when missing.
    pub fn load_layer(&self, code: &str) -> Result<Option<GeoTable>, StoreError> {
        let code = self.catalog_code(code)?;
        let Some(mut table) = Self::read_optional(&self.artifact_path(&code))? else {
            return Ok(None);
        };
        let field = self.schema.layer_field();
        if table.attributes.column(field).is_none() {
            debug!("{code}: artifact has no {field} column, filling it");
            let rows = table.len();
            table
                .attributes
                .set_column(field, vec![CellValue::Text(code.clone()); rows])?;
        }
        Ok(Some(table))
    }

    /// Record count of every catalog layer that has an artifact.
    pub fn layer_counts(&self) -> Result<Vec<(String, usize)>, StoreError> {
        let mut counts = Vec::new();
        for code in self.catalog.codes() {
            if let Some(table) = self.load_layer(code)? {
                counts.push((code.to_string(), table.len()));
            }
        }
        Ok(counts)
    }

    /// Union of every layer artifact in catalog order. Without any, falls
    /// back to the legacy artifact; `None` means there is no data at all.
    pub fn load_all(&self) -> Result<Option<GeoTable>, StoreError> {
        let mut tables = Vec::new();
        for code in self.catalog.codes() {
            if let Some(table) = self.load_layer(code)? {
                debug!("{code}: {} records", table.len());
                tables.push(table);
            }
        }
        if !tables.is_empty() {
            return Ok(Some(GeoTable::concat(tables)));
        }

        let legacy = self.dir.join(LEGACY_FILE);
        match Self::read_optional(&legacy)? {
            Some(table) => {
                info!("no layer artifacts, serving {}", legacy.display());
                Ok(Some(table))
            }
            None => {
                warn!("no project data in {}", self.dir.display());
                Ok(None)
            }
        }
    }

    pub fn boundary_path(&self) -> PathBuf {
        self.dir.join(BOUNDARY_FILE)
    }

    pub fn load_boundary(&self) -> Result<Option<GeoTable>, StoreError> {
        Self::read_optional(&self.boundary_path())
    }

    pub fn write_boundary(&self, table: &GeoTable) -> Result<PathBuf, StoreError> {
        let path = self.boundary_path();
        self.write_atomic(&path, table)?;
        info!("boundary: wrote {} features to {}", table.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formats::geoparquet::write_geoparquet_file;
    use formats::{AttributeTable, Column};
    use foundation::Crs;
    use geo_types::{point, polygon, Geometry};
    use pretty_assertions::assert_eq;

    fn store(dir: &Path) -> LayerStore {
        LayerStore::open(
            dir,
            Arc::new(LayerCatalog::builtin()),
            Arc::new(CanonicalSchema::default()),
        )
        .unwrap()
    }

    fn layer(code: &str, folios: &[&str]) -> GeoTable {
        let columns = vec![
            Column::new("FOL_PROG", folios.iter().map(|f| CellValue::from(*f)).collect()),
            Column::new("MONTO_TOT", folios.iter().map(|_| CellValue::Number(100.0)).collect()),
            Column::new("TIPO_CAPA", folios.iter().map(|_| CellValue::from(code)).collect()),
        ];
        let geometries = (0..folios.len())
            .map(|i| {
                let x = -103.0 + i as f64;
                Geometry::from(polygon![(x: x, y: 20.0), (x: x + 0.5, y: 20.0), (x: x, y: 20.5)])
            })
            .collect();
        GeoTable::new(
            AttributeTable::from_columns(folios.len(), columns).unwrap(),
            geometries,
            Some(Crs::wgs84()),
        )
        .unwrap()
    }

    #[test]
    fn artifact_names() {
        assert_eq!(artifact_file_name("PSA"), "capa_PSA_procesada.parquet");
    }

    #[test]
    fn second_write_replaces_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.write_layer("PSA", &layer("PSA", &["A", "B", "C"])).unwrap();
        s.write_layer("psa", &layer("PSA", &["Z"])).unwrap();

        let loaded = s.load_layer("PSA").unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.attributes.value(0, "FOL_PROG"), Some(&"Z".into()));
        // Only the artifact is left behind, no temporary files.
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn identical_writes_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let t = layer("PFC", &["A", "B"]);
        let path = s.write_layer("PFC", &t).unwrap();
        let first = fs::read(&path).unwrap();
        s.write_layer("PFC", &t).unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
    }

    #[test]
    fn union_follows_catalog_order_and_backfills_layer() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.write_layer("MFC", &layer("MFC", &["M1"])).unwrap();
        s.write_layer("PSA", &layer("PSA", &["P1", "P2"])).unwrap();

        let mut bare = layer("CA", &["C1"]);
        bare.attributes.remove_column("TIPO_CAPA");
        bare.attributes
            .push_column("EXTRA", vec!["x".into()])
            .unwrap();
        write_geoparquet_file(&s.artifact_path("CA"), &bare).unwrap();

        let all = s.load_all().unwrap().unwrap();
        let layers: Vec<_> = all
            .attributes
            .column("TIPO_CAPA")
            .unwrap()
            .values
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(layers, vec!["PSA", "PSA", "MFC", "CA"]);
        assert_eq!(all.attributes.value(0, "EXTRA"), Some(&CellValue::Null));
        assert_eq!(all.attributes.value(3, "EXTRA"), Some(&"x".into()));
        assert_eq!(
            s.layer_counts().unwrap(),
            vec![("PSA".to_string(), 2), ("MFC".to_string(), 1), ("CA".to_string(), 1)]
        );
    }

    #[test]
    fn legacy_fallback_and_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.load_all().unwrap().is_none());

        write_geoparquet_file(&dir.path().join(LEGACY_FILE), &layer("PSA", &["L1"])).unwrap();
        assert_eq!(s.load_all().unwrap().unwrap().len(), 1);

        s.write_layer("PFC", &layer("PFC", &["N1", "N2"])).unwrap();
        assert_eq!(s.load_all().unwrap().unwrap().len(), 2);
    }

    #[test]
    fn projected_artifacts_are_reprojected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let utm = Crs::from_epsg(32613).unwrap();
        let [x, y] = utm.from_wgs84(-103.3, 20.7);
        let table = GeoTable::new(
            AttributeTable::from_columns(1, vec![Column::new("FOL_PROG", vec!["U".into()])])
                .unwrap(),
            vec![point!(x: x, y: y).into()],
            Some(utm),
        )
        .unwrap();
        s.write_layer("CA", &table).unwrap();

        let loaded = s.load_layer("CA").unwrap().unwrap();
        let b = loaded.bounds().unwrap();
        assert!((b.min[0] + 103.3).abs() < 1e-6 && (b.min[1] - 20.7).abs() < 1e-6, "{b:?}");
        assert_eq!(loaded.attributes.value(0, "TIPO_CAPA"), Some(&"CA".into()));
    }

    #[test]
    fn delete_and_unknown_codes() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.write_layer("PSA", &layer("PSA", &["A"])).unwrap();
        assert!(s.delete_layer("PSA").unwrap());
        assert!(!s.delete_layer("PSA").unwrap());
        assert!(s.load_layer("PSA").unwrap().is_none());
        assert!(matches!(
            s.write_layer("XYZ", &layer("XYZ", &["A"])),
            Err(StoreError::UnknownLayer(code)) if code == "XYZ"
        ));
    }

    #[test]
    fn boundary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(s.load_boundary().unwrap().is_none());
        s.write_boundary(&layer("PSA", &["B"])).unwrap();
        assert!(dir.path().join(BOUNDARY_FILE).is_file());
        assert_eq!(s.load_boundary().unwrap().unwrap().len(), 1);
    }
}
