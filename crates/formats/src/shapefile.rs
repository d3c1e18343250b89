//! Shapefile datasets: the `.shp`/`.shx` geometry pair plus `.dbf`, `.prj`
//! and `.cpg` sidecars, read into a [`GeoTable`].

use std::path::{Path, PathBuf};

use foundation::{Crs, WGS84_WKT};
use tracing::warn;

use crate::dbf::{self, Encoding};
use crate::shp;
use crate::table::{AttributeTable, GeoTable};
use crate::FormatError;

/// Sibling of `shp` with the same stem and extension `ext`, matched case-insensitively.
pub fn find_sidecar(shp: &Path, ext: &str) -> Option<PathBuf> {
    let stem = shp.file_stem()?.to_str()?;
    let dir = shp.parent().unwrap_or(Path::new("."));
    let direct = dir.join(format!("{stem}.{ext}"));
    if direct.is_file() {
        return Some(direct);
    }
    std::fs::read_dir(dir).ok()?.flatten().map(|e| e.path()).find(|p| {
        p.is_file()
            && p.file_stem().and_then(|s| s.to_str()) == Some(stem)
            && p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    })
}

fn read(path: &Path) -> Result<Vec<u8>, FormatError> {
    std::fs::read(path).map_err(|e| FormatError::io(path, e))
}

/// Reads a shapefile. Null shapes and deleted records are dropped (with a
/// warning) so every returned row has a geometry. A missing `.prj` yields a
/// table without CRS; a missing `.dbf` yields a table without attributes.
pub fn read_shapefile(path: &Path) -> Result<GeoTable, FormatError> {
    let shapes = shp::read_shapes(&read(path)?)?;

    let encoding = match find_sidecar(path, "cpg") {
        Some(cpg) => Encoding::from_cpg(&String::from_utf8_lossy(&read(&cpg)?)),
        None => Encoding::Auto,
    };
    let (attributes, deleted) = match find_sidecar(path, "dbf") {
        Some(dbf_path) => {
            let records = dbf::read_dbf(&read(&dbf_path)?, encoding)?;
            if records.table.row_count() != shapes.len() {
                return Err(FormatError::RecordCountMismatch {
                    shapes: shapes.len(),
                    records: records.table.row_count(),
                });
            }
            (records.table, records.deleted)
        }
        None => {
            warn!("{}: no .dbf sidecar, reading geometry only", path.display());
            (AttributeTable::new(shapes.len()), vec![false; shapes.len()])
        }
    };

    let crs = match find_sidecar(path, "prj") {
        Some(prj) => Some(Crs::from_wkt(&String::from_utf8_lossy(&read(&prj)?))?),
        None => {
            warn!("{}: no .prj sidecar, coordinates are used as-is", path.display());
            None
        }
    };

    let mut keep = Vec::with_capacity(shapes.len());
    let mut geometries = Vec::with_capacity(shapes.len());
    for (i, shape) in shapes.into_iter().enumerate() {
        if deleted[i] {
            continue;
        }
        if let Some(g) = shape {
            keep.push(i);
            geometries.push(g);
        }
    }
    let dropped = attributes.row_count() - keep.len();
    if dropped > 0 {
        warn!("{}: dropped {dropped} records without geometry", path.display());
    }
    let attributes = if dropped > 0 {
        attributes.take_rows(&keep)
    } else {
        attributes
    };
    GeoTable::new(attributes, geometries, crs)
}

/// Encodes `table` as the files of a WGS84 shapefile named `stem`, returning
/// `(file name, bytes)` pairs. Projected tables are converted first.
pub fn shapefile_bytes(stem: &str, table: &GeoTable) -> Result<Vec<(String, Vec<u8>)>, FormatError> {
    let reprojected;
    let table = if table.needs_reprojection() {
        reprojected = table.clone().into_wgs84();
        &reprojected
    } else {
        table
    };
    let shapes = shp::write_shapes(&table.geometries)?;
    Ok(vec![
        (format!("{stem}.shp"), shapes.shp),
        (format!("{stem}.shx"), shapes.shx),
        (format!("{stem}.dbf"), dbf::write_dbf(&table.attributes)),
        (format!("{stem}.prj"), WGS84_WKT.as_bytes().to_vec()),
        (format!("{stem}.cpg"), b"UTF-8".to_vec()),
    ])
}

/// Writes `table` as `dir/stem.{shp,shx,dbf,prj,cpg}`.
pub fn write_shapefile(dir: &Path, stem: &str, table: &GeoTable) -> Result<Vec<PathBuf>, FormatError> {
    let mut written = Vec::new();
    for (name, bytes) in shapefile_bytes(stem, table)? {
        let path = dir.join(name);
        std::fs::write(&path, bytes).map_err(|e| FormatError::io(&path, e))?;
        written.push(path);
    }
    Ok(written)
}
