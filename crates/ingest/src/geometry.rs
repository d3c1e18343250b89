//! Geometry loading: zip archive -> shapefile -> WGS84 [`GeoTable`].

use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use formats::shapefile::read_shapefile;
use formats::{FormatError, GeoTable};
use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::Simplify;
use geo_types::{Geometry, Line, Polygon};
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::ZipArchive;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("The uploaded file is not a valid zip archive: {0}")]
    InvalidArchive(String),

    #[error("No .shp file found in the archive")]
    NoShapefile,

    #[error("Could not extract the archive: {0}")]
    Extract(#[source] io::Error),

    #[error("Could not read the shapefile: {0}")]
    Unreadable(#[source] FormatError),

    #[error("Could not read the shapefile projection (.prj): {0}")]
    Projection(#[source] FormatError),
}

impl GeometryError {
    /// Structural problems are about the archive itself; the rest are about its contents.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            GeometryError::InvalidArchive(_) | GeometryError::NoShapefile | GeometryError::Extract(_)
        )
    }
}

fn is_metadata_entry(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name == "__MACOSX" || name.starts_with("._")
    })
}

/// Upper bound on the bytes an upload may expand to on disk.
pub const MAX_EXTRACTED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Extracts every file of `archive` under `dir`. Entries whose path would
/// leave `dir` fail the whole extraction. Returns the number of files written.
pub fn extract_archive(archive: &[u8], dir: &Path) -> Result<usize, GeometryError> {
    extract_archive_within(archive, dir, MAX_EXTRACTED_BYTES)
}

/// [`extract_archive`] with an explicit cap on the total decompressed size.
pub fn extract_archive_within(
    archive: &[u8],
    dir: &Path,
    max_bytes: u64,
) -> Result<usize, GeometryError> {
    let mut remaining = max_bytes;
    let mut zip = ZipArchive::new(Cursor::new(archive))
        .map_err(|e| GeometryError::InvalidArchive(e.to_string()))?;
    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| GeometryError::InvalidArchive(e.to_string()))?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(GeometryError::InvalidArchive(format!(
                "entry '{}' points outside the archive",
                entry.name()
            )));
        };
        if entry.is_dir() || is_metadata_entry(&rel) {
            continue;
        }
        let out_path = dir.join(&rel);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(GeometryError::Extract)?;
        }
        let mut out = fs::File::create(&out_path).map_err(GeometryError::Extract)?;
        // Declared sizes can lie; count what actually comes out of the decoder.
        let mut bounded = (&mut entry).take(remaining.saturating_add(1));
        let copied = io::copy(&mut bounded, &mut out).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                GeometryError::InvalidArchive(e.to_string())
            }
            _ => GeometryError::Extract(e),
        })?;
        if copied > remaining {
            return Err(GeometryError::InvalidArchive(format!(
                "contents expand beyond {} MB",
                max_bytes / (1024 * 1024)
            )));
        }
        remaining -= copied;
        written += 1;
    }
    Ok(written)
}

/// First `.shp` (any case) in a sorted depth-first walk of `dir`.
pub fn find_shapefile(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("shp"))
        })
}

/// Reads the first shapefile inside a zip archive and reprojects it to WGS84.
/// The extraction directory is removed before returning.
pub fn load_geometry(archive: &[u8]) -> Result<GeoTable, GeometryError> {
    let dir = tempfile::tempdir().map_err(GeometryError::Extract)?;
    let files = extract_archive(archive, dir.path())?;
    let shp = find_shapefile(dir.path()).ok_or(GeometryError::NoShapefile)?;
    let name = shp.strip_prefix(dir.path()).unwrap_or(&shp).display().to_string();
    info!("reading shapefile {name} ({files} files extracted)");

    let table = read_shapefile(&shp).map_err(|e| match e {
        FormatError::Crs(_) => GeometryError::Projection(e),
        other => GeometryError::Unreadable(other),
    })?;
    match &table.crs {
        Some(crs) if table.needs_reprojection() => {
            info!("reprojecting {} features from {} to WGS 84", table.len(), crs.name)
        }
        Some(_) => {}
        None => warn!("{name}: no projection information, assuming WGS 84 coordinates"),
    }
    Ok(table.into_wgs84())
}

fn ring_lines(polygon: &Polygon<f64>) -> Vec<Vec<Line<f64>>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.lines().collect())
        .collect()
}

/// No ring crosses itself or another ring. Neighbouring edges of a ring may
/// only share their common vertex.
fn rings_are_simple(polygon: &Polygon<f64>) -> bool {
    let rings = ring_lines(polygon);
    for (ri, ring) in rings.iter().enumerate() {
        for (i, a) in ring.iter().enumerate() {
            for (j, b) in ring.iter().enumerate().skip(i + 1) {
                let neighbours = j == i + 1 || (i == 0 && j == ring.len() - 1);
                match line_intersection(*a, *b) {
                    None => {}
                    Some(LineIntersection::SinglePoint { .. }) if neighbours => {}
                    Some(_) => return false,
                }
            }
            for other in &rings[ri + 1..] {
                if other.iter().any(|b| line_intersection(*a, *b).is_some()) {
                    return false;
                }
            }
        }
    }
    true
}

fn simplify_polygon(polygon: &Polygon<f64>, tolerance: f64) -> Polygon<f64> {
    let s = polygon.simplify(&tolerance);
    let kept = s.exterior().0.len() >= 4 && s.interiors().iter().all(|r| r.0.len() >= 4);
    if kept && rings_are_simple(&s) { s } else { polygon.clone() }
}

/// Douglas-Peucker simplification in degrees. A polygon keeps its original
/// shape when simplifying would collapse a ring or make rings cross.
pub fn simplify_geometry(geometry: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(l) => {
            let s = l.simplify(&tolerance);
            if s.0.len() >= 2 { Geometry::LineString(s) } else { geometry.clone() }
        }
        Geometry::MultiLineString(ml) => Geometry::MultiLineString(ml.simplify(&tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(simplify_polygon(p, tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(
            mp.0.iter().map(|p| simplify_polygon(p, tolerance)).collect(),
        ),
        other => other.clone(),
    }
}

/// Applies [`simplify_geometry`] to every row.
pub fn simplify_table(table: &mut GeoTable, tolerance: f64) {
    if tolerance <= 0.0 {
        return;
    }
    for g in table.geometries.iter_mut() {
        *g = simplify_geometry(g, tolerance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use formats::CellValue;
    use geo_types::{line_string, polygon};

    #[test]
    fn finds_nested_shapefile_case_insensitively() {
        let parcels = fixtures::parcels(&["A-001", "A-002"]);
        let archive = fixtures::shapefile_zip("entrega/Capa.SHP", &parcels);
        let table = load_geometry(&archive).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.attributes.value(1, "FOLIO"), Some(&CellValue::from("A-002")));
        assert!(table.crs.as_ref().is_some_and(|c| c.is_geographic()));
    }

    #[test]
    fn archive_without_shapefile() {
        let archive = fixtures::zip_bytes(&[("datos.csv", b"FOLIO,MONTO\nA,1\n".as_slice())]);
        let err = load_geometry(&archive).unwrap_err();
        assert_eq!(err.to_string(), "No .shp file found in the archive");
        assert!(err.is_structural());
    }

    #[test]
    fn not_a_zip() {
        let err = load_geometry(b"definitely not a zip").unwrap_err();
        assert!(err
            .to_string()
            .starts_with("The uploaded file is not a valid zip archive: "));
    }

    #[test]
    fn macos_metadata_is_ignored() {
        let parcels = fixtures::parcels(&["A-001"]);
        let mut entries = fixtures::shapefile_entries("capa/predios.shp", &parcels);
        entries.insert(0, ("__MACOSX/capa/._predios.shp".to_string(), b"junk".to_vec()));
        let archive = fixtures::zip_bytes(
            &entries
                .iter()
                .map(|(n, b)| (n.as_str(), b.as_slice()))
                .collect::<Vec<_>>(),
        );
        assert_eq!(load_geometry(&archive).unwrap().len(), 1);
    }

    #[test]
    fn escaping_entries_are_rejected() {
        let archive = fixtures::zip_bytes(&[("../evil.shp", b"x".as_slice())]);
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidArchive(_)), "{err}");
    }

    #[test]
    fn corrupt_shapefile_is_a_parse_error() {
        let archive = fixtures::zip_bytes(&[("capa.shp", [0u8; 120].as_slice())]);
        let err = load_geometry(&archive).unwrap_err();
        assert!(err.to_string().starts_with("Could not read the shapefile: "), "{err}");
        assert!(!err.is_structural());
    }

    #[test]
    fn unsupported_projection_names_it() {
        let parcels = fixtures::parcels(&["A-001"]);
        let mut entries = fixtures::shapefile_entries("capa.shp", &parcels);
        for (name, bytes) in entries.iter_mut() {
            if name.ends_with(".prj") {
                *bytes = br#"PROJCS["World_Robinson",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Robinson"],PARAMETER["False_Easting",0.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",0.0],UNIT["Meter",1.0]]"#.to_vec();
            }
        }
        let archive = fixtures::zip_bytes(
            &entries
                .iter()
                .map(|(n, b)| (n.as_str(), b.as_slice()))
                .collect::<Vec<_>>(),
        );
        let err = load_geometry(&archive).unwrap_err();
        assert!(matches!(err, GeometryError::Projection(_)));
        assert!(err.to_string().contains("Robinson"), "{err}");
    }

    #[test]
    fn foreign_datum_is_a_projection_error() {
        let parcels = fixtures::parcels(&["A-001"]);
        let mut entries = fixtures::shapefile_entries("capa.shp", &parcels);
        for (name, bytes) in entries.iter_mut() {
            if name.ends_with(".prj") {
                *bytes = br#"GEOGCS["GCS_North_American_1927",DATUM["D_North_American_1927",SPHEROID["Clarke_1866",6378206.4,294.9786982]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#.to_vec();
            }
        }
        let archive = fixtures::zip_bytes(
            &entries
                .iter()
                .map(|(n, b)| (n.as_str(), b.as_slice()))
                .collect::<Vec<_>>(),
        );
        let err = load_geometry(&archive).unwrap_err();
        assert!(matches!(err, GeometryError::Projection(_)), "{err}");
        assert!(err.to_string().contains("D_North_American_1927"), "{err}");
        assert!(!err.is_structural());
    }

    #[test]
    fn extraction_stops_at_the_size_cap() {
        let big = vec![b'x'; 4096];
        let archive = fixtures::zip_bytes(&[("a.dbf", big.as_slice()), ("b.dbf", big.as_slice())]);
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(extract_archive_within(&archive, dir.path(), 8192).unwrap(), 2);

        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive_within(&archive, dir.path(), 6000).unwrap_err();
        assert!(matches!(err, GeometryError::InvalidArchive(_)), "{err}");
        assert!(err.is_structural());
    }

    #[test]
    fn simplification_never_pushes_a_hole_outside() {
        // Removing the shallow peak at (5, 10.3) would leave the hole's apex
        // above the new top edge.
        let with_hole: Geometry<f64> = polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 5.0, y: 10.3),
                (x: 0.0, y: 10.0),
            ],
            interiors: [[(x: 3.0, y: 9.0), (x: 7.0, y: 9.0), (x: 5.0, y: 10.25)]]
        )
        .into();
        assert_eq!(simplify_geometry(&with_hole, 0.5), with_hole);

        let Geometry::Polygon(solid) = simplify_geometry(
            &polygon![
                (x: 0.0, y: 0.0),
                (x: 10.0, y: 0.0),
                (x: 10.0, y: 10.0),
                (x: 5.0, y: 10.3),
                (x: 0.0, y: 10.0),
            ]
            .into(),
            0.5,
        ) else {
            panic!("polygon stays a polygon");
        };
        assert_eq!(solid.exterior().0.len(), 5);
    }

    #[test]
    fn projected_source_becomes_wgs84() {
        let archive = fixtures::utm_parcel_zip(-103.3, 20.7);
        let table = load_geometry(&archive).unwrap();
        let b = table.bounds().unwrap();
        assert!((b.min[0] + 103.3).abs() < 1e-6, "{b:?}");
        assert!((b.min[1] - 20.7).abs() < 1e-6, "{b:?}");
    }

    #[test]
    fn simplification_keeps_small_rings() {
        let tiny: Geometry<f64> =
            polygon![(x: 0.0, y: 0.0), (x: 0.0001, y: 0.0), (x: 0.0001, y: 0.0001)].into();
        assert_eq!(simplify_geometry(&tiny, 0.0005), tiny);

        let wiggly: Geometry<f64> = line_string![
            (x: 0.0, y: 0.0),
            (x: 0.5, y: 0.0001),
            (x: 1.0, y: 0.0),
        ]
        .into();
        let Geometry::LineString(s) = simplify_geometry(&wiggly, 0.0005) else {
            panic!("line stays a line");
        };
        assert_eq!(s.0.len(), 2);
    }
}
