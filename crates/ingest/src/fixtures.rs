//! Archives and tables built in code for the ingest tests.

use std::io::{Cursor, Write};

use foundation::Crs;
use formats::shapefile::shapefile_bytes;
use formats::{dbf, shp, AttributeTable, CellValue, Column, GeoTable};
use geo_types::{point, polygon, Geometry};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const UTM13_WKT: &str = r#"PROJCS["WGS_1984_UTM_Zone_13N",GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]],PROJECTION["Transverse_Mercator"],PARAMETER["False_Easting",500000.0],PARAMETER["False_Northing",0.0],PARAMETER["Central_Meridian",-105.0],PARAMETER["Scale_Factor",0.9996],PARAMETER["Latitude_Of_Origin",0.0],UNIT["Meter",1.0]]"#;

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }
    cursor.into_inner()
}

/// Shapefile members named after `shp_path` (directory, stem and the
/// extension's case are taken from it).
pub fn shapefile_entries(shp_path: &str, table: &GeoTable) -> Vec<(String, Vec<u8>)> {
    let (dir, file) = match shp_path.rsplit_once('/') {
        Some((dir, file)) => (format!("{dir}/"), file),
        None => (String::new(), shp_path),
    };
    let (stem, ext) = file.rsplit_once('.').unwrap();
    shapefile_bytes(stem, table)
        .unwrap()
        .into_iter()
        .map(|(name, bytes)| {
            if name.ends_with(".shp") {
                (format!("{dir}{stem}.{ext}"), bytes)
            } else {
                (format!("{dir}{name}"), bytes)
            }
        })
        .collect()
}

pub fn shapefile_zip(shp_path: &str, table: &GeoTable) -> Vec<u8> {
    let entries = shapefile_entries(shp_path, table);
    let refs: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(n, b)| (n.as_str(), b.as_slice()))
        .collect();
    zip_bytes(&refs)
}

fn square(i: usize) -> Geometry<f64> {
    let x = -103.0 + i as f64 * 0.01;
    polygon![
        (x: x, y: 20.0),
        (x: x + 0.005, y: 20.0),
        (x: x + 0.005, y: 20.005),
        (x: x, y: 20.005),
    ]
    .into()
}

/// One small square per folio, with a `FOLIO` column only.
pub fn parcels(folios: &[&str]) -> GeoTable {
    parcels_with(folios, Vec::new())
}

/// Like [`parcels`] with extra columns appended after `FOLIO`.
pub fn parcels_with(folios: &[&str], extra: Vec<Column>) -> GeoTable {
    let mut columns = vec![Column::new(
        "FOLIO",
        folios.iter().map(|f| CellValue::from(*f)).collect(),
    )];
    columns.extend(extra);
    let attributes = AttributeTable::from_columns(folios.len(), columns).unwrap();
    let geometries = (0..folios.len()).map(square).collect();
    GeoTable::new(attributes, geometries, Some(Crs::wgs84())).unwrap()
}

/// A single-point shapefile in UTM zone 13N located at `(lon, lat)`.
pub fn utm_parcel_zip(lon: f64, lat: f64) -> Vec<u8> {
    let utm = Crs::from_epsg(32613).unwrap();
    let [x, y] = utm.from_wgs84(lon, lat);
    let files = shp::write_shapes(&[point!(x: x, y: y).into()]).unwrap();
    let attributes =
        AttributeTable::from_columns(1, vec![Column::new("FOLIO", vec!["U-1".into()])]).unwrap();
    let dbf = dbf::write_dbf(&attributes);
    zip_bytes(&[
        ("utm.shp", files.shp.as_slice()),
        ("utm.shx", files.shx.as_slice()),
        ("utm.dbf", dbf.as_slice()),
        ("utm.prj", UTM13_WKT.as_bytes()),
    ])
}
