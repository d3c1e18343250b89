//! Downloadable copies of the filtered projects.

use std::io::{Cursor, Write};

use catalog::CanonicalSchema;
use formats::shapefile::shapefile_bytes;
use formats::tabular::write_csv;
use formats::{FormatError, GeoTable};
use thiserror::Error;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::analysis::statistics::surface_column;

pub const CSV_EXPORT_NAME: &str = "Base_Datos_CONAFOR.csv";
pub const SHAPEFILE_EXPORT_NAME: &str = "Proyectos_Shapefile.zip";
pub const SHAPEFILE_STEM: &str = "Proyectos_CONAFOR";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("could not build the zip archive: {0}")]
    Zip(#[from] ZipError),

    #[error("could not build the zip archive: {0}")]
    Io(#[from] std::io::Error),
}

/// `(column, header)` pairs for the table download. Data without a
/// `SUPERFICIE` column exports whichever surface column it has.
pub fn export_columns(table: &GeoTable, schema: &CanonicalSchema) -> Vec<(String, String)> {
    let surface = surface_column(&table.attributes).map(str::to_string);
    schema
        .export_columns()
        .into_iter()
        .map(|(name, label)| match &surface {
            Some(s) if name == "SUPERFICIE" && table.attributes.column(&name).is_none() => {
                (s.clone(), label)
            }
            _ => (name, label),
        })
        .collect()
}

/// UTF-8 CSV with friendly headers, geometry omitted.
pub fn projects_csv(table: &GeoTable, schema: &CanonicalSchema) -> Result<Vec<u8>, FormatError> {
    write_csv(&table.attributes, &export_columns(table, schema))
}

/// The projects as a zipped shapefile bundle named [`SHAPEFILE_STEM`].
pub fn projects_shapefile_zip(table: &GeoTable) -> Result<Vec<u8>, ExportError> {
    let files = shapefile_bytes(SHAPEFILE_STEM, table)?;
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in files {
        zip.start_file(name, options)?;
        zip.write_all(&bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}
