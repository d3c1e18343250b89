use std::path::PathBuf;

use foundation::CrsError;
use thiserror::Error;

use crate::dbf::DbfError;
use crate::shp::ShpError;
use crate::wkb::WkbError;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Shape(#[from] ShpError),

    #[error("{0}")]
    Dbf(#[from] DbfError),

    #[error("{0}")]
    Wkb(#[from] WkbError),

    #[error("unsupported coordinate reference system: {0}")]
    Crs(#[from] CrsError),

    #[error("{0}")]
    Table(String),

    #[error("GeoParquet error: {0}")]
    Parquet(String),

    #[error("shapefile has {shapes} shapes but {records} attribute records")]
    RecordCountMismatch { shapes: usize, records: usize },

    #[error("column '{name}' has {found} values, expected {expected}")]
    ColumnLength {
        name: String,
        expected: usize,
        found: usize,
    },
}

impl FormatError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FormatError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<parquet::errors::ParquetError> for FormatError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        FormatError::Parquet(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for FormatError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        FormatError::Parquet(e.to_string())
    }
}
