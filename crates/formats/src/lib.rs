//! Data formats: the in-memory table model and the codecs that move it
//! between shapefiles, companion spreadsheets, GeoParquet, GeoJSON and CSV.

pub mod dbf;
pub mod geojson;
pub mod geoparquet;
pub mod shapefile;
pub mod shp;
pub mod table;
pub mod tabular;
pub mod wkb;

mod error;

pub use error::*;
pub use table::*;

/// Name of the geometry column in persisted artifacts.
pub const GEOMETRY_COLUMN: &str = "geometry";
