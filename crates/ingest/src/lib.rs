//! Turns uploaded shapefile archives (plus an optional spreadsheet) into
//! normalized, WGS84 project layers.

pub mod geometry;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod resolver;

#[cfg(test)]
mod fixtures;

pub use geometry::{load_geometry, simplify_geometry, simplify_table, GeometryError};
pub use merge::{merge_attributes, JoinSummary, MergeOutcome};
pub use normalize::{normalize, NormalizeReport};
pub use pipeline::{
    CompanionTable, Pipeline, PipelineError, PipelineOptions, ProcessedLayer, Stage,
    UploadRequest, DEFAULT_SIMPLIFY_TOLERANCE,
};
pub use resolver::{map_schema, resolve_column, ColumnResolver, FieldMatch};
