//! Immutable configuration shared by the pipeline, the store and the service:
//! which layers exist and which columns every record must carry.

mod layer;
mod schema;

pub use layer::*;
pub use schema::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    UnknownLayer(String),
    InvalidLayer { code: String, reason: String },
    DuplicateLayer(String),
    Empty,
    Corrupt(String),
    Io(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::UnknownLayer(code) => write!(f, "unknown layer code '{code}'"),
            CatalogError::InvalidLayer { code, reason } => {
                write!(f, "invalid layer '{code}': {reason}")
            }
            CatalogError::DuplicateLayer(code) => write!(f, "layer '{code}' is defined twice"),
            CatalogError::Empty => write!(f, "layer catalog is empty"),
            CatalogError::Corrupt(msg) => write!(f, "layer catalog file corrupt: {msg}"),
            CatalogError::Io(msg) => write!(f, "layer catalog file error: {msg}"),
        }
    }
}

impl std::error::Error for CatalogError {}
