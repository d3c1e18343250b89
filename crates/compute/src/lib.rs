//! Read-side computations over the unified project dataset: layer filtering,
//! dashboard aggregates, map framing and downloads.

pub mod analysis;
pub mod export;

pub use analysis::selection::*;
pub use analysis::spatial::*;
pub use analysis::statistics::*;
pub use export::*;
