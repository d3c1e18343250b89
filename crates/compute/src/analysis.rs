pub mod selection;
pub mod spatial;
pub mod statistics;
