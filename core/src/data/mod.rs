pub mod dataset;
pub mod stats;
pub mod store;

pub use dataset::{Column, ColumnKind, Dataset, SourceFormat, as_f64, display_value, parse_cell};
pub use store::Datastore;
