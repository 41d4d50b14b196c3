//! Dataset catalog and asset export

pub mod catalog;
pub mod export;

pub use catalog::{Catalog, Product, Sensor};
pub use export::{batch_export, format_for_export, ExportOptions};
