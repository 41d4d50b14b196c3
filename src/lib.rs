//! reNDVI: rapid enhanced NDVI time series
//!
//! Builds quality-masked, dekadal, despiked, gap-filled and smoothed NDVI
//! series as deferred raster graphs. Nothing is computed on the client: the
//! graphs are resolved by an [`engine::Engine`], either the remote compute
//! service or the in-memory [`engine::LocalEngine`] used for testing.

pub mod config;
pub mod core;
pub mod engine;
pub mod graph;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    BoundingBox, QaFlag, RendviError, RendviResult, TimeUnit, BEGIN, CONSTANT_BAND, DAY_MS, QA_BAND, TIME_BAND,
    TIME_START,
};

pub use crate::core::{Climatology, DekadCompositor, Despiker, Masker, QaLayout, Rendvi, Smoother};
pub use config::PipelineConfig;
pub use engine::{Engine, LocalEngine, RemoteEngine};
pub use graph::{Image, ImageCollection, List, Lookup, Number};
pub use io::Catalog;
