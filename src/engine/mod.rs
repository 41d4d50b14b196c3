//! Execution back-ends for deferred graphs
//!
//! An [`Engine`] exposes the only two ways a graph leaves the client: a
//! synchronous `compute` for small values needed to drive client-side control
//! flow, and a fire-and-forget `start_export` that materializes an image to a
//! persistent asset. There is no polling, retrying or cancelling of exports.

pub mod encode;
pub mod local;
pub mod raster;
pub mod remote;

mod lstsq;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{Expr, Handle, Image};
use crate::types::{BoundingBox, RendviError, RendviResult};

pub use local::{Datum, LocalEngine};
pub use raster::{LocalBand, LocalImage};
pub use remote::{EngineConfig, RemoteEngine};

/// Aggregation used when building lower resolution pyramid levels of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PyramidingPolicy {
    Mean,
    Mode,
    Min,
    Max,
    Sample,
}

impl PyramidingPolicy {
    pub fn as_api_str(self) -> &'static str {
        match self {
            PyramidingPolicy::Mean => "MEAN",
            PyramidingPolicy::Mode => "MODE",
            PyramidingPolicy::Min => "MIN",
            PyramidingPolicy::Max => "MAX",
            PyramidingPolicy::Sample => "SAMPLE",
        }
    }
}

/// One image-to-asset export job
#[derive(Debug, Clone)]
pub struct ExportTask {
    pub image: Image,
    pub description: String,
    pub asset_id: String,
    pub region: BoundingBox,
    /// Output pixel size in metres
    pub scale: f64,
    pub crs: String,
    pub max_pixels: f64,
    /// Band name (or `.default`) to pyramiding policy
    pub pyramiding: BTreeMap<String, PyramidingPolicy>,
}

/// A back-end able to resolve and export deferred graphs
pub trait Engine {
    /// Resolve a graph to a small JSON value, blocking until it is available
    fn compute(&self, expr: &Expr) -> RendviResult<serde_json::Value>;

    /// Submit an export job and return its identifier without waiting for it
    fn start_export(&self, task: &ExportTask) -> RendviResult<String>;
}

/// Resolve any handle to JSON
pub fn get_info<E: Engine + ?Sized, H: Handle>(engine: &E, handle: &H) -> RendviResult<serde_json::Value> {
    engine.compute(handle.expr())
}

/// Resolve a handle that must evaluate to a number
pub fn get_number<E: Engine + ?Sized, H: Handle>(engine: &E, handle: &H) -> RendviResult<f64> {
    let value = get_info(engine, handle)?;
    value
        .as_f64()
        .ok_or_else(|| RendviError::UnexpectedValue(format!("expected a number, got {}", value)))
}
