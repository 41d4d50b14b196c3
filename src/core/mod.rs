//! Core reNDVI processing stages

pub mod climatology;
pub mod composite;
pub mod dekad;
pub mod despike;
pub mod forecast;
pub mod masking;
pub mod series;
pub mod smoothing;

// Re-export main types
pub use climatology::{BackFillParams, Climatology, ClimatologyParams};
pub use composite::DekadCompositor;
pub use dekad::{dekad_ranges, dekad_to_date, is_leap};
pub use despike::{DespikeParams, Despiker};
pub use forecast::{AutoRegressive, Coefficients, ForecastModel, Harmonics, Regression, Trend};
pub use masking::{extract_bits, BitField, FlagPriority, Masker, QaLayout};
pub use series::{add_normalized_difference, rescale_emodis, scale_ndvi, time_band, Rendvi};
pub use smoothing::{Smoother, SmoothingParams};
