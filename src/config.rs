//! Pipeline configuration loaded from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{BackFillParams, ClimatologyParams, DespikeParams, SmoothingParams};
use crate::engine::EngineConfig;
use crate::io::ExportOptions;
use crate::types::{BoundingBox, RendviError, RendviResult, TimeUnit};

/// Where and how the finished series is written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub region: BoundingBox,
    /// Asset folder receiving one image per dekad
    pub asset_root: String,
    /// Auxiliary bands exported next to the target band
    pub aux_band_pattern: Option<String>,
    /// Collection whose first image holds the land mask band
    pub land_mask: Option<String>,
    pub land_mask_band: String,
    pub options: ExportOptions,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            region: BoundingBox::new(33.0, -5.0, 42.0, 6.0),
            asset_root: String::new(),
            aux_band_pattern: Some("^(clima|de|pct).*".to_string()),
            land_mask: None,
            land_mask_band: "land".to_string(),
            options: ExportOptions::default(),
        }
    }
}

/// Every setting of one reNDVI run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    /// Daily surface reflectance product
    pub product: String,
    /// Companion product carrying the 1 km state band (MODIS only)
    pub state_product: Option<String>,
    pub band: String,
    pub start_year: i32,
    pub end_year: i32,
    pub include_qa: bool,
    pub seed: u64,
    pub time_unit: TimeUnit,
    pub despike: DespikeParams,
    pub climatology: ClimatologyParams,
    /// Stored climatology collection; computed from the run when absent
    pub climatology_asset: Option<String>,
    pub back_fill: BackFillParams,
    pub smoothing: SmoothingParams,
    pub export: ExportConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            product: "MOD09GQ".to_string(),
            state_product: Some("MOD09GA".to_string()),
            band: "ndvi".to_string(),
            start_year: 2018,
            end_year: 2020,
            include_qa: true,
            seed: 0,
            time_unit: TimeUnit::Year,
            despike: DespikeParams { keep_band_pattern: Some("^(pct|nClear).*".to_string()), ..Default::default() },
            climatology: ClimatologyParams::default(),
            climatology_asset: None,
            back_fill: BackFillParams { keep_band_pattern: Some("^(de|pct|nClear).*".to_string()), ..Default::default() },
            smoothing: SmoothingParams {
                keep_band_pattern: Some("^(clima|de|pct|nClear).*".to_string()),
                ..Default::default()
            },
            export: ExportConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> RendviResult<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> RendviResult<Self> {
        log::info!("Loading pipeline configuration from {}", path.as_ref().display());
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Calendar years processed, inclusive
    pub fn years(&self) -> Vec<i32> {
        (self.start_year..=self.end_year).collect()
    }

    pub fn validate(&self) -> RendviResult<()> {
        if self.end_year < self.start_year {
            return Err(RendviError::Config(format!(
                "end_year {} precedes start_year {}",
                self.end_year, self.start_year
            )));
        }
        if self.despike.step == 0 || self.back_fill.step == 0 {
            return Err(RendviError::Config("step must be positive".to_string()));
        }
        if self.smoothing.window < 2 {
            return Err(RendviError::Config("smoothing window must span at least two days".to_string()));
        }
        Ok(())
    }
}
