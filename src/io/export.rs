use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{get_number, Engine, ExportTask, PyramidingPolicy};
use crate::graph::{Image, ImageCollection};
use crate::types::{format_millis, BoundingBox, RendviResult, TIME_START};

/// Settings shared by every export of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Output pixel size in metres
    pub scale: f64,
    pub crs: String,
    pub max_pixels: f64,
    /// Band name (or `.default`) to pyramiding policy
    pub pyramiding: BTreeMap<String, PyramidingPolicy>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    /// strftime layout of the date in asset names
    pub date_format: String,
    /// Properties attached to every exported image
    pub metadata: BTreeMap<String, Value>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        let mut pyramiding = BTreeMap::new();
        pyramiding.insert(".default".to_string(), PyramidingPolicy::Mean);
        Self {
            scale: 1000.0,
            crs: "EPSG:4326".to_string(),
            max_pixels: 1e13,
            pyramiding,
            prefix: None,
            suffix: None,
            date_format: "%Y%m%d".to_string(),
            metadata: BTreeMap::new(),
        }
    }
}

impl ExportOptions {
    /// `{prefix}{date}{suffix}` for an image timestamp
    pub fn export_name(&self, millis: i64) -> RendviResult<String> {
        let date = format_millis(millis, &self.date_format)?;
        Ok(format!(
            "{}{}{}",
            self.prefix.as_deref().unwrap_or(""),
            date,
            self.suffix.as_deref().unwrap_or("")
        ))
    }

    fn with_metadata(&self, image: Image) -> Image {
        self.metadata.iter().fold(image, |img, (key, value)| match value {
            Value::Number(n) => match n.as_f64() {
                Some(n) => img.set_number(key, n),
                None => img.set_text(key, &n.to_string()),
            },
            Value::String(s) => img.set_text(key, s),
            other => img.set_text(key, &other.to_string()),
        })
    }
}

/// Submit one asset export per image, newest first
///
/// Blocks once for the collection size and once per image for its timestamp;
/// the exports themselves are not awaited. Returns the task ids.
pub fn batch_export<E: Engine + ?Sized>(
    engine: &E,
    collection: &ImageCollection,
    region: &BoundingBox,
    asset_root: &str,
    options: &ExportOptions,
) -> RendviResult<Vec<String>> {
    let n = get_number(engine, &collection.size())? as usize;
    log::info!("Exporting {} images to {}", n, asset_root);
    let images = collection.sort(TIME_START, false).to_list(Some(n));
    let root = asset_root.trim_end_matches('/');

    let mut task_ids = Vec::with_capacity(n);
    for i in 0..n {
        let image = options.with_metadata(images.get_image(i));
        let millis = get_number(engine, &image.time_start())? as i64;
        let name = options.export_name(millis)?;
        log::info!("Running export for {}", name);

        let task = ExportTask {
            image,
            description: name.clone(),
            asset_id: format!("{}/{}", root, name),
            region: region.clone(),
            scale: options.scale,
            crs: options.crs.clone(),
            max_pixels: options.max_pixels,
            pyramiding: options.pyramiding.clone(),
        };
        task_ids.push(engine.start_export(&task)?);
    }
    Ok(task_ids)
}

/// Export encoding: target band ×10000 as int16, auxiliary bands ×100 as uint8
///
/// The timestamp is kept; an optional land mask hides everything else.
pub fn format_for_export(image: &Image, band: &str, aux_pattern: Option<&str>, land_mask: Option<&Image>) -> Image {
    image.retain_time(|img| {
        let mut out = img.select(&[band]).multiply(10_000.0).to_int16().rename(&[band]);
        if let Some(pattern) = aux_pattern {
            out = out.add_bands(&img.select_pattern(pattern).multiply(100.0).to_uint8());
        }
        match land_mask {
            Some(mask) => out.update_mask(mask),
            None => out,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_names() {
        let options = ExportOptions {
            prefix: Some("MOD_reNDVI".to_string()),
            suffix: Some("v0".to_string()),
            ..ExportOptions::default()
        };
        // 2020-03-01
        assert_eq!(options.export_name(1_583_020_800_000).unwrap(), "MOD_reNDVI20200301v0");
        assert_eq!(ExportOptions::default().export_name(0).unwrap(), "19700101");
    }

    #[test]
    fn test_options_from_json() {
        let options: ExportOptions =
            serde_json::from_str(r#"{"scale": 250, "pyramiding": {".default": "mean", "despiked": "mode"}}"#).unwrap();
        assert_eq!(options.scale, 250.0);
        assert_eq!(options.crs, "EPSG:4326");
        assert_eq!(options.pyramiding.get("despiked"), Some(&PyramidingPolicy::Mode));
    }
}
