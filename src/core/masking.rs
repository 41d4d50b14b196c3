use serde::{Deserialize, Serialize};

use crate::graph::{Image, ImageCollection};
use crate::types::{QaFlag, QA_BAND};

/// Unsigned value of bits `[start, end)` shifted down to bit 0, as a band named `name`
///
/// When `end <= start` the single bit at `start` is extracted. Fields 64 or
/// more bits wide keep every bit above `start`.
pub fn extract_bits(image: &Image, start: u32, end: u32, name: &str) -> Image {
    let width = if end > start { end - start } else { 1 };
    let pattern = 1u64.checked_shl(width).map_or(u64::MAX, |bit| bit - 1) as f64;
    image
        .select_index(0)
        .right_shift(start as f64)
        .bitwise_and(pattern)
        .rename(&[name])
}

/// A packed quality field and the value it holds for a good pixel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitField {
    pub band: String,
    pub start: u32,
    pub end: u32,
    pub pass: u32,
}

impl BitField {
    pub fn new(band: &str, start: u32, end: u32, pass: u32) -> Self {
        Self { band: band.to_string(), start, end, pass }
    }

    /// 1 where the field holds the passing value
    pub fn passes(&self, image: &Image) -> Image {
        extract_bits(&image.select(&[self.band.as_str()]), self.start, self.end, &self.band).eq(self.pass as f64)
    }
}

/// Where each quality indicator of a sensor family lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaLayout {
    /// Read from the surface reflectance image itself
    pub quality: BitField,
    pub cloud: BitField,
    pub shadow: BitField,
    pub snow: BitField,
    pub sensor_zenith: String,
    pub solar_zenith: String,
    /// Factor turning stored zenith values into degrees
    pub zenith_scale: f64,
    pub max_sensor_zenith: f64,
    pub max_solar_zenith: f64,
}

impl QaLayout {
    /// MOD09GQ/MYD09GQ quality with cloud, shadow and snow from the 1 km `state_1km` band
    pub fn modis() -> Self {
        Self {
            quality: BitField::new("QC_250m", 0, 1, 0),
            cloud: BitField::new("state_1km", 10, 11, 0),
            shadow: BitField::new("state_1km", 2, 2, 0),
            snow: BitField::new("state_1km", 12, 12, 0),
            sensor_zenith: "SensorZenith".to_string(),
            solar_zenith: "SolarZenith".to_string(),
            zenith_scale: 0.01,
            max_sensor_zenith: 55.0,
            max_solar_zenith: 80.0,
        }
    }

    /// VNP09GA, where every indicator is carried by the daily image
    pub fn viirs() -> Self {
        Self {
            quality: BitField::new("QF1", 0, 2, 3),
            cloud: BitField::new("QF1", 2, 4, 0),
            shadow: BitField::new("QF2", 3, 3, 0),
            snow: BitField::new("QF2", 5, 5, 0),
            sensor_zenith: "SensorZenith".to_string(),
            solar_zenith: "SolarZenith".to_string(),
            zenith_scale: 0.01,
            max_sensor_zenith: 55.0,
            max_solar_zenith: 80.0,
        }
    }
}

/// Order in which issue flags are written to the `qa` band; later entries win
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagPriority(pub Vec<QaFlag>);

impl Default for FlagPriority {
    fn default() -> Self {
        FlagPriority(QaFlag::ISSUES.to_vec())
    }
}

/// Per-pixel pass images for every check, 1 = good
struct Checks {
    range: Image,
    quality: Image,
    cloud: Image,
    shadow: Image,
    snow: Image,
    sensor_zenith: Image,
    solar_zenith: Image,
}

impl Checks {
    fn pass_of(&self, flag: QaFlag) -> Option<&Image> {
        match flag {
            QaFlag::OutOfRange => Some(&self.range),
            QaFlag::PoorQuality => Some(&self.quality),
            QaFlag::Cloud => Some(&self.cloud),
            QaFlag::Shadow => Some(&self.shadow),
            QaFlag::Snow => Some(&self.snow),
            QaFlag::SensorZenith => Some(&self.sensor_zenith),
            QaFlag::SolarZenith => Some(&self.solar_zenith),
            QaFlag::Clear | QaFlag::NoData => None,
        }
    }

    fn all(&self) -> Image {
        self.range
            .and(&self.quality)
            .and(&self.cloud)
            .and(&self.shadow)
            .and(&self.snow)
            .and(&self.sensor_zenith)
            .and(&self.solar_zenith)
    }
}

/// Quality masking of daily surface reflectance
pub struct Masker {
    layout: QaLayout,
    priority: FlagPriority,
}

impl Masker {
    pub fn new(layout: QaLayout) -> Self {
        Self { layout, priority: FlagPriority::default() }
    }

    pub fn with_priority(mut self, priority: FlagPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn layout(&self) -> &QaLayout {
        &self.layout
    }

    /// Mask MODIS 250 m images using the same-day 1 km `state` companion
    ///
    /// Bit fields are decoded only when exactly one companion image exists for
    /// the day and zenith angles whenever at least one does; otherwise the
    /// check passes.
    pub fn apply_modis(&self, surface: &ImageCollection, state: &ImageCollection, red: &str, nir: &str) -> ImageCollection {
        log::info!("Applying MODIS quality masking");
        log::debug!("QA layout: {:?}, priority: {:?}", self.layout, self.priority);
        surface.map(|img| {
            let t = img.time_start();
            let same_day = state.filter_date(t.clone(), t.add_days(1.0));
            let only = same_day.only();
            let first = same_day.first();
            let field = |field: &BitField| {
                let field = field.clone();
                only.map(move |s| field.passes(&s)).or_else(Image::constant(1.0))
            };
            let angle = |band: &str| {
                let band = band.to_string();
                first.map(move |s| s.select(&[band.as_str()])).or_else(Image::constant(1.0))
            };
            let checks = Checks {
                range: range_check(&img, red, nir),
                quality: self.layout.quality.passes(&img),
                cloud: field(&self.layout.cloud),
                shadow: field(&self.layout.shadow),
                snow: field(&self.layout.snow),
                sensor_zenith: self.zenith_check(&angle(&self.layout.sensor_zenith), self.layout.max_sensor_zenith),
                solar_zenith: self.zenith_check(&angle(&self.layout.solar_zenith), self.layout.max_solar_zenith),
            };
            self.finish(&img, &checks)
        })
    }

    /// Mask VIIRS images whose quality bands travel with the reflectance
    pub fn apply_viirs(&self, collection: &ImageCollection, red: &str, nir: &str) -> ImageCollection {
        log::info!("Applying VIIRS quality masking");
        log::debug!("QA layout: {:?}, priority: {:?}", self.layout, self.priority);
        collection.map(|img| {
            let layout = &self.layout;
            let checks = Checks {
                range: range_check(&img, red, nir),
                quality: layout.quality.passes(&img),
                cloud: layout.cloud.passes(&img),
                shadow: layout.shadow.passes(&img),
                snow: layout.snow.passes(&img),
                sensor_zenith: self.zenith_check(&img.select(&[layout.sensor_zenith.as_str()]), layout.max_sensor_zenith),
                solar_zenith: self.zenith_check(&img.select(&[layout.solar_zenith.as_str()]), layout.max_solar_zenith),
            };
            self.finish(&img, &checks)
        })
    }

    fn zenith_check(&self, angle: &Image, max_degrees: f64) -> Image {
        angle.abs().multiply(self.layout.zenith_scale).lt(max_degrees)
    }

    /// Mask failing pixels and append the flag band
    fn finish(&self, img: &Image, checks: &Checks) -> Image {
        let mut qa = img.mask().select_index(0).not().rename(&[QA_BAND]);
        for flag in &self.priority.0 {
            if let Some(pass) = checks.pass_of(*flag) {
                qa = qa.replace_where(&pass.not(), flag.value() as f64);
            }
        }
        img.update_mask(checks.all()).add_bands(&qa)
    }
}

/// Both reflectances strictly positive
fn range_check(img: &Image, red: &str, nir: &str) -> Image {
    img.select(&[red]).gt(0.0).and(img.select(&[nir]).gt(0.0))
}

/// One band per issue flag, 1 where the flag is set and masked elsewhere
pub fn qa_flags_to_bands(qa: &Image) -> Image {
    let bands: Vec<Image> = QaFlag::ISSUES
        .iter()
        .map(|flag| {
            let hit = qa.eq(flag.value() as f64);
            hit.update_mask(&hit).rename_owned(vec![format!("qa{}", flag.label())])
        })
        .collect();
    Image::cat(&bands)
}
