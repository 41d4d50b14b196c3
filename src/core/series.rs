//! The time-series container passed between pipeline stages, plus small
//! per-image helpers shared by the stages

use log::debug;

use crate::graph::{Image, ImageCollection, List, Number};
use crate::types::{TimeUnit, CONSTANT_BAND, TIME_BAND, TIME_START};

/// A collection of time-stamped images together with the band being reconstructed
///
/// Every stage returns a new `Rendvi`; the wrapped graph is never mutated.
#[derive(Debug, Clone)]
pub struct Rendvi {
    collection: ImageCollection,
    band: String,
    seed: u64,
    time_unit: TimeUnit,
}

impl Rendvi {
    pub fn new(collection: ImageCollection, band: &str) -> Self {
        Self { collection, band: band.to_string(), seed: 0, time_unit: TimeUnit::default() }
    }

    /// Seed of the noise substituted for missing neighbours
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Unit of the elapsed-time band added by later stages
    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    pub fn collection(&self) -> &ImageCollection {
        &self.collection
    }

    pub fn band(&self) -> &str {
        &self.band
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Same band and settings over a new collection
    pub fn with_collection(&self, collection: ImageCollection) -> Self {
        Self { collection, ..self.clone() }
    }

    /// Same settings, new target band
    pub fn with_band(&self, band: &str) -> Self {
        Self { band: band.to_string(), ..self.clone() }
    }

    /// Acquisition times of the images, in collection order
    pub fn dates(&self) -> List<Number> {
        self.collection.aggregate_array(TIME_START)
    }
}

/// Append `(b1 - b2) / (b1 + b2)` to every image, named `name` (default `nd`)
pub fn add_normalized_difference(collection: &ImageCollection, b1: &str, b2: &str, name: Option<&str>) -> ImageCollection {
    debug!("Adding normalized difference of {} and {}", b1, b2);
    let (b1, b2) = (b1.to_string(), b2.to_string());
    let name = name.map(str::to_string);
    collection.map(move |img| {
        let mut nd = img.normalized_difference(&b1, &b2);
        if let Some(name) = &name {
            nd = nd.rename(&[name.as_str()]);
        }
        img.add_bands(&nd)
    })
}

/// eMODIS NDVI stored as 0..200 back to -1..1; values outside that range are masked
pub fn rescale_emodis(image: &Image) -> Image {
    image.retain_time(|img| {
        let ndvi = img.select(&["ndvi"]).subtract(100.0).divide(100.0).rename(&["ndvi"]);
        let in_range = ndvi.gte(-1.0).and(ndvi.lte(1.0));
        ndvi.update_mask(in_range)
    })
}

/// NDVI in -1..1 to the 0..200 unsigned byte encoding
pub fn scale_ndvi(image: &Image) -> Image {
    image.retain_time(|img| img.select(&["ndvi"]).add(1.0).multiply(100.0).to_uint8().rename(&["ndvi"]))
}

/// Single `time` band holding the elapsed time since the Unix epoch in `unit`
pub fn time_band(millis: &Number, unit: TimeUnit) -> Image {
    Image::from_number(&millis.divide(unit.millis())).to_float().rename(&[TIME_BAND])
}

/// Add (or replace) the `time` band computed from the image's own timestamp
pub fn add_time_band(image: &Image, unit: TimeUnit) -> Image {
    image.add_bands(&time_band(&image.time_start(), unit))
}

/// Add (or replace) an all-ones `constant` band
pub fn add_constant_band(image: &Image) -> Image {
    image.add_bands(&Image::constant(1.0).rename(&[CONSTANT_BAND]))
}

/// Bands of `source` matching `pattern` appended to `image`, if a pattern is given
pub(crate) fn keep_bands(image: Image, source: &Image, pattern: Option<&str>) -> Image {
    match pattern {
        Some(pattern) => image.add_bands(&source.select_pattern(pattern)),
        None => image,
    }
}
