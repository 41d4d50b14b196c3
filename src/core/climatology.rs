//! Long-term per-dekad statistics and the gap filling built on them

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::dekad::{DEKADS_PER_YEAR, PERPETUAL_DEKADS};
use crate::core::series::{keep_bands, time_band, Rendvi};
use crate::graph::{Image, ImageCollection, Lookup, Number, Reducer};
use crate::types::{to_millis, RendviError, RendviResult, DAY_MS, TIME_START};

/// Property holding the factor climatology values were multiplied by
pub const SCALE: &str = "scale";

/// Property holding the anchor day of year of a climatology record
pub const DEKAD: &str = "dekad";

/// Flag band marking pixels filled from the climatology
pub const FILLED_BAND: &str = "climatologyFilled";

/// Reference year onto which every anchor is placed
pub const REFERENCE_YEAR: i32 = 2001;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimatologyParams {
    /// Days after each anchor whose observations enter its statistics
    pub day_window: u32,
    /// Multiplier applied before storing as unsigned 16-bit integers
    pub scale: f64,
}

impl Default for ClimatologyParams {
    fn default() -> Self {
        Self { day_window: 5, scale: 10_000.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackFillParams {
    /// Number of earlier composites whose anomalies are averaged
    pub n_periods: u32,
    /// Spacing between composites in days
    pub step: u32,
    pub keep_band_pattern: Option<String>,
}

impl Default for BackFillParams {
    fn default() -> Self {
        Self { n_periods: 5, step: 10, keep_band_pattern: None }
    }
}

fn reference_millis() -> RendviResult<f64> {
    NaiveDate::from_ymd_opt(REFERENCE_YEAR, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| to_millis(&dt) as f64)
        .ok_or_else(|| RendviError::InvalidDate(format!("{}-01-01", REFERENCE_YEAR)))
}

/// Per-dekad mean and standard deviation of a band, one record per anchor
#[derive(Debug, Clone)]
pub struct Climatology {
    collection: ImageCollection,
    band: String,
}

impl Climatology {
    /// Statistics over every year of `series`
    pub fn calc(series: &Rendvi, params: &ClimatologyParams) -> RendviResult<Self> {
        log::info!("Computing {} climatology", series.band());
        log::debug!("Climatology parameters: {:?}", params);
        let band = series.band();
        let reference = reference_millis()?;
        let values = series.collection().select(&[band]);

        let records: Vec<Image> = PERPETUAL_DEKADS[..DEKADS_PER_YEAR as usize]
            .iter()
            .map(|&anchor| {
                let window = values.filter_day_of_year(anchor, anchor + params.day_window);
                let stats = window.reduce(Reducer::MeanStdDev).multiply(params.scale).to_uint16();
                let count = window.count().rename(&["count"]).to_uint16();
                stats
                    .add_bands(&count)
                    .set(TIME_START, &Number::from(reference + (anchor - 1) as f64 * DAY_MS))
                    .set_number(DEKAD, anchor as f64)
                    .set_number(SCALE, params.scale)
            })
            .collect();

        Ok(Self { collection: ImageCollection::from_images(records), band: band.to_string() })
    }

    /// Records computed earlier, such as a stored asset
    pub fn from_collection(collection: ImageCollection, band: &str) -> Self {
        Self { collection, band: band.to_string() }
    }

    pub fn collection(&self) -> &ImageCollection {
        &self.collection
    }

    pub fn band(&self) -> &str {
        &self.band
    }

    /// Unscaled `mean` and `stdDev` of the record nearest the image's day of year
    ///
    /// Both bands are masked when no record sits within a day of the anchor.
    pub(crate) fn nearest(&self, img: &Image, reference: f64) -> Image {
        let doy = img.time_start().day_of_year();
        let anchor = doy.subtract(1.0).multiply(DAY_MS).add(reference);
        let found: Lookup = self.collection.filter_date(anchor.add_days(-1.0), anchor.add_days(1.0)).first();
        let band = self.band.clone();
        let unscaled = found.map(move |record| {
            let scale = record.get_number_or(SCALE, 1.0);
            let mean = record.select(&[format!("{}_mean", band).as_str()]).divide(&scale).rename(&["mean"]);
            let std = record.select(&[format!("{}_stdDev", band).as_str()]).divide(&scale).rename(&["stdDev"]);
            mean.add_bands(&std)
        });
        let missing = Image::constant(0.0)
            .rename(&["mean"])
            .add_bands(&Image::constant(0.0).rename(&["stdDev"]))
            .update_mask(Image::constant(0.0));
        unscaled.or_else(missing)
    }

    /// Fill missing pixels with `mean + z * stdDev` of the nearest record
    ///
    /// `z` is the average standardized anomaly of the composites in the
    /// trailing `n_periods * step + 5` days, or zero without evidence.
    pub fn back_fill(&self, series: &Rendvi, params: &BackFillParams) -> RendviResult<Rendvi> {
        log::info!("Back-filling {} from climatology", series.band());
        log::debug!("Back-fill parameters: {:?}", params);
        let band = series.band();
        let reference = reference_millis()?;
        let lookback = (params.n_periods * params.step + 5) as f64;
        let composites = series.collection();

        let filled = composites.map(|img| {
            let t = img.time_start();
            let climo = self.nearest(&img, reference);

            let anomalies = composites.filter_date(t.add_days(-lookback), t.add_days(-1.0)).map(|prior| {
                let normal = self.nearest(&prior, reference);
                prior
                    .select(&[band])
                    .subtract(normal.select(&["mean"]))
                    .divide(normal.select(&["stdDev"]))
                    .rename(&["zScore"])
            });
            let z = anomalies
                .reduce_lookup(Reducer::Mean)
                .or_else(Image::constant(0.0).rename(&["zScore"]))
                .unmask(0.0);

            let fill = climo
                .select(&["mean"])
                .add(z.multiply(climo.select(&["stdDev"])))
                .rename(&[band]);
            let value = img.select(&[band]);
            let out = value.unmask(&fill);
            let flag = value.mask().not().and(fill.mask()).rename(&[FILLED_BAND]);

            let out = out.add_bands(&flag).add_bands(&time_band(&t, series.time_unit()));
            keep_bands(out, &img, params.keep_band_pattern.as_deref())
        });

        Ok(series.with_collection(filled))
    }
}

impl Rendvi {
    pub fn climatology(&self, params: &ClimatologyParams) -> RendviResult<Climatology> {
        Climatology::calc(self, params)
    }

    /// Gap-filled series, see [`Climatology::back_fill`]
    pub fn climatology_back_fill(&self, climatology: &Climatology, params: &BackFillParams) -> RendviResult<Rendvi> {
        climatology.back_fill(self, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LocalBand, LocalEngine, LocalImage};
    use crate::types::parse_date;

    #[test]
    fn test_records_anchor_on_reference_year() {
        let day = |date: &str| {
            LocalImage::new()
                .with_band(LocalBand::constant("ndvi", 0.5, (1, 1)))
                .with_time_start(to_millis(&parse_date(date).unwrap()))
        };
        let engine =
            LocalEngine::new(1, 1).with_collection("d", vec![day("2019-01-11"), day("2020-01-11"), day("2021-01-12")]);
        let series = Rendvi::new(ImageCollection::load("d"), "ndvi");
        let climo = series.climatology(&ClimatologyParams::default()).unwrap();
        let records = engine.images(climo.collection()).unwrap();

        assert_eq!(records.len(), 36);
        let second = &records[1];
        assert_eq!(second.number(DEKAD), Some(11.0));
        assert_eq!(second.time_start(), Some(to_millis(&parse_date("2001-01-11").unwrap())));
        assert_eq!(second.value("ndvi_mean", 0, 0), Some(5000.0));
        assert_eq!(second.value("ndvi_stdDev", 0, 0), Some(0.0));
        assert_eq!(second.value("count", 0, 0), Some(3.0));
    }
}
