use serde::{Deserialize, Serialize};

use crate::core::series::{add_time_band, keep_bands, Rendvi};
use crate::graph::{ImageCollection, Reducer};
use crate::types::{TIME_BAND, TIME_START};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingParams {
    /// Width of each regression window in days
    pub window: u32,
    /// Most fitted values kept from a single window
    pub max_stack: usize,
    pub keep_band_pattern: Option<String>,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self { window: 30, max_stack: 6, keep_band_pattern: None }
    }
}

/// Moving-window linear regression ensemble
///
/// A line is fit against the `time` band inside a window around every
/// composite. Each line is evaluated at the dates of its window and the value
/// of a date is the mean of all evaluations falling on it.
pub struct Smoother {
    params: SmoothingParams,
}

impl Smoother {
    pub fn new() -> Self {
        Self { params: SmoothingParams::default() }
    }

    pub fn with_params(params: SmoothingParams) -> Self {
        Self { params }
    }

    /// Expects the `time` band added by despiking or back-filling
    pub fn apply(&self, series: &Rendvi) -> Rendvi {
        log::info!("Smoothing {} with moving linear fits", series.band());
        log::debug!("Smoothing parameters: {:?}", self.params);
        let band = series.band();
        let half = (self.params.window / 2) as f64;
        let composites = series.collection();

        let fits = composites
            .to_list(None)
            .map(|img| {
                let d = img.time_start();
                let window = composites.filter_date(d.add_days(-(half - 1.0)), d.add_days(half + 1.0));
                let line = window.select(&[TIME_BAND, band]).reduce(Reducer::LinearFit);
                window
                    .map(|member| {
                        member
                            .select(&[TIME_BAND])
                            .multiply(line.select(&["scale"]))
                            .add(line.select(&["offset"]))
                            .rename(&[band])
                            .set(TIME_START, &member.time_start())
                    })
                    .to_list(Some(self.params.max_stack))
            })
            .flatten();
        let fitted = ImageCollection::from_list(&fits);

        let smoothed = composites.map(|img| {
            let t = img.time_start();
            let value = fitted
                .filter_date(t.add_days(-1.0), t.add_days(1.0))
                .mean()
                .rename(&[band])
                .copy_properties(&img);
            let out = add_time_band(&value, series.time_unit());
            keep_bands(out, &img, self.params.keep_band_pattern.as_deref())
        });

        series.with_collection(smoothed)
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendvi {
    /// Smoothed series, see [`Smoother`]
    pub fn smooth(&self, params: SmoothingParams) -> Rendvi {
        Smoother::with_params(params).apply(self)
    }
}
