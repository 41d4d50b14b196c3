//! Closed-form regression models over a series
//!
//! A model is a [`Regression`] (which bands are independents and how they are
//! derived) wrapped in a [`ForecastModel`] that holds the fitted coefficients.
//! Fitting is one batched least-squares reduction; prediction evaluates the
//! linear combination per image and may be repeated on other series.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::core::series::{add_constant_band, add_time_band, Rendvi};
use crate::graph::{Image, ImageCollection, JoinSpec, Reducer};
use crate::types::{RendviError, RendviResult, TimeUnit, CONSTANT_BAND, DAY_MS, TIME_BAND, TIME_START};

/// Band holding predictions
pub const PREDICTED_BAND: &str = "predicted";

/// One fitted coefficient band per independent, in the order of `independents`
#[derive(Debug, Clone)]
pub struct Coefficients {
    pub image: Image,
    pub independents: Vec<String>,
}

impl Coefficients {
    /// Per-pixel `sum(coefficient * independent)` of a design image
    pub fn evaluate(&self, design: &Image) -> Image {
        let names: Vec<&str> = self.independents.iter().map(String::as_str).collect();
        design.select(&names).multiply(&self.image).sum_bands()
    }
}

/// Add `time` and `constant` bands to every image
pub fn prepare_inputs(collection: &ImageCollection, unit: TimeUnit) -> ImageCollection {
    collection.map(|img| add_constant_band(&add_time_band(&img, unit)))
}

/// Which bands explain the dependent band and how they are built
pub trait Regression {
    /// Independent variable names, in coefficient order
    fn independents(&self) -> Vec<String>;

    /// Collection carrying every independent band next to the dependent one
    fn design(&self, series: &Rendvi) -> ImageCollection;

    fn fit(&self, series: &Rendvi) -> Coefficients {
        let independents = self.independents();
        let image = self.design(series).reduce(Reducer::LinearRegression {
            independents: independents.clone(),
            dependent: series.band().to_string(),
        });
        Coefficients { image, independents }
    }

    /// Fitted values as a `predicted` band plus the `time` band
    fn predict(&self, series: &Rendvi, coefficients: &Coefficients) -> Rendvi {
        let unit = series.time_unit();
        let predicted = self.design(series).map(|img| {
            let value = coefficients.evaluate(&img).rename(&[PREDICTED_BAND]);
            add_time_band(&value.set(TIME_START, &img.time_start()), unit)
        });
        series.with_collection(predicted).with_band(PREDICTED_BAND)
    }
}

/// A regression together with the coefficients of its last fit
#[derive(Debug, Clone)]
pub struct ForecastModel<R> {
    regression: R,
    coefficients: Option<Coefficients>,
}

impl<R: Regression> ForecastModel<R> {
    pub fn new(regression: R) -> Self {
        Self { regression, coefficients: None }
    }

    pub fn regression(&self) -> &R {
        &self.regression
    }

    pub fn coefficients(&self) -> Option<&Coefficients> {
        self.coefficients.as_ref()
    }

    /// Fit on `series`, replacing any earlier coefficients
    pub fn fit(&mut self, series: &Rendvi) -> &Coefficients {
        log::info!("Fitting {} regression on {}", self.regression.independents().join("+"), series.band());
        self.coefficients.insert(self.regression.fit(series))
    }

    pub fn predict(&self, series: &Rendvi) -> RendviResult<Rendvi> {
        let coefficients = self.coefficients.as_ref().ok_or(RendviError::ModelNotFit)?;
        Ok(self.regression.predict(series, coefficients))
    }
}

/// Linear trend over `constant`, `time` and any extra caller bands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trend {
    pub extra_independents: Vec<String>,
}

impl Trend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_independents(extra: &[&str]) -> Self {
        Self { extra_independents: extra.iter().map(|s| s.to_string()).collect() }
    }

    /// Series minus its fitted linear trend, band name and timestamps kept
    pub fn detrend(&self, series: &Rendvi) -> Rendvi {
        log::info!("Detrending {}", series.band());
        let coefficients = self.fit(series);
        let band = series.band();
        let residuals = self.design(series).map(|img| {
            img.retain_time(|img| img.select(&[band]).subtract(coefficients.evaluate(img)).rename(&[band]))
        });
        series.with_collection(residuals)
    }
}

impl Regression for Trend {
    fn independents(&self) -> Vec<String> {
        let mut names = vec![CONSTANT_BAND.to_string(), TIME_BAND.to_string()];
        names.extend(self.extra_independents.iter().cloned());
        names
    }

    fn design(&self, series: &Rendvi) -> ImageCollection {
        prepare_inputs(series.collection(), series.time_unit())
    }
}

/// Trend plus `n_cycles` annual harmonics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Harmonics {
    pub n_cycles: u32,
}

impl Harmonics {
    pub fn new(n_cycles: u32) -> Self {
        Self { n_cycles }
    }

    fn names(&self, base: &str) -> Vec<String> {
        (1..=self.n_cycles).map(|i| format!("{}_{}", base, i)).collect()
    }
}

impl Default for Harmonics {
    fn default() -> Self {
        Self::new(3)
    }
}

impl Regression for Harmonics {
    fn independents(&self) -> Vec<String> {
        let mut names = vec![CONSTANT_BAND.to_string(), TIME_BAND.to_string()];
        names.extend(self.names("cos"));
        names.extend(self.names("sin"));
        names
    }

    /// `cos_i` and `sin_i` evaluated at `2π · time · i`
    fn design(&self, series: &Rendvi) -> ImageCollection {
        let cycles = self.n_cycles;
        let (cos_names, sin_names) = (self.names("cos"), self.names("sin"));
        prepare_inputs(series.collection(), series.time_unit()).map(|img| {
            let radians = img.select(&[TIME_BAND]).multiply(2.0 * PI);
            let terms: Vec<(Image, Image)> = (1..=cycles)
                .map(|i| {
                    let angle = radians.multiply(i as f64);
                    (angle.cos(), angle.sin())
                })
                .collect();
            let cosines = Image::cat(&terms.iter().map(|(c, _)| c.clone()).collect::<Vec<_>>()).rename_owned(cos_names);
            let sines = Image::cat(&terms.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>()).rename_owned(sin_names);
            img.add_bands(&cosines).add_bands(&sines)
        })
    }
}

/// Lag-1 and lag-2 self regression with an intercept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRegressive {
    /// Oldest earlier image still joined as a lag, in days
    pub max_lag_days: f64,
}

impl AutoRegressive {
    pub fn new(max_lag_days: f64) -> Self {
        Self { max_lag_days }
    }
}

impl Default for AutoRegressive {
    fn default() -> Self {
        Self::new(25.0)
    }
}

impl Regression for AutoRegressive {
    fn independents(&self) -> Vec<String> {
        vec![CONSTANT_BAND.to_string(), "band_1".to_string(), "band_2".to_string()]
    }

    /// Lags missing from the join are zero
    fn design(&self, series: &Rendvi) -> ImageCollection {
        let band = series.band();
        let inputs = prepare_inputs(series.collection(), series.time_unit());
        let spec = JoinSpec { max_difference_ms: self.max_lag_days * DAY_MS, matches_key: "images".to_string() };
        inputs.save_all_join(&inputs, spec).map(|img| {
            let matches = img.get_images("images");
            let lag = |index: usize, name: &str| {
                matches
                    .get(index)
                    .map(|m| m.select(&[band]))
                    .or_else(Image::constant(0.0))
                    .rename(&[name])
            };
            img.add_bands(&lag(0, "band_1")).add_bands(&lag(1, "band_2"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_names() {
        assert_eq!(Harmonics::new(2).independents(), vec!["constant", "time", "cos_1", "cos_2", "sin_1", "sin_2"]);
        assert_eq!(Trend::with_independents(&["precip"]).independents(), vec!["constant", "time", "precip"]);
        assert_eq!(AutoRegressive::default().independents(), vec!["constant", "band_1", "band_2"]);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = ForecastModel::new(Harmonics::default());
        let series = Rendvi::new(ImageCollection::load("c"), "ndvi");
        assert!(matches!(model.predict(&series), Err(RendviError::ModelNotFit)));
    }
}
