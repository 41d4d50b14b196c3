use std::f64::consts::PI;

use approx::assert_relative_eq;

use rendvi::core::forecast::PREDICTED_BAND;
use rendvi::core::{AutoRegressive, ForecastModel, Harmonics, Regression, Rendvi, Trend};
use rendvi::engine::{LocalBand, LocalEngine, LocalImage};
use rendvi::types::{RendviError, TimeUnit, DAY_MS, TIME_BAND};
use rendvi::ImageCollection;

const START: f64 = 1_577_836_800_000.0; // 2020-01-01

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn millis(i: usize) -> f64 {
    START + 10.0 * i as f64 * DAY_MS
}

/// Elapsed years exactly as the `time` band stores them
fn years(millis: f64) -> f64 {
    (millis / TimeUnit::Year.millis()) as f32 as f64
}

fn engine_with(values: &[f64]) -> LocalEngine {
    let images = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            LocalImage::new()
                .with_band(LocalBand::constant("ndvi", *v, (1, 1)))
                .with_time_start(millis(i) as i64)
        })
        .collect();
    LocalEngine::new(1, 1).with_collection("series", images)
}

fn harmonic(t: f64) -> f64 {
    0.3 + 0.002 * t + 0.1 * (2.0 * PI * t).cos() + 0.05 * (2.0 * PI * t).sin()
}

#[test]
fn test_harmonic_fit_round_trip() {
    init();
    let values: Vec<f64> = (0..108).map(|i| harmonic(years(millis(i)))).collect();
    let engine = engine_with(&values);
    let series = Rendvi::new(ImageCollection::load("series"), "ndvi");

    let mut model = ForecastModel::new(Harmonics::new(1));
    let coefficients = model.fit(&series).image.clone();
    let fitted = engine.image(&coefficients).unwrap();
    assert_relative_eq!(fitted.value("cos_1", 0, 0).unwrap(), 0.1, epsilon = 1e-6);
    assert_relative_eq!(fitted.value("sin_1", 0, 0).unwrap(), 0.05, epsilon = 1e-6);
    assert_relative_eq!(fitted.value(TIME_BAND, 0, 0).unwrap(), 0.002, epsilon = 1e-6);

    let predicted = model.predict(&series).unwrap();
    assert_eq!(predicted.band(), PREDICTED_BAND);
    let images = engine.images(predicted.collection()).unwrap();
    assert_eq!(images.len(), 108);
    for (image, expected) in images.iter().zip(&values) {
        assert_relative_eq!(image.value(PREDICTED_BAND, 0, 0).unwrap(), *expected, epsilon = 1e-6);
        assert!(image.value(TIME_BAND, 0, 0).is_some());
    }
    assert_eq!(images[5].time_start(), Some(millis(5) as i64));
}

#[test]
fn test_coefficients_apply_to_another_series() {
    init();
    let values: Vec<f64> = (0..72).map(|i| harmonic(years(millis(i)))).collect();
    let engine = engine_with(&values).with_collection("other", {
        (0..4)
            .map(|i| {
                LocalImage::new()
                    .with_band(LocalBand::constant("ndvi", 0.0, (1, 1)))
                    .with_time_start(millis(100 + i) as i64)
            })
            .collect()
    });
    let mut model = ForecastModel::new(Harmonics::new(1));
    model.fit(&Rendvi::new(ImageCollection::load("series"), "ndvi"));

    let forecast = model.predict(&Rendvi::new(ImageCollection::load("other"), "ndvi")).unwrap();
    let images = engine.images(forecast.collection()).unwrap();
    for (i, image) in images.iter().enumerate() {
        let expected = harmonic(years(millis(100 + i)));
        assert_relative_eq!(image.value(PREDICTED_BAND, 0, 0).unwrap(), expected, epsilon = 1e-5);
    }
}

#[test]
fn test_detrend_removes_line() {
    init();
    let values: Vec<f64> = (0..20).map(|i| 0.2 + 0.03 * years(millis(i))).collect();
    let engine = engine_with(&values);
    let series = Rendvi::new(ImageCollection::load("series"), "ndvi");
    let residuals = engine.images(Trend::new().detrend(&series).collection()).unwrap();
    assert_eq!(residuals.len(), 20);
    for image in residuals.iter() {
        assert_relative_eq!(image.value("ndvi", 0, 0).unwrap(), 0.0, epsilon = 1e-8);
        assert!(image.time_start().is_some());
    }
}

/// AR(2) series started from zero history, so every row is exact
fn ar2_series(len: usize) -> Vec<f64> {
    let mut values: Vec<f64> = Vec::with_capacity(len);
    for i in 0..len {
        let lag_1 = if i >= 1 { values[i - 1] } else { 0.0 };
        let lag_2 = if i >= 2 { values[i - 2] } else { 0.0 };
        values.push(0.1 + 0.5 * lag_1 + 0.3 * lag_2);
    }
    values
}

#[test]
fn test_autoregressive_recovers_lags() {
    init();
    let values = ar2_series(30);
    let engine = engine_with(&values);
    let series = Rendvi::new(ImageCollection::load("series"), "ndvi");

    let design = engine.images(&AutoRegressive::default().design(&series)).unwrap();
    // missing lags are zero, not no-data
    assert_eq!(design[0].value("band_1", 0, 0), Some(0.0));
    assert_eq!(design[0].value("band_2", 0, 0), Some(0.0));
    assert_eq!(design[1].value("band_1", 0, 0), Some(values[0]));
    assert_eq!(design[1].value("band_2", 0, 0), Some(0.0));
    assert_eq!(design[2].value("band_1", 0, 0), Some(values[1]));
    assert_eq!(design[2].value("band_2", 0, 0), Some(values[0]));

    let mut model = ForecastModel::new(AutoRegressive::default());
    let coefficients = engine.image(&model.fit(&series).image.clone()).unwrap();
    assert_relative_eq!(coefficients.value("constant", 0, 0).unwrap(), 0.1, epsilon = 1e-6);
    assert_relative_eq!(coefficients.value("band_1", 0, 0).unwrap(), 0.5, epsilon = 1e-6);
    assert_relative_eq!(coefficients.value("band_2", 0, 0).unwrap(), 0.3, epsilon = 1e-6);
}

#[test]
fn test_autoregressive_predicts_from_the_first_image() {
    init();
    let values = ar2_series(30);
    let engine = engine_with(&values);
    let series = Rendvi::new(ImageCollection::load("series"), "ndvi");

    let mut model = ForecastModel::new(AutoRegressive::default());
    model.fit(&series);
    let predicted = engine.images(model.predict(&series).unwrap().collection()).unwrap();
    assert_eq!(predicted.len(), 30);
    for (image, expected) in predicted.iter().zip(&values) {
        let value = image.value(PREDICTED_BAND, 0, 0).expect("prediction defined on every image");
        assert_relative_eq!(value, *expected, epsilon = 1e-6);
    }
}

#[test]
fn test_predict_requires_fit() {
    let model = ForecastModel::new(Trend::new());
    let series = Rendvi::new(ImageCollection::load("series"), "ndvi");
    assert!(model.coefficients().is_none());
    assert!(matches!(model.predict(&series), Err(RendviError::ModelNotFit)));
}
