use approx::assert_relative_eq;
use chrono::{Datelike, NaiveDate};
use ndarray::array;

use rendvi::core::composite::N_OBSERVATIONS;
use rendvi::core::{dekad_ranges, dekad_to_date, is_leap, DekadCompositor, Rendvi};
use rendvi::engine::{LocalBand, LocalEngine, LocalImage};
use rendvi::types::{parse_date, to_millis, RendviError, BEGIN};
use rendvi::ImageCollection;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn daily(date: &str, ndvi: Option<f64>, qa: f64) -> LocalImage {
    let valid = ndvi.is_some();
    let ndvi = LocalBand::new("ndvi", array![[ndvi.unwrap_or(0.0)]]).with_valid(array![[valid]]);
    LocalImage::new()
        .with_band(ndvi)
        .with_band(LocalBand::constant("qa", qa, (1, 1)))
        .with_time_start(to_millis(&parse_date(date).unwrap()))
}

#[test]
fn test_dekads_tile_every_year() {
    for year in [1999, 2000, 2019, 2020, 2100] {
        let ranges = dekad_ranges(year);
        assert_eq!(ranges.len(), 36);
        assert_eq!(ranges[0].0, 1);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "gap between dekads in {}", year);
        }
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        assert_eq!(ranges[35].1, days_in_year + 1);
    }
}

#[test]
fn test_dekad_start_dates() {
    assert_eq!(dekad_to_date(1, 2021).unwrap(), NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
    assert_eq!(dekad_to_date(3, 2021).unwrap(), NaiveDate::from_ymd_opt(2021, 1, 21).unwrap());
    // third February dekad starts on 1 March in both calendars
    assert_eq!(dekad_to_date(7, 2021).unwrap().month(), 3);
    assert_eq!(dekad_to_date(7, 2020).unwrap(), NaiveDate::from_ymd_opt(2020, 3, 1).unwrap());
    assert_eq!(dekad_to_date(36, 2020).unwrap().day(), 21);
    assert!(matches!(dekad_to_date(0, 2020), Err(RendviError::InvalidDekad { dekad: 0 })));
    assert!(matches!(dekad_to_date(37, 2020), Err(RendviError::InvalidDekad { dekad: 37 })));
}

#[test]
fn test_composites_summarize_quality() {
    init();
    let engine = LocalEngine::new(1, 1).with_collection(
        "daily",
        vec![
            daily("2021-01-02", Some(0.5), 0.0),
            daily("2021-01-04", None, 4.0),
            daily("2021-01-07", None, 4.0),
            daily("2021-02-01", Some(0.2), 0.0),
            daily("2021-02-03", Some(0.7), 0.0),
        ],
    );
    let series = Rendvi::new(ImageCollection::load("daily"), "ndvi");
    let composites = DekadCompositor::new(vec![2021]).with_qa(true).apply(&series).unwrap();
    let images = engine.images(composites.collection()).unwrap();

    assert_eq!(images.len(), 2);
    let first = &images[0];
    assert_eq!(first.value("ndvi", 0, 0), Some(0.5));
    assert_eq!(first.number(N_OBSERVATIONS), Some(3.0));
    assert_eq!(first.value("nClear", 0, 0), Some(1.0));
    assert_relative_eq!(first.value("pctClouds", 0, 0).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
    assert_relative_eq!(first.value("pctSnow", 0, 0).unwrap(), 0.0);
    assert_relative_eq!(first.value("pctClear", 0, 0).unwrap(), 1.0 / 3.0, epsilon = 1e-12);

    // 1 February opens dekad 4
    let second = &images[1];
    assert_eq!(second.number(BEGIN), Some(32.0));
    assert_eq!(second.value("ndvi", 0, 0), Some(0.7));
    assert_eq!(second.value("nClear", 0, 0), Some(2.0));
    assert_relative_eq!(second.value("pctClear", 0, 0).unwrap(), 1.0);
}

#[test]
fn test_years_outside_the_data_produce_nothing() {
    init();
    let engine = LocalEngine::new(1, 1).with_collection("daily", vec![daily("2021-05-05", Some(0.4), 0.0)]);
    let series = Rendvi::new(ImageCollection::load("daily"), "ndvi");
    let composites = series.dekad_images(&[2019, 2020], false).unwrap();
    assert_eq!(engine.number(&composites.collection().size()).unwrap(), 0.0);
}
