use rendvi::core::masking::qa_flags_to_bands;
use rendvi::core::{add_normalized_difference, FlagPriority, Masker, QaLayout};
use rendvi::engine::{LocalBand, LocalEngine, LocalImage};
use rendvi::types::{QaFlag, DAY_MS, QA_BAND};
use rendvi::ImageCollection;

const CLOUD: f64 = 1024.0;
const SNOW: f64 = 4096.0;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn at_day(image: LocalImage, day: usize) -> LocalImage {
    image.with_time_start((day as f64 * DAY_MS) as i64 + 3_600_000)
}

fn surface(day: usize, red: f64, nir: f64) -> LocalImage {
    at_day(
        LocalImage::new()
            .with_band(LocalBand::constant("sur_refl_b01", red, (1, 1)))
            .with_band(LocalBand::constant("sur_refl_b02", nir, (1, 1)))
            .with_band(LocalBand::constant("QC_250m", 0.0, (1, 1))),
        day,
    )
}

fn state(day: usize, bits: f64, solar_zenith: f64) -> LocalImage {
    at_day(
        LocalImage::new()
            .with_band(LocalBand::constant("state_1km", bits, (1, 1)))
            .with_band(LocalBand::constant("SensorZenith", 1_500.0, (1, 1)))
            .with_band(LocalBand::constant("SolarZenith", solar_zenith, (1, 1))),
        day,
    )
}

fn modis_engine() -> LocalEngine {
    LocalEngine::new(1, 1)
        .with_collection(
            "gq",
            vec![
                surface(0, 800.0, 3000.0),
                surface(1, 800.0, 3000.0),
                surface(2, 800.0, 3000.0),
                surface(3, -10.0, 3000.0),
                surface(4, 800.0, 3000.0),
                surface(5, 800.0, 3000.0),
            ],
        )
        .with_collection(
            "ga",
            vec![
                state(0, 0.0, 3_000.0),
                state(1, CLOUD, 3_000.0),
                state(2, CLOUD + SNOW, 3_000.0),
                state(3, 0.0, 3_000.0),
                // no companion on day 4
                state(5, 0.0, 8_500.0),
            ],
        )
}

fn qa_values(engine: &LocalEngine, masked: &ImageCollection) -> Vec<Option<f64>> {
    engine
        .images(masked)
        .unwrap()
        .iter()
        .map(|img| img.value(QA_BAND, 0, 0))
        .collect()
}

#[test]
fn test_modis_flags_and_mask() {
    init();
    let engine = modis_engine();
    let masker = Masker::new(QaLayout::modis());
    let masked = masker.apply_modis(
        &ImageCollection::load("gq"),
        &ImageCollection::load("ga"),
        "sur_refl_b01",
        "sur_refl_b02",
    );

    assert_eq!(
        qa_values(&engine, &masked),
        vec![
            Some(0.0),
            Some(QaFlag::Cloud.value() as f64),
            Some(QaFlag::Snow.value() as f64),
            Some(QaFlag::OutOfRange.value() as f64),
            Some(0.0),
            Some(QaFlag::SolarZenith.value() as f64),
        ]
    );

    let ndvi = add_normalized_difference(&masked, "sur_refl_b02", "sur_refl_b01", Some("ndvi"));
    let images = engine.images(&ndvi).unwrap();
    let valid: Vec<bool> = images.iter().map(|img| img.value("ndvi", 0, 0).is_some()).collect();
    assert_eq!(valid, vec![true, false, false, false, true, false]);
    assert!((images[0].value("ndvi", 0, 0).unwrap() - 2200.0 / 3800.0).abs() < 1e-12);
    // the flag band itself stays valid on rejected pixels
    assert!(images.iter().all(|img| img.value(QA_BAND, 0, 0).is_some()));
}

#[test]
fn test_later_priority_wins() {
    init();
    let engine = modis_engine();
    let masker = Masker::new(QaLayout::modis()).with_priority(FlagPriority(vec![QaFlag::Snow, QaFlag::Cloud]));
    let masked = masker.apply_modis(
        &ImageCollection::load("gq"),
        &ImageCollection::load("ga"),
        "sur_refl_b01",
        "sur_refl_b02",
    );
    let qa = qa_values(&engine, &masked);
    assert_eq!(qa[2], Some(QaFlag::Cloud.value() as f64));
    // checks left out of the priority still mask, they just leave no flag
    assert_eq!(qa[3], Some(0.0));
    let images = engine.images(&masked).unwrap();
    assert_eq!(images[3].value("sur_refl_b01", 0, 0), None);
}

#[test]
fn test_viirs_reads_quality_from_the_image() {
    init();
    let viirs = |day: usize, qf1: f64, qf2: f64| {
        at_day(
            LocalImage::new()
                .with_band(LocalBand::constant("I1", 900.0, (1, 1)))
                .with_band(LocalBand::constant("I2", 2500.0, (1, 1)))
                .with_band(LocalBand::constant("QF1", qf1, (1, 1)))
                .with_band(LocalBand::constant("QF2", qf2, (1, 1)))
                .with_band(LocalBand::constant("SensorZenith", 2_000.0, (1, 1)))
                .with_band(LocalBand::constant("SolarZenith", 4_000.0, (1, 1))),
            day,
        )
    };
    // QF1 bits 0-1 = 3 is good quality, bits 2-3 carry cloud confidence
    let engine = LocalEngine::new(1, 1)
        .with_collection("vnp", vec![viirs(0, 3.0, 0.0), viirs(1, 7.0, 0.0), viirs(2, 3.0, 8.0), viirs(3, 1.0, 0.0)]);
    let masked = Masker::new(QaLayout::viirs()).apply_viirs(&ImageCollection::load("vnp"), "I1", "I2");

    assert_eq!(
        qa_values(&engine, &masked),
        vec![
            Some(0.0),
            Some(QaFlag::Cloud.value() as f64),
            Some(QaFlag::Shadow.value() as f64),
            Some(QaFlag::PoorQuality.value() as f64),
        ]
    );
}

#[test]
fn test_flag_bands_from_masked_collection() {
    init();
    let engine = modis_engine();
    let masked = Masker::new(QaLayout::modis()).apply_modis(
        &ImageCollection::load("gq"),
        &ImageCollection::load("ga"),
        "sur_refl_b01",
        "sur_refl_b02",
    );
    let flagged = masked.map(|img| qa_flags_to_bands(&img.select(&[QA_BAND]))).count();
    let counts = engine.image(&flagged).unwrap();
    assert_eq!(counts.value("qaClouds", 0, 0), Some(1.0));
    assert_eq!(counts.value("qaSnow", 0, 0), Some(1.0));
    assert_eq!(counts.value("qaShadows", 0, 0), Some(0.0));
    assert_eq!(counts.value("qaSolarZenith", 0, 0), Some(1.0));
}

#[test]
fn test_masking_twice_keeps_the_mask() {
    init();
    let engine = modis_engine();
    let masker = Masker::new(QaLayout::modis());
    let state = ImageCollection::load("ga");
    let once = masker.apply_modis(&ImageCollection::load("gq"), &state, "sur_refl_b01", "sur_refl_b02");
    let twice = masker.apply_modis(&once, &state, "sur_refl_b01", "sur_refl_b02");

    let validity = |coll: &ImageCollection| -> Vec<bool> {
        engine
            .images(coll)
            .unwrap()
            .iter()
            .map(|img| img.value("sur_refl_b02", 0, 0).is_some())
            .collect()
    };
    assert_eq!(validity(&once), validity(&twice));
    assert_eq!(qa_values(&engine, &twice)[0], Some(0.0));
}
