use chrono::Datelike;

use rendvi::config::PipelineConfig;
use rendvi::core::climatology::FILLED_BAND;
use rendvi::engine::encode::encode;
use rendvi::engine::{LocalBand, LocalEngine, LocalImage};
use rendvi::graph::Handle;
use rendvi::io::{Catalog, Product, Sensor};
use rendvi::pipeline::{self, build_rendvi};
use rendvi::types::{format_millis, parse_date, to_millis, DAY_MS};

const CLOUD: f64 = 1024.0;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn catalog() -> Catalog {
    Catalog::from_json_str(
        r#"[
            {"name": "TEST_GQ", "collection_id": "test/gq", "red": "sur_refl_b01", "nir": "sur_refl_b02",
             "qc_band": "QC_250m", "sensor": "modis"},
            {"name": "TEST_GA", "collection_id": "test/ga", "red": "sur_refl_b01", "nir": "sur_refl_b02",
             "state_band": "state_1km", "sensor": "modis"}
        ]"#,
    )
    .unwrap()
}

fn config() -> PipelineConfig {
    PipelineConfig::from_json_str(
        r#"{
            "product": "TEST_GQ",
            "state_product": "TEST_GA",
            "start_year": 2019,
            "end_year": 2020,
            "export": {"asset_root": "users/test/rendvi/", "options": {"prefix": "reNDVI_"}}
        }"#,
    )
    .unwrap()
}

/// Observations every other day for 2019-2020; 1-10 April 2019 is overcast
fn engine() -> LocalEngine {
    let start = to_millis(&parse_date("2019-01-01").unwrap()) as f64 + 3_600_000.0;
    let mut surface = Vec::new();
    let mut state = Vec::new();
    for i in (0..731).step_by(2) {
        let t = (start + i as f64 * DAY_MS) as i64;
        let date = parse_date(&format_millis(t, "%Y-%m-%d").unwrap()).unwrap();
        let overcast = date.year() == 2019 && (91..101).contains(&date.ordinal());
        surface.push(
            LocalImage::new()
                .with_band(LocalBand::constant("sur_refl_b01", 1000.0, (1, 1)))
                .with_band(LocalBand::constant("sur_refl_b02", 5000.0, (1, 1)))
                .with_band(LocalBand::constant("QC_250m", 0.0, (1, 1)))
                .with_time_start(t),
        );
        state.push(
            LocalImage::new()
                .with_band(LocalBand::constant("state_1km", if overcast { CLOUD } else { 0.0 }, (1, 1)))
                .with_band(LocalBand::constant("SensorZenith", 2_000.0, (1, 1)))
                .with_band(LocalBand::constant("SolarZenith", 4_000.0, (1, 1)))
                .with_time_start(t),
        );
    }
    LocalEngine::new(1, 1).with_collection("test/gq", surface).with_collection("test/ga", state)
}

#[test]
fn test_pipeline_produces_filled_dekads() {
    init();
    let engine = engine();
    let output = build_rendvi(&config(), &catalog()).unwrap();

    let composites = engine.images(output.composites.collection()).unwrap();
    assert_eq!(composites.len(), 72);
    // the overcast dekad is composited but empty
    assert_eq!(composites[9].value("ndvi", 0, 0), None);
    assert_eq!(composites[9].value("pctClouds", 0, 0), Some(1.0));

    let formatted = engine.images(&output.formatted).unwrap();
    assert_eq!(formatted.len(), 72);
    assert!(formatted.windows(2).all(|w| w[0].time_start() < w[1].time_start()));
    for image in formatted.iter() {
        // 4000 / 6000 scaled to int16
        assert_eq!(image.value("ndvi", 0, 0), Some(6667.0));
    }
    assert_eq!(formatted[9].value(FILLED_BAND, 0, 0), Some(100.0));
    assert_eq!(formatted[9].value("pctClouds", 0, 0), Some(100.0));
    assert_eq!(formatted[30].value(FILLED_BAND, 0, 0), Some(0.0));
    assert_eq!(formatted[30].value("pctClear", 0, 0), Some(100.0));
    assert!(formatted[30].band("time").is_none());
}

#[test]
fn test_run_exports_newest_first() {
    init();
    let engine = engine();
    let task_ids = pipeline::run(&engine, &config(), &catalog()).unwrap();

    assert_eq!(task_ids.len(), 72);
    assert_eq!(task_ids[0], "local-task-1");
    let exports = engine.exports().unwrap();
    assert_eq!(exports.len(), 72);
    assert_eq!(exports[0].asset_id, "users/test/rendvi/reNDVI_20201221");
    assert_eq!(exports[0].description, "reNDVI_20201221");
    assert_eq!(exports[71].asset_id, "users/test/rendvi/reNDVI_20190101");
    assert_eq!(exports[0].crs, "EPSG:4326");
    assert_eq!(exports[0].scale, 1000.0);
}

#[test]
fn test_run_requires_asset_root() {
    init();
    let mut config = config();
    config.export.asset_root.clear();
    let result = pipeline::run(&LocalEngine::new(1, 1), &config, &catalog());
    assert!(matches!(result, Err(rendvi::RendviError::Config(_))));
}

#[test]
fn test_modis_needs_state_product() {
    let mut config = config();
    config.state_product = None;
    assert!(matches!(build_rendvi(&config, &catalog()), Err(rendvi::RendviError::Config(_))));
    config.product = "LANDSAT".to_string();
    assert!(matches!(build_rendvi(&config, &catalog()), Err(rendvi::RendviError::UnknownProduct(_))));
}

#[test]
fn test_builtin_graph_encodes_shared_sources_once() {
    let output = build_rendvi(&PipelineConfig::default(), &Catalog::builtin()).unwrap();
    let encoded = encode(output.formatted.expr());
    let result = encoded["result"].as_str().unwrap();
    assert!(encoded["values"][result].is_object());

    let text = encoded.to_string();
    assert_eq!(text.matches("MODIS/006/MOD09GQ").count(), 1);
    assert_eq!(text.matches("MODIS/006/MOD09GA").count(), 1);
}

#[test]
fn test_viirs_product_from_catalog() {
    let mut config = PipelineConfig::default();
    config.product = "VNP09GA".to_string();
    config.state_product = None;
    let catalog = Catalog::builtin();
    let (_, product): (_, Product) = pipeline::masked_collection(&config, &catalog).unwrap();
    assert_eq!(product.sensor, Sensor::Viirs);
    assert!(build_rendvi(&config, &catalog).is_ok());
}

/// Daily `50 + 10 sin(2π doy / 365)` for 2018-2020 with no quality issues
fn seasonal(doy: u32) -> f64 {
    50.0 + 10.0 * (2.0 * std::f64::consts::PI * doy as f64 / 365.0).sin()
}

#[test]
fn test_synthetic_seasonal_series() {
    use rendvi::core::{BackFillParams, Climatology, ClimatologyParams, DekadCompositor, DespikeParams, Despiker};
    use rendvi::core::{ForecastModel, Harmonics, Rendvi};
    use rendvi::core::forecast::PREDICTED_BAND;
    use rendvi::ImageCollection;

    init();
    let start = to_millis(&parse_date("2018-01-01").unwrap()) as f64;
    let daily: Vec<LocalImage> = (0..1096)
        .map(|i| {
            let t = (start + i as f64 * DAY_MS) as i64;
            let doy = parse_date(&format_millis(t, "%Y-%m-%d").unwrap()).unwrap().ordinal();
            LocalImage::new()
                .with_band(LocalBand::constant("ndvi", seasonal(doy), (1, 1)))
                .with_time_start(t)
        })
        .collect();
    let engine = LocalEngine::new(1, 1).with_collection("daily", daily);

    let series = Rendvi::new(ImageCollection::load("daily"), "ndvi");
    let composites = DekadCompositor::new(vec![2018, 2019, 2020]).apply(&series).unwrap();
    let despiked = Despiker::with_params(DespikeParams { diff_threshold: 5.0, ..DespikeParams::default() })
        .apply(&composites);
    let climatology =
        Climatology::calc(&composites, &ClimatologyParams { scale: 100.0, ..ClimatologyParams::default() }).unwrap();
    let filled = climatology.back_fill(&despiked, &BackFillParams::default()).unwrap();
    let mut model = ForecastModel::new(Harmonics::default());
    model.fit(&filled);
    let predicted = model.predict(&filled).unwrap();

    let images = engine.images(predicted.collection()).unwrap();
    assert_eq!(images.len(), 108);
    for image in images.iter() {
        let t = image.time_start().unwrap();
        let doy = parse_date(&format_millis(t, "%Y-%m-%d").unwrap()).unwrap().ordinal();
        let value = image.value(PREDICTED_BAND, 0, 0).unwrap();
        assert!(
            (value - seasonal(doy)).abs() < 2.5,
            "dekad starting on day {} predicted {} expected {}",
            doy,
            value,
            seasonal(doy)
        );
    }
}
