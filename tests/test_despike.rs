use rendvi::core::despike::DESPIKED_BAND;
use rendvi::core::{DespikeParams, Despiker, Rendvi};
use rendvi::engine::{LocalBand, LocalEngine, LocalImage};
use rendvi::types::{DAY_MS, TIME_BAND};
use rendvi::ImageCollection;

const START: f64 = 1_577_836_800_000.0; // 2020-01-01

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Composites every ten days holding `values`
fn composites(values: &[f64]) -> LocalEngine {
    let images = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            LocalImage::new()
                .with_band(LocalBand::constant("ndvi", *v, (1, 1)))
                .with_band(LocalBand::constant("pctClear", 0.5, (1, 1)))
                .with_time_start((START + 10.0 * i as f64 * DAY_MS) as i64)
        })
        .collect();
    LocalEngine::new(1, 1).with_collection("dekads", images)
}

fn series_with(spike_at: usize, spike: f64) -> Vec<f64> {
    let mut values = vec![1.0; 15];
    values[spike_at] = spike;
    values
}

fn despike(engine: &LocalEngine, params: DespikeParams) -> Vec<(Option<f64>, Option<f64>)> {
    let series = Rendvi::new(ImageCollection::load("dekads"), "ndvi");
    let out = Despiker::with_params(params).apply(&series);
    engine
        .images(out.collection())
        .unwrap()
        .iter()
        .map(|img| (img.value("ndvi", 0, 0), img.value(DESPIKED_BAND, 0, 0)))
        .collect()
}

#[test]
fn test_spike_is_removed_and_flagged() {
    init();
    let engine = composites(&series_with(7, 1.5));
    let out = despike(&engine, DespikeParams::default());

    assert_eq!(out.len(), 15);
    assert_eq!(out[7], (None, Some(1.0)));
    for (i, (value, flag)) in out.iter().enumerate().filter(|(i, _)| *i != 7) {
        assert_eq!(*value, Some(1.0), "composite {} should be kept", i);
        assert_eq!(*flag, Some(0.0));
    }
}

#[test]
fn test_jump_at_threshold_is_kept() {
    init();
    let engine = composites(&series_with(7, 1.0625));

    let at = DespikeParams { diff_threshold: 0.0625, ..DespikeParams::default() };
    assert_eq!(despike(&engine, at)[7], (Some(1.0625), Some(0.0)));

    let below = DespikeParams { diff_threshold: 0.05, ..DespikeParams::default() };
    assert_eq!(despike(&engine, below)[7], (None, Some(1.0)));
}

#[test]
fn test_small_jump_above_envelope_is_removed() {
    init();
    // continuous with its neighbours but more than 10% above the wider window
    let values = [1.0, 1.0, 1.0, 1.0, 1.0, 1.1, 1.2, 1.1, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
    let engine = composites(&values);
    let out = despike(&engine, DespikeParams::default());
    assert_eq!(out[6], (None, Some(1.0)));
    assert_eq!(out[5], (Some(1.1), Some(0.0)));
}

#[test]
fn test_edges_pass_through() {
    init();
    let mut values = series_with(1, 1.5);
    values[13] = 0.1;
    let engine = composites(&values);
    let out = despike(&engine, DespikeParams::default());
    assert_eq!(out[1], (Some(1.5), Some(0.0)));
    assert_eq!(out[13], (Some(0.1), Some(0.0)));
}

#[test]
fn test_output_bands() {
    init();
    let engine = composites(&series_with(7, 1.5));
    let params = DespikeParams { keep_band_pattern: Some("^pct.*".to_string()), ..DespikeParams::default() };
    let series = Rendvi::new(ImageCollection::load("dekads"), "ndvi");
    let images = engine.images(Despiker::with_params(params).apply(&series).collection()).unwrap();

    assert_eq!(images[0].band_names(), vec!["ndvi", DESPIKED_BAND, TIME_BAND, "pctClear"]);
    assert!(images.windows(2).all(|w| w[0].time_start() < w[1].time_start()));
    let years = images[0].value(TIME_BAND, 0, 0).unwrap();
    assert!((years - 50.0).abs() < 0.01);
}

#[test]
fn test_short_series_is_untested() {
    init();
    let engine = composites(&[1.0, 3.0, 1.0, 3.0]);
    let out = despike(&engine, DespikeParams::default());
    assert_eq!(out.len(), 4);
    assert!(out.iter().all(|(_, flag)| *flag == Some(0.0)));
}
