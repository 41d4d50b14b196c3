use serde::{Deserialize, Serialize};

use crate::core::series::{keep_bands, time_band, Rendvi};
use crate::graph::{Image, ImageCollection, Number, Reducer};

/// Name of the flag band marking removed spikes
pub const DESPIKED_BAND: &str = "despiked";

/// Spike removal parameters, all lengths in days
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DespikeParams {
    /// Half-width of the envelope searched for the local maximum
    pub window: u32,
    /// Spacing between consecutive composites
    pub step: u32,
    /// Tolerance around each expected neighbour date
    pub offset: u32,
    /// Largest jump to a neighbour still considered continuous
    pub diff_threshold: f64,
    /// Extra bands of the input carried to the output
    pub keep_band_pattern: Option<String>,
}

impl Default for DespikeParams {
    fn default() -> Self {
        Self {
            window: 30,
            step: 10,
            offset: 3,
            diff_threshold: 0.2,
            keep_band_pattern: None,
        }
    }
}

/// Removes values that jump away from both neighbours and exceed the local envelope
pub struct Despiker {
    params: DespikeParams,
}

impl Despiker {
    pub fn new() -> Self {
        Self { params: DespikeParams::default() }
    }

    pub fn with_params(params: DespikeParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DespikeParams {
        &self.params
    }

    /// Number of composites at each end of the series passed through untested
    pub fn edge(&self) -> usize {
        (self.params.window / self.params.step.max(1)) as usize
    }

    pub fn apply(&self, series: &Rendvi) -> Rendvi {
        log::info!("Despiking {}", series.band());
        log::debug!("Despike parameters: {:?}", self.params);

        let band = series.band();
        let sorted = series.collection().sort_by_time();
        let list = sorted.to_list(None);
        let edge = self.edge() as f64;
        let tail_start = sorted.size().subtract(edge).max(edge);

        let head = ImageCollection::from_list(&list.slice(0.0, Some(Number::from(edge))));
        let middle = ImageCollection::from_list(&list.slice(edge, Some(tail_start.clone())));
        let tail = ImageCollection::from_list(&list.slice(tail_start, None));

        let passed = |img: Image| self.pass_through(&img, series);
        let tested = middle.map(|img| self.test(&img, &sorted, series));

        let out = head.map(passed).merge(&tested).merge(&tail.map(passed)).sort_by_time();
        log::info!("Despike graph built for {}", band);
        series.with_collection(out)
    }

    fn noise(&self, series: &Rendvi) -> Image {
        Image::random(series.seed()).subtract(0.5).multiply(2.0).rename(&[series.band()])
    }

    fn finish(&self, value: Image, flag: Image, source: &Image, series: &Rendvi) -> Image {
        let out = value
            .add_bands(&flag.rename(&[DESPIKED_BAND]))
            .add_bands(&time_band(&source.time_start(), series.time_unit()));
        keep_bands(out, source, self.params.keep_band_pattern.as_deref())
    }

    fn pass_through(&self, img: &Image, series: &Rendvi) -> Image {
        self.finish(img.select(&[series.band()]), Image::constant(0.0), img, series)
    }

    fn test(&self, img: &Image, composites: &ImageCollection, series: &Rendvi) -> Image {
        let band = series.band();
        let (window, step, offset) = (self.params.window as f64, self.params.step as f64, self.params.offset as f64);
        let d = img.time_start();
        let noise = self.noise(series);
        let values = composites.select(&[band]);
        let between = |from: f64, to: f64| values.filter_date(d.add_days(from), d.add_days(to));
        let neighbour = |centre: f64| between(centre - offset, centre + offset).first().or_else(noise.clone());

        let previous = neighbour(-step);
        let current = neighbour(0.0);
        let next = neighbour(step);

        let envelope = between(-window - offset, -step - offset)
            .merge(&between(step + offset, window + offset))
            .reduce_lookup(Reducer::Max)
            .or_else(noise.clone());

        let m_diff = current.subtract(&previous).abs();
        let p_diff = next.subtract(&current).abs();
        let continuous = p_diff.lte(self.params.diff_threshold).or(m_diff.lte(self.params.diff_threshold));
        let bounded = current.lt(envelope.multiply(1.1));
        let keep = continuous.and(&bounded);

        let value = img.select(&[band]).update_mask(&keep);
        let flag = keep.not().unmask(0.0);
        self.finish(value, flag, img, series)
    }
}

impl Default for Despiker {
    fn default() -> Self {
        Self::new()
    }
}

impl Rendvi {
    /// Despiked series, see [`Despiker`]
    pub fn despike(&self, params: DespikeParams) -> Rendvi {
        Despiker::with_params(params).apply(self)
    }
}
