use crate::core::dekad::{day_of_year_millis, dekad_ranges};
use crate::core::masking::qa_flags_to_bands;
use crate::core::series::Rendvi;
use crate::graph::{Comparison, Filter, Image, ImageCollection};
use crate::types::{QaFlag, RendviResult, BEGIN, QA_BAND, TIME_START};

/// Property counting the daily images that went into a composite
pub const N_OBSERVATIONS: &str = "nObservations";

/// Best-pixel compositing of a daily series into dekads
pub struct DekadCompositor {
    years: Vec<i32>,
    include_qa: bool,
}

impl DekadCompositor {
    pub fn new(years: Vec<i32>) -> Self {
        Self { years, include_qa: false }
    }

    /// Also attach `nClear`, the per-flag `pct*` fractions and `pctClear`
    ///
    /// Requires the `qa` band written by masking.
    pub fn with_qa(mut self, include_qa: bool) -> Self {
        self.include_qa = include_qa;
        self
    }

    /// One composite per dekad and year, dropping dekads without observations
    pub fn apply(&self, series: &Rendvi) -> RendviResult<Rendvi> {
        log::info!("Compositing {} into dekads for years {:?}", series.band(), self.years);
        let band = series.band();
        let mut composites = Vec::with_capacity(self.years.len() * 36);

        for &year in &self.years {
            let start = day_of_year_millis(year, 1)?;
            let end = day_of_year_millis(year + 1, 1)?;
            let in_year = series.collection().filter_date(start, end);

            for (first_day, end_day) in dekad_ranges(year) {
                let dekad = in_year.filter_day_of_year(first_day, end_day);
                let mut composite = dekad
                    .select(&[band])
                    .quality_mosaic(band)
                    .set(TIME_START, &day_of_year_millis(year, first_day)?.into())
                    .set_number(BEGIN, first_day as f64)
                    .set(N_OBSERVATIONS, &dekad.size());
                if self.include_qa {
                    composite = composite.add_bands(&qa_summary(&dekad, band));
                }
                composites.push(composite);
            }
        }

        log::debug!("Built {} dekad composites", composites.len());
        let valid = ImageCollection::from_images(composites).filter(Filter::property(N_OBSERVATIONS, Comparison::Gt, 0.0));
        Ok(series.with_collection(valid))
    }
}

/// Clear-observation count and the share of observations carrying each flag
fn qa_summary(dekad: &ImageCollection, band: &str) -> Image {
    let observed = dekad.select(&[QA_BAND]).count();
    let flagged = dekad.map(|img| qa_flags_to_bands(&img.select(&[QA_BAND]))).count();

    let names: Vec<String> = QaFlag::ISSUES.iter().map(|f| format!("pct{}", f.label())).collect();
    let fractions = flagged.divide(&observed).rename_owned(names);
    let clear = Image::constant(1.0).subtract(fractions.sum_bands()).rename(&["pctClear"]);
    let n_clear = dekad.select(&[band]).count().rename(&["nClear"]);

    n_clear.add_bands(&fractions).add_bands(&clear)
}

impl Rendvi {
    /// Dekad composites of this series, see [`DekadCompositor`]
    pub fn dekad_images(&self, years: &[i32], include_qa: bool) -> RendviResult<Rendvi> {
        DekadCompositor::new(years.to_vec()).with_qa(include_qa).apply(self)
    }
}
