//! End-to-end reNDVI graph: masking, NDVI, dekads, despiking, gap filling,
//! smoothing and export formatting

use crate::config::PipelineConfig;
use crate::core::dekad::day_of_year_millis;
use crate::core::{
    add_normalized_difference, Climatology, DekadCompositor, Despiker, Masker, QaLayout, Rendvi, Smoother,
};
use crate::engine::Engine;
use crate::graph::{Image, ImageCollection};
use crate::io::catalog::{Catalog, Product, Sensor};
use crate::io::{batch_export, format_for_export};
use crate::types::{RendviError, RendviResult};

/// Graphs produced by one pipeline build
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub composites: Rendvi,
    pub climatology: Climatology,
    pub smoothed: Rendvi,
    /// Export-ready images in chronological order
    pub formatted: ImageCollection,
}

/// Quality-masked daily collection of the configured product
pub fn masked_collection(config: &PipelineConfig, catalog: &Catalog) -> RendviResult<(ImageCollection, Product)> {
    let product = catalog.get(&config.product)?.clone();
    let start = day_of_year_millis(config.start_year, 1)?;
    let end = day_of_year_millis(config.end_year + 1, 1)?;
    let surface = product.load().filter_date(start, end);

    let masked = match product.sensor {
        Sensor::Modis => {
            let state_name = config
                .state_product
                .as_deref()
                .ok_or_else(|| RendviError::Config(format!("{} needs a state_product", product.name)))?;
            let state_product = catalog.get(state_name)?;
            let mut layout = QaLayout::modis();
            if let Some(qc) = &product.qc_band {
                layout.quality.band = qc.clone();
            }
            if let Some(state) = &state_product.state_band {
                for field in [&mut layout.cloud, &mut layout.shadow, &mut layout.snow] {
                    field.band = state.clone();
                }
            }
            let state = state_product.load().filter_date(start, end);
            Masker::new(layout).apply_modis(&surface, &state, &product.red, &product.nir)
        }
        Sensor::Viirs => Masker::new(QaLayout::viirs()).apply_viirs(&surface, &product.red, &product.nir),
    };
    Ok((masked, product))
}

pub fn build_rendvi(config: &PipelineConfig, catalog: &Catalog) -> RendviResult<PipelineOutput> {
    config.validate()?;
    log::info!(
        "Building reNDVI graph for {} {}-{}",
        config.product,
        config.start_year,
        config.end_year
    );
    let band = config.band.as_str();

    let (masked, product) = masked_collection(config, catalog)?;
    let with_ndvi = add_normalized_difference(&masked, &product.nir, &product.red, Some(band));
    let series = Rendvi::new(with_ndvi, band).with_seed(config.seed).with_time_unit(config.time_unit);

    let composites = DekadCompositor::new(config.years()).with_qa(config.include_qa).apply(&series)?;
    let despiked = Despiker::with_params(config.despike.clone()).apply(&composites);

    let climatology = match &config.climatology_asset {
        Some(id) => {
            log::info!("Using stored climatology {}", id);
            Climatology::from_collection(ImageCollection::load(id), band)
        }
        None => Climatology::calc(&composites, &config.climatology)?,
    };
    let filled = climatology.back_fill(&despiked, &config.back_fill)?;
    let smoothed = Smoother::with_params(config.smoothing.clone()).apply(&filled);

    let land_mask = config.export.land_mask.as_ref().map(|id| {
        let mask_band = config.export.land_mask_band.clone();
        ImageCollection::load(id)
            .first()
            .map(move |img| img.select(&[mask_band.as_str()]))
            .or_else(Image::constant(1.0))
    });
    let aux = config.export.aux_band_pattern.as_deref();
    let formatted = smoothed
        .collection()
        .map(|img| format_for_export(&img, band, aux, land_mask.as_ref()))
        .sort_by_time();

    Ok(PipelineOutput { composites, climatology, smoothed, formatted })
}

/// Build the graph and submit one export per dekad
pub fn run<E: Engine + ?Sized>(engine: &E, config: &PipelineConfig, catalog: &Catalog) -> RendviResult<Vec<String>> {
    let output = build_rendvi(config, catalog)?;
    if config.export.asset_root.is_empty() {
        return Err(RendviError::Config("export.asset_root is not set".to_string()));
    }
    batch_export(
        engine,
        &output.formatted,
        &config.export.region,
        &config.export.asset_root,
        &config.export.options,
    )
}
