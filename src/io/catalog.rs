use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graph::ImageCollection;
use crate::types::{RendviError, RendviResult};

/// Quality encoding family of a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensor {
    Modis,
    Viirs,
}

/// Band layout of one surface reflectance product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub collection_id: String,
    pub red: String,
    pub nir: String,
    /// Per-pixel quality band of the reflectance image
    #[serde(default)]
    pub qc_band: Option<String>,
    /// Packed state band, usually at coarser resolution
    #[serde(default)]
    pub state_band: Option<String>,
    pub sensor: Sensor,
}

impl Product {
    fn new(name: &str, collection_id: &str, red: &str, nir: &str, sensor: Sensor) -> Self {
        Self {
            name: name.to_string(),
            collection_id: collection_id.to_string(),
            red: red.to_string(),
            nir: nir.to_string(),
            qc_band: None,
            state_band: None,
            sensor,
        }
    }

    fn with_qc(mut self, band: &str) -> Self {
        self.qc_band = Some(band.to_string());
        self
    }

    fn with_state(mut self, band: &str) -> Self {
        self.state_band = Some(band.to_string());
        self
    }

    /// Deferred handle on the product's collection
    pub fn load(&self) -> ImageCollection {
        ImageCollection::load(&self.collection_id)
    }
}

/// Read-only product table indexed by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    products: BTreeMap<String, Product>,
}

impl Catalog {
    /// The MODIS Terra/Aqua and VIIRS daily products
    pub fn builtin() -> Self {
        let modis = |name: &str, id: &str| Product::new(name, id, "sur_refl_b01", "sur_refl_b02", Sensor::Modis);
        Self::from_products(vec![
            modis("MOD09GQ", "MODIS/006/MOD09GQ").with_qc("QC_250m"),
            modis("MOD09GA", "MODIS/006/MOD09GA").with_state("state_1km"),
            modis("MYD09GQ", "MODIS/006/MYD09GQ").with_qc("QC_250m"),
            modis("MYD09GA", "MODIS/006/MYD09GA").with_state("state_1km"),
            Product::new("VNP09GA", "NOAA/VIIRS/001/VNP09GA", "I1", "I2", Sensor::Viirs)
                .with_qc("QF1")
                .with_state("QF2"),
        ])
    }

    pub fn from_products(products: Vec<Product>) -> Self {
        Self { products: products.into_iter().map(|p| (p.name.clone(), p)).collect() }
    }

    /// Table given as a JSON array of products
    pub fn from_json_str(json: &str) -> RendviResult<Self> {
        let products: Vec<Product> = serde_json::from_str(json)?;
        Ok(Self::from_products(products))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> RendviResult<Self> {
        log::debug!("Loading product catalog from {}", path.as_ref().display());
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn get(&self, name: &str) -> RendviResult<&Product> {
        self.products.get(name).ok_or_else(|| RendviError::UnknownProduct(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }
}
