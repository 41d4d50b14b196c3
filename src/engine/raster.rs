//! Pixel model of the local reference engine
//!
//! Every band is a dense `f64` grid plus a validity mask on the engine's
//! fixed grid. Masked pixels never contribute to arithmetic or reductions.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array2, Zip};
use regex::Regex;

use super::local::Datum;
use super::lstsq;
use crate::graph::{BandSelector, PixelFn, PixelOp, Reducer};
use crate::types::{RendviError, RendviResult, TIME_START};

/// One band of a local image
#[derive(Debug, Clone)]
pub struct LocalBand {
    pub name: String,
    pub values: Array2<f64>,
    pub valid: Array2<bool>,
}

impl LocalBand {
    /// Band with every pixel valid
    pub fn new(name: &str, values: Array2<f64>) -> Self {
        let valid = Array2::from_elem(values.dim(), true);
        Self { name: name.to_string(), values, valid }
    }

    pub fn constant(name: &str, value: f64, shape: (usize, usize)) -> Self {
        Self::new(name, Array2::from_elem(shape, value))
    }

    pub fn with_valid(mut self, valid: Array2<bool>) -> Self {
        self.valid = valid;
        self
    }

    /// Value at a pixel, `None` when masked
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        match self.valid.get((row, col)) {
            Some(true) => self.values.get((row, col)).copied(),
            _ => None,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    fn renamed(&self, name: &str) -> Self {
        Self { name: name.to_string(), values: self.values.clone(), valid: self.valid.clone() }
    }
}

/// A fully evaluated image
#[derive(Debug, Clone, Default)]
pub struct LocalImage {
    pub bands: Vec<LocalBand>,
    pub properties: BTreeMap<String, Datum>,
}

impl LocalImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_band(mut self, band: LocalBand) -> Self {
        self.bands.push(band);
        self
    }

    pub fn with_property(mut self, key: &str, value: f64) -> Self {
        self.properties.insert(key.to_string(), Datum::Number(value));
        self
    }

    pub fn with_time_start(self, millis: i64) -> Self {
        self.with_property(TIME_START, millis as f64)
    }

    pub fn band(&self, name: &str) -> Option<&LocalBand> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    /// Value of `band` at a pixel, `None` when the band is absent or the pixel masked
    pub fn value(&self, band: &str, row: usize, col: usize) -> Option<f64> {
        self.band(band).and_then(|b| b.get(row, col))
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.properties.get(key) {
            Some(Datum::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn time_start(&self) -> Option<i64> {
        self.number(TIME_START).map(|t| t as i64)
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.first().map(|b| b.shape())
    }

    fn with_bands(&self, bands: Vec<LocalBand>) -> Self {
        Self { bands, properties: self.properties.clone() }
    }
}

fn missing_band(name: &str, image: &LocalImage) -> RendviError {
    RendviError::Evaluation(format!("band '{}' not found; image has {:?}", name, image.band_names()))
}

pub(crate) fn select(image: &LocalImage, selector: &BandSelector) -> RendviResult<LocalImage> {
    if image.bands.is_empty() {
        return Ok(image.clone());
    }
    let bands = match selector {
        BandSelector::Names(names) => names
            .iter()
            .map(|name| image.band(name).cloned().ok_or_else(|| missing_band(name, image)))
            .collect::<RendviResult<Vec<_>>>()?,
        BandSelector::Pattern(pattern) => {
            let re = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| RendviError::Evaluation(format!("bad band pattern '{}': {}", pattern, e)))?;
            image.bands.iter().filter(|b| re.is_match(&b.name)).cloned().collect()
        }
        BandSelector::Index(index) => vec![image
            .bands
            .get(*index)
            .cloned()
            .ok_or_else(|| RendviError::Evaluation(format!("band index {} out of range", index)))?],
    };
    Ok(image.with_bands(bands))
}

pub(crate) fn rename(image: &LocalImage, names: &[String]) -> RendviResult<LocalImage> {
    if image.bands.is_empty() {
        return Ok(image.clone());
    }
    if names.len() != image.bands.len() {
        return Err(RendviError::Evaluation(format!(
            "cannot rename {} bands to {:?}",
            image.bands.len(),
            names
        )));
    }
    let bands = image.bands.iter().zip(names).map(|(b, n)| b.renamed(n)).collect();
    Ok(image.with_bands(bands))
}

pub(crate) fn add_bands(image: &LocalImage, other: &LocalImage, overwrite: bool) -> LocalImage {
    let mut bands = image.bands.clone();
    for band in &other.bands {
        match bands.iter_mut().find(|b| b.name == band.name) {
            Some(existing) if overwrite => *existing = band.clone(),
            Some(_) => bands.push(band.renamed(&format!("{}_1", band.name))),
            None => bands.push(band.clone()),
        }
    }
    image.with_bands(bands)
}

/// Pair bands the way pixel operators broadcast: a single band meets every band
/// of the other side, otherwise bands pair by position. Names come from the longer side.
fn pair_bands<'a>(
    left: &'a LocalImage,
    right: &'a LocalImage,
) -> RendviResult<Vec<(&'a LocalBand, &'a LocalBand, &'a str)>> {
    let (nl, nr) = (left.bands.len(), right.bands.len());
    if nl == nr {
        Ok(left.bands.iter().zip(&right.bands).map(|(l, r)| (l, r, l.name.as_str())).collect())
    } else if nl == 1 {
        Ok(right.bands.iter().map(|r| (&left.bands[0], r, r.name.as_str())).collect())
    } else if nr == 1 {
        Ok(left.bands.iter().map(|l| (l, &right.bands[0], l.name.as_str())).collect())
    } else {
        Err(RendviError::Evaluation(format!(
            "band count mismatch: {:?} vs {:?}",
            left.band_names(),
            right.band_names()
        )))
    }
}

fn truth(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn apply_op(op: PixelOp, a: f64, b: f64) -> Option<f64> {
    let out = match op {
        PixelOp::Add => a + b,
        PixelOp::Subtract => a - b,
        PixelOp::Multiply => a * b,
        PixelOp::Divide => {
            if b == 0.0 {
                return None;
            }
            a / b
        }
        PixelOp::Min => a.min(b),
        PixelOp::Max => a.max(b),
        PixelOp::Gt => truth(a > b),
        PixelOp::Gte => truth(a >= b),
        PixelOp::Lt => truth(a < b),
        PixelOp::Lte => truth(a <= b),
        PixelOp::Eq => truth(a == b),
        PixelOp::Neq => truth(a != b),
        PixelOp::And => truth(a != 0.0 && b != 0.0),
        PixelOp::Or => truth(a != 0.0 || b != 0.0),
        PixelOp::BitwiseAnd => ((a as i64) & (b as i64)) as f64,
        PixelOp::RightShift => ((a as i64) >> (b as i64).clamp(0, 63)) as f64,
    };
    if out.is_finite() {
        Some(out)
    } else {
        None
    }
}

/// Arithmetic, comparison and logical operators; properties are not carried over
pub(crate) fn binary(op: PixelOp, left: &LocalImage, right: &LocalImage) -> RendviResult<LocalImage> {
    if left.bands.is_empty() || right.bands.is_empty() {
        return Ok(LocalImage::new());
    }
    let mut bands = Vec::new();
    for (l, r, name) in pair_bands(left, right)? {
        let shape = l.shape();
        let mut values = Array2::zeros(shape);
        let mut valid = Array2::from_elem(shape, false);
        Zip::from(&mut values)
            .and(&mut valid)
            .and(&l.values)
            .and(&l.valid)
            .and(&r.values)
            .and(&r.valid)
            .for_each(|v, ok, &a, &va, &b, &vb| {
                if va && vb {
                    if let Some(out) = apply_op(op, a, b) {
                        *v = out;
                        *ok = true;
                    }
                }
            });
        bands.push(LocalBand { name: name.to_string(), values, valid });
    }
    Ok(LocalImage { bands, properties: BTreeMap::new() })
}

fn apply_fn(op: PixelFn, a: f64) -> f64 {
    match op {
        PixelFn::Abs => a.abs(),
        PixelFn::Not => truth(a == 0.0),
        PixelFn::Cos => a.cos(),
        PixelFn::Sin => a.sin(),
        PixelFn::ToFloat => a as f32 as f64,
        PixelFn::ToInt16 => a.round().clamp(i16::MIN as f64, i16::MAX as f64),
        PixelFn::ToUint8 => a.round().clamp(0.0, u8::MAX as f64),
        PixelFn::ToUint16 => a.round().clamp(0.0, u16::MAX as f64),
    }
}

pub(crate) fn unary(op: PixelFn, image: &LocalImage) -> LocalImage {
    let bands = image
        .bands
        .iter()
        .map(|b| LocalBand {
            name: b.name.clone(),
            values: b.values.mapv(|a| apply_fn(op, a)),
            valid: b.valid.clone(),
        })
        .collect();
    LocalImage { bands, properties: BTreeMap::new() }
}

/// Broadcast a single-band operand over `count` bands, or pair band by band
fn operand_bands<'a>(operand: &'a LocalImage, count: usize, what: &str) -> RendviResult<Vec<&'a LocalBand>> {
    match operand.bands.len() {
        1 => Ok(vec![&operand.bands[0]; count]),
        n if n == count => Ok(operand.bands.iter().collect()),
        n => Err(RendviError::Evaluation(format!("{} has {} bands, expected 1 or {}", what, n, count))),
    }
}

pub(crate) fn update_mask(image: &LocalImage, mask: &LocalImage) -> RendviResult<LocalImage> {
    if image.bands.is_empty() {
        return Ok(image.clone());
    }
    let masks = operand_bands(mask, image.bands.len(), "mask")?;
    let bands = image
        .bands
        .iter()
        .zip(masks)
        .map(|(b, m)| {
            let mut valid = b.valid.clone();
            Zip::from(&mut valid).and(&m.values).and(&m.valid).for_each(|ok, &mv, &mok| {
                *ok = *ok && mok && mv != 0.0;
            });
            LocalBand { name: b.name.clone(), values: b.values.clone(), valid }
        })
        .collect();
    Ok(image.with_bands(bands))
}

pub(crate) fn unmask(image: &LocalImage, fill: &LocalImage) -> RendviResult<LocalImage> {
    if image.bands.is_empty() || fill.bands.is_empty() {
        return Ok(image.clone());
    }
    let fills = operand_bands(fill, image.bands.len(), "unmask value")?;
    let bands = image
        .bands
        .iter()
        .zip(fills)
        .map(|(b, f)| {
            let mut values = b.values.clone();
            let mut valid = b.valid.clone();
            Zip::from(&mut values).and(&mut valid).and(&f.values).and(&f.valid).for_each(|v, ok, &fv, &fok| {
                if !*ok && fok {
                    *v = fv;
                    *ok = true;
                }
            });
            LocalBand { name: b.name.clone(), values, valid }
        })
        .collect();
    Ok(image.with_bands(bands))
}

pub(crate) fn mask_of(image: &LocalImage) -> LocalImage {
    let bands = image
        .bands
        .iter()
        .map(|b| LocalBand::new(&b.name, b.valid.mapv(truth)))
        .collect();
    image.with_bands(bands)
}

pub(crate) fn replace_where(image: &LocalImage, test: &LocalImage, value: &LocalImage) -> RendviResult<LocalImage> {
    if image.bands.is_empty() {
        return Ok(image.clone());
    }
    let count = image.bands.len();
    let tests = operand_bands(test, count, "where test")?;
    let values = operand_bands(value, count, "where value")?;
    let bands = image
        .bands
        .iter()
        .zip(tests.into_iter().zip(values))
        .map(|(b, (t, v))| {
            let mut out = b.values.clone();
            let mut valid = b.valid.clone();
            Zip::from(&mut out)
                .and(&mut valid)
                .and(&t.values)
                .and(&t.valid)
                .and(&v.values)
                .and(&v.valid)
                .for_each(|o, ok, &tv, &tok, &vv, &vok| {
                    if tok && tv != 0.0 {
                        *o = vv;
                        *ok = vok;
                    }
                });
            LocalBand { name: b.name.clone(), values: out, valid }
        })
        .collect();
    Ok(image.with_bands(bands))
}

pub(crate) fn sum_bands(image: &LocalImage) -> LocalImage {
    let shape = match image.shape() {
        Some(shape) => shape,
        None => return image.clone(),
    };
    let mut values = Array2::zeros(shape);
    let mut valid = Array2::from_elem(shape, true);
    for band in &image.bands {
        values += &band.values;
        Zip::from(&mut valid).and(&band.valid).for_each(|ok, &bok| *ok = *ok && bok);
    }
    image.with_bands(vec![LocalBand { name: "sum".to_string(), values, valid }])
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

pub(crate) fn random(seed: u64, shape: (usize, usize)) -> LocalImage {
    let values = Array2::from_shape_fn(shape, |(r, c)| {
        let key = seed ^ splitmix64(((r as u64) << 32) | c as u64);
        (splitmix64(key) >> 11) as f64 / (1u64 << 53) as f64
    });
    LocalImage::new().with_band(LocalBand::new("random", values))
}

/// Valid samples of one band at one pixel across a collection
fn samples(images: &[Arc<LocalImage>], band: &str, row: usize, col: usize) -> Vec<f64> {
    images.iter().filter_map(|img| img.value(band, row, col)).collect()
}

fn statistic(reducer: &Reducer, xs: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    match reducer {
        Reducer::Count => Some(n),
        _ if xs.is_empty() => None,
        Reducer::Mean => Some(xs.iter().sum::<f64>() / n),
        Reducer::Sum => Some(xs.iter().sum()),
        Reducer::Max => xs.iter().copied().reduce(f64::max),
        Reducer::Min => xs.iter().copied().reduce(f64::min),
        Reducer::StdDev => {
            let mean = xs.iter().sum::<f64>() / n;
            Some((xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt())
        }
        _ => None,
    }
}

fn band_from_fn(name: &str, shape: (usize, usize), f: impl Fn(usize, usize) -> Option<f64>) -> LocalBand {
    let mut values = Array2::zeros(shape);
    let mut valid = Array2::from_elem(shape, false);
    for ((r, c), v) in values.indexed_iter_mut() {
        if let Some(out) = f(r, c) {
            *v = out;
            valid[(r, c)] = true;
        }
    }
    LocalBand { name: name.to_string(), values, valid }
}

/// Collapse a collection along the image axis; an empty collection gives a band-less image
pub(crate) fn reduce(images: &[Arc<LocalImage>], reducer: &Reducer) -> RendviResult<LocalImage> {
    let first = match images.first() {
        Some(first) => first,
        None => return Ok(LocalImage::new()),
    };
    let shape = match first.shape() {
        Some(shape) => shape,
        None => return Ok(LocalImage::new()),
    };
    let names: Vec<String> = first.bands.iter().map(|b| b.name.clone()).collect();

    let bands = match reducer {
        Reducer::MeanStdDev => {
            let mut bands = Vec::new();
            for name in &names {
                bands.push(band_from_fn(&format!("{}_mean", name), shape, |r, c| {
                    statistic(&Reducer::Mean, &samples(images, name, r, c))
                }));
                bands.push(band_from_fn(&format!("{}_stdDev", name), shape, |r, c| {
                    statistic(&Reducer::StdDev, &samples(images, name, r, c))
                }));
            }
            bands
        }
        Reducer::LinearFit => {
            if names.len() < 2 {
                return Err(RendviError::Evaluation("linear fit needs an x and a y band".to_string()));
            }
            let (x, y) = (&names[0], &names[1]);
            let fits = Array2::from_shape_fn(shape, |(r, c)| {
                let pairs = images
                    .iter()
                    .filter_map(|img| Some((img.value(x, r, c)?, img.value(y, r, c)?)))
                    .collect::<Vec<_>>();
                lstsq::linear_fit(&pairs)
            });
            vec![
                band_from_fn("scale", shape, |r, c| fits[(r, c)].map(|f| f.0)),
                band_from_fn("offset", shape, |r, c| fits[(r, c)].map(|f| f.1)),
            ]
        }
        Reducer::LinearRegression { independents, dependent } => {
            let solutions = Array2::from_shape_fn(shape, |(r, c)| {
                let mut rows = Vec::new();
                let mut ys = Vec::new();
                for img in images {
                    let row: Option<Vec<f64>> = independents.iter().map(|b| img.value(b, r, c)).collect();
                    if let (Some(row), Some(y)) = (row, img.value(dependent, r, c)) {
                        rows.push(row);
                        ys.push(y);
                    }
                }
                lstsq::solve(&rows, &ys)
            });
            independents
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    band_from_fn(name, shape, |r, c| solutions[(r, c)].as_ref().map(|beta| beta[i]))
                })
                .collect()
        }
        simple => names
            .iter()
            .map(|name| band_from_fn(name, shape, |r, c| statistic(simple, &samples(images, name, r, c))))
            .collect(),
    };
    Ok(LocalImage { bands, properties: BTreeMap::new() })
}

/// Per pixel, take every band from the image holding the largest valid `band` value
pub(crate) fn quality_mosaic(images: &[Arc<LocalImage>], band: &str) -> RendviResult<LocalImage> {
    let first = match images.first() {
        Some(first) if first.shape().is_some() => first,
        _ => return Ok(LocalImage::new()),
    };
    if first.band(band).is_none() {
        return Err(missing_band(band, first));
    }
    let shape = first.shape().unwrap_or((0, 0));
    let winners = Array2::from_shape_fn(shape, |(r, c)| {
        let mut best: Option<(usize, f64)> = None;
        for (i, img) in images.iter().enumerate() {
            if let Some(v) = img.value(band, r, c) {
                if best.map_or(true, |(_, b)| v > b) {
                    best = Some((i, v));
                }
            }
        }
        best.map(|(i, _)| i)
    });
    let bands = first
        .bands
        .iter()
        .map(|b| band_from_fn(&b.name, shape, |r, c| winners[(r, c)].and_then(|i| images[i].value(&b.name, r, c))))
        .collect();
    Ok(LocalImage { bands, properties: BTreeMap::new() })
}
