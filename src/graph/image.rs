use super::{Expr, Handle, List, Node, NodeKind, Number, PixelFn, PixelOp};
use crate::types::TIME_START;

/// How bands are picked out of an image
#[derive(Debug, Clone, PartialEq)]
pub enum BandSelector {
    /// Exact band names, output in the given order
    Names(Vec<String>),
    /// Regular expression matched against the whole band name
    Pattern(String),
    /// Band position
    Index(usize),
}

/// Deferred raster: a set of named bands plus a property bag
#[derive(Debug, Clone)]
pub struct Image(pub(crate) Expr);

/// Anything usable as the right-hand side of a pixel operation
pub trait IntoImage {
    fn into_image(self) -> Image;
}

impl IntoImage for Image {
    fn into_image(self) -> Image {
        self
    }
}

impl IntoImage for &Image {
    fn into_image(self) -> Image {
        self.clone()
    }
}

impl IntoImage for f64 {
    fn into_image(self) -> Image {
        Image::constant(self)
    }
}

impl IntoImage for Number {
    fn into_image(self) -> Image {
        Image::from_number(&self)
    }
}

impl IntoImage for &Number {
    fn into_image(self) -> Image {
        Image::from_number(self)
    }
}

fn names(bands: &[&str]) -> Vec<String> {
    bands.iter().map(|b| b.to_string()).collect()
}

impl Image {
    fn wrap(kind: NodeKind) -> Self {
        Image(Node::new(kind))
    }

    /// Single band image named `constant` holding `value` everywhere
    pub fn constant(value: f64) -> Self {
        Self::from_number(&Number::from(value))
    }

    /// Constant image whose value is a deferred number
    pub fn from_number(value: &Number) -> Self {
        Self::wrap(NodeKind::ImageConstant(value.0.clone()))
    }

    /// Uniform noise in [0, 1), reproducible for a given seed
    pub fn random(seed: u64) -> Self {
        Self::wrap(NodeKind::ImageRandom(seed))
    }

    pub fn select(&self, bands: &[&str]) -> Self {
        self.select_by(BandSelector::Names(names(bands)))
    }

    pub fn select_pattern(&self, pattern: &str) -> Self {
        self.select_by(BandSelector::Pattern(pattern.to_string()))
    }

    pub fn select_index(&self, index: usize) -> Self {
        self.select_by(BandSelector::Index(index))
    }

    pub fn select_by(&self, selector: BandSelector) -> Self {
        Self::wrap(NodeKind::Select { image: self.0.clone(), selector })
    }

    pub fn rename(&self, bands: &[&str]) -> Self {
        Self::wrap(NodeKind::Rename { image: self.0.clone(), names: names(bands) })
    }

    pub fn rename_owned(&self, bands: Vec<String>) -> Self {
        Self::wrap(NodeKind::Rename { image: self.0.clone(), names: bands })
    }

    /// Append the bands of `other`; bands with clashing names are replaced
    pub fn add_bands(&self, other: &Image) -> Self {
        Self::wrap(NodeKind::AddBands { image: self.0.clone(), other: other.0.clone(), overwrite: true })
    }

    /// Concatenate the bands of several images, properties from the first
    pub fn cat(images: &[Image]) -> Self {
        let mut iter = images.iter();
        let first = match iter.next() {
            Some(first) => first.clone(),
            None => return Self::constant(0.0).select_pattern("^$"),
        };
        iter.fold(first, |acc, img| acc.add_bands(img))
    }

    fn binary(&self, op: PixelOp, other: impl IntoImage) -> Self {
        Self::wrap(NodeKind::PixelBinary { op, left: self.0.clone(), right: other.into_image().0 })
    }

    fn unary(&self, op: PixelFn) -> Self {
        Self::wrap(NodeKind::PixelUnary { op, input: self.0.clone() })
    }

    pub fn add(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Add, other)
    }

    pub fn subtract(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Subtract, other)
    }

    pub fn multiply(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Multiply, other)
    }

    /// Division; pixels with a zero divisor are masked
    pub fn divide(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Divide, other)
    }

    pub fn min(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Min, other)
    }

    pub fn max(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Max, other)
    }

    pub fn gt(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Gt, other)
    }

    pub fn gte(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Gte, other)
    }

    pub fn lt(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Lt, other)
    }

    pub fn lte(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Lte, other)
    }

    pub fn eq(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Eq, other)
    }

    pub fn neq(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Neq, other)
    }

    pub fn and(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::And, other)
    }

    pub fn or(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::Or, other)
    }

    pub fn bitwise_and(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::BitwiseAnd, other)
    }

    pub fn right_shift(&self, other: impl IntoImage) -> Self {
        self.binary(PixelOp::RightShift, other)
    }

    pub fn abs(&self) -> Self {
        self.unary(PixelFn::Abs)
    }

    pub fn not(&self) -> Self {
        self.unary(PixelFn::Not)
    }

    pub fn cos(&self) -> Self {
        self.unary(PixelFn::Cos)
    }

    pub fn sin(&self) -> Self {
        self.unary(PixelFn::Sin)
    }

    pub fn to_float(&self) -> Self {
        self.unary(PixelFn::ToFloat)
    }

    pub fn to_int16(&self) -> Self {
        self.unary(PixelFn::ToInt16)
    }

    pub fn to_uint8(&self) -> Self {
        self.unary(PixelFn::ToUint8)
    }

    pub fn to_uint16(&self) -> Self {
        self.unary(PixelFn::ToUint16)
    }

    /// `(first - second) / (first + second)` of two bands, named `nd`
    pub fn normalized_difference(&self, first: &str, second: &str) -> Self {
        let a = self.select(&[first]);
        let b = self.select(&[second]);
        a.subtract(&b).divide(a.add(&b)).rename(&["nd"])
    }

    /// Mask out pixels where `mask` is zero or itself masked
    pub fn update_mask(&self, mask: impl IntoImage) -> Self {
        Self::wrap(NodeKind::UpdateMask { image: self.0.clone(), mask: mask.into_image().0 })
    }

    /// Fill masked pixels from `fill`; existing valid pixels are kept
    pub fn unmask(&self, fill: impl IntoImage) -> Self {
        Self::wrap(NodeKind::Unmask { image: self.0.clone(), fill: fill.into_image().0 })
    }

    /// 1 where the pixel is valid, 0 where masked, per band
    pub fn mask(&self) -> Self {
        Self::wrap(NodeKind::MaskOf(self.0.clone()))
    }

    /// Replace pixels where `test` is non-zero with `value`
    pub fn replace_where(&self, test: &Image, value: impl IntoImage) -> Self {
        Self::wrap(NodeKind::ReplaceWhere {
            image: self.0.clone(),
            test: test.0.clone(),
            value: value.into_image().0,
        })
    }

    /// Per-pixel sum over all bands, as a single band named `sum`
    pub fn sum_bands(&self) -> Self {
        Self::wrap(NodeKind::SumBands(self.0.clone()))
    }

    pub fn set(&self, key: &str, value: &Number) -> Self {
        Self::wrap(NodeKind::SetProperty { object: self.0.clone(), key: key.to_string(), value: value.0.clone() })
    }

    pub fn set_number(&self, key: &str, value: f64) -> Self {
        self.set(key, &Number::from(value))
    }

    pub fn set_text(&self, key: &str, value: &str) -> Self {
        let text = Node::new(NodeKind::Text(value.to_string()));
        Self::wrap(NodeKind::SetProperty { object: self.0.clone(), key: key.to_string(), value: text })
    }

    /// Copy every property of `source` onto this image
    pub fn copy_properties(&self, source: &Image) -> Self {
        Self::wrap(NodeKind::CopyProperties { target: self.0.clone(), source: source.0.clone() })
    }

    pub fn get_number(&self, key: &str) -> Number {
        Number(Node::new(NodeKind::Get { object: self.0.clone(), key: key.to_string(), default: None }))
    }

    pub fn get_number_or(&self, key: &str, default: f64) -> Number {
        Number(Node::new(NodeKind::Get { object: self.0.clone(), key: key.to_string(), default: Some(default) }))
    }

    /// Property holding a list of images, such as join matches
    pub fn get_images(&self, key: &str) -> List<Image> {
        List::from_expr(Node::new(NodeKind::Get { object: self.0.clone(), key: key.to_string(), default: None }))
    }

    /// Acquisition time in epoch milliseconds
    pub fn time_start(&self) -> Number {
        self.get_number(TIME_START)
    }

    /// Keep the acquisition time of `self` on the image produced by `f`
    pub fn retain_time(&self, f: impl FnOnce(&Image) -> Image) -> Image {
        f(self).set(TIME_START, &self.time_start())
    }
}
