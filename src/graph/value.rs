use std::marker::PhantomData;

use super::{lambda, Expr, Handle, Image, Node, NodeKind, NumberFn, NumberOp};
use crate::types::DAY_MS;

/// Deferred scalar, typically a timestamp in epoch milliseconds
#[derive(Debug, Clone)]
pub struct Number(pub(crate) Expr);

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number(Node::new(NodeKind::Constant(value)))
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::from(value as f64)
    }
}

impl From<&Number> for Number {
    fn from(value: &Number) -> Self {
        value.clone()
    }
}

impl Number {
    fn binary(&self, op: NumberOp, other: impl Into<Number>) -> Self {
        Number(Node::new(NodeKind::NumberBinary { op, left: self.0.clone(), right: other.into().0 }))
    }

    fn unary(&self, op: NumberFn) -> Self {
        Number(Node::new(NodeKind::NumberUnary { op, input: self.0.clone() }))
    }

    pub fn add(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Add, other)
    }

    pub fn subtract(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Subtract, other)
    }

    pub fn multiply(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Multiply, other)
    }

    pub fn divide(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Divide, other)
    }

    pub fn modulo(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Mod, other)
    }

    pub fn min(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Min, other)
    }

    pub fn max(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Max, other)
    }

    pub fn eq(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Eq, other)
    }

    pub fn gt(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Gt, other)
    }

    pub fn lt(&self, other: impl Into<Number>) -> Self {
        self.binary(NumberOp::Lt, other)
    }

    pub fn abs(&self) -> Self {
        self.unary(NumberFn::Abs)
    }

    pub fn floor(&self) -> Self {
        self.unary(NumberFn::Floor)
    }

    /// Calendar year of a timestamp
    pub fn year(&self) -> Self {
        self.unary(NumberFn::Year)
    }

    /// One-based day of year of a timestamp
    pub fn day_of_year(&self) -> Self {
        self.unary(NumberFn::DayOfYear)
    }

    /// Timestamp of January 1st of the timestamp's year
    pub fn start_of_year(&self) -> Self {
        self.unary(NumberFn::StartOfYear)
    }

    /// Shift a timestamp by a (possibly fractional or negative) number of days
    pub fn add_days(&self, days: f64) -> Self {
        self.add(days * DAY_MS)
    }
}

/// Deferred list of values of one handle type
#[derive(Debug)]
pub struct List<T> {
    pub(crate) expr: Expr,
    marker: PhantomData<T>,
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        List { expr: self.expr.clone(), marker: PhantomData }
    }
}

impl<T> Handle for List<T> {
    fn from_expr(expr: Expr) -> Self {
        List { expr, marker: PhantomData }
    }

    fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl<T: Handle> List<T> {
    /// Sub-list `[start, end)`; negative positions count from the end
    pub fn slice(&self, start: impl Into<Number>, end: Option<Number>) -> Self {
        List::from_expr(Node::new(NodeKind::ListSlice {
            list: self.expr.clone(),
            start: start.into().0,
            end: end.map(|n| n.0),
        }))
    }

    pub fn map<U: Handle>(&self, f: impl FnOnce(T) -> U) -> List<U> {
        let (var, body) = lambda(f);
        List::from_expr(Node::new(NodeKind::ListMap { list: self.expr.clone(), var, body }))
    }
}

impl<T: Handle> List<List<T>> {
    pub fn flatten(&self) -> List<T> {
        List::from_expr(Node::new(NodeKind::ListFlatten(self.expr.clone())))
    }
}

impl List<Image> {
    /// Element at `index`, missing when the list is shorter
    pub fn get(&self, index: usize) -> Lookup {
        Lookup(Node::new(NodeKind::ListGet { list: self.expr.clone(), index }))
    }

    /// Element at `index` used directly as an image; evaluation fails when the list is shorter
    pub fn get_image(&self, index: usize) -> Image {
        Image(Node::new(NodeKind::ListGet { list: self.expr.clone(), index }))
    }
}

/// An image that may or may not exist once the graph is evaluated
#[derive(Debug, Clone)]
pub struct Lookup(pub(crate) Expr);

impl Lookup {
    /// Transform the image when found; stays missing otherwise
    pub fn map(&self, f: impl FnOnce(Image) -> Image) -> Lookup {
        let (var, body) = lambda(f);
        Lookup(Node::new(NodeKind::LookupMap { lookup: self.0.clone(), var, body }))
    }

    /// The found image, or `default` when missing or band-less
    pub fn or_else(&self, default: Image) -> Image {
        Image(Node::new(NodeKind::OrElse { lookup: self.0.clone(), default: default.0 }))
    }
}
