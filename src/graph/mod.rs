//! Deferred raster expression graph
//!
//! Every operation on an [`Image`], [`ImageCollection`], [`Number`], [`List`]
//! or [`Lookup`] returns a new handle describing the work; nothing is computed
//! until the graph is handed to an [`Engine`](crate::engine::Engine).
//! Handles share sub-graphs through `Arc`, so a collection referenced by many
//! later stages is still a single node.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod collection;
mod image;
mod value;

pub use collection::{Comparison, Filter, ImageCollection, JoinSpec, Reducer};
pub use image::{BandSelector, Image, IntoImage};
pub use value::{List, Lookup, Number};

/// Shared pointer to a graph node
pub type Expr = Arc<Node>;

/// An immutable node of the expression graph
#[derive(Debug)]
pub struct Node {
    pub(crate) kind: NodeKind,
    /// Lambda variables referenced somewhere below this node and not bound by it
    pub(crate) free: BTreeSet<Arc<str>>,
}

/// Per-pixel binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Min,
    Max,
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Neq,
    And,
    Or,
    BitwiseAnd,
    RightShift,
}

/// Per-pixel unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFn {
    Abs,
    Not,
    Cos,
    Sin,
    ToFloat,
    ToInt16,
    ToUint8,
    ToUint16,
}

/// Binary operators on deferred numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
    Min,
    Max,
    Eq,
    Gt,
    Lt,
}

/// Unary operators on deferred numbers; the calendar ones read epoch milliseconds (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFn {
    Abs,
    Floor,
    Year,
    DayOfYear,
    StartOfYear,
}

/// How a collection is probed for a single image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Found when the collection holds at least one image
    First,
    /// Found only when the collection holds exactly one image
    Only,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Var(Arc<str>),
    Constant(f64),
    Text(String),

    // numbers
    NumberBinary { op: NumberOp, left: Expr, right: Expr },
    NumberUnary { op: NumberFn, input: Expr },
    Get { object: Expr, key: String, default: Option<f64> },
    Size(Expr),

    // lists
    ListOf(Vec<Expr>),
    AggregateArray { collection: Expr, key: String },
    ToList { collection: Expr, count: Option<usize> },
    ListSlice { list: Expr, start: Expr, end: Option<Expr> },
    ListMap { list: Expr, var: Arc<str>, body: Expr },
    ListFlatten(Expr),

    // images
    ImageConstant(Expr),
    ImageRandom(u64),
    Select { image: Expr, selector: BandSelector },
    Rename { image: Expr, names: Vec<String> },
    AddBands { image: Expr, other: Expr, overwrite: bool },
    PixelBinary { op: PixelOp, left: Expr, right: Expr },
    PixelUnary { op: PixelFn, input: Expr },
    UpdateMask { image: Expr, mask: Expr },
    Unmask { image: Expr, fill: Expr },
    MaskOf(Expr),
    ReplaceWhere { image: Expr, test: Expr, value: Expr },
    SumBands(Expr),
    SetProperty { object: Expr, key: String, value: Expr },
    CopyProperties { target: Expr, source: Expr },
    Reduce { collection: Expr, reducer: Reducer },
    QualityMosaic { collection: Expr, band: String },

    // lookups: evaluate to an image or to nothing
    Pick { collection: Expr, probe: Probe },
    ReduceIfAny { collection: Expr, reducer: Reducer },
    ListGet { list: Expr, index: usize },
    LookupMap { lookup: Expr, var: Arc<str>, body: Expr },
    OrElse { lookup: Expr, default: Expr },

    // collections
    Load(String),
    FromList(Expr),
    FilterBy { collection: Expr, filter: Filter },
    Map { collection: Expr, var: Arc<str>, body: Expr },
    Merge { first: Expr, second: Expr },
    Sort { collection: Expr, key: String, ascending: bool },
    SaveAllJoin { primary: Expr, secondary: Expr, spec: JoinSpec },
}

impl NodeKind {
    /// Visit the direct child nodes
    pub(crate) fn for_each_child<'a>(&'a self, mut f: impl FnMut(&'a Expr)) {
        use NodeKind::*;
        match self {
            Var(_) | Constant(_) | Text(_) | ImageRandom(_) | Load(_) => {}
            NumberBinary { left, right, .. } | PixelBinary { left, right, .. } => {
                f(left);
                f(right);
            }
            NumberUnary { input, .. } | PixelUnary { input, .. } => f(input),
            Get { object, .. } => f(object),
            Size(c) | ListFlatten(c) | ImageConstant(c) | MaskOf(c) | SumBands(c) | FromList(c) => f(c),
            AggregateArray { collection, .. }
            | ToList { collection, .. }
            | Reduce { collection, .. }
            | QualityMosaic { collection, .. }
            | Pick { collection, .. }
            | ReduceIfAny { collection, .. }
            | Sort { collection, .. } => f(collection),
            ListSlice { list, start, end } => {
                f(list);
                f(start);
                if let Some(end) = end {
                    f(end);
                }
            }
            ListMap { list, body, .. } => {
                f(list);
                f(body);
            }
            ListGet { list, .. } => f(list),
            ListOf(items) => items.iter().for_each(f),
            Select { image, .. } | Rename { image, .. } => f(image),
            AddBands { image, other, .. } => {
                f(image);
                f(other);
            }
            UpdateMask { image, mask } => {
                f(image);
                f(mask);
            }
            Unmask { image, fill } => {
                f(image);
                f(fill);
            }
            ReplaceWhere { image, test, value } => {
                f(image);
                f(test);
                f(value);
            }
            SetProperty { object, value, .. } => {
                f(object);
                f(value);
            }
            CopyProperties { target, source } => {
                f(target);
                f(source);
            }
            LookupMap { lookup, body, .. } => {
                f(lookup);
                f(body);
            }
            OrElse { lookup, default } => {
                f(lookup);
                f(default);
            }
            FilterBy { collection, filter } => {
                f(collection);
                filter.for_each_expr(&mut f);
            }
            Map { collection, body, .. } => {
                f(collection);
                f(body);
            }
            Merge { first, second } => {
                f(first);
                f(second);
            }
            SaveAllJoin { primary, secondary, .. } => {
                f(primary);
                f(secondary);
            }
        }
    }

    fn bound_var(&self) -> Option<&Arc<str>> {
        match self {
            NodeKind::ListMap { var, .. } | NodeKind::LookupMap { var, .. } | NodeKind::Map { var, .. } => Some(var),
            _ => None,
        }
    }
}

impl Node {
    pub(crate) fn new(kind: NodeKind) -> Expr {
        let mut free = BTreeSet::new();
        kind.for_each_child(|child| free.extend(child.free.iter().cloned()));
        if let Some(var) = kind.bound_var() {
            free.remove(var);
        }
        if let NodeKind::Var(name) = &kind {
            free.insert(name.clone());
        }
        Arc::new(Node { kind, free })
    }

    /// True when the node does not depend on any enclosing lambda argument
    pub fn is_closed(&self) -> bool {
        self.free.is_empty()
    }
}

/// Typed view over a graph node
pub trait Handle: Clone {
    fn from_expr(expr: Expr) -> Self;
    fn expr(&self) -> &Expr;
}

macro_rules! impl_handle {
    ($name:ident) => {
        impl Handle for $name {
            fn from_expr(expr: Expr) -> Self {
                $name(expr)
            }

            fn expr(&self) -> &Expr {
                &self.0
            }
        }
    };
}

impl_handle!(Image);
impl_handle!(ImageCollection);
impl_handle!(Number);
impl_handle!(Lookup);

/// Generate a unique lambda argument name
pub(crate) fn fresh_var() -> Arc<str> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let id = NEXT.fetch_add(1, Ordering::Relaxed);
    Arc::from(format!("_MAPPING_VAR_{}", id))
}

/// Capture a closure as a lambda: returns the bound variable and the body built from it
pub(crate) fn lambda<A: Handle, R: Handle>(f: impl FnOnce(A) -> R) -> (Arc<str>, Expr) {
    let var = fresh_var();
    let arg = A::from_expr(Node::new(NodeKind::Var(var.clone())));
    let body = f(arg);
    (var, body.expr().clone())
}
