use super::{lambda, Expr, Handle, Image, List, Lookup, Node, NodeKind, Number, Probe};
use crate::types::TIME_START;

/// Reducers collapsing a collection to one image along the image axis
#[derive(Debug, Clone, PartialEq)]
pub enum Reducer {
    Mean,
    StdDev,
    Max,
    Min,
    Sum,
    /// Number of valid observations; never masked
    Count,
    /// `{band}_mean` and `{band}_stdDev` for every input band
    MeanStdDev,
    /// Least squares `y = scale * x + offset` over the first two bands
    LinearFit,
    /// Ordinary least squares; one coefficient band per named independent
    LinearRegression { independents: Vec<String>, dependent: String },
}

/// Numeric comparison used by property filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Eq => left == right,
            Comparison::Neq => left != right,
            Comparison::Gt => left > right,
            Comparison::Gte => left >= right,
            Comparison::Lt => left < right,
            Comparison::Lte => left <= right,
        }
    }
}

/// Predicates over the images of a collection
#[derive(Debug, Clone)]
pub enum Filter {
    /// `system:time_start` in `[start, end)`
    DateRange { start: Expr, end: Expr },
    /// One-based day of year of `system:time_start` in `[start, end)`
    DayOfYear { start: u32, end: u32 },
    /// Numeric property comparison; images lacking the property fail
    Property { key: String, cmp: Comparison, value: f64 },
    And(Vec<Filter>),
}

impl Filter {
    pub fn date_range(start: impl Into<Number>, end: impl Into<Number>) -> Self {
        Filter::DateRange { start: start.into().0, end: end.into().0 }
    }

    pub fn day_of_year(start: u32, end: u32) -> Self {
        Filter::DayOfYear { start, end }
    }

    pub fn property(key: &str, cmp: Comparison, value: f64) -> Self {
        Filter::Property { key: key.to_string(), cmp, value }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub(crate) fn for_each_expr<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        match self {
            Filter::DateRange { start, end } => {
                f(start);
                f(end);
            }
            Filter::DayOfYear { .. } | Filter::Property { .. } => {}
            Filter::And(filters) => {
                for filter in filters {
                    filter.for_each_expr(f);
                }
            }
        }
    }
}

/// Parameters of a time-ordered self join keeping every match
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    /// Largest allowed `primary - secondary` time difference, in milliseconds
    pub max_difference_ms: f64,
    /// Property receiving the list of matches, most recent first
    pub matches_key: String,
}

/// Deferred, time-stamped set of images
#[derive(Debug, Clone)]
pub struct ImageCollection(pub(crate) Expr);

impl ImageCollection {
    fn wrap(kind: NodeKind) -> Self {
        ImageCollection(Node::new(kind))
    }

    /// Catalog collection by asset id
    pub fn load(id: &str) -> Self {
        Self::wrap(NodeKind::Load(id.to_string()))
    }

    pub fn from_images(images: Vec<Image>) -> Self {
        let items = images.into_iter().map(|img| img.0).collect::<Vec<_>>();
        Self::wrap(NodeKind::FromList(Node::new(NodeKind::ListOf(items))))
    }

    /// Collection holding the images of a list; missing entries are skipped
    pub fn from_list(list: &List<Image>) -> Self {
        Self::wrap(NodeKind::FromList(list.expr().clone()))
    }

    pub fn filter(&self, filter: Filter) -> Self {
        Self::wrap(NodeKind::FilterBy { collection: self.0.clone(), filter })
    }

    /// Images acquired in `[start, end)` (epoch milliseconds)
    pub fn filter_date(&self, start: impl Into<Number>, end: impl Into<Number>) -> Self {
        self.filter(Filter::date_range(start, end))
    }

    /// Images whose day of year lies in `[start, end)`
    pub fn filter_day_of_year(&self, start: u32, end: u32) -> Self {
        self.filter(Filter::day_of_year(start, end))
    }

    pub fn map(&self, f: impl FnOnce(Image) -> Image) -> Self {
        let (var, body) = lambda(f);
        Self::wrap(NodeKind::Map { collection: self.0.clone(), var, body })
    }

    pub fn select(&self, bands: &[&str]) -> Self {
        let bands = bands.iter().map(|b| b.to_string()).collect::<Vec<_>>();
        self.map(|img| img.select_by(super::BandSelector::Names(bands)))
    }

    pub fn merge(&self, other: &ImageCollection) -> Self {
        Self::wrap(NodeKind::Merge { first: self.0.clone(), second: other.0.clone() })
    }

    pub fn sort(&self, key: &str, ascending: bool) -> Self {
        Self::wrap(NodeKind::Sort { collection: self.0.clone(), key: key.to_string(), ascending })
    }

    /// Chronological order
    pub fn sort_by_time(&self) -> Self {
        self.sort(TIME_START, true)
    }

    pub fn reduce(&self, reducer: Reducer) -> Image {
        Image(Node::new(NodeKind::Reduce { collection: self.0.clone(), reducer }))
    }

    /// Reduction that is missing when the collection is empty
    pub fn reduce_lookup(&self, reducer: Reducer) -> Lookup {
        Lookup(Node::new(NodeKind::ReduceIfAny { collection: self.0.clone(), reducer }))
    }

    pub fn mean(&self) -> Image {
        self.reduce(Reducer::Mean)
    }

    pub fn max(&self) -> Image {
        self.reduce(Reducer::Max)
    }

    pub fn sum(&self) -> Image {
        self.reduce(Reducer::Sum)
    }

    pub fn count(&self) -> Image {
        self.reduce(Reducer::Count)
    }

    /// Per pixel, every band of the image with the largest `band` value
    pub fn quality_mosaic(&self, band: &str) -> Image {
        Image(Node::new(NodeKind::QualityMosaic { collection: self.0.clone(), band: band.to_string() }))
    }

    pub fn first(&self) -> Lookup {
        Lookup(Node::new(NodeKind::Pick { collection: self.0.clone(), probe: Probe::First }))
    }

    /// The sole image, missing unless the collection holds exactly one
    pub fn only(&self) -> Lookup {
        Lookup(Node::new(NodeKind::Pick { collection: self.0.clone(), probe: Probe::Only }))
    }

    pub fn size(&self) -> Number {
        Number(Node::new(NodeKind::Size(self.0.clone())))
    }

    pub fn aggregate_array(&self, key: &str) -> List<Number> {
        List::from_expr(Node::new(NodeKind::AggregateArray { collection: self.0.clone(), key: key.to_string() }))
    }

    pub fn to_list(&self, count: Option<usize>) -> List<Image> {
        List::from_expr(Node::new(NodeKind::ToList { collection: self.0.clone(), count }))
    }

    /// Attach to every image of `self` all earlier images of `secondary` within
    /// the join window, most recent first; images without matches get an empty list
    pub fn save_all_join(&self, secondary: &ImageCollection, spec: JoinSpec) -> Self {
        Self::wrap(NodeKind::SaveAllJoin { primary: self.0.clone(), secondary: secondary.0.clone(), spec })
    }
}
