//! In-process reference engine
//!
//! Evaluates graphs against in-memory collections on a fixed pixel grid. It
//! implements the same semantics the hosted service applies, so whole
//! pipelines can be run and checked without network access.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use log::{debug, info};
use serde_json::{json, Value};

use super::raster::{self, LocalBand, LocalImage};
use super::{Engine, ExportTask};
use crate::graph::{
    Comparison, Expr, Filter, Handle, Image, ImageCollection, JoinSpec, NodeKind, Number, NumberFn, NumberOp, Probe,
};
use crate::types::{RendviError, RendviResult, TIME_START};

/// A fully evaluated graph value
#[derive(Debug, Clone)]
pub enum Datum {
    Null,
    Number(f64),
    Text(String),
    Image(Arc<LocalImage>),
    Collection(Arc<Vec<Arc<LocalImage>>>),
    List(Arc<Vec<Datum>>),
}

impl Datum {
    fn kind(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Number(_) => "number",
            Datum::Text(_) => "text",
            Datum::Image(_) => "image",
            Datum::Collection(_) => "collection",
            Datum::List(_) => "list",
        }
    }

    fn mismatch(&self, expected: &str) -> RendviError {
        RendviError::Evaluation(format!("expected {}, got {}", expected, self.kind()))
    }

    pub fn as_number(&self) -> RendviResult<f64> {
        match self {
            Datum::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    pub fn as_image(&self) -> RendviResult<Arc<LocalImage>> {
        match self {
            Datum::Image(img) => Ok(img.clone()),
            other => Err(other.mismatch("image")),
        }
    }

    pub fn as_collection(&self) -> RendviResult<Arc<Vec<Arc<LocalImage>>>> {
        match self {
            Datum::Collection(images) => Ok(images.clone()),
            other => Err(other.mismatch("collection")),
        }
    }

    pub fn as_list(&self) -> RendviResult<Arc<Vec<Datum>>> {
        match self {
            Datum::List(items) => Ok(items.clone()),
            other => Err(other.mismatch("list")),
        }
    }

    /// JSON rendition, shaped like the hosted service's `getInfo` output
    pub fn to_json(&self) -> Value {
        match self {
            Datum::Null => Value::Null,
            Datum::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
            Datum::Text(t) => Value::String(t.clone()),
            Datum::Image(img) => image_json(img),
            Datum::Collection(images) => json!({
                "type": "ImageCollection",
                "features": images.iter().map(|img| image_json(img)).collect::<Vec<_>>(),
            }),
            Datum::List(items) => Value::Array(items.iter().map(Datum::to_json).collect()),
        }
    }
}

fn image_json(image: &LocalImage) -> Value {
    let properties: serde_json::Map<String, Value> =
        image.properties.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    json!({
        "type": "Image",
        "bands": image.bands.iter().map(|b| json!({ "id": b.name })).collect::<Vec<_>>(),
        "properties": properties,
    })
}

type Images = Arc<Vec<Arc<LocalImage>>>;
type Memo = HashMap<usize, (Expr, Datum)>;

/// Engine evaluating graphs in memory
///
/// Values of closed sub-graphs are memoized by node identity until
/// [`LocalEngine::clear_cache`]; the memo holds the node itself so addresses
/// are never reused.
pub struct LocalEngine {
    shape: (usize, usize),
    catalog: HashMap<String, Images>,
    cache: Mutex<Memo>,
    exports: Mutex<Vec<ExportTask>>,
}

impl LocalEngine {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            shape: (rows, cols),
            catalog: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
            exports: Mutex::new(Vec::new()),
        }
    }

    /// Register an in-memory collection under an asset id
    pub fn with_collection(mut self, id: &str, images: Vec<LocalImage>) -> Self {
        debug!("Registering local collection {} with {} images", id, images.len());
        self.catalog.insert(id.to_string(), Arc::new(images.into_iter().map(Arc::new).collect()));
        self
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn evaluate(&self, expr: &Expr) -> RendviResult<Datum> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| RendviError::Evaluation("evaluation cache poisoned".to_string()))?;
        let mut evaluator = Evaluator { engine: self, cache: &mut *cache };
        evaluator.eval(expr, None)
    }

    pub fn images(&self, collection: &ImageCollection) -> RendviResult<Vec<Arc<LocalImage>>> {
        Ok(self.evaluate(collection.expr())?.as_collection()?.to_vec())
    }

    pub fn image(&self, image: &Image) -> RendviResult<Arc<LocalImage>> {
        self.evaluate(image.expr())?.as_image()
    }

    pub fn number(&self, number: &Number) -> RendviResult<f64> {
        self.evaluate(number.expr())?.as_number()
    }

    /// Export jobs submitted so far, in submission order
    pub fn exports(&self) -> RendviResult<Vec<ExportTask>> {
        self.exports
            .lock()
            .map(|tasks| tasks.clone())
            .map_err(|_| RendviError::Evaluation("export log poisoned".to_string()))
    }

    /// Drop memoized values, returning how many were held
    pub fn clear_cache(&self) -> RendviResult<usize> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| RendviError::Evaluation("evaluation cache poisoned".to_string()))?;
        let held = cache.len();
        cache.clear();
        debug!("Cleared {} memoized values", held);
        Ok(held)
    }
}

impl Engine for LocalEngine {
    fn compute(&self, expr: &Expr) -> RendviResult<Value> {
        Ok(self.evaluate(expr)?.to_json())
    }

    fn start_export(&self, task: &ExportTask) -> RendviResult<String> {
        // materialize now so a broken graph fails at submission
        self.evaluate(task.image.expr())?.as_image()?;
        let mut tasks = self
            .exports
            .lock()
            .map_err(|_| RendviError::Evaluation("export log poisoned".to_string()))?;
        tasks.push(task.clone());
        let id = format!("local-task-{}", tasks.len());
        info!("Started local export {} -> {}", id, task.asset_id);
        Ok(id)
    }
}

/// Lambda argument binding; non-closed values are memoized per binding
struct Scope<'a> {
    var: &'a str,
    value: Datum,
    parent: Option<&'a Scope<'a>>,
    memo: RefCell<Memo>,
}

impl<'a> Scope<'a> {
    fn lookup(&self, name: &str) -> Option<&Datum> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if s.var == name {
                return Some(&s.value);
            }
            scope = s.parent;
        }
        None
    }
}

/// Filter with its deferred bounds resolved
enum Test {
    Range(f64, f64),
    DayOfYear(u32, u32),
    Property(String, Comparison, f64),
    All(Vec<Test>),
}

impl Test {
    fn matches(&self, image: &LocalImage) -> bool {
        match self {
            Test::Range(start, end) => image.number(TIME_START).map_or(false, |t| t >= *start && t < *end),
            Test::DayOfYear(start, end) => image
                .number(TIME_START)
                .and_then(|t| datetime(t).ok())
                .map_or(false, |dt| dt.ordinal() >= *start && dt.ordinal() < *end),
            Test::Property(key, cmp, value) => image.number(key).map_or(false, |v| cmp.holds(v, *value)),
            Test::All(tests) => tests.iter().all(|t| t.matches(image)),
        }
    }
}

fn datetime(millis: f64) -> RendviResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis.floor() as i64)
        .single()
        .ok_or_else(|| RendviError::Evaluation(format!("timestamp out of range: {}", millis)))
}

fn number_op(op: NumberOp, a: f64, b: f64) -> f64 {
    let truth = |v: bool| if v { 1.0 } else { 0.0 };
    match op {
        NumberOp::Add => a + b,
        NumberOp::Subtract => a - b,
        NumberOp::Multiply => a * b,
        NumberOp::Divide => a / b,
        NumberOp::Mod => a % b,
        NumberOp::Min => a.min(b),
        NumberOp::Max => a.max(b),
        NumberOp::Eq => truth(a == b),
        NumberOp::Gt => truth(a > b),
        NumberOp::Lt => truth(a < b),
    }
}

fn number_fn(op: NumberFn, a: f64) -> RendviResult<f64> {
    Ok(match op {
        NumberFn::Abs => a.abs(),
        NumberFn::Floor => a.floor(),
        NumberFn::Year => datetime(a)?.year() as f64,
        NumberFn::DayOfYear => datetime(a)?.ordinal() as f64,
        NumberFn::StartOfYear => {
            let year = datetime(a)?.year();
            Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
                .single()
                .map(|dt| dt.timestamp_millis() as f64)
                .ok_or_else(|| RendviError::Evaluation(format!("no January 1st in year {}", year)))?
        }
    })
}

/// Resolve a possibly negative list position against a length
fn position(index: f64, len: usize) -> usize {
    let index = index.floor();
    let resolved = if index < 0.0 { len as f64 + index } else { index };
    resolved.clamp(0.0, len as f64) as usize
}

fn misrouted() -> RendviError {
    RendviError::Evaluation("node dispatched to the wrong evaluator".to_string())
}

struct Evaluator<'e> {
    engine: &'e LocalEngine,
    cache: &'e mut Memo,
}

impl<'e> Evaluator<'e> {
    fn eval(&mut self, expr: &Expr, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        let key = Arc::as_ptr(expr) as usize;
        if expr.is_closed() {
            if let Some((_, hit)) = self.cache.get(&key) {
                return Ok(hit.clone());
            }
            let value = self.eval_node(expr, None)?;
            self.cache.insert(key, (expr.clone(), value.clone()));
            return Ok(value);
        }

        let binding = scope.ok_or_else(|| RendviError::Evaluation("free variable outside of a lambda".to_string()))?;
        if let Some((_, hit)) = binding.memo.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let value = self.eval_node(expr, scope)?;
        binding.memo.borrow_mut().insert(key, (expr.clone(), value.clone()));
        Ok(value)
    }

    fn apply(&mut self, var: &str, value: Datum, body: &Expr, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        let child = Scope { var, value, parent: scope, memo: RefCell::new(HashMap::new()) };
        self.eval(body, Some(&child))
    }

    fn number(&mut self, expr: &Expr, scope: Option<&Scope<'_>>) -> RendviResult<f64> {
        self.eval(expr, scope)?.as_number()
    }

    fn image(&mut self, expr: &Expr, scope: Option<&Scope<'_>>) -> RendviResult<Arc<LocalImage>> {
        self.eval(expr, scope)?.as_image()
    }

    fn collection(&mut self, expr: &Expr, scope: Option<&Scope<'_>>) -> RendviResult<Images> {
        self.eval(expr, scope)?.as_collection()
    }

    fn eval_node(&mut self, expr: &Expr, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        use NodeKind::*;
        match &expr.kind {
            Var(name) => scope
                .and_then(|s| s.lookup(name))
                .cloned()
                .ok_or_else(|| RendviError::Evaluation(format!("unbound variable {}", name))),
            Constant(value) => Ok(Datum::Number(*value)),
            Text(text) => Ok(Datum::Text(text.clone())),
            NumberBinary { .. } | NumberUnary { .. } | Get { .. } | Size(_) => self.eval_value(&expr.kind, scope),
            ListOf(_) | AggregateArray { .. } | ToList { .. } | ListSlice { .. } | ListMap { .. } | ListFlatten(_)
            | ListGet { .. } => self.eval_list(&expr.kind, scope),
            Pick { .. } | ReduceIfAny { .. } | LookupMap { .. } | OrElse { .. } => self.eval_lookup(&expr.kind, scope),
            Load(_) | FromList(_) | FilterBy { .. } | Map { .. } | Merge { .. } | Sort { .. } | SaveAllJoin { .. } => {
                self.eval_collection(&expr.kind, scope)
            }
            _ => self.eval_image(&expr.kind, scope).map(|img| Datum::Image(Arc::new(img))),
        }
    }

    fn eval_value(&mut self, kind: &NodeKind, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        match kind {
            NodeKind::NumberBinary { op, left, right } => {
                let a = self.number(left, scope)?;
                let b = self.number(right, scope)?;
                Ok(Datum::Number(number_op(*op, a, b)))
            }
            NodeKind::NumberUnary { op, input } => {
                let a = self.number(input, scope)?;
                Ok(Datum::Number(number_fn(*op, a)?))
            }
            NodeKind::Get { object, key, default } => {
                let image = self.image(object, scope)?;
                Ok(match image.properties.get(key) {
                    Some(value) => value.clone(),
                    None => default.map(Datum::Number).unwrap_or(Datum::Null),
                })
            }
            NodeKind::Size(object) => match self.eval(object, scope)? {
                Datum::Collection(images) => Ok(Datum::Number(images.len() as f64)),
                Datum::List(items) => Ok(Datum::Number(items.len() as f64)),
                other => Err(other.mismatch("collection or list")),
            },
            _ => Err(misrouted()),
        }
    }

    fn eval_list(&mut self, kind: &NodeKind, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        let items: Vec<Datum> = match kind {
            NodeKind::ListOf(items) => items.iter().map(|e| self.eval(e, scope)).collect::<RendviResult<_>>()?,
            NodeKind::AggregateArray { collection, key } => self
                .collection(collection, scope)?
                .iter()
                .filter_map(|img| img.number(key))
                .map(Datum::Number)
                .collect(),
            NodeKind::ToList { collection, count } => {
                let images = self.collection(collection, scope)?;
                let take = count.unwrap_or(images.len());
                images.iter().take(take).cloned().map(Datum::Image).collect()
            }
            NodeKind::ListSlice { list, start, end } => {
                let items = self.eval(list, scope)?.as_list()?;
                let len = items.len();
                let from = position(self.number(start, scope)?, len);
                let to = match end {
                    Some(end) => position(self.number(end, scope)?, len),
                    None => len,
                };
                if to <= from {
                    Vec::new()
                } else {
                    items[from..to].to_vec()
                }
            }
            NodeKind::ListMap { list, var, body } => {
                let items = self.eval(list, scope)?.as_list()?;
                items
                    .iter()
                    .map(|item| self.apply(var, item.clone(), body, scope))
                    .collect::<RendviResult<_>>()?
            }
            NodeKind::ListFlatten(list) => {
                let mut flat = Vec::new();
                for item in self.eval(list, scope)?.as_list()?.iter() {
                    match item {
                        Datum::List(inner) => flat.extend(inner.iter().cloned()),
                        other => flat.push(other.clone()),
                    }
                }
                flat
            }
            NodeKind::ListGet { list, index } => {
                let items = self.eval(list, scope)?.as_list()?;
                return Ok(items.get(*index).cloned().unwrap_or(Datum::Null));
            }
            _ => return Err(misrouted()),
        };
        Ok(Datum::List(Arc::new(items)))
    }

    fn eval_image(&mut self, kind: &NodeKind, scope: Option<&Scope<'_>>) -> RendviResult<LocalImage> {
        match kind {
            NodeKind::ImageConstant(value) => {
                let value = self.number(value, scope)?;
                Ok(LocalImage::new().with_band(LocalBand::constant("constant", value, self.engine.shape)))
            }
            NodeKind::ImageRandom(seed) => Ok(raster::random(*seed, self.engine.shape)),
            NodeKind::Select { image, selector } => raster::select(&*self.image(image, scope)?, selector),
            NodeKind::Rename { image, names } => raster::rename(&*self.image(image, scope)?, names),
            NodeKind::AddBands { image, other, overwrite } => {
                let image = self.image(image, scope)?;
                let other = self.image(other, scope)?;
                Ok(raster::add_bands(&image, &other, *overwrite))
            }
            NodeKind::PixelBinary { op, left, right } => {
                let left = self.image(left, scope)?;
                let right = self.image(right, scope)?;
                raster::binary(*op, &left, &right)
            }
            NodeKind::PixelUnary { op, input } => Ok(raster::unary(*op, &*self.image(input, scope)?)),
            NodeKind::UpdateMask { image, mask } => {
                let image = self.image(image, scope)?;
                let mask = self.image(mask, scope)?;
                raster::update_mask(&image, &mask)
            }
            NodeKind::Unmask { image, fill } => {
                let image = self.image(image, scope)?;
                let fill = self.image(fill, scope)?;
                raster::unmask(&image, &fill)
            }
            NodeKind::MaskOf(image) => Ok(raster::mask_of(&*self.image(image, scope)?)),
            NodeKind::ReplaceWhere { image, test, value } => {
                let image = self.image(image, scope)?;
                let test = self.image(test, scope)?;
                let value = self.image(value, scope)?;
                raster::replace_where(&image, &test, &value)
            }
            NodeKind::SumBands(image) => Ok(raster::sum_bands(&*self.image(image, scope)?)),
            NodeKind::SetProperty { object, key, value } => {
                let mut image = (*self.image(object, scope)?).clone();
                match self.eval(value, scope)? {
                    Datum::Null => image.properties.remove(key),
                    value => image.properties.insert(key.clone(), value),
                };
                Ok(image)
            }
            NodeKind::CopyProperties { target, source } => {
                let mut image = (*self.image(target, scope)?).clone();
                let source = self.image(source, scope)?;
                image.properties.extend(source.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(image)
            }
            NodeKind::Reduce { collection, reducer } => raster::reduce(&self.collection(collection, scope)?, reducer),
            NodeKind::QualityMosaic { collection, band } => {
                raster::quality_mosaic(&self.collection(collection, scope)?, band)
            }
            _ => Err(misrouted()),
        }
    }

    fn eval_lookup(&mut self, kind: &NodeKind, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        match kind {
            NodeKind::Pick { collection, probe } => {
                let images = self.collection(collection, scope)?;
                let found = match probe {
                    Probe::First => images.first(),
                    Probe::Only if images.len() == 1 => images.first(),
                    Probe::Only => None,
                };
                Ok(found.cloned().map(Datum::Image).unwrap_or(Datum::Null))
            }
            NodeKind::ReduceIfAny { collection, reducer } => {
                let images = self.collection(collection, scope)?;
                if images.is_empty() {
                    return Ok(Datum::Null);
                }
                Ok(Datum::Image(Arc::new(raster::reduce(&images, reducer)?)))
            }
            NodeKind::LookupMap { lookup, var, body } => match self.eval(lookup, scope)? {
                Datum::Null => Ok(Datum::Null),
                found => self.apply(var, found, body, scope),
            },
            NodeKind::OrElse { lookup, default } => match self.eval(lookup, scope)? {
                Datum::Image(image) if !image.bands.is_empty() => Ok(Datum::Image(image)),
                _ => self.eval(default, scope),
            },
            _ => Err(misrouted()),
        }
    }

    fn resolve(&mut self, filter: &Filter, scope: Option<&Scope<'_>>) -> RendviResult<Test> {
        Ok(match filter {
            Filter::DateRange { start, end } => Test::Range(self.number(start, scope)?, self.number(end, scope)?),
            Filter::DayOfYear { start, end } => Test::DayOfYear(*start, *end),
            Filter::Property { key, cmp, value } => Test::Property(key.clone(), *cmp, *value),
            Filter::And(filters) => {
                Test::All(filters.iter().map(|f| self.resolve(f, scope)).collect::<RendviResult<_>>()?)
            }
        })
    }

    fn eval_collection(&mut self, kind: &NodeKind, scope: Option<&Scope<'_>>) -> RendviResult<Datum> {
        let images: Vec<Arc<LocalImage>> = match kind {
            NodeKind::Load(id) => {
                return self
                    .engine
                    .catalog
                    .get(id)
                    .cloned()
                    .map(Datum::Collection)
                    .ok_or_else(|| RendviError::Evaluation(format!("unknown collection '{}'", id)))
            }
            NodeKind::FromList(list) => {
                let mut images = Vec::new();
                for item in self.eval(list, scope)?.as_list()?.iter() {
                    match item {
                        Datum::Image(img) => images.push(img.clone()),
                        Datum::Null => {}
                        other => return Err(other.mismatch("image")),
                    }
                }
                images
            }
            NodeKind::FilterBy { collection, filter } => {
                let images = self.collection(collection, scope)?;
                let test = self.resolve(filter, scope)?;
                images.iter().filter(|img| test.matches(img)).cloned().collect()
            }
            NodeKind::Map { collection, var, body } => {
                let images = self.collection(collection, scope)?;
                images
                    .iter()
                    .map(|img| self.apply(var, Datum::Image(img.clone()), body, scope)?.as_image())
                    .collect::<RendviResult<_>>()?
            }
            NodeKind::Merge { first, second } => {
                let mut images = self.collection(first, scope)?.to_vec();
                images.extend(self.collection(second, scope)?.iter().cloned());
                images
            }
            NodeKind::Sort { collection, key, ascending } => {
                let mut images = self.collection(collection, scope)?.to_vec();
                images.sort_by(|a, b| match (a.number(key), b.number(key)) {
                    (Some(x), Some(y)) => {
                        let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                        if *ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    }
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                });
                images
            }
            NodeKind::SaveAllJoin { primary, secondary, spec } => {
                let primary = self.collection(primary, scope)?;
                let secondary = self.collection(secondary, scope)?;
                primary.iter().map(|p| Arc::new(join_matches(p, &secondary, spec))).collect()
            }
            _ => return Err(misrouted()),
        };
        Ok(Datum::Collection(Arc::new(images)))
    }
}

/// Attach the earlier secondary images within the join window, most recent first
fn join_matches(primary: &LocalImage, secondary: &[Arc<LocalImage>], spec: &JoinSpec) -> LocalImage {
    let mut matches: Vec<Arc<LocalImage>> = match primary.time_start() {
        Some(tp) => secondary
            .iter()
            .filter(|s| s.time_start().map_or(false, |ts| ts < tp && (tp - ts) as f64 <= spec.max_difference_ms))
            .cloned()
            .collect(),
        None => Vec::new(),
    };
    matches.sort_by_key(|s| std::cmp::Reverse(s.time_start()));
    let mut out = primary.clone();
    out.properties.insert(
        spec.matches_key.clone(),
        Datum::List(Arc::new(matches.into_iter().map(Datum::Image).collect())),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DAY_MS;
    use ndarray::array;

    fn daily(values: &[f64]) -> Vec<LocalImage> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                LocalImage::new()
                    .with_band(LocalBand::constant("v", *v, (1, 1)))
                    .with_time_start((i as f64 * DAY_MS) as i64)
            })
            .collect()
    }

    #[test]
    fn test_clear_cache_keeps_results() {
        let engine = LocalEngine::new(1, 1).with_collection("c", daily(&[1.0, 2.0, 3.0]));
        let size = ImageCollection::load("c").filter_date(0.0, 2.0 * DAY_MS).size();
        assert_eq!(engine.number(&size).unwrap(), 2.0);
        assert!(engine.clear_cache().unwrap() > 0);
        assert_eq!(engine.clear_cache().unwrap(), 0);
        assert_eq!(engine.number(&size).unwrap(), 2.0);
    }

    #[test]
    fn test_poisoned_export_log_is_an_error() {
        let engine = LocalEngine::new(1, 1);
        assert!(engine.exports().unwrap().is_empty());
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = engine.exports.lock().unwrap();
            panic!("export log writer failed");
        }));
        assert!(poisoned.is_err());
        assert!(matches!(engine.exports(), Err(RendviError::Evaluation(_))));
    }

    #[test]
    fn test_filter_date_is_half_open() {
        let engine = LocalEngine::new(1, 1).with_collection("c", daily(&[1.0, 2.0, 3.0, 4.0]));
        let coll = ImageCollection::load("c").filter_date(DAY_MS, 3.0 * DAY_MS);
        assert_eq!(engine.number(&coll.size()).unwrap(), 2.0);
    }

    #[test]
    fn test_map_body_sees_outer_collection() {
        let engine = LocalEngine::new(1, 1).with_collection("c", daily(&[1.0, 2.0, 3.0]));
        let coll = ImageCollection::load("c");
        let summed = coll.map(|img| {
            let t = img.time_start();
            let prior = coll.filter_date(t.add_days(-5.0), t.clone());
            img.add(prior.sum())
        });
        let images = engine.images(&summed).unwrap();
        assert_eq!(images.len(), 3);
        // first image has no priors: sum of an empty collection has no bands
        assert_eq!(images[1].value("v", 0, 0), Some(3.0));
        assert_eq!(images[2].value("v", 0, 0), Some(6.0));
    }

    #[test]
    fn test_or_else_falls_back_on_missing_and_empty() {
        let engine = LocalEngine::new(1, 1).with_collection("c", daily(&[5.0]));
        let coll = ImageCollection::load("c");
        let found = coll.first().or_else(Image::constant(9.0));
        assert_eq!(engine.image(&found).unwrap().value("v", 0, 0), Some(5.0));
        let missing = coll.filter_date(10.0 * DAY_MS, 11.0 * DAY_MS).first().or_else(Image::constant(9.0));
        assert_eq!(engine.image(&missing).unwrap().value("constant", 0, 0), Some(9.0));
        let only = coll.merge(&coll).only().or_else(Image::constant(1.0));
        assert_eq!(engine.image(&only).unwrap().value("constant", 0, 0), Some(1.0));
    }

    #[test]
    fn test_save_all_join_orders_matches() {
        let engine = LocalEngine::new(1, 1).with_collection("c", daily(&[1.0, 2.0, 3.0, 4.0]));
        let coll = ImageCollection::load("c");
        let spec = JoinSpec { max_difference_ms: 2.0 * DAY_MS, matches_key: "images".to_string() };
        let joined = engine.images(&coll.save_all_join(&coll, spec)).unwrap();
        let matches = |i: usize| match joined[i].properties.get("images") {
            Some(Datum::List(items)) => items.iter().map(|d| d.as_image().unwrap().value("v", 0, 0).unwrap()).collect(),
            _ => Vec::new(),
        };
        assert!(matches(0).is_empty());
        assert_eq!(matches(3), vec![3.0, 2.0]);
    }

    #[test]
    fn test_list_slice_with_negative_bounds() {
        let engine = LocalEngine::new(1, 1).with_collection("c", daily(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        let list = ImageCollection::load("c").to_list(None).slice(1.0, Some(Number::from(-1.0)));
        let size = engine.number(&ImageCollection::from_list(&list).size()).unwrap();
        assert_eq!(size, 3.0);
    }

    #[test]
    fn test_compute_renders_images_as_json() {
        let band = LocalBand::new("v", array![[1.0]]);
        let engine = LocalEngine::new(1, 1).with_collection("c", vec![LocalImage::new().with_band(band)]);
        let value = engine.compute(ImageCollection::load("c").first().or_else(Image::constant(0.0)).expr()).unwrap();
        assert_eq!(value["type"], "Image");
        assert_eq!(value["bands"][0]["id"], "v");
    }
}
