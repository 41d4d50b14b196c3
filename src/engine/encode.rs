//! Serialization of graphs to the hosted service's expression format
//!
//! An expression is a flat table of value nodes plus the id of the result.
//! Every graph node is written once and referenced by id wherever it is shared;
//! lambda arguments become `argumentReference`s inside function definitions.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::graph::{BandSelector, Comparison, Expr, Filter, NodeKind, NumberFn, NumberOp, PixelFn, PixelOp, Probe, Reducer};
use crate::types::{BoundingBox, TIME_START};

/// Encode a graph as `{"result": id, "values": {...}}`
pub fn encode(expr: &Expr) -> Value {
    let mut encoder = Encoder::default();
    let result = encoder.register(expr);
    let result = match result {
        Value::Object(ref obj) if obj.contains_key("valueReference") => obj["valueReference"].clone(),
        inline => Value::String(encoder.push(inline)),
    };
    json!({ "result": result, "values": Value::Object(encoder.values) })
}

/// Encode an image clipped to `region` and resampled to `scale` metres
pub fn encode_clipped(expr: &Expr, region: &BoundingBox, scale: f64) -> Value {
    let mut encoded = encode(expr);
    let input = json!({ "valueReference": encoded["result"].clone() });
    let geometry = call(
        "GeometryConstructors.Polygon",
        vec![("coordinates", json!({ "constantValue": [region.ring()] })), ("geodesic", constant(false))],
    );
    let clipped = call(
        "Image.clipToBoundsAndScale",
        vec![("input", input), ("geometry", geometry), ("scale", constant(scale))],
    );
    if let Some(values) = encoded["values"].as_object_mut() {
        let id = values.len().to_string();
        values.insert(id.clone(), clipped);
        encoded["result"] = Value::String(id);
    }
    encoded
}

#[derive(Default)]
struct Encoder {
    values: Map<String, Value>,
    ids: HashMap<usize, (Expr, String)>,
}

fn constant(value: impl Into<Value>) -> Value {
    json!({ "constantValue": value.into() })
}

fn null() -> Value {
    json!({ "constantValue": Value::Null })
}

fn call(name: &str, args: Vec<(&str, Value)>) -> Value {
    let arguments: Map<String, Value> = args.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    json!({ "functionInvocationValue": { "functionName": name, "arguments": arguments } })
}

fn array(items: Vec<Value>) -> Value {
    json!({ "arrayValue": { "values": items } })
}

/// Function definition whose body is the id of a value in the table
fn function(var: &str, body: &str) -> Value {
    json!({ "functionDefinitionValue": { "argumentNames": [var], "body": body } })
}

fn if_else(condition: Value, then: Value, otherwise: Value) -> Value {
    call("Algorithms.If", vec![("condition", condition), ("trueCase", then), ("falseCase", otherwise)])
}

fn names(bands: &[String]) -> Value {
    constant(bands.to_vec())
}

fn pixel_op_name(op: PixelOp) -> &'static str {
    match op {
        PixelOp::Add => "Image.add",
        PixelOp::Subtract => "Image.subtract",
        PixelOp::Multiply => "Image.multiply",
        PixelOp::Divide => "Image.divide",
        PixelOp::Min => "Image.min",
        PixelOp::Max => "Image.max",
        PixelOp::Gt => "Image.gt",
        PixelOp::Gte => "Image.gte",
        PixelOp::Lt => "Image.lt",
        PixelOp::Lte => "Image.lte",
        PixelOp::Eq => "Image.eq",
        PixelOp::Neq => "Image.neq",
        PixelOp::And => "Image.and",
        PixelOp::Or => "Image.or",
        PixelOp::BitwiseAnd => "Image.bitwiseAnd",
        PixelOp::RightShift => "Image.rightShift",
    }
}

fn pixel_fn_name(op: PixelFn) -> &'static str {
    match op {
        PixelFn::Abs => "Image.abs",
        PixelFn::Not => "Image.not",
        PixelFn::Cos => "Image.cos",
        PixelFn::Sin => "Image.sin",
        PixelFn::ToFloat => "Image.toFloat",
        PixelFn::ToInt16 => "Image.toInt16",
        PixelFn::ToUint8 => "Image.toUint8",
        PixelFn::ToUint16 => "Image.toUint16",
    }
}

fn number_op_name(op: NumberOp) -> &'static str {
    match op {
        NumberOp::Add => "Number.add",
        NumberOp::Subtract => "Number.subtract",
        NumberOp::Multiply => "Number.multiply",
        NumberOp::Divide => "Number.divide",
        NumberOp::Mod => "Number.mod",
        NumberOp::Min => "Number.min",
        NumberOp::Max => "Number.max",
        NumberOp::Eq => "Number.eq",
        NumberOp::Gt => "Number.gt",
        NumberOp::Lt => "Number.lt",
    }
}

fn comparison_name(cmp: Comparison) -> &'static str {
    match cmp {
        Comparison::Eq => "Filter.equals",
        Comparison::Neq => "Filter.notEquals",
        Comparison::Gt => "Filter.greaterThan",
        Comparison::Gte => "Filter.greaterThanOrEquals",
        Comparison::Lt => "Filter.lessThan",
        Comparison::Lte => "Filter.lessThanOrEquals",
    }
}

fn simple_reducer(reducer: &Reducer) -> Value {
    match reducer {
        Reducer::Mean => call("Reducer.mean", vec![]),
        Reducer::StdDev => call("Reducer.stdDev", vec![]),
        Reducer::Max => call("Reducer.max", vec![]),
        Reducer::Min => call("Reducer.min", vec![]),
        Reducer::Sum => call("Reducer.sum", vec![]),
        Reducer::Count => call("Reducer.count", vec![]),
        Reducer::MeanStdDev => call(
            "Reducer.combine",
            vec![
                ("reducer1", call("Reducer.mean", vec![])),
                ("reducer2", call("Reducer.stdDev", vec![])),
                ("sharedInputs", constant(true)),
            ],
        ),
        Reducer::LinearFit => call("Reducer.linearFit", vec![]),
        Reducer::LinearRegression { independents, .. } => call(
            "Reducer.linearRegression",
            vec![("numX", constant(independents.len())), ("numY", constant(1))],
        ),
    }
}

/// Nodes that evaluate to a list rather than a collection
fn is_list(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::ListOf(_)
            | NodeKind::AggregateArray { .. }
            | NodeKind::ToList { .. }
            | NodeKind::ListSlice { .. }
            | NodeKind::ListMap { .. }
            | NodeKind::ListFlatten(_)
            | NodeKind::Get { .. }
    )
}

impl Encoder {
    fn push(&mut self, value: Value) -> String {
        let id = self.values.len().to_string();
        self.values.insert(id.clone(), value);
        id
    }

    /// Reference to the value of `expr`, encoding it on first sight
    fn register(&mut self, expr: &Expr) -> Value {
        if let NodeKind::Var(name) = &expr.kind {
            return json!({ "argumentReference": &**name });
        }
        let key = Arc::as_ptr(expr) as usize;
        if let Some((_, id)) = self.ids.get(&key) {
            return json!({ "valueReference": id });
        }
        let value = self.node(expr);
        let id = self.push(value);
        self.ids.insert(key, (expr.clone(), id.clone()));
        json!({ "valueReference": id })
    }

    fn lambda(&mut self, var: &Arc<str>, body: &Expr) -> Value {
        let body = self.register(body);
        let id = self.value_id(body);
        function(var, &id)
    }

    /// Id of an encoded value, adding inline values to the table
    fn value_id(&mut self, value: Value) -> String {
        match value.get("valueReference").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => self.push(value),
        }
    }

    fn date(&mut self, millis: Value) -> Value {
        call("Date", vec![("value", millis)])
    }

    fn node(&mut self, expr: &Expr) -> Value {
        use NodeKind::*;
        match &expr.kind {
            Var(name) => json!({ "argumentReference": &**name }),
            Constant(value) => constant(*value),
            Text(text) => constant(text.clone()),
            NumberBinary { op, left, right } => {
                let (left, right) = (self.register(left), self.register(right));
                call(number_op_name(*op), vec![("left", left), ("right", right)])
            }
            NumberUnary { op, input } => {
                let input = self.register(input);
                self.number_fn(*op, input)
            }
            Get { object, key, default } => {
                let object = self.register(object);
                let get = call("Element.get", vec![("object", object.clone()), ("property", constant(key.clone()))]);
                match default {
                    None => get,
                    Some(default) => {
                        let keys = call("Element.propertyNames", vec![("element", object)]);
                        let has = call("List.contains", vec![("list", keys), ("element", constant(key.clone()))]);
                        if_else(has, get, constant(*default))
                    }
                }
            }
            Size(object) => {
                let list = is_list(&object.kind);
                let object = self.register(object);
                if list {
                    call("List.length", vec![("list", object)])
                } else {
                    call("Collection.size", vec![("collection", object)])
                }
            }
            ListOf(items) => {
                let items = items.iter().map(|item| self.register(item)).collect();
                array(items)
            }
            AggregateArray { collection, key } => {
                let collection = self.register(collection);
                call("AggregateFeatureCollection.array", vec![("collection", collection), ("property", constant(key.clone()))])
            }
            ToList { collection, count } => {
                let collection = self.register(collection);
                let count = match count {
                    Some(n) => constant(*n),
                    None => call("Collection.size", vec![("collection", collection.clone())]),
                };
                call("Collection.toList", vec![("collection", collection), ("count", count)])
            }
            ListSlice { list, start, end } => {
                let mut args = vec![("list", self.register(list)), ("start", self.register(start))];
                if let Some(end) = end {
                    args.push(("end", self.register(end)));
                }
                call("List.slice", args)
            }
            ListMap { list, var, body } => {
                let list = self.register(list);
                let base = self.lambda(var, body);
                call("List.map", vec![("list", list), ("baseAlgorithm", base)])
            }
            ListFlatten(list) => {
                let list = self.register(list);
                call("List.flatten", vec![("list", list)])
            }
            ListGet { list, index } => {
                let list = self.register(list);
                let length = call("List.length", vec![("list", list.clone())]);
                let in_range = call("Number.lt", vec![("left", constant(*index)), ("right", length)]);
                let get = call("List.get", vec![("list", list), ("index", constant(*index))]);
                if_else(in_range, get, null())
            }
            ImageConstant(value) => {
                let value = self.register(value);
                call("Image.constant", vec![("value", value)])
            }
            ImageRandom(seed) => call("Image.random", vec![("seed", constant(*seed))]),
            Select { image, selector } => {
                let input = self.register(image);
                let selectors = match selector {
                    BandSelector::Names(bands) => names(bands),
                    BandSelector::Pattern(pattern) => constant(vec![pattern.clone()]),
                    BandSelector::Index(index) => constant(vec![*index]),
                };
                call("Image.select", vec![("input", input), ("bandSelectors", selectors)])
            }
            Rename { image, names: bands } => {
                let input = self.register(image);
                call("Image.rename", vec![("input", input), ("names", names(bands))])
            }
            AddBands { image, other, overwrite } => {
                let (dst, src) = (self.register(image), self.register(other));
                call("Image.addBands", vec![("dstImg", dst), ("srcImg", src), ("overwrite", constant(*overwrite))])
            }
            PixelBinary { op, left, right } => {
                let (left, right) = (self.register(left), self.register(right));
                call(pixel_op_name(*op), vec![("image1", left), ("image2", right)])
            }
            PixelUnary { op, input } => {
                let input = self.register(input);
                call(pixel_fn_name(*op), vec![("value", input)])
            }
            UpdateMask { image, mask } => {
                let (image, mask) = (self.register(image), self.register(mask));
                call("Image.updateMask", vec![("image", image), ("mask", mask)])
            }
            Unmask { image, fill } => {
                let (input, value) = (self.register(image), self.register(fill));
                call("Image.unmask", vec![("input", input), ("value", value)])
            }
            MaskOf(image) => {
                let image = self.register(image);
                call("Image.mask", vec![("image", image)])
            }
            ReplaceWhere { image, test, value } => {
                let (input, test, value) = (self.register(image), self.register(test), self.register(value));
                call("Image.where", vec![("input", input), ("test", test), ("value", value)])
            }
            SumBands(image) => {
                let image = self.register(image);
                call("Image.reduce", vec![("image", image), ("reducer", call("Reducer.sum", vec![]))])
            }
            SetProperty { object, key, value } => {
                let (object, value) = (self.register(object), self.register(value));
                call("Element.set", vec![("object", object), ("key", constant(key.clone())), ("value", value)])
            }
            CopyProperties { target, source } => {
                let (target, source) = (self.register(target), self.register(source));
                call("Element.copyProperties", vec![("destination", target), ("source", source)])
            }
            Reduce { collection, reducer } => {
                let collection = self.register(collection);
                self.reduce(collection, reducer)
            }
            QualityMosaic { collection, band } => {
                let collection = self.register(collection);
                call("ImageCollection.qualityMosaic", vec![("collection", collection), ("qualityBand", constant(band.clone()))])
            }
            Pick { collection, probe } => {
                let collection = self.register(collection);
                let first = call("Collection.first", vec![("collection", collection.clone())]);
                match probe {
                    Probe::First => first,
                    Probe::Only => {
                        let size = call("Collection.size", vec![("collection", collection)]);
                        let single = call("Number.eq", vec![("left", size), ("right", constant(1))]);
                        if_else(single, first, null())
                    }
                }
            }
            ReduceIfAny { collection, reducer } => {
                let collection = self.register(collection);
                let size = call("Collection.size", vec![("collection", collection.clone())]);
                let any = call("Number.gt", vec![("left", size), ("right", constant(0))]);
                let reduced = self.reduce(collection, reducer);
                if_else(any, reduced, null())
            }
            LookupMap { lookup, var, body } => {
                let found = self.register(lookup);
                let base = self.lambda(var, body);
                let mapped = call("List.map", vec![("list", array(vec![found.clone()])), ("baseAlgorithm", base)]);
                let first = call("List.get", vec![("list", mapped), ("index", constant(0))]);
                if_else(found, first, null())
            }
            OrElse { lookup, default } => {
                let (found, default) = (self.register(lookup), self.register(default));
                if_else(found.clone(), found, default)
            }
            Load(id) => call("ImageCollection.load", vec![("id", constant(id.clone()))]),
            FromList(list) => {
                let list = self.register(list);
                let present = call("List.removeAll", vec![("list", list), ("other", array(vec![null()]))]);
                call("ImageCollection.fromImages", vec![("images", present)])
            }
            FilterBy { collection, filter } => {
                let collection = self.register(collection);
                let filter = self.filter(filter);
                call("Collection.filter", vec![("collection", collection), ("filter", filter)])
            }
            NodeKind::Map { collection, var, body } => {
                let collection = self.register(collection);
                let base = self.lambda(var, body);
                call("Collection.map", vec![("collection", collection), ("baseAlgorithm", base)])
            }
            Merge { first, second } => {
                let (first, second) = (self.register(first), self.register(second));
                call("ImageCollection.merge", vec![("collection1", first), ("collection2", second)])
            }
            Sort { collection, key, ascending } => {
                let collection = self.register(collection);
                call(
                    "Collection.limit",
                    vec![("collection", collection), ("key", constant(key.clone())), ("ascending", constant(*ascending))],
                )
            }
            SaveAllJoin { primary, secondary, spec } => {
                let (primary, secondary) = (self.register(primary), self.register(secondary));
                let window = call(
                    "Filter.maxDifference",
                    vec![
                        ("difference", constant(spec.max_difference_ms)),
                        ("leftField", constant(TIME_START)),
                        ("rightField", constant(TIME_START)),
                    ],
                );
                let earlier = call(
                    "Filter.greaterThan",
                    vec![("leftField", constant(TIME_START)), ("rightField", constant(TIME_START))],
                );
                let join = call(
                    "Join.saveAll",
                    vec![
                        ("matchesKey", constant(spec.matches_key.clone())),
                        ("ordering", constant(TIME_START)),
                        ("ascending", constant(false)),
                        ("outer", constant(true)),
                    ],
                );
                call(
                    "Join.apply",
                    vec![
                        ("join", join),
                        ("primary", primary),
                        ("secondary", secondary),
                        ("condition", call("Filter.and", vec![("filters", array(vec![window, earlier]))])),
                    ],
                )
            }
        }
    }

    fn number_fn(&mut self, op: NumberFn, input: Value) -> Value {
        match op {
            NumberFn::Abs => call("Number.abs", vec![("input", input)]),
            NumberFn::Floor => call("Number.floor", vec![("input", input)]),
            NumberFn::Year => {
                let date = self.date(input);
                call("Date.get", vec![("date", date), ("unit", constant("year"))])
            }
            NumberFn::DayOfYear => {
                let date = self.date(input);
                let relative = call(
                    "Date.getRelative",
                    vec![("date", date), ("unit", constant("day")), ("inUnit", constant("year"))],
                );
                call("Number.add", vec![("left", relative), ("right", constant(1))])
            }
            NumberFn::StartOfYear => {
                let date = self.date(input);
                let year = call("Date.get", vec![("date", date), ("unit", constant("year"))]);
                let start = call("Date.fromYMD", vec![("year", year), ("month", constant(1)), ("day", constant(1))]);
                call("Date.millis", vec![("input", start)])
            }
        }
    }

    fn reduce(&mut self, collection: Value, reducer: &Reducer) -> Value {
        let direct = |name: &str, collection: Value| call(name, vec![("collection", collection)]);
        match reducer {
            // name-preserving server algorithms
            Reducer::Mean => direct("ImageCollection.mean", collection),
            Reducer::Max => direct("ImageCollection.max", collection),
            Reducer::Min => direct("ImageCollection.min", collection),
            Reducer::Sum => direct("ImageCollection.sum", collection),
            Reducer::Count => direct("ImageCollection.count", collection),
            Reducer::StdDev => {
                let reduced = call(
                    "ImageCollection.reduce",
                    vec![("collection", collection), ("reducer", simple_reducer(reducer))],
                );
                call(
                    "Image.regexpRename",
                    vec![("input", reduced), ("regex", constant("_stdDev$")), ("replacement", constant(""))],
                )
            }
            Reducer::MeanStdDev | Reducer::LinearFit => call(
                "ImageCollection.reduce",
                vec![("collection", collection), ("reducer", simple_reducer(reducer))],
            ),
            Reducer::LinearRegression { independents, dependent } => {
                let mut bands = independents.clone();
                bands.push(dependent.clone());
                let var = "_REGRESSION_INPUT";
                let body = call(
                    "Image.select",
                    vec![("input", json!({ "argumentReference": var })), ("bandSelectors", names(&bands))],
                );
                let body = self.push(body);
                let selected = call("Collection.map", vec![("collection", collection), ("baseAlgorithm", function(var, &body))]);
                let reduced = call(
                    "ImageCollection.reduce",
                    vec![("collection", selected), ("reducer", simple_reducer(reducer))],
                );
                let coefficients = call(
                    "Image.select",
                    vec![("input", reduced), ("bandSelectors", constant(vec!["coefficients"]))],
                );
                let projected = call("Image.arrayProject", vec![("input", coefficients), ("axes", constant(vec![0]))]);
                call(
                    "Image.arrayFlatten",
                    vec![("image", projected), ("coordinateLabels", constant(vec![independents.clone()]))],
                )
            }
        }
    }

    fn filter(&mut self, filter: &Filter) -> Value {
        match filter {
            Filter::DateRange { start, end } => {
                let (start, end) = (self.register(start), self.register(end));
                let range = call("DateRange", vec![("start", start), ("end", end)]);
                call("Filter.dateRangeContains", vec![("leftValue", range), ("rightField", constant(TIME_START))])
            }
            // the service's calendar range is inclusive at both ends
            Filter::DayOfYear { start, end } => call(
                "Filter.calendarRange",
                vec![
                    ("start", constant(*start)),
                    ("end", constant(end.saturating_sub(1).max(*start))),
                    ("field", constant("day_of_year")),
                ],
            ),
            Filter::Property { key, cmp, value } => call(
                comparison_name(*cmp),
                vec![("leftField", constant(key.clone())), ("rightValue", constant(*value))],
            ),
            Filter::And(filters) => {
                let filters = filters.iter().map(|f| self.filter(f)).collect();
                call("Filter.and", vec![("filters", array(filters))])
            }
        }
    }
}
