//! Translates the `properties` argument of `load_collection` — a map of STAC
//! property name to an openEO child process graph (or a literal value) —
//! into a STAC API Filter Extension CQL2-JSON expression (spec.md §4.4).

use serde_json::{json, Map, Value};

/// One node of a child process graph: `{"process_graph": {"<id>": {"process_id": ..., "arguments": {...}}}}`.
fn single_node<'a>(process_graph: &'a Value) -> Option<&'a Map<String, Value>> {
    let pg = process_graph.get("process_graph")?.as_object()?;
    let (_, node) = pg.iter().next()?;
    node.as_object()
}

/// `true` for the openEO self-reference placeholder `{"from_parameter": "value"}`,
/// the marker an argument of a `properties` child process graph uses to refer
/// to the property's own value; it carries no literal and is dropped rather
/// than translated.
fn is_value_placeholder(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|o| o.get("from_parameter"))
        .and_then(Value::as_str)
        == Some("value")
}

/// Resolves a `{"from_parameter": NAME}` reference against `named_parameters`,
/// except the self-reference `"value"` placeholder, which callers handle on
/// their own terms (`x` is always that self-reference, never a caller
/// parameter). Anything else passes through unchanged.
fn resolve_reference(value: &Value, named_parameters: &Map<String, Value>) -> Value {
    match value.as_object().and_then(|o| o.get("from_parameter")).and_then(Value::as_str) {
        Some("value") | None => value.clone(),
        Some(name) => named_parameters.get(name).cloned().unwrap_or(Value::Null),
    }
}

fn comparison_operator(
    process_id: &str,
    prop: &str,
    args: &Map<String, Value>,
    named_parameters: &Map<String, Value>,
) -> Option<Value> {
    let op = match process_id {
        "eq" => "=",
        "neq" => "<>",
        "lt" => "<",
        "lte" => "<=",
        "gt" => ">",
        "gte" => ">=",
        "between" => {
            let min = args.get("min").map(|v| resolve_reference(v, named_parameters)).unwrap_or(Value::Null);
            let max = args.get("max").map(|v| resolve_reference(v, named_parameters)).unwrap_or(Value::Null);
            return Some(json!({
                "op": "between",
                "args": [{"property": prop}, min, max],
            }));
        }
        _ => return None,
    };
    let y = args.get("y").map(|v| resolve_reference(v, named_parameters)).unwrap_or(Value::Null);
    Some(json!({
        "op": op,
        "args": [{"property": prop}, y],
    }))
}

fn array_operator(
    process_id: &str,
    prop: &str,
    args: &Map<String, Value>,
    named_parameters: &Map<String, Value>,
) -> Option<Value> {
    if process_id != "in" && process_id != "array_contains" {
        return None;
    }
    let values = args
        .get("values")
        .map(|v| resolve_reference(v, named_parameters))
        .unwrap_or_else(|| Value::Array(vec![]));
    Some(json!({
        "op": "in",
        "args": [{"property": prop}, {"array": values}],
    }))
}

fn pattern_operator(
    process_id: &str,
    prop: &str,
    args: &Map<String, Value>,
    named_parameters: &Map<String, Value>,
) -> Option<Value> {
    let y = args.get("y").map(|v| resolve_reference(v, named_parameters)).unwrap_or(Value::Null);
    let y = y.as_str().unwrap_or("");
    let pattern = match process_id {
        "starts_with" => format!("{y}%"),
        "ends_with" => format!("%{y}"),
        "contains" => format!("%{y}%"),
        _ => return None,
    };
    Some(json!({"op": "like", "args": [{"property": prop}, pattern]}))
}

fn null_check(process_id: &str, prop: &str) -> Option<Value> {
    if process_id != "is_null" {
        return None;
    }
    Some(json!({"op": "isNull", "args": [{"property": prop}]}))
}

/// `and`/`or`/`not`: each sub-expression is itself a child process graph
/// wrapping the same property, recursed through `translate_property`.
fn logical_operator(
    process_id: &str,
    prop: &str,
    args: &Map<String, Value>,
    named_parameters: &Map<String, Value>,
) -> Option<Value> {
    match process_id {
        "and" | "or" => {
            let sub_conditions: Vec<Value> = args
                .get("expressions")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|sub| translate_property(prop, &wrap_process_graph(sub), named_parameters))
                .collect();
            if sub_conditions.is_empty() {
                None
            } else {
                Some(json!({"op": process_id, "args": sub_conditions}))
            }
        }
        "not" => {
            let expression = args.get("expression")?;
            let sub_condition =
                translate_property(prop, &wrap_process_graph(expression), named_parameters)?;
            Some(json!({"op": "not", "args": [sub_condition]}))
        }
        _ => None,
    }
}

fn wrap_process_graph(node: &Value) -> Value {
    json!({"process_graph": {"sub": node}})
}

/// Fallback for a process this translator does not recognise: look for the
/// single non-self-reference argument and emit an equality filter against
/// it, the same best-effort behaviour as recognised comparison operators.
fn default_operator(prop: &str, args: &Map<String, Value>, named_parameters: &Map<String, Value>) -> Option<Value> {
    let target_value = args.values().find(|v| !is_value_placeholder(v))?;
    Some(json!({
        "op": "=",
        "args": [{"property": format!("properties.{prop}")}, resolve_reference(target_value, named_parameters)],
    }))
}

fn translate_property(prop: &str, process_graph: &Value, named_parameters: &Map<String, Value>) -> Option<Value> {
    let Some(node) = single_node(process_graph) else {
        // Not a process graph at all: a direct literal value (or a bare
        // `from_parameter` reference used as the whole property filter).
        let resolved = resolve_reference(process_graph, named_parameters);
        return Some(json!({"op": "=", "args": [{"property": prop}, resolved]}));
    };
    let process_id = node.get("process_id").and_then(Value::as_str)?;
    let empty = Map::new();
    let args = node.get("arguments").and_then(Value::as_object).unwrap_or(&empty);

    comparison_operator(process_id, prop, args, named_parameters)
        .or_else(|| array_operator(process_id, prop, args, named_parameters))
        .or_else(|| pattern_operator(process_id, prop, args, named_parameters))
        .or_else(|| null_check(process_id, prop))
        .or_else(|| logical_operator(process_id, prop, args, named_parameters))
        .or_else(|| default_operator(prop, args, named_parameters))
}

/// Translates the whole `properties` argument into a single CQL2-JSON
/// expression, resolving any `{"from_parameter": NAME}` reference (other
/// than the `"value"` self-reference) against `named_parameters` — the same
/// map the dispatcher resolves process-graph parameter references against
/// (spec.md §4.4). A single property is returned as its own condition; more
/// than one is combined with `and`. Returns `null` for an empty map, the
/// same "no filter" value the STAC API accepts for an absent `filter`.
pub fn properties_to_cql2(properties: &Map<String, Value>, named_parameters: &Map<String, Value>) -> Value {
    if properties.is_empty() {
        return Value::Null;
    }
    if properties.len() == 1 {
        let (prop, process_graph) = properties.iter().next().unwrap();
        return translate_property(prop, process_graph, named_parameters).unwrap_or(Value::Null);
    }
    let args: Vec<Value> = properties
        .iter()
        .filter_map(|(prop, process_graph)| translate_property(prop, process_graph, named_parameters))
        .collect();
    if args.is_empty() {
        Value::Null
    } else {
        json!({"op": "and", "args": args})
    }
}
