use crate::engine::param::Value;
use crate::error::{self, Error};

/// Extracts a value out of a nested parameter using the small dotted/bracket
/// path grammar the original exercises: `$.field`, `$.arr[0]`, and nested
/// combinations thereof. Not a general JSONPath implementation.
pub fn get_param_item(process_id: &str, value: &Value, path: &str) -> Result<Value, Error> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() {
        return Ok(value.clone());
    }

    let mut current = value.clone();
    for segment in split_segments(process_id, path)? {
        current = match segment {
            Segment::Field(name) => field(process_id, &current, &name)?,
            Segment::Index(index) => index_into(process_id, &current, index)?,
        };
    }
    Ok(current)
}

enum Segment {
    Field(String),
    Index(usize),
}

fn split_segments(process_id: &str, path: &str) -> Result<Vec<Segment>, Error> {
    let mut segments = Vec::new();
    for raw in path.split('.') {
        let mut rest = raw;
        if let Some(dot) = rest.find('[') {
            let (field, bracketed) = rest.split_at(dot);
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }
            rest = bracketed;
            while let Some(open) = rest.find('[') {
                let close = rest[open..].find(']').map(|i| i + open).ok_or_else(|| {
                    error::ProcessParameterInvalid {
                        process_id,
                        parameter: "path",
                        reason: format!("unterminated '[' in path segment '{raw}'"),
                    }
                    .build()
                })?;
                let index: usize = rest[open + 1..close].parse().map_err(|_| {
                    error::ProcessParameterInvalid {
                        process_id,
                        parameter: "path",
                        reason: format!("non-numeric index in path segment '{raw}'"),
                    }
                    .build()
                })?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        } else if !rest.is_empty() {
            segments.push(Segment::Field(rest.to_string()));
        }
    }
    Ok(segments)
}

fn field(process_id: &str, value: &Value, name: &str) -> Result<Value, Error> {
    match value {
        Value::Json(serde_json::Value::Object(map)) => map
            .get(name)
            .map(|v| Value::from_json(v.clone()))
            .ok_or_else(|| {
                error::ProcessParameterMissing {
                    process_id,
                    parameter: name,
                }
                .build()
            }),
        _ => error::ProcessParameterInvalid {
            process_id,
            parameter: name,
            reason: "value is not an object".to_string(),
        }
        .fail(),
    }
}

fn index_into(process_id: &str, value: &Value, index: usize) -> Result<Value, Error> {
    match value {
        Value::Array(items) => items.get(index).cloned().ok_or_else(|| {
            error::ProcessParameterMissing {
                process_id,
                parameter: format!("[{index}]"),
            }
            .build()
        }),
        Value::Json(serde_json::Value::Array(items)) => items
            .get(index)
            .map(|v| Value::from_json(v.clone()))
            .ok_or_else(|| {
                error::ProcessParameterMissing {
                    process_id,
                    parameter: format!("[{index}]"),
                }
                .build()
            }),
        _ => error::ProcessParameterInvalid {
            process_id,
            parameter: format!("[{index}]"),
            reason: "value is not an array".to_string(),
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_nested_field() {
        let value = Value::from_json(json!({"a": {"b": 1}}));
        let result = get_param_item("test", &value, "$.a.b").unwrap();
        assert!(matches!(result, Value::Integer(1)));
    }

    #[test]
    fn extracts_array_index() {
        let value = Value::from_json(json!({"items": [10, 20, 30]}));
        let result = get_param_item("test", &value, "$.items[1]").unwrap();
        assert!(matches!(result, Value::Integer(20)));
    }

    #[test]
    fn missing_field_errors() {
        let value = Value::from_json(json!({"a": 1}));
        assert!(get_param_item("test", &value, "$.missing").is_err());
    }
}
