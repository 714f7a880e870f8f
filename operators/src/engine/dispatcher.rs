use std::collections::HashMap;

use async_trait::async_trait;
use openeo_raster_datatypes::{BoundingBox, TemporalInterval};
use tracing::debug;

use crate::engine::param::{
    Arg, OpenEoType, ParamSpec, ResolvedArgs, StackValue, Value, OPTIONAL_ORCHESTRATION_KEYS,
    RESERVED_USER_KEY,
};
use crate::error::{self, Error};

/// A single openEO process implementation. Implementations are pure
/// functions of their declared, already-resolved parameters; they never see
/// `ParameterReference` placeholders or raw JSON.
#[async_trait]
pub trait ProcessImpl: Send + Sync {
    fn process_id(&self) -> &str;
    fn params(&self) -> &[ParamSpec];

    /// Whether the implementation's signature accepts the full
    /// `named_parameters` map as an extra. Most processes don't; `apply`-like
    /// higher-order processes do, to forward context to a child callable.
    fn wants_named_parameters(&self) -> bool {
        false
    }

    async fn call(&self, args: ResolvedArgs) -> Result<Value, Error>;
}

#[derive(Default)]
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher
    }

    /// Resolves `args` against `node_results` / `named_parameters` /
    /// `positional_args`, coerces and validates them per `process`'s
    /// declared parameter specs, and invokes the implementation.
    pub async fn call(
        &self,
        process: &dyn ProcessImpl,
        args: HashMap<String, Arg>,
        node_results: &HashMap<String, Value>,
        named_parameters: &HashMap<String, Value>,
        positional_parameters: &HashMap<String, usize>,
        positional_args: &[Value],
    ) -> Result<Value, Error> {
        let process_id = process.process_id();
        let declared: HashMap<&str, &ParamSpec> =
            process.params().iter().map(|p| (p.name.as_str(), p)).collect();

        let mut resolved = HashMap::new();
        for (name, arg) in args {
            let value = match arg {
                Arg::Literal(json) => Some(Value::from_json(json)),
                Arg::NodeEdge(node_id) => Some(node_results.get(&node_id).cloned().ok_or_else(
                    || {
                        error::InvalidProcessGraph {
                            reason: format!("no result for node '{node_id}'"),
                        }
                        .build()
                    },
                )?),
                Arg::ParamRef(param_name) => {
                    if let Some(value) = named_parameters.get(&param_name) {
                        Some(value.clone())
                    } else if let Some(&index) = positional_parameters.get(&param_name) {
                        Some(positional_args.get(index).cloned().ok_or_else(|| {
                            error::ProcessParameterMissing {
                                process_id,
                                parameter: param_name.clone(),
                            }
                            .build()
                        })?)
                    } else if OPTIONAL_ORCHESTRATION_KEYS.contains(&param_name.as_str())
                        && !declared.contains_key(param_name.as_str())
                    {
                        debug!(process_id, parameter = %param_name, "dropping unresolved optional parameter");
                        None
                    } else {
                        return error::ProcessParameterMissing {
                            process_id,
                            parameter: param_name,
                        }
                        .fail();
                    }
                }
            };
            if let Some(value) = value {
                resolved.insert(name, value);
            }
        }

        for spec in process.params() {
            let Some(value) = resolved.get(&spec.name) else {
                continue;
            };
            let coerced = coerce(process_id, spec, value.clone())?;
            resolved.insert(spec.name.clone(), coerced);
        }

        for spec in process.params() {
            let value = resolved.get(&spec.name);
            validate(process_id, spec, value)?;
        }

        debug!(process_id, parameters = ?resolved.keys().collect::<Vec<_>>(), "dispatching process");

        let args = ResolvedArgs::new(resolved);
        process.call(args).await
    }
}

fn coerce(process_id: &str, spec: &ParamSpec, value: Value) -> Result<Value, Error> {
    if spec.name == RESERVED_USER_KEY && spec.openeo_type == OpenEoType::String {
        if let Value::User(user) = &value {
            return Ok(Value::String(user.user_id.clone()));
        }
    }

    if spec.openeo_type == OpenEoType::BoundingBox {
        if let Some(obj) = value.as_json_object() {
            let get = |key: &str| -> Result<f64, Error> {
                obj.get(key)
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| {
                        error::ProcessParameterInvalid {
                            process_id,
                            parameter: spec.name.clone(),
                            reason: format!("bounding box missing numeric '{key}'"),
                        }
                        .build()
                    })
            };
            let west = get("west")?;
            let south = get("south")?;
            let east = get("east")?;
            let north = get("north")?;
            let crs = obj
                .get("crs")
                .and_then(serde_json::Value::as_str)
                .map(openeo_raster_datatypes::SpatialReference::parse)
                .transpose()?
                .unwrap_or_default();
            let bbox = BoundingBox::new(west, south, east, north, crs)?;
            return Ok(Value::BoundingBox(bbox));
        }
    }

    if spec.openeo_type == OpenEoType::TemporalInterval {
        if let Some(obj) = value.as_json_object() {
            let start = obj.get("start").and_then(serde_json::Value::as_str);
            let end = obj.get("end").and_then(serde_json::Value::as_str);
            return Ok(Value::TemporalInterval(parse_temporal_pair(
                process_id, spec, start, end,
            )?));
        }
        if let Some(items) = value.as_array() {
            if items.len() == 2 {
                let start = items[0].as_string();
                let end = items[1].as_string();
                return Ok(Value::TemporalInterval(parse_temporal_pair(
                    process_id, spec, start, end,
                )?));
            }
        }
    }

    Ok(value)
}

fn parse_temporal_pair(
    process_id: &str,
    spec: &ParamSpec,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<TemporalInterval, Error> {
    let parse_bound = |value: Option<&str>| -> Result<Option<chrono::DateTime<chrono::Utc>>, Error> {
        match value {
            None | Some("..") => Ok(None),
            Some(s) => Ok(Some(
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .map_err(|_| {
                        error::ProcessParameterInvalid {
                            process_id,
                            parameter: spec.name.clone(),
                            reason: format!("invalid timestamp '{s}'"),
                        }
                        .build()
                    })?,
            )),
        }
    };
    Ok(TemporalInterval::new(
        parse_bound(start)?,
        parse_bound(end)?,
    )?)
}

fn validate(process_id: &str, spec: &ParamSpec, value: Option<&Value>) -> Result<(), Error> {
    let Some(value) = value else {
        if spec.optional {
            return Ok(());
        }
        return error::ProcessParameterMissing {
            process_id,
            parameter: spec.name.clone(),
        }
        .fail();
    };

    if matches!(value, Value::Null) {
        if spec.optional || spec.openeo_type == OpenEoType::Null {
            return Ok(());
        }
        return error::TypeValidation {
            process_id,
            parameter: spec.name.clone(),
            expected: spec.openeo_type.name(),
            got: "null",
        }
        .fail();
    }

    let matches = match spec.openeo_type {
        OpenEoType::Integer => matches!(value, Value::Integer(_) | Value::Number(_)),
        OpenEoType::Number => matches!(value, Value::Integer(_) | Value::Number(_)),
        OpenEoType::String => matches!(value, Value::String(_)),
        OpenEoType::Boolean => matches!(value, Value::Boolean(_)),
        OpenEoType::Null => matches!(value, Value::Null),
        OpenEoType::Array => matches!(value, Value::Array(_)),
        OpenEoType::Datacube => matches!(value, Value::Stack(StackValue::Eager(_)) | Value::Stack(StackValue::Lazy(_)) | Value::Image(_)),
        OpenEoType::BoundingBox => matches!(value, Value::BoundingBox(_)),
        OpenEoType::TemporalInterval => matches!(value, Value::TemporalInterval(_)),
    };

    if matches {
        Ok(())
    } else {
        error::TypeValidation {
            process_id,
            parameter: spec.name.clone(),
            expected: spec.openeo_type.name(),
            got: value.openeo_type_name(),
        }
        .fail()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoProcess {
        params: Vec<ParamSpec>,
    }

    #[async_trait]
    impl ProcessImpl for EchoProcess {
        fn process_id(&self) -> &str {
            "echo"
        }

        fn params(&self) -> &[ParamSpec] {
            &self.params
        }

        async fn call(&self, args: ResolvedArgs) -> Result<Value, Error> {
            Ok(Value::Json(serde_json::json!(args.all().keys().collect::<Vec<_>>())))
        }
    }

    fn echo(params: Vec<ParamSpec>) -> EchoProcess {
        EchoProcess { params }
    }

    /// Property #1: a `ParamRef` resolves against `named_parameters` before
    /// the implementation ever runs.
    #[tokio::test]
    async fn resolves_named_parameter_reference() {
        let process = echo(vec![ParamSpec::new("cloud_cover", OpenEoType::Integer)]);
        let mut args = HashMap::new();
        args.insert("cloud_cover".to_string(), Arg::ParamRef("cloud_cover".to_string()));
        let mut named = HashMap::new();
        named.insert("cloud_cover".to_string(), Value::Integer(20));

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(&process, args, &HashMap::new(), &named, &HashMap::new(), &[])
            .await;

        assert!(result.is_ok());
    }

    /// Scenario S2: a `from_parameter` reference with nothing in
    /// `named_parameters` fails with `ProcessParameterMissing`, naming the
    /// parameter.
    #[tokio::test]
    async fn missing_named_parameter_is_process_parameter_missing() {
        let process = echo(vec![ParamSpec::new("cloud_cover", OpenEoType::Integer)]);
        let mut args = HashMap::new();
        args.insert("cloud_cover".to_string(), Arg::ParamRef("cloud_cover".to_string()));

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(&process, args, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[])
            .await;

        match result {
            Err(Error::ProcessParameterMissing { parameter, .. }) => {
                assert_eq!(parameter, "cloud_cover");
            }
            other => panic!("expected ProcessParameterMissing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolves_positional_argument() {
        let process = echo(vec![ParamSpec::new("x", OpenEoType::Number)]);
        let mut args = HashMap::new();
        args.insert("x".to_string(), Arg::ParamRef("x".to_string()));
        let mut positional_parameters = HashMap::new();
        positional_parameters.insert("x".to_string(), 0usize);
        let positional_args = vec![Value::Number(4.5)];

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(
                &process,
                args,
                &HashMap::new(),
                &HashMap::new(),
                &positional_parameters,
                &positional_args,
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unresolved_optional_orchestration_key_is_dropped() {
        let process = echo(vec![]);
        let mut args = HashMap::new();
        args.insert("context".to_string(), Arg::ParamRef("context".to_string()));

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(&process, args, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[])
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_required_param_fails_validation() {
        let process = echo(vec![ParamSpec::new("x", OpenEoType::Number)]);
        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(&process, HashMap::new(), &HashMap::new(), &HashMap::new(), &HashMap::new(), &[])
            .await;

        assert!(matches!(result, Err(Error::ProcessParameterMissing { .. })));
    }

    #[tokio::test]
    async fn wrong_type_fails_type_validation() {
        let process = echo(vec![ParamSpec::new("x", OpenEoType::Number)]);
        let mut args = HashMap::new();
        args.insert("x".to_string(), Arg::Literal(serde_json::json!("not a number")));

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(&process, args, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[])
            .await;

        assert!(matches!(result, Err(Error::TypeValidation { .. })));
    }

    #[tokio::test]
    async fn coerces_bounding_box_object() {
        let process = echo(vec![ParamSpec::new("spatial_extent", OpenEoType::BoundingBox)]);
        let mut args = HashMap::new();
        args.insert(
            "spatial_extent".to_string(),
            Arg::Literal(serde_json::json!({
                "west": 16.1, "south": 47.2, "east": 16.6, "north": 48.6
            })),
        );

        let dispatcher = Dispatcher::new();
        let result = dispatcher
            .call(&process, args, &HashMap::new(), &HashMap::new(), &HashMap::new(), &[])
            .await;

        assert!(result.is_ok());
    }
}
