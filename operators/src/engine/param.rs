use std::collections::HashMap;
use std::sync::Arc;

use openeo_raster_datatypes::{BoundingBox, EagerRasterStack, Image, LazyRasterStack, TemporalInterval, User};
use serde_json::Value as JsonValue;

use crate::error::{self, Error};
use crate::tile_assignment::TileAssignmentStore;

/// One argument slot in a process graph node: a literal JSON value, an edge
/// to another node's result, or a placeholder to be resolved against the
/// runtime parameter map.
#[derive(Debug, Clone)]
pub enum Arg {
    Literal(JsonValue),
    NodeEdge(String),
    ParamRef(String),
}

/// The openEO type names used in error messages and declared parameter
/// specs; not every value variant below has a dedicated openEO type, but
/// every openEO type maps to exactly one expected `Value` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenEoType {
    Integer,
    Number,
    String,
    Boolean,
    Null,
    Array,
    Datacube,
    BoundingBox,
    TemporalInterval,
}

impl OpenEoType {
    pub fn name(&self) -> &'static str {
        match self {
            OpenEoType::Integer => "integer",
            OpenEoType::Number => "number",
            OpenEoType::String => "string",
            OpenEoType::Boolean => "boolean",
            OpenEoType::Null => "null",
            OpenEoType::Array => "array",
            OpenEoType::Datacube => "datacube",
            OpenEoType::BoundingBox => "bounding-box",
            OpenEoType::TemporalInterval => "temporal-interval",
        }
    }
}

/// A raster stack value in either of its two flavours, carried through the
/// dispatcher without collapsing laziness prematurely.
#[derive(Clone)]
pub enum StackValue {
    Eager(Arc<EagerRasterStack>),
    Lazy(Arc<LazyRasterStack>),
}

/// A fully resolved runtime value: what a process implementation actually
/// receives after the dispatcher has resolved references and coerced types.
#[derive(Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Json(JsonValue),
    BoundingBox(BoundingBox),
    TemporalInterval(TemporalInterval),
    Image(Arc<Image>),
    Stack(StackValue),
    User(Arc<User>),
    TileStore(Arc<dyn TileAssignmentStore>),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Boolean(b) => write!(f, "Boolean({b})"),
            Value::Integer(i) => write!(f, "Integer({i})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(items) => write!(f, "Array(len={})", items.len()),
            Value::Json(v) => write!(f, "Json({v})"),
            Value::BoundingBox(b) => write!(f, "BoundingBox({b:?})"),
            Value::TemporalInterval(t) => write!(f, "TemporalInterval({t:?})"),
            Value::Image(_) => write!(f, "Image(..)"),
            Value::Stack(_) => write!(f, "Stack(..)"),
            Value::User(u) => write!(f, "User({})", u.user_id),
            Value::TileStore(_) => write!(f, "TileStore(..)"),
        }
    }
}

impl Value {
    pub fn openeo_type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Json(_) => "object",
            Value::BoundingBox(_) => "bounding-box",
            Value::TemporalInterval(_) => "temporal-interval",
            Value::Image(_) | Value::Stack(_) => "datacube",
            Value::User(_) => "user",
            Value::TileStore(_) => "tile-store",
        }
    }

    pub fn from_json(value: JsonValue) -> Value {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else {
                    Value::Number(n.as_f64().unwrap_or_default())
                }
            }
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            other @ JsonValue::Object(_) => Value::Json(other),
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&StackValue> {
        match self {
            Value::Stack(stack) => Some(stack),
            _ => None,
        }
    }

    pub fn as_json_object(&self) -> Option<&serde_json::Map<String, JsonValue>> {
        match self {
            Value::Json(JsonValue::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// A declared parameter of a process implementation, driving the
/// dispatcher's coercion and validation pass.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub openeo_type: OpenEoType,
    pub optional: bool,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, openeo_type: OpenEoType) -> Self {
        ParamSpec {
            name: name.into(),
            openeo_type,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Optional orchestration keys the dispatcher drops silently on an
/// unresolved `from_parameter` reference, provided the implementation does
/// not itself declare them.
pub const OPTIONAL_ORCHESTRATION_KEYS: &[&str] = &["context", "axis", "keepdims", "dim_labels", "data"];

/// Reserved parameter-map keys injected by the boundary rather than by the
/// caller's declared parameters.
pub const RESERVED_USER_KEY: &str = "_openeo_user";
pub const RESERVED_TILE_STORE_KEY: &str = "_openeo_tile_store";

/// The fully resolved argument set handed to a process implementation.
pub struct ResolvedArgs {
    values: HashMap<String, Value>,
}

impl ResolvedArgs {
    pub fn new(values: HashMap<String, Value>) -> Self {
        ResolvedArgs { values }
    }

    pub fn get(&self, process_id: &str, name: &str) -> Result<&Value, Error> {
        self.values.get(name).ok_or_else(|| {
            error::ProcessParameterMissing {
                process_id,
                parameter: name,
            }
            .build()
        })
    }

    pub fn get_optional(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn all(&self) -> &HashMap<String, Value> {
        &self.values
    }
}
