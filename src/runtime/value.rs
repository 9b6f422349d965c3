use crate::decode::{MeshImport, Texture};
use crate::engine::GraphInstance;
use serde_json::{Number, Value as Json};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Value bound to a node pin or a blueprint output.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(Json),
    Texture(Arc<Texture>),
    Mesh(Arc<MeshImport>),
    Blueprint(Arc<GraphInstance>),
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Json(_) => "json",
            Value::Texture(_) => "texture",
            Value::Mesh(_) => "mesh",
            Value::Blueprint(_) => "blueprint",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Scalars become native variants; arrays and objects stay JSON.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }

    /// JSON form of the value. Asset handles and opaque objects have none.
    pub fn to_json(&self) -> Option<Json> {
        match self {
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Int(i) => Some(Json::from(*i)),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number),
            Value::String(s) => Some(Json::String(s.clone())),
            Value::Json(j) => Some(j.clone()),
            Value::Texture(_) | Value::Mesh(_) | Value::Blueprint(_) | Value::Object(_) => None,
        }
    }

    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Arc::new(value))
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Object(obj) => Arc::clone(obj).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Json(j) => write!(f, "Json({j})"),
            Value::Texture(t) => write!(f, "Texture({}x{})", t.width, t.height),
            Value::Mesh(m) => write!(f, "Mesh({:?})", m.mesh_name),
            Value::Blueprint(g) => write!(f, "Blueprint({})", g.id()),
            Value::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Texture(a), Value::Texture(b)) => Arc::ptr_eq(a, b),
            (Value::Mesh(a), Value::Mesh(b)) => Arc::ptr_eq(a, b),
            (Value::Blueprint(a), Value::Blueprint(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i64 => Int,
    f64 => Float,
    String => String,
    Json => Json,
    Arc<Texture> => Texture,
    Arc<MeshImport> => Mesh,
    Arc<GraphInstance> => Blueprint,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

/// Typed extraction from a [`Value`], used by pin reads.
pub trait FromValue: Sized {
    const KIND: &'static str;
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const KIND: &'static str = "any";
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    const KIND: &'static str = "bool";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const KIND: &'static str = "int";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const KIND: &'static str = "float";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    const KIND: &'static str = "string";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromValue for Json {
    const KIND: &'static str = "json";
    fn from_value(value: &Value) -> Option<Self> {
        value.to_json()
    }
}

impl FromValue for Arc<Texture> {
    const KIND: &'static str = "texture";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Texture(t) => Some(Arc::clone(t)),
            _ => None,
        }
    }
}

impl FromValue for Arc<MeshImport> {
    const KIND: &'static str = "mesh";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Mesh(m) => Some(Arc::clone(m)),
            _ => None,
        }
    }
}

impl FromValue for Arc<GraphInstance> {
    const KIND: &'static str = "blueprint";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blueprint(g) => Some(Arc::clone(g)),
            _ => None,
        }
    }
}
