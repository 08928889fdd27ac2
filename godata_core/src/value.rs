//! Values that can be stored in and retrieved from a project.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Stable identifier for a value's codec key.
///
/// Writers are registered per shape and looked up by exact match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shape(Cow<'static, str>);

impl Shape {
    /// Raw bytes.
    pub const BYTES: Shape = Shape(Cow::Borrowed("bytes"));
    /// UTF-8 text.
    pub const TEXT: Shape = Shape(Cow::Borrowed("text"));
    /// A single JSON document.
    pub const JSON: Shape = Shape(Cow::Borrowed("json"));
    /// A sequence of JSON documents, one per line.
    pub const RECORDS: Shape = Shape(Cow::Borrowed("records"));
    /// A filesystem path. Never written directly; see `ProjectTree::store`.
    pub const PATH: Shape = Shape(Cow::Borrowed("path"));

    /// A caller-defined shape.
    pub fn new(name: impl Into<String>) -> Self {
        Shape(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque value of a caller-defined shape.
///
/// The payload is shared, so cloning is cheap. Two custom values are equal
/// when they have the same shape and point at the same payload.
#[derive(Clone)]
pub struct CustomValue {
    shape: Shape,
    payload: Arc<dyn Any + Send + Sync>,
}

impl CustomValue {
    pub fn new<T: Any + Send + Sync>(shape: Shape, payload: T) -> Self {
        Self {
            shape,
            payload: Arc::new(payload),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Borrow the payload as `T`, if that is what it holds.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for CustomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomValue")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomValue {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && Arc::ptr_eq(&self.payload, &other.payload)
    }
}

/// A value handed to or returned by the codec registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
    Records(Vec<serde_json::Value>),
    /// An existing file on disk, stored by reading it through the registry.
    Path(PathBuf),
    Custom(CustomValue),
}

impl Value {
    /// Shape used to pick this value's writer.
    pub fn shape(&self) -> Shape {
        match self {
            Value::Bytes(_) => Shape::BYTES,
            Value::Text(_) => Shape::TEXT,
            Value::Json(_) => Shape::JSON,
            Value::Records(_) => Shape::RECORDS,
            Value::Path(_) => Shape::PATH,
            Value::Custom(custom) => custom.shape().clone(),
        }
    }

    /// Wrap a caller-defined payload.
    pub fn custom<T: Any + Send + Sync>(shape: Shape, payload: T) -> Self {
        Value::Custom(CustomValue::new(shape, payload))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::Json(json)
    }
}

impl From<PathBuf> for Value {
    fn from(path: PathBuf) -> Self {
        Value::Path(path)
    }
}
