//! Dynamic value model: a closed tagged union over JSON-like shapes.
//!
//! Every other part of the export engine operates on [`DynamicValue`].
//! Navigation (`key`, `idx`) follows a safe-accessor contract: a missing key,
//! an out-of-range index or a wrong-kind receiver yields the null constant,
//! never an error. Only type mismatches in formatters/predicates and stream
//! misuse raise explicit errors.

use std::fmt;
use std::io::Read;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::export::error::ExportError;
use crate::export::format::Formatter;

/// Sentinel shown when displaying a value that cannot be rendered.
pub const ERROR_VALUE: &str = "<ERROR>";

/// Discriminant for the closed set of value shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Object,
    Array,
    ArrayOfObjects,
    StreamOfObjects,
    String,
    Float,
    Int,
    Boolean,
    Null,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Object => "object",
            DataKind::Array => "array",
            DataKind::ArrayOfObjects => "array of objects",
            DataKind::StreamOfObjects => "stream of objects",
            DataKind::String => "string",
            DataKind::Float => "float",
            DataKind::Int => "int",
            DataKind::Boolean => "boolean",
            DataKind::Null => "null",
        };
        f.write_str(name)
    }
}

/// Byte stream holding not-yet-decoded JSON objects.
///
/// The reader is taken out exactly once when row generation starts; the slot
/// stays empty afterwards, which makes replay a no-op.
type StreamSlot = Mutex<Option<Box<dyn Read + Send>>>;

pub(crate) enum Payload {
    Object(Map<String, Value>),
    Array(Vec<Value>),
    ArrayOfObjects(Vec<Map<String, Value>>),
    Stream(StreamSlot),
    Text(String),
    Float(f64),
    Int(i64),
    Boolean(bool),
    Null,
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Payload::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Payload::ArrayOfObjects(items) => f.debug_tuple("ArrayOfObjects").field(items).finish(),
            Payload::Stream(_) => f.write_str("Stream(..)"),
            Payload::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Payload::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Payload::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Payload::Boolean(v) => f.debug_tuple("Boolean").field(v).finish(),
            Payload::Null => f.write_str("Null"),
        }
    }
}

/// One JSON-like value with safe navigation and lazy stream support.
///
/// Immutable after construction: navigation and formatting produce new
/// values. A value that resulted from a failed operation stores the error
/// and reports kind [`DataKind::Null`]; every value-producing operation
/// propagates the stored error instead of inspecting the payload.
#[derive(Debug)]
pub struct DynamicValue {
    payload: Payload,
    error: Option<ExportError>,
}

impl DynamicValue {
    /// The null/absent constant, returned by any failed navigation.
    pub fn null() -> Self {
        DynamicValue {
            payload: Payload::Null,
            error: None,
        }
    }

    pub(crate) fn from_error(error: ExportError) -> Self {
        DynamicValue {
            payload: Payload::Null,
            error: Some(error),
        }
    }

    pub(crate) fn from_payload(payload: Payload) -> Self {
        DynamicValue {
            payload,
            error: None,
        }
    }

    /// Decodes exactly one JSON value from `reader`.
    ///
    /// A decode failure yields an error-tagged value rather than panicking;
    /// the error resurfaces when the value is exported.
    pub fn read_json<R: Read>(reader: R) -> Self {
        let mut de = serde_json::Deserializer::from_reader(reader);
        match Value::deserialize(&mut de) {
            Ok(value) => DynamicValue::from(value),
            Err(err) => DynamicValue::from_error(ExportError::Decode(err.to_string())),
        }
    }

    /// Wraps `reader` as a lazily-decoded stream of JSON objects.
    ///
    /// Objects may be newline- or whitespace-separated. The stream is
    /// consumed once, forward-only, when row generation runs; stringifying
    /// it directly is always an error.
    pub fn stream_json<R: Read + Send + 'static>(reader: R) -> Self {
        DynamicValue {
            payload: Payload::Stream(Mutex::new(Some(Box::new(reader)))),
            error: None,
        }
    }

    pub fn kind(&self) -> DataKind {
        match &self.payload {
            Payload::Object(_) => DataKind::Object,
            Payload::Array(_) => DataKind::Array,
            Payload::ArrayOfObjects(_) => DataKind::ArrayOfObjects,
            Payload::Stream(_) => DataKind::StreamOfObjects,
            Payload::Text(_) => DataKind::String,
            Payload::Float(_) => DataKind::Float,
            Payload::Int(_) => DataKind::Int,
            Payload::Boolean(_) => DataKind::Boolean,
            Payload::Null => DataKind::Null,
        }
    }

    /// The error stored when this value resulted from a failed operation.
    pub fn error(&self) -> Option<&ExportError> {
        self.error.as_ref()
    }

    pub fn is_null(&self) -> bool {
        matches!(self.payload, Payload::Null)
    }

    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Walks nested object keys left to right.
    ///
    /// An empty key list, a missing key or a non-object intermediate all
    /// yield the null constant.
    pub fn key(&self, keys: &[&str]) -> DynamicValue {
        if keys.is_empty() {
            return DynamicValue::null();
        }

        let mut current = self.root_key(keys[0]);
        for key in &keys[1..] {
            current = current.root_key(key);
        }
        current
    }

    fn root_key(&self, key: &str) -> DynamicValue {
        match &self.payload {
            Payload::Object(map) => match map.get(key) {
                Some(value) => DynamicValue::from(value.clone()),
                None => DynamicValue::null(),
            },
            _ => DynamicValue::null(),
        }
    }

    /// Element access for array kinds; out of range or wrong kind yields null.
    pub fn idx(&self, index: usize) -> DynamicValue {
        match &self.payload {
            Payload::Array(items) => match items.get(index) {
                Some(value) => DynamicValue::from(value.clone()),
                None => DynamicValue::null(),
            },
            Payload::ArrayOfObjects(items) => match items.get(index) {
                Some(object) => DynamicValue::from(Value::Object(object.clone())),
                None => DynamicValue::null(),
            },
            _ => DynamicValue::null(),
        }
    }

    /// Applies a type-checked transform, turning its failure into an
    /// error-tagged value.
    pub fn format(&self, formatter: &Formatter) -> DynamicValue {
        match (formatter.as_ref())(self) {
            Ok(value) => value,
            Err(err) => DynamicValue::from_error(err),
        }
    }

    /// String form of the value for CSV output.
    ///
    /// Nested kinds serialize as compact JSON, floats use shortest
    /// round-trip formatting, null renders empty. Streams cannot be
    /// rendered, and an error-tagged value propagates its stored error.
    pub fn render(&self) -> Result<String, ExportError> {
        if let Some(err) = &self.error {
            return Err(ExportError::Poisoned(Box::new(err.clone())));
        }

        match &self.payload {
            Payload::Object(map) => {
                serde_json::to_string(map).map_err(|e| ExportError::Serialize(e.to_string()))
            }
            Payload::Array(items) => {
                serde_json::to_string(items).map_err(|e| ExportError::Serialize(e.to_string()))
            }
            Payload::ArrayOfObjects(items) => {
                serde_json::to_string(items).map_err(|e| ExportError::Serialize(e.to_string()))
            }
            Payload::Stream(_) => Err(ExportError::StreamNotStringifiable),
            Payload::Text(s) => Ok(s.clone()),
            Payload::Float(v) => Ok(v.to_string()),
            Payload::Int(v) => Ok(v.to_string()),
            Payload::Boolean(v) => Ok(v.to_string()),
            Payload::Null => Ok(String::new()),
        }
    }

    /// Takes the wrapped byte stream, leaving the slot empty so that a
    /// second export over the same root sees an exhausted stream.
    pub(crate) fn take_stream(&self) -> Option<Box<dyn Read + Send>> {
        match &self.payload {
            Payload::Stream(slot) => slot.lock().ok().and_then(|mut guard| guard.take()),
            _ => None,
        }
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str(ERROR_VALUE),
        }
    }
}

impl From<Value> for DynamicValue {
    /// Classifies a decoded JSON value.
    ///
    /// A non-empty array whose elements are all objects classifies as
    /// array-of-objects; numbers classify as int when representable as i64
    /// and float otherwise. Anything unrecognized falls back to null.
    fn from(value: Value) -> Self {
        let payload = match value {
            Value::Object(map) => Payload::Object(map),
            Value::Array(items) => {
                if !items.is_empty() && items.iter().all(Value::is_object) {
                    let objects = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::Object(map) => Some(map),
                            _ => None,
                        })
                        .collect();
                    Payload::ArrayOfObjects(objects)
                } else {
                    Payload::Array(items)
                }
            }
            Value::String(s) => Payload::Text(s),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Payload::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Payload::Float(f)
                } else {
                    Payload::Null
                }
            }
            Value::Bool(b) => Payload::Boolean(b),
            Value::Null => Payload::Null,
        };

        DynamicValue {
            payload,
            error: None,
        }
    }
}

/// Native Rust types that map onto a single [`DataKind`].
///
/// The expected kind is captured at construction time so formatters and
/// split predicates can check the tag before unwrapping the payload.
pub trait NativeValue: Sized {
    const KIND: DataKind;

    /// Extracts the native value when the kind matches exactly.
    fn from_value(value: &DynamicValue) -> Option<Self>;

    /// Extraction used by split predicates.
    ///
    /// Identical to [`NativeValue::from_value`] except for the single
    /// widening rule on the `i64` impl.
    fn from_value_widened(value: &DynamicValue) -> Option<Self> {
        Self::from_value(value)
    }

    fn into_value(self) -> DynamicValue;
}

impl NativeValue for String {
    const KIND: DataKind = DataKind::String;

    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value.payload() {
            Payload::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> DynamicValue {
        DynamicValue::from_payload(Payload::Text(self))
    }
}

impl NativeValue for f64 {
    const KIND: DataKind = DataKind::Float;

    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value.payload() {
            Payload::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self) -> DynamicValue {
        DynamicValue::from_payload(Payload::Float(self))
    }
}

impl NativeValue for i64 {
    const KIND: DataKind = DataKind::Int;

    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value.payload() {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The one numeric widening rule: a float with no fractional component
    /// narrows to an int, so 30.0 matches an int-typed predicate as 30.
    /// 30.5 stays a mismatch.
    fn from_value_widened(value: &DynamicValue) -> Option<Self> {
        if let Payload::Float(f) = value.payload() {
            let narrowed = *f as i64;
            if narrowed as f64 == *f {
                return Some(narrowed);
            }
        }
        Self::from_value(value)
    }

    fn into_value(self) -> DynamicValue {
        DynamicValue::from_payload(Payload::Int(self))
    }
}

impl NativeValue for bool {
    const KIND: DataKind = DataKind::Boolean;

    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value.payload() {
            Payload::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    fn into_value(self) -> DynamicValue {
        DynamicValue::from_payload(Payload::Boolean(self))
    }
}

impl NativeValue for Map<String, Value> {
    const KIND: DataKind = DataKind::Object;

    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value.payload() {
            Payload::Object(map) => Some(map.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> DynamicValue {
        DynamicValue::from_payload(Payload::Object(self))
    }
}

impl NativeValue for Vec<Value> {
    const KIND: DataKind = DataKind::Array;

    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value.payload() {
            Payload::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    fn into_value(self) -> DynamicValue {
        DynamicValue::from_payload(Payload::Array(self))
    }
}
