//! Concrete template values
//!
//! `Data` is the single value currency of the engine: parse-time literals,
//! context cells, and evaluation results are all `Data`. Three properties
//! matter everywhere:
//! - errors are values, not unwinds (`Error` variant)
//! - values may be deferred behind a host producer (`Lazy` variant)
//! - invariance (repeated evaluation yields the same value) gates eager
//!   folding during resolution

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::{ErrorKind, SourceLocation};

/// Storable value kinds
///
/// Declaration order is the fixed total order over storable types; `Ord`
/// follows it. Signature type-sets are canonicalized to this order before
/// matching, so signature comparison and membership are order-independent
/// for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataKind {
    Bool,
    Int,
    Double,
    String,
    Array,
    Dictionary,
    Void,
}

impl DataKind {
    pub fn is_collection(self) -> bool {
        matches!(self, DataKind::Array | DataKind::Dictionary)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::Bool => "Bool",
            DataKind::Int => "Int",
            DataKind::Double => "Double",
            DataKind::String => "String",
            DataKind::Array => "Array",
            DataKind::Dictionary => "Dictionary",
            DataKind::Void => "Void",
        };
        f.write_str(name)
    }
}

/// A render-time fault carried inside a `Data::Error`
#[derive(Debug, Clone, PartialEq)]
pub struct DataError {
    pub kind: ErrorKind,
    pub message: String,
    /// Name of the function that produced the error, if any
    pub function: Option<String>,
    pub location: Option<SourceLocation>,
}

impl DataError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            function: None,
            location: None,
        }
    }

    pub fn in_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(function) = &self.function {
            write!(f, "{}: ", function)?;
        }
        f.write_str(&self.message)?;
        if let Some(location) = &self.location {
            write!(f, " ({})", location)?;
        }
        Ok(())
    }
}

/// A deferred value: a host producer forced at evaluation time
///
/// The producer must yield a concrete non-lazy `Data` (or an errored one).
/// Invariance is declared by the producer, not observed.
#[derive(Clone)]
pub struct LazyData {
    producer: Arc<dyn Fn() -> Data + Send + Sync>,
    returns: DataKind,
    invariant: bool,
}

impl LazyData {
    pub fn new(
        returns: DataKind,
        invariant: bool,
        producer: impl Fn() -> Data + Send + Sync + 'static,
    ) -> Self {
        Self {
            producer: Arc::new(producer),
            returns,
            invariant,
        }
    }

    pub fn returns(&self) -> DataKind {
        self.returns
    }

    pub fn invariant(&self) -> bool {
        self.invariant
    }

    /// Force the producer. Re-wrapped lazy results are flattened once.
    pub fn force(&self) -> Data {
        match (self.producer)() {
            Data::Lazy(inner) => inner.force(),
            concrete => concrete,
        }
    }
}

impl fmt::Debug for LazyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyData")
            .field("returns", &self.returns)
            .field("invariant", &self.invariant)
            .finish_non_exhaustive()
    }
}

/// A concrete template value
///
/// `Void` doubles as nil: the single "no value" of the engine.
#[derive(Debug, Clone)]
pub enum Data {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    Array(Vec<Data>),
    Dictionary(FxHashMap<String, Data>),
    Void,
    Error(Box<DataError>),
    Lazy(LazyData),
}

impl Data {
    /// The void/nil literal
    pub fn nil() -> Self {
        Data::Void
    }

    pub fn string(s: impl Into<String>) -> Self {
        Data::String(s.into())
    }

    pub fn array(items: impl IntoIterator<Item = Data>) -> Self {
        Data::Array(items.into_iter().collect())
    }

    pub fn dictionary(entries: impl IntoIterator<Item = (String, Data)>) -> Self {
        Data::Dictionary(entries.into_iter().collect())
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Data::Error(Box::new(DataError::new(kind, message)))
    }

    pub fn fault(error: DataError) -> Self {
        Data::Error(Box::new(error))
    }

    pub fn lazy(
        returns: DataKind,
        invariant: bool,
        producer: impl Fn() -> Data + Send + Sync + 'static,
    ) -> Self {
        Data::Lazy(LazyData::new(returns, invariant, producer))
    }

    /// The stored kind. Errors report `Void` (the value they displaced);
    /// lazy values report their producer's declared kind.
    pub fn stored_type(&self) -> DataKind {
        match self {
            Data::Bool(_) => DataKind::Bool,
            Data::Int(_) => DataKind::Int,
            Data::Double(_) => DataKind::Double,
            Data::String(_) => DataKind::String,
            Data::Array(_) => DataKind::Array,
            Data::Dictionary(_) => DataKind::Dictionary,
            Data::Void | Data::Error(_) => DataKind::Void,
            Data::Lazy(lazy) => lazy.returns(),
        }
    }

    pub fn errored(&self) -> bool {
        matches!(self, Data::Error(_))
    }

    pub fn fault_ref(&self) -> Option<&DataError> {
        match self {
            Data::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Data::Void)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Data::Lazy(_))
    }

    pub fn is_collection(&self) -> bool {
        self.stored_type().is_collection()
    }

    /// True iff repeated evaluation yields the same value.
    ///
    /// Always true for concrete values; lazy values carry their producer's
    /// declared invariance.
    pub fn invariant(&self) -> bool {
        match self {
            Data::Lazy(lazy) => lazy.invariant(),
            _ => true,
        }
    }

    /// Force any lazy wrapper, returning a concrete variant
    pub fn evaluate(&self) -> Data {
        match self {
            Data::Lazy(lazy) => lazy.force(),
            concrete => concrete.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Coercions used by operator evaluation
    // ─────────────────────────────────────────────────────────────

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Data::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Data::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric read with int promotion
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Data::Int(i) => Some(*i as f64),
            Data::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // serde_json interop (host-facing)
    // ─────────────────────────────────────────────────────────────

    /// Convert to a JSON value. Lazy values are forced; errors and void map
    /// to `Value::Null`.
    pub fn to_json(&self) -> Value {
        match self {
            Data::Bool(b) => Value::Bool(*b),
            Data::Int(i) => Value::from(*i),
            Data::Double(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Data::String(s) => Value::String(s.clone()),
            Data::Array(items) => Value::Array(items.iter().map(Data::to_json).collect()),
            Data::Dictionary(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Data::Void | Data::Error(_) => Value::Null,
            Data::Lazy(lazy) => lazy.force().to_json(),
        }
    }
}

impl From<Value> for Data {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Data::Void,
            Value::Bool(b) => Data::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Data::Int(i)
                } else {
                    Data::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Data::String(s),
            Value::Array(items) => Data::Array(items.into_iter().map(Data::from).collect()),
            Value::Object(map) => {
                Data::Dictionary(map.into_iter().map(|(k, v)| (k, Data::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Bool(b)
    }
}

impl From<i64> for Data {
    fn from(i: i64) -> Self {
        Data::Int(i)
    }
}

impl From<f64> for Data {
    fn from(d: f64) -> Self {
        Data::Double(d)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

/// Structural equality for concrete values.
///
/// Errored values never compare equal to anything, themselves included.
/// Lazy values never compare equal without being forced first.
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Int(a), Data::Int(b)) => a == b,
            (Data::Double(a), Data::Double(b)) => a == b,
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Array(a), Data::Array(b)) => a == b,
            (Data::Dictionary(a), Data::Dictionary(b)) => a == b,
            (Data::Void, Data::Void) => true,
            _ => false,
        }
    }
}

/// The serialized rendering of a value. Void and errors emit nothing; the
/// renderer surfaces errors through the soft-error policy, not the output.
impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Bool(b) => write!(f, "{}", b),
            Data::Int(i) => write!(f, "{}", i),
            Data::Double(d) => write!(f, "{}", d),
            Data::String(s) => f.write_str(s),
            Data::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Data::Dictionary(map) => {
                // Sorted for stable output
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                f.write_str("{")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, map[*key])?;
                }
                f.write_str("}")
            }
            Data::Void | Data::Error(_) => Ok(()),
            Data::Lazy(lazy) => write!(f, "{}", lazy.force()),
        }
    }
}
