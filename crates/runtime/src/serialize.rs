//! Serialization of decoded Values
//!
//! `TypedValue` is the data-only subset of [`Value`]: everything except
//! foreign object references and retained callables, which only mean
//! something inside the process (and runtime) that produced them.
//!
//! # Use Cases
//!
//! - **Snapshots**: persisting script-provided configuration tables
//! - **IPC**: handing decoded arguments to another process
//! - **Testing**: comparing decoded structures byte-for-byte
//!
//! Both table partitions are `BTreeMap`s, so the same logical table always
//! serializes to identical bytes.

use crate::value::{Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Error during serialization/deserialization
#[derive(Debug)]
pub enum SerializeError {
    /// Foreign pointers are only valid in this process
    ObjectNotSerializable,
    /// Registry handles are only valid in the runtime that issued them
    FunctionNotSerializable,
    /// Bincode encoding/decoding error (preserves original error for debugging)
    BincodeError(Box<bincode::Error>),
    /// Non-finite float (NaN or Infinity)
    NonFiniteFloat(f64),
}

impl std::fmt::Display for SerializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SerializeError::ObjectNotSerializable => {
                write!(f, "Objects cannot be serialized - foreign pointers")
            }
            SerializeError::FunctionNotSerializable => {
                write!(f, "Functions cannot be serialized - registry handles")
            }
            SerializeError::BincodeError(e) => write!(f, "Bincode error: {}", e),
            SerializeError::NonFiniteFloat(v) => {
                write!(f, "Cannot serialize non-finite float: {}", v)
            }
        }
    }
}

impl std::error::Error for SerializeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SerializeError::BincodeError(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<bincode::Error> for SerializeError {
    fn from(e: bincode::Error) -> Self {
        SerializeError::BincodeError(Box::new(e))
    }
}

/// Serializable mirror of [`Value`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TypedValue {
    Nil,
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Raw bytes, as the runtime stores strings
    String(Vec<u8>),
    Table {
        dict: BTreeMap<Vec<u8>, TypedValue>,
        array: BTreeMap<i64, TypedValue>,
    },
}

impl TypedValue {
    /// Convert from a decoded Value
    ///
    /// Fails on objects, functions and non-finite floats, anywhere in the
    /// structure.
    pub fn from_value(value: &Value) -> Result<Self, SerializeError> {
        match value {
            Value::Nil => Ok(TypedValue::Nil),
            Value::Int(v) => Ok(TypedValue::Int(*v)),
            Value::Float(v) => {
                if !v.is_finite() {
                    return Err(SerializeError::NonFiniteFloat(*v));
                }
                Ok(TypedValue::Float(*v))
            }
            Value::Boolean(v) => Ok(TypedValue::Bool(*v)),
            Value::String(s) => Ok(TypedValue::String(s.clone())),
            Value::Table(t) => {
                let mut dict = BTreeMap::new();
                for (k, v) in &t.dict {
                    dict.insert(k.clone(), TypedValue::from_value(v)?);
                }
                let mut array = BTreeMap::new();
                for (k, v) in &t.array {
                    array.insert(*k, TypedValue::from_value(v)?);
                }
                Ok(TypedValue::Table { dict, array })
            }
            Value::Object(_) => Err(SerializeError::ObjectNotSerializable),
            Value::Function(_) => Err(SerializeError::FunctionNotSerializable),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            TypedValue::Nil => Value::Nil,
            TypedValue::Int(v) => Value::Int(*v),
            TypedValue::Float(v) => Value::Float(*v),
            TypedValue::Bool(v) => Value::Boolean(*v),
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Table { dict, array } => Value::table(Table::new(
                dict.iter().map(|(k, v)| (k.clone(), v.to_value())).collect(),
                array.iter().map(|(k, v)| (*k, v.to_value())).collect(),
            )),
        }
    }

    /// Serialize to binary format (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        bincode::serialize(self).map_err(SerializeError::from)
    }

    /// Deserialize from binary format (bincode)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializeError> {
        bincode::deserialize(bytes).map_err(SerializeError::from)
    }
}

/// Extension trait for Value to add serialization methods
pub trait ValueSerialize {
    /// Convert to serializable TypedValue
    fn to_typed(&self) -> Result<TypedValue, SerializeError>;

    /// Serialize directly to bytes
    fn to_bytes(&self) -> Result<Vec<u8>, SerializeError>;
}

impl ValueSerialize for Value {
    fn to_typed(&self) -> Result<TypedValue, SerializeError> {
        TypedValue::from_value(self)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, SerializeError> {
        TypedValue::from_value(self)?.to_bytes()
    }
}
