//! Runtime value representation
//!
//! Values crossing the FFI boundary in either direction.
//! - Null, Bool, Int, UInt, Float: immediate values
//! - Str: heap-allocated, reference-counted, immutable
//! - Symbol: interned-style name (enum members, field names)
//! - List: shared vector (bitmask symbol sets, varargs bundles)
//! - Ptr: shared pointer handle, compared by address
//! - Struct: view over native memory described by a layout
//!
//! # Equality contract
//!
//! `Int` and `UInt` compare numerically with each other, so a value read back
//! from an unsigned field equals the signed literal a test wrote. `Float`
//! only equals `Float`. `Ptr` compares by address. `Struct` compares by
//! layout identity plus base address, never by contents.

use crate::pointer::PointerHandle;
use crate::structs::StructValue;
use std::sync::Arc;

/// A runtime value at the FFI boundary
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Arc<String>),
    Symbol(Arc<str>),
    List(Arc<Vec<Value>>),
    Ptr(Arc<PointerHandle>),
    Struct(StructValue),
}

impl Value {
    /// Build a `Str` value
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(Arc::new(s.into()))
    }

    /// Build a `Symbol` value
    pub fn symbol(name: &str) -> Self {
        Value::Symbol(Arc::from(name))
    }

    /// Build a `List` value
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Ptr(_) => "pointer",
            Value::Struct(_) => "struct",
        }
    }

    /// Exact integer view; floats never coerce
    pub fn as_int_exact(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(*n as i128),
            Value::UInt(n) => Some(*n as i128),
            _ => None,
        }
    }

    /// Float view, widening integers
    pub fn as_float_lossy(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::UInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<&Arc<PointerHandle>> {
        match self {
            Value::Ptr(handle) => Some(handle),
            _ => None,
        }
    }
}

// Manual PartialEq for the documented contract; raw pointer and f64 fields
// rule out deriving it anyway.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
                *a >= 0 && *a as u64 == *b
            }
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::new(s))
    }
}
