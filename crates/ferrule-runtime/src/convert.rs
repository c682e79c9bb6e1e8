//! Value conversion at the FFI boundary
//!
//! `NativeConvert` is the contract for types that present one face to the
//! host and another to C: enums, bitmasks, struct-by-reference wrappers, and
//! user converters. A converter bundled with its delegate type is a
//! `MappedType`, which is what signatures and struct fields actually carry.

use crate::error::{FfiError, FfiResult};
use crate::types::{NativeType, ScalarKind};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// Two-way conversion between host values and native representations
///
/// `to_native` runs before a value is lowered into C memory or an argument
/// slot; `from_native` runs after a raw value comes back. Both default to
/// identity.
pub trait NativeConvert: Send + Sync {
    /// The native type values convert to and from
    fn native_type(&self) -> NativeType;

    fn to_native(&self, value: &Value) -> FfiResult<Value> {
        Ok(value.clone())
    }

    fn from_native(&self, value: &Value) -> FfiResult<Value> {
        Ok(value.clone())
    }
}

/// A converter paired with its delegate native type
///
/// The delegate is captured once at construction; converters must report a
/// stable `native_type`.
pub struct MappedType {
    converter: Arc<dyn NativeConvert>,
    native: NativeType,
}

impl MappedType {
    pub fn new(converter: Arc<dyn NativeConvert>) -> Self {
        let native = converter.native_type();
        Self { converter, native }
    }

    pub fn native_type(&self) -> &NativeType {
        &self.native
    }

    pub fn converter(&self) -> &Arc<dyn NativeConvert> {
        &self.converter
    }

    pub fn to_native(&self, value: &Value) -> FfiResult<Value> {
        self.converter.to_native(value)
    }

    pub fn from_native(&self, value: &Value) -> FfiResult<Value> {
        self.converter.from_native(value)
    }
}

impl fmt::Debug for MappedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MappedType({})", self.native.display_name())
    }
}

/// Decodes a returned `char*` into `[string-or-null, pointer]`
///
/// Keeping the pointer alongside the copied string lets the caller free the
/// native buffer afterwards, which a plain `string` return cannot do.
pub struct StrPtrConverter;

impl NativeConvert for StrPtrConverter {
    fn native_type(&self) -> NativeType {
        NativeType::Scalar(ScalarKind::Pointer)
    }

    fn from_native(&self, value: &Value) -> FfiResult<Value> {
        match value {
            Value::Ptr(handle) => {
                let text = if handle.is_null() {
                    Value::Null
                } else {
                    Value::Str(Arc::new(handle.read_string(0)?))
                };
                Ok(Value::list(vec![text, value.clone()]))
            }
            other => Err(FfiError::mismatch("pointer", other.type_name())),
        }
    }
}
