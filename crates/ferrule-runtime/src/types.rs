//! Native type system for the FFI boundary
//!
//! Defines:
//! - `ScalarKind`: the built-in C scalar types
//! - `NativeType`: full type descriptions (scalars, aggregates, callbacks, mapped types)
//! - `Convention`: calling conventions for attached functions
//!
//! Sizes and alignments come from the Rust ABI types for the target, so
//! `long` is 4 bytes on LLP64 Windows and 8 bytes on LP64 Unix without any
//! platform tables here.

use crate::callback::CallbackSignature;
use crate::convert::MappedType;
use crate::layout::StructLayout;
use std::mem;
use std::os::raw::{c_long, c_ulong};
use std::sync::Arc;

/// Calling convention for attached functions and callbacks
///
/// `Stdcall` only changes code generation on 32-bit x86 Windows; everywhere
/// else it is accepted and behaves like `Default`. Symbol name decoration for
/// stdcall is applied during attachment regardless of target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Convention {
    #[default]
    Default,
    Stdcall,
}

/// Built-in C scalar kinds
///
/// `String` is pointer-sized and marks `char*` values that are converted to
/// and from runtime strings at the boundary. `Varargs` is a marker used only
/// in signature positions and never carries data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    Pointer,
    String,
    Varargs,
}

impl ScalarKind {
    /// Size in bytes on the current target
    pub fn size(&self) -> usize {
        match self {
            ScalarKind::Void => 1,
            ScalarKind::Bool => mem::size_of::<bool>(),
            ScalarKind::Char | ScalarKind::UChar => 1,
            ScalarKind::Short | ScalarKind::UShort => 2,
            ScalarKind::Int | ScalarKind::UInt => 4,
            ScalarKind::Long => mem::size_of::<c_long>(),
            ScalarKind::ULong => mem::size_of::<c_ulong>(),
            ScalarKind::LongLong | ScalarKind::ULongLong => 8,
            ScalarKind::Float => 4,
            ScalarKind::Double => 8,
            ScalarKind::Pointer | ScalarKind::String => mem::size_of::<*const ()>(),
            ScalarKind::Varargs => 0,
        }
    }

    /// Alignment in bytes on the current target
    pub fn alignment(&self) -> usize {
        match self {
            ScalarKind::Void => 1,
            ScalarKind::Bool => mem::align_of::<bool>(),
            ScalarKind::Char | ScalarKind::UChar => 1,
            ScalarKind::Short | ScalarKind::UShort => mem::align_of::<i16>(),
            ScalarKind::Int | ScalarKind::UInt => mem::align_of::<i32>(),
            ScalarKind::Long => mem::align_of::<c_long>(),
            ScalarKind::ULong => mem::align_of::<c_ulong>(),
            // i64/f64 are 4-aligned on x86-32 System V, 8-aligned elsewhere
            ScalarKind::LongLong | ScalarKind::ULongLong => mem::align_of::<i64>(),
            ScalarKind::Float => mem::align_of::<f32>(),
            ScalarKind::Double => mem::align_of::<f64>(),
            ScalarKind::Pointer | ScalarKind::String => mem::align_of::<*const ()>(),
            ScalarKind::Varargs => 1,
        }
    }

    /// Canonical display name
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Void => "void",
            ScalarKind::Bool => "bool",
            ScalarKind::Char => "char",
            ScalarKind::UChar => "uchar",
            ScalarKind::Short => "short",
            ScalarKind::UShort => "ushort",
            ScalarKind::Int => "int",
            ScalarKind::UInt => "uint",
            ScalarKind::Long => "long",
            ScalarKind::ULong => "ulong",
            ScalarKind::LongLong => "long_long",
            ScalarKind::ULongLong => "ulong_long",
            ScalarKind::Float => "float",
            ScalarKind::Double => "double",
            ScalarKind::Pointer => "pointer",
            ScalarKind::String => "string",
            ScalarKind::Varargs => "varargs",
        }
    }

    /// True for the integer kinds (excludes `Bool` and `Pointer`)
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScalarKind::Char
                | ScalarKind::UChar
                | ScalarKind::Short
                | ScalarKind::UShort
                | ScalarKind::Int
                | ScalarKind::UInt
                | ScalarKind::Long
                | ScalarKind::ULong
                | ScalarKind::LongLong
                | ScalarKind::ULongLong
        )
    }

    /// True for signed integer kinds
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            ScalarKind::Char
                | ScalarKind::Short
                | ScalarKind::Int
                | ScalarKind::Long
                | ScalarKind::LongLong
        )
    }

    /// True for `Float` and `Double`
    pub fn is_float(&self) -> bool {
        matches!(self, ScalarKind::Float | ScalarKind::Double)
    }

    /// Inclusive value range for integer kinds, `None` otherwise
    pub(crate) fn bounds(&self) -> Option<(i128, i128)> {
        let bits = (self.size() * 8) as u32;
        match self {
            k if k.is_integer() && k.is_signed() => {
                let max = (1i128 << (bits - 1)) - 1;
                Some((-max - 1, max))
            }
            k if k.is_integer() => Some((0, (1i128 << bits) - 1)),
            _ => None,
        }
    }
}

/// Full native type description
///
/// Cheap to clone; aggregate and mapped variants share their definitions
/// through `Arc`.
#[derive(Debug, Clone)]
pub enum NativeType {
    /// Built-in scalar
    Scalar(ScalarKind),
    /// Aggregate passed or stored by value
    Struct(Arc<StructLayout>),
    /// Fixed-length inline array (struct fields only)
    Array { elem: Box<NativeType>, len: usize },
    /// Callback function pointer with a declared signature
    Function(Arc<CallbackSignature>),
    /// Converter-backed type (enums, bitmasks, user converters)
    Mapped(Arc<MappedType>),
}

impl NativeType {
    /// Size in bytes on the current target
    pub fn size(&self) -> usize {
        match self {
            NativeType::Scalar(kind) => kind.size(),
            NativeType::Struct(layout) => layout.size(),
            NativeType::Array { elem, len } => elem.size() * len,
            NativeType::Function(_) => ScalarKind::Pointer.size(),
            NativeType::Mapped(mapped) => mapped.native_type().size(),
        }
    }

    /// Alignment in bytes on the current target
    pub fn alignment(&self) -> usize {
        match self {
            NativeType::Scalar(kind) => kind.alignment(),
            NativeType::Struct(layout) => layout.alignment(),
            NativeType::Array { elem, .. } => elem.alignment(),
            NativeType::Function(_) => ScalarKind::Pointer.alignment(),
            NativeType::Mapped(mapped) => mapped.native_type().alignment(),
        }
    }

    /// Underlying scalar kind, looking through mapped types
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            NativeType::Scalar(kind) => Some(*kind),
            NativeType::Mapped(mapped) => mapped.native_type().scalar(),
            _ => None,
        }
    }

    /// True if this is the `void` scalar
    pub fn is_void(&self) -> bool {
        matches!(self, NativeType::Scalar(ScalarKind::Void))
    }

    /// True if this is the `varargs` marker
    pub fn is_varargs(&self) -> bool {
        matches!(self, NativeType::Scalar(ScalarKind::Varargs))
    }

    /// Display name for error messages
    pub fn display_name(&self) -> String {
        match self {
            NativeType::Scalar(kind) => kind.name().to_string(),
            NativeType::Struct(layout) => format!("struct[{} bytes]", layout.size()),
            NativeType::Array { elem, len } => format!("{}[{}]", elem.display_name(), len),
            NativeType::Function(_) => "callback".to_string(),
            NativeType::Mapped(mapped) => mapped.native_type().display_name(),
        }
    }
}

// Manual PartialEq: aggregates and mapped types compare by definition
// identity, not structure. Two layouts built from identical declarations are
// still distinct types.
impl PartialEq for NativeType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NativeType::Scalar(a), NativeType::Scalar(b)) => a == b,
            (NativeType::Struct(a), NativeType::Struct(b)) => Arc::ptr_eq(a, b),
            (
                NativeType::Array { elem: ae, len: al },
                NativeType::Array { elem: be, len: bl },
            ) => al == bl && ae == be,
            (NativeType::Function(a), NativeType::Function(b)) => Arc::ptr_eq(a, b),
            (NativeType::Mapped(a), NativeType::Mapped(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<ScalarKind> for NativeType {
    fn from(kind: ScalarKind) -> Self {
        NativeType::Scalar(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_sizes() {
        assert_eq!(ScalarKind::Char.size(), 1);
        assert_eq!(ScalarKind::UChar.size(), 1);
        assert_eq!(ScalarKind::Short.size(), 2);
        assert_eq!(ScalarKind::UShort.size(), 2);
        assert_eq!(ScalarKind::Int.size(), 4);
        assert_eq!(ScalarKind::UInt.size(), 4);
        assert_eq!(ScalarKind::LongLong.size(), 8);
        assert_eq!(ScalarKind::ULongLong.size(), 8);
        assert_eq!(ScalarKind::Float.size(), 4);
        assert_eq!(ScalarKind::Double.size(), 8);
    }

    #[test]
    fn test_platform_dependent_sizes() {
        assert_eq!(ScalarKind::Pointer.size(), mem::size_of::<usize>());
        assert_eq!(ScalarKind::String.size(), mem::size_of::<usize>());
        assert_eq!(ScalarKind::Long.size(), mem::size_of::<c_long>());
        assert!(ScalarKind::Long.size() == 4 || ScalarKind::Long.size() == 8);
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(ScalarKind::Char.bounds(), Some((-128, 127)));
        assert_eq!(ScalarKind::UChar.bounds(), Some((0, 255)));
        assert_eq!(
            ScalarKind::LongLong.bounds(),
            Some((i64::MIN as i128, i64::MAX as i128))
        );
        assert_eq!(
            ScalarKind::ULongLong.bounds(),
            Some((0, u64::MAX as i128))
        );
        assert_eq!(ScalarKind::Double.bounds(), None);
        assert_eq!(ScalarKind::Pointer.bounds(), None);
    }

    #[test]
    fn test_signedness_classification() {
        assert!(ScalarKind::Int.is_signed());
        assert!(ScalarKind::Long.is_signed());
        assert!(!ScalarKind::UInt.is_signed());
        assert!(!ScalarKind::Bool.is_integer());
        assert!(!ScalarKind::Pointer.is_integer());
        assert!(ScalarKind::Float.is_float());
    }

    #[test]
    fn test_scalar_names() {
        assert_eq!(ScalarKind::LongLong.name(), "long_long");
        assert_eq!(ScalarKind::UChar.name(), "uchar");
        assert_eq!(ScalarKind::Pointer.name(), "pointer");
    }

    #[test]
    fn test_native_type_equality_is_identity_for_aggregates() {
        let a = NativeType::Scalar(ScalarKind::Int);
        let b = NativeType::Scalar(ScalarKind::Int);
        assert_eq!(a, b);

        let arr_a = NativeType::Array {
            elem: Box::new(ScalarKind::Char.into()),
            len: 4,
        };
        let arr_b = NativeType::Array {
            elem: Box::new(ScalarKind::Char.into()),
            len: 4,
        };
        let arr_c = NativeType::Array {
            elem: Box::new(ScalarKind::Char.into()),
            len: 8,
        };
        assert_eq!(arr_a, arr_b);
        assert_ne!(arr_a, arr_c);
    }
}
