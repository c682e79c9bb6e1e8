//! Native call trampoline
//!
//! An `Invoker` pairs a function address with a call interface prepared once
//! at attach time. Arguments are marshaled into stable slots, the call goes
//! through `libffi`, and the raw return is rebuilt as a [`Value`].
//!
//! Integer returns narrower than a machine word come back widened to
//! `ffi_arg`, so every call writes into a word-aligned slot and the result
//! is truncated to the declared width afterwards. Struct returns are written
//! straight into a fresh [`StructValue`] allocation.
//!
//! Variadic functions cannot reuse one interface; `VariadicInvoker` re-preps
//! a CIF per call from the fixed parameters plus the promoted tail types.

use crate::error::{FfiError, FfiResult};
use crate::memory;
use crate::pointer::PointerHandle;
use crate::structs::StructValue;
use crate::types::{Convention, NativeType, ScalarKind};
use crate::value::Value;
use libffi::middle::{Cif, CodePtr, Type};
use libffi::{low, raw};
use std::ffi::CString;
use std::mem;
use std::os::raw::{c_long, c_void};
use std::sync::Arc;

/// libffi type for one declared type
fn ffi_type_of(ty: &NativeType) -> FfiResult<Type> {
    match ty {
        NativeType::Scalar(kind) => scalar_ffi_type(*kind),
        NativeType::Struct(layout) => {
            let mut fields = Vec::with_capacity(layout.fields().len());
            for field in layout.fields() {
                fields.push(ffi_type_of(field.ty())?);
            }
            Ok(Type::structure(fields))
        }
        NativeType::Array { elem, len } => {
            let elem_ty = ffi_type_of(elem)?;
            Ok(Type::structure(std::iter::repeat(elem_ty).take(*len)))
        }
        NativeType::Function(_) => Ok(Type::pointer()),
        NativeType::Mapped(mapped) => ffi_type_of(mapped.native_type()),
    }
}

fn scalar_ffi_type(kind: ScalarKind) -> FfiResult<Type> {
    Ok(match kind {
        ScalarKind::Void => Type::void(),
        ScalarKind::Bool | ScalarKind::UChar => Type::u8(),
        ScalarKind::Char => Type::i8(),
        ScalarKind::Short => Type::i16(),
        ScalarKind::UShort => Type::u16(),
        ScalarKind::Int => Type::i32(),
        ScalarKind::UInt => Type::u32(),
        ScalarKind::Long => {
            if mem::size_of::<c_long>() == 8 {
                Type::i64()
            } else {
                Type::i32()
            }
        }
        ScalarKind::ULong => {
            if mem::size_of::<c_long>() == 8 {
                Type::u64()
            } else {
                Type::u32()
            }
        }
        ScalarKind::LongLong => Type::i64(),
        ScalarKind::ULongLong => Type::u64(),
        ScalarKind::Float => Type::f32(),
        ScalarKind::Double => Type::f64(),
        ScalarKind::Pointer | ScalarKind::String => Type::pointer(),
        ScalarKind::Varargs => {
            return Err(FfiError::InvalidDeclaration(
                "varargs is not a concrete type".to_string(),
            ));
        }
    })
}

/// One marshaled argument with a stable address
enum ArgSlot {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Ptr(*mut c_void),
    /// Struct passed by value; the slot is the bytes themselves
    Blob(Vec<u8>),
}

impl ArgSlot {
    /// Address libffi reads the argument from; valid while the slot lives
    /// at a fixed location
    fn raw_ptr(&self) -> *mut c_void {
        match self {
            ArgSlot::I8(v) => v as *const i8 as *mut c_void,
            ArgSlot::U8(v) => v as *const u8 as *mut c_void,
            ArgSlot::I16(v) => v as *const i16 as *mut c_void,
            ArgSlot::U16(v) => v as *const u16 as *mut c_void,
            ArgSlot::I32(v) => v as *const i32 as *mut c_void,
            ArgSlot::U32(v) => v as *const u32 as *mut c_void,
            ArgSlot::I64(v) => v as *const i64 as *mut c_void,
            ArgSlot::U64(v) => v as *const u64 as *mut c_void,
            ArgSlot::F32(v) => v as *const f32 as *mut c_void,
            ArgSlot::F64(v) => v as *const f64 as *mut c_void,
            ArgSlot::Ptr(v) => v as *const *mut c_void as *mut c_void,
            ArgSlot::Blob(bytes) => bytes.as_ptr() as *mut c_void,
        }
    }
}

/// Keeps marshaled storage alive across the call
#[derive(Default)]
struct MarshalScope {
    cstrings: Vec<CString>,
}

impl MarshalScope {
    fn push_cstring(&mut self, s: &str) -> FfiResult<*mut c_void> {
        let cs = CString::new(s)
            .map_err(|_| FfiError::InvalidValue("string contains a NUL byte".to_string()))?;
        let ptr = cs.as_ptr() as *mut c_void;
        self.cstrings.push(cs);
        Ok(ptr)
    }
}

fn marshal_arg(ty: &NativeType, value: &Value, scope: &mut MarshalScope) -> FfiResult<ArgSlot> {
    match ty {
        NativeType::Scalar(kind) => marshal_scalar(*kind, value, scope),
        NativeType::Struct(layout) => match value {
            Value::Struct(sv) if Arc::ptr_eq(sv.layout(), layout) => {
                let base = sv.address() as *const u8;
                // SAFETY: the struct value keeps its memory alive and spans
                // layout.size() bytes
                let bytes =
                    unsafe { std::slice::from_raw_parts(base, layout.size()) }.to_vec();
                Ok(ArgSlot::Blob(bytes))
            }
            Value::Struct(_) => Err(FfiError::mismatch(
                "struct with the declared layout",
                "struct with a different layout",
            )),
            other => Err(FfiError::mismatch("struct", other.type_name())),
        },
        NativeType::Array { .. } => Err(FfiError::InvalidDeclaration(
            "arrays cannot be passed by value".to_string(),
        )),
        NativeType::Function(_) => marshal_scalar(ScalarKind::Pointer, value, scope),
        NativeType::Mapped(mapped) => {
            let converted = mapped.to_native(value)?;
            marshal_arg(mapped.native_type(), &converted, scope)
        }
    }
}

fn marshal_scalar(
    kind: ScalarKind,
    value: &Value,
    scope: &mut MarshalScope,
) -> FfiResult<ArgSlot> {
    match kind {
        ScalarKind::Bool => match value {
            Value::Bool(b) => Ok(ArgSlot::U8(*b as u8)),
            other => Err(FfiError::mismatch("bool", other.type_name())),
        },
        ScalarKind::Char => Ok(ArgSlot::I8(memory::int_in_range(value, kind)? as i8)),
        ScalarKind::UChar => Ok(ArgSlot::U8(memory::int_in_range(value, kind)? as u8)),
        ScalarKind::Short => Ok(ArgSlot::I16(memory::int_in_range(value, kind)? as i16)),
        ScalarKind::UShort => Ok(ArgSlot::U16(memory::int_in_range(value, kind)? as u16)),
        ScalarKind::Int => Ok(ArgSlot::I32(memory::int_in_range(value, kind)? as i32)),
        ScalarKind::UInt => Ok(ArgSlot::U32(memory::int_in_range(value, kind)? as u32)),
        ScalarKind::Long => {
            let n = memory::int_in_range(value, kind)?;
            if mem::size_of::<c_long>() == 8 {
                Ok(ArgSlot::I64(n as i64))
            } else {
                Ok(ArgSlot::I32(n as i32))
            }
        }
        ScalarKind::ULong => {
            let n = memory::int_in_range(value, kind)?;
            if mem::size_of::<c_long>() == 8 {
                Ok(ArgSlot::U64(n as u64))
            } else {
                Ok(ArgSlot::U32(n as u32))
            }
        }
        ScalarKind::LongLong => Ok(ArgSlot::I64(memory::int_in_range(value, kind)? as i64)),
        ScalarKind::ULongLong => Ok(ArgSlot::U64(memory::int_in_range(value, kind)? as u64)),
        ScalarKind::Float => Ok(ArgSlot::F32(memory::float_arg(value, kind)? as f32)),
        ScalarKind::Double => Ok(ArgSlot::F64(memory::float_arg(value, kind)?)),
        ScalarKind::Pointer => marshal_pointer(value, scope),
        ScalarKind::String => match value {
            Value::Null => Ok(ArgSlot::Ptr(std::ptr::null_mut())),
            Value::Str(s) => Ok(ArgSlot::Ptr(scope.push_cstring(s)?)),
            other => Err(FfiError::mismatch("string", other.type_name())),
        },
        ScalarKind::Void | ScalarKind::Varargs => Err(FfiError::InvalidDeclaration(format!(
            "{} is not a valid parameter type",
            kind.name()
        ))),
    }
}

fn marshal_pointer(value: &Value, scope: &mut MarshalScope) -> FfiResult<ArgSlot> {
    match value {
        Value::Null => Ok(ArgSlot::Ptr(std::ptr::null_mut())),
        Value::Ptr(handle) => Ok(ArgSlot::Ptr(handle.address() as *mut c_void)),
        Value::Str(s) => Ok(ArgSlot::Ptr(scope.push_cstring(s)?)),
        Value::Struct(sv) => Ok(ArgSlot::Ptr(sv.address() as *mut c_void)),
        Value::Int(n) => Ok(ArgSlot::Ptr(*n as usize as *mut c_void)),
        Value::UInt(n) => Ok(ArgSlot::Ptr(*n as usize as *mut c_void)),
        other => Err(FfiError::mismatch("pointer", other.type_name())),
    }
}

/// Dispatch through libffi and rebuild the declared return value
///
/// # Safety
///
/// `cif` must describe the function at `code`, and `raw_args` must hold one
/// valid argument slot per CIF parameter.
unsafe fn call_with_cif(
    cif: *mut raw::ffi_cif,
    code: CodePtr,
    raw_args: &mut [*mut c_void],
    result: &NativeType,
) -> FfiResult<Value> {
    if let NativeType::Mapped(mapped) = result {
        let raw = call_with_cif(cif, code, raw_args, mapped.native_type())?;
        return mapped.from_native(&raw);
    }

    if let NativeType::Struct(layout) = result {
        // small structs come back in registers and libffi stores the full
        // register block, so the buffer is padded to at least 16 bytes
        let buffer = Arc::new(memory::RawBuffer::zeroed(layout.size().max(16))?);
        raw::ffi_call(
            cif,
            Some(*code.as_safe_fun()),
            buffer.as_mut_ptr() as *mut c_void,
            raw_args.as_mut_ptr(),
        );
        return Ok(Value::Struct(StructValue::from_buffer(
            Arc::clone(layout),
            buffer,
        )));
    }

    // word-aligned slot; small integers come back widened to ffi_arg
    let mut slot = [0u64; 2];
    raw::ffi_call(
        cif,
        Some(*code.as_safe_fun()),
        slot.as_mut_ptr() as *mut c_void,
        raw_args.as_mut_ptr(),
    );
    let base = slot.as_ptr() as *const u8;
    let word = *(base as *const raw::ffi_arg) as u64;

    let kind = match result {
        NativeType::Scalar(kind) => *kind,
        NativeType::Function(_) => ScalarKind::Pointer,
        _ => unreachable!("struct and mapped returns handled above"),
    };
    Ok(match kind {
        ScalarKind::Void => Value::Null,
        ScalarKind::Bool => Value::Bool(word as u8 != 0),
        ScalarKind::Char => Value::Int(word as u8 as i8 as i64),
        ScalarKind::UChar => Value::UInt(word as u8 as u64),
        ScalarKind::Short => Value::Int(word as u16 as i16 as i64),
        ScalarKind::UShort => Value::UInt(word as u16 as u64),
        ScalarKind::Int => Value::Int(word as u32 as i32 as i64),
        ScalarKind::UInt => Value::UInt(word as u32 as u64),
        ScalarKind::Long => {
            if mem::size_of::<c_long>() == 8 {
                Value::Int(*(base as *const i64))
            } else {
                Value::Int(word as u32 as i32 as i64)
            }
        }
        ScalarKind::ULong => {
            if mem::size_of::<c_long>() == 8 {
                Value::UInt(*(base as *const u64))
            } else {
                Value::UInt(word as u32 as u64)
            }
        }
        ScalarKind::LongLong => Value::Int(*(base as *const i64)),
        ScalarKind::ULongLong => Value::UInt(*(base as *const u64)),
        ScalarKind::Float => Value::Float(*(base as *const f32) as f64),
        ScalarKind::Double => Value::Float(*(base as *const f64)),
        ScalarKind::Pointer => {
            let addr = *(base as *const usize);
            Value::Ptr(Arc::new(PointerHandle::from_address(addr)))
        }
        ScalarKind::String => {
            let addr = *(base as *const usize);
            if addr == 0 {
                Value::Null
            } else {
                Value::string(memory::read_cstring(addr as *const _))
            }
        }
        ScalarKind::Varargs => {
            return Err(FfiError::InvalidDeclaration(
                "varargs is not a valid return type".to_string(),
            ));
        }
    })
}

fn check_arity(expected: usize, got: usize) -> FfiResult<()> {
    if expected != got {
        return Err(FfiError::InvalidValue(format!(
            "wrong number of arguments ({} for {})",
            got, expected
        )));
    }
    Ok(())
}

#[cfg(all(windows, target_arch = "x86"))]
fn prepare_cif(params: &[NativeType], result: &NativeType, convention: Convention) -> FfiResult<Cif> {
    let mut args = Vec::with_capacity(params.len());
    for p in params {
        args.push(ffi_type_of(p)?);
    }
    let mut cif = Cif::new(args, ffi_type_of(result)?);
    if convention == Convention::Stdcall {
        cif.set_abi(raw::ffi_abi_FFI_STDCALL);
    }
    Ok(cif)
}

#[cfg(not(all(windows, target_arch = "x86")))]
fn prepare_cif(
    params: &[NativeType],
    result: &NativeType,
    _convention: Convention,
) -> FfiResult<Cif> {
    let mut args = Vec::with_capacity(params.len());
    for p in params {
        args.push(ffi_type_of(p)?);
    }
    Ok(Cif::new(args, ffi_type_of(result)?))
}

/// A fixed-arity native function ready to call
pub struct Invoker {
    cif: Cif,
    code: CodePtr,
    params: Vec<NativeType>,
    result: NativeType,
    blocking: bool,
}

// SAFETY: the code address and prepared CIF are immutable after
// construction; calls do not mutate shared state on this side.
unsafe impl Send for Invoker {}
unsafe impl Sync for Invoker {}

impl Invoker {
    pub fn new(
        address: usize,
        params: Vec<NativeType>,
        result: NativeType,
        convention: Convention,
        blocking: bool,
    ) -> FfiResult<Self> {
        if address == 0 {
            return Err(FfiError::InvalidValue(
                "cannot attach the NULL address".to_string(),
            ));
        }
        for p in &params {
            if p.is_varargs() {
                return Err(FfiError::InvalidDeclaration(
                    "variadic parameters require a variadic invoker".to_string(),
                ));
            }
            if p.is_void() {
                return Err(FfiError::InvalidDeclaration(
                    "void is not allowed as a parameter type".to_string(),
                ));
            }
        }
        let cif = prepare_cif(&params, &result, convention)?;
        Ok(Self {
            cif,
            code: CodePtr(address as *mut c_void),
            params,
            result,
            blocking,
        })
    }

    pub fn params(&self) -> &[NativeType] {
        &self.params
    }

    pub fn result(&self) -> &NativeType {
        &self.result
    }

    /// Whether the call is expected to block the calling thread for a while
    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn address(&self) -> usize {
        self.code.0 as usize
    }

    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        check_arity(self.params.len(), args.len())?;
        let mut scope = MarshalScope::default();
        let mut slots = Vec::with_capacity(args.len());
        for (ty, value) in self.params.iter().zip(args) {
            slots.push(marshal_arg(ty, value, &mut scope)?);
        }
        let mut raw_args: Vec<*mut c_void> = slots.iter().map(ArgSlot::raw_ptr).collect();
        // SAFETY: the CIF was prepared from self.params/self.result and each
        // slot outlives the call
        unsafe {
            call_with_cif(
                self.cif.as_raw_ptr(),
                self.code,
                &mut raw_args,
                &self.result,
            )
        }
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("arity", &self.params.len())
            .field("blocking", &self.blocking)
            .finish()
    }
}

/// A variadic native function; the CIF is re-prepared per call
pub struct VariadicInvoker {
    code: CodePtr,
    fixed: Vec<NativeType>,
    result: NativeType,
    blocking: bool,
}

// SAFETY: as for Invoker
unsafe impl Send for VariadicInvoker {}
unsafe impl Sync for VariadicInvoker {}

impl VariadicInvoker {
    /// `fixed` is the declared parameter list up to the varargs marker
    pub fn new(
        address: usize,
        fixed: Vec<NativeType>,
        result: NativeType,
        blocking: bool,
    ) -> FfiResult<Self> {
        if address == 0 {
            return Err(FfiError::InvalidValue(
                "cannot attach the NULL address".to_string(),
            ));
        }
        if fixed.is_empty() {
            return Err(FfiError::InvalidDeclaration(
                "variadic functions need at least one fixed parameter".to_string(),
            ));
        }
        for p in &fixed {
            if p.is_varargs() || p.is_void() {
                return Err(FfiError::InvalidDeclaration(format!(
                    "{} is not a valid parameter type",
                    p.display_name()
                )));
            }
        }
        Ok(Self {
            code: CodePtr(address as *mut c_void),
            fixed,
            result,
            blocking,
        })
    }

    pub fn fixed_params(&self) -> &[NativeType] {
        &self.fixed
    }

    pub fn result(&self) -> &NativeType {
        &self.result
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    /// Call with `tail_types` describing the variadic portion
    ///
    /// `args` covers the fixed parameters followed by the tail. Tail types
    /// go through the C default promotions: `float` to `double`, integers
    /// narrower than `int` to `int`.
    pub fn call(&self, tail_types: &[NativeType], args: &[Value]) -> FfiResult<Value> {
        check_arity(self.fixed.len() + tail_types.len(), args.len())?;

        let mut param_types: Vec<NativeType> = self.fixed.clone();
        for ty in tail_types {
            param_types.push(promote_vararg(ty)?);
        }

        let mut ffi_types = Vec::with_capacity(param_types.len());
        for ty in &param_types {
            ffi_types.push(ffi_type_of(ty)?);
        }
        let ret_type = ffi_type_of(&self.result)?;
        let mut raw_types: Vec<*mut raw::ffi_type> =
            ffi_types.iter().map(|t| t.as_raw_ptr()).collect();

        let mut cif: raw::ffi_cif = unsafe { mem::zeroed() };
        // SAFETY: the type arrays stay alive until the call below finishes
        unsafe {
            low::prep_cif_var(
                &mut cif,
                raw::ffi_abi_FFI_DEFAULT_ABI,
                self.fixed.len(),
                raw_types.len(),
                ret_type.as_raw_ptr(),
                raw_types.as_mut_ptr(),
            )
        }
        .map_err(|e| FfiError::InvalidDeclaration(format!("cannot prepare call: {:?}", e)))?;

        let mut scope = MarshalScope::default();
        let mut slots = Vec::with_capacity(args.len());
        for (ty, value) in param_types.iter().zip(args) {
            slots.push(marshal_arg(ty, value, &mut scope)?);
        }
        let mut raw_args: Vec<*mut c_void> = slots.iter().map(ArgSlot::raw_ptr).collect();
        // SAFETY: cif was prepared just above from param_types/result and
        // each slot outlives the call
        unsafe { call_with_cif(&mut cif, self.code, &mut raw_args, &self.result) }
    }
}

impl std::fmt::Debug for VariadicInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariadicInvoker")
            .field("address", &format_args!("{:#x}", self.code.0 as usize))
            .field("fixed_arity", &self.fixed.len())
            .finish()
    }
}

/// C default argument promotions for the variadic tail
fn promote_vararg(ty: &NativeType) -> FfiResult<NativeType> {
    let promoted = match ty.scalar() {
        Some(ScalarKind::Float) => ScalarKind::Double.into(),
        Some(ScalarKind::Bool)
        | Some(ScalarKind::Char)
        | Some(ScalarKind::Short) => ScalarKind::Int.into(),
        Some(ScalarKind::UChar) | Some(ScalarKind::UShort) => ScalarKind::Int.into(),
        Some(ScalarKind::Void) | Some(ScalarKind::Varargs) => {
            return Err(FfiError::InvalidDeclaration(format!(
                "{} is not a valid variadic argument type",
                ty.display_name()
            )));
        }
        _ => ty.clone(),
    };
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    extern "C" fn add_ints(a: i32, b: i32) -> i32 {
        a.wrapping_add(b)
    }

    extern "C" fn negate_u8(v: u8) -> u8 {
        !v
    }

    extern "C" fn half(v: f64) -> f64 {
        v / 2.0
    }

    extern "C" fn float_to_bits(v: f32) -> u32 {
        v.to_bits()
    }

    extern "C" fn string_length(s: *const std::os::raw::c_char) -> i64 {
        if s.is_null() {
            return -1;
        }
        // SAFETY: tests always pass a NUL-terminated string
        unsafe { std::ffi::CStr::from_ptr(s) }.to_bytes().len() as i64
    }

    extern "C" fn bump_first_byte(p: *mut u8) {
        if !p.is_null() {
            // SAFETY: tests pass writable single-byte allocations
            unsafe { *p = (*p).wrapping_add(1) };
        }
    }

    extern "C" fn nothing() {}

    fn attach(
        f: usize,
        params: Vec<NativeType>,
        result: NativeType,
    ) -> Invoker {
        Invoker::new(f, params, result, Convention::Default, false).unwrap()
    }

    #[test]
    fn test_int_call() {
        let inv = attach(
            add_ints as usize,
            vec![ScalarKind::Int.into(), ScalarKind::Int.into()],
            ScalarKind::Int.into(),
        );
        let out = inv.call(&[Value::Int(40), Value::Int(2)]).unwrap();
        assert_eq!(out, Value::Int(42));

        let out = inv.call(&[Value::Int(-5), Value::Int(3)]).unwrap();
        assert_eq!(out, Value::Int(-2));
    }

    #[test]
    fn test_narrow_unsigned_return() {
        let inv = attach(
            negate_u8 as usize,
            vec![ScalarKind::UChar.into()],
            ScalarKind::UChar.into(),
        );
        assert_eq!(inv.call(&[Value::UInt(0)]).unwrap(), Value::UInt(0xFF));
        assert_eq!(inv.call(&[Value::UInt(0xF0)]).unwrap(), Value::UInt(0x0F));
    }

    #[test]
    fn test_double_roundtrip() {
        let inv = attach(
            half as usize,
            vec![ScalarKind::Double.into()],
            ScalarKind::Double.into(),
        );
        assert_eq!(inv.call(&[Value::Float(5.0)]).unwrap(), Value::Float(2.5));
        // integer arguments widen to double
        assert_eq!(inv.call(&[Value::Int(8)]).unwrap(), Value::Float(4.0));
    }

    #[test]
    fn test_float_argument_is_not_promoted_when_declared() {
        let inv = attach(
            float_to_bits as usize,
            vec![ScalarKind::Float.into()],
            ScalarKind::UInt.into(),
        );
        let out = inv.call(&[Value::Float(1.0)]).unwrap();
        assert_eq!(out, Value::UInt(1.0f32.to_bits() as u64));
    }

    #[test]
    fn test_string_argument() {
        let inv = attach(
            string_length as usize,
            vec![ScalarKind::String.into()],
            ScalarKind::LongLong.into(),
        );
        let out = inv.call(&[Value::string("hello")]).unwrap();
        assert_eq!(out, Value::Int(5));
        assert_eq!(inv.call(&[Value::Null]).unwrap(), Value::Int(-1));

        let err = inv
            .call(&[Value::string("he\0llo")])
            .unwrap_err();
        assert!(matches!(err, FfiError::InvalidValue(_)));
    }

    #[test]
    fn test_pointer_argument_writes_through() {
        let inv = attach(
            bump_first_byte as usize,
            vec![ScalarKind::Pointer.into()],
            ScalarKind::Void.into(),
        );
        let buf = Arc::new(PointerHandle::alloc(1).unwrap());
        buf.write(ScalarKind::UChar, 0, &Value::UInt(9)).unwrap();
        let out = inv.call(&[Value::Ptr(Arc::clone(&buf))]).unwrap();
        assert_eq!(out, Value::Null);
        assert_eq!(buf.read(ScalarKind::UChar, 0).unwrap(), Value::UInt(10));
    }

    #[test]
    fn test_void_call() {
        let inv = attach(nothing as usize, vec![], ScalarKind::Void.into());
        assert_eq!(inv.call(&[]).unwrap(), Value::Null);
    }

    #[test]
    fn test_arity_mismatch() {
        let inv = attach(
            add_ints as usize,
            vec![ScalarKind::Int.into(), ScalarKind::Int.into()],
            ScalarKind::Int.into(),
        );
        let err = inv.call(&[Value::Int(1)]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value: wrong number of arguments (1 for 2)"
        );
    }

    #[test]
    fn test_null_address_rejected() {
        let err = Invoker::new(
            0,
            vec![],
            ScalarKind::Void.into(),
            Convention::Default,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, FfiError::InvalidValue(_)));
    }

    #[test]
    fn test_varargs_param_needs_variadic_invoker() {
        let err = Invoker::new(
            nothing as usize,
            vec![ScalarKind::Varargs.into()],
            ScalarKind::Void.into(),
            Convention::Default,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, FfiError::InvalidDeclaration(_)));
    }

    #[test]
    fn test_promotions() {
        let d = promote_vararg(&ScalarKind::Float.into()).unwrap();
        assert_eq!(d, ScalarKind::Double.into());
        let i = promote_vararg(&ScalarKind::Char.into()).unwrap();
        assert_eq!(i, ScalarKind::Int.into());
        let kept = promote_vararg(&ScalarKind::Double.into()).unwrap();
        assert_eq!(kept, ScalarKind::Double.into());
        assert!(promote_vararg(&ScalarKind::Void.into()).is_err());
    }

    #[test]
    fn test_struct_by_value_argument() {
        use crate::layout::StructLayoutBuilder;

        #[repr(C)]
        struct Pair {
            a: i32,
            b: i32,
        }

        extern "C" fn pair_sum(p: Pair) -> i32 {
            p.a + p.b
        }

        let mut b = StructLayoutBuilder::new();
        b.add("a", ScalarKind::Int.into(), None).unwrap();
        b.add("b", ScalarKind::Int.into(), None).unwrap();
        let layout = b.build().unwrap();

        let sv = StructValue::new(Arc::clone(&layout)).unwrap();
        sv.set("a", &Value::Int(30)).unwrap();
        sv.set("b", &Value::Int(12)).unwrap();

        let inv = attach(
            pair_sum as usize,
            vec![NativeType::Struct(Arc::clone(&layout))],
            ScalarKind::Int.into(),
        );
        let out = inv.call(&[Value::Struct(sv)]).unwrap();
        assert_eq!(out, Value::Int(42));
    }

    #[test]
    fn test_struct_return() {
        use crate::layout::StructLayoutBuilder;

        #[repr(C)]
        struct Pair {
            a: i32,
            b: i32,
        }

        extern "C" fn make_pair(a: i32, b: i32) -> Pair {
            Pair { a, b }
        }

        let mut builder = StructLayoutBuilder::new();
        builder.add("a", ScalarKind::Int.into(), None).unwrap();
        builder.add("b", ScalarKind::Int.into(), None).unwrap();
        let layout = builder.build().unwrap();

        let inv = attach(
            make_pair as usize,
            vec![ScalarKind::Int.into(), ScalarKind::Int.into()],
            NativeType::Struct(layout),
        );
        match inv.call(&[Value::Int(7), Value::Int(9)]).unwrap() {
            Value::Struct(sv) => {
                assert_eq!(sv.get("a").unwrap(), Value::Int(7));
                assert_eq!(sv.get("b").unwrap(), Value::Int(9));
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }
}
