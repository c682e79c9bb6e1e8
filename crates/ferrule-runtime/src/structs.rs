//! Struct values
//!
//! A `StructValue` reads and writes fields of one native memory region
//! through a [`StructLayout`]. The region is either an allocation this
//! runtime owns (zero-filled on construction) or a foreign address wrapped
//! by a [`PointerHandle`]. Nested struct fields are views into the parent's
//! memory, so writing through them updates the parent in place.
//!
//! `StructByReference` and `ManagedStruct` adapt struct types for use as
//! `pointer` parameters and results.

use crate::convert::NativeConvert;
use crate::error::{FfiError, FfiResult};
use crate::layout::StructLayout;
use crate::memory::{self, RawBuffer};
use crate::pointer::{PointerHandle, ReleaseFn};
use crate::types::{NativeType, ScalarKind};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
enum MemorySource {
    Owned(Arc<RawBuffer>),
    Foreign(Arc<PointerHandle>),
}

/// One struct instance bound to native memory
#[derive(Clone)]
pub struct StructValue {
    layout: Arc<StructLayout>,
    source: MemorySource,
    /// Absolute address of the first byte
    base: usize,
}

impl StructValue {
    /// Allocate a zero-filled instance of `layout`
    pub fn new(layout: Arc<StructLayout>) -> FfiResult<Self> {
        let buffer = Arc::new(RawBuffer::zeroed(layout.size())?);
        let base = buffer.as_ptr() as usize;
        Ok(Self {
            layout,
            source: MemorySource::Owned(buffer),
            base,
        })
    }

    /// Take ownership of an already-filled buffer of at least `layout.size()`
    /// bytes
    pub(crate) fn from_buffer(layout: Arc<StructLayout>, buffer: Arc<RawBuffer>) -> Self {
        let base = buffer.as_ptr() as usize;
        Self {
            layout,
            source: MemorySource::Owned(buffer),
            base,
        }
    }

    /// View `layout` over memory the pointer refers to
    ///
    /// The pointer must not be NULL, and when its extent is known it must be
    /// at least `layout.size()` bytes.
    pub fn at(layout: Arc<StructLayout>, ptr: &Arc<PointerHandle>) -> FfiResult<Self> {
        if ptr.is_null() {
            return Err(FfiError::InvalidValue(
                "invalid memory access at NULL address".to_string(),
            ));
        }
        if let Some(extent) = ptr.size() {
            if extent < layout.size() {
                return Err(FfiError::InvalidValue(format!(
                    "memory of {} bytes is too small for struct of {} bytes",
                    extent,
                    layout.size()
                )));
            }
        }
        Ok(Self {
            base: ptr.address(),
            layout,
            source: MemorySource::Foreign(Arc::clone(ptr)),
        })
    }

    pub fn layout(&self) -> &Arc<StructLayout> {
        &self.layout
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn address(&self) -> usize {
        self.base
    }

    /// Field names in declaration order
    pub fn members(&self) -> Vec<Arc<str>> {
        self.layout.members()
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.layout.offset_of(name)
    }

    /// Pointer handle over this instance's memory
    pub fn pointer(&self) -> PointerHandle {
        match &self.source {
            MemorySource::Owned(buffer) => {
                PointerHandle::from_backing(Arc::clone(buffer), self.base, self.layout.size())
            }
            MemorySource::Foreign(ptr) => ptr.view(self.base - ptr.address()),
        }
    }

    /// Read one field
    pub fn get(&self, name: &str) -> FfiResult<Value> {
        let field = self
            .layout
            .field(name)
            .ok_or_else(|| FfiError::InvalidValue(format!("unknown field '{}'", name)))?;
        self.read_type(field.ty(), field.offset())
    }

    /// Write one field
    pub fn set(&self, name: &str, value: &Value) -> FfiResult<()> {
        let field = self
            .layout
            .field(name)
            .ok_or_else(|| FfiError::InvalidValue(format!("unknown field '{}'", name)))?;
        self.write_type(field.ty(), field.offset(), value)
    }

    /// All field values in declaration order
    pub fn values(&self) -> FfiResult<Vec<Value>> {
        self.layout
            .fields()
            .iter()
            .map(|f| self.read_type(f.ty(), f.offset()))
            .collect()
    }

    /// Zero the whole region
    pub fn clear(&self) {
        let base = self.base as *mut u8;
        // SAFETY: the source keeps the region alive and at least size() bytes
        unsafe { std::ptr::write_bytes(base, 0, self.layout.size()) };
    }

    fn read_type(&self, ty: &NativeType, offset: usize) -> FfiResult<Value> {
        let base = (self.base + offset) as *const u8;
        match ty {
            NativeType::Scalar(kind) => {
                // SAFETY: offset comes from the layout, which fits the region
                unsafe { memory::read_scalar(base, *kind) }
            }
            NativeType::Struct(inner) => Ok(Value::Struct(Self {
                layout: Arc::clone(inner),
                source: self.source.clone(),
                base: self.base + offset,
            })),
            NativeType::Array { elem, len } => {
                let stride = elem.size();
                let mut items = Vec::with_capacity(*len);
                for i in 0..*len {
                    items.push(self.read_type(elem, offset + i * stride)?);
                }
                Ok(Value::list(items))
            }
            NativeType::Function(_) => {
                // SAFETY: as above
                unsafe { memory::read_scalar(base, ScalarKind::Pointer) }
            }
            NativeType::Mapped(mapped) => {
                let raw = self.read_type(mapped.native_type(), offset)?;
                mapped.from_native(&raw)
            }
        }
    }

    fn write_type(&self, ty: &NativeType, offset: usize, value: &Value) -> FfiResult<()> {
        let base = (self.base + offset) as *mut u8;
        match ty {
            NativeType::Scalar(kind) => {
                // SAFETY: offset comes from the layout, which fits the region
                unsafe { memory::write_scalar(base, *kind, value) }
            }
            NativeType::Struct(inner) => match value {
                Value::Struct(other) if Arc::ptr_eq(other.layout(), inner) => {
                    let src = other.base as *const u8;
                    // SAFETY: both regions span at least inner.size() bytes
                    unsafe { std::ptr::copy(src, base, inner.size()) };
                    Ok(())
                }
                Value::Struct(_) => Err(FfiError::mismatch(
                    format!("struct of {} bytes", inner.size()),
                    "struct with a different layout",
                )),
                other => Err(FfiError::mismatch("struct", other.type_name())),
            },
            NativeType::Array { elem, len } => self.write_array(elem, *len, offset, value),
            NativeType::Function(_) => {
                // SAFETY: as above
                unsafe { memory::write_scalar(base, ScalarKind::Pointer, value) }
            }
            NativeType::Mapped(mapped) => {
                let raw = mapped.to_native(value)?;
                self.write_type(mapped.native_type(), offset, &raw)
            }
        }
    }

    fn write_array(
        &self,
        elem: &NativeType,
        len: usize,
        offset: usize,
        value: &Value,
    ) -> FfiResult<()> {
        match value {
            Value::List(items) => {
                if items.len() != len {
                    return Err(FfiError::InvalidValue(format!(
                        "array length mismatch: expected {}, got {}",
                        len,
                        items.len()
                    )));
                }
                let stride = elem.size();
                for (i, item) in items.iter().enumerate() {
                    self.write_type(elem, offset + i * stride, item)?;
                }
                Ok(())
            }
            // a char array accepts a string plus its terminating NUL
            Value::Str(s) if is_char_kind(elem) => {
                let bytes = s.as_bytes();
                if bytes.len() + 1 > len {
                    return Err(FfiError::InvalidValue(format!(
                        "string of {} bytes does not fit char[{}]",
                        bytes.len(),
                        len
                    )));
                }
                let base = (self.base + offset) as *mut u8;
                // SAFETY: bounds checked against the declared element count
                unsafe {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), base, bytes.len());
                    *base.add(bytes.len()) = 0;
                }
                Ok(())
            }
            other => Err(FfiError::mismatch("list", other.type_name())),
        }
    }
}

fn is_char_kind(ty: &NativeType) -> bool {
    matches!(
        ty.scalar(),
        Some(ScalarKind::Char) | Some(ScalarKind::UChar)
    )
}

impl PartialEq for StructValue {
    /// Identity comparison: same memory, same layout
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base && Arc::ptr_eq(&self.layout, &other.layout)
    }
}

impl fmt::Debug for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructValue")
            .field("address", &format_args!("{:#x}", self.base))
            .field("size", &self.layout.size())
            .field("union", &self.layout.is_union())
            .finish()
    }
}

/// Passes structs to native code by address
///
/// Parameters accept a struct value or null; results wrap the returned
/// address in a fresh struct view, or null when the address is NULL.
#[derive(Debug)]
pub struct StructByReference {
    layout: Arc<StructLayout>,
}

impl StructByReference {
    pub fn new(layout: Arc<StructLayout>) -> Self {
        Self { layout }
    }
}

impl NativeConvert for StructByReference {
    fn native_type(&self) -> NativeType {
        NativeType::Scalar(ScalarKind::Pointer)
    }

    fn to_native(&self, value: &Value) -> FfiResult<Value> {
        match value {
            Value::Struct(sv) if Arc::ptr_eq(sv.layout(), &self.layout) => {
                Ok(Value::Ptr(Arc::new(sv.pointer())))
            }
            Value::Struct(_) => Err(FfiError::mismatch(
                "struct with the declared layout",
                "struct with a different layout",
            )),
            Value::Null => Ok(Value::Null),
            other => Err(FfiError::mismatch("struct", other.type_name())),
        }
    }

    fn from_native(&self, value: &Value) -> FfiResult<Value> {
        match value {
            Value::Ptr(ptr) if ptr.is_null() => Ok(Value::Null),
            Value::Ptr(ptr) => Ok(Value::Struct(StructValue::at(
                Arc::clone(&self.layout),
                ptr,
            )?)),
            Value::Null => Ok(Value::Null),
            other => Err(FfiError::mismatch("pointer", other.type_name())),
        }
    }
}

/// Like [`StructByReference`], but returned addresses are wrapped with a
/// release function before the struct view is built
pub struct ManagedStruct {
    by_ref: StructByReference,
    releaser: Option<ReleaseFn>,
}

impl ManagedStruct {
    pub fn new(layout: Arc<StructLayout>, releaser: Option<ReleaseFn>) -> Self {
        Self {
            by_ref: StructByReference::new(layout),
            releaser,
        }
    }
}

impl NativeConvert for ManagedStruct {
    fn native_type(&self) -> NativeType {
        NativeType::Scalar(ScalarKind::Pointer)
    }

    fn to_native(&self, value: &Value) -> FfiResult<Value> {
        self.by_ref.to_native(value)
    }

    fn from_native(&self, value: &Value) -> FfiResult<Value> {
        match value {
            Value::Ptr(ptr) if ptr.is_null() => Ok(Value::Null),
            Value::Ptr(ptr) => {
                let managed = Arc::new(PointerHandle::managed(ptr, self.releaser.clone())?);
                Ok(Value::Struct(StructValue::at(
                    Arc::clone(&self.by_ref.layout),
                    &managed,
                )?))
            }
            Value::Null => Ok(Value::Null),
            other => Err(FfiError::mismatch("pointer", other.type_name())),
        }
    }
}

impl fmt::Debug for ManagedStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedStruct")
            .field("size", &self.by_ref.layout.size())
            .field("releaser", &self.releaser.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::StructLayoutBuilder;
    use pretty_assertions::assert_eq;

    fn point_layout() -> Arc<StructLayout> {
        let mut b = StructLayoutBuilder::new();
        b.add("x", ScalarKind::Int.into(), None).unwrap();
        b.add("y", ScalarKind::Int.into(), None).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_new_instance_is_zeroed() {
        let sv = StructValue::new(point_layout()).unwrap();
        assert_eq!(sv.get("x").unwrap(), Value::Int(0));
        assert_eq!(sv.get("y").unwrap(), Value::Int(0));
        assert_eq!(sv.size(), 8);
    }

    #[test]
    fn test_set_and_get_scalars() {
        let sv = StructValue::new(point_layout()).unwrap();
        sv.set("x", &Value::Int(-7)).unwrap();
        sv.set("y", &Value::Int(42)).unwrap();
        assert_eq!(sv.get("x").unwrap(), Value::Int(-7));
        assert_eq!(sv.get("y").unwrap(), Value::Int(42));
        assert_eq!(sv.values().unwrap(), vec![Value::Int(-7), Value::Int(42)]);
    }

    #[test]
    fn test_unknown_field() {
        let sv = StructValue::new(point_layout()).unwrap();
        let err = sv.get("z").unwrap_err();
        assert_eq!(err.to_string(), "invalid value: unknown field 'z'");
    }

    #[test]
    fn test_range_checked_write() {
        let mut b = StructLayoutBuilder::new();
        b.add("small", ScalarKind::Char.into(), None).unwrap();
        let sv = StructValue::new(b.build().unwrap()).unwrap();
        assert!(sv.set("small", &Value::Int(300)).is_err());
        sv.set("small", &Value::Int(-128)).unwrap();
        assert_eq!(sv.get("small").unwrap(), Value::Int(-128));
    }

    #[test]
    fn test_foreign_view_reads_same_memory() {
        let owner = StructValue::new(point_layout()).unwrap();
        owner.set("x", &Value::Int(11)).unwrap();

        let ptr = Arc::new(owner.pointer());
        let view = StructValue::at(point_layout(), &ptr).unwrap();
        assert_eq!(view.get("x").unwrap(), Value::Int(11));

        view.set("y", &Value::Int(5)).unwrap();
        assert_eq!(owner.get("y").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_view_rejects_null_and_short_memory() {
        let null = Arc::new(PointerHandle::null());
        assert!(StructValue::at(point_layout(), &null).is_err());

        let short = Arc::new(PointerHandle::alloc(4).unwrap());
        let err = StructValue::at(point_layout(), &short).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value: memory of 4 bytes is too small for struct of 8 bytes"
        );
    }

    #[test]
    fn test_nested_struct_writes_through() {
        let mut b = StructLayoutBuilder::new();
        b.add("tag", ScalarKind::Int.into(), None).unwrap();
        b.add("point", NativeType::Struct(point_layout()), None)
            .unwrap();
        let outer = StructValue::new(b.build().unwrap()).unwrap();

        match outer.get("point").unwrap() {
            Value::Struct(inner) => {
                inner.set("x", &Value::Int(9)).unwrap();
                assert_eq!(inner.address(), outer.address() + 4);
            }
            other => panic!("expected struct, got {:?}", other),
        }
        match outer.get("point").unwrap() {
            Value::Struct(inner) => assert_eq!(inner.get("x").unwrap(), Value::Int(9)),
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_struct_field_copy_requires_same_layout() {
        let layout = point_layout();
        let mut b = StructLayoutBuilder::new();
        b.add("point", NativeType::Struct(Arc::clone(&layout)), None)
            .unwrap();
        let outer = StructValue::new(b.build().unwrap()).unwrap();

        let src = StructValue::new(Arc::clone(&layout)).unwrap();
        src.set("x", &Value::Int(3)).unwrap();
        outer.set("point", &Value::Struct(src)).unwrap();
        match outer.get("point").unwrap() {
            Value::Struct(inner) => assert_eq!(inner.get("x").unwrap(), Value::Int(3)),
            other => panic!("expected struct, got {:?}", other),
        }

        // an equal but distinct layout does not match
        let other = StructValue::new(point_layout()).unwrap();
        assert!(outer.set("point", &Value::Struct(other)).is_err());
    }

    #[test]
    fn test_union_fields_overlay() {
        let mut b = StructLayoutBuilder::new();
        b.set_union(true);
        b.add("word", ScalarKind::UInt.into(), None).unwrap();
        b.add("byte", ScalarKind::UChar.into(), None).unwrap();
        let sv = StructValue::new(b.build().unwrap()).unwrap();

        sv.set("word", &Value::UInt(0x0102_0304)).unwrap();
        let low = sv.get("byte").unwrap();
        if cfg!(target_endian = "little") {
            assert_eq!(low, Value::UInt(0x04));
        } else {
            assert_eq!(low, Value::UInt(0x01));
        }
    }

    #[test]
    fn test_array_roundtrip() {
        let mut b = StructLayoutBuilder::new();
        b.add(
            "values",
            NativeType::Array {
                elem: Box::new(ScalarKind::Int.into()),
                len: 3,
            },
            None,
        )
        .unwrap();
        let sv = StructValue::new(b.build().unwrap()).unwrap();

        let items = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        sv.set("values", &items).unwrap();
        assert_eq!(sv.get("values").unwrap(), items);

        let short = Value::list(vec![Value::Int(1)]);
        let err = sv.set("values", &short).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value: array length mismatch: expected 3, got 1"
        );
    }

    #[test]
    fn test_char_array_accepts_string() {
        let mut b = StructLayoutBuilder::new();
        b.add(
            "name",
            NativeType::Array {
                elem: Box::new(ScalarKind::Char.into()),
                len: 8,
            },
            None,
        )
        .unwrap();
        let sv = StructValue::new(b.build().unwrap()).unwrap();

        sv.set("name", &Value::string("abc")).unwrap();
        assert_eq!(sv.pointer().read_string(0).unwrap(), "abc");

        let err = sv.set("name", &Value::string("much too long")).unwrap_err();
        assert!(matches!(err, FfiError::InvalidValue(_)));
    }

    #[test]
    fn test_clear_zeroes_all_fields() {
        let sv = StructValue::new(point_layout()).unwrap();
        sv.set("x", &Value::Int(1)).unwrap();
        sv.set("y", &Value::Int(2)).unwrap();
        sv.clear();
        assert_eq!(sv.values().unwrap(), vec![Value::Int(0), Value::Int(0)]);
    }

    #[test]
    fn test_identity_equality() {
        let layout = point_layout();
        let a = StructValue::new(Arc::clone(&layout)).unwrap();
        let b = a.clone();
        assert_eq!(a, b);

        let c = StructValue::new(layout).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_by_reference_converter() {
        let conv = StructByReference::new(point_layout());
        assert_eq!(conv.native_type(), NativeType::Scalar(ScalarKind::Pointer));
        assert_eq!(conv.to_native(&Value::Null).unwrap(), Value::Null);

        let null_ptr = Value::Ptr(Arc::new(PointerHandle::null()));
        assert_eq!(conv.from_native(&null_ptr).unwrap(), Value::Null);

        let err = conv.to_native(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, FfiError::TypeMismatch { .. }));
    }

    #[test]
    fn test_by_reference_roundtrip() {
        let layout = point_layout();
        let conv = StructByReference::new(Arc::clone(&layout));
        let sv = StructValue::new(Arc::clone(&layout)).unwrap();
        sv.set("x", &Value::Int(21)).unwrap();

        let ptr = conv.to_native(&Value::Struct(sv.clone())).unwrap();
        match conv.from_native(&ptr).unwrap() {
            Value::Struct(back) => {
                assert_eq!(back.address(), sv.address());
                assert_eq!(back.get("x").unwrap(), Value::Int(21));
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_managed_struct_requires_releaser() {
        let conv = ManagedStruct::new(point_layout(), None);
        let plain = unsafe { PointerHandle::from_address(0x1000) };
        let err = conv.from_native(&Value::Ptr(Arc::new(plain))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: no release function defined"
        );
    }

    #[test]
    fn test_managed_struct_releases_on_drop() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let releaser: ReleaseFn = Arc::new(|_| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        });

        let conv = ManagedStruct::new(point_layout(), Some(releaser));
        let plain = unsafe { PointerHandle::from_address(0x2000) };
        let wrapped = conv.from_native(&Value::Ptr(Arc::new(plain))).unwrap();
        drop(wrapped);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
