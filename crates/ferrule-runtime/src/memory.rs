//! Raw memory for FFI data
//!
//! `RawBuffer` owns a zero-initialized heap allocation with malloc-compatible
//! alignment. Scalar loads and stores are shared by pointer reads, struct
//! field accessors, and argument lowering; they always use unaligned ops so
//! packed struct fields work.

use crate::error::{FfiError, FfiResult};
use crate::pointer::PointerHandle;
use crate::types::ScalarKind;
use crate::value::Value;
use std::alloc::{self, Layout};
use std::ffi::CStr;
use std::os::raw::{c_char, c_long, c_ulong};
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Allocation alignment, matching malloc on mainstream targets
const BUFFER_ALIGN: usize = 16;

/// Owned, zero-initialized native memory
pub struct RawBuffer {
    ptr: NonNull<u8>,
    size: usize,
    layout: Layout,
}

impl RawBuffer {
    /// Allocate `size` zeroed bytes
    pub fn zeroed(size: usize) -> FfiResult<Self> {
        if size == 0 {
            return Err(FfiError::InvalidValue(
                "cannot allocate zero bytes".to_string(),
            ));
        }
        let layout = Layout::from_size_align(size, BUFFER_ALIGN)
            .map_err(|e| FfiError::InvalidValue(format!("bad allocation request: {}", e)))?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| FfiError::InvalidValue(format!("allocation of {} bytes failed", size)))?;
        Ok(Self { ptr, size, layout })
    }

    /// Size of the allocation in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// View the whole allocation as a byte slice
    pub fn bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// Copy bytes out of the allocation
    pub fn read_bytes_at(&self, offset: usize, len: usize) -> FfiResult<Vec<u8>> {
        self.check_range(offset, len)?;
        Ok(self.bytes()[offset..offset + len].to_vec())
    }

    /// Copy bytes into the allocation
    pub fn write_bytes_at(&self, offset: usize, data: &[u8]) -> FfiResult<()> {
        self.check_range(offset, data.len())?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Zero the whole allocation
    pub fn clear(&self) {
        unsafe {
            ptr::write_bytes(self.ptr.as_ptr(), 0, self.size);
        }
    }

    fn check_range(&self, offset: usize, len: usize) -> FfiResult<()> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| FfiError::InvalidValue("memory access overflows".to_string()))?;
        if end > self.size {
            return Err(FfiError::InvalidValue(format!(
                "memory access at offset {} with length {} exceeds allocation of {} bytes",
                offset, len, self.size
            )));
        }
        Ok(())
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl std::fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBuffer")
            .field("address", &self.ptr.as_ptr())
            .field("size", &self.size)
            .finish()
    }
}

// The buffer is plain bytes; all mutation goes through raw pointer stores and
// callers serialize concurrent writes themselves, as with any native memory.
unsafe impl Send for RawBuffer {}
unsafe impl Sync for RawBuffer {}

/// Read one scalar from `base`
///
/// # Safety
///
/// `base` must be valid for reads of `kind.size()` bytes.
pub(crate) unsafe fn read_scalar(base: *const u8, kind: ScalarKind) -> FfiResult<Value> {
    let value = match kind {
        ScalarKind::Void | ScalarKind::Varargs => {
            return Err(FfiError::InvalidValue(format!(
                "cannot read a value of type {}",
                kind.name()
            )))
        }
        ScalarKind::Bool => Value::Bool(ptr::read_unaligned(base) != 0),
        ScalarKind::Char => Value::Int(ptr::read_unaligned(base as *const i8) as i64),
        ScalarKind::UChar => Value::UInt(ptr::read_unaligned(base) as u64),
        ScalarKind::Short => Value::Int(ptr::read_unaligned(base as *const i16) as i64),
        ScalarKind::UShort => Value::UInt(ptr::read_unaligned(base as *const u16) as u64),
        ScalarKind::Int => Value::Int(ptr::read_unaligned(base as *const i32) as i64),
        ScalarKind::UInt => Value::UInt(ptr::read_unaligned(base as *const u32) as u64),
        ScalarKind::Long => Value::Int(ptr::read_unaligned(base as *const c_long) as i64),
        ScalarKind::ULong => Value::UInt(ptr::read_unaligned(base as *const c_ulong) as u64),
        ScalarKind::LongLong => Value::Int(ptr::read_unaligned(base as *const i64)),
        ScalarKind::ULongLong => Value::UInt(ptr::read_unaligned(base as *const u64)),
        ScalarKind::Float => Value::Float(ptr::read_unaligned(base as *const f32) as f64),
        ScalarKind::Double => Value::Float(ptr::read_unaligned(base as *const f64)),
        ScalarKind::Pointer => {
            let addr = ptr::read_unaligned(base as *const usize);
            Value::Ptr(Arc::new(PointerHandle::from_address(addr)))
        }
        ScalarKind::String => {
            let addr = ptr::read_unaligned(base as *const *const c_char);
            if addr.is_null() {
                Value::Null
            } else {
                Value::Str(Arc::new(read_cstring(addr)))
            }
        }
    };
    Ok(value)
}

/// Write one scalar to `base`
///
/// # Safety
///
/// `base` must be valid for writes of `kind.size()` bytes.
pub(crate) unsafe fn write_scalar(base: *mut u8, kind: ScalarKind, value: &Value) -> FfiResult<()> {
    match kind {
        ScalarKind::Void | ScalarKind::Varargs => {
            return Err(FfiError::InvalidValue(format!(
                "cannot write a value of type {}",
                kind.name()
            )))
        }
        ScalarKind::Bool => match value {
            Value::Bool(b) => ptr::write_unaligned(base, *b as u8),
            other => return Err(FfiError::mismatch("bool", other.type_name())),
        },
        ScalarKind::Char => ptr::write_unaligned(base as *mut i8, int_in_range(value, kind)? as i8),
        ScalarKind::UChar => ptr::write_unaligned(base, int_in_range(value, kind)? as u8),
        ScalarKind::Short => {
            ptr::write_unaligned(base as *mut i16, int_in_range(value, kind)? as i16)
        }
        ScalarKind::UShort => {
            ptr::write_unaligned(base as *mut u16, int_in_range(value, kind)? as u16)
        }
        ScalarKind::Int => ptr::write_unaligned(base as *mut i32, int_in_range(value, kind)? as i32),
        ScalarKind::UInt => {
            ptr::write_unaligned(base as *mut u32, int_in_range(value, kind)? as u32)
        }
        ScalarKind::Long => {
            ptr::write_unaligned(base as *mut c_long, int_in_range(value, kind)? as c_long)
        }
        ScalarKind::ULong => {
            ptr::write_unaligned(base as *mut c_ulong, int_in_range(value, kind)? as c_ulong)
        }
        ScalarKind::LongLong => {
            ptr::write_unaligned(base as *mut i64, int_in_range(value, kind)? as i64)
        }
        ScalarKind::ULongLong => {
            ptr::write_unaligned(base as *mut u64, int_in_range(value, kind)? as u64)
        }
        ScalarKind::Float => ptr::write_unaligned(base as *mut f32, float_arg(value, kind)? as f32),
        ScalarKind::Double => ptr::write_unaligned(base as *mut f64, float_arg(value, kind)?),
        ScalarKind::Pointer => {
            let addr = match value {
                Value::Ptr(handle) => handle.address(),
                Value::Null => 0,
                other => return Err(FfiError::mismatch("pointer", other.type_name())),
            };
            ptr::write_unaligned(base as *mut usize, addr);
        }
        ScalarKind::String => {
            return Err(FfiError::InvalidValue(
                "string fields are read-only; use a pointer field to assign".to_string(),
            ))
        }
    }
    Ok(())
}

/// Coerce a value to an integer inside the range of `kind`
pub(crate) fn int_in_range(value: &Value, kind: ScalarKind) -> FfiResult<i128> {
    let n = value
        .as_int_exact()
        .ok_or_else(|| FfiError::mismatch(kind.name(), value.type_name()))?;
    let (lo, hi) = match kind.bounds() {
        Some(bounds) => bounds,
        None => {
            return Err(FfiError::InvalidValue(format!(
                "{} is not an integer type",
                kind.name()
            )))
        }
    };
    if n < lo || n > hi {
        return Err(FfiError::InvalidValue(format!(
            "{} out of range for {}",
            n,
            kind.name()
        )));
    }
    Ok(n)
}

/// Coerce a value to a float
pub(crate) fn float_arg(value: &Value, kind: ScalarKind) -> FfiResult<f64> {
    value
        .as_float_lossy()
        .ok_or_else(|| FfiError::mismatch(kind.name(), value.type_name()))
}

/// Read a NUL-terminated C string
///
/// # Safety
///
/// `ptr` must be non-null and point to a NUL-terminated string.
pub(crate) unsafe fn read_cstring(ptr: *const c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}
