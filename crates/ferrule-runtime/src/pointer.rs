//! Pointer handles with deterministic release
//!
//! A `PointerHandle` names one native address. Three flavors exist:
//! - owned: backed by a `RawBuffer` this runtime allocated
//! - managed: wraps a foreign address plus a release function that runs
//!   exactly once, either explicitly or when the last handle drops
//! - plain: a bare address with no ownership at all
//!
//! Release-function state lives behind a mutex so concurrent `release()`
//! calls still run the function only once.

use crate::error::{FfiError, FfiResult};
use crate::memory::{self, RawBuffer};
use crate::types::ScalarKind;
use crate::value::Value;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Release function for managed pointers
pub type ReleaseFn = Arc<dyn Fn(*mut c_void) + Send + Sync>;

#[derive(Default)]
struct ReleaseState {
    releaser: Option<ReleaseFn>,
    released: bool,
}

/// Handle to one native address
pub struct PointerHandle {
    address: usize,
    /// Known extent in bytes; `None` for foreign addresses
    size: Option<usize>,
    /// Keeps runtime-owned allocations alive for views and clones
    backing: Option<Arc<RawBuffer>>,
    state: Mutex<ReleaseState>,
    autorelease: AtomicBool,
    frozen: AtomicBool,
}

impl PointerHandle {
    /// Allocate `size` zeroed bytes owned by this handle
    pub fn alloc(size: usize) -> FfiResult<Self> {
        let buffer = Arc::new(RawBuffer::zeroed(size)?);
        Ok(Self {
            address: buffer.as_ptr() as usize,
            size: Some(size),
            backing: Some(buffer),
            state: Mutex::new(ReleaseState::default()),
            autorelease: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        })
    }

    /// The NULL pointer
    pub fn null() -> Self {
        Self {
            address: 0,
            size: None,
            backing: None,
            state: Mutex::new(ReleaseState::default()),
            autorelease: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }
    }

    /// Wrap a foreign address with no ownership
    ///
    /// # Safety
    ///
    /// Every later read and write through the handle trusts this address, so
    /// it must stay valid for as long as the handle (or any view of it) is
    /// used for access.
    pub unsafe fn from_address(address: usize) -> Self {
        Self {
            address,
            size: None,
            backing: None,
            state: Mutex::new(ReleaseState::default()),
            autorelease: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }
    }

    /// Handle over an existing owned buffer, starting at `address`
    pub(crate) fn from_backing(backing: Arc<RawBuffer>, address: usize, size: usize) -> Self {
        Self {
            address,
            size: Some(size),
            backing: Some(backing),
            state: Mutex::new(ReleaseState::default()),
            autorelease: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }
    }

    /// Attach a release function to a plain pointer
    ///
    /// The release function runs exactly once: on the first `release()` call,
    /// or on drop while autorelease is enabled. Owned and already-managed
    /// handles are rejected.
    pub fn with_releaser(inner: &PointerHandle, release: ReleaseFn) -> FfiResult<Self> {
        if inner.backing.is_some() {
            return Err(FfiError::mismatch("plain pointer", "owned allocation"));
        }
        if inner.has_releaser() {
            return Err(FfiError::mismatch("plain pointer", "managed pointer"));
        }
        Ok(Self {
            address: inner.address,
            size: inner.size,
            backing: None,
            state: Mutex::new(ReleaseState {
                releaser: Some(release),
                released: false,
            }),
            autorelease: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        })
    }

    /// Like [`PointerHandle::with_releaser`], but the release function is
    /// optional and its absence is a configuration error
    pub fn managed(inner: &PointerHandle, release: Option<ReleaseFn>) -> FfiResult<Self> {
        match release {
            Some(f) => Self::with_releaser(inner, f),
            None => Err(FfiError::Configuration(
                "no release function defined".to_string(),
            )),
        }
    }

    /// New handle at `self + offset`, sharing any owned backing
    ///
    /// Views never carry the release function; they go dangling if the
    /// managed parent is released.
    pub fn view(&self, offset: usize) -> Self {
        let size = self.size.and_then(|s| s.checked_sub(offset));
        Self {
            address: self.address.wrapping_add(offset),
            size,
            backing: self.backing.clone(),
            state: Mutex::new(ReleaseState::default()),
            autorelease: AtomicBool::new(true),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Known extent in bytes, if the runtime allocated this memory
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// True if this handle owns its allocation
    pub fn is_owned(&self) -> bool {
        self.backing.is_some()
    }

    /// True if a release function is still pending
    pub fn has_releaser(&self) -> bool {
        self.state().releaser.is_some()
    }

    /// True once the release function has run
    pub fn released(&self) -> bool {
        self.state().released
    }

    /// Run the release function now, if it has not run yet
    ///
    /// Returns true if it ran on this call.
    pub fn release(&self) -> bool {
        let releaser = {
            let mut state = self.state();
            match state.releaser.take() {
                Some(f) => {
                    state.released = true;
                    f
                }
                None => return false,
            }
        };
        releaser(self.address as *mut c_void);
        true
    }

    pub fn autorelease(&self) -> bool {
        self.autorelease.load(Ordering::Acquire)
    }

    /// Enable or disable release-on-drop
    ///
    /// Fails with `ImmutableState` once the handle is frozen.
    pub fn set_autorelease(&self, on: bool) -> FfiResult<bool> {
        if self.is_frozen() {
            return Err(FfiError::ImmutableState("pointer".to_string()));
        }
        self.autorelease.store(on, Ordering::Release);
        Ok(on)
    }

    /// Permanently lock the autorelease setting
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Read one scalar at `offset`
    pub fn read(&self, kind: ScalarKind, offset: usize) -> FfiResult<Value> {
        self.check_access(offset, kind.size())?;
        unsafe { memory::read_scalar((self.address + offset) as *const u8, kind) }
    }

    /// Write one scalar at `offset`
    pub fn write(&self, kind: ScalarKind, offset: usize, value: &Value) -> FfiResult<()> {
        self.check_access(offset, kind.size())?;
        unsafe { memory::write_scalar((self.address + offset) as *mut u8, kind, value) }
    }

    /// Read the NUL-terminated string starting at `offset`
    pub fn read_string(&self, offset: usize) -> FfiResult<String> {
        self.check_access(offset, 1)?;
        Ok(unsafe { memory::read_cstring((self.address + offset) as *const _) })
    }

    /// Write `s` plus a NUL terminator at `offset`
    pub fn write_string(&self, offset: usize, s: &str) -> FfiResult<()> {
        if s.as_bytes().contains(&0) {
            return Err(FfiError::InvalidValue(
                "string contains an interior NUL byte".to_string(),
            ));
        }
        self.check_access(offset, s.len() + 1)?;
        let base = (self.address + offset) as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(s.as_ptr(), base, s.len());
            *base.add(s.len()) = 0;
        }
        Ok(())
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read_bytes(&self, offset: usize, len: usize) -> FfiResult<Vec<u8>> {
        self.check_access(offset, len)?;
        let base = (self.address + offset) as *const u8;
        Ok(unsafe { std::slice::from_raw_parts(base, len) }.to_vec())
    }

    /// Copy `data` into memory starting at `offset`
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> FfiResult<()> {
        self.check_access(offset, data.len())?;
        let base = (self.address + offset) as *mut u8;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), base, data.len());
        }
        Ok(())
    }

    fn check_access(&self, offset: usize, len: usize) -> FfiResult<()> {
        if self.address == 0 {
            return Err(FfiError::InvalidValue(format!(
                "invalid memory access at NULL address (offset {})",
                offset
            )));
        }
        if let Some(size) = self.size {
            let end = offset
                .checked_add(len)
                .ok_or_else(|| FfiError::InvalidValue("memory access overflows".to_string()))?;
            if end > size {
                return Err(FfiError::InvalidValue(format!(
                    "memory access at offset {} with length {} exceeds allocation of {} bytes",
                    offset, len, size
                )));
            }
        }
        Ok(())
    }

    fn state(&self) -> MutexGuard<'_, ReleaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for PointerHandle {
    fn drop(&mut self) {
        if self.autorelease() {
            self.release();
        }
    }
}

impl PartialEq for PointerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PointerHandle {}

impl std::fmt::Debug for PointerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerHandle")
            .field("address", &format_args!("{:#x}", self.address))
            .field("size", &self.size)
            .field("owned", &self.is_owned())
            .field("released", &self.released())
            .finish()
    }
}
