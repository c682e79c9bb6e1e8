//! Process-level state
//!
//! Thread-local error codes from the last native call, and an explicit hook
//! registry for embedders that fork: the child must be given a chance to
//! drop state that does not survive duplication, so hooks registered here
//! are run by the embedder in the child right after the fork.

use std::sync::{Mutex, PoisonError};

/// The calling thread's error code from the last native call
///
/// Reads `errno` on unix and `GetLastError` on windows.
pub fn last_error() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Overwrite the calling thread's error code
pub fn set_last_error(code: i32) {
    // SAFETY: the location is valid and owned by the current thread
    #[cfg(unix)]
    unsafe {
        *errno_location() = code;
    }
    #[cfg(windows)]
    unsafe {
        win::SetLastError(code as u32);
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn errno_location() -> *mut i32 {
    // SAFETY: always returns a valid thread-local location
    unsafe { libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno_location() -> *mut i32 {
    // SAFETY: always returns a valid thread-local location
    unsafe { libc::__error() }
}

#[cfg(windows)]
mod win {
    #[link(name = "kernel32")]
    extern "system" {
        pub fn SetLastError(code: u32);
    }
}

type ForkHook = Box<dyn Fn() + Send + Sync>;

/// Hooks to run in a forked child
///
/// Nothing here installs `pthread_atfork` handlers; the embedder decides
/// when a fork happened and calls [`ForkHooks::run_child`] itself.
#[derive(Default)]
pub struct ForkHooks {
    child: Mutex<Vec<ForkHook>>,
}

impl ForkHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; hooks run in registration order
    pub fn on_child(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.guard().push(Box::new(hook));
    }

    /// Run every child hook; call once in the child after a fork
    pub fn run_child(&self) {
        let hooks = self.guard();
        for hook in hooks.iter() {
            hook();
        }
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<ForkHook>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ForkHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForkHooks")
            .field("child", &self.len())
            .finish()
    }
}
