//! Dynamic library loading
//!
//! Wraps `libloading` with open flags, a current-process handle, and
//! platform-specific name resolution. Symbol lookups return plain addresses;
//! a miss is `None` so callers can fall through to the next library.

use crate::error::{FfiError, FfiResult};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::os::raw::c_void;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(windows)]
const DL_PREFIX: &str = "";
#[cfg(not(windows))]
const DL_PREFIX: &str = "lib";

#[cfg(windows)]
const DL_EXTENSIONS: &[&str] = &["dll"];
#[cfg(target_os = "macos")]
const DL_EXTENSIONS: &[&str] = &["dylib", "so"];
#[cfg(all(unix, not(target_os = "macos")))]
const DL_EXTENSIONS: &[&str] = &["so"];

/// Display label for the current-process handle
pub const CURRENT_PROCESS_NAME: &str = "current process";

/// How a library is opened
///
/// Portable rendition of the `dlopen` mode bits. `NOW` wins over `LAZY`
/// when both are set; platforms without `dlopen` ignore the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    /// Resolve symbols on first use
    pub const LAZY: OpenFlags = OpenFlags(0b0001);
    /// Resolve all symbols at open time
    pub const NOW: OpenFlags = OpenFlags(0b0010);
    /// Make symbols available to later loads
    pub const GLOBAL: OpenFlags = OpenFlags(0b0100);
    /// Keep symbols out of the global namespace
    pub const LOCAL: OpenFlags = OpenFlags(0b1000);

    pub fn empty() -> Self {
        OpenFlags(0)
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Parse config-style flag names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> FfiResult<Self> {
        let mut flags = OpenFlags::empty();
        for name in names {
            flags |= match name.as_ref() {
                "lazy" => OpenFlags::LAZY,
                "now" => OpenFlags::NOW,
                "global" => OpenFlags::GLOBAL,
                "local" => OpenFlags::LOCAL,
                other => {
                    return Err(FfiError::Configuration(format!(
                        "unknown open flag '{}'",
                        other
                    )));
                }
            };
        }
        if flags == OpenFlags::empty() {
            flags = OpenFlags::default();
        }
        Ok(flags)
    }

    #[cfg(unix)]
    fn to_rtld(self) -> std::os::raw::c_int {
        use libloading::os::unix;
        let mut mode = if self.contains(OpenFlags::NOW) {
            unix::RTLD_NOW
        } else {
            unix::RTLD_LAZY
        };
        if self.contains(OpenFlags::GLOBAL) {
            mode |= unix::RTLD_GLOBAL;
        } else {
            mode |= unix::RTLD_LOCAL;
        }
        mode
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::LAZY | OpenFlags::LOCAL
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

/// One opened library (or the current process)
pub struct DynamicLibrary {
    inner: libloading::Library,
    name: String,
}

impl DynamicLibrary {
    /// Open `name`, or the current process when `name` is `None`
    ///
    /// The name is passed to the system loader as given; see
    /// [`LibraryResolver`] for search-path and naming-convention handling.
    pub fn open(name: Option<&str>, flags: OpenFlags) -> FfiResult<Self> {
        let inner = Self::open_inner(name, flags).map_err(|e| FfiError::LibraryLoad {
            name: name.unwrap_or(CURRENT_PROCESS_NAME).to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            inner,
            name: name.unwrap_or(CURRENT_PROCESS_NAME).to_string(),
        })
    }

    /// Handle over the symbols already linked into this process
    pub fn current_process() -> FfiResult<Self> {
        Self::open(None, OpenFlags::default())
    }

    #[cfg(unix)]
    fn open_inner(
        name: Option<&str>,
        flags: OpenFlags,
    ) -> Result<libloading::Library, libloading::Error> {
        use libloading::os::unix;
        let lib = match name {
            // SAFETY: opening a library runs its initializers; callers opt in
            // to executing that code by naming the library.
            Some(n) => unsafe { unix::Library::open(Some(n), flags.to_rtld())? },
            None => unix::Library::this(),
        };
        Ok(lib.into())
    }

    #[cfg(windows)]
    fn open_inner(
        name: Option<&str>,
        _flags: OpenFlags,
    ) -> Result<libloading::Library, libloading::Error> {
        use libloading::os::windows;
        match name {
            // SAFETY: as for the unix branch
            Some(n) => unsafe { libloading::Library::new(n) },
            None => windows::Library::this().map(Into::into),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of an exported function, `None` when the symbol is missing
    pub fn find_function(&self, symbol: &str) -> Option<usize> {
        self.symbol_address(symbol)
    }

    /// Address of an exported variable, `None` when the symbol is missing
    pub fn find_variable(&self, symbol: &str) -> Option<usize> {
        self.symbol_address(symbol)
    }

    fn symbol_address(&self, symbol: &str) -> Option<usize> {
        // SAFETY: the symbol is never called or dereferenced here; only its
        // address is taken.
        let sym = unsafe { self.inner.get::<*mut c_void>(symbol.as_bytes()) }.ok()?;
        let addr = *sym as usize;
        (addr != 0).then_some(addr)
    }
}

impl fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicLibrary")
            .field("name", &self.name)
            .finish()
    }
}

/// Opens libraries by short name, path, or platform-decorated name
///
/// Candidates are tried in order: the name as given (the system loader
/// applies its own search), the `lib`-prefixed platform spelling, then each
/// configured search path joined with both spellings. The first successful
/// open wins.
pub struct LibraryResolver {
    search_paths: Vec<PathBuf>,
    flags: OpenFlags,
}

impl Default for LibraryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryResolver {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
            flags: OpenFlags::default(),
        }
    }

    /// Search paths and default flags from the loaded configuration
    pub fn from_config(config: &ferrule_config::Config) -> FfiResult<Self> {
        let flags = match config.default_open_flags() {
            Some(names) => OpenFlags::from_names(names)?,
            None => OpenFlags::default(),
        };
        Ok(Self {
            search_paths: config.library_search_paths().to_vec(),
            flags,
        })
    }

    pub fn with_flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Open the first candidate spelling of `name` that loads
    pub fn open(&self, name: &str) -> FfiResult<Arc<DynamicLibrary>> {
        let mut last_reason = String::new();
        for candidate in self.candidates(name) {
            match DynamicLibrary::open(Some(&candidate), self.flags) {
                Ok(lib) => {
                    log::debug!("opened library '{}' as '{}'", name, candidate);
                    return Ok(Arc::new(lib));
                }
                Err(FfiError::LibraryLoad { reason, .. }) => last_reason = reason,
                Err(other) => return Err(other),
            }
        }
        log::warn!("could not open library '{}': {}", name, last_reason);
        Err(FfiError::LibraryLoad {
            name: name.to_string(),
            reason: last_reason,
        })
    }

    fn candidates(&self, name: &str) -> Vec<String> {
        let path = Path::new(name);
        if path.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
            return vec![name.to_string()];
        }

        let mut out = vec![name.to_string()];
        if let Some(soname) = soname_fallback(name) {
            out.push(soname.to_string());
        }
        let mut decorated = Vec::new();
        // "libm.so" and versioned sonames like "libm.so.6" are left alone
        let already_decorated = DL_EXTENSIONS.iter().any(|ext| {
            let dotted = format!(".{}", ext);
            name.ends_with(&dotted) || name.contains(&format!("{}.", dotted))
        });
        if !already_decorated {
            for ext in DL_EXTENSIONS {
                if DL_PREFIX.is_empty() || name.starts_with(DL_PREFIX) {
                    decorated.push(format!("{}.{}", name, ext));
                } else {
                    decorated.push(format!("{}{}.{}", DL_PREFIX, name, ext));
                    decorated.push(format!("{}.{}", name, ext));
                }
            }
        }
        out.extend(decorated.iter().cloned());

        for dir in &self.search_paths {
            let joined = dir.join(name);
            if joined.exists() {
                out.push(joined.to_string_lossy().into_owned());
            }
            for file in &decorated {
                let joined = dir.join(file);
                if joined.exists() {
                    out.push(joined.to_string_lossy().into_owned());
                }
            }
        }
        out
    }
}

impl fmt::Debug for LibraryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryResolver")
            .field("search_paths", &self.search_paths)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Known sonames for libraries whose unversioned symlink needs a dev package
#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn soname_fallback(name: &str) -> Option<&'static str> {
    match name {
        "c" => Some("libc.so.6"),
        "m" => Some("libm.so.6"),
        _ => None,
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn soname_fallback(_name: &str) -> Option<&'static str> {
    None
}
