//! Ferrule Runtime - Dynamic native binding layer
//!
//! This library lets a managed host call into native libraries without
//! generated glue:
//! - Type names, typedefs, enums, and bitmasks in per-namespace registries
//! - Struct and union layout with packing and explicit offsets
//! - Pointer handles with deterministic, exactly-once release
//! - Function attachment over an ordered library search list
//! - Calls dispatched through libffi, including variadic functions

/// Ferrule runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod binding;
pub mod callback;
pub mod convert;
pub mod enums;
pub mod error;
pub mod invoke;
pub mod layout;
pub mod library;
pub mod memory;
pub mod pointer;
pub mod process;
pub mod registry;
pub mod structs;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use binding::{AttachedFunction, AttachedVariadic, GlobalVariable, Namespace};
pub use callback::CallbackSignature;
pub use convert::{MappedType, NativeConvert, StrPtrConverter};
pub use enums::{Enum, EnumItem, EnumSet};
pub use error::{FfiError, FfiResult};
pub use invoke::{Invoker, VariadicInvoker};
pub use layout::{StructField, StructLayout, StructLayoutBuilder};
pub use library::{DynamicLibrary, LibraryResolver, OpenFlags, CURRENT_PROCESS_NAME};
pub use pointer::{PointerHandle, ReleaseFn};
pub use process::{last_error, set_last_error, ForkHooks};
pub use registry::TypeRegistry;
pub use structs::{ManagedStruct, StructByReference, StructValue};
pub use types::{Convention, NativeType, ScalarKind};
pub use value::Value;
