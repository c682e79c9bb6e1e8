//! Error taxonomy for the FFI runtime
//!
//! Every fallible operation in this crate reports one of the variants below.
//! The split mirrors how callers recover:
//! - `UnknownType` / `InvalidDeclaration`: the binding description is wrong
//! - `InvalidValue` / `TypeMismatch`: a runtime value cannot cross the boundary
//! - `SymbolNotFound` / `LibraryLoad`: the native side is missing something
//! - `Configuration` / `ImmutableState`: the runtime object is set up wrong

use thiserror::Error;

/// FFI runtime errors
#[derive(Error, Debug)]
pub enum FfiError {
    /// A type name could not be resolved against the registry chain
    #[error("unable to resolve type '{name}'")]
    UnknownType { name: String },

    /// A declaration (enum, struct layout, callback, attach) is malformed
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),

    /// A runtime value cannot be lowered to the declared native type
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A symbol was probed in every library of a namespace without a hit
    #[error("symbol '{symbol}' not found in [{libs}]", libs = .libraries.join(", "))]
    SymbolNotFound {
        symbol: String,
        libraries: Vec<String>,
    },

    /// A runtime object is missing required setup (e.g. a release function)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Mutation was attempted on a frozen object
    #[error("can't modify frozen {0}")]
    ImmutableState(String),

    /// A value had the wrong shape for the declared type
    #[error("wrong argument type {got} (expected {expected})")]
    TypeMismatch { expected: String, got: String },

    /// The dynamic loader rejected a library
    #[error("could not open library '{name}': {reason}")]
    LibraryLoad { name: String, reason: String },
}

/// Result type for FFI runtime operations
pub type FfiResult<T> = Result<T, FfiError>;

impl FfiError {
    /// Shorthand for `UnknownType`
    pub fn unknown_type(name: impl Into<String>) -> Self {
        FfiError::UnknownType { name: name.into() }
    }

    /// Shorthand for `TypeMismatch`
    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        FfiError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}
