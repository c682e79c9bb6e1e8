//! Type name resolution
//!
//! A `TypeRegistry` maps names to `NativeType`s. The process-wide builtin
//! registry is constructed once; every other registry is an overlay with a
//! parent chain, so namespaces can shadow names without touching shared
//! state. Mutation needs `&mut` and happens at declaration time only.

use crate::convert::{MappedType, NativeConvert, StrPtrConverter};
use crate::error::{FfiError, FfiResult};
use crate::types::{NativeType, ScalarKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Builtin scalar names, including the fixed-width aliases
const SCALAR_NAMES: &[(&[&str], ScalarKind)] = &[
    (&["void"], ScalarKind::Void),
    (&["bool"], ScalarKind::Bool),
    (&["char", "schar", "int8"], ScalarKind::Char),
    (&["uchar", "uint8"], ScalarKind::UChar),
    (&["short", "sshort", "int16"], ScalarKind::Short),
    (&["ushort", "uint16"], ScalarKind::UShort),
    (&["int", "sint", "int32"], ScalarKind::Int),
    (&["uint", "uint32"], ScalarKind::UInt),
    (&["long", "slong"], ScalarKind::Long),
    (&["ulong"], ScalarKind::ULong),
    (&["long_long", "slong_long", "int64"], ScalarKind::LongLong),
    (&["ulong_long", "uint64"], ScalarKind::ULongLong),
    (&["float", "float32"], ScalarKind::Float),
    (&["double", "float64"], ScalarKind::Double),
    (&["pointer"], ScalarKind::Pointer),
    (&["string"], ScalarKind::String),
    (&["varargs"], ScalarKind::Varargs),
];

/// Name → type map with parent fallback
pub struct TypeRegistry {
    parent: Option<Arc<TypeRegistry>>,
    defs: HashMap<String, NativeType>,
    /// Converter identity → its mapped type, so repeated resolution of one
    /// converter instance yields the identical type
    mapped: Mutex<HashMap<usize, NativeType>>,
}

impl TypeRegistry {
    /// New registry that falls back to the builtin table
    pub fn new() -> Self {
        Self::with_parent(Self::builtin())
    }

    /// New registry that falls back to `parent`
    pub fn with_parent(parent: Arc<TypeRegistry>) -> Self {
        Self {
            parent: Some(parent),
            defs: HashMap::new(),
            mapped: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide builtin registry
    pub fn builtin() -> Arc<TypeRegistry> {
        static BUILTIN: OnceLock<Arc<TypeRegistry>> = OnceLock::new();
        BUILTIN
            .get_or_init(|| {
                Arc::new(TypeRegistry {
                    parent: None,
                    defs: builtin_table(),
                    mapped: Mutex::new(HashMap::new()),
                })
            })
            .clone()
    }

    /// Define or overwrite `name` in this registry
    ///
    /// Shadows a parent definition without touching the parent.
    pub fn define(&mut self, name: &str, ty: NativeType) -> FfiResult<()> {
        if name.is_empty() {
            return Err(FfiError::InvalidDeclaration(
                "type name cannot be empty".to_string(),
            ));
        }
        self.defs.insert(name.to_string(), ty);
        Ok(())
    }

    /// Define `name` as an alias for an existing type name
    pub fn alias(&mut self, existing: &str, name: &str) -> FfiResult<()> {
        let ty = self.resolve(existing)?;
        self.define(name, ty)
    }

    /// Define `name` as a converter-backed type and return it
    pub fn define_converter(
        &mut self,
        name: &str,
        converter: Arc<dyn NativeConvert>,
    ) -> FfiResult<NativeType> {
        let ty = self.mapped_type(converter);
        self.define(name, ty.clone())?;
        Ok(ty)
    }

    /// Resolve `name` through this registry and its parent chain
    pub fn resolve(&self, name: &str) -> FfiResult<NativeType> {
        let mut registry = Some(self);
        while let Some(r) = registry {
            if let Some(ty) = r.defs.get(name) {
                return Ok(ty.clone());
            }
            registry = r.parent.as_deref();
        }
        Err(FfiError::unknown_type(name))
    }

    /// True if `name` resolves through this registry or its parents
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Wrap a converter instance, memoized by converter identity
    pub fn mapped_type(&self, converter: Arc<dyn NativeConvert>) -> NativeType {
        let key = Arc::as_ptr(&converter) as *const () as usize;
        let mut cache = self.mapped_cache();
        cache
            .entry(key)
            .or_insert_with(|| NativeType::Mapped(Arc::new(MappedType::new(converter))))
            .clone()
    }

    fn mapped_cache(&self) -> MutexGuard<'_, HashMap<usize, NativeType>> {
        self.mapped.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_table() -> HashMap<String, NativeType> {
    let mut defs = HashMap::new();
    for (names, kind) in SCALAR_NAMES {
        for name in *names {
            defs.insert((*name).to_string(), NativeType::Scalar(*kind));
        }
    }
    defs.insert(
        "strptr".to_string(),
        NativeType::Mapped(Arc::new(MappedType::new(Arc::new(StrPtrConverter)))),
    );
    defs
}
