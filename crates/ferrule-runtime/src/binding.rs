//! Namespace bindings
//!
//! A `Namespace` collects the declarations one native API needs: libraries
//! to search, a calling convention, typedefs, enums and bitmasks, callback
//! types, and finally attached functions and variables. Declarations are
//! evaluated in order, so later ones can refer to types the earlier ones
//! registered.
//!
//! Symbol lookup walks the library list; a miss in one library falls through
//! to the next, and only a miss in all of them is an error naming every
//! library searched. Under the stdcall convention each library is probed
//! with the decorated spellings as well.

use crate::callback::CallbackSignature;
use crate::convert::NativeConvert;
use crate::enums::{Enum, EnumItem, EnumSet};
use crate::error::{FfiError, FfiResult};
use crate::invoke::{Invoker, VariadicInvoker};
use crate::layout::StructLayout;
use crate::library::{DynamicLibrary, LibraryResolver};
use crate::pointer::PointerHandle;
use crate::registry::TypeRegistry;
use crate::structs::{StructByReference, StructValue};
use crate::types::{Convention, NativeType, ScalarKind};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One function bound to a resolved symbol
#[derive(Debug)]
pub struct AttachedFunction {
    name: String,
    library: String,
    invoker: Invoker,
}

impl AttachedFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name of the library the symbol was found in
    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn invoker(&self) -> &Invoker {
        &self.invoker
    }

    pub fn call(&self, args: &[Value]) -> FfiResult<Value> {
        self.invoker.call(args)
    }
}

/// One variadic function bound to a resolved symbol
#[derive(Debug)]
pub struct AttachedVariadic {
    name: String,
    library: String,
    invoker: VariadicInvoker,
}

impl AttachedVariadic {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn invoker(&self) -> &VariadicInvoker {
        &self.invoker
    }

    pub fn call(&self, tail_types: &[NativeType], args: &[Value]) -> FfiResult<Value> {
        self.invoker.call(tail_types, args)
    }
}

/// One global variable bound to a resolved symbol
pub struct GlobalVariable {
    name: String,
    library: String,
    ty: NativeType,
    ptr: Arc<PointerHandle>,
}

impl GlobalVariable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn address(&self) -> usize {
        self.ptr.address()
    }

    pub fn read(&self) -> FfiResult<Value> {
        match &self.ty {
            NativeType::Scalar(kind) => self.ptr.read(*kind, 0),
            NativeType::Struct(layout) => Ok(Value::Struct(StructValue::at(
                Arc::clone(layout),
                &self.ptr,
            )?)),
            NativeType::Mapped(mapped) => {
                let raw = self.read_underlying(mapped.native_type())?;
                mapped.from_native(&raw)
            }
            other => Err(FfiError::InvalidDeclaration(format!(
                "{} is not a valid variable type",
                other.display_name()
            ))),
        }
    }

    pub fn write(&self, value: &Value) -> FfiResult<()> {
        match &self.ty {
            NativeType::Scalar(kind) => self.ptr.write(*kind, 0, value),
            NativeType::Struct(_) => Err(FfiError::InvalidValue(
                "assign struct globals through their fields".to_string(),
            )),
            NativeType::Mapped(mapped) => {
                let raw = mapped.to_native(value)?;
                self.write_underlying(mapped.native_type(), &raw)
            }
            other => Err(FfiError::InvalidDeclaration(format!(
                "{} is not a valid variable type",
                other.display_name()
            ))),
        }
    }

    fn read_underlying(&self, ty: &NativeType) -> FfiResult<Value> {
        match ty {
            NativeType::Scalar(kind) => self.ptr.read(*kind, 0),
            NativeType::Struct(layout) => Ok(Value::Struct(StructValue::at(
                Arc::clone(layout),
                &self.ptr,
            )?)),
            other => Err(FfiError::InvalidDeclaration(format!(
                "{} is not a valid variable type",
                other.display_name()
            ))),
        }
    }

    fn write_underlying(&self, ty: &NativeType, value: &Value) -> FfiResult<()> {
        match ty {
            NativeType::Scalar(kind) => self.ptr.write(*kind, 0, value),
            other => Err(FfiError::InvalidDeclaration(format!(
                "{} is not a valid variable type",
                other.display_name()
            ))),
        }
    }
}

impl std::fmt::Debug for GlobalVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalVariable")
            .field("name", &self.name)
            .field("library", &self.library)
            .field("address", &format_args!("{:#x}", self.ptr.address()))
            .finish()
    }
}

/// Declarative binding surface for one native API
pub struct Namespace {
    registry: TypeRegistry,
    resolver: LibraryResolver,
    libraries: Vec<Arc<DynamicLibrary>>,
    convention: Convention,
    enums: EnumSet,
    functions: HashMap<String, Arc<AttachedFunction>>,
    variadics: HashMap<String, Arc<AttachedVariadic>>,
    variables: HashMap<String, Arc<GlobalVariable>>,
    frozen: bool,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::new(),
            resolver: LibraryResolver::new(),
            libraries: Vec::new(),
            convention: Convention::Default,
            enums: EnumSet::new(),
            functions: HashMap::new(),
            variadics: HashMap::new(),
            variables: HashMap::new(),
            frozen: false,
        }
    }

    /// Namespace whose resolver honors the loaded configuration
    pub fn with_config(config: &ferrule_config::Config) -> FfiResult<Self> {
        let mut ns = Self::new();
        ns.resolver = LibraryResolver::from_config(config)?;
        Ok(ns)
    }

    fn ensure_mutable(&self) -> FfiResult<()> {
        if self.frozen {
            return Err(FfiError::ImmutableState("namespace".to_string()));
        }
        Ok(())
    }

    /// Stop accepting declarations
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Add a library to the symbol search list
    pub fn library(&mut self, name: &str) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        let lib = self.resolver.open(name)?;
        self.libraries.push(lib);
        Ok(self)
    }

    /// Add several libraries in order
    pub fn libraries(&mut self, names: &[&str]) -> FfiResult<&mut Self> {
        for name in names {
            self.library(name)?;
        }
        Ok(self)
    }

    /// Search the symbols already linked into this process
    pub fn use_current_process(&mut self) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        self.libraries
            .push(Arc::new(DynamicLibrary::current_process()?));
        Ok(self)
    }

    pub fn calling_convention(&mut self, convention: Convention) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        self.convention = convention;
        Ok(self)
    }

    pub fn convention(&self) -> Convention {
        self.convention
    }

    /// Register `alias` for an existing type name
    pub fn typedef(&mut self, existing: &str, alias: &str) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        self.registry.alias(existing, alias)?;
        Ok(self)
    }

    /// Register a custom converter under `name`
    pub fn define_converter(
        &mut self,
        name: &str,
        converter: Arc<dyn NativeConvert>,
    ) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        self.registry.define_converter(name, converter)?;
        Ok(self)
    }

    /// Declare a plain enum; a tagged one also registers as a type
    pub fn enum_def(&mut self, tag: Option<&str>, items: &[EnumItem]) -> FfiResult<&mut Self> {
        let e = Enum::new(items, tag)?;
        self.add_enum(e)
    }

    /// Plain enum over an explicit underlying type name
    pub fn enum_def_with(
        &mut self,
        native: &str,
        tag: Option<&str>,
        items: &[EnumItem],
    ) -> FfiResult<&mut Self> {
        let kind = self.integer_kind(native)?;
        let e = Enum::with_native(kind, items, tag)?;
        self.add_enum(e)
    }

    /// Declare a bitmask; a tagged one also registers as a type
    pub fn bitmask_def(&mut self, tag: Option<&str>, items: &[EnumItem]) -> FfiResult<&mut Self> {
        let e = Enum::bitmask(items, tag)?;
        self.add_enum(e)
    }

    /// Bitmask over an explicit underlying type name
    pub fn bitmask_def_with(
        &mut self,
        native: &str,
        tag: Option<&str>,
        items: &[EnumItem],
    ) -> FfiResult<&mut Self> {
        let kind = self.integer_kind(native)?;
        let e = Enum::bitmask_with_native(kind, items, tag)?;
        self.add_enum(e)
    }

    fn integer_kind(&self, name: &str) -> FfiResult<ScalarKind> {
        match self.registry.resolve(name)?.scalar() {
            Some(kind) if kind.is_integer() => Ok(kind),
            _ => Err(FfiError::InvalidDeclaration(format!(
                "enum native type must be an integer type, got {}",
                name
            ))),
        }
    }

    fn add_enum(&mut self, e: Enum) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        let e = Arc::new(e);
        if let Some(tag) = e.tag().map(str::to_owned) {
            let conv: Arc<dyn NativeConvert> = Arc::clone(&e) as Arc<dyn NativeConvert>;
            self.registry.define_converter(&tag, conv)?;
        }
        self.enums.add(e);
        Ok(self)
    }

    /// Declare a callback type; a named one also registers as a typedef
    pub fn callback(
        &mut self,
        name: Option<&str>,
        params: &[&str],
        result: &str,
    ) -> FfiResult<NativeType> {
        self.ensure_mutable()?;
        let params = self.resolve_all(params)?;
        let result = self.registry.resolve(result)?;
        let sig = CallbackSignature::new(params, result, self.convention)?;
        let ty = NativeType::Function(Arc::new(sig));
        if let Some(name) = name {
            self.registry.define(name, ty.clone())?;
        }
        Ok(ty)
    }

    /// Register a struct layout: `name` becomes the by-reference (pointer)
    /// spelling of the struct
    pub fn struct_type(
        &mut self,
        name: &str,
        layout: &Arc<StructLayout>,
    ) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        let conv: Arc<dyn NativeConvert> = Arc::new(StructByReference::new(Arc::clone(layout)));
        self.registry.define_converter(name, conv)?;
        Ok(self)
    }

    /// Attach `name` with the same symbol name, non-blocking
    pub fn attach(&mut self, name: &str, params: &[&str], result: &str) -> FfiResult<&mut Self> {
        self.attach_function(name, None, params, result, false)
    }

    /// Attach a function, searching every declared library in order
    ///
    /// `symbol` overrides the native name when the binding name differs.
    /// Declaring `varargs` as the last parameter makes the function
    /// variadic; it is then called through [`Namespace::call_variadic`].
    pub fn attach_function(
        &mut self,
        name: &str,
        symbol: Option<&str>,
        params: &[&str],
        result: &str,
        blocking: bool,
    ) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        let symbol = symbol.unwrap_or(name);
        let params = self.resolve_all(params)?;
        let result = self.registry.resolve(result)?;

        let variadic = match params.iter().position(NativeType::is_varargs) {
            Some(pos) if pos + 1 == params.len() => true,
            Some(_) => {
                return Err(FfiError::InvalidDeclaration(
                    "varargs must be the last parameter".to_string(),
                ));
            }
            None => false,
        };

        let (address, library) = self.find_symbol(symbol, &params, true)?;
        if variadic {
            let fixed = params[..params.len() - 1].to_vec();
            let invoker = VariadicInvoker::new(address, fixed, result, blocking)?;
            self.variadics.insert(
                name.to_string(),
                Arc::new(AttachedVariadic {
                    name: name.to_string(),
                    library,
                    invoker,
                }),
            );
        } else {
            let invoker = Invoker::new(address, params, result, self.convention, blocking)?;
            self.functions.insert(
                name.to_string(),
                Arc::new(AttachedFunction {
                    name: name.to_string(),
                    library,
                    invoker,
                }),
            );
        }
        Ok(self)
    }

    /// Attach a global variable
    pub fn attach_variable(
        &mut self,
        name: &str,
        symbol: Option<&str>,
        type_name: &str,
    ) -> FfiResult<&mut Self> {
        self.ensure_mutable()?;
        let symbol = symbol.unwrap_or(name);
        let ty = self.registry.resolve(type_name)?;
        match &ty {
            NativeType::Scalar(ScalarKind::Void) | NativeType::Scalar(ScalarKind::Varargs) => {
                return Err(FfiError::InvalidDeclaration(format!(
                    "{} is not a valid variable type",
                    ty.display_name()
                )));
            }
            NativeType::Scalar(_) | NativeType::Struct(_) | NativeType::Mapped(_) => {}
            other => {
                return Err(FfiError::InvalidDeclaration(format!(
                    "{} is not a valid variable type",
                    other.display_name()
                )));
            }
        }
        let (address, library) = self.find_symbol(symbol, &[], false)?;
        // SAFETY: the address comes from the loader and stays valid while
        // the library handle in self.libraries is alive
        let ptr = Arc::new(unsafe { PointerHandle::from_address(address) });
        self.variables.insert(
            name.to_string(),
            Arc::new(GlobalVariable {
                name: name.to_string(),
                library,
                ty,
                ptr,
            }),
        );
        Ok(self)
    }

    fn find_symbol(
        &self,
        symbol: &str,
        params: &[NativeType],
        function: bool,
    ) -> FfiResult<(usize, String)> {
        if self.libraries.is_empty() {
            return Err(FfiError::Configuration("no library specified".to_string()));
        }
        let candidates = symbol_candidates(symbol, self.convention, params);
        for lib in &self.libraries {
            for candidate in &candidates {
                let found = if function {
                    lib.find_function(candidate)
                } else {
                    lib.find_variable(candidate)
                };
                if let Some(address) = found {
                    log::trace!("resolved '{}' in {} at {:#x}", candidate, lib.name(), address);
                    return Ok((address, lib.name().to_string()));
                }
            }
        }
        Err(FfiError::SymbolNotFound {
            symbol: symbol.to_string(),
            libraries: self
                .libraries
                .iter()
                .map(|l| l.name().to_string())
                .collect(),
        })
    }

    fn resolve_all(&self, names: &[&str]) -> FfiResult<Vec<NativeType>> {
        names.iter().map(|n| self.registry.resolve(n)).collect()
    }

    /// Call an attached fixed-arity function
    pub fn call(&self, name: &str, args: &[Value]) -> FfiResult<Value> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| FfiError::InvalidValue(format!("no attached function '{}'", name)))?;
        f.call(args)
    }

    /// Call an attached variadic function; `tail_types` name the types of
    /// the arguments past the fixed part
    pub fn call_variadic(
        &self,
        name: &str,
        tail_types: &[&str],
        args: &[Value],
    ) -> FfiResult<Value> {
        let f = self
            .variadics
            .get(name)
            .ok_or_else(|| FfiError::InvalidValue(format!("no attached function '{}'", name)))?;
        let tail = self.resolve_all(tail_types)?;
        f.call(&tail, args)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<AttachedFunction>> {
        self.functions.get(name)
    }

    pub fn variadic(&self, name: &str) -> Option<&Arc<AttachedVariadic>> {
        self.variadics.get(name)
    }

    pub fn variable(&self, name: &str) -> Option<&Arc<GlobalVariable>> {
        self.variables.get(name)
    }

    pub fn enums(&self) -> &EnumSet {
        &self.enums
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Resolve a type name through this namespace's registry
    pub fn resolve_type(&self, name: &str) -> FfiResult<NativeType> {
        self.registry.resolve(name)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field(
                "libraries",
                &self
                    .libraries
                    .iter()
                    .map(|l| l.name().to_string())
                    .collect::<Vec<_>>(),
            )
            .field("functions", &self.functions.len())
            .field("variables", &self.variables.len())
            .field("frozen", &self.frozen)
            .finish()
    }
}

/// Decorated spellings to probe for one symbol
///
/// Plain first; under stdcall the `_name@N` and `name@N` forms follow, with
/// `N` the argument bytes, each parameter rounded up to a 4-byte slot.
fn symbol_candidates(symbol: &str, convention: Convention, params: &[NativeType]) -> Vec<String> {
    match convention {
        Convention::Default => vec![symbol.to_string()],
        Convention::Stdcall => {
            let bytes = stdcall_bytes(params);
            vec![
                symbol.to_string(),
                format!("_{}@{}", symbol, bytes),
                format!("{}@{}", symbol, bytes),
            ]
        }
    }
}

fn stdcall_bytes(params: &[NativeType]) -> usize {
    params.iter().map(|p| (p.size() + 3) & !3).sum()
}
