//! Enumerations and bitmasks
//!
//! Declarations are a flat token sequence of names and integers. For a plain
//! enum an integer token assigns the preceding name's value and the counter
//! continues from there; for a bitmask the counter walks bit indexes, a name
//! takes `1 << index`, and an integer token is an explicit bit index.
//!
//! Encoding for signed underlying types wraps at the declared width, so an
//! 8-bit mask with all bits set encodes as -1. Decoding masks the input to
//! the unsigned width first, collects matching flags, and appends any
//! unnamed residual bits.

use crate::convert::NativeConvert;
use crate::error::{FfiError, FfiResult};
use crate::types::{NativeType, ScalarKind};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One token in an enum or bitmask declaration
#[derive(Debug, Clone, PartialEq)]
pub enum EnumItem {
    Name(String),
    Value(i64),
}

impl From<&str> for EnumItem {
    fn from(name: &str) -> Self {
        EnumItem::Name(name.to_string())
    }
}

impl From<i64> for EnumItem {
    fn from(value: i64) -> Self {
        EnumItem::Value(value)
    }
}

/// A declared enumeration or bitmask
#[derive(Debug)]
pub struct Enum {
    kind: ScalarKind,
    bitmask: bool,
    tag: Option<Arc<str>>,
    /// Declaration order; drives decode order and symbol-map merging
    entries: Vec<(Arc<str>, i64)>,
    by_name: HashMap<Arc<str>, i64>,
    /// Inverse map; the last name declared for a value wins
    by_value: HashMap<i64, Arc<str>>,
}

impl Enum {
    /// Plain enum over the default `int` underlying type
    pub fn new(items: &[EnumItem], tag: Option<&str>) -> FfiResult<Self> {
        Self::with_native(ScalarKind::Int, items, tag)
    }

    /// Plain enum over an explicit underlying type
    pub fn with_native(
        kind: ScalarKind,
        items: &[EnumItem],
        tag: Option<&str>,
    ) -> FfiResult<Self> {
        let entries = process_plain(items)?;
        Self::build(kind, false, tag, entries)
    }

    /// Bitmask over the default `int` underlying type
    pub fn bitmask(items: &[EnumItem], tag: Option<&str>) -> FfiResult<Self> {
        Self::bitmask_with_native(ScalarKind::Int, items, tag)
    }

    /// Bitmask over an explicit underlying type
    pub fn bitmask_with_native(
        kind: ScalarKind,
        items: &[EnumItem],
        tag: Option<&str>,
    ) -> FfiResult<Self> {
        let entries = process_bitmask(items)?;
        Self::build(kind, true, tag, entries)
    }

    fn build(
        kind: ScalarKind,
        bitmask: bool,
        tag: Option<&str>,
        entries: Vec<(Arc<str>, i64)>,
    ) -> FfiResult<Self> {
        if !kind.is_integer() {
            return Err(FfiError::InvalidDeclaration(format!(
                "enum native type must be an integer type, got {}",
                kind.name()
            )));
        }
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_value = HashMap::with_capacity(entries.len());
        for (name, value) in &entries {
            by_name.insert(Arc::clone(name), *value);
            by_value.insert(*value, Arc::clone(name));
        }
        Ok(Self {
            kind,
            bitmask,
            tag: tag.map(Arc::from),
            entries,
            by_name,
            by_value,
        })
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Underlying scalar kind
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    pub fn is_bitmask(&self) -> bool {
        self.bitmask
    }

    /// Member names in declaration order
    pub fn symbols(&self) -> Vec<Arc<str>> {
        self.entries.iter().map(|(n, _)| Arc::clone(n)).collect()
    }

    /// Member values in declaration order
    pub fn values(&self) -> Vec<i64> {
        self.entries.iter().map(|(_, v)| *v).collect()
    }

    pub fn entries(&self) -> &[(Arc<str>, i64)] {
        &self.entries
    }

    pub fn value_of(&self, name: &str) -> Option<i64> {
        self.by_name.get(name).copied()
    }

    pub fn name_of(&self, value: i64) -> Option<Arc<str>> {
        self.by_value.get(&value).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Split a raw bitmask value into named flags plus unnamed residual bits
    pub fn decompose(&self, value: &Value) -> FfiResult<(Vec<Arc<str>>, u64)> {
        let n = value
            .as_int_exact()
            .ok_or_else(|| FfiError::mismatch(self.kind.name(), value.type_name()))?;
        let raw = (n as u64) & self.width_mask();
        let mut names = Vec::new();
        let mut matched = 0u64;
        for (name, v) in &self.entries {
            let bits = (*v as u64) & self.width_mask();
            if bits & raw != 0 {
                names.push(Arc::clone(name));
                matched |= bits;
            }
        }
        Ok((names, raw & !matched))
    }

    fn enum_to_native(&self, value: &Value) -> FfiResult<Value> {
        match value {
            Value::Symbol(name) => match self.value_of(name) {
                Some(v) => Ok(Value::Int(v)),
                None => Err(FfiError::InvalidValue(format!(
                    "invalid enum value, :{}",
                    name
                ))),
            },
            Value::Int(_) | Value::UInt(_) => Ok(value.clone()),
            other => Err(FfiError::InvalidValue(format!(
                "invalid enum value, {}",
                other.type_name()
            ))),
        }
    }

    fn enum_from_native(&self, value: &Value) -> FfiResult<Value> {
        if value.as_int_exact().is_none() {
            return Err(FfiError::mismatch(self.kind.name(), value.type_name()));
        }
        match self.lookup_name(value) {
            Some(name) => Ok(Value::Symbol(name)),
            None => Ok(value.clone()),
        }
    }

    fn lookup_name(&self, value: &Value) -> Option<Arc<str>> {
        let n = value.as_int_exact()?;
        let key = i64::try_from(n).ok()?;
        self.by_value.get(&key).cloned()
    }

    fn bitmask_to_native(&self, value: &Value) -> FfiResult<Value> {
        let raw = match value {
            Value::Null => 0,
            Value::List(items) => {
                let mut acc = 0u64;
                for item in items.iter() {
                    acc = self.or_item(acc, item)?;
                }
                acc
            }
            single => self.or_item(0, single)?,
        };
        Ok(self.encode_bits(raw))
    }

    fn or_item(&self, acc: u64, item: &Value) -> FfiResult<u64> {
        match item {
            Value::Symbol(name) => match self.value_of(name) {
                Some(v) => Ok(acc | v as u64),
                None => Err(FfiError::InvalidValue(format!(
                    "invalid bitmask value, :{}",
                    name
                ))),
            },
            Value::Int(n) => Ok(acc | *n as u64),
            Value::UInt(n) => Ok(acc | n),
            other => Err(FfiError::InvalidValue(format!(
                "invalid bitmask value, {}",
                other.type_name()
            ))),
        }
    }

    fn bitmask_from_native(&self, value: &Value) -> FfiResult<Value> {
        let (names, remainder) = self.decompose(value)?;
        let mut items: Vec<Value> = names.into_iter().map(Value::Symbol).collect();
        if remainder != 0 {
            items.push(Value::UInt(remainder));
        }
        Ok(Value::list(items))
    }

    fn width_mask(&self) -> u64 {
        let bits = self.kind.size() * 8;
        if bits >= 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        }
    }

    fn encode_bits(&self, raw: u64) -> Value {
        let masked = raw & self.width_mask();
        if self.kind.is_signed() {
            Value::Int(sign_extend(masked, (self.kind.size() * 8) as u32))
        } else {
            Value::UInt(masked)
        }
    }
}

impl NativeConvert for Enum {
    fn native_type(&self) -> NativeType {
        NativeType::Scalar(self.kind)
    }

    fn to_native(&self, value: &Value) -> FfiResult<Value> {
        if self.bitmask {
            self.bitmask_to_native(value)
        } else {
            self.enum_to_native(value)
        }
    }

    fn from_native(&self, value: &Value) -> FfiResult<Value> {
        if self.bitmask {
            self.bitmask_from_native(value)
        } else {
            self.enum_from_native(value)
        }
    }
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

fn process_plain(items: &[EnumItem]) -> FfiResult<Vec<(Arc<str>, i64)>> {
    let mut entries: Vec<(Arc<str>, i64)> = Vec::new();
    let mut seen: HashSet<Arc<str>> = HashSet::new();
    // the counter only has to exist when the next name actually needs it
    let mut next: Option<i64> = Some(0);
    for item in items {
        match item {
            EnumItem::Name(name) => {
                let name: Arc<str> = Arc::from(name.as_str());
                if !seen.insert(Arc::clone(&name)) {
                    return Err(FfiError::InvalidDeclaration(format!(
                        "duplicate enum key '{}'",
                        name
                    )));
                }
                let value = next.ok_or_else(|| {
                    FfiError::InvalidDeclaration("enum counter overflow".to_string())
                })?;
                entries.push((name, value));
                next = value.checked_add(1);
            }
            EnumItem::Value(v) => {
                let last = entries.last_mut().ok_or_else(|| {
                    FfiError::InvalidDeclaration(
                        "enum value token with no preceding name".to_string(),
                    )
                })?;
                last.1 = *v;
                next = v.checked_add(1);
            }
        }
    }
    Ok(entries)
}

fn process_bitmask(items: &[EnumItem]) -> FfiResult<Vec<(Arc<str>, i64)>> {
    let mut entries: Vec<(Arc<str>, i64)> = Vec::new();
    let mut seen: HashSet<Arc<str>> = HashSet::new();
    let mut index: u32 = 0;
    for item in items {
        match item {
            EnumItem::Name(name) => {
                let name: Arc<str> = Arc::from(name.as_str());
                if !seen.insert(Arc::clone(&name)) {
                    return Err(FfiError::InvalidDeclaration(format!(
                        "duplicate bitmask key '{}'",
                        name
                    )));
                }
                if index > 63 {
                    return Err(FfiError::InvalidDeclaration(format!(
                        "bitmask bit index {} out of range",
                        index
                    )));
                }
                entries.push((name, (1u64 << index) as i64));
                index += 1;
            }
            EnumItem::Value(v) => {
                if *v < 0 {
                    return Err(FfiError::InvalidDeclaration(
                        "bitmask index should be positive".to_string(),
                    ));
                }
                if *v > 63 {
                    return Err(FfiError::InvalidDeclaration(format!(
                        "bitmask bit index {} out of range",
                        v
                    )));
                }
                let last = entries.last_mut().ok_or_else(|| {
                    FfiError::InvalidDeclaration(
                        "bitmask index token with no preceding name".to_string(),
                    )
                })?;
                last.1 = (1u64 << *v) as i64;
                index = *v as u32 + 1;
            }
        }
    }
    Ok(entries)
}

/// All enums declared in one namespace
///
/// Keeps declaration order, a tag index, and a merged symbol map where the
/// most recent declaration of a symbol wins.
#[derive(Debug, Default)]
pub struct EnumSet {
    all: Vec<Arc<Enum>>,
    tagged: HashMap<Arc<str>, Arc<Enum>>,
    symbols: HashMap<Arc<str>, i64>,
}

impl EnumSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, e: Arc<Enum>) {
        if let Some(tag) = &e.tag {
            self.tagged.insert(Arc::clone(tag), Arc::clone(&e));
        }
        for (name, value) in &e.entries {
            self.symbols.insert(Arc::clone(name), *value);
        }
        self.all.push(e);
    }

    /// Find by tag first, then by member symbol
    pub fn find(&self, query: &str) -> Option<&Arc<Enum>> {
        if let Some(e) = self.tagged.get(query) {
            return Some(e);
        }
        self.all.iter().find(|e| e.by_name.contains_key(query))
    }

    /// Value of `name` in the merged symbol map
    pub fn symbol_value(&self, name: &str) -> Option<i64> {
        self.symbols.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}
