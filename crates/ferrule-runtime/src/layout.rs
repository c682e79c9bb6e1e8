//! Struct and union layout
//!
//! `StructLayoutBuilder` places fields one at a time and accumulates size and
//! alignment. Auto-placement aligns each field to its natural alignment,
//! clamped by the pack value when packing is on and raised by the minimum
//! alignment when it is not. Unions place every field at offset zero and take
//! the largest member's size. `build` adds tail padding unless packed and
//! produces an immutable [`StructLayout`].

use crate::error::{FfiError, FfiResult};
use crate::types::{NativeType, ScalarKind};
use std::collections::HashMap;
use std::sync::Arc;

/// One placed field
#[derive(Debug, Clone)]
pub struct StructField {
    name: Arc<str>,
    ty: NativeType,
    offset: usize,
}

impl StructField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &NativeType {
        &self.ty
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn size(&self) -> usize {
        self.ty.size()
    }

    pub fn alignment(&self) -> usize {
        self.ty.alignment()
    }
}

/// Immutable field map for one struct or union type
#[derive(Debug)]
pub struct StructLayout {
    fields: Vec<StructField>,
    by_name: HashMap<Arc<str>, usize>,
    size: usize,
    alignment: usize,
    union: bool,
}

impl StructLayout {
    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn is_union(&self) -> bool {
        self.union
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.field(name).map(StructField::offset)
    }

    /// Field names in declaration order
    pub fn members(&self) -> Vec<Arc<str>> {
        self.fields.iter().map(|f| Arc::clone(&f.name)).collect()
    }

    /// `(name, offset)` pairs in declaration order
    pub fn offsets(&self) -> Vec<(Arc<str>, usize)> {
        self.fields
            .iter()
            .map(|f| (Arc::clone(&f.name), f.offset))
            .collect()
    }
}

/// Incremental layout construction
#[derive(Debug)]
pub struct StructLayoutBuilder {
    fields: Vec<StructField>,
    by_name: HashMap<Arc<str>, usize>,
    size: usize,
    alignment: usize,
    min_alignment: usize,
    packed: Option<usize>,
    union: bool,
}

impl Default for StructLayoutBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StructLayoutBuilder {
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            by_name: HashMap::new(),
            size: 0,
            alignment: 1,
            min_alignment: 1,
            packed: None,
            union: false,
        }
    }

    /// Overlay all fields at offset zero
    pub fn set_union(&mut self, union: bool) -> &mut Self {
        self.union = union;
        self
    }

    /// Pack fields at most `pack` bytes apart; must be a power of two
    ///
    /// Packing caps the layout alignment at the pack value and suppresses
    /// tail padding.
    pub fn set_packed(&mut self, pack: usize) -> FfiResult<&mut Self> {
        if !pack.is_power_of_two() {
            return Err(FfiError::InvalidDeclaration(format!(
                "packing must be a power of two, got {}",
                pack
            )));
        }
        self.packed = Some(pack);
        self.alignment = pack;
        Ok(self)
    }

    /// Raise the minimum alignment applied to auto-placed fields
    pub fn set_min_alignment(&mut self, alignment: usize) -> FfiResult<&mut Self> {
        if !alignment.is_power_of_two() {
            return Err(FfiError::InvalidDeclaration(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }
        self.min_alignment = alignment;
        self.alignment = self.alignment.max(alignment);
        Ok(self)
    }

    /// Force the layout to span at least `size` bytes
    pub fn set_min_size(&mut self, size: usize) -> &mut Self {
        self.size = self.size.max(size);
        self
    }

    pub fn is_union(&self) -> bool {
        self.union
    }

    pub fn current_size(&self) -> usize {
        self.size
    }

    /// Place the next field, at `offset` when given or computed otherwise
    pub fn add(
        &mut self,
        name: &str,
        ty: NativeType,
        offset: Option<usize>,
    ) -> FfiResult<&mut Self> {
        if name.is_empty() {
            return Err(FfiError::InvalidDeclaration(
                "field name cannot be empty".to_string(),
            ));
        }
        if self.by_name.contains_key(name) {
            return Err(FfiError::InvalidDeclaration(format!(
                "duplicate field name '{}'",
                name
            )));
        }
        match ty.scalar() {
            Some(ScalarKind::Void) | Some(ScalarKind::Varargs) => {
                return Err(FfiError::InvalidDeclaration(format!(
                    "{} is not a valid field type",
                    ty.display_name()
                )));
            }
            _ => {}
        }

        let offset = match offset {
            Some(o) => o,
            None if self.union => 0,
            None => align_up(self.size, self.field_alignment(&ty)),
        };

        let fsize = ty.size();
        let falign = ty.alignment();
        let name: Arc<str> = Arc::from(name);
        self.by_name.insert(Arc::clone(&name), self.fields.len());
        self.fields.push(StructField { name, ty, offset });

        if self.packed.is_none() {
            self.alignment = self.alignment.max(falign);
        }
        let span = if self.union { fsize } else { offset + fsize };
        self.size = self.size.max(span);
        Ok(self)
    }

    fn field_alignment(&self, ty: &NativeType) -> usize {
        let natural = ty.alignment();
        match self.packed {
            Some(pack) => pack.min(natural),
            None => self.min_alignment.max(natural),
        }
    }

    /// Finish the layout, adding tail padding unless packed
    pub fn build(&self) -> FfiResult<Arc<StructLayout>> {
        if self.fields.is_empty() && self.size == 0 {
            return Err(FfiError::InvalidDeclaration(
                "struct has no fields".to_string(),
            ));
        }
        let size = if self.packed.is_some() {
            self.size
        } else {
            align_up(self.size, self.alignment)
        };
        log::trace!(
            "built layout: {} fields, {} bytes, align {}",
            self.fields.len(),
            size,
            self.alignment
        );
        Ok(Arc::new(StructLayout {
            fields: self.fields.clone(),
            by_name: self.by_name.clone(),
            size,
            alignment: self.alignment,
            union: self.union,
        }))
    }
}

fn align_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}
