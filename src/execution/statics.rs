//! The static-root table.
//!
//! The device keeps the static fields of all classes in one vector. Each static field owns a
//! slot at a fixed offset into it; offsets are handed out by a single counter in the order
//! fields are first prepared and never move afterwards.

use std::collections::HashMap;

use serde::Serialize;

use crate::metadata::FieldId;

/// Offsets of static fields in the static-root vector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StaticRootTable {
    #[serde(skip)]
    offsets: HashMap<FieldId, u32>,
    size: u32,
}

impl StaticRootTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        StaticRootTable::default()
    }

    /// Returns the offset of `field`, reserving `size` bytes on first use.
    pub fn allocate(&mut self, field: FieldId, size: u32) -> u32 {
        if let Some(offset) = self.offsets.get(&field) {
            return *offset;
        }
        let offset = self.size;
        self.size += size;
        self.offsets.insert(field, offset);
        offset
    }

    /// The offset of an already allocated field.
    #[must_use]
    pub fn offset(&self, field: FieldId) -> Option<u32> {
        self.offsets.get(&field).copied()
    }

    /// Total bytes of the static-root vector.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of static fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true if no static field has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}
