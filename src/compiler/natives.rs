//! Native method numbering.
//!
//! Methods implemented by the execution engine itself carry a 32-bit id instead of IL. The
//! id is derived from a textual name with 32-bit FNV-1a, except for a few fixed ids the engine
//! hard-codes. The whole table is assembled before it is used, and two distinct names that
//! hash to the same id abort the build.

use std::collections::{BTreeMap, HashMap};

use crate::{metadata::MethodId, Error, Result};

/// Fixed id of `System.Object::Equals(System.Object)`.
pub const OBJECT_EQUALS: u32 = 2;
/// Fixed id of `System.Object::GetHashCode()`.
pub const OBJECT_GET_HASH_CODE: u32 = 3;
/// Fixed id of `System.Object::ToString()`.
pub const OBJECT_TO_STRING: u32 = 4;

/// Largest id reserved for fixed assignments; hashed ids never fall into this range.
pub const LAST_RESERVED_ID: u32 = 0xFF;

/// Engine intrinsics that are not bound to a registry entry but share the id space.
pub const INTRINSIC_NAMES: &[&str] = &["ByReferenceCtor", "ByReferenceValue"];

const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes a native method name to its id.
///
/// Ids at or below [`LAST_RESERVED_ID`] are moved out of the reserved range.
///
/// # Examples
///
/// ```rust
/// use ilforge::compiler::natives::{native_method_id, LAST_RESERVED_ID};
///
/// let id = native_method_id("ByReferenceCtor");
/// assert_eq!(id, native_method_id("ByReferenceCtor"));
/// assert!(id > LAST_RESERVED_ID);
/// ```
#[must_use]
pub fn native_method_id(name: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash <= LAST_RESERVED_ID {
        hash | 0x8000_0000
    } else {
        hash
    }
}

/// One requested native binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBinding {
    /// The bound method
    pub method: MethodId,
    /// The name the id is derived from
    pub name: String,
    /// An explicit id, bypassing the hash
    pub id: Option<u32>,
}

/// Validated mapping from methods to native ids.
#[derive(Debug, Clone, Default)]
pub struct NativeMethodTable {
    by_method: HashMap<MethodId, u32>,
    by_id: BTreeMap<u32, String>,
}

impl NativeMethodTable {
    /// Assigns ids to all bindings and rejects collisions.
    ///
    /// Binding the same name to the same id twice is allowed; a method keeps the id of its
    /// first binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NativeIdCollision`] if two distinct names end up with the same id,
    /// including the names in [`INTRINSIC_NAMES`].
    pub fn build(bindings: impl IntoIterator<Item = NativeBinding>) -> Result<Self> {
        let mut table = NativeMethodTable::default();
        for name in INTRINSIC_NAMES {
            table.claim(native_method_id(name), name)?;
        }

        for binding in bindings {
            let id = binding
                .id
                .unwrap_or_else(|| native_method_id(&binding.name));
            table.claim(id, &binding.name)?;
            table.by_method.entry(binding.method).or_insert(id);
        }
        Ok(table)
    }

    fn claim(&mut self, id: u32, name: &str) -> Result<()> {
        match self.by_id.get(&id) {
            Some(existing) if existing != name => Err(Error::NativeIdCollision {
                first: existing.clone(),
                second: name.to_string(),
                id,
            }),
            Some(_) => Ok(()),
            None => {
                self.by_id.insert(id, name.to_string());
                Ok(())
            }
        }
    }

    /// The native id of `method`.
    #[must_use]
    pub fn get(&self, method: MethodId) -> Option<u32> {
        self.by_method.get(&method).copied()
    }

    /// Returns true if `method` is implemented natively.
    #[must_use]
    pub fn contains(&self, method: MethodId) -> bool {
        self.by_method.contains_key(&method)
    }

    /// Number of bound methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_method.len()
    }

    /// Returns true if no method is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_method.is_empty()
    }

    /// The bound methods, in unspecified order.
    pub fn methods(&self) -> impl Iterator<Item = (MethodId, u32)> + '_ {
        self.by_method.iter().map(|(m, id)| (*m, *id))
    }

    /// The name an id was claimed for.
    #[must_use]
    pub fn name(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(index: usize, name: &str, id: Option<u32>) -> NativeBinding {
        NativeBinding {
            method: MethodId(index),
            name: name.to_string(),
            id,
        }
    }

    #[test]
    fn fnv1a_reference_values() {
        // FNV-1a 32 of the empty string is the offset basis, "a" is a published test vector
        assert_eq!(native_method_id(""), 0x811C_9DC5);
        assert_eq!(native_method_id("a"), 0xE40C_292C);
    }

    #[test]
    fn explicit_and_hashed_ids() {
        let table = NativeMethodTable::build([
            binding(0, "Object.Equals", Some(OBJECT_EQUALS)),
            binding(1, "Board.DigitalWrite", None),
        ])
        .unwrap();

        assert_eq!(table.get(MethodId(0)), Some(OBJECT_EQUALS));
        assert_eq!(
            table.get(MethodId(1)),
            Some(native_method_id("Board.DigitalWrite"))
        );
        assert_eq!(table.name(OBJECT_EQUALS), Some("Object.Equals"));
        assert!(!table.contains(MethodId(2)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn collisions_are_rejected() {
        let result = NativeMethodTable::build([
            binding(0, "First", Some(7)),
            binding(1, "Second", Some(7)),
        ]);
        assert!(matches!(
            result,
            Err(Error::NativeIdCollision { id: 7, .. })
        ));

        // The same name may be bound twice
        assert!(NativeMethodTable::build([
            binding(0, "Shared", None),
            binding(1, "Shared", None),
        ])
        .is_ok());

        // Intrinsic names are claimed up front
        let intrinsic = native_method_id("ByReferenceValue");
        assert!(NativeMethodTable::build([binding(0, "Other", Some(intrinsic))]).is_err());
    }
}
