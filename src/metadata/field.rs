//! Field definitions of the program model.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::metadata::{token::Token, FieldId, TypeId};

bitflags! {
    /// Field attributes relevant for layout and patching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FieldFlags: u16 {
        /// Field is static
        const STATIC = 0x0010;
        /// Field can only be initialized in a constructor
        const INIT_ONLY = 0x0020;
        /// Field is a compile time constant, inlined at every use
        const LITERAL = 0x0040;
        /// Field is private
        const PRIVATE = 0x0001;
        /// Field has initial data in the image (static array initializers)
        const HAS_RVA = 0x0100;
    }
}

/// A field of the program model.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Original metadata token
    pub token: Token,
    /// The type declaring this field
    pub declaring_type: TypeId,
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: TypeId,
    /// Attributes
    pub flags: FieldFlags,
    /// Initial data blob, for fields with `HAS_RVA`
    pub initial_value: Option<Vec<u8>>,
    /// The field of the open generic definition this field was instantiated from
    pub definition: Option<FieldId>,
}

impl FieldDef {
    /// Returns true for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }

    /// Returns true for literal (const) fields.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.flags.contains(FieldFlags::LITERAL)
    }

    /// Returns true if the field is stored in the object or the static area.
    #[must_use]
    pub fn has_storage(&self) -> bool {
        !self.is_literal()
    }
}
