//! Patched method bodies.

use serde::Serialize;

use crate::{
    metadata::{method::ExceptionClauseFlags, FieldId, MethodId, TypeId},
    tokens::RemoteToken,
};

/// An exception clause with remote offsets and a remote catch type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchedClause {
    /// Clause kind, `EXCEPTION` or `FINALLY`
    #[serde(skip)]
    pub flags: ExceptionClauseFlags,
    /// Start of the protected region
    pub try_offset: u16,
    /// Length of the protected region
    pub try_length: u16,
    /// Start of the handler
    pub handler_offset: u16,
    /// Length of the handler
    pub handler_length: u16,
    /// Caught type, [`RemoteToken::NULL`] for `finally`
    pub catch_type: RemoteToken,
}

impl PatchedClause {
    /// The clause kind as sent to the device.
    #[must_use]
    pub fn kind(&self) -> u32 {
        u32::from(self.flags.bits())
    }
}

/// The body of a method after token patching, together with everything it references.
///
/// Dependency lists keep the order of first appearance in the IL stream and contain every
/// entity once. References are recorded after replacement redirection, so a method that calls
/// a replaced method lists the replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IlCode {
    /// Patched IL
    pub bytes: Vec<u8>,
    /// Evaluation stack depth
    pub max_stack: u16,
    /// Types of the local variables
    #[serde(skip)]
    pub locals: Vec<TypeId>,
    /// Methods called, constructed or loaded as function pointers
    #[serde(skip)]
    pub methods_used: Vec<MethodId>,
    /// Fields accessed
    #[serde(skip)]
    pub fields_used: Vec<FieldId>,
    /// Types referenced, including the declaring types of accessed fields
    #[serde(skip)]
    pub types_used: Vec<TypeId>,
    /// Element types of arrays created with `newarr`
    #[serde(skip)]
    pub array_element_types: Vec<TypeId>,
    /// Translated exception clauses
    pub exception_clauses: Vec<PatchedClause>,
}

impl IlCode {
    /// Wraps compiler generated IL that references only the given methods.
    #[must_use]
    pub fn synthesized(bytes: Vec<u8>, max_stack: u16, methods_used: Vec<MethodId>) -> Self {
        IlCode {
            bytes,
            max_stack,
            methods_used,
            ..IlCode::default()
        }
    }

    /// Length of the patched IL.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for an empty body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn use_method(&mut self, method: MethodId) {
        if !self.methods_used.contains(&method) {
            self.methods_used.push(method);
        }
    }

    pub(crate) fn use_field(&mut self, field: FieldId) {
        if !self.fields_used.contains(&field) {
            self.fields_used.push(field);
        }
    }

    pub(crate) fn use_type(&mut self, ty: TypeId) {
        if !self.types_used.contains(&ty) {
            self.types_used.push(ty);
        }
    }

    pub(crate) fn use_array_element(&mut self, ty: TypeId) {
        if !self.array_element_types.contains(&ty) {
            self.array_element_types.push(ty);
        }
    }
}
