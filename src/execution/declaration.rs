//! Class and method declarations as they are sent to the device.

use bitflags::bitflags;
use serde::Serialize;

use crate::{
    il::code::IlCode,
    layout::VariableKind,
    metadata::{FieldId, MethodId, TypeId},
    tokens::RemoteToken,
    Error, Result,
};

bitflags! {
    /// Method properties the execution engine dispatches on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct MethodFlags: u8 {
        /// No `this` argument
        const STATIC = 0x01;
        /// Dispatched through the class's method table
        const VIRTUAL = 0x02;
        /// Implemented by the engine, identified by a native id
        const SPECIAL_METHOD = 0x04;
        /// Returns nothing
        const VOID = 0x08;
        /// Instance constructor
        const CTOR = 0x10;
        /// No body, only used as an override target
        const ABSTRACT = 0x20;
        /// Runs under the monitor of `this` or of the type
        const SYNCHRONIZED = 0x40;
    }
}

/// One entry of a class declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ClassMember {
    /// An instance or static field
    Field {
        /// The field
        #[serde(skip)]
        field: FieldId,
        /// Slot interpretation
        kind: VariableKind,
        /// Remote token
        token: RemoteToken,
        /// Slot size in bytes
        size: u32,
        /// Instance offset, or offset into the static-root vector
        offset: u32,
        /// True for static fields
        is_static: bool,
    },
    /// A method, listed with the tokens of the methods it overrides
    Method {
        /// The method
        #[serde(skip)]
        method: MethodId,
        /// Remote token
        token: RemoteToken,
        /// Method flags
        flags: MethodFlags,
        /// Tokens of overridden base class and implemented interface methods
        overrides: Vec<RemoteToken>,
    },
}

impl ClassMember {
    /// Remote token of the member.
    #[must_use]
    pub fn token(&self) -> RemoteToken {
        match self {
            ClassMember::Field { token, .. } | ClassMember::Method { token, .. } => *token,
        }
    }

    /// Kind byte of the member, with the static bit applied to static fields.
    #[must_use]
    pub fn kind_value(&self) -> u8 {
        match self {
            ClassMember::Field {
                kind, is_static, ..
            } => kind.member_value(*is_static),
            ClassMember::Method { .. } => VariableKind::Method.value(),
        }
    }

    /// The method, for method members.
    #[must_use]
    pub fn method(&self) -> Option<MethodId> {
        match self {
            ClassMember::Method { method, .. } => Some(*method),
            ClassMember::Field { .. } => None,
        }
    }
}

/// A class of the execution set.
#[derive(Debug, Clone, Serialize)]
pub struct ClassDeclaration {
    /// The type
    #[serde(skip)]
    pub ty: TypeId,
    /// Remote token
    pub token: RemoteToken,
    /// Token of the base class, [`RemoteToken::NULL`] for roots and interfaces
    pub parent: RemoteToken,
    /// Full name, for diagnostics
    pub name: String,
    /// Instance size in bytes, excluding the object header
    pub dynamic_size: u32,
    /// Bytes of static storage
    pub static_size: u32,
    /// True for value types
    pub is_value_type: bool,
    /// True for enumerations
    pub is_enum: bool,
    /// True for array types
    pub is_array: bool,
    /// Tokens of all implemented interfaces
    pub interfaces: Vec<RemoteToken>,
    /// The static constructor must not run automatically
    pub suppress_init: bool,
    members: Vec<ClassMember>,
    read_only: bool,
}

impl ClassDeclaration {
    /// Creates a declaration without members.
    #[must_use]
    pub fn new(
        ty: TypeId,
        token: RemoteToken,
        parent: RemoteToken,
        name: String,
        dynamic_size: u32,
        static_size: u32,
        is_value_type: bool,
    ) -> Self {
        ClassDeclaration {
            ty,
            token,
            parent,
            name,
            dynamic_size,
            static_size,
            is_value_type,
            is_enum: false,
            is_array: false,
            interfaces: Vec::new(),
            suppress_init: false,
            members: Vec::new(),
            read_only: false,
        }
    }

    /// The members, fields first in layout order, methods in discovery order.
    #[must_use]
    pub fn members(&self) -> &[ClassMember] {
        &self.members
    }

    /// Appends a member.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnlyClass`] once the class has been frozen into a kernel.
    pub fn add_member(&mut self, member: ClassMember) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyClass(self.name.clone()));
        }
        self.members.push(member);
        Ok(())
    }

    /// Drops the field members `keep` rejects. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnlyClass`] once the class has been frozen into a kernel.
    pub fn retain_fields(&mut self, mut keep: impl FnMut(FieldId) -> bool) -> Result<usize> {
        if self.read_only {
            return Err(Error::ReadOnlyClass(self.name.clone()));
        }
        let before = self.members.len();
        self.members.retain(|m| match m {
            ClassMember::Field { field, .. } => keep(*field),
            ClassMember::Method { .. } => true,
        });
        Ok(before - self.members.len())
    }

    /// Returns true if a method member for `method` exists.
    #[must_use]
    pub fn has_method(&self, method: MethodId) -> bool {
        self.members.iter().any(|m| m.method() == Some(method))
    }

    /// Number of method members.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.members.iter().filter(|m| m.method().is_some()).count()
    }

    /// Class flags sent with the declaration.
    #[must_use]
    pub fn flags(&self) -> u16 {
        u16::from(self.is_value_type) | u16::from(self.is_enum) << 1 | u16::from(self.is_array) << 2
    }

    /// Freezes the member list.
    pub fn mark_read_only(&mut self) {
        self.read_only = true;
    }

    /// Returns true once the class is frozen.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// A method of the execution set.
#[derive(Debug, Clone, Serialize)]
pub struct MethodDeclaration {
    /// Position in the method list
    pub index: usize,
    /// Remote token
    pub token: RemoteToken,
    /// The method
    #[serde(skip)]
    pub method: MethodId,
    /// Method flags
    pub flags: MethodFlags,
    /// Evaluation stack depth
    pub max_stack: u8,
    /// Argument count, including `this`
    pub argument_count: u8,
    /// Engine function id, for special methods
    pub native_id: Option<u32>,
    /// Patched body, absent for special and abstract methods
    pub code: Option<IlCode>,
}

impl MethodDeclaration {
    /// Returns true if the method carries IL.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.native_id.is_none() && self.code.is_some()
    }

    /// Length of the IL body, zero without one.
    #[must_use]
    pub fn code_len(&self) -> usize {
        self.code.as_ref().map_or(0, IlCode::len)
    }
}
