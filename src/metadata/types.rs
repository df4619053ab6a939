//! Type definitions of the program model.

use std::sync::OnceLock;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use crate::metadata::{token::Token, FieldId, MethodId, TypeId};

bitflags! {
    /// Shape of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct TypeFlags: u32 {
        /// Type is an interface
        const INTERFACE = 0x0001;
        /// Type is a value type (struct, enum or primitive)
        const VALUE_TYPE = 0x0002;
        /// Type can not be instantiated
        const ABSTRACT = 0x0004;
        /// Type can not be derived from
        const SEALED = 0x0008;
        /// Type is an enumeration
        const ENUM = 0x0010;
        /// Type is an open generic definition such as ``List`1``
        const GENERIC_DEFINITION = 0x0020;
        /// Type is a generic parameter (`T`)
        const GENERIC_PARAMETER = 0x0040;
        /// Type is a single dimensional, zero based array
        const ARRAY = 0x0080;
        /// Type is a managed pointer (`ref T`) or an unmanaged pointer
        const BY_REF = 0x0100;
        /// Type is nested inside its declaring type and not publicly visible
        const NOT_PUBLIC = 0x0200;
    }
}

/// Built-in primitive kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    SByte,
    /// `System.Byte`
    Byte,
    /// `System.Int16`
    Int16,
    /// `System.UInt16`
    UInt16,
    /// `System.Int32`
    Int32,
    /// `System.UInt32`
    UInt32,
    /// `System.Int64`
    Int64,
    /// `System.UInt64`
    UInt64,
    /// `System.Single`
    Single,
    /// `System.Double`
    Double,
    /// `System.IntPtr`
    IntPtr,
    /// `System.UIntPtr`
    UIntPtr,
}

impl PrimitiveKind {
    /// Size of the primitive on the 32-bit target.
    #[must_use]
    pub fn size(&self) -> u32 {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::SByte | PrimitiveKind::Byte => 1,
            PrimitiveKind::Char | PrimitiveKind::Int16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::Int32
            | PrimitiveKind::UInt32
            | PrimitiveKind::Single
            | PrimitiveKind::IntPtr
            | PrimitiveKind::UIntPtr => 4,
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 | PrimitiveKind::Double => 8,
        }
    }

    /// The `System` type name of the primitive.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("System.{}", self)
    }
}

/// Closed generic instance information.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericInstance {
    /// The open generic definition
    pub definition: TypeId,
    /// The type arguments, in declaration order
    pub arguments: Vec<TypeId>,
}

/// A type of the program model.
///
/// Member lists are append-only `boxcar` vectors so that members can be attached to a type
/// after it has been registered, without requiring mutable access to the universe.
#[derive(Debug)]
pub struct TypeDef {
    /// Original metadata token
    pub token: Token,
    /// Namespace, empty for generic parameters
    pub namespace: String,
    /// Simple name; generic instances carry their arguments (``List`1[System.Int32]``)
    pub name: String,
    /// Shape flags
    pub flags: TypeFlags,
    /// Primitive kind, for the built-in primitives
    pub primitive: Option<PrimitiveKind>,
    /// Element type, for arrays and by-ref types
    pub element: Option<TypeId>,
    /// Definition and arguments, for closed generic instances
    pub generic: Option<GenericInstance>,
    /// Position in the declaring definition's parameter list, for generic parameters
    pub generic_position: Option<usize>,
    /// Size declared through an explicit struct layout
    pub explicit_size: Option<u32>,
    pub(crate) base: OnceLock<TypeId>,
    pub(crate) interfaces: boxcar::Vec<TypeId>,
    pub(crate) fields: boxcar::Vec<FieldId>,
    pub(crate) methods: boxcar::Vec<MethodId>,
    pub(crate) generic_params: boxcar::Vec<TypeId>,
}

impl TypeDef {
    pub(crate) fn new(token: Token, namespace: String, name: String, flags: TypeFlags) -> Self {
        TypeDef {
            token,
            namespace,
            name,
            flags,
            primitive: None,
            element: None,
            generic: None,
            generic_position: None,
            explicit_size: None,
            base: OnceLock::new(),
            interfaces: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            generic_params: boxcar::Vec::new(),
        }
    }

    /// `Namespace.Name`, or just the name when there is no namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// The base type, if any.
    #[must_use]
    pub fn base(&self) -> Option<TypeId> {
        self.base.get().copied()
    }

    /// The directly implemented interfaces.
    #[must_use]
    pub fn interfaces(&self) -> Vec<TypeId> {
        self.interfaces.iter().map(|(_, id)| *id).collect()
    }

    /// The declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldId> {
        self.fields.iter().map(|(_, id)| *id).collect()
    }

    /// The declared methods, in declaration order.
    #[must_use]
    pub fn methods(&self) -> Vec<MethodId> {
        self.methods.iter().map(|(_, id)| *id).collect()
    }

    /// The generic parameters of an open generic definition.
    #[must_use]
    pub fn generic_parameters(&self) -> Vec<TypeId> {
        self.generic_params.iter().map(|(_, id)| *id).collect()
    }

    /// Returns true for value types, including enums and primitives.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.intersects(TypeFlags::VALUE_TYPE | TypeFlags::ENUM)
    }

    /// Returns true for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    /// Returns true for enums.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(TypeFlags::ENUM)
    }

    /// Returns true for arrays.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.contains(TypeFlags::ARRAY)
    }

    /// Returns true for by-ref and pointer types.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        self.flags.contains(TypeFlags::BY_REF)
    }

    /// Returns true for open generic definitions.
    #[must_use]
    pub fn is_generic_definition(&self) -> bool {
        self.flags.contains(TypeFlags::GENERIC_DEFINITION)
    }

    /// Returns true for generic parameters.
    #[must_use]
    pub fn is_generic_parameter(&self) -> bool {
        self.flags.contains(TypeFlags::GENERIC_PARAMETER)
    }

    /// Returns true for abstract types and interfaces.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags
            .intersects(TypeFlags::ABSTRACT | TypeFlags::INTERFACE)
    }
}
