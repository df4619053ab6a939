//! The in-memory program model.
//!
//! The compiler never looks at a PE file. It works on a [`universe::Universe`]: an arena of
//! type, method and field definitions, each registered under the original metadata
//! [`token::Token`] that unpatched IL uses to reference it. The universe plays the part of the
//! loaded module: it resolves IL operands, answers inheritance and interface questions and
//! creates closed generic instances on demand.
//!
//! # Key Components
//!
//! - [`universe::Universe`] - arena, token tables, name index and the builder API
//! - [`types::TypeDef`] - a class, struct, interface, enum, array or generic instance
//! - [`method::MethodDef`] - a method with its optional IL body
//! - [`field::FieldDef`] - an instance, static or literal field
//! - [`TypeId`], [`MethodId`], [`FieldId`] - stable arena indices
//! - [`MemberRef`] - the result of resolving a token

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod field;
pub mod method;
pub mod token;
pub mod types;
pub mod universe;

/// Index of a [`types::TypeDef`] inside a [`universe::Universe`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub(crate) usize);

/// Index of a [`method::MethodDef`] inside a [`universe::Universe`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub(crate) usize);

/// Index of a [`field::FieldDef`] inside a [`universe::Universe`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldId(pub(crate) usize);

macro_rules! arena_id {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Returns the arena index.
            #[must_use]
            pub fn index(&self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

arena_id!(TypeId, "Type");
arena_id!(MethodId, "Method");
arena_id!(FieldId, "Field");

/// A resolved member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberRef {
    /// A type
    Type(TypeId),
    /// A method or constructor
    Method(MethodId),
    /// A field
    Field(FieldId),
}

impl MemberRef {
    /// Returns the type, if this is one.
    #[must_use]
    pub fn as_type(&self) -> Option<TypeId> {
        match self {
            MemberRef::Type(ty) => Some(*ty),
            _ => None,
        }
    }

    /// Returns the method, if this is one.
    #[must_use]
    pub fn as_method(&self) -> Option<MethodId> {
        match self {
            MemberRef::Method(method) => Some(*method),
            _ => None,
        }
    }

    /// Returns the field, if this is one.
    #[must_use]
    pub fn as_field(&self) -> Option<FieldId> {
        match self {
            MemberRef::Field(field) => Some(*field),
            _ => None,
        }
    }
}
