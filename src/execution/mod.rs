//! The execution set and its declarations.
//!
//! An [`ExecutionSet`] is the unit of upload: the classes and methods of one program (or of a
//! kernel), the token space they are addressed through and the static-root table. It is
//! filled by the [`crate::compiler`] and consumed by the [`crate::protocol::session`].
//!
//! # Key Components
//!
//! - [`ExecutionSet`] - classes, methods, tokens and entry points of one build
//! - [`ClassDeclaration`], [`ClassMember`] - a class with its fields and methods
//! - [`MethodDeclaration`], [`MethodFlags`] - a method with its patched body
//! - [`SnapShot`] - the token content of a set, used for incremental uploads
//! - [`StaticRootTable`] - offsets of static fields in the global static vector

pub mod declaration;
pub mod set;
pub mod snapshot;
pub mod statics;

pub use declaration::{ClassDeclaration, ClassMember, MethodDeclaration, MethodFlags};
pub use set::{ExecutionSet, MemoryEstimate};
pub use snapshot::SnapShot;
pub use statics::StaticRootTable;
