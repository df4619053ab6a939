//! Class layout engine.
//!
//! Computes the field order, size and byte offset of every field of a type, so that the
//! execution engine on the device reproduces identical addressing. Two independent
//! computations exist:
//!
//! - [`variable_type`] classifies the type of a field, local or argument into a
//!   [`VariableKind`] and a size, measuring value types in closed form.
//! - [`layout_class`] lays out the fields of one type, running the iterative alignment
//!   correction for value types.
//!
//! Both must agree on the size of every value type; a disagreement aborts the build with
//! [`crate::Error::LayoutMismatch`].
//!
//! Static fields are not placed by this module. Their sizes are reported here and their
//! offsets are assigned from the static-root table of the execution set.

pub mod engine;
pub mod kind;

pub use engine::{
    layout_class, ordered_fields, static_slot_size, ClassLayout, FieldSlot, FIELD_ORDER_OVERRIDES,
};
pub use kind::{variable_type, VariableKind, POINTER_SIZE, STATIC_MEMBER};
