//! Variable kinds and the field-type size classifier.

use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{
    metadata::{types::PrimitiveKind, universe::Universe, TypeId},
    Error, Result,
};

/// Size of a reference or native pointer on the target.
pub const POINTER_SIZE: u32 = 4;

/// Bit set on a member kind when the field lives in the static area.
pub const STATIC_MEMBER: u8 = 0x80;

const MAX_NESTING: usize = 32;

/// How the execution engine interprets a variable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[repr(u8)]
pub enum VariableKind {
    /// The slot contains no data
    Void = 0,
    /// Unsigned integer data up to 32 bits
    Uint32 = 1,
    /// Signed integer data up to 32 bits
    Int32 = 2,
    /// True or false
    Boolean = 3,
    /// An object reference
    Object = 4,
    /// A method member of a class declaration
    Method = 5,
    /// Reference to an array of value types
    ValueArray = 6,
    /// Reference to an array of references
    ReferenceArray = 7,
    /// 32-bit float
    Float = 8,
    /// A value type larger than 8 bytes
    LargeValueType = 9,
    /// 64-bit signed integer
    Int64 = 17,
    /// 64-bit unsigned integer
    Uint64 = 18,
    /// 64-bit float
    Double = 20,
    /// A managed reference (`ByReference<T>`)
    Reference = 32,
    /// Pointer to a constant initializer
    RuntimeFieldHandle = 33,
    /// A type token
    RuntimeTypeHandle = 34,
    /// Address of a variable on another frame
    AddressOfVariable = 35,
    /// A function pointer
    FunctionPointer = 36,
}

impl VariableKind {
    /// The raw value.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Decodes a kind reported by the engine, without the static bit.
    #[must_use]
    pub fn from_value(value: u8) -> Option<Self> {
        VariableKind::iter().find(|k| k.value() == value)
    }

    /// The value sent in a class declaration, with the static bit applied.
    #[must_use]
    pub fn member_value(self, is_static: bool) -> u8 {
        if is_static {
            self.value() | STATIC_MEMBER
        } else {
            self.value()
        }
    }

    /// Returns true for kinds that occupy 8 bytes.
    #[must_use]
    pub fn is_wide(self) -> bool {
        matches!(
            self,
            VariableKind::Int64 | VariableKind::Uint64 | VariableKind::Double
        )
    }
}

/// Rounds `value` up to a multiple of `alignment`.
#[must_use]
pub(crate) fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Normalises the raw size of a value type to the size it occupies as a field or local.
#[must_use]
pub(crate) fn normalize_struct_size(raw: u32, min_size: u32) -> (VariableKind, u32) {
    if raw <= 4 {
        (VariableKind::Uint32, min_size.max(4))
    } else if raw <= 8 {
        (VariableKind::Uint64, min_size.max(8))
    } else {
        (VariableKind::LargeValueType, align_up(raw, 4))
    }
}

/// The minimum member size of a value type's fields: 4 when the struct embeds a reference, so
/// the garbage collector can probe it at aligned addresses.
#[must_use]
pub fn struct_min_member_size(universe: &Universe, ty: TypeId) -> u32 {
    let def = universe.type_def(ty);
    if !def.is_value_type() {
        return 1;
    }
    let embeds_reference = universe
        .instance_fields(ty)
        .into_iter()
        .any(|f| universe.is_reference_type(universe.field(f).field_type));
    if embeds_reference {
        POINTER_SIZE
    } else {
        1
    }
}

/// Classifies a field, local or argument type and returns its kind and size in bytes.
///
/// Value types are measured from their instance fields with the same alignment rules the
/// layout engine applies, then normalised to 4, 8 or a multiple of 4 bytes.
///
/// # Errors
///
/// Returns [`Error::RecursionLimit`] for value types that contain themselves.
pub fn variable_type(universe: &Universe, ty: TypeId, min_size: u32) -> Result<(VariableKind, u32)> {
    classify(universe, ty, min_size, 0)
}

fn classify(
    universe: &Universe,
    ty: TypeId,
    min_size: u32,
    depth: usize,
) -> Result<(VariableKind, u32)> {
    if depth > MAX_NESTING {
        return Err(Error::RecursionLimit(MAX_NESTING));
    }

    let def = universe.type_def(ty);
    if let Some(primitive) = def.primitive {
        let kind = match primitive {
            PrimitiveKind::SByte | PrimitiveKind::Int16 | PrimitiveKind::Int32 => {
                VariableKind::Int32
            }
            PrimitiveKind::Byte
            | PrimitiveKind::UInt16
            | PrimitiveKind::Char
            | PrimitiveKind::UInt32 => VariableKind::Uint32,
            PrimitiveKind::Boolean => VariableKind::Boolean,
            PrimitiveKind::Int64 => VariableKind::Int64,
            PrimitiveKind::UInt64 => VariableKind::Uint64,
            PrimitiveKind::Single => VariableKind::Float,
            PrimitiveKind::Double => VariableKind::Double,
            PrimitiveKind::IntPtr | PrimitiveKind::UIntPtr => {
                return Ok((VariableKind::AddressOfVariable, POINTER_SIZE))
            }
        };
        return Ok((kind, min_size.max(primitive.size())));
    }

    if def.is_array() {
        let Some(element) = def.element else {
            return Err(malformed_error!("Array type {} has no element type", def.full_name()));
        };
        if universe.type_def(element).is_value_type() {
            let (_, size) = classify(universe, element, min_size, depth + 1)?;
            return Ok((VariableKind::ValueArray, size));
        }
        return Ok((VariableKind::ReferenceArray, POINTER_SIZE));
    }

    if def.is_enum() {
        return Ok((VariableKind::Uint32, min_size.max(4)));
    }

    if def.is_by_ref() {
        return Ok((VariableKind::AddressOfVariable, POINTER_SIZE));
    }

    if def.is_value_type() && !def.is_generic_parameter() {
        if let Some(definition) = universe.generic_definition(ty) {
            match universe.type_def(definition).full_name().as_str() {
                "System.ByReference`1" => return Ok((VariableKind::Reference, min_size.max(4))),
                "System.Span`1" => {
                    return Ok((VariableKind::LargeValueType, POINTER_SIZE + 4));
                }
                _ => {}
            }
        }

        let inner_min = min_size.max(struct_min_member_size(universe, ty));
        let raw = aligned_struct_size(universe, ty, inner_min, depth)?;
        let raw = match def.explicit_size {
            Some(explicit) if explicit.max(4) > raw => explicit.max(4),
            _ => raw,
        };
        return Ok(normalize_struct_size(raw, min_size));
    }

    Ok((VariableKind::Object, POINTER_SIZE))
}

/// Bytes a member of `kind` occupies inside a value type. Array members are references; the
/// classifier reports their element size instead.
#[must_use]
pub(crate) fn struct_member_size(kind: VariableKind, size: u32, min_size: u32) -> u32 {
    match kind {
        VariableKind::ValueArray | VariableKind::ReferenceArray => POINTER_SIZE.max(min_size),
        _ => size,
    }
}

/// Closed-form size of a value type's instance fields: each field starts at a multiple of
/// `min(size, 4)`, and structs larger than 3 bytes are padded to a multiple of 4.
fn aligned_struct_size(universe: &Universe, ty: TypeId, min_size: u32, depth: usize) -> Result<u32> {
    let fields = universe.instance_fields(ty);
    let mut sizes = Vec::with_capacity(fields.len());
    for field in &fields {
        let (kind, size) = classify(universe, universe.field(*field).field_type, min_size, depth + 1)?;
        sizes.push(struct_member_size(kind, size, min_size));
    }

    if sizes.len() <= 1 {
        return Ok(sizes.first().copied().unwrap_or(0));
    }

    let mut end = 0;
    for size in sizes {
        end = align_up(end, size.min(4)) + size;
    }
    Ok(if end > 3 { align_up(end, 4) } else { end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::TypeFlags;

    #[test]
    fn primitives_and_references() {
        let universe = Universe::with_core_library();
        let find = |name: &str| universe.find_type(name).unwrap();

        assert_eq!(
            variable_type(&universe, find("System.Byte"), 1).unwrap(),
            (VariableKind::Uint32, 1)
        );
        assert_eq!(
            variable_type(&universe, find("System.Int16"), 4).unwrap(),
            (VariableKind::Int32, 4)
        );
        assert_eq!(
            variable_type(&universe, find("System.Double"), 1).unwrap(),
            (VariableKind::Double, 8)
        );
        assert_eq!(
            variable_type(&universe, find("System.String"), 1).unwrap(),
            (VariableKind::Object, 4)
        );
        assert_eq!(
            variable_type(&universe, find("System.IntPtr"), 1).unwrap(),
            (VariableKind::AddressOfVariable, 4)
        );
    }

    #[test]
    fn arrays_by_element() {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let string = universe.find_type("System.String").unwrap();

        assert_eq!(
            variable_type(&universe, universe.array_of(byte), 1).unwrap(),
            (VariableKind::ValueArray, 1)
        );
        assert_eq!(
            variable_type(&universe, universe.array_of(string), 1).unwrap(),
            (VariableKind::ReferenceArray, 4)
        );
    }

    #[test]
    fn structs_are_normalised() {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let int32 = universe.find_type("System.Int32").unwrap();
        let int64 = universe.find_type("System.Int64").unwrap();

        let small = universe
            .define_type("Demo", "Small")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(small, "A", byte).build();
        universe.define_field(small, "B", byte).build();
        assert_eq!(
            variable_type(&universe, small, 1).unwrap(),
            (VariableKind::Uint32, 4)
        );

        // byte, int: the int moves to offset 4
        let padded = universe
            .define_type("Demo", "Padded")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(padded, "A", byte).build();
        universe.define_field(padded, "B", int32).build();
        assert_eq!(
            variable_type(&universe, padded, 1).unwrap(),
            (VariableKind::Uint64, 8)
        );

        let large = universe
            .define_type("Demo", "Large")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(large, "A", int64).build();
        universe.define_field(large, "B", byte).build();
        assert_eq!(
            variable_type(&universe, large, 1).unwrap(),
            (VariableKind::LargeValueType, 12)
        );

        let explicit = universe
            .define_type("Demo", "Explicit")
            .flags(TypeFlags::VALUE_TYPE)
            .explicit_size(16)
            .build();
        assert_eq!(
            variable_type(&universe, explicit, 1).unwrap(),
            (VariableKind::LargeValueType, 16)
        );
    }

    #[test]
    fn special_generic_value_types() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let span = universe.find_type("System.Span`1").unwrap();
        let by_reference = universe.find_type("System.ByReference`1").unwrap();

        let span_int = universe.instantiate(span, &[int32]).unwrap();
        let ref_int = universe.instantiate(by_reference, &[int32]).unwrap();
        assert_eq!(
            variable_type(&universe, span_int, 1).unwrap(),
            (VariableKind::LargeValueType, 8)
        );
        assert_eq!(
            variable_type(&universe, ref_int, 1).unwrap(),
            (VariableKind::Reference, 4)
        );
    }

    #[test]
    fn member_values_carry_static_bit() {
        assert_eq!(VariableKind::Int64.member_value(false), 17);
        assert_eq!(VariableKind::Int64.member_value(true), 0x91);
        assert_eq!(VariableKind::from_value(0x91 & !STATIC_MEMBER), Some(VariableKind::Int64));
        assert_eq!(VariableKind::from_value(10), None);
        assert!(VariableKind::Double.is_wide());
        assert!(!VariableKind::Float.is_wide());
    }
}
