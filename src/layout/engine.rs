//! Field order, size and offset computation.

use serde::Serialize;

use crate::{
    layout::kind::{
        align_up, normalize_struct_size, struct_member_size, struct_min_member_size,
        variable_type, VariableKind, POINTER_SIZE,
    },
    metadata::{universe::Universe, FieldId, TypeId},
    Error, Result,
};

/// Types whose native counterpart accesses fields at hard-coded positions. The listed fields
/// come first, in this order; any other field follows in declaration order.
pub const FIELD_ORDER_OVERRIDES: &[(&str, &[&str])] = &[
    ("System.String", &["_stringLength", "_firstChar"]),
    ("System.Exception", &["_message"]),
    (
        "System.Delegate",
        &["_target", "_methodBase", "_methodPtr", "_methodPtrAux"],
    ),
    (
        "System.MulticastDelegate",
        &["_invocationList", "_invocationCount"],
    ),
];

/// Storage of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSlot {
    /// The field
    pub field: FieldId,
    /// Slot interpretation
    pub kind: VariableKind,
    /// Bytes reserved for the field
    pub size: u32,
    /// Offset within the instance; static fields get theirs from the static-root table
    pub offset: u32,
    /// True for static fields
    pub is_static: bool,
}

/// The computed layout of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassLayout {
    /// Instance fields in layout order, followed by static fields
    pub fields: Vec<FieldSlot>,
    /// Size of an instance, including inherited fields, excluding the object header
    pub dynamic_size: u32,
    /// Bytes needed by the static fields of this type
    pub static_size: u32,
}

impl ClassLayout {
    /// The instance field slots.
    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldSlot> {
        self.fields.iter().filter(|f| !f.is_static)
    }

    /// The static field slots.
    pub fn static_fields(&self) -> impl Iterator<Item = &FieldSlot> {
        self.fields.iter().filter(|f| f.is_static)
    }

    /// Looks up the slot of a field.
    #[must_use]
    pub fn slot(&self, field: FieldId) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.field == field)
    }
}

/// Size of a static field slot: at least a pointer, 8 for wide values, larger value types
/// padded to a multiple of 4.
#[must_use]
pub fn static_slot_size(size: u32) -> u32 {
    let size = size.max(POINTER_SIZE);
    if size > 8 {
        align_up(size, 4)
    } else {
        size
    }
}

/// Returns the declared fields of `ty` with storage, in layout order.
#[must_use]
pub fn ordered_fields(universe: &Universe, ty: TypeId) -> Vec<FieldId> {
    let def = universe.type_def(ty);
    let mut fields: Vec<FieldId> = def
        .fields()
        .into_iter()
        .filter(|f| universe.field(*f).has_storage())
        .collect();

    let full_name = def.full_name();
    if let Some((_, order)) = FIELD_ORDER_OVERRIDES.iter().find(|(name, _)| *name == full_name) {
        let position = |field: &FieldId| {
            let name = &universe.field(*field).name;
            order
                .iter()
                .position(|n| n == name)
                .unwrap_or(order.len())
        };
        fields.sort_by_key(position);
    } else if def.is_value_type() {
        fields.sort_by_key(|f| universe.field(*f).token.value());
    }
    fields
}

/// Computes the layout of `ty`.
///
/// Reference types place their own fields after the inherited ones, one 4-byte slot per field
/// of up to 4 bytes and a multiple of 8 otherwise. Value types with more than one field are
/// laid out sequentially, then every field is inflated until the following field starts at an
/// offset divisible by `min(size, 4)`.
///
/// # Errors
///
/// Returns [`Error::LayoutMismatch`] if the size of a value type disagrees with the size the
/// field-type classifier computes for it.
pub fn layout_class(universe: &Universe, ty: TypeId) -> Result<ClassLayout> {
    let def = universe.type_def(ty);
    let is_value_type = def.is_value_type();
    let min_size = struct_min_member_size(universe, ty);

    let mut instance = Vec::new();
    let mut statics = Vec::new();
    for field_id in ordered_fields(universe, ty) {
        let field = universe.field(field_id);
        let (mut kind, size) = variable_type(universe, field.field_type, min_size)?;
        if field.name == "_methodPtr" && def.full_name() == "System.Delegate" {
            kind = VariableKind::FunctionPointer;
        }

        if field.is_static() {
            let size = if universe.is_reference_type(field.field_type) {
                POINTER_SIZE
            } else {
                size
            };
            statics.push(FieldSlot {
                field: field_id,
                kind,
                size: static_slot_size(size),
                offset: 0,
                is_static: true,
            });
        } else {
            let size = if is_value_type {
                struct_member_size(kind, size, min_size)
            } else if size <= 4 {
                4
            } else {
                align_up(size, 8)
            };
            instance.push(FieldSlot {
                field: field_id,
                kind,
                size,
                offset: 0,
                is_static: false,
            });
        }
    }

    let dynamic_size = if is_value_type {
        let mut size = align_value_type_fields(&mut instance);
        if let Some(explicit) = def.explicit_size {
            size = size.max(explicit);
        }
        size
    } else {
        let base_size = match def.base() {
            Some(base) => layout_class(universe, base)?.dynamic_size,
            None => 0,
        };
        let mut offset = base_size;
        for slot in &mut instance {
            slot.offset = offset;
            offset += slot.size;
        }
        offset
    };

    if is_value_type && def.primitive.is_none() && !def.is_enum() {
        let (_, classified) = variable_type(universe, ty, 1)?;
        let (_, laid_out) = normalize_struct_size(dynamic_size, 1);
        if classified != laid_out {
            return Err(Error::LayoutMismatch {
                type_name: def.full_name(),
                layout: laid_out,
                classifier: classified,
            });
        }
    }

    let static_size = statics.iter().map(|s| s.size).sum();
    log::debug!(
        "Layout of {}: {} instance bytes, {} static bytes",
        def.full_name(),
        dynamic_size,
        static_size
    );

    instance.extend(statics);
    Ok(ClassLayout {
        fields: instance,
        dynamic_size,
        static_size,
    })
}

fn assign_offsets(fields: &mut [FieldSlot]) -> u32 {
    let mut offset = 0;
    for field in fields.iter_mut() {
        field.offset = offset;
        offset += field.size;
    }
    offset
}

fn align_value_type_fields(fields: &mut [FieldSlot]) -> u32 {
    let mut total = assign_offsets(fields);
    if fields.len() <= 1 {
        return total;
    }

    let mut changed = true;
    while changed {
        changed = false;
        for index in 0..fields.len() {
            let next_size = match fields.get(index + 1) {
                Some(next) => next.size,
                None => total.min(4),
            };
            let start = fields[index].offset;
            let mut size = fields[index].size;
            while (start + size) % next_size % 4 != 0 {
                size += 1;
            }
            if size != fields[index].size {
                fields[index].size = size;
                total = assign_offsets(fields);
                changed = true;
            }
        }
    }

    if total > 3 {
        align_up(total, 4)
    } else {
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{field::FieldFlags, types::TypeFlags};

    #[test]
    fn string_field_order_override() {
        let universe = Universe::with_core_library();
        let string = universe.find_type("System.String").unwrap();
        let layout = layout_class(&universe, string).unwrap();

        let names: Vec<&str> = layout
            .instance_fields()
            .map(|f| universe.field(f.field).name.as_str())
            .collect();
        assert_eq!(names, ["_stringLength", "_firstChar"]);
        assert_eq!(layout.dynamic_size, 8);
    }

    #[test]
    fn delegate_method_pointer_kind() {
        let universe = Universe::with_core_library();
        let delegate = universe.find_type("System.Delegate").unwrap();
        let multicast = universe.find_type("System.MulticastDelegate").unwrap();

        let layout = layout_class(&universe, delegate).unwrap();
        let slot = layout
            .slot(universe.find_field(delegate, "_methodPtr").unwrap())
            .unwrap();
        assert_eq!(slot.kind, VariableKind::FunctionPointer);
        assert_eq!(slot.offset, 8);

        let derived = layout_class(&universe, multicast).unwrap();
        assert_eq!(derived.dynamic_size, 24);
        assert_eq!(derived.instance_fields().next().unwrap().offset, 16);
    }

    #[test]
    fn value_type_alignment() {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let int16 = universe.find_type("System.Int16").unwrap();
        let int32 = universe.find_type("System.Int32").unwrap();
        let int64 = universe.find_type("System.Int64").unwrap();

        let mixed = universe
            .define_type("Demo", "Mixed")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(mixed, "A", byte).build();
        universe.define_field(mixed, "B", int16).build();
        universe.define_field(mixed, "C", int32).build();
        universe.define_field(mixed, "D", int64).build();
        universe.define_field(mixed, "E", byte).build();

        let layout = layout_class(&universe, mixed).unwrap();
        let offsets: Vec<u32> = layout.instance_fields().map(|f| f.offset).collect();
        assert_eq!(offsets, [0, 2, 4, 8, 16]);
        assert_eq!(layout.dynamic_size, 20);
        for slot in layout.instance_fields() {
            let align = slot.size.min(4);
            assert_eq!(slot.offset % align.max(1), 0);
        }
    }

    #[test]
    fn byte_int_byte_struct() -> Result<()> {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let int32 = universe.find_type("System.Int32").unwrap();
        let padded = universe
            .define_type("Demo", "Padded")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(padded, "Head", byte).build();
        universe.define_field(padded, "Value", int32).build();
        universe.define_field(padded, "Tail", byte).build();

        let layout = layout_class(&universe, padded)?;
        let offsets: Vec<u32> = layout.instance_fields().map(|f| f.offset).collect();
        assert_eq!(offsets, [0, 4, 8]);
        assert_eq!(layout.dynamic_size, 12);
        Ok(())
    }

    #[test]
    fn small_struct_is_not_padded() {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let pair = universe
            .define_type("Demo", "BytePair")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(pair, "Lo", byte).build();
        universe.define_field(pair, "Hi", byte).build();

        let layout = layout_class(&universe, pair).unwrap();
        assert_eq!(layout.dynamic_size, 2);
    }

    #[test]
    fn struct_with_reference_uses_word_slots() {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let string = universe.find_type("System.String").unwrap();
        let named = universe
            .define_type("Demo", "Named")
            .flags(TypeFlags::VALUE_TYPE)
            .build();
        universe.define_field(named, "Flag", byte).build();
        universe.define_field(named, "Other", byte).build();
        universe.define_field(named, "Name", string).build();

        let layout = layout_class(&universe, named).unwrap();
        let offsets: Vec<u32> = layout.instance_fields().map(|f| f.offset).collect();
        assert_eq!(offsets, [0, 4, 8]);
        assert_eq!(layout.dynamic_size, 12);
    }

    #[test]
    fn class_fields_follow_base() {
        let universe = Universe::with_core_library();
        let byte = universe.find_type("System.Byte").unwrap();
        let int64 = universe.find_type("System.Int64").unwrap();
        let string = universe.find_type("System.String").unwrap();

        let animal = universe.define_type("Demo", "Animal").build();
        universe.define_field(animal, "Name", string).build();
        let dog = universe.define_type("Demo", "Dog").base(animal).build();
        universe.define_field(dog, "Age", byte).build();
        universe.define_field(dog, "Chip", int64).build();
        universe
            .define_field(dog, "Count", int64)
            .flags(FieldFlags::STATIC)
            .build();
        universe
            .define_field(dog, "Kind", string)
            .flags(FieldFlags::LITERAL | FieldFlags::STATIC)
            .build();

        let layout = layout_class(&universe, dog).unwrap();
        let offsets: Vec<(u32, u32)> = layout
            .instance_fields()
            .map(|f| (f.offset, f.size))
            .collect();
        assert_eq!(offsets, [(4, 4), (8, 8)]);
        assert_eq!(layout.dynamic_size, 16);
        assert_eq!(layout.static_size, 8);
        assert_eq!(layout.static_fields().count(), 1);
    }

    #[test]
    fn static_slot_sizes() {
        assert_eq!(static_slot_size(1), 4);
        assert_eq!(static_slot_size(8), 8);
        assert_eq!(static_slot_size(10), 12);
        assert_eq!(static_slot_size(16), 16);
    }

    #[test]
    fn nullable_instance_layout() {
        let universe = Universe::with_core_library();
        let nullable = universe.find_type("System.Nullable`1").unwrap();
        let int64 = universe.find_type("System.Int64").unwrap();
        let closed = universe.instantiate(nullable, &[int64]).unwrap();

        let layout = layout_class(&universe, closed).unwrap();
        let offsets: Vec<u32> = layout.instance_fields().map(|f| f.offset).collect();
        assert_eq!(offsets, [0, 4]);
        assert_eq!(layout.dynamic_size, 12);
    }
}
