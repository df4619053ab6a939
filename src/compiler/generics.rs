//! Companion types of generic framework classes.
//!
//! Some framework generics pick their implementation at run time through reflection: the
//! default `EqualityComparer<T>` instantiates `GenericEqualityComparer<T>` if `T` implements
//! `IEquatable<T>` and `ObjectEqualityComparer<T>` otherwise. Nothing in the IL references
//! the chosen type, so the closure builder adds it whenever the generic itself becomes part
//! of the execution set.

use crate::{
    metadata::{universe::Universe, TypeId},
    Result,
};

const COLLECTIONS: &str = "System.Collections.Generic";

/// Returns the companion instances required by `ty`, or nothing if `ty` is not one of the
/// generics that select an implementation at run time.
///
/// Companions whose definition is absent from `universe` are skipped.
///
/// # Errors
///
/// Fails if a companion definition cannot be instantiated with the arguments of `ty`.
pub fn companion_types(universe: &Universe, ty: TypeId) -> Result<Vec<TypeId>> {
    let Some(definition) = universe.generic_definition(ty) else {
        return Ok(Vec::new());
    };
    let arguments = universe.generic_arguments(ty);
    let [argument] = arguments.as_slice() else {
        return Ok(Vec::new());
    };
    let argument = *argument;

    let mut companions = Companions {
        universe,
        types: Vec::new(),
    };

    match universe.full_name(definition).as_str() {
        "System.Collections.Generic.EqualityComparer`1" => {
            equality_comparer(&mut companions, argument)?;
        }
        "System.Collections.Generic.Comparer`1" => {
            companions.add("System.IComparable`1", argument)?;
            companions.add(&format!("{COLLECTIONS}.ObjectComparer`1"), argument)?;
        }
        "System.Nullable`1" => {
            companions.add(&format!("{COLLECTIONS}.ObjectEqualityComparer`1"), ty)?;
        }
        "System.Collections.Generic.ArraySortHelper`1" => {
            companions.add(&format!("{COLLECTIONS}.GenericArraySortHelper`1"), argument)?;
        }
        _ => {}
    }
    Ok(companions.types)
}

struct Companions<'a> {
    universe: &'a Universe,
    types: Vec<TypeId>,
}

impl Companions<'_> {
    /// Instantiates `definition` over `argument`. Returns the instance, or `None` if the
    /// definition is unknown.
    fn add(&mut self, definition: &str, argument: TypeId) -> Result<Option<TypeId>> {
        let Some(open) = self.universe.find_type(definition) else {
            log::debug!(
                "Companion {definition} of {} is not part of the program model",
                self.universe.full_name(argument)
            );
            return Ok(None);
        };
        let instance = self.universe.instantiate(open, &[argument])?;
        if !self.types.contains(&instance) {
            self.types.push(instance);
        }
        Ok(Some(instance))
    }
}

fn equality_comparer(companions: &mut Companions<'_>, argument: TypeId) -> Result<()> {
    let universe = companions.universe;
    let equatable = companions.add("System.IEquatable`1", argument)?;
    let is_equatable = equatable.is_some_and(|e| universe.is_assignable_from(e, argument));

    if universe.is_reference_type(argument) {
        let comparer = if is_equatable {
            "GenericEqualityComparer`1"
        } else {
            "ObjectEqualityComparer`1"
        };
        companions.add(&format!("{COLLECTIONS}.{comparer}"), argument)?;
        return Ok(());
    }

    let nullable = universe
        .generic_definition(argument)
        .is_some_and(|d| universe.full_name(d) == "System.Nullable`1");
    if nullable {
        let inner = universe.generic_arguments(argument);
        if let [inner] = inner.as_slice() {
            if universe.type_def(*inner).is_enum() {
                companions.add(&format!("{COLLECTIONS}.EnumEqualityComparer`1"), *inner)?;
            } else {
                companions.add(&format!("{COLLECTIONS}.NullableEqualityComparer`1"), *inner)?;
                companions.add(&format!("{COLLECTIONS}.ObjectEqualityComparer`1"), argument)?;
            }
        }
        return Ok(());
    }

    if is_equatable {
        companions.add(&format!("{COLLECTIONS}.GenericEqualityComparer`1"), argument)?;
        companions.add(&format!("{COLLECTIONS}.GenericComparer`1"), argument)?;
    } else {
        companions.add(&format!("{COLLECTIONS}.ObjectEqualityComparer`1"), argument)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::TypeFlags;

    fn comparer_universe() -> (Universe, TypeId) {
        let universe = Universe::with_core_library();
        let open = |name: &str| {
            universe
                .define_type(COLLECTIONS, name)
                .generic_parameters(&["T"])
                .build()
        };
        let equality_comparer = open("EqualityComparer`1");
        for name in [
            "GenericEqualityComparer`1",
            "ObjectEqualityComparer`1",
            "NullableEqualityComparer`1",
            "EnumEqualityComparer`1",
            "GenericComparer`1",
        ] {
            open(name);
        }
        (universe, equality_comparer)
    }

    fn names(universe: &Universe, types: &[TypeId]) -> Vec<String> {
        types.iter().map(|t| universe.full_name(*t)).collect()
    }

    #[test]
    fn reference_types_without_equatable() {
        let (universe, comparer) = comparer_universe();
        let widget = universe.define_type("Demo", "Widget").build();
        let instance = universe.instantiate(comparer, &[widget]).unwrap();

        let companions = companion_types(&universe, instance).unwrap();
        assert_eq!(
            names(&universe, &companions),
            vec![
                "System.IEquatable`1[Demo.Widget]".to_string(),
                "System.Collections.Generic.ObjectEqualityComparer`1[Demo.Widget]".to_string(),
            ]
        );
    }

    #[test]
    fn equatable_value_types() {
        let (universe, comparer) = comparer_universe();
        let equatable = universe.find_type("System.IEquatable`1").unwrap();
        let point = universe
            .define_type("Demo", "Point")
            .flags(TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
            .build();
        let point_equatable = universe.instantiate(equatable, &[point]).unwrap();
        universe.type_def(point).interfaces.push(point_equatable);

        let instance = universe.instantiate(comparer, &[point]).unwrap();
        let companions = names(&universe, &companion_types(&universe, instance).unwrap());
        assert!(companions
            .contains(&"System.Collections.Generic.GenericEqualityComparer`1[Demo.Point]".to_string()));
        assert!(companions
            .contains(&"System.Collections.Generic.GenericComparer`1[Demo.Point]".to_string()));
    }

    #[test]
    fn nullable_enums_use_the_enum_comparer() {
        let (universe, comparer) = comparer_universe();
        let enum_base = universe.find_type("System.Enum").unwrap();
        let color = universe
            .define_type("Demo", "Color")
            .flags(TypeFlags::VALUE_TYPE | TypeFlags::ENUM | TypeFlags::SEALED)
            .base(enum_base)
            .build();
        let nullable = universe.find_type("System.Nullable`1").unwrap();
        let nullable_color = universe.instantiate(nullable, &[color]).unwrap();

        let instance = universe.instantiate(comparer, &[nullable_color]).unwrap();
        let companions = names(&universe, &companion_types(&universe, instance).unwrap());
        assert!(companions
            .contains(&"System.Collections.Generic.EnumEqualityComparer`1[Demo.Color]".to_string()));
        assert!(!companions.iter().any(|c| c.contains("NullableEqualityComparer")));
    }

    #[test]
    fn unrelated_generics_have_no_companions() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let span = universe.find_type("System.Span`1").unwrap();
        let instance = universe.instantiate(span, &[int32]).unwrap();
        assert!(companion_types(&universe, instance).unwrap().is_empty());
        assert!(companion_types(&universe, int32).unwrap().is_empty());
    }
}
