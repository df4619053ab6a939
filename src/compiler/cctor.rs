//! Static constructor ordering.
//!
//! The device runs all static constructors once, in a fixed order, before the entry method.
//! A constructor that touches another class goes after that class's constructor. Ties are
//! broken by a fixed priority (the default equality comparers, then `System` types, then
//! everything else) and then by discovery order. Dependency cycles are cut at the entry with
//! the best priority. Finally the configured bring-to-front and send-to-back lists are applied.

use std::collections::HashSet;

use crate::{
    config::CompilerSettings,
    execution::ExecutionSet,
    metadata::{universe::Universe, MethodId, TypeId},
};

struct Entry {
    ty: TypeId,
    cctor: MethodId,
    name: String,
    original_name: Option<String>,
    priority: u8,
    depends_on: HashSet<usize>,
}

impl Entry {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.original_name.as_deref() == Some(name)
    }
}

fn priority(name: &str) -> u8 {
    if name.starts_with("System.Collections.Generic.EqualityComparer`1") {
        0
    } else if name.starts_with("System.") {
        1
    } else {
        2
    }
}

/// Returns the static constructors of `set` in execution order.
///
/// Only classes without `suppress_init` whose type initializer is part of the set with a body
/// take part.
#[must_use]
pub fn static_constructor_order(
    universe: &Universe,
    set: &ExecutionSet,
    settings: &CompilerSettings,
) -> Vec<MethodId> {
    let registry = set.registry();
    let mut entries: Vec<Entry> = set
        .classes()
        .iter()
        .filter(|class| !class.suppress_init)
        .filter_map(|class| {
            let cctor = universe.type_initializer(class.ty)?;
            let cctor = set.resolve_method(universe, cctor).ok()?;
            if !set.method(cctor).is_some_and(|m| m.has_body()) {
                return None;
            }
            let name = universe.full_name(class.ty);
            Some(Entry {
                ty: class.ty,
                cctor,
                priority: priority(&name),
                original_name: registry
                    .partial_original(universe, class.ty)
                    .map(|o| universe.full_name(o)),
                name,
                depends_on: HashSet::new(),
            })
        })
        .collect();

    let types: Vec<TypeId> = entries.iter().map(|e| e.ty).collect();
    for entry in &mut entries {
        let Some(code) = set.method(entry.cctor).and_then(|m| m.code.as_ref()) else {
            continue;
        };
        let used = code
            .types_used
            .iter()
            .copied()
            .chain(code.methods_used.iter().map(|m| universe.method(*m).declaring_type))
            .chain(code.fields_used.iter().map(|f| universe.field(*f).declaring_type));
        for ty in used {
            if let Some(index) = types.iter().position(|t| *t == ty) {
                if ty != entry.ty {
                    entry.depends_on.insert(index);
                }
            }
        }
    }

    let mut placed = vec![false; entries.len()];
    let mut order: Vec<usize> = Vec::with_capacity(entries.len());
    while order.len() < entries.len() {
        let pending: Vec<usize> = (0..entries.len()).filter(|i| !placed[*i]).collect();
        let ready = pending
            .iter()
            .copied()
            .filter(|i| entries[*i].depends_on.iter().all(|d| placed[*d]))
            .min_by_key(|i| (entries[*i].priority, *i));
        let next = match ready {
            Some(next) => next,
            None => {
                let Some(next) = pending
                    .iter()
                    .copied()
                    .min_by_key(|i| (entries[*i].priority, *i))
                else {
                    break;
                };
                log::debug!(
                    "Static constructor dependency cycle broken at {}",
                    entries[next].name
                );
                next
            }
        };
        placed[next] = true;
        order.push(next);
    }

    for name in &settings.cctor_bring_to_front {
        if let Some(position) = order.iter().position(|i| entries[*i].matches(name)) {
            let index = order.remove(position);
            order.insert(0, index);
        }
    }
    for name in &settings.cctor_send_to_back {
        if let Some(position) = order.iter().position(|i| entries[*i].matches(name)) {
            let index = order.remove(position);
            order.push(index);
        }
    }

    order.into_iter().map(|i| entries[i].cctor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::Compiler,
        diagnostics::Diagnostics,
        metadata::{field::FieldFlags, method::MethodBody},
    };

    /// A static class whose constructor reads the static field of `reads`, if any.
    fn static_class(universe: &Universe, namespace: &str, name: &str, reads: Option<TypeId>) -> TypeId {
        let int32 = universe.find_type("System.Int32").unwrap();
        let ty = universe.define_type(namespace, name).build();
        universe
            .define_field(ty, "Value", int32)
            .flags(FieldFlags::STATIC)
            .build();
        let il = match reads {
            Some(other) => {
                let field = universe.static_fields(other)[0];
                let token = universe.field(field).token.value().to_le_bytes();
                // ldsfld; pop; ret
                [&[0x7E][..], &token[..], &[0x26, 0x2A][..]].concat()
            }
            None => vec![0x2A],
        };
        universe
            .define_static_constructor(ty)
            .body(MethodBody::new(il, 1))
            .build();
        ty
    }

    fn order_names(universe: &Universe, types: &[TypeId], settings: CompilerSettings) -> Vec<String> {
        let compiler = Compiler::new(universe, &[]).unwrap();
        let mut set = compiler.empty_set(settings.clone());
        let diagnostics = Diagnostics::new();
        let mut context = compiler.context(universe, &diagnostics);
        for ty in types {
            context.prepare_class(&mut set, *ty).unwrap();
            let cctor = universe.type_initializer(*ty).unwrap();
            context.prepare_method(&mut set, cctor).unwrap();
        }
        static_constructor_order(universe, &set, &settings)
            .into_iter()
            .map(|m| universe.full_name(universe.method(m).declaring_type))
            .collect()
    }

    #[test]
    fn dependencies_run_first() {
        let universe = Universe::with_core_library();
        let config = static_class(&universe, "Demo", "Config", None);
        let board = static_class(&universe, "Demo", "Board", Some(config));
        let names = order_names(&universe, &[board, config], CompilerSettings::default());
        assert_eq!(names, vec!["Demo.Config".to_string(), "Demo.Board".to_string()]);
    }

    #[test]
    fn system_types_come_before_user_types() {
        let universe = Universe::with_core_library();
        let user = static_class(&universe, "Demo", "Board", None);
        let system = static_class(&universe, "System", "Clock", None);
        let names = order_names(&universe, &[user, system], CompilerSettings::default());
        assert_eq!(names, vec!["System.Clock".to_string(), "Demo.Board".to_string()]);
    }

    #[test]
    fn cycles_are_broken() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let a = universe.define_type("Demo", "A").build();
        let b = universe.define_type("Demo", "B").build();
        let a_value = universe
            .define_field(a, "Value", int32)
            .flags(FieldFlags::STATIC)
            .build();
        let b_value = universe
            .define_field(b, "Value", int32)
            .flags(FieldFlags::STATIC)
            .build();
        for (ty, other) in [(a, b_value), (b, a_value)] {
            let token = universe.field(other).token.value().to_le_bytes();
            universe
                .define_static_constructor(ty)
                .body(MethodBody::new(
                    [&[0x7E][..], &token[..], &[0x26, 0x2A][..]].concat(),
                    1,
                ))
                .build();
        }

        let names = order_names(&universe, &[b, a], CompilerSettings::default());
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"Demo.A".to_string()));
        assert!(names.contains(&"Demo.B".to_string()));
    }

    #[test]
    fn front_and_back_lists() {
        let universe = Universe::with_core_library();
        let a = static_class(&universe, "Demo", "A", None);
        let b = static_class(&universe, "Demo", "B", None);
        let c = static_class(&universe, "Demo", "C", None);
        let settings = CompilerSettings {
            cctor_bring_to_front: vec!["Demo.B".to_string(), "Demo.C".to_string()],
            cctor_send_to_back: vec!["Demo.A".to_string()],
            ..CompilerSettings::default()
        };
        let names = order_names(&universe, &[a, b, c], settings);
        assert_eq!(
            names,
            vec!["Demo.C".to_string(), "Demo.B".to_string(), "Demo.A".to_string()]
        );
    }
}
