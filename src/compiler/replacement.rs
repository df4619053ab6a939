//! The replacement registry.
//!
//! Framework code frequently relies on features the execution engine does not offer. Such
//! code is swapped for alternate implementations before it is analyzed:
//!
//! - an **entire-type** replacement redirects every reference to the original type (and to
//!   its closed generic instances, and optionally to its subclasses) to the replacement type.
//!   Every member used through the original must exist on the replacement.
//! - a **partial** replacement swaps individual methods. The original type stays in the
//!   program; each non-private method of the replacement type replaces the original method
//!   with the same signature.
//! - **method** entries replace single methods by name.
//! - **native** entries bind methods to ids of functions built into the execution engine.
//!
//! The registry is built once from [`ReplacementConfig`] data, resolved against a
//! [`Universe`], and shared read-only between builds.
//!
//! # Examples
//!
//! ```rust
//! use ilforge::compiler::replacement::{ReplacementConfig, ReplacementRegistry, TypeReplacementEntry};
//! use ilforge::metadata::universe::Universe;
//!
//! let universe = Universe::with_core_library();
//! universe.define_type("Demo", "Clock").build();
//! universe.define_type("Demo", "MiniClock").build();
//!
//! let config = ReplacementConfig {
//!     types: vec![TypeReplacementEntry::entire("Demo.Clock", "Demo.MiniClock")],
//!     ..ReplacementConfig::default()
//! };
//! let registry = ReplacementRegistry::build(&universe, &[config])?;
//!
//! let clock = universe.find_type("Demo.Clock").unwrap();
//! let mini = universe.find_type("Demo.MiniClock").unwrap();
//! assert_eq!(registry.redirect_type(&universe, clock)?, mini);
//! # Ok::<(), ilforge::Error>(())
//! ```

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    compiler::natives::{
        NativeBinding, NativeMethodTable, OBJECT_EQUALS, OBJECT_GET_HASH_CODE, OBJECT_TO_STRING,
    },
    metadata::{
        method::{MethodAttributes, MethodKind},
        universe::Universe,
        FieldId, MethodId, TypeId,
    },
    Error, Result,
};

/// Name of the static fallback method on a replacement type. Members missing on an
/// entire-type replacement are redirected to it instead of failing the build.
pub const NOT_SUPPORTED_FALLBACK: &str = "NotSupportedException";

bitflags! {
    /// Which members of the original type a type replacement covers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReplacementScope: u8 {
        /// Subclasses of the original are replaced as well
        const SUBCLASSES = 0x01;
        /// Private methods of the original are matched too
        const PRIVATES = 0x02;
        /// The static constructor of the replacement does not run at startup
        const SUPPRESS_INIT = 0x04;
    }
}

bitflags! {
    /// Relaxations of the signature comparison between original and replacement methods.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MatchOptions: u8 {
        /// Parameters are compared by name instead of by type
        const COMPARE_BY_PARAMETER_NAMES = 0x01;
        /// Only the name and the parameter count have to match
        const IGNORE_GENERIC_TYPE_ARGUMENT = 0x02;
    }
}

impl Default for ReplacementScope {
    fn default() -> Self {
        ReplacementScope::empty()
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        MatchOptions::empty()
    }
}

/// A type replacement as written in configuration data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeReplacementEntry {
    /// Full name of the original type or open generic definition
    pub original: String,
    /// Full name of the replacement type
    pub replacement: String,
    /// Replace the whole type instead of matching methods
    #[serde(default)]
    pub entire_type: bool,
    /// Members covered
    #[serde(default)]
    pub scope: ReplacementScope,
    /// Signature comparison
    #[serde(default)]
    pub options: MatchOptions,
}

impl TypeReplacementEntry {
    /// An entire-type replacement with the default scope.
    #[must_use]
    pub fn entire(original: &str, replacement: &str) -> Self {
        TypeReplacementEntry {
            original: original.to_string(),
            replacement: replacement.to_string(),
            entire_type: true,
            scope: ReplacementScope::empty(),
            options: MatchOptions::empty(),
        }
    }

    /// A partial replacement with the default scope.
    #[must_use]
    pub fn partial(original: &str, replacement: &str) -> Self {
        TypeReplacementEntry {
            entire_type: false,
            ..Self::entire(original, replacement)
        }
    }
}

/// A single method replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodReplacementEntry {
    /// Full name of the type declaring the original method
    pub original_type: String,
    /// Name of the original method
    pub original_method: String,
    /// Full name of the type declaring the replacement
    pub replacement_type: String,
    /// Name of the replacement method
    pub replacement_method: String,
    /// Signature comparison
    #[serde(default)]
    pub options: MatchOptions,
}

/// A method implemented by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeMethodEntry {
    /// Full name of the declaring type
    pub type_name: String,
    /// Method name; all overloads are bound
    pub method: String,
    /// Name the id is hashed from, defaults to `Type::Method`
    #[serde(default)]
    pub native_name: Option<String>,
    /// Explicit id, bypassing the hash
    #[serde(default)]
    pub id: Option<u32>,
}

/// Replacement configuration, usually loaded from JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplacementConfig {
    /// Type replacements
    pub types: Vec<TypeReplacementEntry>,
    /// Method replacements
    pub methods: Vec<MethodReplacementEntry>,
    /// Native method bindings
    pub natives: Vec<NativeMethodEntry>,
}

/// A resolved entire-type replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeReplacement {
    /// The replaced type or open definition
    pub original: TypeId,
    /// The replacement type or open definition
    pub replacement: TypeId,
    /// Members covered
    pub scope: ReplacementScope,
    /// Signature comparison
    pub options: MatchOptions,
}

/// Resolved replacement rules and native bindings.
#[derive(Debug, Clone, Default)]
pub struct ReplacementRegistry {
    types: HashMap<TypeId, TypeReplacement>,
    partial_originals: HashMap<TypeId, TypeId>,
    methods: HashMap<MethodId, MethodId>,
    suppress_init: HashSet<TypeId>,
    natives: NativeMethodTable,
}

impl ReplacementRegistry {
    /// Resolves configuration entries against `universe`.
    ///
    /// The fixed native ids of `System.Object::Equals`, `GetHashCode` and `ToString` are always
    /// bound when the universe defines them.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownType`] for type names that are not defined
    /// - [`Error::MissingReplacement`] for a partial replacement method without an original
    ///   counterpart, or a method entry that matches nothing
    /// - [`Error::NativeIdCollision`] for colliding native names
    pub fn build(universe: &Universe, configs: &[ReplacementConfig]) -> Result<Self> {
        let mut registry = ReplacementRegistry::default();
        let mut bindings = Vec::new();

        if let Some(object) = universe.find_type("System.Object") {
            for (name, id) in [
                ("Equals", OBJECT_EQUALS),
                ("GetHashCode", OBJECT_GET_HASH_CODE),
                ("ToString", OBJECT_TO_STRING),
            ] {
                if let Some(method) = universe.declared_methods(object).into_iter().find(|m| {
                    let def = universe.method(*m);
                    def.name == name && !def.is_static()
                }) {
                    bindings.push(NativeBinding {
                        method,
                        name: format!("System.Object::{name}"),
                        id: Some(id),
                    });
                }
            }
        }

        for config in configs {
            for entry in &config.types {
                let original = lookup_type(universe, &entry.original)?;
                let replacement = lookup_type(universe, &entry.replacement)?;
                if entry.scope.contains(ReplacementScope::SUPPRESS_INIT) {
                    registry.suppress_init.insert(replacement);
                }
                if entry.entire_type {
                    registry.types.insert(
                        original,
                        TypeReplacement {
                            original,
                            replacement,
                            scope: entry.scope,
                            options: entry.options,
                        },
                    );
                } else {
                    registry.add_partial(universe, original, replacement, entry)?;
                }
            }

            for entry in &config.methods {
                registry.add_method(universe, entry)?;
            }

            for entry in &config.natives {
                let ty = lookup_type(universe, &entry.type_name)?;
                let name = entry
                    .native_name
                    .clone()
                    .unwrap_or_else(|| format!("{}::{}", entry.type_name, entry.method));
                let mut found = false;
                for method in universe.declared_methods(ty) {
                    if universe.method(method).name == entry.method {
                        bindings.push(NativeBinding {
                            method,
                            name: name.clone(),
                            id: entry.id,
                        });
                        found = true;
                    }
                }
                if !found {
                    return Err(Error::MissingReplacement(format!(
                        "native method {}::{} is not defined",
                        entry.type_name, entry.method
                    )));
                }
            }
        }

        registry.natives = NativeMethodTable::build(bindings)?;
        log::debug!(
            "Replacement registry: {} types, {} methods, {} natives",
            registry.types.len(),
            registry.methods.len(),
            registry.natives.len()
        );
        Ok(registry)
    }

    fn add_partial(
        &mut self,
        universe: &Universe,
        original: TypeId,
        replacement: TypeId,
        entry: &TypeReplacementEntry,
    ) -> Result<()> {
        self.partial_originals.insert(replacement, original);

        let mut candidates = universe.declared_methods(original);
        if entry.scope.contains(ReplacementScope::SUBCLASSES) {
            let mut base = universe.base_type(original);
            while let Some(ty) = base {
                candidates.extend(universe.declared_methods(ty));
                base = universe.base_type(ty);
            }
        }

        for method in universe.declared_methods(replacement) {
            let def = universe.method(method);
            if def.attributes.contains(MethodAttributes::PRIVATE) {
                continue;
            }

            let target = candidates.iter().copied().find(|candidate| {
                let candidate_def = universe.method(*candidate);
                (entry.scope.contains(ReplacementScope::PRIVATES)
                    || !candidate_def.attributes.contains(MethodAttributes::PRIVATE))
                    && self.same_signature(universe, method, *candidate, entry.options)
            });

            match target {
                Some(target) => {
                    self.methods.insert(target, method);
                }
                None if def.attributes.contains(MethodAttributes::INTERNAL_CALL) => {}
                None => {
                    return Err(Error::MissingReplacement(format!(
                        "{} has nothing to replace on {}",
                        universe.method_signature(method),
                        universe.full_name(original)
                    )));
                }
            }
        }
        Ok(())
    }

    fn add_method(&mut self, universe: &Universe, entry: &MethodReplacementEntry) -> Result<()> {
        let original_type = lookup_type(universe, &entry.original_type)?;
        let replacement_type = lookup_type(universe, &entry.replacement_type)?;

        let mut matched = false;
        for replacement in universe.declared_methods(replacement_type) {
            if universe.method(replacement).name != entry.replacement_method {
                continue;
            }
            for original in universe.declared_methods(original_type) {
                let def = universe.method(original);
                if def.name != entry.original_method {
                    continue;
                }
                if self.parameters_match(universe, replacement, original, entry.options) {
                    self.methods.insert(original, replacement);
                    matched = true;
                }
            }
        }

        if matched {
            Ok(())
        } else {
            Err(Error::MissingReplacement(format!(
                "{}::{} does not match {}::{}",
                entry.replacement_type,
                entry.replacement_method,
                entry.original_type,
                entry.original_method
            )))
        }
    }

    /// The native method table.
    #[must_use]
    pub fn natives(&self) -> &NativeMethodTable {
        &self.natives
    }

    /// The native id of `method`, or of the open method it was instantiated from.
    #[must_use]
    pub fn native_id(&self, universe: &Universe, method: MethodId) -> Option<u32> {
        self.natives.get(method).or_else(|| {
            universe
                .method(method)
                .definition
                .and_then(|d| self.natives.get(d))
        })
    }

    /// All entire-type replacements.
    pub fn type_replacements(&self) -> impl Iterator<Item = &TypeReplacement> {
        self.types.values()
    }

    /// The original type a partial replacement type stands in for.
    #[must_use]
    pub fn partial_original(&self, universe: &Universe, replacement: TypeId) -> Option<TypeId> {
        if let Some(original) = self.partial_originals.get(&replacement) {
            return Some(*original);
        }
        let definition = universe.generic_definition(replacement)?;
        let original = *self.partial_originals.get(&definition)?;
        universe.find_instance(original, &universe.generic_arguments(replacement))
    }

    /// Returns true if the static constructor of `ty` must not run at startup.
    #[must_use]
    pub fn suppresses_init(&self, universe: &Universe, ty: TypeId) -> bool {
        self.suppress_init.contains(&ty)
            || universe
                .generic_definition(ty)
                .is_some_and(|d| self.suppress_init.contains(&d))
    }

    /// Returns true if `ty` is replaced as a whole.
    #[must_use]
    pub fn is_replaced(&self, universe: &Universe, ty: TypeId) -> bool {
        self.entry_for(universe, ty).is_some()
    }

    fn entry_for(&self, universe: &Universe, ty: TypeId) -> Option<TypeReplacement> {
        if let Some(entry) = self.types.get(&ty) {
            return Some(*entry);
        }
        if let Some(definition) = universe.generic_definition(ty) {
            if let Some(entry) = self.types.get(&definition) {
                return Some(*entry);
            }
        }
        self.types
            .values()
            .find(|entry| {
                entry.scope.contains(ReplacementScope::SUBCLASSES)
                    && ty != entry.original
                    && universe.is_subclass_of(ty, entry.original)
            })
            .copied()
    }

    /// Follows an entire-type replacement. Closed instances of a replaced generic definition
    /// map to the same instance of the replacement definition.
    ///
    /// # Errors
    ///
    /// Fails if the replacement definition cannot be instantiated with the arguments.
    pub fn redirect_type(&self, universe: &Universe, ty: TypeId) -> Result<TypeId> {
        let Some(entry) = self.entry_for(universe, ty) else {
            return Ok(ty);
        };

        if universe.generic_definition(ty) == Some(entry.original) {
            let arguments = universe.generic_arguments(ty);
            return universe.instantiate(entry.replacement, &arguments);
        }
        Ok(entry.replacement)
    }

    /// Returns the method that executes in place of `method`, or `None` if it runs as is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingReplacement`] if the declaring type is replaced as a whole and
    /// the replacement has neither a matching method nor a `NotSupportedException` fallback.
    pub fn redirect_method(&self, universe: &Universe, method: MethodId) -> Result<Option<MethodId>> {
        let def = universe.method(method);

        let explicit = self
            .methods
            .get(&method)
            .or_else(|| def.definition.and_then(|d| self.methods.get(&d)))
            .copied();
        if let Some(replacement) = explicit {
            return Ok(Some(self.close_over(universe, def.declaring_type, replacement)?));
        }

        let Some(entry) = self.entry_for(universe, def.declaring_type) else {
            return Ok(None);
        };
        let target = self.redirect_type(universe, def.declaring_type)?;

        if let Some(found) = universe
            .declared_methods(target)
            .into_iter()
            .find(|candidate| self.same_signature(universe, *candidate, method, entry.options))
        {
            return Ok(Some(found));
        }

        if let Some(fallback) = universe.declared_methods(target).into_iter().find(|m| {
            let candidate = universe.method(*m);
            candidate.name == NOT_SUPPORTED_FALLBACK && candidate.is_static()
        }) {
            log::debug!(
                "{} redirected to {}::{}",
                universe.method_signature(method),
                universe.full_name(target),
                NOT_SUPPORTED_FALLBACK
            );
            return Ok(Some(fallback));
        }

        Err(Error::MissingReplacement(format!(
            "{} has no counterpart on {}",
            universe.method_signature(method),
            universe.full_name(target)
        )))
    }

    /// Maps a field of a replaced type to the field of the same name on the replacement, and
    /// a field of a partial replacement type back to the original.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingReplacement`] if an entire-type replacement lacks the field.
    pub fn redirect_field(&self, universe: &Universe, field: FieldId) -> Result<FieldId> {
        let def = universe.field(field);

        if self.entry_for(universe, def.declaring_type).is_some() {
            let target = self.redirect_type(universe, def.declaring_type)?;
            return universe.find_field(target, &def.name).ok_or_else(|| {
                Error::MissingReplacement(format!(
                    "field {} of {} has no counterpart on {}",
                    def.name,
                    universe.full_name(def.declaring_type),
                    universe.full_name(target)
                ))
            });
        }

        if let Some(original) = self.partial_original(universe, def.declaring_type) {
            if let Some(counterpart) = universe.find_field(original, &def.name) {
                return Ok(counterpart);
            }
        }
        Ok(field)
    }

    /// A replacement declared on an open definition, closed over the arguments of the type
    /// the original method was called on.
    fn close_over(&self, universe: &Universe, caller_type: TypeId, replacement: MethodId) -> Result<MethodId> {
        let declaring = universe.method(replacement).declaring_type;
        if !universe.type_def(declaring).is_generic_definition() {
            return Ok(replacement);
        }
        let arguments = universe.generic_arguments(caller_type);
        if arguments.is_empty() {
            return Ok(replacement);
        }
        let closed = universe.instantiate(declaring, &arguments)?;
        Ok(universe
            .counterpart_method(closed, replacement)
            .unwrap_or(replacement))
    }

    /// Returns true if `candidate` can stand in for `original`.
    #[must_use]
    pub fn same_signature(
        &self,
        universe: &Universe,
        candidate: MethodId,
        original: MethodId,
        options: MatchOptions,
    ) -> bool {
        let a = universe.method(candidate);
        let b = universe.method(original);
        if a.name != b.name || a.kind != b.kind || a.is_static() != b.is_static() {
            return false;
        }
        if !self.parameters_match(universe, candidate, original, options) {
            return false;
        }
        if a.kind != MethodKind::Method || options.contains(MatchOptions::IGNORE_GENERIC_TYPE_ARGUMENT) {
            return true;
        }
        match (a.return_type, b.return_type) {
            (None, None) => true,
            (Some(x), Some(y)) => self.equivalent_types(universe, x, y),
            _ => false,
        }
    }

    fn parameters_match(
        &self,
        universe: &Universe,
        candidate: MethodId,
        original: MethodId,
        options: MatchOptions,
    ) -> bool {
        let a = universe.method(candidate);
        let b = universe.method(original);
        if a.parameters.len() != b.parameters.len() {
            return false;
        }
        if options.contains(MatchOptions::IGNORE_GENERIC_TYPE_ARGUMENT) {
            return true;
        }
        a.parameters.iter().zip(&b.parameters).all(|(x, y)| {
            if options.contains(MatchOptions::COMPARE_BY_PARAMETER_NAMES) {
                x.name == y.name
            } else {
                self.equivalent_types(universe, x.param_type, y.param_type)
            }
        })
    }

    /// Types are equivalent if they are equal, if `original` is replaced by `candidate`, or if
    /// both are generic parameters at the same position.
    fn equivalent_types(&self, universe: &Universe, candidate: TypeId, original: TypeId) -> bool {
        if candidate == original {
            return true;
        }
        let a = universe.type_def(candidate);
        let b = universe.type_def(original);
        if a.is_generic_parameter() && b.is_generic_parameter() {
            return a.generic_position == b.generic_position;
        }
        if a.is_by_ref() && b.is_by_ref() {
            return match (a.element, b.element) {
                (Some(x), Some(y)) => self.equivalent_types(universe, x, y),
                _ => false,
            };
        }
        if a.is_array() && b.is_array() {
            return match (a.element, b.element) {
                (Some(x), Some(y)) => self.equivalent_types(universe, x, y),
                _ => false,
            };
        }
        self.redirect_type(universe, original)
            .is_ok_and(|redirected| redirected == candidate)
            || self.partial_originals.get(&candidate) == Some(&original)
    }
}

fn lookup_type(universe: &Universe, name: &str) -> Result<TypeId> {
    universe
        .find_type(name)
        .ok_or_else(|| Error::UnknownType(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::method::MethodBody;

    fn ret() -> MethodBody {
        MethodBody::new(vec![0x2A], 1)
    }

    #[test]
    fn entire_type_redirects_members() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let clock = universe.define_type("Demo", "Clock").build();
        let now = universe
            .define_method(clock, "Now")
            .attributes(MethodAttributes::STATIC)
            .returns(int32)
            .body(ret())
            .build();
        let ticks = universe.define_field(clock, "_ticks", int32).build();
        let mini = universe.define_type("Demo", "MiniClock").build();
        let mini_now = universe
            .define_method(mini, "Now")
            .attributes(MethodAttributes::STATIC)
            .returns(int32)
            .body(ret())
            .build();
        let mini_ticks = universe.define_field(mini, "_ticks", int32).build();

        let registry = ReplacementRegistry::build(
            &universe,
            &[ReplacementConfig {
                types: vec![TypeReplacementEntry::entire("Demo.Clock", "Demo.MiniClock")],
                ..ReplacementConfig::default()
            }],
        )
        .unwrap();

        assert!(registry.is_replaced(&universe, clock));
        assert_eq!(registry.redirect_method(&universe, now).unwrap(), Some(mini_now));
        assert_eq!(registry.redirect_field(&universe, ticks).unwrap(), mini_ticks);
        assert_eq!(registry.redirect_method(&universe, mini_now).unwrap(), None);
    }

    #[test]
    fn missing_member_is_an_error_unless_fallback_exists() {
        let universe = Universe::with_core_library();
        let clock = universe.define_type("Demo", "Clock").build();
        let sleep = universe
            .define_method(clock, "Sleep")
            .attributes(MethodAttributes::STATIC)
            .body(ret())
            .build();
        let mini = universe.define_type("Demo", "MiniClock").build();

        let config = ReplacementConfig {
            types: vec![TypeReplacementEntry::entire("Demo.Clock", "Demo.MiniClock")],
            ..ReplacementConfig::default()
        };
        let registry = ReplacementRegistry::build(&universe, &[config.clone()]).unwrap();
        assert!(matches!(
            registry.redirect_method(&universe, sleep),
            Err(Error::MissingReplacement(_))
        ));

        let fallback = universe
            .define_method(mini, NOT_SUPPORTED_FALLBACK)
            .attributes(MethodAttributes::STATIC)
            .body(ret())
            .build();
        let registry = ReplacementRegistry::build(&universe, &[config]).unwrap();
        assert_eq!(registry.redirect_method(&universe, sleep).unwrap(), Some(fallback));
    }

    #[test]
    fn partial_replacement_matches_by_signature() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let string = universe.find_type("System.String").unwrap();

        let math = universe.define_type("Demo", "Math").build();
        let abs = universe
            .define_method(math, "Abs")
            .attributes(MethodAttributes::STATIC)
            .param("value", int32)
            .returns(int32)
            .body(ret())
            .build();
        let format = universe
            .define_method(math, "Format")
            .attributes(MethodAttributes::STATIC)
            .param("value", int32)
            .returns(string)
            .body(ret())
            .build();

        let mini = universe.define_type("Demo", "MiniMath").build();
        let mini_abs = universe
            .define_method(mini, "Abs")
            .attributes(MethodAttributes::STATIC)
            .param("value", int32)
            .returns(int32)
            .body(ret())
            .build();
        let mini_field = universe.define_field(mini, "Cache", int32).build();
        let cache = universe.define_field(math, "Cache", int32).build();

        let registry = ReplacementRegistry::build(
            &universe,
            &[ReplacementConfig {
                types: vec![TypeReplacementEntry::partial("Demo.Math", "Demo.MiniMath")],
                ..ReplacementConfig::default()
            }],
        )
        .unwrap();

        assert!(!registry.is_replaced(&universe, math));
        assert_eq!(registry.redirect_method(&universe, abs).unwrap(), Some(mini_abs));
        assert_eq!(registry.redirect_method(&universe, format).unwrap(), None);
        assert_eq!(registry.partial_original(&universe, mini), Some(math));
        assert_eq!(registry.redirect_field(&universe, mini_field).unwrap(), cache);
    }

    #[test]
    fn partial_replacement_without_target_fails() {
        let universe = Universe::with_core_library();
        universe.define_type("Demo", "Math").build();
        let mini = universe.define_type("Demo", "MiniMath").build();
        universe
            .define_method(mini, "Sqrt")
            .attributes(MethodAttributes::STATIC)
            .body(ret())
            .build();

        let result = ReplacementRegistry::build(
            &universe,
            &[ReplacementConfig {
                types: vec![TypeReplacementEntry::partial("Demo.Math", "Demo.MiniMath")],
                ..ReplacementConfig::default()
            }],
        );
        assert!(matches!(result, Err(Error::MissingReplacement(_))));
    }

    #[test]
    fn generic_definitions_are_replaced_per_instance() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let list = universe
            .define_type("Demo", "List`1")
            .generic_parameters(&["T"])
            .build();
        let t = universe.type_def(list).generic_parameters()[0];
        universe
            .define_method(list, "Add")
            .param("item", t)
            .body(ret())
            .build();
        let mini = universe
            .define_type("Demo", "MiniList`1")
            .generic_parameters(&["T"])
            .build();
        let u = universe.type_def(mini).generic_parameters()[0];
        universe
            .define_method(mini, "Add")
            .param("item", u)
            .body(ret())
            .build();

        let registry = ReplacementRegistry::build(
            &universe,
            &[ReplacementConfig {
                types: vec![TypeReplacementEntry::entire("Demo.List`1", "Demo.MiniList`1")],
                ..ReplacementConfig::default()
            }],
        )
        .unwrap();

        let list_int = universe.instantiate(list, &[int32]).unwrap();
        let mini_int = registry.redirect_type(&universe, list_int).unwrap();
        assert_eq!(universe.generic_definition(mini_int), Some(mini));

        let add = universe.find_method(list_int, "Add").unwrap();
        let redirected = registry.redirect_method(&universe, add).unwrap().unwrap();
        assert_eq!(universe.method(redirected).declaring_type, mini_int);
    }

    #[test]
    fn object_natives_are_always_bound() {
        let universe = Universe::with_core_library();
        let registry = ReplacementRegistry::build(&universe, &[]).unwrap();
        let object = universe.find_type("System.Object").unwrap();
        let to_string = universe.find_method(object, "ToString").unwrap();
        assert_eq!(registry.native_id(&universe, to_string), Some(OBJECT_TO_STRING));
        assert_eq!(registry.natives().len(), 3);
    }

    #[test]
    fn config_from_json() {
        let config: ReplacementConfig = serde_json::from_str(
            r#"{
                "types": [{ "original": "A", "replacement": "B", "entire_type": true, "scope": "SUBCLASSES" }],
                "natives": [{ "type_name": "Demo.Board", "method": "Write", "id": 300 }]
            }"#,
        )
        .unwrap();
        assert_eq!(config.types[0].scope, ReplacementScope::SUBCLASSES);
        assert_eq!(config.natives[0].id, Some(300));
        assert!(config.methods.is_empty());
    }
}
