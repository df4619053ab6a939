//! The execution set.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use serde::Serialize;

use crate::{
    compiler::replacement::ReplacementRegistry,
    config::CompilerSettings,
    execution::{
        declaration::{ClassDeclaration, MethodDeclaration},
        snapshot::SnapShot,
        statics::StaticRootTable,
    },
    metadata::{universe::Universe, FieldId, MethodId, TypeId},
    tokens::{Entity, RemoteToken, TokenSpace, MAX_METHODS},
    Error, Result,
};

/// Estimated device memory needed by an execution set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryEstimate {
    /// Number of classes
    pub classes: usize,
    /// Bytes for class headers and member tables
    pub class_bytes: u32,
    /// Number of methods
    pub methods: usize,
    /// Bytes for method headers, frames and IL
    pub method_bytes: u32,
    /// Bytes of the static-root vector including slot overhead
    pub static_bytes: u32,
    /// Number of string constants
    pub strings: usize,
    /// Bytes of string constants including length prefixes
    pub string_bytes: u32,
    /// Bytes of field initializer data
    pub constant_bytes: u32,
}

impl MemoryEstimate {
    /// Sum of all byte counts.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.class_bytes + self.method_bytes + self.static_bytes + self.string_bytes + self.constant_bytes
    }
}

impl fmt::Display for MemoryEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} classes ({} bytes), {} methods ({} bytes), statics {} bytes, {} strings ({} bytes), constants {} bytes, total {} bytes",
            self.classes,
            self.class_bytes,
            self.methods,
            self.method_bytes,
            self.static_bytes,
            self.strings,
            self.string_bytes,
            self.constant_bytes,
            self.total()
        )
    }
}

/// Everything that is uploaded for one program: classes, methods, constants and strings,
/// addressed through one token space.
///
/// Token requests go through the replacement registry first, so the token returned for a
/// replaced entity always denotes its replacement. The set is single-writer; a clone is an
/// independent copy, which is how a cached kernel becomes the starting point of a program.
#[derive(Debug, Clone)]
pub struct ExecutionSet {
    tokens: TokenSpace,
    registry: Arc<ReplacementRegistry>,
    settings: CompilerSettings,
    classes: Vec<ClassDeclaration>,
    class_index: HashMap<TypeId, usize>,
    methods: Vec<MethodDeclaration>,
    method_index: HashMap<MethodId, usize>,
    suppressed: HashSet<TypeId>,
    statics: StaticRootTable,
    array_elements: Vec<TypeId>,
    main_entry: Option<MethodId>,
    startup_method: Option<MethodId>,
    startup_sequence: Vec<MethodId>,
    member_classes: HashMap<RemoteToken, TypeId>,
    kernel: Option<SnapShot>,
}

impl ExecutionSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new(registry: Arc<ReplacementRegistry>, settings: CompilerSettings) -> Self {
        ExecutionSet {
            tokens: TokenSpace::new(),
            registry,
            settings,
            classes: Vec::new(),
            class_index: HashMap::new(),
            methods: Vec::new(),
            method_index: HashMap::new(),
            suppressed: HashSet::new(),
            statics: StaticRootTable::new(),
            array_elements: Vec::new(),
            main_entry: None,
            startup_method: None,
            startup_sequence: Vec::new(),
            member_classes: HashMap::new(),
            kernel: None,
        }
    }

    /// The replacement registry.
    #[must_use]
    pub fn registry(&self) -> &ReplacementRegistry {
        &self.registry
    }

    /// The settings the set was built with.
    #[must_use]
    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub(crate) fn set_settings(&mut self, settings: CompilerSettings) {
        self.settings = settings;
    }

    /// The token space.
    #[must_use]
    pub fn tokens(&self) -> &TokenSpace {
        &self.tokens
    }

    // ====================================================================================
    // Tokens
    // ====================================================================================

    /// Token of `ty`, after following entire-type replacements.
    ///
    /// # Errors
    ///
    /// Fails if the replacement cannot be instantiated or the token space is exhausted.
    pub fn type_token(&mut self, universe: &Universe, ty: TypeId) -> Result<RemoteToken> {
        let target = self.registry.redirect_type(universe, ty)?;
        self.tokens.get_or_add_type_token(universe, target)
    }

    /// The method that executes in place of `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingReplacement`] if the declaring type is replaced as a whole and
    /// the replacement lacks the method.
    pub fn resolve_method(&self, universe: &Universe, method: MethodId) -> Result<MethodId> {
        Ok(self
            .registry
            .redirect_method(universe, method)?
            .unwrap_or(method))
    }

    /// Token of `method`, after following replacements.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_method`]; also [`Error::TooManyMethods`].
    pub fn method_token(&mut self, universe: &Universe, method: MethodId) -> Result<RemoteToken> {
        let target = self.resolve_method(universe, method)?;
        self.tokens.get_or_add_method_token(target)
    }

    /// The field that is accessed in place of `field`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingReplacement`] if an entire-type replacement lacks the field.
    pub fn resolve_field(&self, universe: &Universe, field: FieldId) -> Result<FieldId> {
        self.registry.redirect_field(universe, field)
    }

    /// Token of `field`, after following replacements.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_field`].
    pub fn field_token(&mut self, universe: &Universe, field: FieldId) -> Result<RemoteToken> {
        let target = self.resolve_field(universe, field)?;
        self.tokens.get_or_add_field_token(target, None)
    }

    /// Token of a field with an initializer blob, registering the blob as constant data.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve_field`].
    pub fn constant_token(&mut self, universe: &Universe, field: FieldId) -> Result<RemoteToken> {
        let target = self.resolve_field(universe, field)?;
        let data = universe.field(target).initial_value.as_deref();
        self.tokens.get_or_add_field_token(target, data)
    }

    /// Token of a string constant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidString`] for strings the device cannot store.
    pub fn string_token(&mut self, text: &str) -> Result<RemoteToken> {
        self.tokens.get_or_add_string_token(text)
    }

    /// The entity behind a remote token.
    #[must_use]
    pub fn inverse_resolve(&self, token: RemoteToken) -> Option<Entity> {
        self.tokens.inverse_resolve(token)
    }

    /// Human readable name of the entity behind `token`.
    #[must_use]
    pub fn describe_token(&self, universe: &Universe, token: RemoteToken) -> Option<String> {
        Some(match self.inverse_resolve(token)? {
            Entity::Type(ty) => universe.full_name(ty),
            Entity::Method(method) => universe.method_signature(method),
            Entity::Field(field) => {
                let def = universe.field(field);
                format!("{}::{}", universe.full_name(def.declaring_type), def.name)
            }
            Entity::String(text) => format!("{text:?}"),
        })
    }

    // ====================================================================================
    // Classes
    // ====================================================================================

    /// Excludes `ty` from the set. Already added classes stay.
    pub fn suppress(&mut self, ty: TypeId) {
        self.suppressed.insert(ty);
    }

    /// Returns true if `ty` must never become part of the set.
    #[must_use]
    pub fn is_suppressed(&self, ty: TypeId) -> bool {
        self.suppressed.contains(&ty)
    }

    /// Adds a class. Returns false if the type is suppressed or already present.
    pub fn add_class(&mut self, class: ClassDeclaration) -> bool {
        if self.is_suppressed(class.ty) || self.class_index.contains_key(&class.ty) {
            return false;
        }
        self.class_index.insert(class.ty, self.classes.len());
        self.classes.push(class);
        true
    }

    /// Returns true if `ty` has a class declaration.
    #[must_use]
    pub fn has_class(&self, ty: TypeId) -> bool {
        self.class_index.contains_key(&ty)
    }

    /// The declaration of `ty`.
    #[must_use]
    pub fn class(&self, ty: TypeId) -> Option<&ClassDeclaration> {
        self.class_index.get(&ty).map(|i| &self.classes[*i])
    }

    /// The declaration of `ty`, for adding members.
    pub fn class_mut(&mut self, ty: TypeId) -> Option<&mut ClassDeclaration> {
        self.class_index.get(&ty).map(|i| &mut self.classes[*i])
    }

    /// All classes, in order of addition.
    #[must_use]
    pub fn classes(&self) -> &[ClassDeclaration] {
        &self.classes
    }

    /// Removes the class of `ty`.
    pub fn remove_class(&mut self, ty: TypeId) -> Option<ClassDeclaration> {
        let index = self.class_index.remove(&ty)?;
        let removed = self.classes.remove(index);
        for (i, class) in self.classes.iter().enumerate().skip(index) {
            self.class_index.insert(class.ty, i);
        }
        Some(removed)
    }

    /// Records the class each field and constructor token belongs to.
    pub fn set_member_classes(&mut self, member_classes: HashMap<RemoteToken, TypeId>) {
        self.member_classes = member_classes;
    }

    /// The class declaring the field or constructor behind `token`. Empty for kernel builds.
    #[must_use]
    pub fn class_of_member(&self, token: RemoteToken) -> Option<TypeId> {
        self.member_classes.get(&token).copied()
    }

    /// Offset of a static field in the static-root vector, reserving `size` bytes on first use.
    pub fn allocate_static(&mut self, field: FieldId, size: u32) -> u32 {
        self.statics.allocate(field, size)
    }

    /// The static-root table.
    #[must_use]
    pub fn statics(&self) -> &StaticRootTable {
        &self.statics
    }

    // ====================================================================================
    // Methods
    // ====================================================================================

    /// Adds a method and assigns its index. Returns false if it is already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyMethods`] once the method table is full.
    pub fn add_method(&mut self, mut declaration: MethodDeclaration) -> Result<bool> {
        if self.method_index.contains_key(&declaration.method) {
            return Ok(false);
        }
        if self.methods.len() >= MAX_METHODS {
            return Err(Error::TooManyMethods(MAX_METHODS));
        }
        declaration.index = self.methods.len();
        self.method_index.insert(declaration.method, declaration.index);
        self.methods.push(declaration);
        Ok(true)
    }

    /// Returns true if `method` has a declaration.
    #[must_use]
    pub fn has_method(&self, method: MethodId) -> bool {
        self.method_index.contains_key(&method)
    }

    /// The declaration of `method`.
    #[must_use]
    pub fn method(&self, method: MethodId) -> Option<&MethodDeclaration> {
        self.method_index.get(&method).map(|i| &self.methods[*i])
    }

    /// The declaration with the given token.
    #[must_use]
    pub fn method_by_token(&self, token: RemoteToken) -> Option<&MethodDeclaration> {
        self.methods.iter().find(|m| m.token == token)
    }

    /// All methods, in order of addition.
    #[must_use]
    pub fn methods(&self) -> &[MethodDeclaration] {
        &self.methods
    }

    /// Records the element type of an array created by the program.
    pub fn record_array_element(&mut self, element: TypeId) {
        if !self.array_elements.contains(&element) {
            self.array_elements.push(element);
        }
    }

    /// Element types of all arrays the program creates.
    #[must_use]
    pub fn array_elements(&self) -> &[TypeId] {
        &self.array_elements
    }

    // ====================================================================================
    // Entry points
    // ====================================================================================

    /// The user's entry method.
    #[must_use]
    pub fn main_entry(&self) -> Option<MethodId> {
        self.main_entry
    }

    pub(crate) fn set_main_entry(&mut self, method: MethodId) {
        self.main_entry = Some(method);
    }

    /// The generated method that runs the static constructors and then the entry method.
    #[must_use]
    pub fn startup_method(&self) -> Option<MethodId> {
        self.startup_method
    }

    pub(crate) fn set_startup_method(&mut self, method: MethodId) {
        self.startup_method = Some(method);
    }

    /// Static constructors in execution order.
    #[must_use]
    pub fn startup_sequence(&self) -> &[MethodId] {
        &self.startup_sequence
    }

    pub(crate) fn set_startup_sequence(&mut self, sequence: Vec<MethodId>) {
        self.startup_sequence = sequence;
    }

    // ====================================================================================
    // Snapshots
    // ====================================================================================

    /// The kernel this set was built on, if any.
    #[must_use]
    pub fn kernel(&self) -> Option<&SnapShot> {
        self.kernel.as_ref()
    }

    /// The tokens uploaded with this set.
    #[must_use]
    pub fn create_snapshot(&self) -> SnapShot {
        let tokens = self
            .classes
            .iter()
            .map(|c| c.token)
            .chain(self.methods.iter().map(|m| m.token))
            .chain(self.tokens.constants().map(|(token, _)| token));
        SnapShot::new(
            tokens,
            self.tokens.strings().iter().map(|s| s.token),
            self.tokens.special_types().iter().map(|s| s.master),
        )
    }

    /// Freezes every class and records the current content as the kernel.
    pub fn create_kernel_snapshot(&mut self) -> SnapShot {
        for class in &mut self.classes {
            class.mark_read_only();
        }
        let snapshot = self.create_snapshot();
        self.kernel = Some(snapshot.clone());
        snapshot
    }

    /// Estimates the device memory the set occupies.
    #[must_use]
    pub fn memory_estimate(&self, universe: &Universe) -> MemoryEstimate {
        let class_bytes = self
            .classes
            .iter()
            .map(|c| 40 + c.members().len() as u32 * 8)
            .sum();
        let method_bytes = self
            .methods
            .iter()
            .map(|m| {
                let locals = m.code.as_ref().map_or(0, |c| c.locals.len()) as u32;
                let arguments = universe.method(m.method).argument_count() as u32;
                40 + arguments * 4 + locals * 4 + m.code_len() as u32
            })
            .sum();
        let string_bytes = self
            .tokens
            .strings()
            .iter()
            .map(|s| s.encoded.len() as u32 + 4)
            .sum();
        let constant_bytes = self.tokens.constants().map(|(_, data)| data.len() as u32).sum();

        MemoryEstimate {
            classes: self.classes.len(),
            class_bytes,
            methods: self.methods.len(),
            method_bytes,
            static_bytes: self.statics.len() as u32 * 8 + self.statics.size(),
            strings: self.tokens.strings().len(),
            string_bytes,
            constant_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::replacement::{ReplacementConfig, TypeReplacementEntry},
        execution::declaration::MethodFlags,
        metadata::method::{MethodAttributes, MethodBody},
    };

    fn empty_set(universe: &Universe) -> ExecutionSet {
        let registry = ReplacementRegistry::build(universe, &[]).unwrap();
        ExecutionSet::new(Arc::new(registry), CompilerSettings::default())
    }

    fn declaration(set: &mut ExecutionSet, universe: &Universe, method: MethodId) -> MethodDeclaration {
        MethodDeclaration {
            index: 0,
            token: set.method_token(universe, method).unwrap(),
            method,
            flags: MethodFlags::STATIC,
            max_stack: 8,
            argument_count: 0,
            native_id: None,
            code: None,
        }
    }

    #[test]
    fn classes_respect_suppression_and_duplicates() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let hidden = universe.define_type("Demo", "Hidden").build();

        let mut set = empty_set(&universe);
        set.suppress(hidden);

        let token = set.type_token(&universe, program).unwrap();
        let class = ClassDeclaration::new(program, token, RemoteToken(1), "Demo.Program".into(), 0, 0, false);
        assert!(set.add_class(class.clone()));
        assert!(!set.add_class(class));

        let hidden_class = ClassDeclaration::new(hidden, RemoteToken(99), RemoteToken(1), "Demo.Hidden".into(), 0, 0, false);
        assert!(!set.add_class(hidden_class));
        assert_eq!(set.classes().len(), 1);

        assert!(set.remove_class(program).is_some());
        assert!(!set.has_class(program));
    }

    #[test]
    fn method_indices_and_snapshot() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let first = universe
            .define_method(program, "First")
            .attributes(MethodAttributes::STATIC)
            .body(MethodBody::new(vec![0x2A], 1))
            .build();
        let second = universe
            .define_method(program, "Second")
            .attributes(MethodAttributes::STATIC)
            .body(MethodBody::new(vec![0x2A], 1))
            .build();

        let mut set = empty_set(&universe);
        let a = declaration(&mut set, &universe, first);
        assert!(set.add_method(a.clone()).unwrap());
        assert!(!set.add_method(a).unwrap());
        let b = declaration(&mut set, &universe, second);
        assert!(set.add_method(b).unwrap());

        assert_eq!(set.method(second).unwrap().index, 1);
        let kernel = set.create_kernel_snapshot();
        assert_eq!(kernel.len(), 2);
        assert_eq!(set.kernel(), Some(&kernel));

        set.string_token("Hi").unwrap();
        let program_snapshot = set.create_snapshot();
        assert_ne!(program_snapshot.hash(), kernel.hash());
    }

    #[test]
    fn tokens_follow_replacements() {
        let universe = Universe::with_core_library();
        let clock = universe.define_type("Demo", "Clock").build();
        let mini = universe.define_type("Demo", "MiniClock").build();
        let registry = ReplacementRegistry::build(
            &universe,
            &[ReplacementConfig {
                types: vec![TypeReplacementEntry::entire("Demo.Clock", "Demo.MiniClock")],
                ..ReplacementConfig::default()
            }],
        )
        .unwrap();
        let mut set = ExecutionSet::new(Arc::new(registry), CompilerSettings::default());

        let token = set.type_token(&universe, clock).unwrap();
        assert_eq!(set.inverse_resolve(token), Some(Entity::Type(mini)));
        assert_eq!(set.describe_token(&universe, token).as_deref(), Some("Demo.MiniClock"));
    }

    #[test]
    fn memory_estimate_counts_strings() {
        let universe = Universe::with_core_library();
        let mut set = empty_set(&universe);
        set.string_token("abc").unwrap();
        set.allocate_static(FieldId(0), 4);

        let estimate = set.memory_estimate(&universe);
        assert_eq!(estimate.string_bytes, 7);
        assert_eq!(estimate.static_bytes, 12);
        assert_eq!(estimate.total(), 19);
    }
}
