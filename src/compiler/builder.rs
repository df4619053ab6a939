//! The dependency closure builder.
//!
//! A [`BuildContext`] grows an [`ExecutionSet`] from a few roots (the kernel list, the entry
//! method) until it is closed: every method a prepared body calls is prepared, every type it
//! touches gets a class declaration, and every virtual or interface method that can be reached
//! through dispatch is linked into the class that implements it.
//!
//! Preparation is recursive. The context keeps an [`AnalysisStack`] of the methods being
//! prepared, which stops cycles and is attached to the diagnostic of the first failure.

use std::collections::{HashMap, HashSet};

use crate::{
    compiler::{
        cctor::static_constructor_order, generics::companion_types, natives::native_method_id,
        stack::AnalysisStack,
    },
    diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics},
    execution::{ClassDeclaration, ClassMember, ExecutionSet, MethodDeclaration, MethodFlags},
    il::{code::IlCode, opcodes as op, patcher::patch_method, patcher::MAX_FRAME_SLOTS},
    layout::layout_class,
    metadata::{
        method::{MethodAttributes, MethodDef, MethodKind},
        types::TypeFlags,
        universe::Universe,
        FieldId, MethodId, TypeId,
    },
    tokens::RemoteToken,
    Error, Result,
};

/// Namespace of the type hosting generated helper methods.
pub const HELPER_NAMESPACE: &str = "Ilforge.Runtime";
/// Name of the type hosting generated helper methods.
pub const HELPER_TYPE: &str = "NativeHelpers";
/// Name of the generated startup method.
pub const MAIN_STUB: &str = "MainStub";

const OBJECT: &str = "System.Object";
const ARRAY: &str = "System.Array";
const STRING: &str = "System.String";
const DELEGATE: &str = "System.Delegate";
const MULTICAST_DELEGATE: &str = "System.MulticastDelegate";
const BY_REFERENCE: &str = "System.ByReference`1";
const ENUMERABLE: &str = "System.Collections.Generic.IEnumerable`1";
const THREAD: &str = "System.Threading.Thread";
/// Engine entry point of a started thread; it invokes the thread's delegate.
const THREAD_CALLBACK: &str = "StartCallback";
/// Compiler generated holder of array initializer blobs.
const PRIVATE_DATA: &str = "<PrivateImplementationDetails>";

/// Stack depth of generated bodies, at least this many slots.
const SYNTHESIZED_MIN_STACK: usize = 8;

/// The flags a method is declared with, before special handling.
#[must_use]
pub fn method_flags(def: &MethodDef) -> MethodFlags {
    let mut flags = MethodFlags::empty();
    if def.is_static() {
        flags |= MethodFlags::STATIC;
    }
    if def.is_virtual() {
        flags |= MethodFlags::VIRTUAL;
    }
    if def.is_abstract() {
        flags |= MethodFlags::ABSTRACT;
    }
    if def.is_void() {
        flags |= MethodFlags::VOID;
    }
    if def.kind == MethodKind::Constructor {
        flags |= MethodFlags::CTOR;
    }
    flags
}

fn push_token(il: &mut Vec<u8>, token: RemoteToken) {
    il.extend_from_slice(&token.value().to_le_bytes());
}

/// State of one build: the program model, the diagnostics sink and the analysis stack.
pub struct BuildContext<'a> {
    universe: &'a Universe,
    diagnostics: &'a Diagnostics,
    stack: AnalysisStack,
    failure_reported: bool,
    read_only_warnings: HashSet<TypeId>,
}

impl<'a> BuildContext<'a> {
    /// Creates a context reporting into `diagnostics`.
    #[must_use]
    pub fn new(universe: &'a Universe, diagnostics: &'a Diagnostics) -> Self {
        BuildContext {
            universe,
            diagnostics,
            stack: AnalysisStack::default(),
            failure_reported: false,
            read_only_warnings: HashSet::new(),
        }
    }

    /// The methods currently being prepared.
    #[must_use]
    pub fn stack(&self) -> &AnalysisStack {
        &self.stack
    }

    // ====================================================================================
    // Kernel
    // ====================================================================================

    /// Adds the fixed kernel content: every native method of the registry, the entire-type
    /// replacement classes, `System.Object` and `System.Array`, the `Object` virtuals and the
    /// configured kernel classes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownType`] for a configured kernel class the universe does not
    /// define, and any error of [`Self::prepare_class`] or [`Self::prepare_method`].
    pub fn prepare_kernel(&mut self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;

        let natives: Vec<MethodId> = set.registry().natives().methods().map(|(m, _)| m).collect();
        for method in natives {
            let declaring = universe.method(method).declaring_type;
            if universe.type_def(declaring).is_generic_definition() {
                continue;
            }
            self.prepare_method(set, method)?;
        }

        let replacements: Vec<TypeId> = set
            .registry()
            .type_replacements()
            .map(|r| r.replacement)
            .collect();
        for replacement in replacements {
            self.prepare_class(set, replacement)?;
        }

        if let Some(object) = universe.find_type(OBJECT) {
            self.prepare_class(set, object)?;
            for name in ["Equals", "ToString", "GetHashCode"] {
                if let Some(method) = universe.find_method(object, name) {
                    self.prepare_method(set, method)?;
                }
            }
        }
        if let Some(array) = universe.find_type(ARRAY) {
            self.prepare_class(set, array)?;
        }

        let kernel_classes = set.settings().kernel_classes.clone();
        for name in &kernel_classes {
            let ty = universe
                .find_type(name)
                .ok_or_else(|| Error::UnknownType(name.clone()))?;
            self.prepare_class(set, ty)?;
        }

        log::info!(
            "Kernel prepared: {} classes, {} methods",
            set.classes().len(),
            set.methods().len()
        );
        Ok(())
    }

    // ====================================================================================
    // Classes
    // ====================================================================================

    /// Declares `ty` together with its base classes and interfaces.
    ///
    /// Generic definitions, by-ref types and types that still mention generic parameters have
    /// no runtime representation and are skipped, as are suppressed types.
    ///
    /// # Errors
    ///
    /// Fails on layout errors, replacement errors and token exhaustion.
    pub fn prepare_class(&mut self, set: &mut ExecutionSet, ty: TypeId) -> Result<()> {
        let universe = self.universe;
        let mut hull = vec![ty];
        let mut index = 0;
        while index < hull.len() {
            let current = hull[index];
            index += 1;
            let def = universe.type_def(current);
            for related in def.base().into_iter().chain(def.interfaces()) {
                if !hull.contains(&related) {
                    hull.push(related);
                }
            }
        }

        for member in hull {
            self.prepare_class_declaration(set, member)?;
        }
        Ok(())
    }

    fn prepare_class_declaration(&mut self, set: &mut ExecutionSet, ty: TypeId) -> Result<()> {
        let universe = self.universe;
        let def = universe.type_def(ty);
        if def.flags.intersects(
            TypeFlags::GENERIC_DEFINITION | TypeFlags::GENERIC_PARAMETER | TypeFlags::BY_REF,
        ) || universe.contains_generic_parameters(ty)
        {
            return Ok(());
        }
        if set.has_class(ty) {
            return Ok(());
        }

        let target = set.registry().redirect_type(universe, ty)?;
        if target != ty && set.has_class(target) {
            return Ok(());
        }
        if set.is_suppressed(target) {
            log::debug!("{} is suppressed", universe.full_name(target));
            return Ok(());
        }

        let def = universe.type_def(target);
        let layout = layout_class(universe, target)?;
        let token = set.type_token(universe, target)?;
        let parent = match def.base() {
            Some(base) if !def.is_interface() => set.type_token(universe, base)?,
            _ => RemoteToken::NULL,
        };

        let mut class = ClassDeclaration::new(
            target,
            token,
            parent,
            universe.full_name(target),
            layout.dynamic_size,
            layout.static_size,
            def.is_value_type(),
        );
        class.is_enum = def.is_enum();
        class.is_array = def.is_array();
        class.suppress_init = set.registry().suppresses_init(universe, target);

        for slot in &layout.fields {
            let offset = if slot.is_static {
                set.allocate_static(slot.field, slot.size)
            } else {
                slot.offset
            };
            class.add_member(ClassMember::Field {
                field: slot.field,
                kind: slot.kind,
                token: set.field_token(universe, slot.field)?,
                size: slot.size,
                offset,
                is_static: slot.is_static,
            })?;
        }

        for ctor in universe.constructors(target) {
            let resolved = set.resolve_method(universe, ctor)?;
            class.add_member(ClassMember::Method {
                method: resolved,
                token: set.method_token(universe, resolved)?,
                flags: method_flags(universe.method(resolved)),
                overrides: Vec::new(),
            })?;
        }

        let interfaces: Vec<TypeId> = universe
            .all_interfaces(target)
            .into_iter()
            .filter(|i| !set.is_suppressed(*i))
            .collect();
        for interface in &interfaces {
            class.interfaces.push(set.type_token(universe, *interface)?);
        }

        if !set.add_class(class) {
            return Ok(());
        }
        log::debug!("Declared class {} as {}", universe.full_name(target), token);

        for interface in interfaces {
            self.prepare_class_declaration(set, interface)?;
        }
        for companion in companion_types(universe, target)? {
            self.prepare_class(set, companion)?;
        }
        Ok(())
    }

    // ====================================================================================
    // Methods
    // ====================================================================================

    /// Declares `method`, or the method replacing it, and everything its body depends on.
    /// Returns the remote token of the declared method.
    ///
    /// A method that is already being prepared further up the stack only gets its token.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingReplacement`] if an entire-type replacement lacks the method
    /// - [`Error::MissingImplementation`] for a method without body that can not be
    ///   synthesized
    /// - everything [`patch_method`] reports for the body
    pub fn prepare_method(&mut self, set: &mut ExecutionSet, method: MethodId) -> Result<RemoteToken> {
        let universe = self.universe;
        let target = set.resolve_method(universe, method)?;
        if let Some(declaration) = set.method(target) {
            return Ok(declaration.token);
        }
        if !self.stack.push(target)? {
            return set.method_token(universe, target);
        }

        let result = self.prepare_code(set, target);
        if let Err(error) = &result {
            if !self.failure_reported {
                self.failure_reported = true;
                self.diagnostics.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Error,
                        DiagnosticCategory::Method,
                        error.to_string(),
                    )
                    .with_token(universe.method(target).token.value())
                    .with_trace(self.stack.trace(universe)),
                );
            }
        }
        self.stack.pop();
        result
    }

    fn prepare_code(&mut self, set: &mut ExecutionSet, target: MethodId) -> Result<RemoteToken> {
        let universe = self.universe;
        let def = universe.method(target);
        let token = set.method_token(universe, target)?;

        let native_id = set
            .registry()
            .native_id(universe, target)
            .or_else(|| self.intrinsic_id(target));
        if let Some(native_id) = native_id {
            let declaration = MethodDeclaration {
                index: 0,
                token,
                method: target,
                flags: method_flags(def) | MethodFlags::SPECIAL_METHOD,
                max_stack: 0,
                argument_count: self.argument_count(target)?,
                native_id: Some(native_id),
                code: None,
            };
            if set.add_method(declaration)? {
                log::debug!(
                    "Declared {} as native 0x{native_id:08x}",
                    universe.method_signature(target)
                );
            }
            return Ok(token);
        }

        let mut flags = method_flags(def);
        if def.attributes.contains(MethodAttributes::SYNCHRONIZED) {
            if def.is_static() {
                self.diagnostics.error(
                    DiagnosticCategory::Method,
                    format!(
                        "{} is static and synchronized, which the execution engine can not lock",
                        universe.method_signature(target)
                    ),
                );
            } else {
                flags |= MethodFlags::SYNCHRONIZED;
            }
        }

        let code = if def.is_abstract() {
            None
        } else if let Some(body) = universe.method_body(target) {
            Some(patch_method(set, universe, target, body, self.diagnostics)?)
        } else if self.is_delegate(def.declaring_type) {
            Some(self.synthesize_delegate(set, target, &mut flags)?)
        } else if self.is_main_stub(target) {
            Some(self.synthesize_main_stub(set)?)
        } else {
            return Err(Error::MissingImplementation(universe.method_signature(target)));
        };

        let mut dependencies = Vec::new();
        if let Some(code) = &code {
            for ty in &code.types_used {
                if !set.has_class(*ty) {
                    self.prepare_class(set, *ty)?;
                }
            }
            for element in &code.array_element_types {
                set.record_array_element(*element);
            }
            dependencies.clone_from(&code.methods_used);
        }

        let declaration = MethodDeclaration {
            index: 0,
            token,
            method: target,
            flags,
            max_stack: code.as_ref().map_or(0, |c| u8::try_from(c.max_stack).unwrap_or(u8::MAX)),
            argument_count: self.argument_count(target)?,
            native_id: None,
            code,
        };
        if !set.add_method(declaration)? {
            return Ok(token);
        }
        log::debug!("Declared {} as {}", universe.method_signature(target), token);

        if has_statics(universe, def.declaring_type) {
            let owner = set
                .registry()
                .partial_original(universe, def.declaring_type)
                .unwrap_or(def.declaring_type);
            self.prepare_class(set, owner)?;
        }

        for dependency in dependencies {
            if set.has_method(dependency) {
                continue;
            }
            let dependency_def = universe.method(dependency);
            if dependency_def.kind == MethodKind::Constructor
                || has_statics(universe, dependency_def.declaring_type)
            {
                self.prepare_class(set, dependency_def.declaring_type)?;
            }
            self.prepare_method(set, dependency)?;
        }
        Ok(token)
    }

    fn argument_count(&self, method: MethodId) -> Result<u8> {
        let count = self.universe.method(method).argument_count();
        u8::try_from(count)
            .ok()
            .filter(|c| usize::from(*c) <= MAX_FRAME_SLOTS)
            .ok_or_else(|| Error::TooManyLocals {
                method: self.universe.method_signature(method),
                count,
            })
    }

    fn intrinsic_id(&self, method: MethodId) -> Option<u32> {
        let universe = self.universe;
        let def = universe.method(method);
        if !def.attributes.contains(MethodAttributes::INTRINSIC) {
            return None;
        }
        let declaring = universe
            .generic_definition(def.declaring_type)
            .unwrap_or(def.declaring_type);
        if universe.full_name(declaring) != BY_REFERENCE {
            return None;
        }
        match def.name.as_str() {
            ".ctor" => Some(native_method_id("ByReferenceCtor")),
            "get_Value" => Some(native_method_id("ByReferenceValue")),
            _ => None,
        }
    }

    fn is_delegate(&self, ty: TypeId) -> bool {
        self.universe
            .find_type(MULTICAST_DELEGATE)
            .is_some_and(|multicast| ty != multicast && self.universe.is_subclass_of(ty, multicast))
    }

    fn is_main_stub(&self, method: MethodId) -> bool {
        let def = self.universe.method(method);
        def.name == MAIN_STUB
            && self.universe.full_name(def.declaring_type) == format!("{HELPER_NAMESPACE}.{HELPER_TYPE}")
    }

    /// Builds the body of a delegate constructor or `Invoke` method. The constructor forwards
    /// to `MulticastDelegate::CtorClosedStatic`; `Invoke` pushes the target and the arguments
    /// and calls through the stored function pointer.
    fn synthesize_delegate(
        &mut self,
        set: &mut ExecutionSet,
        method: MethodId,
        flags: &mut MethodFlags,
    ) -> Result<IlCode> {
        let universe = self.universe;
        let def = universe.method(method);
        let max_stack = SYNTHESIZED_MIN_STACK.max(def.parameters.len() + 3);
        let max_stack = u16::try_from(max_stack).unwrap_or(u16::MAX);

        match def.kind {
            MethodKind::Constructor => {
                let multicast = universe
                    .find_type(MULTICAST_DELEGATE)
                    .ok_or_else(|| Error::UnknownType(MULTICAST_DELEGATE.to_string()))?;
                let base_ctor = universe
                    .find_method(multicast, "CtorClosedStatic")
                    .ok_or_else(|| {
                        Error::MissingImplementation(format!("{MULTICAST_DELEGATE}::CtorClosedStatic"))
                    })?;
                let base_token = self.prepare_method(set, base_ctor)?;
                *flags |= MethodFlags::CTOR;

                let mut il = vec![op::LDARG_0, op::LDARG_1, op::LDARG_2, op::CALL];
                push_token(&mut il, base_token);
                il.push(op::RET);
                Ok(IlCode::synthesized(il, max_stack, vec![base_ctor]))
            }
            MethodKind::Method if def.name == "Invoke" => {
                if def.is_static() {
                    return Err(malformed_error!(
                        "Delegate method {} must not be static",
                        universe.method_signature(method)
                    ));
                }
                if def.parameters.len() >= MAX_FRAME_SLOTS {
                    return Err(Error::TooManyLocals {
                        method: universe.method_signature(method),
                        count: def.parameters.len() + 1,
                    });
                }
                self.prepare_class(set, def.declaring_type)?;

                let delegate = universe
                    .find_type(DELEGATE)
                    .ok_or_else(|| Error::UnknownType(DELEGATE.to_string()))?;
                let field = |name: &str| {
                    universe.find_field(delegate, name).ok_or_else(|| {
                        Error::MissingImplementation(format!("{DELEGATE}::{name}"))
                    })
                };
                let target_field = field("_target")?;
                let pointer_field = field("_methodPtr")?;

                let mut il = vec![op::LDARG_0, op::LDFLD];
                push_token(&mut il, set.field_token(universe, target_field)?);
                for index in 0..def.parameters.len() {
                    il.push(op::LDARG_S);
                    il.push(u8::try_from(index + 1).unwrap_or(u8::MAX));
                }
                il.extend_from_slice(&[op::LDARG_0, op::LDFLD]);
                push_token(&mut il, set.field_token(universe, pointer_field)?);
                il.push(op::CALLI);
                push_token(&mut il, RemoteToken::NULL);
                il.push(op::RET);

                *flags |= MethodFlags::VIRTUAL;
                let mut code = IlCode::synthesized(il, max_stack, Vec::new());
                code.fields_used = vec![target_field, pointer_field];
                Ok(code)
            }
            _ => Err(Error::MissingImplementation(universe.method_signature(method))),
        }
    }

    /// Builds the startup method: all static constructors in order, then the entry method.
    fn synthesize_main_stub(&mut self, set: &mut ExecutionSet) -> Result<IlCode> {
        let universe = self.universe;
        let main = set
            .main_entry()
            .ok_or_else(|| malformed_error!("The startup method requires an entry method"))?;

        let mut il = Vec::new();
        let mut uses = Vec::new();
        for cctor in set.startup_sequence().to_vec() {
            il.push(op::CALL);
            push_token(&mut il, set.method_token(universe, cctor)?);
            uses.push(cctor);
        }

        let main_def = universe.method(main);
        if main_def.parameters.len() == 1 {
            let string = universe
                .find_type(STRING)
                .ok_or_else(|| Error::UnknownType(STRING.to_string()))?;
            il.extend_from_slice(&[op::LDC_I4_0, op::NEWARR]);
            push_token(&mut il, set.type_token(universe, string)?);
        }
        il.push(op::CALL);
        push_token(&mut il, set.method_token(universe, main)?);
        if !main_def.is_void() {
            il.push(op::POP);
        }
        il.push(op::RET);
        uses.push(main);

        let max_stack = u16::try_from(SYNTHESIZED_MIN_STACK).unwrap_or(u16::MAX);
        Ok(IlCode::synthesized(il, max_stack, uses))
    }

    /// Declares the startup method that runs the static constructors and the entry method.
    ///
    /// # Errors
    ///
    /// Fails if no entry method is set.
    pub fn prepare_main_stub(&mut self, set: &mut ExecutionSet) -> Result<MethodId> {
        let universe = self.universe;
        let host = universe
            .find_type(&format!("{HELPER_NAMESPACE}.{HELPER_TYPE}"))
            .unwrap_or_else(|| {
                universe
                    .define_type(HELPER_NAMESPACE, HELPER_TYPE)
                    .flags(TypeFlags::ABSTRACT | TypeFlags::SEALED)
                    .build()
            });
        let stub = universe.find_method(host, MAIN_STUB).unwrap_or_else(|| {
            universe
                .define_method(host, MAIN_STUB)
                .attributes(MethodAttributes::STATIC)
                .build()
        });
        self.prepare_class(set, host)?;
        self.prepare_method(set, stub)?;
        Ok(stub)
    }

    // ====================================================================================
    // Finalization
    // ====================================================================================

    /// Closes the set over virtual dispatch, thread entry points and static constructors.
    ///
    /// Kernel builds first complete every class with its constructors and virtual methods.
    /// Then override discovery, array enumerator linking, the thread start callback and static
    /// constructor preparation repeat until no class or method is added. Partial replacement
    /// classes shadowed by their original are dropped, initializer data nobody loads is trimmed
    /// and duplicate tokens are dropped. Program builds finally record which class declares
    /// each field and constructor token, compute the static constructor order and, when
    /// launching from flash, the startup method.
    ///
    /// # Errors
    ///
    /// Any error of the preparation steps.
    pub fn finalize(&mut self, set: &mut ExecutionSet, for_kernel: bool) -> Result<()> {
        if for_kernel {
            self.complete_classes(set)?;
        }
        self.add_callback_methods(set)?;

        let mut rounds = 0;
        loop {
            let before = (set.classes().len(), set.methods().len());
            self.link_array_enumerators(set)?;
            self.detect_overrides(set)?;
            self.add_callback_methods(set)?;
            self.prepare_static_constructors(set)?;
            rounds += 1;
            if (set.classes().len(), set.methods().len()) == before {
                break;
            }
        }
        log::debug!("Override discovery stable after {rounds} rounds");

        self.deduplicate(set)?;

        if !for_kernel {
            let member_classes = member_classes(set);
            log::debug!("Reverse lookup covers {} members", member_classes.len());
            set.set_member_classes(member_classes);

            let settings = set.settings().clone();
            let order = static_constructor_order(self.universe, set, &settings);
            set.set_startup_sequence(order);
            if settings.launch_program_from_flash {
                let stub = self.prepare_main_stub(set)?;
                set.set_startup_method(stub);
            }
        }

        log::info!("Memory estimate: {}", set.memory_estimate(self.universe));
        Ok(())
    }

    fn complete_classes(&mut self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;
        let mut index = 0;
        while index < set.classes().len() {
            let ty = set.classes()[index].ty;
            index += 1;
            for method in universe.declared_methods(ty) {
                let def = universe.method(method);
                let wanted = def.kind == MethodKind::Constructor
                    || def.is_virtual()
                    || def.is_abstract()
                    || !self.base_implementations(set, method).is_empty();
                if wanted {
                    self.prepare_method(set, method)?;
                }
            }
        }
        Ok(())
    }

    /// A started thread enters through `Thread::StartCallback`, which nothing in the program
    /// calls.
    fn add_callback_methods(&mut self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;
        let Some(thread) = universe.find_type(THREAD) else {
            return Ok(());
        };
        let started = set.methods().iter().any(|m| {
            let def = universe.method(m.method);
            def.declaring_type == thread && def.name == "Start"
        });
        if !started {
            return Ok(());
        }
        let Some(callback) = universe.find_method(thread, THREAD_CALLBACK) else {
            return Err(Error::MissingImplementation(format!(
                "{THREAD}::{THREAD_CALLBACK} is required to start threads"
            )));
        };
        if !set.has_method(set.resolve_method(universe, callback)?) {
            log::debug!("Thread start pulls in {THREAD}::{THREAD_CALLBACK}");
            self.prepare_method(set, callback)?;
        }
        Ok(())
    }

    fn prepare_static_constructors(&mut self, set: &mut ExecutionSet) -> Result<()> {
        let types: Vec<TypeId> = set
            .classes()
            .iter()
            .filter(|c| !c.suppress_init)
            .map(|c| c.ty)
            .collect();
        for ty in types {
            if let Some(cctor) = self.universe.type_initializer(ty) {
                self.prepare_method(set, cctor)?;
            }
        }
        Ok(())
    }

    /// Interfaces first, then base classes before derived ones, arrays last.
    fn dispatch_order(&self, set: &ExecutionSet) -> Vec<TypeId> {
        let universe = self.universe;
        let mut order: Vec<TypeId> = set
            .classes()
            .iter()
            .filter(|c| {
                if c.is_read_only() {
                    log::trace!("{} is frozen into the kernel", c.name);
                }
                !c.is_read_only()
            })
            .map(|c| c.ty)
            .collect();
        order.sort_by_cached_key(|ty| {
            let def = universe.type_def(*ty);
            let rank = if def.is_interface() {
                0
            } else if def.is_array() {
                2
            } else {
                1
            };
            (rank, universe.inheritance_depth(*ty), universe.full_name(*ty))
        });
        order
    }

    fn detect_overrides(&mut self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;
        for ty in self.dispatch_order(set) {
            for method in universe.declared_methods(ty) {
                let def = universe.method(method);
                if def.is_static() || def.is_abstract() || def.kind != MethodKind::Method {
                    continue;
                }
                let bases = self.base_implementations(set, method);
                if !bases.iter().any(|b| set.has_method(*b)) {
                    continue;
                }
                let target = set.resolve_method(universe, method)?;
                if set.class(ty).is_some_and(|c| c.has_method(target)) {
                    continue;
                }

                let token = self.prepare_method(set, method)?;
                let mut overrides = Vec::with_capacity(bases.len());
                for base in &bases {
                    overrides.push(set.method_token(universe, *base)?);
                }
                let flags = set
                    .method(target)
                    .map_or_else(|| method_flags(universe.method(target)), |m| m.flags);
                log::debug!(
                    "{} overrides {} methods",
                    universe.method_signature(target),
                    overrides.len()
                );
                if let Some(class) = set.class_mut(ty) {
                    class.add_member(ClassMember::Method {
                        method: target,
                        token,
                        flags,
                        overrides,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// The base class and interface methods `method` overrides or implements, after
    /// replacement redirection.
    fn base_implementations(&self, set: &ExecutionSet, method: MethodId) -> Vec<MethodId> {
        let universe = self.universe;
        let def = universe.method(method);
        if def.is_static() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        let mut base = universe.base_type(def.declaring_type);
        while let Some(ty) = base {
            candidates.extend(
                universe
                    .declared_methods(ty)
                    .into_iter()
                    .filter(|c| self.is_overridden(*c, method, false)),
            );
            base = universe.base_type(ty);
        }
        for interface in universe.all_interfaces(def.declaring_type) {
            if set.is_suppressed(interface) {
                continue;
            }
            candidates.extend(
                universe
                    .declared_methods(interface)
                    .into_iter()
                    .filter(|c| self.is_overridden(*c, method, true)),
            );
        }

        let mut result = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match set.resolve_method(universe, candidate) {
                Ok(resolved) if !result.contains(&resolved) => result.push(resolved),
                Ok(_) => {}
                Err(error) => log::debug!("Ignoring base method: {error}"),
            }
        }
        result
    }

    /// Returns true if `method` overrides `candidate`. Interface methods also match explicit
    /// implementations named `Namespace.Interface.Method`.
    fn is_overridden(&self, candidate: MethodId, method: MethodId, from_interface: bool) -> bool {
        let universe = self.universe;
        let base = universe.method(candidate);
        let derived = universe.method(method);

        let name_matches = base.name == derived.name
            || (from_interface
                && derived
                    .name
                    .strip_suffix(base.name.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.')));
        if !name_matches || base.is_static() || base.kind != MethodKind::Method {
            return false;
        }
        if !from_interface {
            if derived.attributes.contains(MethodAttributes::NEW_SLOT) {
                return false;
            }
            if base.attributes.contains(MethodAttributes::PRIVATE)
                || derived.attributes.contains(MethodAttributes::PRIVATE)
            {
                return false;
            }
        }
        if !base.is_virtual() && !base.is_abstract() {
            return false;
        }
        base.return_type == derived.return_type
            && base.parameters.len() == derived.parameters.len()
            && base
                .parameters
                .iter()
                .zip(&derived.parameters)
                .all(|(a, b)| a.param_type == b.param_type)
    }

    fn link_array_enumerators(&mut self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;
        if set.array_elements().is_empty() {
            return Ok(());
        }
        let Some(enumerator) = universe.find_type(&set.settings().array_enumerator) else {
            log::debug!(
                "Array enumerator {} is not part of the program model",
                set.settings().array_enumerator
            );
            return Ok(());
        };
        let (Some(array), Some(enumerable)) = (universe.find_type(ARRAY), universe.find_type(ENUMERABLE))
        else {
            return Ok(());
        };

        for element in set.array_elements().to_vec() {
            if universe.contains_generic_parameters(element) {
                continue;
            }
            let companion = universe.instantiate(enumerator, &[element])?;
            let Some(get_enumerator) = universe.find_method(companion, "GetEnumerator") else {
                continue;
            };
            let target = set.resolve_method(universe, get_enumerator)?;
            self.prepare_class(set, array)?;
            let Some(class) = set.class(array) else {
                continue;
            };
            if class.has_method(target) {
                continue;
            }
            if class.is_read_only() {
                if self.read_only_warnings.insert(element) {
                    self.diagnostics.warning(
                        DiagnosticCategory::Kernel,
                        format!(
                            "Enumerator for {}[] can not be linked into the frozen kernel",
                            universe.full_name(element)
                        ),
                    );
                }
                continue;
            }

            let token = self.prepare_method(set, get_enumerator)?;
            let interface = universe.instantiate(enumerable, &[element])?;
            let Some(interface_method) = universe.find_method(interface, "GetEnumerator") else {
                continue;
            };
            let overrides = vec![set.method_token(universe, interface_method)?];
            let flags = set
                .method(target)
                .map_or_else(|| method_flags(universe.method(target)), |m| m.flags);
            if let Some(class) = set.class_mut(array) {
                class.add_member(ClassMember::Method {
                    method: target,
                    token,
                    flags,
                    overrides,
                })?;
            }
        }
        Ok(())
    }

    fn deduplicate(&self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;
        let shadowed: Vec<TypeId> = set
            .classes()
            .iter()
            .filter(|c| {
                set.registry()
                    .partial_original(universe, c.ty)
                    .is_some_and(|original| set.has_class(original))
            })
            .map(|c| c.ty)
            .collect();
        for ty in shadowed {
            log::debug!("Dropping shadowed class {}", universe.full_name(ty));
            set.remove_class(ty);
        }

        self.remove_unused_data_fields(set)?;

        let mut seen = HashSet::new();
        let duplicates: Vec<TypeId> = set
            .classes()
            .iter()
            .filter(|c| !seen.insert(c.token))
            .map(|c| c.ty)
            .collect();
        for ty in duplicates {
            log::debug!("Dropping duplicate class {}", universe.full_name(ty));
            set.remove_class(ty);
        }
        Ok(())
    }

    /// The initializer data holder declares a field per array initializer in the assembly.
    /// Only the blobs some body loads with `ldtoken` are kept.
    fn remove_unused_data_fields(&self, set: &mut ExecutionSet) -> Result<()> {
        let universe = self.universe;
        let used: HashSet<FieldId> = set
            .methods()
            .iter()
            .filter_map(|m| m.code.as_ref())
            .flat_map(|code| code.fields_used.iter().copied())
            .collect();
        let holders: Vec<TypeId> = set
            .classes()
            .iter()
            .filter(|c| c.name.contains(PRIVATE_DATA) && !c.is_read_only())
            .map(|c| c.ty)
            .collect();

        for ty in holders {
            let Some(class) = set.class_mut(ty) else {
                continue;
            };
            let removed = class.retain_fields(|field| {
                let def = universe.field(field);
                if !def.is_static() && !def.is_literal() {
                    return true;
                }
                used.contains(&field) && def.initial_value.is_some()
            })?;
            if removed > 0 {
                log::debug!("Removed {removed} unused data fields from {}", class.name);
            }
        }
        Ok(())
    }
}

/// Maps every field and constructor token to the class declaring it. A later class wins.
fn member_classes(set: &ExecutionSet) -> HashMap<RemoteToken, TypeId> {
    let mut lookup = HashMap::new();
    for class in set.classes() {
        for member in class.members() {
            let is_member = match member {
                ClassMember::Field { .. } => true,
                ClassMember::Method { flags, .. } => flags.contains(MethodFlags::CTOR),
            };
            if is_member {
                lookup.insert(member.token(), class.ty);
            }
        }
    }
    lookup
}

fn has_statics(universe: &Universe, ty: TypeId) -> bool {
    !universe.static_fields(ty).is_empty()
}
