//! Dependency closure and kernel management.
//!
//! The compiler turns an entry method into an [`ExecutionSet`]: everything the program can
//! reach, with replacements applied, tokens assigned and classes laid out.
//!
//! # Architecture
//!
//! ```text
//! Compiler                      long-lived: replacement registry, cached kernel
//!   └─ compile(main, settings)
//!        ├─ kernel               reused if the settings are equal, else rebuilt
//!        │    ├─ prepare_kernel  natives, replacement classes, Object, Array, kernel classes
//!        │    └─ finalize        complete classes, freeze (flash kernels only)
//!        ├─ prepare_class        class of the entry method
//!        ├─ prepare_method       the closure, recursively
//!        └─ finalize             overrides, static constructors, startup method
//! ```
//!
//! # Key Components
//!
//! - [`Compiler`] - entry point, owns the registry and the kernel cache
//! - [`BuildContext`] - one build: closure, finalization, analysis stack
//! - [`ReplacementRegistry`] - type, method and native replacements
//! - [`static_constructor_order`] - execution order of type initializers
//! - [`companion_types`] - implementation types that framework generics select at run time

pub mod builder;
pub mod cctor;
pub mod generics;
pub mod natives;
pub mod replacement;
pub mod stack;

use std::sync::Arc;

pub use builder::{method_flags, BuildContext};
pub use cctor::static_constructor_order;
pub use generics::companion_types;
pub use natives::{native_method_id, NativeMethodTable};
pub use replacement::{
    MatchOptions, MethodReplacementEntry, NativeMethodEntry, ReplacementConfig,
    ReplacementRegistry, ReplacementScope, TypeReplacementEntry,
};
pub use stack::AnalysisStack;

use crate::{
    config::CompilerSettings,
    diagnostics::{DiagnosticCategory, Diagnostics},
    execution::ExecutionSet,
    metadata::{universe::Universe, MethodId},
    Error, Result,
};

/// The result of a build.
#[derive(Debug)]
pub struct Compilation {
    /// The closed execution set
    pub set: ExecutionSet,
    /// Everything reported while building it
    pub diagnostics: Diagnostics,
}

/// Builds execution sets and keeps the kernel of the last flash build.
///
/// # Examples
///
/// ```rust
/// use ilforge::prelude::*;
///
/// let universe = Universe::with_core_library();
/// let program = universe.define_type("Demo", "Program").build();
/// let main = universe
///     .define_method(program, "Main")
///     .attributes(MethodAttributes::STATIC)
///     .body(MethodBody::new(vec![0x2A], 1))
///     .build();
///
/// let mut compiler = Compiler::new(&universe, &[])?;
/// let compilation = compiler.compile(&universe, main, &CompilerSettings::flash_kernel())?;
/// assert!(compilation.set.kernel().is_some());
/// assert!(compiler.cached_kernel().is_some());
/// # Ok::<(), ilforge::Error>(())
/// ```
#[derive(Debug)]
pub struct Compiler {
    registry: Arc<ReplacementRegistry>,
    kernel: Option<(CompilerSettings, ExecutionSet)>,
}

impl Compiler {
    /// Creates a compiler with a registry built from `configs`.
    ///
    /// # Errors
    ///
    /// See [`ReplacementRegistry::build`].
    pub fn new(universe: &Universe, configs: &[ReplacementConfig]) -> Result<Self> {
        Ok(Self::with_registry(Arc::new(ReplacementRegistry::build(
            universe, configs,
        )?)))
    }

    /// Creates a compiler around an existing registry.
    #[must_use]
    pub fn with_registry(registry: Arc<ReplacementRegistry>) -> Self {
        Compiler {
            registry,
            kernel: None,
        }
    }

    /// The replacement registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ReplacementRegistry> {
        &self.registry
    }

    /// An empty execution set sharing this compiler's registry.
    #[must_use]
    pub fn empty_set(&self, settings: CompilerSettings) -> ExecutionSet {
        ExecutionSet::new(Arc::clone(&self.registry), settings)
    }

    /// A build context for manual closure construction.
    #[must_use]
    pub fn context<'a>(&self, universe: &'a Universe, diagnostics: &'a Diagnostics) -> BuildContext<'a> {
        BuildContext::new(universe, diagnostics)
    }

    /// The frozen kernel of the last flash build.
    #[must_use]
    pub fn cached_kernel(&self) -> Option<&ExecutionSet> {
        self.kernel.as_ref().map(|(_, set)| set)
    }

    /// Forgets the cached kernel.
    pub fn clear_kernel_cache(&mut self) {
        self.kernel = None;
    }

    /// Builds the execution set of the program starting at `main`.
    ///
    /// The kernel is taken from the cache if it was built with equal settings. Otherwise it
    /// is rebuilt, and with [`CompilerSettings::create_kernel_for_flashing`] it is finalized,
    /// frozen and cached for the next build.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEntryPoint`] if `main` is not static, is generic or takes more than
    ///   one argument
    /// - any error of the closure builder
    pub fn compile(
        &mut self,
        universe: &Universe,
        main: MethodId,
        settings: &CompilerSettings,
    ) -> Result<Compilation> {
        validate_entry_point(universe, main)?;

        let diagnostics = Diagnostics::new();
        let mut context = BuildContext::new(universe, &diagnostics);

        let mut set = match &self.kernel {
            Some((cached, kernel)) if cached == settings => {
                log::info!("Reusing cached kernel");
                diagnostics.info(DiagnosticCategory::Kernel, "Cached kernel reused");
                kernel.clone()
            }
            _ => {
                let mut set = self.empty_set(settings.clone());
                for name in &settings.additional_suppressions {
                    match universe.find_type(name) {
                        Some(ty) => set.suppress(ty),
                        None => log::debug!("Suppressed type {name} is not defined"),
                    }
                }
                context.prepare_kernel(&mut set)?;

                if settings.create_kernel_for_flashing {
                    context.finalize(&mut set, true)?;
                    let snapshot = set.create_kernel_snapshot();
                    log::info!("Kernel frozen, hash {:08x}", snapshot.hash());
                    self.kernel = Some((settings.clone(), set.clone()));
                } else {
                    self.kernel = None;
                }
                set
            }
        };

        context.prepare_class(&mut set, universe.method(main).declaring_type)?;
        set.set_main_entry(main);
        context.prepare_method(&mut set, main)?;
        context.finalize(&mut set, false)?;

        log::info!(
            "Compiled {}: {} classes, {} methods",
            universe.method_signature(main),
            set.classes().len(),
            set.methods().len()
        );
        Ok(Compilation { set, diagnostics })
    }
}

fn validate_entry_point(universe: &Universe, main: MethodId) -> Result<()> {
    let def = universe.method(main);
    let signature = || universe.method_signature(main);
    if !def.is_static() {
        return Err(Error::InvalidEntryPoint(format!("{} is not static", signature())));
    }
    let declaring = universe.type_def(def.declaring_type);
    if declaring.is_generic_definition() || universe.contains_generic_parameters(def.declaring_type) {
        return Err(Error::InvalidEntryPoint(format!("{} is generic", signature())));
    }
    if def.parameters.len() > 1 {
        return Err(Error::InvalidEntryPoint(format!(
            "{} takes {} arguments",
            signature(),
            def.parameters.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::replacement::TypeReplacementEntry,
        execution::MethodFlags,
        metadata::method::{MethodAttributes, MethodBody},
        test::{shapes, Il},
        tokens::RemoteToken,
    };

    #[test]
    fn kernel_contains_object_virtuals() {
        let shapes = shapes();
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let compilation = compiler
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())
            .unwrap();
        let set = &compilation.set;

        let object = shapes.universe.find_type("System.Object").unwrap();
        let to_string = shapes.universe.find_method(object, "ToString").unwrap();
        let declaration = set.method(to_string).unwrap();
        assert_eq!(declaration.native_id, Some(natives::OBJECT_TO_STRING));
        assert!(declaration.flags.contains(MethodFlags::SPECIAL_METHOD));
        assert_eq!(set.class(object).unwrap().token, RemoteToken(1));
        assert!(set.kernel().is_none());
        assert!(compiler.cached_kernel().is_none());
    }

    #[test]
    fn flash_kernels_are_cached_and_frozen() {
        let shapes = shapes();
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let settings = CompilerSettings::flash_kernel();

        let first = compiler.compile(&shapes.universe, shapes.main, &settings).unwrap();
        let kernel = first.set.kernel().unwrap().clone();
        let object = shapes.universe.find_type("System.Object").unwrap();
        assert!(first.set.class(object).unwrap().is_read_only());
        assert!(!first.set.class(shapes.circle).unwrap().is_read_only());

        let second = compiler.compile(&shapes.universe, shapes.main, &settings).unwrap();
        assert_eq!(second.set.kernel().unwrap().hash(), kernel.hash());
        assert_eq!(
            second.diagnostics.by_category(DiagnosticCategory::Kernel).len(),
            1
        );
        assert_eq!(first.set.methods().len(), second.set.methods().len());

        compiler
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())
            .unwrap();
        assert!(compiler.cached_kernel().is_none());
    }

    #[test]
    fn entry_points_are_validated() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let instance = universe
            .define_method(program, "Run")
            .body(MethodBody::new(vec![0x2A], 1))
            .build();
        let mut compiler = Compiler::new(&universe, &[]).unwrap();
        let result = compiler.compile(&universe, instance, &CompilerSettings::default());
        assert!(matches!(result, Err(Error::InvalidEntryPoint(_))));
    }

    #[test]
    fn entire_type_replacements_redirect_calls() {
        let universe = Universe::with_core_library();
        let clock = universe.define_type("Demo", "Clock").build();
        let tick = universe
            .define_method(clock, "Tick")
            .attributes(MethodAttributes::STATIC)
            .build();
        let mini = universe.define_type("Demo", "MiniClock").build();
        let mini_tick = universe
            .define_method(mini, "Tick")
            .attributes(MethodAttributes::STATIC)
            .body(MethodBody::new(vec![0x2A], 1))
            .build();
        let program = universe.define_type("Demo", "Program").build();
        let main = universe
            .define_method(program, "Main")
            .attributes(MethodAttributes::STATIC)
            .body(Il::new(&universe).call(tick).ret().body(1))
            .build();

        let config = ReplacementConfig {
            types: vec![TypeReplacementEntry::entire("Demo.Clock", "Demo.MiniClock")],
            ..ReplacementConfig::default()
        };
        let mut compiler = Compiler::new(&universe, &[config]).unwrap();
        let compilation = compiler
            .compile(&universe, main, &CompilerSettings::default())
            .unwrap();
        assert!(compilation.set.has_method(mini_tick));
        assert!(!compilation.set.has_method(tick));
        assert!(compilation.set.has_class(mini));
        assert!(!compilation.set.has_class(clock));
    }
}
