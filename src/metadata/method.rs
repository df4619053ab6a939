//! Method definitions of the program model.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::metadata::{token::Token, MethodId, TypeId};

bitflags! {
    /// Method attributes relevant for dispatch and code generation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MethodAttributes: u32 {
        /// Method is static
        const STATIC = 0x0010;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method starts a new vtable slot
        const NEW_SLOT = 0x0100;
        /// Method is abstract
        const ABSTRACT = 0x0400;
        /// Method is private
        const PRIVATE = 0x0001;
        /// Method has a special name (property accessors, operators)
        const SPECIAL_NAME = 0x0800;
        /// Method is implemented by the runtime itself
        const INTERNAL_CALL = 0x1000;
        /// Method is a JIT intrinsic without a usable body
        const INTRINSIC = 0x2000;
        /// Method body runs under the monitor of `this` (`MethodImplOptions.Synchronized`)
        const SYNCHRONIZED = 0x0001_0000;
    }
}

bitflags! {
    /// Kind of an exception clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ExceptionClauseFlags: u16 {
        /// A typed catch clause
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause
        const FAULT = 0x0004;
    }
}

/// Constructor-ness of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodKind {
    /// An ordinary method
    Method,
    /// An instance constructor (`.ctor`)
    Constructor,
    /// A type initializer (`.cctor`)
    StaticConstructor,
}

/// A named parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub param_type: TypeId,
}

/// A try block with its handler, as stored in the method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionClause {
    /// Clause kind
    pub flags: ExceptionClauseFlags,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Caught type, for typed catch clauses
    pub catch_type: Option<Token>,
    /// Start of the filter block, for filter clauses
    pub filter_offset: u32,
}

/// The IL body of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Raw, unpatched IL
    pub il: Vec<u8>,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Types of the local variables
    pub locals: Vec<TypeId>,
    /// Exception clauses
    pub exception_clauses: Vec<ExceptionClause>,
}

impl MethodBody {
    /// Creates a body without locals or exception clauses.
    #[must_use]
    pub fn new(il: Vec<u8>, max_stack: u16) -> Self {
        MethodBody {
            il,
            max_stack,
            locals: Vec::new(),
            exception_clauses: Vec::new(),
        }
    }

    /// Adds local variables.
    #[must_use]
    pub fn with_locals(mut self, locals: Vec<TypeId>) -> Self {
        self.locals = locals;
        self
    }

    /// Adds an exception clause.
    #[must_use]
    pub fn with_clause(mut self, clause: ExceptionClause) -> Self {
        self.exception_clauses.push(clause);
        self
    }
}

/// A method of the program model.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Original metadata token
    pub token: Token,
    /// The type declaring this method
    pub declaring_type: TypeId,
    /// Method name (`.ctor` and `.cctor` for constructors)
    pub name: String,
    /// Constructor-ness
    pub kind: MethodKind,
    /// Attributes
    pub attributes: MethodAttributes,
    /// Parameters, excluding `this`
    pub parameters: Vec<Parameter>,
    /// Return type, `None` for `void`
    pub return_type: Option<TypeId>,
    /// The body, for methods implemented in IL
    pub body: Option<MethodBody>,
    /// The method of the open generic definition this method was instantiated from
    pub definition: Option<MethodId>,
}

impl MethodDef {
    /// Returns true for static methods, including type initializers.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Returns true for virtual methods.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.attributes.contains(MethodAttributes::VIRTUAL)
    }

    /// Returns true for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.attributes.contains(MethodAttributes::ABSTRACT)
    }

    /// Returns true for instance and static constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.kind != MethodKind::Method
    }

    /// Returns true for methods returning `void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.return_type.is_none()
    }

    /// Number of arguments on the remote frame, including `this`.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.parameters.len() + usize::from(!self.is_static())
    }
}
