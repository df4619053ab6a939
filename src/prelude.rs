//! # ilforge Prelude
//!
//! The types needed to describe a program, compile it and run it on a board. Import this
//! module to get all of them at once.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ilforge operations
pub use crate::Error;

/// The result type used throughout ilforge
pub use crate::Result;

/// Settings of a compilation
pub use crate::CompilerSettings;

// ================================================================================================
// Program Model
// ================================================================================================

/// The arena of types, methods and fields
pub use crate::metadata::universe::Universe;

/// Ids and original tokens
pub use crate::metadata::{token::Token, FieldId, MemberRef, MethodId, TypeId};

/// Method and type attributes and bodies
pub use crate::metadata::{
    field::FieldFlags,
    method::{ExceptionClause, ExceptionClauseFlags, MethodAttributes, MethodBody},
    types::{PrimitiveKind, TypeFlags},
};

// ================================================================================================
// Compilation
// ================================================================================================

/// The compiler and its result
pub use crate::compiler::{Compilation, Compiler};

/// Replacement configuration
pub use crate::compiler::{
    MatchOptions, MethodReplacementEntry, NativeMethodEntry, ReplacementConfig,
    ReplacementScope, TypeReplacementEntry,
};

/// Build diagnostics
pub use crate::diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};

/// The compiled program
pub use crate::execution::{ClassDeclaration, ExecutionSet, MethodDeclaration, SnapShot};

/// Remote tokens
pub use crate::tokens::RemoteToken;

// ================================================================================================
// Upload and Execution
// ================================================================================================

/// Sessions and transports
pub use crate::protocol::{
    ExecutorCommand, HardwareInfo, LoadOptions, RecordingTransport, Session, StartupFlags,
    Transport,
};

/// Remote tasks and their results
pub use crate::runtime::{
    CancellationToken, MethodState, RemoteError, RemoteTask, SystemExceptionKind, TaskOutput,
    Value,
};

/// The on-board debugger
pub use crate::runtime::{DebugEvent, Debugger, DebuggerDataKind, DebuggerVariable};
