use thiserror::Error;

use crate::{metadata::token::Token, runtime::error::RemoteError};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Compile-time errors are always fatal: the build aborts instead of emitting a best-effort
/// program, since the execution engine on the device has no way to recover from a half
/// translated method. Transfer errors abort the current upload or command and are never retried
/// silently. Errors raised by the remote program itself are wrapped in [`Error::Remote`].
///
/// # Error Categories
///
/// ## Compilation Errors
/// - [`Error::Malformed`] - Truncated or otherwise corrupt IL or metadata
/// - [`Error::UnsupportedInstruction`] - Token-bearing opcode the patcher cannot translate
/// - [`Error::UnresolvedToken`] - Original metadata token not found in the program model
/// - [`Error::MissingReplacement`] - Replaced type lacks the requested member
/// - [`Error::MissingImplementation`] - Method without body and without a synthesis rule
/// - [`Error::MethodTooLarge`] - IL body does not fit the 14 bit length field
/// - [`Error::TooManyMethods`], [`Error::TooManyLocals`], [`Error::TooManyStackSlots`]
/// - [`Error::LayoutMismatch`] - Layout engine and field classifier disagree
/// - [`Error::ReadOnlyClass`] - Attempt to modify a class frozen into the kernel
/// - [`Error::TokenSpaceExhausted`] - A remote token range ran out
/// - [`Error::NativeIdCollision`] - Two native method names hash to the same id
/// - [`Error::InvalidEntryPoint`] - The entry method is not a static, non-generic method
///
/// ## Transfer Errors
/// - [`Error::Timeout`] - No reply within the programming timeout
/// - [`Error::Nack`] - The device rejected a command
/// - [`Error::Transport`] - The transport failed or returned garbage
/// - [`Error::ExecutionSetActive`], [`Error::NoActiveExecutionSet`], [`Error::UnknownTask`]
/// - [`Error::TaskRunning`], [`Error::ArgumentCount`], [`Error::Cancelled`]
/// - [`Error::StaticConstructor`] - A static constructor was killed during startup
///
/// ## Runtime Errors
/// - [`Error::Remote`] - Exception reconstructed from an aborted remote task
/// - [`Error::NotHalted`] - A debugger step without a known halt position
///
/// # Examples
///
/// ```rust,no_run
/// use ilforge::{Error, prelude::*};
///
/// # fn build(universe: &Universe, main: MethodId) -> ilforge::Result<()> {
/// let mut compiler = Compiler::new(universe, &[])?;
/// match compiler.compile(universe, main, &CompilerSettings::default()) {
///     Ok(compilation) => println!("{} methods", compilation.set.methods().len()),
///     Err(Error::UnsupportedInstruction { method, opcode, offset }) => {
///         eprintln!("{method}: cannot translate {opcode} at IL_{offset:04x}");
///     }
///     Err(e) => eprintln!("Build failed: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // Compilation errors
    /// The IL stream or a metadata record is damaged.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A token-bearing instruction that has no remote equivalent.
    #[error("Unsupported instruction {opcode} at IL_{offset:04x} in {method}")]
    UnsupportedInstruction {
        /// Signature of the method being patched
        method: String,
        /// Mnemonic of the offending opcode
        opcode: String,
        /// IL offset of the opcode
        offset: usize,
    },

    /// An original metadata token did not resolve to a member of the expected kind.
    #[error("Unable to resolve token {token} in {method}")]
    UnresolvedToken {
        /// Signature of the method whose body references the token
        method: String,
        /// The unresolved token
        token: Token,
    },

    /// A member of a replaced type has no counterpart on the replacement type.
    #[error("Missing replacement - {0}")]
    MissingReplacement(String),

    /// A non-abstract method has no body and no synthesis rule applies.
    #[error("No implementation available for {0}")]
    MissingImplementation(String),

    /// The IL body is longer than the wire format can describe.
    #[error("Method {method} is too large ({size} bytes)")]
    MethodTooLarge {
        /// Signature of the method
        method: String,
        /// Body size in bytes
        size: usize,
    },

    /// More methods than the remote method table can hold.
    #[error("Too many methods, the execution engine supports at most {0}")]
    TooManyMethods(usize),

    /// More local variables or arguments than the remote frame supports.
    #[error("Method {method} declares {count} locals or arguments")]
    TooManyLocals {
        /// Signature of the method
        method: String,
        /// Number of declared slots
        count: usize,
    },

    /// An evaluation stack depth the remote frame cannot hold.
    #[error("Method {method} requires {count} stack slots")]
    TooManyStackSlots {
        /// Signature of the method
        method: String,
        /// Declared max stack
        count: usize,
    },

    /// The class layout and the field classifier computed different sizes for a value type.
    #[error("Layout mismatch for {type_name}: layout says {layout} bytes, classifier says {classifier}")]
    LayoutMismatch {
        /// Full name of the value type
        type_name: String,
        /// Size computed by the layout engine
        layout: u32,
        /// Size computed by the field classifier
        classifier: u32,
    },

    /// A class that is already part of the frozen kernel was modified.
    #[error("Class {0} is read-only")]
    ReadOnlyClass(String),

    /// A remote token range has no free slot left.
    #[error("Token space exhausted - {0}")]
    TokenSpaceExhausted(&'static str),

    /// A string constant that cannot be represented on the device.
    #[error("Invalid string constant - {0}")]
    InvalidString(String),

    /// Two distinct native method names hash to the same id.
    #[error("Native method id 0x{id:08x} is shared by {first} and {second}")]
    NativeIdCollision {
        /// The first name
        first: String,
        /// The colliding name
        second: String,
        /// The shared id
        id: u32,
    },

    /// An exception clause kind the execution engine does not implement.
    #[error("Unsupported {kind} clause in {method}")]
    UnsupportedExceptionClause {
        /// Signature of the method
        method: String,
        /// Clause kind
        kind: &'static str,
    },

    /// A type name that is not present in the program model.
    #[error("Unknown type {0}")]
    UnknownType(String),

    /// The entry method can not start a program.
    ///
    /// Entry methods must be static, non-generic and take no arguments or a single string
    /// array.
    #[error("Invalid entry point - {0}")]
    InvalidEntryPoint(String),

    /// Recursion limit reached.
    ///
    /// Generic instantiation and dependency analysis are recursive; a maximum depth is
    /// enforced to turn self-expanding generic definitions into an error.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    // Transfer errors
    /// The device did not answer within the programming timeout.
    #[error("Timeout waiting for reply to {0}")]
    Timeout(String),

    /// The device rejected a command.
    #[error("Device rejected {command} with error code {error}")]
    Nack {
        /// Name of the rejected command
        command: String,
        /// Error code reported by the device
        error: u8,
    },

    /// The transport failed or delivered an unexpected reply.
    #[error("Transport error - {0}")]
    Transport(String),

    /// File or socket I/O error.
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// A command that requires an active execution set was issued without one.
    #[error("No execution set is active")]
    NoActiveExecutionSet,

    /// Only one execution set may be active per session.
    #[error("An execution set is already active")]
    ExecutionSetActive,

    /// A task id that is not known to the session.
    #[error("Unknown task {0}")]
    UnknownTask(u16),

    /// A task was started while a previous invocation is still running.
    #[error("Task {0} is already running")]
    TaskRunning(u16),

    /// A remote invocation with the wrong number of arguments.
    #[error("Method expects {expected} arguments, {actual} given")]
    ArgumentCount {
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        actual: usize,
    },

    /// Waiting for a remote task was cancelled by the caller.
    #[error("Wait was cancelled")]
    Cancelled,

    /// A static constructor ended without returning normally.
    #[error("Error executing static constructor of {0}")]
    StaticConstructor(String),

    // Runtime errors
    /// The remote program terminated with an exception.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A debugger command needs a halted task, but the engine has not reported one.
    #[error("No task is halted in the debugger")]
    NotHalted,

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when trying to acquire a mutex that was poisoned by a panicking holder.
    #[error("Failed to lock target")]
    LockError,
}
