//! Exceptions of remote tasks.
//!
//! An aborted task reports a list of 32-bit values: the exception code, the faulting token,
//! a zero marker and the stack trace as `(method token, pc)` pairs, outermost frame first.
//! [`RemoteError::decode`] turns that into a local error with a readable message.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::{
    execution::ExecutionSet,
    il::opcodes,
    metadata::universe::Universe,
    runtime::state::SystemExceptionKind,
    tokens::{Entity, RemoteToken},
};

/// One frame of a remote stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteStackFrame {
    /// Token of the executing method
    pub token: RemoteToken,
    /// IL offset inside the method
    pub pc: u32,
    /// Signature of the method, if the token resolves
    pub method: Option<String>,
}

impl fmt::Display for RemoteStackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{method} IL_{:04x}", self.pc),
            None => write!(f, "Unknown method {} IL_{:04x}", self.token, self.pc),
        }
    }
}

/// An exception raised on the device, reconstructed from an aborted task.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}")]
pub struct RemoteError {
    /// Exception code
    pub kind: SystemExceptionKind,
    /// The faulting token as reported
    pub token: RemoteToken,
    /// Full name of the thrown type, for managed exceptions
    pub exception_type: Option<String>,
    /// Description including the stack trace
    pub message: String,
    /// Stack frames, most recent call first
    pub stack_trace: Vec<RemoteStackFrame>,
}

impl RemoteError {
    /// Decodes the payload of an aborted task.
    ///
    /// Tokens that no longer resolve in `set` are described through the entry method, so
    /// the message always names some location.
    #[must_use]
    pub fn decode(universe: &Universe, set: &ExecutionSet, values: &[u32]) -> Self {
        let code = values.first().copied().unwrap_or(0);
        let token = RemoteToken(values.get(1).copied().unwrap_or(0));
        let kind =
            SystemExceptionKind::from_value(code).unwrap_or(SystemExceptionKind::ExecutionEngine);

        let stack_trace = values
            .iter()
            .skip(2)
            .position(|v| *v == 0)
            .map(|marker| decode_stack_trace(universe, set, &values[marker + 3..]))
            .unwrap_or_default();
        let trace_text = print_stack(&stack_trace);

        let location = set.describe_token(universe, token).or_else(|| {
            set.main_entry()
                .map(|main| universe.method_signature(main))
        });
        let location = location.unwrap_or_else(|| format!("token {token}"));

        let exception_type = match (kind, set.inverse_resolve(token)) {
            (SystemExceptionKind::CustomException, Some(Entity::Type(ty))) => {
                Some(universe.full_name(ty))
            }
            _ => None,
        };

        let message = match kind {
            SystemExceptionKind::InvalidOpCode => {
                let name = u16::try_from(token.value())
                    .ok()
                    .and_then(opcodes::lookup)
                    .map_or("unknown", |op| op.mnemonic);
                format!("Invalid opcode 0x{:04X}: {name}", token.value())
            }
            SystemExceptionKind::StackOverflow => format!("Stack overflow in {location}"),
            SystemExceptionKind::NullReference => format!("Null reference in {location}"),
            SystemExceptionKind::MissingMethod => {
                format!("Missing method {location} (token {token})")
            }
            SystemExceptionKind::DivideByZero => {
                format!("Integer division by zero in {location}")
            }
            SystemExceptionKind::IndexOutOfRange => format!("Index out of range in {location}"),
            SystemExceptionKind::OutOfMemory => {
                format!("Out of memory allocating an instance of {location}")
            }
            SystemExceptionKind::ArrayTypeMismatch => {
                format!("Array element type mismatch in {location}")
            }
            SystemExceptionKind::InvalidOperation => {
                format!("Invalid operation attempted in {location}")
            }
            SystemExceptionKind::ClassNotFound => {
                format!("Type initialization failed for {location}")
            }
            SystemExceptionKind::InvalidCast => format!("Cast to {location} is not possible"),
            SystemExceptionKind::NotSupported => {
                format!("Unsupported operation attempted in {location}")
            }
            SystemExceptionKind::FieldAccess => {
                format!("Unable to access or find field {location}")
            }
            SystemExceptionKind::Overflow => format!("Integer overflow in {location}"),
            SystemExceptionKind::Io => format!("I/O exception in {location}"),
            SystemExceptionKind::Arithmetic => format!("Arithmetic exception in {location}"),
            SystemExceptionKind::CustomException => {
                format!("{} thrown", exception_type.as_deref().unwrap_or(&location))
            }
            SystemExceptionKind::ExecutionEngine => {
                "Execution engine exception in remote runtime".to_string()
            }
        };

        RemoteError {
            kind,
            token,
            exception_type,
            message: format!("{message}{trace_text}"),
            stack_trace,
        }
    }
}

/// Decodes stack trace values into frames, most recent call first. Empty `(0, 0)` slots
/// are skipped; the engine always reports a fixed number of frames.
#[must_use]
pub fn decode_stack_trace(
    universe: &Universe,
    set: &ExecutionSet,
    values: &[u32],
) -> Vec<RemoteStackFrame> {
    let reversed: Vec<u32> = values.iter().rev().copied().collect();
    reversed
        .chunks_exact(2)
        .filter(|pair| pair != &[0, 0])
        .map(|pair| {
            let (pc, token) = (pair[0], RemoteToken(pair[1]));
            let method = match set.inverse_resolve(token) {
                Some(Entity::Method(method)) => Some(universe.method_signature(method)),
                _ => None,
            };
            RemoteStackFrame { token, pc, method }
        })
        .collect()
}

fn print_stack(frames: &[RemoteStackFrame]) -> String {
    if frames.is_empty() {
        return String::new();
    }
    let mut text = String::from("\nStack trace, most recent call first:");
    for (index, frame) in frames.iter().enumerate() {
        text.push_str(&format!("\n{:03}: {frame}", frames.len() - index - 1));
    }
    text
}
