//! Execution states and exception kinds reported by the device.

use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};

/// State of a remote task as reported in a task reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[repr(u8)]
pub enum MethodState {
    /// The method returned normally
    Stopped = 0,
    /// The method terminated with an unhandled exception
    Aborted = 1,
    /// The method is executing
    Running = 2,
    /// The method was terminated by a kill request
    Killed = 3,
    /// The engine halted the task for the debugger; the reply carries debugger data
    Debugging = 4,
}

impl MethodState {
    /// Decodes a state byte.
    #[must_use]
    pub fn from_value(value: u8) -> Option<Self> {
        MethodState::iter().find(|s| *s as u8 == value)
    }

    /// Returns true for states after which the task produces no further results.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, MethodState::Running | MethodState::Debugging)
    }
}

/// Exception class raised by the execution engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[repr(u32)]
pub enum SystemExceptionKind {
    /// Call depth exceeded the task stack
    StackOverflow = 1,
    /// Member access through a null reference
    NullReference = 2,
    /// A method token without a declaration
    MissingMethod = 3,
    /// An opcode the interpreter does not implement
    InvalidOpCode = 4,
    /// Integer division by zero
    DivideByZero = 5,
    /// Array index outside the bounds
    IndexOutOfRange = 6,
    /// Heap exhausted
    OutOfMemory = 7,
    /// Array store with an incompatible element
    ArrayTypeMismatch = 8,
    /// Operation invalid in the current state
    InvalidOperation = 9,
    /// A class token without a declaration
    ClassNotFound = 10,
    /// Failed cast
    InvalidCast = 11,
    /// Unsupported operation
    NotSupported = 12,
    /// A field token that cannot be accessed
    FieldAccess = 13,
    /// Checked arithmetic overflow
    Overflow = 14,
    /// Peripheral or file I/O failure
    Io = 15,
    /// Other arithmetic failures
    Arithmetic = 16,
    /// A managed exception; the faulting token names its type
    CustomException = 17,
    /// Internal failure of the engine
    ExecutionEngine = 18,
}

impl SystemExceptionKind {
    /// Decodes an exception code.
    #[must_use]
    pub fn from_value(value: u32) -> Option<Self> {
        SystemExceptionKind::iter().find(|k| *k as u32 == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes() {
        assert_eq!(MethodState::from_value(1), Some(MethodState::Aborted));
        assert_eq!(MethodState::from_value(9), None);
        assert!(MethodState::Killed.is_terminal());
        assert!(!MethodState::Running.is_terminal());
        assert_eq!(MethodState::from_value(4), Some(MethodState::Debugging));
        assert!(!MethodState::Debugging.is_terminal());

        assert_eq!(
            SystemExceptionKind::from_value(5),
            Some(SystemExceptionKind::DivideByZero)
        );
        assert_eq!(
            SystemExceptionKind::from_value(18),
            Some(SystemExceptionKind::ExecutionEngine)
        );
        assert_eq!(SystemExceptionKind::from_value(0), None);
        assert_eq!(SystemExceptionKind::iter().count(), 18);
    }
}
