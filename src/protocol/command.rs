//! The command byte space of the execution engine.

use strum::{Display, EnumIter, IntoEnumIterator};

/// Leading byte of every packet.
pub const SCHEDULER_DATA: u8 = 0x7B;

/// Commands understood by the execution engine, and the reply codes it sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum ExecutorCommand {
    /// Declares a method: token, flags, stack size, argument count and native id
    DeclareMethod = 1,
    /// Uploads a chunk of patched IL
    LoadIl = 3,
    /// Starts a method as a task
    StartTask = 4,
    /// Stops every task and clears RAM
    ResetExecutor = 5,
    /// Kills the task running a method
    KillTask = 6,
    /// Declares local or argument slots of a method
    MethodSignature = 7,
    /// Declares one class member, more members follow
    ClassDeclaration = 8,
    /// Declares the last member of a class
    ClassDeclarationEnd = 9,
    /// Uploads a chunk of a field initializer
    ConstantData = 10,
    /// Lists interfaces implemented by a class
    Interfaces = 11,
    /// Copies everything uploaded so far to flash
    CopyToFlash = 12,
    /// Writes the flash header
    WriteFlashHeader = 13,
    /// Compares the flashed data version and hash
    CheckFlashVersion = 14,
    /// Erases the flash
    EraseFlash = 15,
    /// Allocates the string constant area
    SetConstantMemorySize = 16,
    /// Uploads a chunk of the special type list
    SpecialTokenList = 17,
    /// Declares one exception clause of a method
    ExceptionClauses = 18,
    /// Sends global sizes such as the static area
    GlobalMetadata = 19,
    /// Asks for the hardware description
    QueryHardware = 20,
    /// Controls the on-board debugger: a command code and up to two arguments
    DebuggerCommand = 21,
    /// Task state callback or query reply
    Reply = 0x20,
    /// Negative acknowledgement
    Nack = 0x7E,
    /// Positive acknowledgement
    Ack = 0x7F,
}

impl ExecutorCommand {
    /// The raw command byte.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Decodes a command byte.
    #[must_use]
    pub fn from_value(value: u8) -> Option<Self> {
        ExecutorCommand::iter().find(|c| c.value() == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values() {
        assert_eq!(ExecutorCommand::from_value(1), Some(ExecutorCommand::DeclareMethod));
        assert_eq!(ExecutorCommand::from_value(2), None);
        assert_eq!(ExecutorCommand::from_value(0x7E), Some(ExecutorCommand::Nack));
        assert_eq!(ExecutorCommand::QueryHardware.value(), 20);
        assert_eq!(ExecutorCommand::from_value(21), Some(ExecutorCommand::DebuggerCommand));
        assert_eq!(ExecutorCommand::LoadIl.to_string(), "LoadIl");
    }
}
