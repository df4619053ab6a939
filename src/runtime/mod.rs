//! Remote execution: tasks, their states and the decoding of results and exceptions.
//!
//! A [`RemoteTask`] is created by [`crate::protocol::Session`] for a method of the active
//! execution set. Aborted tasks report a fault description that [`RemoteError::decode`] turns
//! into a message with a symbolic stack trace. The [`debugger`] halts tasks and reads their
//! variables while they run.

pub mod debugger;
pub mod error;
pub mod state;
pub mod task;
pub mod value;

pub use debugger::{
    DebugChannel, DebugControl, DebugData, DebugEvent, Debugger, DebuggerCommand, DebuggerDataKind,
    DebuggerVariable, FrameVariables,
};
pub use error::{decode_stack_trace, RemoteError, RemoteStackFrame};
pub use state::{MethodState, SystemExceptionKind};
pub use task::{CancellationToken, RemoteTask, TaskControl, TaskOutput, TaskPayload};
pub use value::Value;
