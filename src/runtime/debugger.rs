//! The on-board debugger.
//!
//! With debugging enabled the execution engine halts a task at breakpoints, after a step or
//! on request, and reports where it stopped. Halt positions and requested variable values
//! arrive as task replies with state [`crate::runtime::MethodState::Debugging`]. They never
//! change the state of the task itself: for the host the task keeps running until it stops,
//! aborts or is killed.
//!
//! The upload session queues those replies in a [`DebugChannel`]. A [`Debugger`] sends the
//! commands through [`DebugControl`] and decodes the queued data against the execution set.
//!
//! # Wire format
//!
//! A debugger reply is a task reply whose state byte is `Debugging` and whose count byte
//! holds a [`DebuggerDataKind`]. The payload is a list of 5-byte integers:
//!
//! - execution stack: `(method token, pc)` pairs, outermost frame first
//! - variables: stack frame, method token, then per variable its index, a 14-bit
//!   [`VariableKind`] and the low and high word of the raw value

use std::{
    collections::{BTreeSet, VecDeque},
    fmt,
    sync::{Condvar, Mutex},
    time::Duration,
};

use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{
    execution::ExecutionSet,
    il::opcodes::{decode_opcode, RET},
    layout::VariableKind,
    metadata::{universe::Universe, MethodId},
    protocol::encoder::{decode_int14, decode_int32},
    runtime::{
        error::{decode_stack_trace, RemoteStackFrame},
        value::Value,
    },
    tokens::{Entity, RemoteToken},
    Error, Result,
};

/// Bytes of one variable entry: index, kind, low word, high word.
const VARIABLE_ENTRY: usize = 5 + 2 + 5 + 5;

/// Stack frame argument selecting the frame the task is halted in.
const CURRENT_FRAME: i32 = -1;

/// Commands understood by the on-board debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[repr(u8)]
pub enum DebuggerCommand {
    /// Starts reporting halts
    EnableDebugging = 1,
    /// Stops reporting halts; breakpoints are ignored
    DisableDebugging = 2,
    /// Halts at the next instruction
    Break = 3,
    /// Resumes a halted task
    Continue = 4,
    /// Executes one instruction, entering calls
    StepInto = 5,
    /// Executes one instruction, running calls to completion
    StepOver = 6,
    /// Runs until the current method returns
    StepOut = 7,
    /// Toggles a breakpoint at a method token and IL offset
    BreakPoint = 8,
    /// Reports the locals of a stack frame
    SendLocals = 9,
    /// Reports the arguments of a stack frame
    SendArguments = 10,
    /// Reports the evaluation stack of a stack frame
    SendEvaluationStack = 11,
    /// Halts whenever an exception is thrown
    BreakOnExceptions = 12,
}

impl DebuggerCommand {
    /// The command code.
    #[must_use]
    pub fn value(self) -> u32 {
        self as u32
    }

    /// Decodes a command code.
    #[must_use]
    pub fn from_value(value: u32) -> Option<Self> {
        DebuggerCommand::iter().find(|c| c.value() == value)
    }
}

/// What a debugger reply describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[repr(u8)]
pub enum DebuggerDataKind {
    /// The task halted; the payload is its call stack
    ExecutionStack = 0,
    /// Locals of a stack frame
    Locals = 1,
    /// Arguments of a stack frame
    Arguments = 2,
    /// Evaluation stack of a stack frame
    EvaluationStack = 3,
}

impl DebuggerDataKind {
    /// The byte sent in the reply header.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }

    /// Decodes a reply header byte.
    #[must_use]
    pub fn from_value(value: u8) -> Option<Self> {
        DebuggerDataKind::iter().find(|k| k.value() == value)
    }

    fn request(self) -> Option<DebuggerCommand> {
        match self {
            DebuggerDataKind::ExecutionStack => None,
            DebuggerDataKind::Locals => Some(DebuggerCommand::SendLocals),
            DebuggerDataKind::Arguments => Some(DebuggerCommand::SendArguments),
            DebuggerDataKind::EvaluationStack => Some(DebuggerCommand::SendEvaluationStack),
        }
    }
}

/// One undecoded debugger reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugData {
    /// The halted task
    pub task_id: u16,
    /// What the payload describes
    pub kind: DebuggerDataKind,
    /// Payload, still 7-bit encoded
    pub payload: Vec<u8>,
}

/// Queue of debugger replies, filled by the receiver thread.
#[derive(Debug, Default)]
pub struct DebugChannel {
    queue: Mutex<VecDeque<DebugData>>,
    available: Condvar,
}

impl DebugChannel {
    /// An empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply and wakes a waiting debugger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the queue lock is poisoned.
    pub fn push(&self, data: DebugData) -> Result<()> {
        lock!(self.queue).push_back(data);
        self.available.notify_all();
        Ok(())
    }

    /// Takes the oldest reply, waiting up to `timeout` for one to arrive.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the queue lock is poisoned.
    pub fn next(&self, timeout: Duration) -> Result<Option<DebugData>> {
        let queue = lock!(self.queue);
        let (mut queue, _) = wait_while!(self.available, queue, timeout, |q| q.is_empty());
        Ok(queue.pop_front())
    }

    /// Number of queued replies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the queue lock is poisoned.
    pub fn pending(&self) -> Result<usize> {
        Ok(lock!(self.queue).len())
    }

    /// Drops every queued reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the queue lock is poisoned.
    pub fn clear(&self) -> Result<()> {
        lock!(self.queue).clear();
        Ok(())
    }
}

/// Sends debugger commands and exposes the reply queue. Implemented by the upload session.
pub trait DebugControl {
    /// Sends `command` with optional arguments and waits for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Transfer errors of the underlying transport.
    fn debugger_command(&self, command: DebuggerCommand, arguments: Option<[i32; 2]>)
        -> Result<()>;

    /// The queue debugger replies are delivered to.
    fn debug_data(&self) -> &DebugChannel;
}

/// A decoded local, argument or evaluation stack slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebuggerVariable {
    /// Position in the reported list
    pub index: usize,
    /// Parameter name, `this`, or a generated description
    pub name: String,
    /// How the engine stores the slot
    pub kind: VariableKind,
    /// Declared type, when the method metadata knows it
    pub type_name: Option<String>,
    /// The value, for kinds with a scalar representation
    pub value: Option<Value>,
}

impl fmt::Display for DebuggerVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(type_name) = &self.type_name {
            write!(f, " ({type_name})")?;
        }
        match &self.value {
            Some(value) => write!(f, " = {value}"),
            None => write!(f, " = <{}>", self.kind),
        }
    }
}

/// Variables of one stack frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameVariables {
    /// Which slots were reported
    pub kind: DebuggerDataKind,
    /// The halted task
    pub task_id: u16,
    /// Stack frame as reported, `-1` for the current one
    pub frame: i32,
    /// Token of the method executing in the frame
    pub token: RemoteToken,
    /// Signature of that method
    pub method: String,
    /// The slots, in order
    pub variables: Vec<DebuggerVariable>,
}

/// Something the debugger reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DebugEvent {
    /// A task halted
    Halted {
        /// The halted task
        task_id: u16,
        /// Call stack, most recent call first
        frames: Vec<RemoteStackFrame>,
    },
    /// Answer to a variable request
    Variables(FrameVariables),
}

/// Decodes the call stack of a halt reply, most recent call first.
#[must_use]
pub fn decode_stack(universe: &Universe, set: &ExecutionSet, payload: &[u8]) -> Vec<RemoteStackFrame> {
    let values: Vec<u32> = (0..payload.len() / 5)
        .filter_map(|index| decode_int32(payload, index * 5))
        .collect();
    decode_stack_trace(universe, set, &values)
}

/// Decodes the answer to a variable request.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if the payload is truncated, the method token is unknown to
/// `set`, or the entries are out of sequence.
pub fn decode_variables(
    universe: &Universe,
    set: &ExecutionSet,
    task_id: u16,
    kind: DebuggerDataKind,
    payload: &[u8],
) -> Result<FrameVariables> {
    let (Some(frame), Some(token)) = (decode_int32(payload, 0), decode_int32(payload, 5)) else {
        return Err(malformed_error!("Truncated variable list of task {task_id}"));
    };
    let token = RemoteToken(token);
    let Some(Entity::Method(method)) = set.inverse_resolve(token) else {
        return Err(malformed_error!("No method for token {token}"));
    };

    let mut variables = Vec::new();
    let mut offset = 10;
    while offset < payload.len() {
        let entry = payload
            .get(offset..offset + VARIABLE_ENTRY)
            .ok_or_else(|| malformed_error!("Truncated variable {}", variables.len()))?;
        let index = variables.len();
        if decode_int32(entry, 0) != Some(index as u32) {
            return Err(malformed_error!(
                "Variable {index} of task {task_id} is out of sequence"
            ));
        }
        let raw_kind = decode_int14(entry, 5).unwrap_or(0);
        let slot = u8::try_from(raw_kind)
            .ok()
            .and_then(VariableKind::from_value)
            .ok_or_else(|| malformed_error!("Unknown variable kind {raw_kind}"))?;
        let low = u64::from(decode_int32(entry, 7).unwrap_or(0));
        let high = u64::from(decode_int32(entry, 12).unwrap_or(0));

        let (name, type_name) = describe_slot(universe, method, kind, index);
        variables.push(DebuggerVariable {
            index,
            name,
            kind: slot,
            type_name,
            value: slot_value(slot, low | (high << 32)),
        });
        offset += VARIABLE_ENTRY;
    }

    Ok(FrameVariables {
        kind,
        task_id,
        frame: frame as i32,
        token,
        method: universe.method_signature(method),
        variables,
    })
}

fn describe_slot(
    universe: &Universe,
    method: MethodId,
    kind: DebuggerDataKind,
    index: usize,
) -> (String, Option<String>) {
    let def = universe.method(method);
    match kind {
        DebuggerDataKind::Arguments => {
            let parameter = if def.is_static() {
                Some(index)
            } else if index == 0 {
                return (
                    "this".to_string(),
                    Some(universe.full_name(def.declaring_type)),
                );
            } else {
                Some(index - 1)
            };
            match parameter.and_then(|p| def.parameters.get(p)) {
                Some(parameter) => (
                    parameter.name.clone(),
                    Some(universe.full_name(parameter.param_type)),
                ),
                None => (format!("Argument {index}"), None),
            }
        }
        DebuggerDataKind::EvaluationStack => (format!("Evaluation stack element {index}"), None),
        DebuggerDataKind::Locals | DebuggerDataKind::ExecutionStack => {
            let local = def.body.as_ref().and_then(|b| b.locals.get(index));
            (
                format!("Local variable {index}"),
                local.map(|ty| universe.full_name(*ty)),
            )
        }
    }
}

fn slot_value(kind: VariableKind, raw: u64) -> Option<Value> {
    let low = raw as u32;
    let value = match kind {
        VariableKind::Boolean => Value::Bool(low & 0xFF != 0),
        VariableKind::Object
        | VariableKind::AddressOfVariable
        | VariableKind::FunctionPointer
        | VariableKind::Int32 => Value::Int32(low as i32),
        VariableKind::Uint32 => Value::UInt32(low),
        VariableKind::Int64 => Value::Int64(raw as i64),
        VariableKind::Uint64 => Value::UInt64(raw),
        VariableKind::Float => Value::Single(f32::from_bits(low)),
        VariableKind::Double => Value::Double(f64::from_bits(raw)),
        _ => return None,
    };
    Some(value)
}

/// Controls the debugger of the board running `set`.
///
/// Breakpoints are tracked locally so that setting or clearing one twice does not toggle it
/// back on the device.
pub struct Debugger<'a> {
    control: &'a dyn DebugControl,
    universe: &'a Universe,
    set: &'a ExecutionSet,
    breakpoints: BTreeSet<(RemoteToken, u32)>,
    halted: Option<(u16, Vec<RemoteStackFrame>)>,
}

impl<'a> Debugger<'a> {
    /// A debugger for the program `set`, uploaded through `control`.
    #[must_use]
    pub fn new(control: &'a dyn DebugControl, universe: &'a Universe, set: &'a ExecutionSet) -> Self {
        Debugger {
            control,
            universe,
            set,
            breakpoints: BTreeSet::new(),
            halted: None,
        }
    }

    /// Enables debugging, halting at the next instruction if `stop_immediately` is set.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn start(&mut self, stop_immediately: bool) -> Result<()> {
        self.control
            .debugger_command(DebuggerCommand::EnableDebugging, None)?;
        if stop_immediately {
            self.control.debugger_command(DebuggerCommand::Break, None)?;
        }
        Ok(())
    }

    /// Disables debugging and resumes a halted task.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn stop(&mut self) -> Result<()> {
        self.control
            .debugger_command(DebuggerCommand::DisableDebugging, None)?;
        self.continue_execution()
    }

    /// Methods of the set whose signature contains `pattern`.
    #[must_use]
    pub fn find_methods(&self, pattern: &str) -> Vec<MethodId> {
        self.set
            .methods()
            .iter()
            .map(|m| m.method)
            .filter(|m| self.universe.method_signature(*m).contains(pattern))
            .collect()
    }

    /// Sets a breakpoint at IL `offset` of `method`. Returns false if it was already set.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if the method is not part of the set or the offset lies
    ///   outside its body
    /// - transfer errors
    pub fn set_breakpoint(&mut self, method: MethodId, offset: u32) -> Result<bool> {
        let key = self.breakpoint_key(method, offset)?;
        if self.breakpoints.contains(&key) {
            return Ok(false);
        }
        log::info!(
            "Setting breakpoint in {} at IL_{offset:04x}",
            self.universe.method_signature(method)
        );
        self.toggle(key)?;
        self.breakpoints.insert(key);
        Ok(true)
    }

    /// Removes a breakpoint. Returns false if none was set there.
    ///
    /// # Errors
    ///
    /// See [`Self::set_breakpoint`].
    pub fn clear_breakpoint(&mut self, method: MethodId, offset: u32) -> Result<bool> {
        let key = self.breakpoint_key(method, offset)?;
        if !self.breakpoints.contains(&key) {
            return Ok(false);
        }
        self.toggle(key)?;
        self.breakpoints.remove(&key);
        Ok(true)
    }

    /// Removes every breakpoint.
    ///
    /// # Errors
    ///
    /// Transfer errors. Breakpoints not yet removed stay recorded.
    pub fn clear_breakpoints(&mut self) -> Result<()> {
        while let Some(key) = self.breakpoints.first().copied() {
            self.toggle(key)?;
            self.breakpoints.remove(&key);
        }
        Ok(())
    }

    /// Active breakpoints as `(method token, offset)`.
    pub fn breakpoints(&self) -> impl Iterator<Item = &(RemoteToken, u32)> {
        self.breakpoints.iter()
    }

    fn breakpoint_key(&self, method: MethodId, offset: u32) -> Result<(RemoteToken, u32)> {
        let declaration = self.set.method(method).ok_or_else(|| {
            malformed_error!(
                "Method {} is not loaded",
                self.universe.method_signature(method)
            )
        })?;
        if declaration.has_body() && offset as usize >= declaration.code_len() {
            return Err(malformed_error!(
                "Offset IL_{offset:04x} is outside of {}",
                self.universe.method_signature(method)
            ));
        }
        Ok((declaration.token, offset))
    }

    fn toggle(&self, (token, offset): (RemoteToken, u32)) -> Result<()> {
        self.control.debugger_command(
            DebuggerCommand::BreakPoint,
            Some([token.value() as i32, offset as i32]),
        )
    }

    /// Halts the running task at the next instruction.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn break_execution(&mut self) -> Result<()> {
        self.control.debugger_command(DebuggerCommand::Break, None)
    }

    /// Resumes the halted task.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn continue_execution(&mut self) -> Result<()> {
        self.control.debugger_command(DebuggerCommand::Continue, None)?;
        self.halted = None;
        Ok(())
    }

    /// Executes one instruction, entering calls.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn step_into(&mut self) -> Result<()> {
        self.control.debugger_command(DebuggerCommand::StepInto, None)
    }

    /// Executes one instruction, running calls to completion.
    ///
    /// On a `ret` this steps into the caller instead: stepping over a return would only halt
    /// again the next time the method runs.
    ///
    /// # Errors
    ///
    /// - [`Error::NotHalted`] if no halt position is known
    /// - transfer errors
    pub fn step_over(&mut self) -> Result<()> {
        let top = self.current_frame().ok_or(Error::NotHalted)?;
        let at_return = self
            .set
            .method_by_token(top.token)
            .and_then(|m| m.code.as_ref())
            .and_then(|code| decode_opcode(&code.bytes, top.pc as usize).ok())
            .is_some_and(|op| op.value == u16::from(RET));
        let command = if at_return {
            DebuggerCommand::StepInto
        } else {
            DebuggerCommand::StepOver
        };
        self.control.debugger_command(command, None)
    }

    /// Runs until the current method returns.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn step_out(&mut self) -> Result<()> {
        self.control.debugger_command(DebuggerCommand::StepOut, None)
    }

    /// Halts whenever an exception is thrown.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn break_on_exceptions(&mut self) -> Result<()> {
        self.control
            .debugger_command(DebuggerCommand::BreakOnExceptions, None)
    }

    /// Asks for the slots of stack frame `frame`, the current one if `None`. The answer
    /// arrives as [`DebugEvent::Variables`].
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] for [`DebuggerDataKind::ExecutionStack`]
    /// - transfer errors
    pub fn request_variables(&mut self, kind: DebuggerDataKind, frame: Option<u32>) -> Result<()> {
        let command = kind
            .request()
            .ok_or_else(|| malformed_error!("{kind} cannot be requested"))?;
        let frame = frame.map_or(CURRENT_FRAME, |f| f as i32);
        self.control.debugger_command(command, Some([frame, 0]))
    }

    /// Waits up to `timeout` for the next report and decodes it.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] for undecodable variable lists.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<DebugEvent>> {
        let Some(data) = self.control.debug_data().next(timeout)? else {
            return Ok(None);
        };
        let event = match data.kind {
            DebuggerDataKind::ExecutionStack => {
                let frames = decode_stack(self.universe, self.set, &data.payload);
                if let Some(top) = frames.first() {
                    log::info!("Task {} halted in {top}", data.task_id);
                }
                self.halted = Some((data.task_id, frames.clone()));
                DebugEvent::Halted {
                    task_id: data.task_id,
                    frames,
                }
            }
            kind => DebugEvent::Variables(decode_variables(
                self.universe,
                self.set,
                data.task_id,
                kind,
                &data.payload,
            )?),
        };
        Ok(Some(event))
    }

    /// The task the engine last halted, until execution continues.
    #[must_use]
    pub fn halted_task(&self) -> Option<u16> {
        self.halted.as_ref().map(|(task_id, _)| *task_id)
    }

    /// Call stack of the last halt, most recent call first.
    #[must_use]
    pub fn current_stack(&self) -> &[RemoteStackFrame] {
        self.halted.as_ref().map_or(&[], |(_, frames)| frames.as_slice())
    }

    /// The frame the task is halted in.
    #[must_use]
    pub fn current_frame(&self) -> Option<&RemoteStackFrame> {
        self.current_stack().first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::Compiler,
        config::CompilerSettings,
        protocol::{ExecutorCommand, PacketWriter},
        test::shapes,
    };
    use std::cell::RefCell;

    #[derive(Default)]
    struct Board {
        sent: RefCell<Vec<(DebuggerCommand, Option<[i32; 2]>)>>,
        channel: DebugChannel,
    }

    impl DebugControl for Board {
        fn debugger_command(
            &self,
            command: DebuggerCommand,
            arguments: Option<[i32; 2]>,
        ) -> Result<()> {
            self.sent.borrow_mut().push((command, arguments));
            Ok(())
        }

        fn debug_data(&self) -> &DebugChannel {
            &self.channel
        }
    }

    fn int32s(values: &[u32]) -> Vec<u8> {
        let mut writer = PacketWriter::new(ExecutorCommand::Reply);
        for value in values {
            writer.send_int32(*value);
        }
        writer.finish()[2..].to_vec()
    }

    fn variable(index: u32, kind: VariableKind, raw: u64) -> Vec<u8> {
        let mut writer = PacketWriter::new(ExecutorCommand::Reply);
        writer.send_int32(index);
        writer.send_int14(u32::from(kind.value()));
        writer.send_int32(raw as u32);
        writer.send_int32((raw >> 32) as u32);
        writer.finish()[2..].to_vec()
    }

    #[test]
    fn command_codes() {
        assert_eq!(DebuggerCommand::from_value(4), Some(DebuggerCommand::Continue));
        assert_eq!(DebuggerCommand::from_value(0), None);
        assert_eq!(DebuggerCommand::iter().count(), 12);
        assert_eq!(DebuggerDataKind::from_value(3), Some(DebuggerDataKind::EvaluationStack));
        assert_eq!(DebuggerDataKind::from_value(4), None);
    }

    #[test]
    fn breakpoints_are_set_and_cleared_once() -> Result<()> {
        let shapes = shapes();
        let universe = &shapes.universe;
        let set = Compiler::new(universe, &[])?
            .compile(universe, shapes.main, &CompilerSettings::default())?
            .set;
        let token = set.method(shapes.main).unwrap().token;
        let board = Board::default();
        let mut debugger = Debugger::new(&board, universe, &set);

        assert!(debugger.set_breakpoint(shapes.main, 5)?);
        assert!(!debugger.set_breakpoint(shapes.main, 5)?);
        assert_eq!(debugger.breakpoints().count(), 1);
        assert!(debugger.clear_breakpoint(shapes.main, 5)?);
        assert!(!debugger.clear_breakpoint(shapes.main, 5)?);
        assert!(debugger.set_breakpoint(shapes.main, 0)?);
        debugger.clear_breakpoints()?;
        assert_eq!(debugger.breakpoints().count(), 0);

        let toggle = |offset| (DebuggerCommand::BreakPoint, Some([token.value() as i32, offset]));
        assert_eq!(*board.sent.borrow(), vec![toggle(5), toggle(5), toggle(0), toggle(0)]);

        assert!(matches!(
            debugger.set_breakpoint(shapes.main, 200),
            Err(Error::Malformed { .. })
        ));
        assert_eq!(debugger.find_methods("Program::Main"), vec![shapes.main]);
        Ok(())
    }

    #[test]
    fn halts_decode_the_stack() -> Result<()> {
        let shapes = shapes();
        let universe = &shapes.universe;
        let set = Compiler::new(universe, &[])?
            .compile(universe, shapes.main, &CompilerSettings::default())?
            .set;
        let main = set.method(shapes.main).unwrap().token;
        let board = Board::default();
        let mut debugger = Debugger::new(&board, universe, &set);

        assert!(matches!(debugger.step_over(), Err(Error::NotHalted)));

        // one unused slot, then Main halted on the ret at IL_000b
        board.channel.push(DebugData {
            task_id: 3,
            kind: DebuggerDataKind::ExecutionStack,
            payload: int32s(&[0, 0, main.value(), 0x0B]),
        })?;
        let event = debugger.next_event(Duration::from_millis(10))?;
        let Some(DebugEvent::Halted { task_id, frames }) = event else {
            panic!("expected a halt, got {event:?}");
        };
        assert_eq!(task_id, 3);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pc, 0x0B);
        assert!(frames[0].method.as_deref().is_some_and(|m| m.contains("Main")));
        assert_eq!(debugger.halted_task(), Some(3));

        debugger.step_over()?;
        debugger.continue_execution()?;
        assert_eq!(debugger.halted_task(), None);
        assert_eq!(
            *board.sent.borrow(),
            vec![
                (DebuggerCommand::StepInto, None),
                (DebuggerCommand::Continue, None)
            ]
        );
        assert_eq!(debugger.next_event(Duration::from_millis(10))?, None);
        Ok(())
    }

    #[test]
    fn variables_are_named_and_typed() -> Result<()> {
        let shapes = shapes();
        let universe = &shapes.universe;
        let set = Compiler::new(universe, &[])?
            .compile(universe, shapes.main, &CompilerSettings::default())?
            .set;
        let area = universe.find_method(shapes.circle, "Area").unwrap();
        let area_token = set.method(area).unwrap().token;
        let board = Board::default();
        let mut debugger = Debugger::new(&board, universe, &set);

        debugger.request_variables(DebuggerDataKind::Arguments, None)?;
        assert_eq!(
            board.sent.borrow()[0],
            (DebuggerCommand::SendArguments, Some([-1, 0]))
        );
        assert!(debugger
            .request_variables(DebuggerDataKind::ExecutionStack, None)
            .is_err());

        let mut payload = int32s(&[1, area_token.value()]);
        payload.extend(variable(0, VariableKind::Object, 0x2000_0010));
        board.channel.push(DebugData {
            task_id: 0,
            kind: DebuggerDataKind::Arguments,
            payload,
        })?;
        let Some(DebugEvent::Variables(frame)) = debugger.next_event(Duration::from_millis(10))?
        else {
            panic!("expected variables");
        };
        assert_eq!(frame.frame, 1);
        assert_eq!(frame.variables.len(), 1);
        assert_eq!(frame.variables[0].name, "this");
        assert_eq!(frame.variables[0].type_name.as_deref(), Some("Demo.Circle"));
        assert_eq!(frame.variables[0].value, Some(Value::Int32(0x2000_0010)));

        let mut payload = int32s(&[u32::MAX, area_token.value()]);
        payload.extend(variable(0, VariableKind::Int64, (-5i64) as u64));
        payload.extend(variable(1, VariableKind::Double, 2.5f64.to_bits()));
        payload.extend(variable(2, VariableKind::ValueArray, 7));
        let stack = decode_variables(
            universe,
            &set,
            0,
            DebuggerDataKind::EvaluationStack,
            &payload,
        )?;
        assert_eq!(stack.frame, -1);
        let values: Vec<_> = stack.variables.iter().map(|v| v.value).collect();
        assert_eq!(values, [Some(Value::Int64(-5)), Some(Value::Double(2.5)), None]);
        assert_eq!(stack.variables[2].name, "Evaluation stack element 2");
        Ok(())
    }

    #[test]
    fn out_of_sequence_variables_are_rejected() -> Result<()> {
        let shapes = shapes();
        let universe = &shapes.universe;
        let set = Compiler::new(universe, &[])?
            .compile(universe, shapes.main, &CompilerSettings::default())?
            .set;
        let main = set.method(shapes.main).unwrap().token;

        let mut payload = int32s(&[0, main.value()]);
        payload.extend(variable(1, VariableKind::Int32, 4));
        let result = decode_variables(universe, &set, 0, DebuggerDataKind::Locals, &payload);
        assert!(matches!(result, Err(Error::Malformed { .. })));

        let unknown = int32s(&[0, 0x0600_7FFF]);
        let result = decode_variables(universe, &set, 0, DebuggerDataKind::Locals, &unknown);
        assert!(matches!(result, Err(Error::Malformed { .. })));
        Ok(())
    }
}
