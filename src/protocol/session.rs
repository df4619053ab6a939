//! Upload sessions.
//!
//! A [`Session`] owns the connection to one board. It uploads an [`ExecutionSet`] as the
//! difference between two snapshots, keeps the table of remote tasks and routes task callbacks
//! arriving on the transport's receiver thread to them. Debugger callbacks go to the session's
//! [`DebugChannel`] and leave the task table alone.
//!
//! # Upload sequence
//!
//! 1. Flash kernel: skipped if the board reports the kernel hash, otherwise erased and
//!    rewritten from scratch.
//! 2. Program: skipped if the board reports the program hash, otherwise classes, methods,
//!    field initializers, strings and the special type list that are new relative to the
//!    kernel are sent, followed by the size of the static area.
//! 3. The set becomes active, the main task is created and the static constructors run.

use std::{
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use dashmap::DashMap;

use crate::{
    execution::{ExecutionSet, SnapShot},
    metadata::{universe::Universe, MethodId},
    protocol::{
        encoder,
        flash::{FlashHeader, StartupFlags, DATA_VERSION},
        transport::{check_ack, HardwareInfo, Reply, Transport},
    },
    runtime::{
        debugger::{DebugChannel, DebugControl, DebugData, DebuggerCommand},
        state::MethodState,
        task::{CancellationToken, RemoteTask, TaskControl, TaskPayload},
        value::Value,
    },
    tokens::RemoteToken,
    Error, Result,
};

/// Timeout for task control commands outside of an upload.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for debugger commands; the engine answers them between two instructions of a
/// halted task.
pub const DEBUGGER_TIMEOUT: Duration = Duration::from_secs(60);

/// Items between two `CopyToFlash` commands while writing to flash. RAM on the board is much
/// smaller than flash, so large sets are flushed in batches.
const FLASH_BATCH: usize = 100;

/// Options for [`Session::load`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Run the static constructors after the upload
    pub run_static_constructors: bool,
    /// Releases the wait for a static constructor
    pub cancel: CancellationToken,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            run_static_constructors: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Counts of what an upload sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct UploadSummary {
    /// Class declarations
    pub classes: usize,
    /// Method declarations
    pub methods: usize,
    /// Field initializers
    pub constants: usize,
    /// String constants
    pub strings: usize,
    /// Special type entries
    pub special_types: usize,
}

/// The connection to one board.
pub struct Session<T: Transport> {
    transport: Arc<T>,
    tasks: Arc<DashMap<u16, Arc<RemoteTask>>>,
    debug: Arc<DebugChannel>,
    next_task_id: AtomicU16,
    active: Mutex<Option<u32>>,
    timeout: Duration,
}

impl<T: Transport> Session<T> {
    /// Opens a session and registers the task callback handler with `transport`.
    pub fn new(transport: Arc<T>) -> Self {
        let tasks: Arc<DashMap<u16, Arc<RemoteTask>>> = Arc::new(DashMap::new());
        let debug = Arc::new(DebugChannel::new());
        let table = Arc::clone(&tasks);
        let channel = Arc::clone(&debug);
        transport.set_reply_handler(Arc::new(move |data: &[u8]| {
            if let Err(error) = dispatch_reply(&table, &channel, data) {
                log::warn!("Dropped reply: {error}");
            }
        }));
        Session {
            transport,
            tasks,
            debug,
            next_task_id: AtomicU16::new(0),
            active: Mutex::new(None),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Changes the timeout for task control commands.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Routes a task callback to its task, or a debugger callback to the debug channel.
    /// Returns false for packets that are not callbacks or arrive after the task ended.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownTask`] if no task has the reported id
    /// - [`Error::Malformed`] for undecodable packets
    pub fn handle_reply(&self, data: &[u8]) -> Result<bool> {
        dispatch_reply(&self.tasks, &self.debug, data)
    }

    /// Asks the board for its hardware description.
    ///
    /// # Errors
    ///
    /// Transfer errors, or [`Error::Malformed`] for an unexpected reply.
    pub fn query_capabilities(&self) -> Result<HardwareInfo> {
        let reply = self
            .transport
            .send_and_wait(&encoder::query_hardware(), self.timeout)?;
        let info = HardwareInfo::parse(&reply)?;
        log::info!(
            "Board: protocol {}, {} bytes flash ({} used), {} bytes RAM",
            info.protocol_version,
            info.flash_size,
            info.flash_used,
            info.ram_size
        );
        Ok(info)
    }

    /// Returns true if the flash holds data of the current layout version with `hash`.
    ///
    /// # Errors
    ///
    /// Transfer errors.
    pub fn is_matching_firmware_loaded(&self, hash: u32, timeout: Duration) -> Result<bool> {
        let packet = encoder::check_flash_version(DATA_VERSION, hash);
        let reply = self.transport.send_and_wait(&packet, timeout)?;
        match Reply::parse(&reply)? {
            Reply::Ack { .. } => Ok(true),
            Reply::Nack { .. } => Ok(false),
            other => Err(Error::Transport(format!(
                "Unexpected reply to flash version check: {other:?}"
            ))),
        }
    }

    /// Resets the execution engine, optionally erasing flash, and forgets every task and the
    /// active set.
    ///
    /// # Errors
    ///
    /// Transfer errors. A rejected reset only means a running task was killed and is ignored.
    pub fn clear_all_data(&self, force: bool, including_flash: bool) -> Result<()> {
        if including_flash {
            log::debug!("Erasing flash");
            self.send(&encoder::erase_flash(), self.timeout)?;
        }
        log::debug!("Resetting execution engine");
        match self.send(&encoder::reset_executor(force), self.timeout) {
            Err(Error::Nack { .. }) => log::warn!("Terminated running task (ignored)"),
            other => other?,
        }
        self.tasks.clear();
        self.debug.clear()?;
        self.next_task_id.store(0, Ordering::SeqCst);
        *lock!(self.active) = None;
        Ok(())
    }

    /// Uploads `set` and returns the task of its entry method.
    ///
    /// Content the board already holds, identified by snapshot hashes, is not sent again.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEntryPoint`] if the set has no entry method
    /// - [`Error::ExecutionSetActive`] if another set is active
    /// - [`Error::StaticConstructor`] or [`Error::Remote`] if a static constructor fails
    /// - transfer and encoding errors
    pub fn load(
        &self,
        universe: &Universe,
        set: &ExecutionSet,
        options: &LoadOptions,
    ) -> Result<Arc<RemoteTask>> {
        let Some(main) = set.main_entry() else {
            return Err(Error::InvalidEntryPoint(
                "Main entry point not defined".to_string(),
            ));
        };
        let settings = set.settings();
        let timeout = settings.programming_timeout();
        let empty = SnapShot::empty();

        if settings.force_flash_write {
            self.clear_all_data(true, true)?;
        }

        let kernel = set
            .kernel()
            .filter(|_| settings.create_kernel_for_flashing);
        if let Some(kernel) = kernel {
            if self.is_matching_firmware_loaded(kernel.hash(), timeout)? {
                log::info!("Kernel 0x{:08x} is already on the board", kernel.hash());
            } else {
                log::info!("Writing kernel 0x{:08x} to flash", kernel.hash());
                self.clear_all_data(true, true)?;
                let summary = self.send_content(universe, set, &empty, kernel, true, timeout)?;
                self.send(&encoder::copy_to_flash(), timeout)?;
                self.send_constant_area(set, &empty, kernel, timeout)?;
                self.send(&encoder::copy_to_flash(), timeout)?;
                self.send(
                    &encoder::write_flash_header(&FlashHeader::new(
                        kernel.hash(),
                        0,
                        StartupFlags::empty(),
                    )),
                    timeout,
                )?;
                log::info!(
                    "Kernel written: {} classes, {} methods",
                    summary.classes,
                    summary.methods
                );
            }
        } else if !settings.use_flash_for_kernel && !settings.use_flash_for_program {
            self.clear_all_data(true, true)?;
        }

        let from = kernel.unwrap_or(&empty);
        let to = set.create_snapshot();
        let write_to_flash = settings.do_copy_to_flash(false);

        if self.is_matching_firmware_loaded(to.hash(), timeout)? {
            log::info!("Program 0x{:08x} is already on the board", to.hash());
            self.set_active(to.hash())?;
        } else {
            // Flash is erased only for a flashed program without a kernel below it. Erasing on
            // every flashed program would wipe the kernel that was just matched or written.
            self.clear_all_data(true, from.is_empty() && write_to_flash)?;
            self.set_active(to.hash())?;

            let mut summary = self.send_content(universe, set, from, &to, false, timeout)?;
            if write_to_flash {
                self.send(&encoder::copy_to_flash(), timeout)?;
            }
            let (strings, special_types) = self.send_constant_area(set, from, &to, timeout)?;
            summary.strings = strings;
            summary.special_types = special_types;

            log::info!("Finalizing...");
            if write_to_flash {
                let startup_token = set
                    .startup_method()
                    .and_then(|m| set.method(m))
                    .map_or(0, |d| d.token.value());
                let header = FlashHeader::new(to.hash(), startup_token, settings.startup_flags());
                self.send(&encoder::write_flash_header(&header), timeout)?;
            }
            log::info!(
                "Upload completed: {} classes, {} methods, {} constants, {} strings",
                summary.classes,
                summary.methods,
                summary.constants,
                summary.strings
            );
        }

        let main_task = self.create_task(universe, set, main)?;
        if options.run_static_constructors {
            self.run_static_constructors(universe, set, &options.cancel)?;
            let main_id = main_task.task_id();
            self.tasks.retain(|id, _| *id == main_id);
        }
        Ok(main_task)
    }

    /// Creates a task for `method` of the active set.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveExecutionSet`] before a successful [`Self::load`]
    /// - [`Error::Malformed`] if the method is not part of `set`
    pub fn create_task(
        &self,
        universe: &Universe,
        set: &ExecutionSet,
        method: MethodId,
    ) -> Result<Arc<RemoteTask>> {
        if lock!(self.active).is_none() {
            return Err(Error::NoActiveExecutionSet);
        }
        let declaration = set.method(method).ok_or_else(|| {
            malformed_error!(
                "Method {} is not loaded",
                universe.method_signature(method)
            )
        })?;
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let task = Arc::new(RemoteTask::new(
            task_id,
            method,
            declaration.token,
            universe.method(method).parameters.len(),
        ));
        self.tasks.insert(task_id, Arc::clone(&task));
        Ok(task)
    }

    /// The task with `task_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTask`] if no such task exists.
    pub fn task(&self, task_id: u16) -> Result<Arc<RemoteTask>> {
        self.tasks
            .get(&task_id)
            .map(|t| Arc::clone(t.value()))
            .ok_or(Error::UnknownTask(task_id))
    }

    /// Number of known tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    fn set_active(&self, hash: u32) -> Result<()> {
        let mut active = lock!(self.active);
        if active.is_some() {
            return Err(Error::ExecutionSetActive);
        }
        *active = Some(hash);
        Ok(())
    }

    fn send(&self, packet: &[u8], timeout: Duration) -> Result<()> {
        let reply = self.transport.send_and_wait(packet, timeout)?;
        check_ack(packet, &reply)
    }

    fn send_all(&self, packets: &[Vec<u8>], timeout: Duration) -> Result<()> {
        for packet in packets {
            self.send(packet, timeout)?;
        }
        Ok(())
    }

    /// Sends classes, methods and field initializers in `to` but not in `from`, ordered by
    /// token.
    fn send_content(
        &self,
        universe: &Universe,
        set: &ExecutionSet,
        from: &SnapShot,
        to: &SnapShot,
        for_kernel: bool,
        timeout: Duration,
    ) -> Result<UploadSummary> {
        let flush = set.settings().do_copy_to_flash(for_kernel);
        let phase = |step: &str| {
            if for_kernel {
                log::debug!("Kernel: {step}");
            } else {
                log::info!("{step}");
            }
        };
        let mut summary = UploadSummary::default();

        phase("1/5 Uploading class declarations...");
        let mut classes: Vec<_> = set
            .classes()
            .iter()
            .filter(|c| to.is_new(c.token, from))
            .collect();
        classes.sort_by_key(|c| c.token);
        for (index, class) in classes.iter().enumerate() {
            log::debug!(
                "Sending class {} of {}: {} ({}), {} members, {} bytes",
                index + 1,
                classes.len(),
                class.name,
                class.token,
                class.members().len(),
                class.dynamic_size
            );
            self.send_all(&encoder::class_packets(class)?, timeout)?;
            if flush && (index + 1) % FLASH_BATCH == 0 {
                self.send(&encoder::copy_to_flash(), timeout)?;
            }
        }
        summary.classes = classes.len();

        phase("2/5 Uploading methods...");
        let mut methods: Vec<_> = set
            .methods()
            .iter()
            .filter(|m| to.is_new(m.token, from))
            .collect();
        methods.sort_by_key(|m| m.token);
        for (index, method) in methods.iter().enumerate() {
            log::debug!(
                "Sending method {} of {}: {} ({})",
                index + 1,
                methods.len(),
                universe.method_signature(method.method),
                method.token
            );
            self.send_all(&encoder::method_packets(universe, method)?, timeout)?;
            if flush && (index + 1) % FLASH_BATCH == 0 {
                self.send(&encoder::copy_to_flash(), timeout)?;
            }
        }
        summary.methods = methods.len();

        phase("3/5 Uploading constants...");
        for (token, data) in set.tokens().constants() {
            if !to.is_new(token, from) {
                continue;
            }
            log::debug!("Sending constant {token}, {} bytes", data.len());
            self.send_all(&encoder::constant_packets(token, data), timeout)?;
            summary.constants += 1;
        }

        Ok(summary)
    }

    /// Sends strings and special types in `to` but not in `from`, then the static area size.
    /// Returns the number of strings and special types sent.
    fn send_constant_area(
        &self,
        set: &ExecutionSet,
        from: &SnapShot,
        to: &SnapShot,
        timeout: Duration,
    ) -> Result<(usize, usize)> {
        let mut strings: Vec<_> = set
            .tokens()
            .strings()
            .iter()
            .filter(|s| to.is_new(s.token, from))
            .collect();
        strings.sort_by_key(|s| s.token);
        // one length word per string and an empty terminating entry
        let total = 4 + strings
            .iter()
            .map(|s| 4 + s.encoded.len() as u32)
            .sum::<u32>();
        self.send(&encoder::set_constant_memory_size(total), timeout)?;

        log::info!("4/5 Uploading strings...");
        for string in &strings {
            log::debug!(
                "Sending string {}, {} bytes: {}",
                string.token,
                string.encoded.len(),
                string.text
            );
            self.send_all(&encoder::constant_packets(string.token, &string.encoded), timeout)?;
        }

        log::info!("5/5 Uploading special types...");
        let special: Vec<_> = set
            .tokens()
            .special_types()
            .iter()
            .filter(|s| to.is_new(s.master, from))
            .collect();
        let list: Vec<u32> = special.iter().flat_map(|s| s.flatten()).collect();
        self.send_all(&encoder::special_token_packets(&list), timeout)?;
        self.send(&encoder::global_metadata(set.statics().size()), timeout)?;
        Ok((strings.len(), special.len()))
    }

    fn run_static_constructors(
        &self,
        universe: &Universe,
        set: &ExecutionSet,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let sequence = set.startup_sequence();
        for (index, cctor) in sequence.iter().enumerate() {
            let owner = universe.full_name(universe.method(*cctor).declaring_type);
            let task = self.create_task(universe, set, *cctor)?;
            log::debug!(
                "Task {}: running static constructor of {owner}, step {}/{}",
                task.task_id(),
                index + 1,
                sequence.len()
            );
            task.run(self, &[], cancel)?;
            loop {
                match task.get_method_results(universe, set)? {
                    Some((MethodState::Running, _)) => continue,
                    Some((MethodState::Stopped, _)) => break,
                    _ => return Err(Error::StaticConstructor(owner)),
                }
            }
        }
        Ok(())
    }
}

impl<T: Transport> TaskControl for Session<T> {
    fn start_task(&self, token: RemoteToken, task_id: u16, arguments: &[Value]) -> Result<()> {
        self.send(&encoder::start_task(token, task_id, arguments), self.timeout)
    }

    fn kill_task(&self, token: RemoteToken) -> Result<()> {
        self.send(&encoder::kill_task(token), self.timeout)
    }
}

impl<T: Transport> DebugControl for Session<T> {
    fn debugger_command(
        &self,
        command: DebuggerCommand,
        arguments: Option<[i32; 2]>,
    ) -> Result<()> {
        log::debug!("Debugger: {command}");
        self.send(&encoder::debugger_command(command, arguments), DEBUGGER_TIMEOUT)
    }

    fn debug_data(&self) -> &DebugChannel {
        &self.debug
    }
}

fn dispatch_reply(
    tasks: &DashMap<u16, Arc<RemoteTask>>,
    debug: &DebugChannel,
    data: &[u8],
) -> Result<bool> {
    let (task_id, state, count, payload) = match Reply::parse(data)? {
        Reply::Task {
            task_id,
            state,
            count,
            payload,
        } => (task_id, state, count, payload),
        // halts may come from tasks the host did not start, e.g. a startup method
        Reply::Debug {
            task_id,
            kind,
            payload,
        } => {
            log::debug!("Task {task_id} sent debugger data: {kind}");
            debug.push(DebugData {
                task_id,
                kind,
                payload,
            })?;
            return Ok(true);
        }
        _ => return Ok(false),
    };
    let task = tasks
        .get(&task_id)
        .map(|t| Arc::clone(t.value()))
        .ok_or(Error::UnknownTask(task_id))?;

    let count = usize::from(count);
    let payload = if state == MethodState::Aborted {
        let values = (0..count)
            .map(|i| {
                encoder::decode_int32(&payload, i * 5)
                    .ok_or_else(|| malformed_error!("Fault description of task {task_id} is truncated"))
            })
            .collect::<Result<Vec<u32>>>()?;
        TaskPayload::Fault(values)
    } else if count == 0 {
        TaskPayload::Empty
    } else {
        let bytes = payload
            .get(..count * 2)
            .ok_or_else(|| malformed_error!("Result of task {task_id} is truncated"))?;
        TaskPayload::Bytes(encoder::decode_two_7bit(bytes))
    };
    log::debug!("Task {task_id} reported {state}");
    task.record(state, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::Compiler,
        config::CompilerSettings,
        protocol::{
            command::ExecutorCommand,
            transport::{debug_reply, task_reply, RecordingTransport},
        },
        runtime::{
            debugger::{DebugEvent, Debugger, DebuggerDataKind},
            task::TaskOutput,
        },
        test::shapes,
    };

    fn int32_payload(value: i32) -> Vec<u8> {
        let mut writer = encoder::PacketWriter::new(ExecutorCommand::Reply);
        writer.send_bytes_as_two_7bit(&value.to_le_bytes());
        writer.finish()[2..].to_vec()
    }

    #[test]
    fn upload_then_skip_when_board_matches() {
        let shapes = shapes();
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let set = compiler
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())
            .unwrap()
            .set;
        let transport = Arc::new(RecordingTransport::new());
        let session = Session::new(Arc::clone(&transport));
        let options = LoadOptions {
            run_static_constructors: false,
            ..LoadOptions::default()
        };

        let main = session.load(&shapes.universe, &set, &options).unwrap();
        assert_eq!(main.task_id(), 0);
        let commands = transport.commands();
        assert_eq!(commands[0], ExecutorCommand::EraseFlash);
        assert!(commands.contains(&ExecutorCommand::ClassDeclarationEnd));
        assert!(commands.contains(&ExecutorCommand::DeclareMethod));
        assert_eq!(commands.last(), Some(&ExecutorCommand::GlobalMetadata));
        assert!(!commands.contains(&ExecutorCommand::WriteFlashHeader));

        // a program already on the board is only activated, which needs a cleared session
        let settings = CompilerSettings {
            use_flash_for_program: true,
            ..CompilerSettings::default()
        };
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let flashed = compiler
            .compile(&shapes.universe, shapes.main, &settings)
            .unwrap()
            .set;
        transport.set_flashed_hash(Some(flashed.create_snapshot().hash()));
        assert!(matches!(
            session.load(&shapes.universe, &flashed, &options),
            Err(Error::ExecutionSetActive)
        ));

        session.clear_all_data(true, false).unwrap();
        transport.clear();
        session.load(&shapes.universe, &flashed, &options).unwrap();
        assert_eq!(
            transport.commands(),
            vec![ExecutorCommand::CheckFlashVersion]
        );
    }

    #[test]
    fn task_callbacks_reach_the_task() {
        let shapes = shapes();
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let set = compiler
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())
            .unwrap()
            .set;
        let transport = Arc::new(RecordingTransport::new());
        let session = Session::new(Arc::clone(&transport));
        let options = LoadOptions {
            run_static_constructors: false,
            ..LoadOptions::default()
        };
        let main = session.load(&shapes.universe, &set, &options).unwrap();

        transport.script(
            main.token().value(),
            vec![task_reply(0, MethodState::Stopped, 0, &[])],
        );
        assert!(main
            .run(&session, &[], &CancellationToken::new())
            .unwrap());
        assert_eq!(
            main.get_method_results(&shapes.universe, &set).unwrap(),
            Some((MethodState::Stopped, TaskOutput::Returned(Value::Void)))
        );

        // duplicate terminal callbacks are ignored
        let late = task_reply(0, MethodState::Stopped, 4, &int32_payload(1));
        assert!(!session.handle_reply(&late).unwrap());
        assert!(matches!(
            session.handle_reply(&task_reply(9, MethodState::Running, 0, &[])),
            Err(Error::UnknownTask(9))
        ));
        assert!(!session.handle_reply(&[0x7B, 0x7F, 4, 0]).unwrap());
    }

    #[test]
    fn debugger_halts_leave_the_task_running() -> Result<()> {
        let shapes = shapes();
        let set = Compiler::new(&shapes.universe, &[])?
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())?
            .set;
        let transport = Arc::new(RecordingTransport::new());
        let session = Session::new(Arc::clone(&transport));
        let options = LoadOptions {
            run_static_constructors: false,
            ..LoadOptions::default()
        };
        let main = session.load(&shapes.universe, &set, &options)?;

        let mut stack = encoder::PacketWriter::new(ExecutorCommand::Reply);
        stack.send_int32(main.token().value());
        stack.send_int32(5);
        transport.script(
            main.token().value(),
            vec![debug_reply(0, DebuggerDataKind::ExecutionStack, &stack.finish()[2..])],
        );

        let mut debugger = Debugger::new(&session, &shapes.universe, &set);
        debugger.start(false)?;
        main.invoke(&session, &[])?;
        assert_eq!(main.state()?, MethodState::Running);
        assert!(!main.poll()?);
        match debugger.next_event(Duration::from_secs(1))? {
            Some(DebugEvent::Halted { task_id, frames }) => {
                assert_eq!(task_id, 0);
                assert_eq!(frames[0].pc, 5);
            }
            other => panic!("expected a halt, got {other:?}"),
        }

        debugger.stop()?;
        let commands: Vec<u32> = transport
            .packets()
            .iter()
            .filter(|p| p[1] == ExecutorCommand::DebuggerCommand.value())
            .filter_map(|p| encoder::decode_int32(p, 2))
            .collect();
        assert_eq!(
            commands,
            [
                DebuggerCommand::EnableDebugging,
                DebuggerCommand::DisableDebugging,
                DebuggerCommand::Continue
            ]
            .map(DebuggerCommand::value)
        );

        transport.inject(&task_reply(0, MethodState::Stopped, 0, &[]));
        assert!(main.wait_for_result(&CancellationToken::new())?);
        assert_eq!(main.state()?, MethodState::Stopped);
        Ok(())
    }

    #[test]
    fn tasks_need_an_active_set() {
        let shapes = shapes();
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let set = compiler
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())
            .unwrap()
            .set;
        let session = Session::new(Arc::new(RecordingTransport::new()));
        assert!(matches!(
            session.create_task(&shapes.universe, &set, shapes.main),
            Err(Error::NoActiveExecutionSet)
        ));
    }

    #[test]
    fn rejected_commands_surface_as_nack() {
        let shapes = shapes();
        let mut compiler = Compiler::new(&shapes.universe, &[]).unwrap();
        let set = compiler
            .compile(&shapes.universe, shapes.main, &CompilerSettings::default())
            .unwrap()
            .set;
        let transport = Arc::new(RecordingTransport::new());
        transport.reject(ExecutorCommand::LoadIl, 3);
        let session = Session::new(Arc::clone(&transport));
        match session.load(&shapes.universe, &set, &LoadOptions::default()) {
            Err(Error::Nack { command, error }) => {
                assert_eq!(command, "LoadIl");
                assert_eq!(error, 3);
            }
            other => panic!("unexpected {:?}", other.map(|t| t.task_id())),
        }
    }
}
