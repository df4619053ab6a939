//! Remote tasks.
//!
//! A [`RemoteTask`] stands for one method the host can start on the device. Replies for the
//! task arrive on the transport's receiver thread and are queued under the task's lock; the
//! caller blocks in [`RemoteTask::wait_for_result`] or polls.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use crate::{
    execution::ExecutionSet,
    metadata::{universe::Universe, MethodId},
    runtime::{error::RemoteError, state::MethodState, value::Value},
    tokens::RemoteToken,
    Error, Result,
};

/// How often a blocked waiter re-checks its cancellation token.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Releases a waiter without stopping the remote method.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every wait observing this token or one of its clones.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`Self::cancel`] was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Starts and stops methods on the device. Implemented by the upload session.
pub trait TaskControl {
    /// Starts the method `token` as task `task_id` with encoded arguments.
    ///
    /// # Errors
    ///
    /// Transfer errors of the underlying transport.
    fn start_task(&self, token: RemoteToken, task_id: u16, arguments: &[Value]) -> Result<()>;

    /// Terminates the task running `token`.
    ///
    /// # Errors
    ///
    /// Transfer errors of the underlying transport.
    fn kill_task(&self, token: RemoteToken) -> Result<()>;
}

/// Raw data of one task reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    /// Bytes sent by a running or returning method
    Bytes(Vec<u8>),
    /// Exception code, faulting token and stack trace of an aborted method
    Fault(Vec<u32>),
    /// No data
    Empty,
}

/// A decoded task reply.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Intermediate data sent while the method runs
    Data(Vec<u8>),
    /// The method returned
    Returned(Value),
    /// The method was killed
    Killed,
}

#[derive(Debug)]
struct TaskInner {
    state: MethodState,
    terminated: bool,
    results: VecDeque<(MethodState, TaskPayload)>,
}

/// A method that can run as a task on the device.
#[derive(Debug)]
pub struct RemoteTask {
    task_id: u16,
    method: MethodId,
    token: RemoteToken,
    parameter_count: usize,
    inner: Mutex<TaskInner>,
    changed: Condvar,
}

impl RemoteTask {
    /// Creates an idle task for `method`.
    #[must_use]
    pub fn new(task_id: u16, method: MethodId, token: RemoteToken, parameter_count: usize) -> Self {
        RemoteTask {
            task_id,
            method,
            token,
            parameter_count,
            inner: Mutex::new(TaskInner {
                state: MethodState::Stopped,
                terminated: false,
                results: VecDeque::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// The task id used on the wire.
    #[must_use]
    pub fn task_id(&self) -> u16 {
        self.task_id
    }

    /// The method the task runs.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Remote token of the method.
    #[must_use]
    pub fn token(&self) -> RemoteToken {
        self.token
    }

    /// The last reported state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the task lock is poisoned.
    pub fn state(&self) -> Result<MethodState> {
        Ok(lock!(self.inner).state)
    }

    /// Starts the method.
    ///
    /// # Errors
    ///
    /// - [`Error::TaskRunning`] if the previous invocation has not ended
    /// - [`Error::ArgumentCount`] if `arguments` does not match the parameter list
    /// - transfer errors of `control`
    pub fn invoke(&self, control: &dyn TaskControl, arguments: &[Value]) -> Result<()> {
        if arguments.len() != self.parameter_count {
            return Err(Error::ArgumentCount {
                expected: self.parameter_count,
                actual: arguments.len(),
            });
        }
        {
            let mut inner = lock!(self.inner);
            if inner.state == MethodState::Running {
                return Err(Error::TaskRunning(self.task_id));
            }
            inner.state = MethodState::Running;
            inner.terminated = false;
        }
        log::debug!("Starting task {} on {}", self.task_id, self.token);
        if let Err(error) = control.start_task(self.token, self.task_id, arguments) {
            lock!(self.inner).state = MethodState::Stopped;
            return Err(error);
        }
        Ok(())
    }

    /// Starts the method and blocks until it ends.
    ///
    /// # Errors
    ///
    /// See [`Self::invoke`] and [`Self::wait_for_result`].
    pub fn run(
        &self,
        control: &dyn TaskControl,
        arguments: &[Value],
        cancel: &CancellationToken,
    ) -> Result<bool> {
        self.invoke(control, arguments)?;
        self.wait_for_result(cancel)
    }

    /// Asks the device to kill the task.
    ///
    /// # Errors
    ///
    /// Transfer errors of `control`.
    pub fn terminate(&self, control: &dyn TaskControl) -> Result<()> {
        control.kill_task(self.token)
    }

    /// Queues a reply. Returns false if the reply arrived after the task had already ended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the task lock is poisoned.
    pub fn record(&self, state: MethodState, payload: TaskPayload) -> Result<bool> {
        let mut inner = lock!(self.inner);
        if inner.terminated {
            log::debug!(
                "Task {} reported {state} after it had already ended",
                self.task_id
            );
            return Ok(false);
        }
        inner.state = state;
        inner.terminated = state.is_terminal();
        inner.results.push_back((state, payload));
        drop(inner);
        self.changed.notify_all();
        Ok(true)
    }

    /// Returns true if a reply is queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the task lock is poisoned.
    pub fn poll(&self) -> Result<bool> {
        Ok(!lock!(self.inner).results.is_empty())
    }

    /// Blocks until the task is no longer running. Returns true if a result is available.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires first
    /// - [`Error::LockError`] if the task lock is poisoned
    pub fn wait_for_result(&self, cancel: &CancellationToken) -> Result<bool> {
        let mut inner = lock!(self.inner);
        while inner.state == MethodState::Running {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let (guard, _) = wait_while!(self.changed, inner, CANCEL_POLL_INTERVAL, |i| {
                i.state == MethodState::Running
            });
            inner = guard;
        }
        Ok(!inner.results.is_empty())
    }

    /// Takes the next queued reply and decodes it against `set`.
    ///
    /// Returns `None` if nothing is queued.
    ///
    /// # Errors
    ///
    /// - [`Error::Remote`] for an aborted task, with message and stack trace
    /// - [`Error::Malformed`] if a return value does not match the declared return type
    pub fn get_method_results(
        &self,
        universe: &Universe,
        set: &ExecutionSet,
    ) -> Result<Option<(MethodState, TaskOutput)>> {
        let Some((state, payload)) = lock!(self.inner).results.pop_front() else {
            return Ok(None);
        };
        let output = match (state, payload) {
            (MethodState::Aborted, TaskPayload::Fault(values)) => {
                return Err(Error::Remote(RemoteError::decode(universe, set, &values)));
            }
            (MethodState::Killed, _) => TaskOutput::Killed,
            (MethodState::Stopped, TaskPayload::Bytes(data)) => {
                TaskOutput::Returned(Value::decode_return(
                    universe,
                    self.method,
                    &data,
                )?)
            }
            (MethodState::Stopped, _) => TaskOutput::Returned(Value::Void),
            (_, TaskPayload::Bytes(data)) => TaskOutput::Data(data),
            (_, _) => TaskOutput::Data(Vec::new()),
        };
        Ok(Some((state, output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        started: Mutex<Vec<(RemoteToken, u16, usize)>>,
    }

    impl TaskControl for Recorder {
        fn start_task(&self, token: RemoteToken, task_id: u16, arguments: &[Value]) -> Result<()> {
            self.started
                .lock()
                .unwrap()
                .push((token, task_id, arguments.len()));
            Ok(())
        }

        fn kill_task(&self, _token: RemoteToken) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn replies_release_the_waiter() {
        let task = Arc::new(RemoteTask::new(3, MethodId(0), RemoteToken(50), 1));
        let control = Recorder::default();
        task.invoke(&control, &[Value::Int32(4)]).unwrap();
        assert_eq!(
            control.started.lock().unwrap().as_slice(),
            &[(RemoteToken(50), 3, 1)]
        );
        assert!(matches!(
            task.invoke(&control, &[Value::Int32(4)]),
            Err(Error::TaskRunning(3))
        ));

        let replier = Arc::clone(&task);
        let handle = thread::spawn(move || {
            replier
                .record(MethodState::Killed, TaskPayload::Empty)
                .unwrap()
        });
        assert!(task.wait_for_result(&CancellationToken::new()).unwrap());
        assert!(handle.join().unwrap());
        assert_eq!(task.state().unwrap(), MethodState::Killed);

        // a late duplicate is dropped
        assert!(!task
            .record(MethodState::Stopped, TaskPayload::Bytes(vec![0; 4]))
            .unwrap());
    }

    #[test]
    fn cancellation_releases_without_reply() {
        let task = RemoteTask::new(1, MethodId(0), RemoteToken(50), 0);
        task.invoke(&Recorder::default(), &[]).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(task.wait_for_result(&cancel), Err(Error::Cancelled)));
        assert_eq!(task.state().unwrap(), MethodState::Running);
    }

    #[test]
    fn argument_count_is_checked() {
        let task = RemoteTask::new(1, MethodId(0), RemoteToken(50), 2);
        let result = task.invoke(&Recorder::default(), &[Value::Null]);
        assert!(matches!(
            result,
            Err(Error::ArgumentCount {
                expected: 2,
                actual: 1
            })
        ));
        assert!(!task.poll().unwrap());
    }
}
