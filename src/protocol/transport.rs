//! The transport seam and reply decoding.
//!
//! A [`Transport`] moves complete packets to the device and returns the reply that answers
//! each one. Task callbacks arrive unsolicited on the transport's receiver thread and are
//! forwarded to the registered [`ReplyHandler`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    protocol::{
        command::{ExecutorCommand, SCHEDULER_DATA},
        encoder::{decode_int14, decode_int32},
    },
    runtime::{debugger::DebuggerDataKind, state::MethodState},
    Error, Result,
};

/// Callback for unsolicited packets.
pub type ReplyHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Moves packets to and from the device.
pub trait Transport: Send + Sync {
    /// Sends `packet` and blocks until the device answers it.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no answer arrives within `timeout`
    /// - [`Error::Transport`] if the connection fails
    fn send_and_wait(&self, packet: &[u8], timeout: Duration) -> Result<Vec<u8>>;

    /// Registers the handler for task callbacks, replacing any previous one.
    fn set_reply_handler(&self, handler: ReplyHandler);
}

/// A decoded packet from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The command was accepted
    Ack {
        /// The acknowledged command byte
        command: u8,
    },
    /// The command was rejected
    Nack {
        /// The rejected command byte
        command: u8,
        /// Error code of the engine
        error: u8,
    },
    /// A task state callback
    Task {
        /// Task id
        task_id: u16,
        /// Reported state
        state: MethodState,
        /// Number of payload values
        count: u8,
        /// Payload, still 7-bit encoded
        payload: Vec<u8>,
    },
    /// Debugger data of a halted task; the task state is unchanged
    Debug {
        /// Task id
        task_id: u16,
        /// What the payload describes
        kind: DebuggerDataKind,
        /// Payload, still 7-bit encoded
        payload: Vec<u8>,
    },
}

impl Reply {
    /// Decodes a packet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for packets that are truncated, carry an unknown state or
    /// do not start with the scheduler marker.
    pub fn parse(data: &[u8]) -> Result<Reply> {
        if data.first() != Some(&SCHEDULER_DATA) || data.len() < 4 {
            return Err(malformed_error!("Not a scheduler reply: {:02X?}", data));
        }
        match ExecutorCommand::from_value(data[1]) {
            Some(ExecutorCommand::Ack) => Ok(Reply::Ack { command: data[2] }),
            Some(ExecutorCommand::Nack) => Ok(Reply::Nack {
                command: data[2],
                error: data[3],
            }),
            Some(ExecutorCommand::Reply) => {
                let (Some(task_id), Some(&state), Some(&count)) =
                    (decode_int14(data, 2), data.get(4), data.get(5))
                else {
                    return Err(malformed_error!("Truncated task reply: {:02X?}", data));
                };
                let state = MethodState::from_value(state)
                    .ok_or_else(|| malformed_error!("Unknown task state {state}"))?;
                if state == MethodState::Debugging {
                    let kind = DebuggerDataKind::from_value(count)
                        .ok_or_else(|| malformed_error!("Unknown debugger data {count}"))?;
                    return Ok(Reply::Debug {
                        task_id,
                        kind,
                        payload: data[6..].to_vec(),
                    });
                }
                Ok(Reply::Task {
                    task_id,
                    state,
                    count,
                    payload: data[6..].to_vec(),
                })
            }
            _ => Err(malformed_error!("Unexpected reply command 0x{:02X}", data[1])),
        }
    }
}

/// Checks that `reply` acknowledges `packet`.
///
/// # Errors
///
/// - [`Error::Nack`] naming the rejected command
/// - [`Error::Transport`] if the reply answers a different command
pub fn check_ack(packet: &[u8], reply: &[u8]) -> Result<()> {
    let command = packet.get(1).copied().unwrap_or(0);
    match Reply::parse(reply)? {
        Reply::Ack { command: acked } if acked == command => Ok(()),
        Reply::Nack { error, .. } => Err(Error::Nack {
            command: command_name(command),
            error,
        }),
        other => Err(Error::Transport(format!(
            "Expected acknowledgement of {}, got {other:?}",
            command_name(command)
        ))),
    }
}

pub(crate) fn command_name(command: u8) -> String {
    ExecutorCommand::from_value(command)
        .map_or_else(|| format!("0x{command:02X}"), |c| c.to_string())
}

/// Description of the board returned by `QueryHardware`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HardwareInfo {
    /// Protocol version of the firmware
    pub protocol_version: u16,
    /// Size of `int` in bytes
    pub int_size: u8,
    /// Size of a pointer in bytes
    pub pointer_size: u8,
    /// Total flash available for programs
    pub flash_size: u32,
    /// Flash currently used
    pub flash_used: u32,
    /// Total RAM
    pub ram_size: u32,
    /// Largest packet the firmware accepts
    pub max_message_size: u32,
}

impl HardwareInfo {
    /// Decodes the reply to `QueryHardware`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for short or foreign packets.
    pub fn parse(data: &[u8]) -> Result<HardwareInfo> {
        if data.len() < 28
            || data[0] != SCHEDULER_DATA
            || data[1] != ExecutorCommand::Reply.value()
            || data[2] != ExecutorCommand::QueryHardware.value()
        {
            return Err(malformed_error!("Not a hardware description: {:02X?}", data));
        }
        let int32 = |offset| decode_int32(data, offset).unwrap_or(0);
        Ok(HardwareInfo {
            protocol_version: decode_int14(data, 4).unwrap_or(0),
            int_size: data[6],
            pointer_size: data[7],
            flash_size: int32(8),
            flash_used: int32(13),
            ram_size: int32(18),
            max_message_size: int32(23),
        })
    }

    /// Encodes the description the way the firmware sends it.
    #[must_use]
    pub fn to_packet(&self) -> Vec<u8> {
        let mut data = vec![
            SCHEDULER_DATA,
            ExecutorCommand::Reply.value(),
            ExecutorCommand::QueryHardware.value(),
            0,
            (self.protocol_version & 0x7F) as u8,
            ((self.protocol_version >> 7) & 0x7F) as u8,
            self.int_size,
            self.pointer_size,
        ];
        for value in [
            self.flash_size,
            self.flash_used,
            self.ram_size,
            self.max_message_size,
        ] {
            for shift in [0, 7, 14, 21, 28] {
                data.push(((value >> shift) & 0x7F) as u8);
            }
        }
        data
    }
}

impl Default for HardwareInfo {
    fn default() -> Self {
        HardwareInfo {
            protocol_version: 1,
            int_size: 4,
            pointer_size: 4,
            flash_size: 0x0010_0000,
            flash_used: 0,
            ram_size: 0x0005_0000,
            max_message_size: 64,
        }
    }
}

/// Builds a debugger callback packet the way the firmware sends it. `payload` is already
/// 7-bit encoded.
#[must_use]
pub fn debug_reply(task_id: u16, kind: DebuggerDataKind, payload: &[u8]) -> Vec<u8> {
    task_reply(task_id, MethodState::Debugging, kind.value(), payload)
}

/// Builds a task callback packet the way the firmware sends it. `payload` is already
/// 7-bit encoded.
#[must_use]
pub fn task_reply(task_id: u16, state: MethodState, count: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![
        SCHEDULER_DATA,
        ExecutorCommand::Reply.value(),
        (task_id & 0x7F) as u8,
        ((task_id >> 7) & 0x7F) as u8,
        state as u8,
        count,
    ];
    data.extend_from_slice(payload);
    data
}

#[derive(Default)]
struct RecorderState {
    packets: Vec<Vec<u8>>,
    flashed_hash: Option<u32>,
    reject: Option<(u8, u8)>,
    scripts: HashMap<u32, Vec<Vec<u8>>>,
}

/// An in-memory device: records every packet, acknowledges it and plays back scripted task
/// callbacks.
///
/// Scripts are keyed by method token. When a `StartTask` for the token arrives, each scripted
/// packet is delivered to the reply handler with the task id of the request patched in.
/// Methods without a script return immediately with no value.
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<RecorderState>,
    handler: Mutex<Option<ReplyHandler>>,
    hardware: HardwareInfo,
}

impl RecordingTransport {
    /// A device with empty flash.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretends the flash holds content with `hash`.
    pub fn set_flashed_hash(&self, hash: Option<u32>) {
        if let Ok(mut state) = self.state.lock() {
            state.flashed_hash = hash;
        }
    }

    /// Answers every `command` with a Nack carrying `error`.
    pub fn reject(&self, command: ExecutorCommand, error: u8) {
        if let Ok(mut state) = self.state.lock() {
            state.reject = Some((command.value(), error));
        }
    }

    /// Plays back `replies` whenever the method `token` is started. Use [`task_reply`] to
    /// build them; the task id is replaced with the one of the request.
    pub fn script(&self, token: u32, replies: Vec<Vec<u8>>) {
        if let Ok(mut state) = self.state.lock() {
            state.scripts.insert(token, replies);
        }
    }

    /// Every packet sent so far.
    #[must_use]
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|s| s.packets.clone())
            .unwrap_or_default()
    }

    /// The command bytes sent so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<ExecutorCommand> {
        self.packets()
            .iter()
            .filter_map(|p| p.get(1).copied().and_then(ExecutorCommand::from_value))
            .collect()
    }

    /// Forgets the recorded packets.
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.packets.clear();
        }
    }

    /// Delivers `packet` to the reply handler as if the device had sent it.
    pub fn inject(&self, packet: &[u8]) {
        let handler = self.handler.lock().ok().and_then(|h| h.clone());
        if let Some(handler) = handler {
            handler(packet);
        }
    }
}

impl Transport for RecordingTransport {
    fn send_and_wait(&self, packet: &[u8], _timeout: Duration) -> Result<Vec<u8>> {
        let command = packet
            .get(1)
            .copied()
            .ok_or_else(|| Error::Transport("Empty packet".to_string()))?;

        let (reply, callbacks) = {
            let mut state = lock!(self.state);
            state.packets.push(packet.to_vec());

            let reply = match (ExecutorCommand::from_value(command), state.reject) {
                (_, Some((rejected, error))) if rejected == command => {
                    vec![SCHEDULER_DATA, ExecutorCommand::Nack.value(), command, error]
                }
                (Some(ExecutorCommand::QueryHardware), _) => self.hardware.to_packet(),
                (Some(ExecutorCommand::CheckFlashVersion), _) => {
                    let hash = decode_int32(packet, 7);
                    let matches = hash.is_some() && hash == state.flashed_hash;
                    let code = if matches {
                        ExecutorCommand::Ack
                    } else {
                        ExecutorCommand::Nack
                    };
                    vec![SCHEDULER_DATA, code.value(), command, 0]
                }
                (Some(ExecutorCommand::EraseFlash), _) => {
                    state.flashed_hash = None;
                    vec![SCHEDULER_DATA, ExecutorCommand::Ack.value(), command, 0]
                }
                (Some(ExecutorCommand::WriteFlashHeader), _) => {
                    state.flashed_hash = decode_int32(packet, 7);
                    vec![SCHEDULER_DATA, ExecutorCommand::Ack.value(), command, 0]
                }
                _ => vec![SCHEDULER_DATA, ExecutorCommand::Ack.value(), command, 0],
            };

            let mut callbacks = Vec::new();
            if command == ExecutorCommand::StartTask.value() {
                if let (Some(token), Some(task_id)) =
                    (decode_int32(packet, 2), decode_int14(packet, 7))
                {
                    match state.scripts.get(&token) {
                        Some(script) => {
                            for reply in script {
                                let mut callback = reply.clone();
                                if callback.len() > 3 {
                                    callback[2] = (task_id & 0x7F) as u8;
                                    callback[3] = ((task_id >> 7) & 0x7F) as u8;
                                }
                                callbacks.push(callback);
                            }
                        }
                        None => callbacks.push(task_reply(task_id, MethodState::Stopped, 0, &[])),
                    }
                }
            }
            (reply, callbacks)
        };

        for callback in callbacks {
            self.inject(&callback);
        }
        Ok(reply)
    }

    fn set_reply_handler(&self, handler: ReplyHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }
    }
}
