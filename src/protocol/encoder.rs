//! Packet encoding.
//!
//! Every packet starts with [`SCHEDULER_DATA`] and the command byte; everything after that is
//! 7-bit clean. Integers are split into 7-bit groups, least significant first: five groups for
//! 32-bit values, two for 14-bit values. Blocks of raw data (IL, field initializers) are
//! bit-packed so that seven source bytes occupy eight wire bytes.
//!
//! The builders in this module return complete packets; [`crate::protocol::Session`] sends
//! them one at a time and waits for the acknowledgement of each.

use crate::{
    execution::{ClassDeclaration, ClassMember, MethodDeclaration},
    layout::{variable_type, VariableKind, POINTER_SIZE},
    metadata::universe::Universe,
    protocol::{
        command::{ExecutorCommand, SCHEDULER_DATA},
        flash::FlashHeader,
    },
    runtime::{debugger::DebuggerCommand, value::Value},
    tokens::RemoteToken,
    Result,
};

/// Raw IL bytes per `LoadIl` packet.
pub const IL_CHUNK: usize = 32;
/// Local or argument slots per `MethodSignature` packet.
pub const SIGNATURE_CHUNK: usize = 16;
/// Interface tokens per `Interfaces` packet.
pub const INTERFACE_CHUNK: usize = 8;
/// Raw initializer bytes per `ConstantData` packet.
pub const CONSTANT_CHUNK: usize = 28;
/// Values per `SpecialTokenList` packet.
pub const SPECIAL_CHUNK: usize = 5;

const MAX_INT14: u32 = 0x3FFF;

/// Builds one packet.
///
/// ```rust
/// use ilforge::protocol::{ExecutorCommand, PacketWriter};
///
/// let mut writer = PacketWriter::new(ExecutorCommand::KillTask);
/// writer.send_int32(0x81);
/// assert_eq!(writer.finish(), vec![0x7B, 6, 0x01, 0x01, 0, 0, 0]);
/// ```
#[derive(Debug, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    /// Starts a packet for `command`.
    #[must_use]
    pub fn new(command: ExecutorCommand) -> Self {
        PacketWriter {
            data: vec![SCHEDULER_DATA, command.value()],
        }
    }

    /// Appends a 7-bit value; the top bit is dropped.
    pub fn send_byte(&mut self, value: u8) {
        self.data.push(value & 0x7F);
    }

    /// Appends a 14-bit value as two 7-bit groups.
    pub fn send_int14(&mut self, value: u32) {
        self.data.push((value & 0x7F) as u8);
        self.data.push(((value >> 7) & 0x7F) as u8);
    }

    /// Appends a 32-bit value as five 7-bit groups.
    pub fn send_int32(&mut self, value: u32) {
        for shift in [0, 7, 14, 21, 28] {
            self.data.push(((value >> shift) & 0x7F) as u8);
        }
    }

    /// Appends every byte as two 7-bit halves.
    pub fn send_bytes_as_two_7bit(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.data.push(b & 0x7F);
            self.data.push((b >> 7) & 0x7F);
        }
    }

    /// Appends a bit-packed block, see [`encode_7bit`].
    pub fn send_packed(&mut self, bytes: &[u8]) {
        self.data.extend(encode_7bit(bytes));
    }

    /// Returns the finished packet.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        self.data
    }
}

/// Packs bytes into 7-bit groups: `n` bytes become `(8 * n + 6) / 7` wire bytes.
///
/// ```rust
/// use ilforge::protocol::encoder::{decode_7bit, encode_7bit};
///
/// let data: Vec<u8> = (0..28).map(|i| 0xF0 ^ i).collect();
/// let packed = encode_7bit(&data);
/// assert_eq!(packed.len(), 32);
/// assert!(packed.iter().all(|b| *b < 0x80));
/// assert_eq!(decode_7bit(&packed), data);
/// ```
#[must_use]
pub fn encode_7bit(bytes: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity((bytes.len() * 8 + 6) / 7);
    let mut shift = 0u32;
    let mut previous = 0u8;
    for &b in bytes {
        if shift == 0 {
            result.push(b & 0x7F);
            shift = 1;
            previous = b >> 7;
        } else {
            result.push(((b << shift) & 0x7F) | previous);
            if shift == 6 {
                result.push(b >> 1);
                shift = 0;
            } else {
                shift += 1;
                previous = b >> (8 - shift);
            }
        }
    }
    if shift > 0 {
        result.push(previous);
    }
    result
}

/// Reverses [`encode_7bit`]. Trailing bits that do not fill a byte are dropped.
#[must_use]
pub fn decode_7bit(packed: &[u8]) -> Vec<u8> {
    let count = packed.len() * 7 / 8;
    (0..count)
        .map(|i| {
            let bit = i * 8;
            let (pos, shift) = (bit / 7, bit % 7);
            let low = packed[pos] >> shift;
            let high = packed
                .get(pos + 1)
                .map_or(0, |next| ((u16::from(*next) << (7 - shift)) & 0xFF) as u8);
            low | high
        })
        .collect()
}

/// Reads a 32-bit value sent as five 7-bit groups.
#[must_use]
pub fn decode_int32(data: &[u8], offset: usize) -> Option<u32> {
    let groups = data.get(offset..offset + 5)?;
    Some(
        groups
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, g)| acc | (u32::from(g & 0x7F) << (7 * i))),
    )
}

/// Reads a 14-bit value sent as two 7-bit groups.
#[must_use]
pub fn decode_int14(data: &[u8], offset: usize) -> Option<u16> {
    let groups = data.get(offset..offset + 2)?;
    Some(u16::from(groups[0] & 0x7F) | u16::from(groups[1] & 0x7F) << 7)
}

/// Reads bytes sent as two 7-bit halves each.
#[must_use]
pub fn decode_two_7bit(data: &[u8]) -> Vec<u8> {
    data.chunks_exact(2)
        .map(|pair| (pair[0] & 0x7F) | (pair[1] << 7))
        .collect()
}

fn simple(command: ExecutorCommand, values: &[u32]) -> Vec<u8> {
    let mut writer = PacketWriter::new(command);
    for value in values {
        writer.send_int32(*value);
    }
    writer.finish()
}

fn int14(value: u32, what: &str) -> Result<u32> {
    if value > MAX_INT14 {
        return Err(malformed_error!("{what} {value} does not fit into 14 bits"));
    }
    Ok(value)
}

/// All packets declaring a method: the declaration, its local and argument slots, its IL and
/// its exception clauses. Native methods send no body.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for slot sizes or code lengths beyond 14 bits.
pub fn method_packets(universe: &Universe, method: &MethodDeclaration) -> Result<Vec<Vec<u8>>> {
    let token = method.token.value();
    let mut packets = Vec::new();

    let mut writer = PacketWriter::new(ExecutorCommand::DeclareMethod);
    writer.send_int32(token);
    writer.send_int14(u32::from(method.flags.bits()));
    writer.send_byte(method.max_stack);
    writer.send_byte(method.argument_count);
    writer.send_int32(method.native_id.unwrap_or(0));
    packets.push(writer.finish());

    let def = universe.method(method.method);
    let mut locals = Vec::new();
    if let Some(code) = &method.code {
        for local in &code.locals {
            let min_size = if universe.type_def(*local).primitive.is_some() {
                1
            } else {
                POINTER_SIZE
            };
            locals.push(variable_type(universe, *local, min_size)?);
        }
    }
    let mut arguments = Vec::new();
    if !def.is_static() {
        arguments.push((VariableKind::Object, POINTER_SIZE));
    }
    for parameter in &def.parameters {
        arguments.push(variable_type(universe, parameter.param_type, POINTER_SIZE)?);
    }

    for (is_locals, slots) in [(true, &locals), (false, &arguments)] {
        for chunk in slots.chunks(SIGNATURE_CHUNK) {
            let mut writer = PacketWriter::new(ExecutorCommand::MethodSignature);
            writer.send_int32(token);
            writer.send_byte(u8::from(is_locals));
            writer.send_byte(chunk.len() as u8);
            for (kind, size) in chunk {
                writer.send_byte(kind.value());
                writer.send_int14(int14(*size, "Slot size")?);
            }
            packets.push(writer.finish());
        }
    }

    let Some(code) = method.code.as_ref().filter(|_| method.native_id.is_none()) else {
        return Ok(packets);
    };

    let total = int14(code.bytes.len() as u32, "Code length")?;
    for (index, chunk) in code.bytes.chunks(IL_CHUNK).enumerate() {
        let mut writer = PacketWriter::new(ExecutorCommand::LoadIl);
        writer.send_int32(token);
        writer.send_int14(total);
        writer.send_int14((index * IL_CHUNK) as u32);
        writer.send_packed(chunk);
        packets.push(writer.finish());
    }

    for clause in &code.exception_clauses {
        packets.push(simple(
            ExecutorCommand::ExceptionClauses,
            &[
                token,
                clause.kind(),
                u32::from(clause.try_offset),
                u32::from(clause.try_length),
                u32::from(clause.handler_offset),
                u32::from(clause.handler_length),
                clause.catch_type.value(),
            ],
        ));
    }

    Ok(packets)
}

/// All packets declaring a class: one packet per member, the last one as
/// `ClassDeclarationEnd`, followed by the interface list.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for sizes that do not fit into 14 bits.
pub fn class_packets(class: &ClassDeclaration) -> Result<Vec<Vec<u8>>> {
    let token = class.token.value();
    let dynamic_size = if class.is_value_type {
        class.dynamic_size
    } else {
        class.dynamic_size >> 2
    };
    let dynamic_size = int14(dynamic_size, "Instance size")?;
    let static_size = int14(class.static_size >> 2, "Static size")?;
    let flags = u32::from(class.flags());

    let header = |command: ExecutorCommand, index: usize| {
        let mut writer = PacketWriter::new(command);
        writer.send_int32(token);
        writer.send_int32(class.parent.value());
        writer.send_int14(dynamic_size);
        writer.send_int14(static_size);
        writer.send_int14(flags);
        writer.send_int14(index as u32);
        writer
    };

    let mut packets = Vec::new();
    let members = class.members();
    if members.is_empty() {
        packets.push(header(ExecutorCommand::ClassDeclarationEnd, 0).finish());
    }
    for (index, member) in members.iter().enumerate() {
        let command = if index + 1 == members.len() {
            ExecutorCommand::ClassDeclarationEnd
        } else {
            ExecutorCommand::ClassDeclaration
        };
        let mut writer = header(command, index);
        // the kind byte carries the static bit, so it is written unmasked
        writer.data.push(member.kind_value());
        writer.send_int32(member.token().value());
        match member {
            ClassMember::Field { size, .. } => writer.send_int14(int14(*size, "Field size")?),
            ClassMember::Method { overrides, .. } => {
                for base in overrides {
                    writer.send_int32(base.value());
                }
            }
        }
        packets.push(writer.finish());
    }

    for chunk in class.interfaces.chunks(INTERFACE_CHUNK) {
        let mut writer = PacketWriter::new(ExecutorCommand::Interfaces);
        writer.send_int32(token);
        for interface in chunk {
            writer.send_int32(interface.value());
        }
        packets.push(writer.finish());
    }

    Ok(packets)
}

/// Packets uploading a field initializer in chunks of [`CONSTANT_CHUNK`] bytes.
#[must_use]
pub fn constant_packets(token: RemoteToken, data: &[u8]) -> Vec<Vec<u8>> {
    data.chunks(CONSTANT_CHUNK)
        .enumerate()
        .map(|(index, chunk)| {
            let mut writer = PacketWriter::new(ExecutorCommand::ConstantData);
            writer.send_int32(token.value());
            writer.send_int32(data.len() as u32);
            writer.send_int32((index * CONSTANT_CHUNK) as u32);
            writer.send_packed(chunk);
            writer.finish()
        })
        .collect()
}

/// Packets uploading the flattened special type list.
#[must_use]
pub fn special_token_packets(values: &[u32]) -> Vec<Vec<u8>> {
    values
        .chunks(SPECIAL_CHUNK)
        .enumerate()
        .map(|(index, chunk)| {
            let mut writer = PacketWriter::new(ExecutorCommand::SpecialTokenList);
            writer.send_int32(values.len() as u32);
            writer.send_int32((index * SPECIAL_CHUNK) as u32);
            for value in chunk {
                writer.send_int32(*value);
            }
            writer.finish()
        })
        .collect()
}

/// Reserves the string constant area.
#[must_use]
pub fn set_constant_memory_size(string_bytes: u32) -> Vec<u8> {
    simple(ExecutorCommand::SetConstantMemorySize, &[0, string_bytes])
}

/// Sends the size of the static-root vector.
#[must_use]
pub fn global_metadata(static_size: u32) -> Vec<u8> {
    simple(ExecutorCommand::GlobalMetadata, &[4, static_size])
}

/// Erases the flash.
#[must_use]
pub fn erase_flash() -> Vec<u8> {
    let mut writer = PacketWriter::new(ExecutorCommand::EraseFlash);
    writer.send_byte(1);
    writer.finish()
}

/// Stops all tasks and clears RAM.
#[must_use]
pub fn reset_executor(force: bool) -> Vec<u8> {
    let mut writer = PacketWriter::new(ExecutorCommand::ResetExecutor);
    writer.send_byte(u8::from(force));
    writer.finish()
}

/// Kills the task running `token`.
#[must_use]
pub fn kill_task(token: RemoteToken) -> Vec<u8> {
    simple(ExecutorCommand::KillTask, &[token.value()])
}

/// Sends a command to the on-board debugger. Commands with arguments always carry two.
#[must_use]
pub fn debugger_command(command: DebuggerCommand, arguments: Option<[i32; 2]>) -> Vec<u8> {
    let mut writer = PacketWriter::new(ExecutorCommand::DebuggerCommand);
    writer.send_int32(command.value());
    if let Some([first, second]) = arguments {
        writer.send_int32(first as u32);
        writer.send_int32(second as u32);
    }
    writer.finish()
}

/// Copies RAM content to flash.
#[must_use]
pub fn copy_to_flash() -> Vec<u8> {
    let mut writer = PacketWriter::new(ExecutorCommand::CopyToFlash);
    writer.send_byte(0);
    writer.finish()
}

/// Writes the flash header.
#[must_use]
pub fn write_flash_header(header: &FlashHeader) -> Vec<u8> {
    simple(
        ExecutorCommand::WriteFlashHeader,
        &[
            header.data_version,
            header.hash,
            header.startup_token,
            header.flags.bits(),
        ],
    )
}

/// Asks whether the board holds data of `data_version` with `hash`.
#[must_use]
pub fn check_flash_version(data_version: u32, hash: u32) -> Vec<u8> {
    simple(ExecutorCommand::CheckFlashVersion, &[data_version, hash])
}

/// Starts `token` as task `task_id`.
#[must_use]
pub fn start_task(token: RemoteToken, task_id: u16, arguments: &[Value]) -> Vec<u8> {
    let mut writer = PacketWriter::new(ExecutorCommand::StartTask);
    writer.send_int32(token.value());
    writer.send_int14(u32::from(task_id));
    for argument in arguments {
        writer.send_bytes_as_two_7bit(&argument.to_bytes());
    }
    writer.finish()
}

/// Asks for the hardware description.
#[must_use]
pub fn query_hardware() -> Vec<u8> {
    simple(ExecutorCommand::QueryHardware, &[0])
}
