//! ECMA-335 opcode table.
//!
//! Opcodes are handled as `u16` values: single byte opcodes keep their byte value, opcodes
//! behind the [`FE_PREFIX`] byte are stored as `0xFE00 | second_byte`. The byte constants
//! follow the mnemonic naming (e.g. [`CALL`] = `0x28`); the second byte of a prefixed opcode
//! carries an `FE_` prefix (e.g. [`FE_LDFTN`] = `0x06`).
//!
//! Only the opcodes the patcher and the code synthesizer refer to by name have constants;
//! [`lookup`] knows the full instruction set.

use std::fmt;

use serde::Serialize;

use crate::Result;

#[allow(missing_docs)]
mod bytes {
    // ── Single-byte opcodes ────────────────────────────────────────────────
    pub const LDARG_0: u8 = 0x02;
    pub const LDARG_1: u8 = 0x03;
    pub const LDARG_2: u8 = 0x04;
    pub const LDARG_S: u8 = 0x0E;
    pub const LDNULL: u8 = 0x14;
    pub const LDC_I4_0: u8 = 0x16;
    pub const LDC_I4: u8 = 0x20;
    pub const LDC_I8: u8 = 0x21;
    pub const DUP: u8 = 0x25;
    pub const POP: u8 = 0x26;
    pub const JMP: u8 = 0x27;
    pub const CALL: u8 = 0x28;
    pub const CALLI: u8 = 0x29;
    pub const RET: u8 = 0x2A;
    pub const SWITCH: u8 = 0x45;
    pub const CALLVIRT: u8 = 0x6F;
    pub const CPOBJ: u8 = 0x70;
    pub const LDOBJ: u8 = 0x71;
    pub const LDSTR: u8 = 0x72;
    pub const NEWOBJ: u8 = 0x73;
    pub const CASTCLASS: u8 = 0x74;
    pub const ISINST: u8 = 0x75;
    pub const UNBOX: u8 = 0x79;
    pub const LDFLD: u8 = 0x7B;
    pub const LDFLDA: u8 = 0x7C;
    pub const STFLD: u8 = 0x7D;
    pub const LDSFLD: u8 = 0x7E;
    pub const LDSFLDA: u8 = 0x7F;
    pub const STSFLD: u8 = 0x80;
    pub const STOBJ: u8 = 0x81;
    pub const BOX: u8 = 0x8C;
    pub const NEWARR: u8 = 0x8D;
    pub const LDELEMA: u8 = 0x8F;
    pub const LDELEM: u8 = 0xA3;
    pub const STELEM: u8 = 0xA4;
    pub const UNBOX_ANY: u8 = 0xA5;
    pub const REFANYVAL: u8 = 0xC2;
    pub const MKREFANY: u8 = 0xC6;
    pub const LDTOKEN: u8 = 0xD0;

    // ── Two-byte opcodes (0xFE prefix) ─────────────────────────────────────
    pub const FE_PREFIX: u8 = 0xFE;
    pub const FE_LDFTN: u8 = 0x06;
    pub const FE_LDVIRTFTN: u8 = 0x07;
    pub const FE_INITOBJ: u8 = 0x15;
    pub const FE_CONSTRAINED: u8 = 0x16;
    pub const FE_SIZEOF: u8 = 0x1C;
}

pub use bytes::*;

/// Builds the `u16` opcode value of a prefixed instruction.
#[must_use]
pub const fn prefixed(second: u8) -> u16 {
    ((FE_PREFIX as u16) << 8) | second as u16
}

/// Operand encoding of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperandShape {
    /// No operand
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate (short argument and local indices)
    UInt8,
    /// Signed 16-bit immediate
    Int16,
    /// Unsigned 16-bit immediate (long argument and local indices)
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// Signed 8-bit branch displacement
    BranchTarget8,
    /// Signed 32-bit branch displacement
    BranchTarget32,
    /// Jump table: a 32-bit count followed by that many 32-bit displacements
    Switch,
    /// Metadata token of a type, method or field
    Token,
    /// User string token
    String,
    /// Stand-alone signature token
    Signature,
}

impl OperandShape {
    /// Fixed operand size in bytes, `None` for the variable length switch table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandShape::None => Some(0),
            OperandShape::Int8 | OperandShape::UInt8 | OperandShape::BranchTarget8 => Some(1),
            OperandShape::Int16 | OperandShape::UInt16 => Some(2),
            OperandShape::Int32
            | OperandShape::Float32
            | OperandShape::BranchTarget32
            | OperandShape::Token
            | OperandShape::String
            | OperandShape::Signature => Some(4),
            OperandShape::Int64 | OperandShape::Float64 => Some(8),
            OperandShape::Switch => None,
        }
    }

    /// Returns true for operands that carry a 4-byte metadata token.
    #[must_use]
    pub const fn is_token(&self) -> bool {
        matches!(
            self,
            OperandShape::Token | OperandShape::String | OperandShape::Signature
        )
    }
}

/// One entry of the opcode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpCode {
    /// Opcode value, `0xFE00 | b` for prefixed instructions
    pub value: u16,
    /// Mnemonic
    pub mnemonic: &'static str,
    /// Operand encoding
    pub shape: OperandShape,
}

impl OpCode {
    /// Number of opcode bytes (1 or 2).
    #[must_use]
    pub fn len(&self) -> usize {
        if self.value > 0xFF {
            2
        } else {
            1
        }
    }

    /// Always false; an opcode occupies at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Length of the operand that starts at `operand_offset` of `code`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if a switch table count is truncated.
    pub fn operand_len(&self, code: &[u8], operand_offset: usize) -> Result<usize> {
        if let Some(size) = self.shape.size() {
            return Ok(size);
        }

        let count = read_u32(code, operand_offset)
            .ok_or_else(|| malformed_error!("Truncated switch table at IL_{:04x}", operand_offset))?;
        (count as usize)
            .checked_add(1)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| malformed_error!("Switch table too large at IL_{:04x}", operand_offset))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic)
    }
}

/// Reads a little-endian `u32` at `offset`, if the code is long enough.
#[must_use]
pub fn read_u32(code: &[u8], offset: usize) -> Option<u32> {
    let bytes = code.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decodes the opcode at `offset` of `code`.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for a truncated prefix or an undefined opcode.
///
/// # Examples
///
/// ```rust
/// use ilforge::il::opcodes::{decode_opcode, OperandShape};
///
/// let code = [0x00, 0xFE, 0x06, 0x01, 0x00, 0x00, 0x06];
/// let ldftn = decode_opcode(&code, 1)?;
/// assert_eq!(ldftn.mnemonic, "ldftn");
/// assert_eq!(ldftn.shape, OperandShape::Token);
/// assert_eq!(ldftn.len(), 2);
/// # Ok::<(), ilforge::Error>(())
/// ```
pub fn decode_opcode(code: &[u8], offset: usize) -> Result<OpCode> {
    let Some(&first) = code.get(offset) else {
        return Err(malformed_error!("Opcode expected at IL_{:04x}", offset));
    };

    let value = if first == FE_PREFIX {
        let Some(&second) = code.get(offset + 1) else {
            return Err(malformed_error!("Truncated two-byte opcode at IL_{:04x}", offset));
        };
        prefixed(second)
    } else {
        u16::from(first)
    };

    lookup(value).ok_or_else(|| malformed_error!("Invalid opcode 0x{:x} at IL_{:04x}", value, offset))
}

/// Returns the table entry of an opcode value.
#[must_use]
pub fn lookup(value: u16) -> Option<OpCode> {
    use OperandShape as S;

    let (mnemonic, shape) = match value {
        0x00 => ("nop", S::None),
        0x01 => ("break", S::None),
        0x02 => ("ldarg.0", S::None),
        0x03 => ("ldarg.1", S::None),
        0x04 => ("ldarg.2", S::None),
        0x05 => ("ldarg.3", S::None),
        0x06 => ("ldloc.0", S::None),
        0x07 => ("ldloc.1", S::None),
        0x08 => ("ldloc.2", S::None),
        0x09 => ("ldloc.3", S::None),
        0x0A => ("stloc.0", S::None),
        0x0B => ("stloc.1", S::None),
        0x0C => ("stloc.2", S::None),
        0x0D => ("stloc.3", S::None),
        0x0E => ("ldarg.s", S::UInt8),
        0x0F => ("ldarga.s", S::UInt8),
        0x10 => ("starg.s", S::UInt8),
        0x11 => ("ldloc.s", S::UInt8),
        0x12 => ("ldloca.s", S::UInt8),
        0x13 => ("stloc.s", S::UInt8),
        0x14 => ("ldnull", S::None),
        0x15 => ("ldc.i4.m1", S::None),
        0x16 => ("ldc.i4.0", S::None),
        0x17 => ("ldc.i4.1", S::None),
        0x18 => ("ldc.i4.2", S::None),
        0x19 => ("ldc.i4.3", S::None),
        0x1A => ("ldc.i4.4", S::None),
        0x1B => ("ldc.i4.5", S::None),
        0x1C => ("ldc.i4.6", S::None),
        0x1D => ("ldc.i4.7", S::None),
        0x1E => ("ldc.i4.8", S::None),
        0x1F => ("ldc.i4.s", S::Int8),
        0x20 => ("ldc.i4", S::Int32),
        0x21 => ("ldc.i8", S::Int64),
        0x22 => ("ldc.r4", S::Float32),
        0x23 => ("ldc.r8", S::Float64),
        0x25 => ("dup", S::None),
        0x26 => ("pop", S::None),
        0x27 => ("jmp", S::Token),
        0x28 => ("call", S::Token),
        0x29 => ("calli", S::Signature),
        0x2A => ("ret", S::None),
        0x2B => ("br.s", S::BranchTarget8),
        0x2C => ("brfalse.s", S::BranchTarget8),
        0x2D => ("brtrue.s", S::BranchTarget8),
        0x2E => ("beq.s", S::BranchTarget8),
        0x2F => ("bge.s", S::BranchTarget8),
        0x30 => ("bgt.s", S::BranchTarget8),
        0x31 => ("ble.s", S::BranchTarget8),
        0x32 => ("blt.s", S::BranchTarget8),
        0x33 => ("bne.un.s", S::BranchTarget8),
        0x34 => ("bge.un.s", S::BranchTarget8),
        0x35 => ("bgt.un.s", S::BranchTarget8),
        0x36 => ("ble.un.s", S::BranchTarget8),
        0x37 => ("blt.un.s", S::BranchTarget8),
        0x38 => ("br", S::BranchTarget32),
        0x39 => ("brfalse", S::BranchTarget32),
        0x3A => ("brtrue", S::BranchTarget32),
        0x3B => ("beq", S::BranchTarget32),
        0x3C => ("bge", S::BranchTarget32),
        0x3D => ("bgt", S::BranchTarget32),
        0x3E => ("ble", S::BranchTarget32),
        0x3F => ("blt", S::BranchTarget32),
        0x40 => ("bne.un", S::BranchTarget32),
        0x41 => ("bge.un", S::BranchTarget32),
        0x42 => ("bgt.un", S::BranchTarget32),
        0x43 => ("ble.un", S::BranchTarget32),
        0x44 => ("blt.un", S::BranchTarget32),
        0x45 => ("switch", S::Switch),
        0x46 => ("ldind.i1", S::None),
        0x47 => ("ldind.u1", S::None),
        0x48 => ("ldind.i2", S::None),
        0x49 => ("ldind.u2", S::None),
        0x4A => ("ldind.i4", S::None),
        0x4B => ("ldind.u4", S::None),
        0x4C => ("ldind.i8", S::None),
        0x4D => ("ldind.i", S::None),
        0x4E => ("ldind.r4", S::None),
        0x4F => ("ldind.r8", S::None),
        0x50 => ("ldind.ref", S::None),
        0x51 => ("stind.ref", S::None),
        0x52 => ("stind.i1", S::None),
        0x53 => ("stind.i2", S::None),
        0x54 => ("stind.i4", S::None),
        0x55 => ("stind.i8", S::None),
        0x56 => ("stind.r4", S::None),
        0x57 => ("stind.r8", S::None),
        0x58 => ("add", S::None),
        0x59 => ("sub", S::None),
        0x5A => ("mul", S::None),
        0x5B => ("div", S::None),
        0x5C => ("div.un", S::None),
        0x5D => ("rem", S::None),
        0x5E => ("rem.un", S::None),
        0x5F => ("and", S::None),
        0x60 => ("or", S::None),
        0x61 => ("xor", S::None),
        0x62 => ("shl", S::None),
        0x63 => ("shr", S::None),
        0x64 => ("shr.un", S::None),
        0x65 => ("neg", S::None),
        0x66 => ("not", S::None),
        0x67 => ("conv.i1", S::None),
        0x68 => ("conv.i2", S::None),
        0x69 => ("conv.i4", S::None),
        0x6A => ("conv.i8", S::None),
        0x6B => ("conv.r4", S::None),
        0x6C => ("conv.r8", S::None),
        0x6D => ("conv.u4", S::None),
        0x6E => ("conv.u8", S::None),
        0x6F => ("callvirt", S::Token),
        0x70 => ("cpobj", S::Token),
        0x71 => ("ldobj", S::Token),
        0x72 => ("ldstr", S::String),
        0x73 => ("newobj", S::Token),
        0x74 => ("castclass", S::Token),
        0x75 => ("isinst", S::Token),
        0x76 => ("conv.r.un", S::None),
        0x79 => ("unbox", S::Token),
        0x7A => ("throw", S::None),
        0x7B => ("ldfld", S::Token),
        0x7C => ("ldflda", S::Token),
        0x7D => ("stfld", S::Token),
        0x7E => ("ldsfld", S::Token),
        0x7F => ("ldsflda", S::Token),
        0x80 => ("stsfld", S::Token),
        0x81 => ("stobj", S::Token),
        0x82 => ("conv.ovf.i1.un", S::None),
        0x83 => ("conv.ovf.i2.un", S::None),
        0x84 => ("conv.ovf.i4.un", S::None),
        0x85 => ("conv.ovf.i8.un", S::None),
        0x86 => ("conv.ovf.u1.un", S::None),
        0x87 => ("conv.ovf.u2.un", S::None),
        0x88 => ("conv.ovf.u4.un", S::None),
        0x89 => ("conv.ovf.u8.un", S::None),
        0x8A => ("conv.ovf.i.un", S::None),
        0x8B => ("conv.ovf.u.un", S::None),
        0x8C => ("box", S::Token),
        0x8D => ("newarr", S::Token),
        0x8E => ("ldlen", S::None),
        0x8F => ("ldelema", S::Token),
        0x90 => ("ldelem.i1", S::None),
        0x91 => ("ldelem.u1", S::None),
        0x92 => ("ldelem.i2", S::None),
        0x93 => ("ldelem.u2", S::None),
        0x94 => ("ldelem.i4", S::None),
        0x95 => ("ldelem.u4", S::None),
        0x96 => ("ldelem.i8", S::None),
        0x97 => ("ldelem.i", S::None),
        0x98 => ("ldelem.r4", S::None),
        0x99 => ("ldelem.r8", S::None),
        0x9A => ("ldelem.ref", S::None),
        0x9B => ("stelem.i", S::None),
        0x9C => ("stelem.i1", S::None),
        0x9D => ("stelem.i2", S::None),
        0x9E => ("stelem.i4", S::None),
        0x9F => ("stelem.i8", S::None),
        0xA0 => ("stelem.r4", S::None),
        0xA1 => ("stelem.r8", S::None),
        0xA2 => ("stelem.ref", S::None),
        0xA3 => ("ldelem", S::Token),
        0xA4 => ("stelem", S::Token),
        0xA5 => ("unbox.any", S::Token),
        0xB3 => ("conv.ovf.i1", S::None),
        0xB4 => ("conv.ovf.u1", S::None),
        0xB5 => ("conv.ovf.i2", S::None),
        0xB6 => ("conv.ovf.u2", S::None),
        0xB7 => ("conv.ovf.i4", S::None),
        0xB8 => ("conv.ovf.u4", S::None),
        0xB9 => ("conv.ovf.i8", S::None),
        0xBA => ("conv.ovf.u8", S::None),
        0xC2 => ("refanyval", S::Token),
        0xC3 => ("ckfinite", S::None),
        0xC6 => ("mkrefany", S::Token),
        0xD0 => ("ldtoken", S::Token),
        0xD1 => ("conv.u2", S::None),
        0xD2 => ("conv.u1", S::None),
        0xD3 => ("conv.i", S::None),
        0xD4 => ("conv.ovf.i", S::None),
        0xD5 => ("conv.ovf.u", S::None),
        0xD6 => ("add.ovf", S::None),
        0xD7 => ("add.ovf.un", S::None),
        0xD8 => ("mul.ovf", S::None),
        0xD9 => ("mul.ovf.un", S::None),
        0xDA => ("sub.ovf", S::None),
        0xDB => ("sub.ovf.un", S::None),
        0xDC => ("endfinally", S::None),
        0xDD => ("leave", S::BranchTarget32),
        0xDE => ("leave.s", S::BranchTarget8),
        0xDF => ("stind.i", S::None),
        0xE0 => ("conv.u", S::None),

        0xFE00 => ("arglist", S::None),
        0xFE01 => ("ceq", S::None),
        0xFE02 => ("cgt", S::None),
        0xFE03 => ("cgt.un", S::None),
        0xFE04 => ("clt", S::None),
        0xFE05 => ("clt.un", S::None),
        0xFE06 => ("ldftn", S::Token),
        0xFE07 => ("ldvirtftn", S::Token),
        0xFE09 => ("ldarg", S::UInt16),
        0xFE0A => ("ldarga", S::UInt16),
        0xFE0B => ("starg", S::UInt16),
        0xFE0C => ("ldloc", S::UInt16),
        0xFE0D => ("ldloca", S::UInt16),
        0xFE0E => ("stloc", S::UInt16),
        0xFE0F => ("localloc", S::None),
        0xFE11 => ("endfilter", S::None),
        0xFE12 => ("unaligned.", S::UInt8),
        0xFE13 => ("volatile.", S::None),
        0xFE14 => ("tail.", S::None),
        0xFE15 => ("initobj", S::Token),
        0xFE16 => ("constrained.", S::Token),
        0xFE17 => ("cpblk", S::None),
        0xFE18 => ("initblk", S::None),
        0xFE19 => ("no.", S::UInt8),
        0xFE1A => ("rethrow", S::None),
        0xFE1C => ("sizeof", S::Token),
        0xFE1D => ("refanytype", S::None),
        0xFE1E => ("readonly.", S::None),
        _ => return None,
    };

    Some(OpCode {
        value,
        mnemonic,
        shape,
    })
}
