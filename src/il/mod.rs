//! IL analysis and token patching.
//!
//! Method bodies arrive as raw ECMA-335 IL that references members through original metadata
//! tokens. Before upload every such operand is replaced by the remote token of the member it
//! resolves to. The instruction stream itself is never restructured: offsets and branch
//! targets stay valid, which keeps exception clause offsets valid as well.
//!
//! # Key Components
//!
//! - [`opcodes`] - the opcode table with operand shapes
//! - [`patcher::patch_method`] - resolve, redirect and rewrite the tokens of one body
//! - [`IlCode`] - the patched body together with everything it references

pub mod code;
pub mod opcodes;
pub mod patcher;

pub use code::{IlCode, PatchedClause};
pub use patcher::patch_method;
