//! Token patcher.
//!
//! [`patch_method`] walks a method body once, front to back. Every token-bearing operand is
//! resolved against the program model in the context of the method being patched, redirected
//! through the replacement registry and overwritten in place with the remote token. Everything
//! the body references is recorded in the returned [`IlCode`], which is what drives the
//! dependency closure.

use crate::{
    diagnostics::{DiagnosticCategory, Diagnostics},
    execution::ExecutionSet,
    il::{
        code::{IlCode, PatchedClause},
        opcodes::{decode_opcode, read_u32, OpCode},
    },
    metadata::{
        method::{ExceptionClause, ExceptionClauseFlags, MethodBody},
        token::Token,
        universe::Universe,
        MemberRef, MethodId,
    },
    tokens::RemoteToken,
    Error, Result,
};

/// Largest IL body the length field of the wire format can describe.
///
/// The length travels as a 14-bit value, so a body of exactly `2^14` bytes is already too large.
pub const MAX_CODE_SIZE: usize = (1 << 14) - 1;

/// Largest number of locals, arguments or stack slots of one frame.
pub const MAX_FRAME_SLOTS: usize = 127;

/// How an operand token is translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandClass {
    Method,
    Field,
    Type,
    NewArray,
    TypeOrField,
    String,
    Signature,
}

fn classify(opcode: &OpCode) -> Option<OperandClass> {
    let class = match opcode.mnemonic {
        "call" | "callvirt" | "newobj" | "ldftn" | "ldvirtftn" => OperandClass::Method,
        "ldfld" | "ldflda" | "stfld" | "ldsfld" | "ldsflda" | "stsfld" => OperandClass::Field,
        "newarr" => OperandClass::NewArray,
        "ldtoken" => OperandClass::TypeOrField,
        "ldstr" => OperandClass::String,
        "calli" => OperandClass::Signature,
        "castclass" | "isinst" | "box" | "unbox" | "unbox.any" | "ldelem" | "ldelema"
        | "stelem" | "ldobj" | "stobj" | "cpobj" | "sizeof" | "initobj" | "constrained." => {
            OperandClass::Type
        }
        _ => return None,
    };
    Some(class)
}

/// Patches the body of `method` for upload.
///
/// The returned code has the same length as the input: every token operand keeps its four
/// bytes and only its value changes. `calli` is accepted with the zero signature only, which is
/// what synthesized delegate code uses.
///
/// # Errors
///
/// - [`Error::MethodTooLarge`] for bodies of `2^14` bytes or more
/// - [`Error::TooManyLocals`], [`Error::TooManyStackSlots`] for oversized frames
/// - [`Error::Malformed`] for undefined opcodes and truncated operands
/// - [`Error::UnresolvedToken`] for operands the program model does not know
/// - [`Error::UnsupportedInstruction`] for token-bearing opcodes without a remote form
/// - [`Error::UnsupportedExceptionClause`] for `fault` clauses
///
/// # Examples
///
/// ```rust
/// use ilforge::{
///     diagnostics::Diagnostics,
///     il::patcher::patch_method,
///     metadata::{method::{MethodAttributes, MethodBody}, universe::Universe},
///     prelude::*,
/// };
///
/// let universe = Universe::with_core_library();
/// let program = universe.define_type("Demo", "Program").build();
/// let hello = universe.add_user_string("Hello");
/// let mut il = vec![0x72];
/// il.extend_from_slice(&hello.value().to_le_bytes());
/// il.extend_from_slice(&[0x26, 0x2A]);
/// let main = universe
///     .define_method(program, "Main")
///     .attributes(MethodAttributes::STATIC)
///     .body(MethodBody::new(il, 1))
///     .build();
///
/// let compiler = Compiler::new(&universe, &[])?;
/// let mut set = compiler.empty_set(CompilerSettings::default());
/// let body = universe.method_body(main).unwrap().clone();
/// let code = patch_method(&mut set, &universe, main, &body, &Diagnostics::new())?;
/// assert_eq!(code.len(), 7);
/// let operand = ilforge::il::opcodes::read_u32(&code.bytes, 1).unwrap();
/// assert!(ilforge::tokens::RemoteToken(operand).is_string());
/// # Ok::<(), ilforge::Error>(())
/// ```
pub fn patch_method(
    set: &mut ExecutionSet,
    universe: &Universe,
    method: MethodId,
    body: &MethodBody,
    diagnostics: &Diagnostics,
) -> Result<IlCode> {
    if body.il.len() > MAX_CODE_SIZE {
        return Err(Error::MethodTooLarge {
            method: universe.method_signature(method),
            size: body.il.len(),
        });
    }

    let frame = body.locals.len().max(universe.method(method).argument_count());
    if frame > MAX_FRAME_SLOTS {
        return Err(Error::TooManyLocals {
            method: universe.method_signature(method),
            count: frame,
        });
    }
    if usize::from(body.max_stack) > MAX_FRAME_SLOTS {
        return Err(Error::TooManyStackSlots {
            method: universe.method_signature(method),
            count: usize::from(body.max_stack),
        });
    }

    let mut code = IlCode {
        bytes: body.il.clone(),
        max_stack: body.max_stack,
        locals: body.locals.clone(),
        ..IlCode::default()
    };

    let mut offset = 0;
    while offset < code.bytes.len() {
        let opcode = decode_opcode(&code.bytes, offset)?;
        let operand_offset = offset + opcode.len();
        let operand_len = opcode.operand_len(&code.bytes, operand_offset)?;
        let next = operand_offset + operand_len;
        if next > code.bytes.len() {
            return Err(malformed_error!(
                "Truncated operand of {} at IL_{:04x}",
                opcode.mnemonic,
                offset
            ));
        }

        if opcode.shape.is_token() {
            let token = read_u32(&code.bytes, operand_offset)
                .ok_or_else(|| malformed_error!("Truncated token at IL_{:04x}", offset))?;
            let remote = patch_operand(set, universe, method, &mut code, &opcode, Token(token), offset)?;
            code.bytes[operand_offset..next].copy_from_slice(&remote.value().to_le_bytes());
        }

        offset = next;
    }

    for clause in &body.exception_clauses {
        if let Some(patched) = patch_clause(set, universe, method, &mut code, clause, diagnostics)? {
            code.exception_clauses.push(patched);
        }
    }

    Ok(code)
}

fn patch_operand(
    set: &mut ExecutionSet,
    universe: &Universe,
    method: MethodId,
    code: &mut IlCode,
    opcode: &OpCode,
    token: Token,
    offset: usize,
) -> Result<RemoteToken> {
    let unsupported = || Error::UnsupportedInstruction {
        method: universe.method_signature(method),
        opcode: opcode.mnemonic.to_string(),
        offset,
    };
    let unresolved = || Error::UnresolvedToken {
        method: universe.method_signature(method),
        token,
    };

    let Some(class) = classify(opcode) else {
        return Err(unsupported());
    };

    match class {
        OperandClass::String => {
            let text = universe.user_string(token).ok_or_else(unresolved)?;
            set.string_token(&text)
        }
        OperandClass::Signature => {
            if token.is_null() {
                Ok(RemoteToken::NULL)
            } else {
                Err(unsupported())
            }
        }
        OperandClass::Method => {
            let Some(MemberRef::Method(target)) = universe.resolve(method, token)? else {
                return Err(unresolved());
            };
            let resolved = set.resolve_method(universe, target)?;
            code.use_method(resolved);
            set.method_token(universe, target)
        }
        OperandClass::Field => {
            let Some(MemberRef::Field(target)) = universe.resolve(method, token)? else {
                return Err(unresolved());
            };
            let resolved = set.resolve_field(universe, target)?;
            code.use_field(resolved);
            code.use_type(universe.field(resolved).declaring_type);
            set.field_token(universe, target)
        }
        OperandClass::Type | OperandClass::NewArray => {
            let Some(MemberRef::Type(target)) = universe.resolve(method, token)? else {
                return Err(unresolved());
            };
            let resolved = set.registry().redirect_type(universe, target)?;
            code.use_type(resolved);
            if class == OperandClass::NewArray {
                code.use_array_element(resolved);
            }
            set.type_token(universe, target)
        }
        OperandClass::TypeOrField => match universe.resolve(method, token)? {
            Some(MemberRef::Type(target)) => {
                let resolved = set.registry().redirect_type(universe, target)?;
                code.use_type(resolved);
                set.type_token(universe, target)
            }
            Some(MemberRef::Field(target)) => {
                let resolved = set.resolve_field(universe, target)?;
                if universe.field(resolved).initial_value.is_none() {
                    return Err(unsupported());
                }
                code.use_field(resolved);
                code.use_type(universe.field(resolved).declaring_type);
                set.constant_token(universe, target)
            }
            Some(MemberRef::Method(_)) => Err(unsupported()),
            None => Err(unresolved()),
        },
    }
}

fn patch_clause(
    set: &mut ExecutionSet,
    universe: &Universe,
    method: MethodId,
    code: &mut IlCode,
    clause: &ExceptionClause,
    diagnostics: &Diagnostics,
) -> Result<Option<PatchedClause>> {
    if clause.flags.contains(ExceptionClauseFlags::FAULT) {
        return Err(Error::UnsupportedExceptionClause {
            method: universe.method_signature(method),
            kind: "fault",
        });
    }
    if clause.flags.contains(ExceptionClauseFlags::FILTER) {
        let message = format!(
            "Filter clause at IL_{:04x} in {} dropped",
            clause.try_offset,
            universe.method_signature(method)
        );
        log::warn!("{message}");
        diagnostics.warning(DiagnosticCategory::ExceptionClause, message);
        return Ok(None);
    }

    let catch_type = match clause.catch_type {
        Some(token) if !clause.flags.contains(ExceptionClauseFlags::FINALLY) => {
            let Some(MemberRef::Type(target)) = universe.resolve(method, token)? else {
                return Err(Error::UnresolvedToken {
                    method: universe.method_signature(method),
                    token,
                });
            };
            code.use_type(set.registry().redirect_type(universe, target)?);
            set.type_token(universe, target)?
        }
        _ => RemoteToken::NULL,
    };

    let narrow = |value: u32| {
        u16::try_from(value)
            .map_err(|_| malformed_error!("Exception clause offset {} out of range", value))
    };

    Ok(Some(PatchedClause {
        flags: clause.flags,
        try_offset: narrow(clause.try_offset)?,
        try_length: narrow(clause.try_length)?,
        handler_offset: narrow(clause.handler_offset)?,
        handler_length: narrow(clause.handler_length)?,
        catch_type,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::opcodes,
        compiler::replacement::{ReplacementConfig, ReplacementRegistry, TypeReplacementEntry},
        config::CompilerSettings,
        metadata::{
            field::FieldFlags,
            method::MethodAttributes,
        },
        tokens::Entity,
    };
    use std::sync::Arc;

    fn set_with(universe: &Universe, configs: &[ReplacementConfig]) -> ExecutionSet {
        let registry = ReplacementRegistry::build(universe, configs).unwrap();
        ExecutionSet::new(Arc::new(registry), CompilerSettings::default())
    }

    fn with_operand(opcode: &[u8], token: Token) -> Vec<u8> {
        let mut il = opcode.to_vec();
        il.extend_from_slice(&token.value().to_le_bytes());
        il
    }

    fn operand(code: &IlCode, at: usize) -> RemoteToken {
        RemoteToken(read_u32(&code.bytes, at).unwrap())
    }

    fn static_method(universe: &Universe, owner: crate::metadata::TypeId, name: &str, il: Vec<u8>) -> MethodId {
        universe
            .define_method(owner, name)
            .attributes(MethodAttributes::STATIC)
            .body(MethodBody::new(il, 8))
            .build()
    }

    #[test]
    fn calls_and_fields_are_patched_and_recorded() {
        let universe = Universe::with_core_library();
        let int32 = universe.find_type("System.Int32").unwrap();
        let program = universe.define_type("Demo", "Program").build();
        let counter = universe
            .define_field(program, "counter", int32)
            .flags(FieldFlags::STATIC)
            .build();
        let helper = static_method(&universe, program, "Helper", vec![opcodes::RET]);

        let mut il = with_operand(&[opcodes::CALL], universe.method(helper).token);
        il.extend(with_operand(&[opcodes::LDSFLD], universe.field(counter).token));
        il.extend([opcodes::POP, opcodes::RET]);
        let main = static_method(&universe, program, "Main", il);

        let mut set = set_with(&universe, &[]);
        let body = universe.method_body(main).unwrap().clone();
        let code = patch_method(&mut set, &universe, main, &body, &Diagnostics::new()).unwrap();

        assert_eq!(code.len(), body.il.len());
        assert_eq!(set.inverse_resolve(operand(&code, 1)), Some(Entity::Method(helper)));
        assert_eq!(set.inverse_resolve(operand(&code, 6)), Some(Entity::Field(counter)));
        assert_eq!(code.methods_used, vec![helper]);
        assert_eq!(code.fields_used, vec![counter]);
        assert_eq!(code.types_used, vec![program]);
    }

    #[test]
    fn replaced_calls_point_at_the_replacement() {
        let universe = Universe::with_core_library();
        let clock = universe.define_type("Demo", "Clock").build();
        let original = static_method(&universe, clock, "Now", vec![opcodes::RET]);
        let mini = universe.define_type("Demo", "MiniClock").build();
        let replacement = static_method(&universe, mini, "Now", vec![opcodes::RET]);
        let program = universe.define_type("Demo", "Program").build();
        let mut il = with_operand(&[opcodes::CALL], universe.method(original).token);
        il.push(opcodes::RET);
        let main = static_method(&universe, program, "Main", il);

        let config = ReplacementConfig {
            types: vec![TypeReplacementEntry::entire("Demo.Clock", "Demo.MiniClock")],
            ..ReplacementConfig::default()
        };
        let mut set = set_with(&universe, &[config]);
        let body = universe.method_body(main).unwrap().clone();
        let code = patch_method(&mut set, &universe, main, &body, &Diagnostics::new()).unwrap();

        assert_eq!(code.methods_used, vec![replacement]);
        assert_eq!(set.inverse_resolve(operand(&code, 1)), Some(Entity::Method(replacement)));
    }

    #[test]
    fn unsupported_and_truncated_operands() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let target = static_method(&universe, program, "Target", vec![opcodes::RET]);
        let jmp = static_method(
            &universe,
            program,
            "Jump",
            with_operand(&[opcodes::JMP], universe.method(target).token),
        );
        let truncated = static_method(&universe, program, "Truncated", vec![opcodes::CALL, 0x01, 0x00]);

        let mut set = set_with(&universe, &[]);
        let diagnostics = Diagnostics::new();

        let body = universe.method_body(jmp).unwrap().clone();
        let result = patch_method(&mut set, &universe, jmp, &body, &diagnostics);
        assert!(matches!(result, Err(Error::UnsupportedInstruction { ref opcode, offset: 0, .. }) if opcode == "jmp"));

        let body = universe.method_body(truncated).unwrap().clone();
        let result = patch_method(&mut set, &universe, truncated, &body, &diagnostics);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn oversized_bodies_are_rejected() {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let huge = static_method(&universe, program, "Huge", vec![0x00; MAX_CODE_SIZE + 1]);

        let mut set = set_with(&universe, &[]);
        let body = universe.method_body(huge).unwrap().clone();
        let result = patch_method(&mut set, &universe, huge, &body, &Diagnostics::new());
        assert!(matches!(result, Err(Error::MethodTooLarge { size, .. }) if size == MAX_CODE_SIZE + 1));
    }

    #[test]
    fn code_size_fencepost() -> Result<()> {
        let universe = Universe::with_core_library();
        let program = universe.define_type("Demo", "Program").build();
        let mut largest = vec![0x00; 16382];
        largest.push(0x2A);
        let fits = static_method(&universe, program, "Fits", largest);
        let mut too_long = vec![0x00; 16383];
        too_long.push(0x2A);
        too_long.push(0x2A);
        let rejected = static_method(&universe, program, "TooLong", too_long);

        let mut set = set_with(&universe, &[]);
        let diagnostics = Diagnostics::new();
        let body = universe.method_body(fits).unwrap().clone();
        let code = patch_method(&mut set, &universe, fits, &body, &diagnostics)?;
        assert_eq!(code.len(), MAX_CODE_SIZE);

        let body = universe.method_body(rejected).unwrap().clone();
        assert_eq!(body.il.len(), 16384);
        let result = patch_method(&mut set, &universe, rejected, &body, &diagnostics);
        assert!(matches!(result, Err(Error::MethodTooLarge { size: 16384, .. })));
        Ok(())
    }

    #[test]
    fn exception_clauses() {
        let universe = Universe::with_core_library();
        let exception = universe.find_type("System.Exception").unwrap();
        let program = universe.define_type("Demo", "Program").build();
        let clause = |flags, catch_type| ExceptionClause {
            flags,
            try_offset: 0,
            try_length: 2,
            handler_offset: 2,
            handler_length: 2,
            catch_type,
            filter_offset: 0,
        };
        let il = vec![0x00, 0x00, 0x00, opcodes::RET];

        let guarded = universe
            .define_method(program, "Guarded")
            .attributes(MethodAttributes::STATIC)
            .body(
                MethodBody::new(il.clone(), 1)
                    .with_clause(clause(ExceptionClauseFlags::EXCEPTION, Some(universe.type_def(exception).token)))
                    .with_clause(clause(ExceptionClauseFlags::FILTER, None))
                    .with_clause(clause(ExceptionClauseFlags::FINALLY, None)),
            )
            .build();
        let faulty = universe
            .define_method(program, "Faulty")
            .attributes(MethodAttributes::STATIC)
            .body(MethodBody::new(il, 1).with_clause(clause(ExceptionClauseFlags::FAULT, None)))
            .build();

        let mut set = set_with(&universe, &[]);
        let diagnostics = Diagnostics::new();
        let body = universe.method_body(guarded).unwrap().clone();
        let code = patch_method(&mut set, &universe, guarded, &body, &diagnostics).unwrap();

        assert_eq!(code.exception_clauses.len(), 2);
        assert_eq!(code.exception_clauses[0].catch_type, RemoteToken(13));
        assert_eq!(code.exception_clauses[1].kind(), 2);
        assert!(code.exception_clauses[1].catch_type.is_null());
        assert!(diagnostics.has_warnings());

        let body = universe.method_body(faulty).unwrap().clone();
        let result = patch_method(&mut set, &universe, faulty, &body, &diagnostics);
        assert!(matches!(result, Err(Error::UnsupportedExceptionClause { kind: "fault", .. })));
    }
}
