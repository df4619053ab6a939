//! End-to-end builds of small programs.

use ilforge::{
    il::opcodes as op,
    prelude::*,
    tokens::{Entity, KnownTypeToken},
    Result,
};

fn emit(code: &mut Vec<u8>, opcode: u8, token: Token) {
    code.push(opcode);
    code.extend_from_slice(&token.value().to_le_bytes());
}

/// A blinking LED: `Led` with a static pin number set by its static constructor, an
/// `Output` interface and a `Main` that prints a greeting and toggles the LED.
struct Blinky {
    universe: Universe,
    led: TypeId,
    output: TypeId,
    cctor: MethodId,
    toggle: MethodId,
    main: MethodId,
}

fn blinky() -> Blinky {
    let universe = Universe::with_core_library();
    let int32 = universe.find_type("System.Int32").unwrap();
    let boolean = universe.find_type("System.Boolean").unwrap();

    let output = universe
        .define_type("Blinky", "IOutput")
        .flags(TypeFlags::INTERFACE | TypeFlags::ABSTRACT)
        .build();
    let write = universe
        .define_method(output, "Write")
        .attributes(
            MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT | MethodAttributes::NEW_SLOT,
        )
        .param("value", boolean)
        .build();

    let led = universe
        .define_type("Blinky", "Led")
        .interface(output)
        .build();
    let pin = universe
        .define_field(led, "Pin", int32)
        .flags(FieldFlags::STATIC)
        .build();
    let state = universe.define_field(led, "state", boolean).build();
    let pin_token = universe.field(pin).token;
    let state_token = universe.field(state).token;

    let mut cctor_code = vec![op::LDC_I4, 13, 0, 0, 0];
    emit(&mut cctor_code, op::STSFLD, pin_token);
    cctor_code.push(op::RET);
    let cctor = universe
        .define_static_constructor(led)
        .body(MethodBody::new(cctor_code, 1))
        .build();

    let ctor = universe
        .define_constructor(led)
        .body(MethodBody::new(vec![op::RET], 1))
        .build();
    let mut write_code = vec![op::LDARG_0, op::LDARG_1];
    emit(&mut write_code, op::STFLD, state_token);
    write_code.push(op::RET);
    universe
        .define_method(led, "Write")
        .attributes(MethodAttributes::VIRTUAL)
        .param("value", boolean)
        .body(MethodBody::new(write_code, 2))
        .build();

    let mut toggle_code = vec![op::LDARG_0, op::LDARG_0];
    emit(&mut toggle_code, op::LDFLD, state_token);
    toggle_code.extend_from_slice(&[op::LDC_I4_0, 0xFE, 0x01]);
    emit(&mut toggle_code, op::CALLVIRT, universe.method(write).token);
    toggle_code.push(op::RET);
    let toggle = universe
        .define_method(led, "Toggle")
        .body(MethodBody::new(toggle_code, 3))
        .build();

    let program = universe.define_type("Blinky", "Program").build();
    let mut main_code = Vec::new();
    emit(&mut main_code, op::LDSTR, universe.add_user_string("Hello, board"));
    main_code.push(op::POP);
    emit(&mut main_code, op::NEWOBJ, universe.method(ctor).token);
    emit(&mut main_code, op::CALL, universe.method(toggle).token);
    main_code.push(op::RET);
    let main = universe
        .define_method(program, "Main")
        .attributes(MethodAttributes::STATIC)
        .body(MethodBody::new(main_code, 2))
        .build();

    Blinky {
        universe,
        led,
        output,
        cctor,
        toggle,
        main,
    }
}

#[test]
fn closure_of_a_small_program() -> Result<()> {
    let program = blinky();
    let universe = &program.universe;
    let mut compiler = Compiler::new(universe, &[])?;
    let compilation = compiler.compile(universe, program.main, &CompilerSettings::default())?;
    let set = &compilation.set;

    assert!(!compilation.diagnostics.has_errors());
    assert!(set.has_class(program.led));
    assert!(set.has_class(program.output));
    assert!(set.has_method(program.main));
    assert!(set.has_method(program.toggle));
    assert_eq!(set.startup_sequence(), &[program.cctor]);

    // the interface method is implemented by Led.Write, which must come along
    let led_write = universe.find_method(program.led, "Write").unwrap();
    assert!(set.has_method(led_write));

    let greeting = set
        .tokens()
        .strings()
        .iter()
        .find(|s| s.text == "Hello, board")
        .unwrap();
    assert!(greeting.token.is_string());
    assert_eq!(greeting.encoded, b"Hello, board");
    Ok(())
}

#[test]
fn patched_code_uses_remote_tokens() -> Result<()> {
    let program = blinky();
    let universe = &program.universe;
    let mut compiler = Compiler::new(universe, &[])?;
    let set = compiler
        .compile(universe, program.main, &CompilerSettings::default())?
        .set;

    let main = set.method(program.main).unwrap();
    let code = main.code.as_ref().unwrap();
    // ldstr, pop, newobj, call, ret
    assert_eq!(code.bytes.len(), 17);
    let string = op::read_u32(&code.bytes, 1).unwrap();
    assert!(RemoteToken(string).is_string());

    let callee = op::read_u32(&code.bytes, 12).unwrap();
    assert_eq!(
        set.inverse_resolve(RemoteToken(callee)),
        Some(Entity::Method(program.toggle))
    );
    Ok(())
}

#[test]
fn known_types_keep_their_tokens() -> Result<()> {
    let program = blinky();
    let universe = &program.universe;
    let mut compiler = Compiler::new(universe, &[])?;
    let mut set = compiler
        .compile(universe, program.main, &CompilerSettings::default())?
        .set;

    let object = universe.find_type("System.Object").unwrap();
    assert_eq!(
        set.type_token(universe, object)?,
        RemoteToken(KnownTypeToken::Object as u32)
    );
    let led = set.class(program.led).unwrap();
    assert!(led.token.value() > ilforge::tokens::LARGEST_KNOWN_TYPE_TOKEN);
    Ok(())
}

#[test]
fn flash_builds_share_the_kernel() -> Result<()> {
    let program = blinky();
    let universe = &program.universe;
    let mut compiler = Compiler::new(universe, &[])?;
    let settings = CompilerSettings::flash_kernel();

    let first = compiler.compile(universe, program.main, &settings)?.set;
    let second = compiler.compile(universe, program.main, &settings)?.set;
    let kernel = first.kernel().unwrap();
    assert_eq!(Some(kernel.hash()), second.kernel().map(SnapShot::hash));
    assert_eq!(first.create_snapshot().hash(), second.create_snapshot().hash());

    // the program part never overlaps with the kernel
    let led = first.class(program.led).unwrap();
    assert!(!kernel.contains(led.token));
    Ok(())
}

#[test]
fn entry_points_must_be_static() -> Result<()> {
    let program = blinky();
    let universe = &program.universe;
    let mut compiler = Compiler::new(universe, &[])?;
    let result = compiler.compile(universe, program.toggle, &CompilerSettings::default());
    assert!(matches!(result, Err(Error::InvalidEntryPoint(_))));
    Ok(())
}
