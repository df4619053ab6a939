//! Program models shared by the unit tests.

use crate::metadata::{
    method::{MethodAttributes, MethodBody},
    types::TypeFlags,
    universe::Universe,
    FieldId, MethodId, TypeId,
};

/// Assembles IL with original metadata tokens.
pub struct Il<'a> {
    universe: &'a Universe,
    bytes: Vec<u8>,
}

impl<'a> Il<'a> {
    pub fn new(universe: &'a Universe) -> Self {
        Il {
            universe,
            bytes: Vec::new(),
        }
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    fn with_token(mut self, opcode: u8, token: u32) -> Self {
        self.bytes.push(opcode);
        self.bytes.extend_from_slice(&token.to_le_bytes());
        self
    }

    fn method_token(&self, method: MethodId) -> u32 {
        self.universe.method(method).token.value()
    }

    fn field_token(&self, field: FieldId) -> u32 {
        self.universe.field(field).token.value()
    }

    pub fn call(self, method: MethodId) -> Self {
        let token = self.method_token(method);
        self.with_token(0x28, token)
    }

    pub fn callvirt(self, method: MethodId) -> Self {
        let token = self.method_token(method);
        self.with_token(0x6F, token)
    }

    pub fn newobj(self, ctor: MethodId) -> Self {
        let token = self.method_token(ctor);
        self.with_token(0x73, token)
    }

    pub fn ldsfld(self, field: FieldId) -> Self {
        let token = self.field_token(field);
        self.with_token(0x7E, token)
    }

    pub fn stsfld(self, field: FieldId) -> Self {
        let token = self.field_token(field);
        self.with_token(0x80, token)
    }

    pub fn ldtoken(self, field: FieldId) -> Self {
        let token = self.field_token(field);
        self.with_token(0xD0, token)
    }

    pub fn ldstr(self, text: &str) -> Self {
        let token = self.universe.add_user_string(text).value();
        self.with_token(0x72, token)
    }

    pub fn newarr(self, element: TypeId) -> Self {
        let token = self.universe.type_def(element).token.value();
        self.with_token(0x8D, token)
    }

    pub fn ret(self) -> Self {
        self.op(0x2A)
    }

    pub fn bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn body(self, max_stack: u16) -> MethodBody {
        MethodBody::new(self.bytes, max_stack)
    }
}

/// `Demo.Shape` with an abstract `Area`, `Demo.Circle` overriding it, and a `Main` that
/// creates a circle and calls `Area` through the base class.
pub struct Shapes {
    pub universe: Universe,
    pub shape: TypeId,
    pub circle: TypeId,
    pub main: MethodId,
}

pub fn shapes() -> Shapes {
    let universe = Universe::with_core_library();
    let int32 = universe.find_type("System.Int32").unwrap();

    let shape = universe
        .define_type("Demo", "Shape")
        .flags(TypeFlags::ABSTRACT)
        .build();
    universe
        .define_constructor(shape)
        .body(Il::new(&universe).ret().body(1))
        .build();
    let area = universe
        .define_method(shape, "Area")
        .attributes(
            MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT | MethodAttributes::NEW_SLOT,
        )
        .returns(int32)
        .build();

    let circle = universe.define_type("Demo", "Circle").base(shape).build();
    universe.define_field(circle, "radius", int32).build();
    let circle_ctor = universe
        .define_constructor(circle)
        .body(Il::new(&universe).ret().body(1))
        .build();
    universe
        .define_method(circle, "Area")
        .attributes(MethodAttributes::VIRTUAL)
        .returns(int32)
        .body(Il::new(&universe).op(0x16).ret().body(1))
        .build();

    let program = universe.define_type("Demo", "Program").build();
    let main = universe
        .define_method(program, "Main")
        .attributes(MethodAttributes::STATIC)
        .body(
            Il::new(&universe)
                .newobj(circle_ctor)
                .callvirt(area)
                .op(0x26)
                .ret()
                .body(2),
        )
        .build();

    Shapes {
        universe,
        shape,
        circle,
        main,
    }
}

/// Defines `System.SZGenericArrayEnumerator`1` with a static `GetEnumerator(T[])`.
pub fn array_enumerator(universe: &Universe) -> TypeId {
    let enumerator_interface = universe
        .find_type("System.Collections.Generic.IEnumerator`1")
        .unwrap();
    let enumerator = universe
        .define_type("System", "SZGenericArrayEnumerator`1")
        .flags(TypeFlags::SEALED)
        .generic_parameters(&["T"])
        .build();
    let t = universe.type_def(enumerator).generic_parameters()[0];
    let t_enumerator = universe.instantiate(enumerator_interface, &[t]).unwrap();
    universe
        .define_method(enumerator, "GetEnumerator")
        .attributes(MethodAttributes::STATIC)
        .param("array", universe.array_of(t))
        .returns(t_enumerator)
        .body(MethodBody::new(vec![0x14, 0x2A], 1))
        .build();
    enumerator
}
