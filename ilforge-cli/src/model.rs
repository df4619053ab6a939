//! JSON program descriptions.
//!
//! A description lists the user types of a program with their fields and methods. Method
//! bodies are raw IL in hex, referring to members through the original metadata tokens given
//! in the description. Framework types come from [`Universe::with_core_library`] and are
//! referenced by full name; `T[]` and `T&` denote arrays and by-ref types.
//!
//! ```json
//! {
//!   "types": [{
//!     "namespace": "Demo", "name": "Program", "token": "0x02000002",
//!     "methods": [{
//!       "name": "Main", "attributes": "STATIC", "token": "0x06000001",
//!       "body": { "il": "72 01 00 00 70 26 2a", "max_stack": 1 }
//!     }]
//!   }],
//!   "strings": [{ "token": "0x70000001", "text": "Hello" }]
//! }
//! ```

use std::{collections::HashMap, path::Path};

use anyhow::{anyhow, bail, Context};
use ilforge::{
    metadata::{method::MethodKind, token::Token, MethodId, TypeId},
    prelude::*,
};
use serde::Deserialize;

/// A token written as a number or as a decimal or `0x` prefixed string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenValue {
    Number(u32),
    Text(String),
}

impl TokenValue {
    fn token(&self) -> anyhow::Result<Token> {
        match self {
            TokenValue::Number(value) => Ok(Token(*value)),
            TokenValue::Text(text) => {
                let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => u32::from_str_radix(hex, 16),
                    None => text.parse(),
                };
                value
                    .map(Token)
                    .with_context(|| format!("invalid token '{text}'"))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramModel {
    #[serde(default)]
    pub types: Vec<TypeModel>,
    #[serde(default)]
    pub strings: Vec<StringModel>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeModel {
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    pub token: Option<TokenValue>,
    pub flags: Option<TypeFlags>,
    pub base: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    pub explicit_size: Option<u32>,
    #[serde(default)]
    pub fields: Vec<FieldModel>,
    #[serde(default)]
    pub methods: Vec<MethodModel>,
}

impl TypeModel {
    fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldModel {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub flags: Option<FieldFlags>,
    pub token: Option<TokenValue>,
    /// Hex encoded data of a static array initializer
    pub initial_value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodModel {
    pub name: String,
    pub kind: Option<MethodKind>,
    pub attributes: Option<MethodAttributes>,
    #[serde(default)]
    pub parameters: Vec<ParameterModel>,
    pub returns: Option<String>,
    pub token: Option<TokenValue>,
    pub body: Option<BodyModel>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterModel {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BodyModel {
    pub il: String,
    pub max_stack: u16,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub clauses: Vec<ClauseModel>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClauseModel {
    pub flags: Option<ExceptionClauseFlags>,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    pub catch_type: Option<TokenValue>,
    #[serde(default)]
    pub filter_offset: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StringModel {
    pub token: TokenValue,
    pub text: String,
}

/// A loaded program.
pub struct Program {
    pub universe: Universe,
    pub types: Vec<TypeId>,
}

/// Read and load a JSON program description.
pub fn load_program(path: &Path) -> anyhow::Result<Program> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read program: {}", path.display()))?;
    let model: ProgramModel = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse program: {}", path.display()))?;
    build_program(&model)
}

/// Feed a description through the program model builders.
pub fn build_program(model: &ProgramModel) -> anyhow::Result<Program> {
    let universe = Universe::with_core_library();
    for ty in &model.types {
        let fields = ty.fields.iter().map(|f| &f.token);
        let methods = ty.methods.iter().map(|m| &m.token);
        for token in std::iter::once(&ty.token).chain(fields).chain(methods).flatten() {
            universe.reserve_token(token.token()?);
        }
    }

    // types may name base types and interfaces declared further down
    let mut ids: HashMap<usize, TypeId> = HashMap::new();
    while ids.len() < model.types.len() {
        let before = ids.len();
        for (index, ty) in model.types.iter().enumerate() {
            if ids.contains_key(&index) {
                continue;
            }
            let base = match &ty.base {
                Some(name) => match resolve_type(&universe, name) {
                    Ok(base) => Some(base),
                    Err(_) => continue,
                },
                None => None,
            };
            let Ok(interfaces) = ty
                .interfaces
                .iter()
                .map(|name| resolve_type(&universe, name))
                .collect::<anyhow::Result<Vec<_>>>()
            else {
                continue;
            };
            ids.insert(index, define_type(&universe, ty, base, &interfaces)?);
        }
        if ids.len() == before {
            let missing: Vec<String> = model
                .types
                .iter()
                .enumerate()
                .filter(|(index, _)| !ids.contains_key(index))
                .map(|(_, ty)| ty.full_name())
                .collect();
            bail!(
                "unresolvable base types or interfaces for {}",
                missing.join(", ")
            );
        }
    }

    for text in &model.strings {
        universe.define_user_string(text.token.token()?, &text.text)?;
    }

    let mut types = Vec::with_capacity(model.types.len());
    for (index, ty) in model.types.iter().enumerate() {
        let owner = ids[&index];
        for field in &ty.fields {
            define_field(&universe, owner, field)
                .with_context(|| format!("in field {}::{}", ty.full_name(), field.name))?;
        }
        for method in &ty.methods {
            define_method(&universe, owner, method)
                .with_context(|| format!("in method {}::{}", ty.full_name(), method.name))?;
        }
        types.push(owner);
    }

    Ok(Program { universe, types })
}

fn define_type(
    universe: &Universe,
    model: &TypeModel,
    base: Option<TypeId>,
    interfaces: &[TypeId],
) -> anyhow::Result<TypeId> {
    if universe.find_type(&model.full_name()).is_some() {
        bail!("type {} is defined twice", model.full_name());
    }
    let mut builder = universe
        .define_type(&model.namespace, &model.name)
        .flags(model.flags.unwrap_or(TypeFlags::empty()));
    if let Some(base) = base {
        builder = builder.base(base);
    }
    for interface in interfaces {
        builder = builder.interface(*interface);
    }
    if let Some(size) = model.explicit_size {
        builder = builder.explicit_size(size);
    }
    if let Some(token) = &model.token {
        builder = builder.token(unused_token(universe, token)?);
    }
    Ok(builder.build())
}

fn define_field(universe: &Universe, owner: TypeId, model: &FieldModel) -> anyhow::Result<()> {
    let field_type = resolve_type(universe, &model.field_type)?;
    let mut builder = universe
        .define_field(owner, &model.name, field_type)
        .flags(model.flags.unwrap_or(FieldFlags::empty()));
    if let Some(data) = &model.initial_value {
        builder = builder.initial_value(parse_hex(data)?);
    }
    if let Some(token) = &model.token {
        builder = builder.token(unused_token(universe, token)?);
    }
    builder.build();
    Ok(())
}

fn define_method(universe: &Universe, owner: TypeId, model: &MethodModel) -> anyhow::Result<()> {
    let mut builder = match model.kind.unwrap_or(MethodKind::Method) {
        MethodKind::Method => universe.define_method(owner, &model.name),
        MethodKind::Constructor => universe.define_constructor(owner),
        MethodKind::StaticConstructor => universe.define_static_constructor(owner),
    };
    if let Some(attributes) = model.attributes {
        builder = builder.attributes(attributes);
    }
    for parameter in &model.parameters {
        builder = builder.param(&parameter.name, resolve_type(universe, &parameter.param_type)?);
    }
    if let Some(returns) = &model.returns {
        builder = builder.returns(resolve_type(universe, returns)?);
    }
    if let Some(body) = &model.body {
        let locals = body
            .locals
            .iter()
            .map(|name| resolve_type(universe, name))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut method_body = MethodBody::new(parse_hex(&body.il)?, body.max_stack).with_locals(locals);
        for clause in &body.clauses {
            method_body = method_body.with_clause(ExceptionClause {
                flags: clause.flags.unwrap_or(ExceptionClauseFlags::EXCEPTION),
                try_offset: clause.try_offset,
                try_length: clause.try_length,
                handler_offset: clause.handler_offset,
                handler_length: clause.handler_length,
                catch_type: clause.catch_type.as_ref().map(TokenValue::token).transpose()?,
                filter_offset: clause.filter_offset,
            });
        }
        builder = builder.body(method_body);
    }
    if let Some(token) = &model.token {
        builder = builder.token(unused_token(universe, token)?);
    }
    builder.build();
    Ok(())
}

fn unused_token(universe: &Universe, value: &TokenValue) -> anyhow::Result<Token> {
    let token = value.token()?;
    if universe.member(token).is_some() {
        bail!("token {token} is assigned twice");
    }
    Ok(token)
}

/// Resolve a full type name, with `[]` and `&` suffixes for arrays and by-ref types.
pub fn resolve_type(universe: &Universe, name: &str) -> anyhow::Result<TypeId> {
    if let Some(element) = name.strip_suffix("[]") {
        return Ok(universe.array_of(resolve_type(universe, element)?));
    }
    if let Some(element) = name.strip_suffix('&') {
        return Ok(universe.by_ref_of(resolve_type(universe, element)?));
    }
    universe
        .find_type(name)
        .ok_or_else(|| anyhow!("unknown type '{name}'"))
}

/// Find the entry method, either as `Type::Method` or as the only static `Main`.
pub fn resolve_entry(program: &Program, entry: Option<&str>) -> anyhow::Result<MethodId> {
    let universe = &program.universe;
    if let Some(entry) = entry {
        let (type_name, method) = entry
            .rsplit_once("::")
            .ok_or_else(|| anyhow!("entry '{entry}' is not of the form Type::Method"))?;
        let ty = resolve_type(universe, type_name)?;
        return universe
            .find_method(ty, method)
            .ok_or_else(|| anyhow!("type {type_name} has no method {method}"));
    }

    let mains: Vec<MethodId> = program
        .types
        .iter()
        .flat_map(|ty| universe.declared_methods(*ty))
        .filter(|m| {
            let def = universe.method(*m);
            def.name == "Main" && def.is_static()
        })
        .collect();
    match mains.as_slice() {
        [main] => Ok(*main),
        [] => bail!("no static Main method found, use --entry"),
        _ => bail!("{} static Main methods found, use --entry", mains.len()),
    }
}

fn parse_hex(text: &str) -> anyhow::Result<Vec<u8>> {
    let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("hex data has an odd number of digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).with_context(|| format!("invalid hex byte '{byte}'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLINK: &str = r#"{
        "types": [
            {
                "namespace": "Demo", "name": "Led", "base": "Demo.Device", "token": "0x02000003",
                "fields": [{ "name": "Pin", "type": "System.Int32", "flags": "STATIC", "token": "0x04000001" }],
                "methods": [
                    { "name": ".ctor", "kind": "Constructor", "token": "0x06000002",
                      "body": { "il": "2a", "max_stack": 1 } }
                ]
            },
            { "namespace": "Demo", "name": "Device", "flags": "ABSTRACT", "token": "0x02000002" },
            {
                "namespace": "Demo", "name": "Program",
                "methods": [{
                    "name": "Main", "attributes": "STATIC", "token": "0x06000001",
                    "body": { "il": "72 01 00 00 70 26 73 02 00 00 06 26 7e 01 00 00 04 26 2a", "max_stack": 1 }
                }]
            }
        ],
        "strings": [{ "token": "0x70000001", "text": "Hello" }]
    }"#;

    #[test]
    fn loads_and_compiles() {
        let model: ProgramModel = serde_json::from_str(BLINK).unwrap();
        let program = build_program(&model).unwrap();
        let universe = &program.universe;

        let led = universe.find_type("Demo.Led").unwrap();
        assert_eq!(universe.base_type(led), universe.find_type("Demo.Device"));
        assert_eq!(universe.user_string(Token(0x7000_0001)).as_deref(), Some("Hello"));

        let main = resolve_entry(&program, None).unwrap();
        assert_eq!(universe.method(main).name, "Main");
        let set = Compiler::new(universe, &[])
            .unwrap()
            .compile(universe, main, &CompilerSettings::default())
            .unwrap()
            .set;
        assert!(set.has_class(led));
        assert!(set.tokens().strings().iter().any(|s| s.text == "Hello"));
    }

    #[test]
    fn entries_by_name() {
        let model: ProgramModel = serde_json::from_str(BLINK).unwrap();
        let program = build_program(&model).unwrap();
        let ctor = resolve_entry(&program, Some("Demo.Led::.ctor")).unwrap();
        assert!(program.universe.method(ctor).is_constructor());
        assert!(resolve_entry(&program, Some("Demo.Led")).is_err());
        assert!(resolve_entry(&program, Some("Demo.Nope::Main")).is_err());
    }

    #[test]
    fn unknown_base_types_are_reported() {
        let model: ProgramModel =
            serde_json::from_str(r#"{ "types": [{ "name": "A", "base": "B" }] }"#).unwrap();
        let error = build_program(&model).err().unwrap();
        assert!(error.to_string().contains("A"));
    }

    #[test]
    fn type_names_with_suffixes() {
        let universe = Universe::with_core_library();
        let bytes = resolve_type(&universe, "System.Byte[]").unwrap();
        assert!(universe.type_def(bytes).is_array());
        let by_ref = resolve_type(&universe, "System.Int32&").unwrap();
        assert!(universe.type_def(by_ref).is_by_ref());
        assert_eq!(parse_hex("0a FF").unwrap(), vec![0x0A, 0xFF]);
        assert!(parse_hex("abc").is_err());
    }
}
