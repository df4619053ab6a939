//! The program model arena and its token tables.
//!
//! A [`Universe`] owns every type, method and field of the program being compiled together with
//! the framework types it relies on. All operations take `&self`: definitions live in
//! append-only `boxcar` vectors and the lookup tables are `DashMap`s, so closed generic
//! instances, arrays and by-ref types can be created on demand while the compiler holds shared
//! references into the arena.
//!
//! # Token resolution
//!
//! Unpatched IL references members by their original metadata token. [`Universe::resolve`]
//! resolves such a token the way the owning module would, in the context of the method whose
//! body contains it:
//!
//! 1. If the method belongs to a closed generic instance, the instance scope is consulted
//!    first. It maps the tokens of the open definition (its fields, methods and generic
//!    parameters) to the instance's own members.
//! 2. Otherwise the module-wide table is used, and open types found there are closed over the
//!    context's generic arguments.
//!
//! # Examples
//!
//! ```rust
//! use ilforge::metadata::{method::MethodBody, types::TypeFlags, universe::Universe};
//!
//! let universe = Universe::with_core_library();
//! let int32 = universe.find_type("System.Int32").unwrap();
//!
//! let point = universe
//!     .define_type("Demo", "Point")
//!     .flags(TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
//!     .build();
//! universe.define_field(point, "X", int32).build();
//! universe.define_field(point, "Y", int32).build();
//!
//! assert_eq!(universe.instance_fields(point).len(), 2);
//! assert_eq!(universe.full_name(point), "Demo.Point");
//! ```

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, Ordering},
};

use dashmap::DashMap;

use crate::{
    metadata::{
        field::{FieldDef, FieldFlags},
        method::{MethodAttributes, MethodBody, MethodDef, MethodKind, Parameter},
        token::Token,
        types::{GenericInstance, PrimitiveKind, TypeDef, TypeFlags},
        FieldId, MemberRef, MethodId, TypeId,
    },
    Error, Result,
};

/// Maximum nesting of generic instantiations created through substitution.
const MAX_GENERIC_DEPTH: usize = 16;

/// The program model: an arena of definitions plus the module token tables.
pub struct Universe {
    types: boxcar::Vec<TypeDef>,
    methods: boxcar::Vec<MethodDef>,
    fields: boxcar::Vec<FieldDef>,
    members: DashMap<Token, MemberRef>,
    scopes: DashMap<TypeId, HashMap<Token, MemberRef>>,
    user_strings: DashMap<Token, String>,
    names: DashMap<String, TypeId>,
    instances: DashMap<(TypeId, Vec<TypeId>), TypeId>,
    arrays: DashMap<TypeId, TypeId>,
    by_refs: DashMap<TypeId, TypeId>,
    next_type_row: AtomicU32,
    next_field_row: AtomicU32,
    next_method_row: AtomicU32,
    next_member_ref_row: AtomicU32,
    next_type_spec_row: AtomicU32,
    next_string_offset: AtomicU32,
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

/// First row of the framework types, methods and fields. Program definitions with tokens
/// taken from a real module use low rows and never meet them.
const CORE_LIBRARY_ROW: u32 = 0x00F0_0000;

fn next_row(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::Relaxed)
}

/// Keeps `counter` ahead of an explicitly assigned row.
fn reserve_row(counter: &AtomicU32, token: Token) {
    counter.fetch_max(token.row() + 1, Ordering::Relaxed);
}

impl Universe {
    /// Creates an empty universe without any framework types.
    #[must_use]
    pub fn new() -> Self {
        Universe {
            types: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
            members: DashMap::new(),
            scopes: DashMap::new(),
            user_strings: DashMap::new(),
            names: DashMap::new(),
            instances: DashMap::new(),
            arrays: DashMap::new(),
            by_refs: DashMap::new(),
            next_type_row: AtomicU32::new(1),
            next_field_row: AtomicU32::new(1),
            next_method_row: AtomicU32::new(1),
            next_member_ref_row: AtomicU32::new(1),
            next_type_spec_row: AtomicU32::new(1),
            next_string_offset: AtomicU32::new(1),
        }
    }

    /// Creates a universe with the framework types the compiler relies on.
    ///
    /// This covers every type with a fixed remote token, the runtime types whose field order
    /// is dictated by the execution engine, delegates, the known generic value types and the
    /// generic interfaces used by the companion rules.
    #[must_use]
    pub fn with_core_library() -> Self {
        let universe = Self::new();
        universe.set_next_rows(CORE_LIBRARY_ROW);
        universe.install_core_library();
        universe.set_next_rows(1);
        universe
    }

    // ====================================================================================
    // Builders
    // ====================================================================================

    /// Starts the definition of a new type. Without further configuration it is a public
    /// class deriving from `System.Object`.
    pub fn define_type(&self, namespace: &str, name: &str) -> TypeBuilder<'_> {
        TypeBuilder {
            universe: self,
            namespace: namespace.to_string(),
            name: name.to_string(),
            flags: TypeFlags::empty(),
            base: None,
            no_base: false,
            interfaces: Vec::new(),
            primitive: None,
            explicit_size: None,
            generic_parameters: Vec::new(),
            token: None,
        }
    }

    /// Starts the definition of an ordinary method on `owner`.
    pub fn define_method(&self, owner: TypeId, name: &str) -> MethodBuilder<'_> {
        MethodBuilder {
            universe: self,
            owner,
            name: name.to_string(),
            kind: MethodKind::Method,
            attributes: MethodAttributes::empty(),
            parameters: Vec::new(),
            return_type: None,
            body: None,
            token: None,
        }
    }

    /// Starts the definition of an instance constructor on `owner`.
    pub fn define_constructor(&self, owner: TypeId) -> MethodBuilder<'_> {
        let mut builder = self.define_method(owner, ".ctor");
        builder.kind = MethodKind::Constructor;
        builder.attributes = MethodAttributes::SPECIAL_NAME;
        builder
    }

    /// Starts the definition of the type initializer of `owner`.
    pub fn define_static_constructor(&self, owner: TypeId) -> MethodBuilder<'_> {
        let mut builder = self.define_method(owner, ".cctor");
        builder.kind = MethodKind::StaticConstructor;
        builder.attributes = MethodAttributes::STATIC | MethodAttributes::SPECIAL_NAME;
        builder
    }

    /// Starts the definition of a field on `owner`.
    pub fn define_field(&self, owner: TypeId, name: &str, field_type: TypeId) -> FieldBuilder<'_> {
        FieldBuilder {
            universe: self,
            owner,
            name: name.to_string(),
            field_type,
            flags: FieldFlags::empty(),
            initial_value: None,
            token: None,
        }
    }

    /// Adds a string to the user string heap and returns its `ldstr` token.
    pub fn add_user_string(&self, text: &str) -> Token {
        let utf16_len = text.encode_utf16().count() as u32;
        // length prefix, UTF-16 payload and the trailing flag byte
        let offset = self
            .next_string_offset
            .fetch_add(1 + utf16_len * 2 + 1, Ordering::Relaxed);
        let token = Token::from_parts(Token::USER_STRING, offset);
        self.user_strings.insert(token, text.to_string());
        token
    }

    /// Keeps automatically allocated tokens of the same table clear of `token`. Use this
    /// before defining members out of order when some of them bring their own tokens.
    pub fn reserve_token(&self, token: Token) {
        match token.table() {
            Token::TYPE_DEF => reserve_row(&self.next_type_row, token),
            Token::METHOD_DEF => reserve_row(&self.next_method_row, token),
            Token::FIELD => reserve_row(&self.next_field_row, token),
            _ => {}
        }
    }

    /// Registers a string under a known `ldstr` token, as read from an existing module.
    /// Later [`Self::add_user_string`] calls allocate behind it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `token` is not a user string token.
    pub fn define_user_string(&self, token: Token, text: &str) -> Result<()> {
        if token.table() != Token::USER_STRING {
            return Err(malformed_error!("{token} is not a user string token"));
        }
        let utf16_len = text.encode_utf16().count() as u32;
        self.next_string_offset
            .fetch_max(token.row() + 1 + utf16_len * 2 + 1, Ordering::Relaxed);
        self.user_strings.insert(token, text.to_string());
        Ok(())
    }

    /// Returns the closed generic instance `definition<arguments>`, creating it on first use.
    ///
    /// The instance receives copies of the definition's fields and methods with every generic
    /// parameter substituted, and a token scope that maps the definition's member tokens to
    /// those copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `definition` is not an open generic definition or the
    /// argument count does not match, and [`Error::RecursionLimit`] for self-expanding
    /// definitions.
    pub fn instantiate(&self, definition: TypeId, arguments: &[TypeId]) -> Result<TypeId> {
        self.instantiate_depth(definition, arguments, 0)
    }

    /// Returns the single dimensional array type `element[]`, creating it on first use.
    pub fn array_of(&self, element: TypeId) -> TypeId {
        if let Some(existing) = self.arrays.get(&element) {
            return *existing;
        }

        let element_def = self.type_def(element);
        let mut def = TypeDef::new(
            Token::from_parts(Token::TYPE_SPEC, next_row(&self.next_type_spec_row)),
            element_def.namespace.clone(),
            format!("{}[]", element_def.name),
            TypeFlags::ARRAY | TypeFlags::SEALED,
        );
        def.element = Some(element);
        if let Some(array) = self.find_type("System.Array") {
            let _ = def.base.set(array);
        }

        let token = def.token;
        let id = TypeId(self.types.push(def));
        self.arrays.insert(element, id);
        self.register_type(id, token, true);
        id
    }

    /// Returns the managed pointer type `element&`, creating it on first use.
    pub fn by_ref_of(&self, element: TypeId) -> TypeId {
        if let Some(existing) = self.by_refs.get(&element) {
            return *existing;
        }

        let element_def = self.type_def(element);
        let mut def = TypeDef::new(
            Token::from_parts(Token::TYPE_SPEC, next_row(&self.next_type_spec_row)),
            element_def.namespace.clone(),
            format!("{}&", element_def.name),
            TypeFlags::BY_REF,
        );
        def.element = Some(element);

        let token = def.token;
        let id = TypeId(self.types.push(def));
        self.by_refs.insert(element, id);
        self.register_type(id, token, false);
        id
    }

    // ====================================================================================
    // Arena access
    // ====================================================================================

    /// Returns the definition of a type.
    #[must_use]
    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0]
    }

    /// Returns the definition of a method.
    #[must_use]
    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.0]
    }

    /// Returns the definition of a field.
    #[must_use]
    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.0]
    }

    /// Iterates over all types.
    pub fn types(&self) -> impl Iterator<Item = (TypeId, &TypeDef)> {
        self.types.iter().map(|(index, def)| (TypeId(index), def))
    }

    /// Number of types, including instances, arrays and generic parameters.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.count()
    }

    // ====================================================================================
    // Resolution
    // ====================================================================================

    /// Resolves an original metadata token found in the body of `context`.
    ///
    /// # Errors
    ///
    /// Fails only if closing an open reference over the context's generic arguments fails.
    pub fn resolve(&self, context: MethodId, token: Token) -> Result<Option<MemberRef>> {
        let owner = self.method(context).declaring_type;
        if let Some(scope) = self.scopes.get(&owner) {
            if let Some(member) = scope.value().get(&token) {
                return Ok(Some(*member));
            }
        }

        let Some(member) = self.members.get(&token).map(|m| *m) else {
            return Ok(None);
        };

        let arguments = match &self.type_def(owner).generic {
            Some(generic) => generic.arguments.clone(),
            None => return Ok(Some(member)),
        };

        match member {
            MemberRef::Type(ty) => Ok(Some(MemberRef::Type(self.substitute(ty, &arguments, 0)?))),
            MemberRef::Method(method) => {
                let declaring = self.method(method).declaring_type;
                let closed = self.substitute(declaring, &arguments, 0)?;
                if closed == declaring {
                    return Ok(Some(member));
                }
                Ok(self.counterpart_method(closed, method).map(MemberRef::Method))
            }
            MemberRef::Field(field) => {
                let declaring = self.field(field).declaring_type;
                let closed = self.substitute(declaring, &arguments, 0)?;
                if closed == declaring {
                    return Ok(Some(member));
                }
                Ok(self.counterpart_field(closed, field).map(MemberRef::Field))
            }
        }
    }

    /// Resolves a token in the module-wide table only.
    #[must_use]
    pub fn member(&self, token: Token) -> Option<MemberRef> {
        self.members.get(&token).map(|m| *m)
    }

    /// Returns the user string behind an `ldstr` token.
    #[must_use]
    pub fn user_string(&self, token: Token) -> Option<String> {
        self.user_strings.get(&token).map(|s| s.value().clone())
    }

    /// Finds a type by its full name (``System.Collections.Generic.List`1``).
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<TypeId> {
        self.names.get(full_name).map(|id| *id)
    }

    /// Finds an already created closed generic instance.
    #[must_use]
    pub fn find_instance(&self, definition: TypeId, arguments: &[TypeId]) -> Option<TypeId> {
        self.instances
            .get(&(definition, arguments.to_vec()))
            .map(|id| *id)
    }

    /// Finds the first method declared on `ty` with the given name.
    #[must_use]
    pub fn find_method(&self, ty: TypeId, name: &str) -> Option<MethodId> {
        self.type_def(ty)
            .methods()
            .into_iter()
            .find(|m| self.method(*m).name == name)
    }

    /// Finds the field declared on `ty` with the given name.
    #[must_use]
    pub fn find_field(&self, ty: TypeId, name: &str) -> Option<FieldId> {
        self.type_def(ty)
            .fields()
            .into_iter()
            .find(|f| self.field(*f).name == name)
    }

    // ====================================================================================
    // Type queries
    // ====================================================================================

    /// Full name of a type.
    #[must_use]
    pub fn full_name(&self, ty: TypeId) -> String {
        self.type_def(ty).full_name()
    }

    /// Human readable signature, e.g. `System.Void Demo.Program::Main(System.String[])`.
    #[must_use]
    pub fn method_signature(&self, method: MethodId) -> String {
        let def = self.method(method);
        let return_type = def
            .return_type
            .map_or_else(|| "System.Void".to_string(), |t| self.full_name(t));
        let parameters: Vec<String> = def
            .parameters
            .iter()
            .map(|p| self.full_name(p.param_type))
            .collect();
        format!(
            "{} {}::{}({})",
            return_type,
            self.full_name(def.declaring_type),
            def.name,
            parameters.join(", ")
        )
    }

    /// The base type of `ty`.
    #[must_use]
    pub fn base_type(&self, ty: TypeId) -> Option<TypeId> {
        self.type_def(ty).base()
    }

    /// Number of base types between `ty` and the root of its hierarchy.
    #[must_use]
    pub fn inheritance_depth(&self, ty: TypeId) -> usize {
        let mut depth = 0;
        let mut current = self.base_type(ty);
        while let Some(base) = current {
            depth += 1;
            current = self.base_type(base);
        }
        depth
    }

    /// Returns true if `ty` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_subclass_of(&self, ty: TypeId, ancestor: TypeId) -> bool {
        let mut current = Some(ty);
        while let Some(candidate) = current {
            if candidate == ancestor {
                return true;
            }
            current = self.base_type(candidate);
        }
        false
    }

    /// Returns true if a value of type `source` can be stored in a location of type `target`.
    #[must_use]
    pub fn is_assignable_from(&self, target: TypeId, source: TypeId) -> bool {
        if self.is_subclass_of(source, target) {
            return true;
        }
        self.type_def(target).is_interface() && self.all_interfaces(source).contains(&target)
    }

    /// All interfaces implemented by `ty`, including inherited ones, in discovery order.
    #[must_use]
    pub fn all_interfaces(&self, ty: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut pending = Vec::new();

        let mut current = Some(ty);
        while let Some(candidate) = current {
            pending.extend(self.type_def(candidate).interfaces());
            current = self.base_type(candidate);
        }

        let mut index = 0;
        while index < pending.len() {
            let interface = pending[index];
            index += 1;
            if !result.contains(&interface) {
                result.push(interface);
                pending.extend(self.type_def(interface).interfaces());
            }
        }
        result
    }

    /// Returns true for reference types. Generic parameters count as references.
    #[must_use]
    pub fn is_reference_type(&self, ty: TypeId) -> bool {
        !self.type_def(ty).is_value_type()
    }

    /// The open definition of a closed generic instance.
    #[must_use]
    pub fn generic_definition(&self, ty: TypeId) -> Option<TypeId> {
        self.type_def(ty).generic.as_ref().map(|g| g.definition)
    }

    /// The type arguments of a closed generic instance, empty otherwise.
    #[must_use]
    pub fn generic_arguments(&self, ty: TypeId) -> Vec<TypeId> {
        self.type_def(ty)
            .generic
            .as_ref()
            .map(|g| g.arguments.clone())
            .unwrap_or_default()
    }

    /// Returns true if `ty` is or mentions a generic parameter.
    #[must_use]
    pub fn contains_generic_parameters(&self, ty: TypeId) -> bool {
        let def = self.type_def(ty);
        if def.is_generic_parameter() {
            return true;
        }
        if let Some(generic) = &def.generic {
            if generic
                .arguments
                .iter()
                .any(|a| self.contains_generic_parameters(*a))
            {
                return true;
            }
        }
        def.element
            .is_some_and(|element| self.contains_generic_parameters(element))
    }

    /// Methods declared on `ty`.
    #[must_use]
    pub fn declared_methods(&self, ty: TypeId) -> Vec<MethodId> {
        self.type_def(ty).methods()
    }

    /// Instance constructors declared on `ty`.
    #[must_use]
    pub fn constructors(&self, ty: TypeId) -> Vec<MethodId> {
        self.declared_methods(ty)
            .into_iter()
            .filter(|m| self.method(*m).kind == MethodKind::Constructor)
            .collect()
    }

    /// The type initializer (`.cctor`) of `ty`.
    #[must_use]
    pub fn type_initializer(&self, ty: TypeId) -> Option<MethodId> {
        self.declared_methods(ty)
            .into_iter()
            .find(|m| self.method(*m).kind == MethodKind::StaticConstructor)
    }

    /// Declared instance fields with storage, in declaration order.
    #[must_use]
    pub fn instance_fields(&self, ty: TypeId) -> Vec<FieldId> {
        self.type_def(ty)
            .fields()
            .into_iter()
            .filter(|f| {
                let field = self.field(*f);
                !field.is_static() && field.has_storage()
            })
            .collect()
    }

    /// Declared static fields with storage, in declaration order.
    #[must_use]
    pub fn static_fields(&self, ty: TypeId) -> Vec<FieldId> {
        self.type_def(ty)
            .fields()
            .into_iter()
            .filter(|f| {
                let field = self.field(*f);
                field.is_static() && field.has_storage()
            })
            .collect()
    }

    /// Returns the IL body of `method`, following instantiated methods to their definition.
    #[must_use]
    pub fn method_body(&self, method: MethodId) -> Option<&MethodBody> {
        let def = self.method(method);
        match (&def.body, def.definition) {
            (Some(body), _) => Some(body),
            (None, Some(definition)) => self.method_body(definition),
            (None, None) => None,
        }
    }

    /// The member of `closed` that was instantiated from the same definition as `method`.
    #[must_use]
    pub fn counterpart_method(&self, closed: TypeId, method: MethodId) -> Option<MethodId> {
        let origin = self.method(method).definition.unwrap_or(method);
        self.declared_methods(closed).into_iter().find(|m| {
            *m == origin || self.method(*m).definition == Some(origin)
        })
    }

    /// The field of `closed` that was instantiated from the same definition as `field`.
    #[must_use]
    pub fn counterpart_field(&self, closed: TypeId, field: FieldId) -> Option<FieldId> {
        let origin = self.field(field).definition.unwrap_or(field);
        self.type_def(closed)
            .fields()
            .into_iter()
            .find(|f| *f == origin || self.field(*f).definition == Some(origin))
    }

    // ====================================================================================
    // Internals
    // ====================================================================================

    fn register_type(&self, id: TypeId, token: Token, named: bool) {
        self.members.insert(token, MemberRef::Type(id));
        if named {
            self.names.insert(self.type_def(id).full_name(), id);
        }
    }

    fn default_base(&self, flags: TypeFlags) -> Option<TypeId> {
        if flags.intersects(TypeFlags::INTERFACE | TypeFlags::GENERIC_PARAMETER) {
            None
        } else if flags.contains(TypeFlags::ENUM) {
            self.find_type("System.Enum")
        } else if flags.contains(TypeFlags::VALUE_TYPE) {
            self.find_type("System.ValueType")
        } else {
            self.find_type("System.Object")
        }
    }

    fn instantiate_depth(
        &self,
        definition: TypeId,
        arguments: &[TypeId],
        depth: usize,
    ) -> Result<TypeId> {
        if depth > MAX_GENERIC_DEPTH {
            return Err(Error::RecursionLimit(MAX_GENERIC_DEPTH));
        }

        let key = (definition, arguments.to_vec());
        if let Some(existing) = self.instances.get(&key) {
            return Ok(*existing);
        }

        let open = self.type_def(definition);
        if !open.is_generic_definition() {
            return Err(malformed_error!(
                "{} is not a generic type definition",
                open.full_name()
            ));
        }

        let parameters = open.generic_parameters();
        if parameters.len() != arguments.len() {
            return Err(malformed_error!(
                "{} expects {} type arguments, {} given",
                open.full_name(),
                parameters.len(),
                arguments.len()
            ));
        }

        let argument_names: Vec<String> = arguments.iter().map(|a| self.full_name(*a)).collect();
        let mut def = TypeDef::new(
            Token::from_parts(Token::TYPE_SPEC, next_row(&self.next_type_spec_row)),
            open.namespace.clone(),
            format!("{}[{}]", open.name, argument_names.join(",")),
            open.flags - TypeFlags::GENERIC_DEFINITION,
        );
        def.explicit_size = open.explicit_size;
        def.generic = Some(GenericInstance {
            definition,
            arguments: arguments.to_vec(),
        });

        let token = def.token;
        let id = TypeId(self.types.push(def));
        self.instances.insert(key, id);
        self.register_type(id, token, true);

        let mut scope = HashMap::new();
        scope.insert(open.token, MemberRef::Type(id));
        for (parameter, argument) in parameters.iter().zip(arguments) {
            scope.insert(self.type_def(*parameter).token, MemberRef::Type(*argument));
        }

        let instance = self.type_def(id);
        if let Some(base) = open.base() {
            let _ = instance
                .base
                .set(self.substitute(base, arguments, depth + 1)?);
        }
        for interface in open.interfaces() {
            instance
                .interfaces
                .push(self.substitute(interface, arguments, depth + 1)?);
        }

        for field_id in open.fields() {
            let field = self.field(field_id);
            let copy = FieldDef {
                token: Token::from_parts(Token::MEMBER_REF, next_row(&self.next_member_ref_row)),
                declaring_type: id,
                name: field.name.clone(),
                field_type: self.substitute(field.field_type, arguments, depth + 1)?,
                flags: field.flags,
                initial_value: field.initial_value.clone(),
                definition: Some(field_id),
            };
            let copy_token = copy.token;
            let copy_id = FieldId(self.fields.push(copy));
            instance.fields.push(copy_id);
            self.members.insert(copy_token, MemberRef::Field(copy_id));
            scope.insert(field.token, MemberRef::Field(copy_id));
        }

        for method_id in open.methods() {
            let method = self.method(method_id);
            let mut parameters = Vec::with_capacity(method.parameters.len());
            for parameter in &method.parameters {
                parameters.push(Parameter {
                    name: parameter.name.clone(),
                    param_type: self.substitute(parameter.param_type, arguments, depth + 1)?,
                });
            }
            let return_type = match method.return_type {
                Some(ty) => Some(self.substitute(ty, arguments, depth + 1)?),
                None => None,
            };
            let copy = MethodDef {
                token: Token::from_parts(Token::MEMBER_REF, next_row(&self.next_member_ref_row)),
                declaring_type: id,
                name: method.name.clone(),
                kind: method.kind,
                attributes: method.attributes,
                parameters,
                return_type,
                body: None,
                definition: Some(method_id),
            };
            let copy_token = copy.token;
            let copy_id = MethodId(self.methods.push(copy));
            instance.methods.push(copy_id);
            self.members.insert(copy_token, MemberRef::Method(copy_id));
            scope.insert(method.token, MemberRef::Method(copy_id));
        }

        self.scopes.insert(id, scope);
        Ok(id)
    }

    fn substitute(&self, ty: TypeId, arguments: &[TypeId], depth: usize) -> Result<TypeId> {
        if depth > MAX_GENERIC_DEPTH {
            return Err(Error::RecursionLimit(MAX_GENERIC_DEPTH));
        }

        let def = self.type_def(ty);
        if let Some(position) = def.generic_position {
            return arguments.get(position).copied().ok_or_else(|| {
                malformed_error!(
                    "Generic parameter {} has no argument at position {}",
                    def.name,
                    position
                )
            });
        }

        if let Some(generic) = &def.generic {
            if !self.contains_generic_parameters(ty) {
                return Ok(ty);
            }
            let mut closed = Vec::with_capacity(generic.arguments.len());
            for argument in &generic.arguments {
                closed.push(self.substitute(*argument, arguments, depth + 1)?);
            }
            return self.instantiate_depth(generic.definition, &closed, depth + 1);
        }

        if let Some(element) = def.element {
            if self.contains_generic_parameters(element) {
                let closed = self.substitute(element, arguments, depth + 1)?;
                return Ok(if def.is_array() {
                    self.array_of(closed)
                } else {
                    self.by_ref_of(closed)
                });
            }
        }

        Ok(ty)
    }

    fn set_next_rows(&self, row: u32) {
        for counter in [&self.next_type_row, &self.next_field_row, &self.next_method_row] {
            counter.store(row, Ordering::Relaxed);
        }
    }

    fn install_core_library(&self) {
        let object = self.define_type("System", "Object").build();
        let value_type = self
            .define_type("System", "ValueType")
            .flags(TypeFlags::ABSTRACT)
            .build();
        self.define_type("System", "Enum")
            .flags(TypeFlags::ABSTRACT)
            .base(value_type)
            .build();

        let mut primitives = HashMap::new();
        for kind in [
            PrimitiveKind::Boolean,
            PrimitiveKind::Char,
            PrimitiveKind::SByte,
            PrimitiveKind::Byte,
            PrimitiveKind::Int16,
            PrimitiveKind::UInt16,
            PrimitiveKind::Int32,
            PrimitiveKind::UInt32,
            PrimitiveKind::Int64,
            PrimitiveKind::UInt64,
            PrimitiveKind::Single,
            PrimitiveKind::Double,
            PrimitiveKind::IntPtr,
            PrimitiveKind::UIntPtr,
        ] {
            let id = self
                .define_type("System", &kind.to_string())
                .flags(TypeFlags::VALUE_TYPE | TypeFlags::SEALED)
                .primitive(kind)
                .build();
            primitives.insert(kind, id);
        }
        let boolean = primitives[&PrimitiveKind::Boolean];
        let char_type = primitives[&PrimitiveKind::Char];
        let int32 = primitives[&PrimitiveKind::Int32];
        let int_ptr = primitives[&PrimitiveKind::IntPtr];

        let string = self
            .define_type("System", "String")
            .flags(TypeFlags::SEALED)
            .build();
        self.define_field(string, "_stringLength", int32)
            .flags(FieldFlags::PRIVATE)
            .build();
        self.define_field(string, "_firstChar", char_type)
            .flags(FieldFlags::PRIVATE)
            .build();

        self.define_constructor(object)
            .body(MethodBody::new(vec![0x2A], 1))
            .build();
        // ldarg.0; ldarg.1; ceq; ret
        self.define_method(object, "Equals")
            .attributes(MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT)
            .param("obj", object)
            .returns(boolean)
            .body(MethodBody::new(vec![0x02, 0x03, 0xFE, 0x01, 0x2A], 2))
            .build();
        self.define_method(object, "GetHashCode")
            .attributes(MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT)
            .returns(int32)
            .body(MethodBody::new(vec![0x16, 0x2A], 1))
            .build();
        self.define_method(object, "ToString")
            .attributes(MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT)
            .returns(string)
            .body(MethodBody::new(vec![0x14, 0x2A], 1))
            .build();

        self.define_type("System", "Array")
            .flags(TypeFlags::ABSTRACT)
            .build();
        let type_type = self
            .define_type("System", "Type")
            .flags(TypeFlags::ABSTRACT)
            .build();
        let type_info = self
            .define_type("System.Reflection", "TypeInfo")
            .flags(TypeFlags::ABSTRACT)
            .base(type_type)
            .build();
        self.define_type("System", "RuntimeType")
            .flags(TypeFlags::SEALED)
            .base(type_info)
            .build();

        let exception = self.define_type("System", "Exception").build();
        let message = self
            .define_field(exception, "_message", string)
            .flags(FieldFlags::PRIVATE)
            .build();
        self.define_field(exception, "_innerException", exception)
            .flags(FieldFlags::PRIVATE)
            .build();
        self.define_field(exception, "_HResult", int32)
            .flags(FieldFlags::PRIVATE)
            .build();
        self.define_constructor(exception)
            .body(MethodBody::new(vec![0x2A], 1))
            .build();
        let message_token = self.field(message).token.value().to_le_bytes();
        self.define_constructor(exception)
            .param("message", string)
            .body(MethodBody::new(
                [
                    &[0x02, 0x03, 0x7D][..],
                    &message_token[..],
                    &[0x2A][..],
                ]
                .concat(),
                2,
            ))
            .build();
        self.define_method(exception, "get_Message")
            .attributes(MethodAttributes::VIRTUAL | MethodAttributes::SPECIAL_NAME)
            .returns(string)
            .body(MethodBody::new(
                [&[0x02, 0x7B][..], &message_token[..], &[0x2A][..]].concat(),
                1,
            ))
            .build();
        self.define_type("System", "SystemException")
            .base(exception)
            .build();

        let delegate = self
            .define_type("System", "Delegate")
            .flags(TypeFlags::ABSTRACT)
            .build();
        let target = self.define_field(delegate, "_target", object).build();
        self.define_field(delegate, "_methodBase", object).build();
        let method_ptr = self.define_field(delegate, "_methodPtr", int_ptr).build();
        self.define_field(delegate, "_methodPtrAux", int_ptr).build();

        let multicast = self
            .define_type("System", "MulticastDelegate")
            .flags(TypeFlags::ABSTRACT)
            .base(delegate)
            .build();
        self.define_field(multicast, "_invocationList", object)
            .build();
        self.define_field(multicast, "_invocationCount", int_ptr)
            .build();
        // ldarg.0; ldarg.1; stfld _target; ldarg.0; ldarg.2; stfld _methodPtr; ret
        let target_token = self.field(target).token.value().to_le_bytes();
        let method_ptr_token = self.field(method_ptr).token.value().to_le_bytes();
        self.define_method(multicast, "CtorClosedStatic")
            .attributes(MethodAttributes::PRIVATE)
            .param("target", object)
            .param("methodPtr", int_ptr)
            .body(MethodBody::new(
                [
                    &[0x02, 0x03, 0x7D][..],
                    &target_token[..],
                    &[0x02, 0x04, 0x7D][..],
                    &method_ptr_token[..],
                    &[0x2A][..],
                ]
                .concat(),
                2,
            ))
            .build();

        let generic_value = TypeFlags::VALUE_TYPE | TypeFlags::SEALED | TypeFlags::GENERIC_DEFINITION;

        let by_reference = self
            .define_type("System", "ByReference`1")
            .flags(generic_value)
            .generic_parameters(&["T"])
            .build();
        let t = self.type_def(by_reference).generic_parameters()[0];
        self.define_field(by_reference, "_value", int_ptr)
            .flags(FieldFlags::PRIVATE)
            .build();
        self.define_constructor(by_reference)
            .attributes(MethodAttributes::SPECIAL_NAME | MethodAttributes::INTRINSIC)
            .param("value", self.by_ref_of(t))
            .build();
        self.define_method(by_reference, "get_Value")
            .attributes(MethodAttributes::SPECIAL_NAME | MethodAttributes::INTRINSIC)
            .returns(self.by_ref_of(t))
            .build();

        let nullable = self
            .define_type("System", "Nullable`1")
            .flags(generic_value)
            .generic_parameters(&["T"])
            .build();
        let t = self.type_def(nullable).generic_parameters()[0];
        self.define_field(nullable, "hasValue", boolean).build();
        let value = self.define_field(nullable, "value", t).build();
        let value_token = self.field(value).token.value().to_le_bytes();
        self.define_method(nullable, "get_Value")
            .attributes(MethodAttributes::SPECIAL_NAME)
            .returns(t)
            .body(MethodBody::new(
                [&[0x02, 0x7B][..], &value_token[..], &[0x2A][..]].concat(),
                1,
            ))
            .build();

        let span = self
            .define_type("System", "Span`1")
            .flags(generic_value)
            .generic_parameters(&["T"])
            .build();
        self.define_field(span, "_pointer", int_ptr).build();
        self.define_field(span, "_length", int32).build();

        let interface = TypeFlags::INTERFACE | TypeFlags::ABSTRACT | TypeFlags::GENERIC_DEFINITION;
        let abstract_virtual =
            MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL | MethodAttributes::NEW_SLOT;

        let enumerator = self
            .define_type("System.Collections.Generic", "IEnumerator`1")
            .flags(interface)
            .generic_parameters(&["T"])
            .build();
        let t = self.type_def(enumerator).generic_parameters()[0];
        self.define_method(enumerator, "get_Current")
            .attributes(abstract_virtual | MethodAttributes::SPECIAL_NAME)
            .returns(t)
            .build();
        self.define_method(enumerator, "MoveNext")
            .attributes(abstract_virtual)
            .returns(boolean)
            .build();

        let enumerable = self
            .define_type("System.Collections.Generic", "IEnumerable`1")
            .flags(interface)
            .generic_parameters(&["T"])
            .build();
        self.define_method(enumerable, "GetEnumerator")
            .attributes(abstract_virtual)
            .returns(enumerator)
            .build();

        let equatable = self
            .define_type("System", "IEquatable`1")
            .flags(interface)
            .generic_parameters(&["T"])
            .build();
        let t = self.type_def(equatable).generic_parameters()[0];
        self.define_method(equatable, "Equals")
            .attributes(abstract_virtual)
            .param("other", t)
            .returns(boolean)
            .build();

        let comparable = self
            .define_type("System", "IComparable`1")
            .flags(interface)
            .generic_parameters(&["T"])
            .build();
        let t = self.type_def(comparable).generic_parameters()[0];
        self.define_method(comparable, "CompareTo")
            .attributes(abstract_virtual)
            .param("other", t)
            .returns(int32)
            .build();
    }
}

/// Fluent builder for [`TypeDef`]s, created by [`Universe::define_type`].
pub struct TypeBuilder<'a> {
    universe: &'a Universe,
    namespace: String,
    name: String,
    flags: TypeFlags,
    base: Option<TypeId>,
    no_base: bool,
    interfaces: Vec<TypeId>,
    primitive: Option<PrimitiveKind>,
    explicit_size: Option<u32>,
    generic_parameters: Vec<String>,
    token: Option<Token>,
}

impl TypeBuilder<'_> {
    /// Sets the shape flags.
    #[must_use]
    pub fn flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets an explicit base type.
    #[must_use]
    pub fn base(mut self, base: TypeId) -> Self {
        self.base = Some(base);
        self
    }

    /// Declares that the type has no base type at all.
    #[must_use]
    pub fn no_base(mut self) -> Self {
        self.no_base = true;
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn interface(mut self, interface: TypeId) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Marks the type as a built-in primitive.
    #[must_use]
    pub fn primitive(mut self, kind: PrimitiveKind) -> Self {
        self.primitive = Some(kind);
        self
    }

    /// Sets an explicit struct size.
    #[must_use]
    pub fn explicit_size(mut self, size: u32) -> Self {
        self.explicit_size = Some(size);
        self
    }

    /// Declares generic parameters; the type becomes an open generic definition.
    #[must_use]
    pub fn generic_parameters(mut self, names: &[&str]) -> Self {
        self.generic_parameters = names.iter().map(|n| (*n).to_string()).collect();
        self.flags |= TypeFlags::GENERIC_DEFINITION;
        self
    }

    /// Uses the given original token instead of allocating one.
    #[must_use]
    pub fn token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Registers the type and returns its id.
    pub fn build(self) -> TypeId {
        let universe = self.universe;
        let token = match self.token {
            Some(token) => {
                reserve_row(&universe.next_type_row, token);
                token
            }
            None => Token::from_parts(Token::TYPE_DEF, next_row(&universe.next_type_row)),
        };
        let base = if self.no_base {
            None
        } else {
            self.base.or_else(|| universe.default_base(self.flags))
        };

        let mut def = TypeDef::new(token, self.namespace, self.name, self.flags);
        def.primitive = self.primitive;
        def.explicit_size = self.explicit_size;
        if let Some(base) = base {
            let _ = def.base.set(base);
        }
        for interface in self.interfaces {
            def.interfaces.push(interface);
        }

        let id = TypeId(universe.types.push(def));
        universe.register_type(id, token, true);

        for (position, name) in self.generic_parameters.into_iter().enumerate() {
            let mut parameter = TypeDef::new(
                Token::from_parts(Token::TYPE_SPEC, next_row(&universe.next_type_spec_row)),
                String::new(),
                name,
                TypeFlags::GENERIC_PARAMETER,
            );
            parameter.generic_position = Some(position);
            let parameter_token = parameter.token;
            let parameter_id = TypeId(universe.types.push(parameter));
            universe.register_type(parameter_id, parameter_token, false);
            universe.type_def(id).generic_params.push(parameter_id);
        }
        id
    }
}

/// Fluent builder for [`MethodDef`]s, created by [`Universe::define_method`] and friends.
pub struct MethodBuilder<'a> {
    universe: &'a Universe,
    owner: TypeId,
    name: String,
    kind: MethodKind,
    attributes: MethodAttributes,
    parameters: Vec<Parameter>,
    return_type: Option<TypeId>,
    body: Option<MethodBody>,
    token: Option<Token>,
}

impl MethodBuilder<'_> {
    /// Adds attributes.
    #[must_use]
    pub fn attributes(mut self, attributes: MethodAttributes) -> Self {
        self.attributes |= attributes;
        self
    }

    /// Appends a parameter.
    #[must_use]
    pub fn param(mut self, name: &str, param_type: TypeId) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            param_type,
        });
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, return_type: TypeId) -> Self {
        self.return_type = Some(return_type);
        self
    }

    /// Sets the IL body.
    #[must_use]
    pub fn body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    /// Uses the given original token instead of allocating one.
    #[must_use]
    pub fn token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Registers the method and returns its id.
    pub fn build(self) -> MethodId {
        let universe = self.universe;
        let token = match self.token {
            Some(token) => {
                reserve_row(&universe.next_method_row, token);
                token
            }
            None => Token::from_parts(Token::METHOD_DEF, next_row(&universe.next_method_row)),
        };
        let def = MethodDef {
            token,
            declaring_type: self.owner,
            name: self.name,
            kind: self.kind,
            attributes: self.attributes,
            parameters: self.parameters,
            return_type: self.return_type,
            body: self.body,
            definition: None,
        };
        let id = MethodId(universe.methods.push(def));
        universe.type_def(self.owner).methods.push(id);
        universe.members.insert(token, MemberRef::Method(id));
        id
    }
}

/// Fluent builder for [`FieldDef`]s, created by [`Universe::define_field`].
pub struct FieldBuilder<'a> {
    universe: &'a Universe,
    owner: TypeId,
    name: String,
    field_type: TypeId,
    flags: FieldFlags,
    initial_value: Option<Vec<u8>>,
    token: Option<Token>,
}

impl FieldBuilder<'_> {
    /// Adds attributes.
    #[must_use]
    pub fn flags(mut self, flags: FieldFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Attaches an initial data blob; the field becomes a static `HAS_RVA` field.
    #[must_use]
    pub fn initial_value(mut self, data: Vec<u8>) -> Self {
        self.flags |= FieldFlags::HAS_RVA | FieldFlags::STATIC;
        self.initial_value = Some(data);
        self
    }

    /// Uses the given original token instead of allocating one.
    #[must_use]
    pub fn token(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    /// Registers the field and returns its id.
    pub fn build(self) -> FieldId {
        let universe = self.universe;
        let token = match self.token {
            Some(token) => {
                reserve_row(&universe.next_field_row, token);
                token
            }
            None => Token::from_parts(Token::FIELD, next_row(&universe.next_field_row)),
        };
        let def = FieldDef {
            token,
            declaring_type: self.owner,
            name: self.name,
            field_type: self.field_type,
            flags: self.flags,
            initial_value: self.initial_value,
            definition: None,
        };
        let id = FieldId(universe.fields.push(def));
        universe.type_def(self.owner).fields.push(id);
        universe.members.insert(token, MemberRef::Field(id));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_library_types() {
        let universe = Universe::with_core_library();
        for name in [
            "System.Object",
            "System.ValueType",
            "System.String",
            "System.Exception",
            "System.MulticastDelegate",
            "System.Nullable`1",
            "System.Int32",
            "System.RuntimeType",
        ] {
            assert!(universe.find_type(name).is_some(), "{name} missing");
        }

        let int32 = universe.find_type("System.Int32").unwrap();
        let value_type = universe.find_type("System.ValueType").unwrap();
        let object = universe.find_type("System.Object").unwrap();
        assert_eq!(universe.base_type(int32), Some(value_type));
        assert_eq!(universe.base_type(object), None);
        assert_eq!(universe.inheritance_depth(int32), 2);
    }

    #[test]
    fn instantiate_is_idempotent_and_substitutes() {
        let universe = Universe::with_core_library();
        let nullable = universe.find_type("System.Nullable`1").unwrap();
        let int32 = universe.find_type("System.Int32").unwrap();

        let first = universe.instantiate(nullable, &[int32]).unwrap();
        let second = universe.instantiate(nullable, &[int32]).unwrap();
        assert_eq!(first, second);
        assert_eq!(universe.find_instance(nullable, &[int32]), Some(first));
        assert_eq!(universe.full_name(first), "System.Nullable`1[System.Int32]");

        let value = universe.find_field(first, "value").unwrap();
        assert_eq!(universe.field(value).field_type, int32);
        assert!(!universe.type_def(first).is_generic_definition());
        assert!(universe.type_def(first).is_value_type());
    }

    #[test]
    fn resolve_uses_instance_scope() {
        let universe = Universe::with_core_library();
        let nullable = universe.find_type("System.Nullable`1").unwrap();
        let int32 = universe.find_type("System.Int32").unwrap();
        let open_value = universe.find_field(nullable, "value").unwrap();
        let open_token = universe.field(open_value).token;

        let closed = universe.instantiate(nullable, &[int32]).unwrap();
        let getter = universe.find_method(closed, "get_Value").unwrap();

        let resolved = universe.resolve(getter, open_token).unwrap();
        let closed_value = universe.find_field(closed, "value").unwrap();
        assert_eq!(resolved, Some(MemberRef::Field(closed_value)));

        // The body is shared with the definition
        assert!(universe.method_body(getter).is_some());
        assert_eq!(universe.method(getter).return_type, Some(int32));
    }

    #[test]
    fn assignability_and_interfaces() {
        let universe = Universe::with_core_library();
        let equatable = universe.find_type("System.IEquatable`1").unwrap();

        let shape = universe.define_type("Demo", "Shape").build();
        let equatable_shape = universe.instantiate(equatable, &[shape]).unwrap();
        let circle = universe
            .define_type("Demo", "Circle")
            .base(shape)
            .build();
        let special = universe
            .define_type("Demo", "SpecialCircle")
            .base(circle)
            .interface(equatable_shape)
            .build();

        assert!(universe.is_assignable_from(shape, special));
        assert!(universe.is_assignable_from(equatable_shape, special));
        assert!(!universe.is_assignable_from(equatable_shape, circle));
        assert!(!universe.is_assignable_from(special, shape));
        assert_eq!(universe.all_interfaces(special), vec![equatable_shape]);
    }

    #[test]
    fn user_strings_and_arrays() {
        let universe = Universe::with_core_library();
        let hi = universe.add_user_string("Hi");
        let there = universe.add_user_string("there");
        assert_ne!(hi, there);
        assert_eq!(hi.table(), Token::USER_STRING);
        assert_eq!(universe.user_string(hi).as_deref(), Some("Hi"));

        let byte = universe.find_type("System.Byte").unwrap();
        let array = universe.array_of(byte);
        assert_eq!(universe.array_of(byte), array);
        assert_eq!(universe.full_name(array), "System.Byte[]");
        assert_eq!(universe.type_def(array).element, Some(byte));
        assert_eq!(universe.base_type(array), universe.find_type("System.Array"));
    }

    #[test]
    fn predefined_user_strings() {
        let universe = Universe::new();
        let token = Token::from_parts(Token::USER_STRING, 0x20);
        universe.define_user_string(token, "Led").unwrap();
        assert_eq!(universe.user_string(token).as_deref(), Some("Led"));
        // "Led": length byte, six payload bytes and the flag byte
        let next = universe.add_user_string("next");
        assert_eq!(next.row(), 0x20 + 8);
        assert!(universe
            .define_user_string(Token::from_parts(Token::FIELD, 1), "x")
            .is_err());
    }

    #[test]
    fn explicit_tokens_stay_clear_of_allocated_ones() {
        let universe = Universe::with_core_library();
        universe.reserve_token(Token(0x0200_0005));
        let first = universe.define_type("Demo", "First").build();
        assert_eq!(universe.type_def(first).token, Token(0x0200_0006));

        let program = universe
            .define_type("Demo", "Program")
            .token(Token(0x0200_0010))
            .build();
        let main = universe
            .define_method(program, "Main")
            .token(Token(0x0600_0001))
            .build();
        let helper = universe.define_method(program, "Helper").build();
        assert_eq!(universe.member(Token(0x0600_0001)), Some(MemberRef::Method(main)));
        assert_eq!(universe.method(helper).token, Token(0x0600_0002));
        let next = universe.define_type("Demo", "Next").build();
        assert_eq!(universe.type_def(next).token, Token(0x0200_0011));
    }

    #[test]
    fn method_signature_format() {
        let universe = Universe::with_core_library();
        let string = universe.find_type("System.String").unwrap();
        let program = universe.define_type("Demo", "Program").build();
        let main = universe
            .define_method(program, "Main")
            .attributes(MethodAttributes::STATIC)
            .param("args", universe.array_of(string))
            .build();

        assert_eq!(
            universe.method_signature(main),
            "System.Void Demo.Program::Main(System.String[])"
        );
        assert_eq!(universe.method(main).argument_count(), 1);
    }
}
