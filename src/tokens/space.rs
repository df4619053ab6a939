//! Bidirectional registry of remote tokens.

use std::collections::{BTreeMap, HashMap};

use crate::{
    metadata::{universe::Universe, FieldId, MethodId, TypeId},
    tokens::{
        KnownGenericToken, KnownTypeToken, RemoteToken, GENERIC_TOKEN_STEP,
        LARGEST_KNOWN_TYPE_TOKEN, MAX_METHODS, STRING_TOKEN_BASE, STRING_TOKEN_STEP,
        FIRST_GENERIC_TOKEN,
    },
    Error, Result,
};

/// Highest string slot offset that still leaves room for a 16 bit length.
const LAST_STRING_SLOT: u32 = 0x0FFF_0000;

/// The entity behind a remote token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// A type
    Type(TypeId),
    /// A method
    Method(MethodId),
    /// A field
    Field(FieldId),
    /// A string constant
    String(String),
}

/// A string constant and its device encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringConstant {
    /// Assigned token
    pub token: RemoteToken,
    /// The original text
    pub text: String,
    /// UTF-8 bytes as stored on the device
    pub encoded: Vec<u8>,
}

/// An entry of the auxiliary special-type list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecialType {
    /// The token assigned to the closed generic
    pub master: RemoteToken,
    /// Token of the open definition
    pub definition: RemoteToken,
    /// Tokens of the type arguments
    pub arguments: Vec<RemoteToken>,
}

impl SpecialType {
    /// Flattened wire form: `(length, master, definition, arguments...)` where `length` counts
    /// every element including itself.
    #[must_use]
    pub fn flatten(&self) -> Vec<u32> {
        let mut result = Vec::with_capacity(self.arguments.len() + 3);
        result.push((self.arguments.len() + 3) as u32);
        result.push(self.master.value());
        result.push(self.definition.value());
        result.extend(self.arguments.iter().map(RemoteToken::value));
        result
    }
}

/// The remote token space of one compilation session.
///
/// Tokens are assigned lazily on first request and never change afterwards. The space knows
/// nothing about replacements: callers are expected to redirect an entity to its replacement
/// before asking for a token (see [`crate::execution::ExecutionSet`]).
///
/// # Examples
///
/// ```rust
/// use ilforge::{metadata::universe::Universe, tokens::TokenSpace};
///
/// let universe = Universe::with_core_library();
/// let int32 = universe.find_type("System.Int32").unwrap();
/// let nullable = universe.find_type("System.Nullable`1").unwrap();
/// let nullable_int = universe.instantiate(nullable, &[int32])?;
///
/// let mut space = TokenSpace::new();
/// let definition = space.get_or_add_type_token(&universe, nullable)?;
/// let argument = space.get_or_add_type_token(&universe, int32)?;
/// let closed = space.get_or_add_type_token(&universe, nullable_int)?;
/// assert_eq!(closed.value(), definition.value() + argument.value());
/// # Ok::<(), ilforge::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct TokenSpace {
    types: HashMap<TypeId, RemoteToken>,
    methods: HashMap<MethodId, RemoteToken>,
    fields: HashMap<FieldId, RemoteToken>,
    constants: BTreeMap<RemoteToken, Vec<u8>>,
    strings: Vec<StringConstant>,
    string_index: HashMap<Vec<u8>, usize>,
    inverse: HashMap<RemoteToken, Entity>,
    special_types: Vec<SpecialType>,
    next_token: u32,
    next_generic_token: u32,
    next_string_slot: u32,
}

impl Default for TokenSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSpace {
    /// Creates an empty token space.
    #[must_use]
    pub fn new() -> Self {
        TokenSpace {
            types: HashMap::new(),
            methods: HashMap::new(),
            fields: HashMap::new(),
            constants: BTreeMap::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            inverse: HashMap::new(),
            special_types: Vec::new(),
            next_token: LARGEST_KNOWN_TYPE_TOKEN + 1,
            next_generic_token: FIRST_GENERIC_TOKEN,
            next_string_slot: STRING_TOKEN_STEP,
        }
    }

    /// Returns the token of `ty`, assigning one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenSpaceExhausted`] when the relevant range has no free slot left.
    pub fn get_or_add_type_token(&mut self, universe: &Universe, ty: TypeId) -> Result<RemoteToken> {
        if let Some(token) = self.types.get(&ty) {
            return Ok(*token);
        }

        let def = universe.type_def(ty);
        let full_name = def.full_name();
        let token = if let Some(known) = KnownTypeToken::from_full_name(&full_name) {
            RemoteToken::from(known)
        } else if let Some(known) = KnownGenericToken::from_full_name(&full_name) {
            RemoteToken(known.slot() * GENERIC_TOKEN_STEP)
        } else if def.is_generic_definition() {
            self.allocate_generic()?
        } else if let Some(generic) = def.generic.clone() {
            let definition = self.get_or_add_type_token(universe, generic.definition)?;
            let mut arguments = Vec::with_capacity(generic.arguments.len());
            for argument in &generic.arguments {
                arguments.push(self.get_or_add_type_token(universe, *argument)?);
            }

            let simple = arguments.len() == 1
                && arguments[0].value() < GENERIC_TOKEN_STEP
                && universe.generic_definition(generic.arguments[0]).is_none();
            if simple {
                RemoteToken(definition.value() + arguments[0].value())
            } else {
                let master = self.allocate()?;
                log::debug!(
                    "Special type {} for {} with {} arguments",
                    master,
                    full_name,
                    arguments.len()
                );
                self.special_types.push(SpecialType {
                    master,
                    definition,
                    arguments,
                });
                master
            }
        } else {
            self.allocate()?
        };

        self.types.insert(ty, token);
        self.inverse.entry(token).or_insert(Entity::Type(ty));
        Ok(token)
    }

    /// Returns the token of `method`, assigning one on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyMethods`] once the method table is full.
    pub fn get_or_add_method_token(&mut self, method: MethodId) -> Result<RemoteToken> {
        if let Some(token) = self.methods.get(&method) {
            return Ok(*token);
        }

        if self.methods.len() >= MAX_METHODS {
            return Err(Error::TooManyMethods(MAX_METHODS));
        }

        let token = self.allocate()?;
        self.methods.insert(method, token);
        self.inverse.insert(token, Entity::Method(method));
        Ok(token)
    }

    /// Returns the token of `field`, assigning one on first use. An initializer blob given on
    /// any call is recorded as the field's constant data.
    pub fn get_or_add_field_token(
        &mut self,
        field: FieldId,
        initializer: Option<&[u8]>,
    ) -> Result<RemoteToken> {
        let token = match self.fields.get(&field) {
            Some(token) => *token,
            None => {
                let token = self.allocate()?;
                self.fields.insert(field, token);
                self.inverse.insert(token, Entity::Field(field));
                token
            }
        };

        if let Some(data) = initializer {
            self.constants.entry(token).or_insert_with(|| data.to_vec());
        }
        Ok(token)
    }

    /// Returns the token of a string constant. Equal encodings share a token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidString`] for strings the device cannot store (longer than
    /// 65535 UTF-8 bytes or containing characters outside the basic multilingual plane) and
    /// [`Error::TokenSpaceExhausted`] once all string slots are used.
    pub fn get_or_add_string_token(&mut self, text: &str) -> Result<RemoteToken> {
        let encoded = text.as_bytes().to_vec();
        if let Some(index) = self.string_index.get(&encoded) {
            return Ok(self.strings[*index].token);
        }

        if text.chars().any(|c| u32::from(c) > 0xFFFF) {
            return Err(Error::InvalidString(format!(
                "{:?} contains characters outside the basic multilingual plane",
                text
            )));
        }
        if encoded.len() >= STRING_TOKEN_STEP as usize {
            return Err(Error::InvalidString(format!(
                "string of {} bytes is too long",
                encoded.len()
            )));
        }
        if self.next_string_slot > LAST_STRING_SLOT {
            return Err(Error::TokenSpaceExhausted("string constants"));
        }

        let token = RemoteToken(STRING_TOKEN_BASE + self.next_string_slot + encoded.len() as u32);
        self.next_string_slot += STRING_TOKEN_STEP;

        self.string_index.insert(encoded.clone(), self.strings.len());
        self.strings.push(StringConstant {
            token,
            text: text.to_string(),
            encoded,
        });
        self.inverse.insert(token, Entity::String(text.to_string()));
        Ok(token)
    }

    /// Maps a token back to the entity it was assigned to.
    #[must_use]
    pub fn inverse_resolve(&self, token: RemoteToken) -> Option<Entity> {
        self.inverse.get(&token).cloned()
    }

    /// Token already assigned to `ty`, without assigning one.
    #[must_use]
    pub fn type_token(&self, ty: TypeId) -> Option<RemoteToken> {
        self.types.get(&ty).copied()
    }

    /// Token already assigned to `method`, without assigning one.
    #[must_use]
    pub fn method_token(&self, method: MethodId) -> Option<RemoteToken> {
        self.methods.get(&method).copied()
    }

    /// Token already assigned to `field`, without assigning one.
    #[must_use]
    pub fn field_token(&self, field: FieldId) -> Option<RemoteToken> {
        self.fields.get(&field).copied()
    }

    /// The auxiliary special-type list, in order of first use.
    #[must_use]
    pub fn special_types(&self) -> &[SpecialType] {
        &self.special_types
    }

    /// The special-type list in its flattened wire form.
    #[must_use]
    pub fn special_type_list(&self) -> Vec<u32> {
        self.special_types
            .iter()
            .flat_map(SpecialType::flatten)
            .collect()
    }

    /// Field initializer blobs, ordered by token.
    pub fn constants(&self) -> impl Iterator<Item = (RemoteToken, &[u8])> {
        self.constants
            .iter()
            .map(|(token, data)| (*token, data.as_slice()))
    }

    /// String constants, in order of first use.
    #[must_use]
    pub fn strings(&self) -> &[StringConstant] {
        &self.strings
    }

    /// Number of methods with a token.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// All type tokens.
    pub fn type_tokens(&self) -> impl Iterator<Item = RemoteToken> + '_ {
        self.types.values().copied()
    }

    /// Every token assigned to a type, method or field.
    #[must_use]
    pub fn all_tokens(&self) -> Vec<RemoteToken> {
        let mut tokens: Vec<RemoteToken> = self
            .types
            .values()
            .chain(self.methods.values())
            .chain(self.fields.values())
            .copied()
            .collect();
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }

    fn allocate(&mut self) -> Result<RemoteToken> {
        if self.next_token >= GENERIC_TOKEN_STEP {
            return Err(Error::TokenSpaceExhausted("types, methods and fields"));
        }
        let token = RemoteToken(self.next_token);
        self.next_token += 1;
        Ok(token)
    }

    fn allocate_generic(&mut self) -> Result<RemoteToken> {
        if self.next_generic_token >= STRING_TOKEN_BASE {
            return Err(Error::TokenSpaceExhausted("generic type definitions"));
        }
        let token = RemoteToken(self.next_generic_token);
        self.next_generic_token += GENERIC_TOKEN_STEP;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::TypeFlags;

    #[test]
    fn type_tokens_are_idempotent_and_distinct() {
        let universe = Universe::with_core_library();
        let first = universe.define_type("Demo", "First").build();
        let second = universe.define_type("Demo", "Second").build();

        let mut space = TokenSpace::new();
        let a = space.get_or_add_type_token(&universe, first).unwrap();
        let b = space.get_or_add_type_token(&universe, second).unwrap();
        assert_eq!(a, RemoteToken(LARGEST_KNOWN_TYPE_TOKEN + 1));
        assert_ne!(a, b);
        assert_eq!(space.get_or_add_type_token(&universe, first).unwrap(), a);
        assert_eq!(space.inverse_resolve(a), Some(Entity::Type(first)));
    }

    #[test]
    fn known_types_get_fixed_tokens() {
        let universe = Universe::with_core_library();
        let string = universe.find_type("System.String").unwrap();
        let nullable = universe.find_type("System.Nullable`1").unwrap();

        let mut space = TokenSpace::new();
        assert_eq!(
            space.get_or_add_type_token(&universe, string).unwrap(),
            RemoteToken(4)
        );
        assert_eq!(
            space.get_or_add_type_token(&universe, nullable).unwrap(),
            RemoteToken(2 * GENERIC_TOKEN_STEP)
        );
    }

    #[test]
    fn single_argument_generic_arithmetic() {
        let universe = Universe::with_core_library();
        let list = universe
            .define_type("Demo", "List`1")
            .generic_parameters(&["T"])
            .build();
        let item = universe.define_type("Demo", "Item").build();
        let closed = universe.instantiate(list, &[item]).unwrap();

        let mut space = TokenSpace::new();
        let closed_token = space.get_or_add_type_token(&universe, closed).unwrap();
        let definition = space.type_token(list).unwrap();
        let argument = space.type_token(item).unwrap();

        assert_eq!(definition.value(), FIRST_GENERIC_TOKEN);
        assert_eq!(closed_token.value(), definition.value() + argument.value());
        assert!(space.special_types().is_empty());
    }

    #[test]
    fn multi_argument_generics_use_special_list() {
        let universe = Universe::with_core_library();
        let pair = universe
            .define_type("Demo", "Pair`2")
            .flags(TypeFlags::VALUE_TYPE)
            .generic_parameters(&["TKey", "TValue"])
            .build();
        let int32 = universe.find_type("System.Int32").unwrap();
        let string = universe.find_type("System.String").unwrap();
        let closed = universe.instantiate(pair, &[int32, string]).unwrap();

        let mut space = TokenSpace::new();
        let master = space.get_or_add_type_token(&universe, closed).unwrap();
        assert!(master.value() < GENERIC_TOKEN_STEP);

        let definition = space.type_token(pair).unwrap();
        assert_eq!(
            space.special_type_list(),
            vec![5, master.value(), definition.value(), 21, 4]
        );
    }

    #[test]
    fn nested_generic_argument_uses_special_list() {
        let universe = Universe::with_core_library();
        let nullable = universe.find_type("System.Nullable`1").unwrap();
        let span = universe.find_type("System.Span`1").unwrap();
        let int32 = universe.find_type("System.Int32").unwrap();
        let inner = universe.instantiate(nullable, &[int32]).unwrap();
        let outer = universe.instantiate(span, &[inner]).unwrap();

        let mut space = TokenSpace::new();
        let master = space.get_or_add_type_token(&universe, outer).unwrap();
        let inner_token = space.type_token(inner).unwrap();

        assert_eq!(inner_token.value(), 2 * GENERIC_TOKEN_STEP + 21);
        assert_eq!(space.special_types().len(), 1);
        assert_eq!(space.special_types()[0].master, master);
        assert_eq!(space.special_types()[0].arguments, vec![inner_token]);
    }

    #[test]
    fn string_tokens_encode_length() {
        let mut space = TokenSpace::new();
        let hi = space.get_or_add_string_token("Hi").unwrap();
        let again = space.get_or_add_string_token("Hi").unwrap();
        let umlaut = space.get_or_add_string_token("Grüße").unwrap();

        assert_eq!(hi, again);
        assert_eq!(hi.value(), STRING_TOKEN_BASE + STRING_TOKEN_STEP + 2);
        assert_eq!(umlaut.string_length(), Some("Grüße".len()));
        assert_eq!(space.strings().len(), 2);
        assert_eq!(
            space.inverse_resolve(umlaut),
            Some(Entity::String("Grüße".to_string()))
        );

        assert!(matches!(
            space.get_or_add_string_token("\u{1F600}"),
            Err(Error::InvalidString(_))
        ));
    }

    #[test]
    fn field_initializers_become_constants() {
        let universe = Universe::with_core_library();
        let holder = universe.define_type("Demo", "Holder").build();
        let byte = universe.find_type("System.Byte").unwrap();
        let field = universe
            .define_field(holder, "Data", byte)
            .initial_value(vec![1, 2, 3])
            .build();

        let mut space = TokenSpace::new();
        let token = space.get_or_add_field_token(field, None).unwrap();
        assert_eq!(space.constants().count(), 0);

        let again = space.get_or_add_field_token(field, Some(&[1, 2, 3])).unwrap();
        assert_eq!(token, again);
        let constants: Vec<_> = space.constants().collect();
        assert_eq!(constants, vec![(token, &[1u8, 2, 3][..])]);
    }
}
