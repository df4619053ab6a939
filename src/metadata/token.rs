//! Original ECMA-335 metadata tokens.
//!
//! A [`Token`] is the 32-bit value found in unpatched IL: the most significant byte selects
//! the metadata table, the remaining 24 bits are the 1-based row. The program model registers
//! every type, method, field and user string under such a token so that IL operands can be
//! resolved exactly the way the owning module would resolve them.
//!
//! These tokens never leave the host. Everything sent to the device uses
//! [`crate::tokens::RemoteToken`] instead.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A metadata token as it appears in original IL.
///
/// # Examples
///
/// ```rust
/// use ilforge::metadata::token::Token;
///
/// let token = Token::from_parts(Token::METHOD_DEF, 1);
/// assert_eq!(token.value(), 0x0600_0001);
/// assert_eq!(token.table(), 0x06);
/// assert_eq!(token.row(), 1);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Token(pub u32);

impl Token {
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table, used for members of generic instances
    pub const MEMBER_REF: u8 = 0x0A;
    /// `TypeSpec` table, used for generic instances, arrays and generic parameters
    pub const TYPE_SPEC: u8 = 0x1B;
    /// The user string heap (`ldstr` operands)
    pub const USER_STRING: u8 = 0x70;

    /// Creates a new token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Combines a table id and a row into a token.
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table id.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the row (or the heap offset for user strings).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(Token::TYPE_SPEC, 0x12);
        assert_eq!(token.value(), 0x1B00_0012);
        assert_eq!(token.table(), Token::TYPE_SPEC);
        assert_eq!(token.row(), 0x12);

        // Rows are truncated to 24 bits
        let token = Token::from_parts(Token::FIELD, 0x0100_0001);
        assert_eq!(token.value(), 0x0400_0001);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x0600_0001)), "0x06000001");
        let debug_str = format!("{:?}", Token(0x0600_0001));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_hash() {
        let mut map = HashMap::new();
        map.insert(Token(0x0600_0001), "Main");
        map.insert(Token(0x0600_0002), "Helper");

        assert_eq!(map.get(&Token(0x0600_0001)), Some(&"Main"));
        assert_eq!(map.get(&Token(0x0600_0002)), Some(&"Helper"));
    }
}
