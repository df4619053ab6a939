//! The remote token space.
//!
//! Every type, method, field and string constant that patched IL or a wire packet refers to is
//! identified on the device by a dense 32-bit [`RemoteToken`]. The ranges are partitioned:
//!
//! | Range                                   | Meaning                                      |
//! |-----------------------------------------|----------------------------------------------|
//! | `1..=40`                                | known framework types ([`KnownTypeToken`])   |
//! | `41..0x0100_0000`                       | ordinary types, methods, fields, special masters |
//! | `k * 0x0100_0000` for `k` in `1..=3`    | known generic definitions ([`KnownGenericToken`]) |
//! | `k * 0x0100_0000` for `k >= 4`          | other open generic definitions               |
//! | `definition + argument`                 | closed single-argument generics              |
//! | `0x7000_0000 + (n << 16) + utf8_len`    | string constants                             |
//!
//! Closed generics that cannot use the additive scheme (more than one argument, or an
//! argument that is itself generic) receive an ordinary master token and an entry in the
//! auxiliary special-type list.

use std::fmt;

use serde::Serialize;

pub mod known;
pub mod space;

pub use known::{KnownGenericToken, KnownTypeToken, LARGEST_KNOWN_TYPE_TOKEN};
pub use space::{Entity, SpecialType, StringConstant, TokenSpace};

/// Distance between two open generic definition tokens.
pub const GENERIC_TOKEN_STEP: u32 = 0x0100_0000;
/// Token of the first freely allocated open generic definition.
pub const FIRST_GENERIC_TOKEN: u32 = 4 * GENERIC_TOKEN_STEP;
/// Start of the string token range.
pub const STRING_TOKEN_BASE: u32 = 0x7000_0000;
/// Distance between two string tokens; the low 16 bits carry the UTF-8 length.
pub const STRING_TOKEN_STEP: u32 = 0x0001_0000;
/// Maximum number of methods in one execution set.
pub const MAX_METHODS: usize = 1 << 14;

/// A token in the device's token space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct RemoteToken(pub u32);

impl RemoteToken {
    /// The null token, used for "no base class" and absent catch types.
    pub const NULL: RemoteToken = RemoteToken(0);

    /// Returns the raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns true for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true for string constant tokens.
    #[must_use]
    pub fn is_string(&self) -> bool {
        self.0 >= STRING_TOKEN_BASE
    }

    /// The UTF-8 length encoded in a string token.
    #[must_use]
    pub fn string_length(&self) -> Option<usize> {
        self.is_string()
            .then_some((self.0 & (STRING_TOKEN_STEP - 1)) as usize)
    }

    /// Returns true for tokens derived from a generic definition slot.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        (GENERIC_TOKEN_STEP..STRING_TOKEN_BASE).contains(&self.0)
    }

    /// Returns true for known framework type tokens.
    #[must_use]
    pub fn is_known_type(&self) -> bool {
        self.0 > 0 && self.0 <= LARGEST_KNOWN_TYPE_TOKEN
    }
}

impl From<KnownTypeToken> for RemoteToken {
    fn from(known: KnownTypeToken) -> Self {
        RemoteToken(known.value())
    }
}

impl fmt::Debug for RemoteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RemoteToken(0x{:08x})", self.0)
    }
}

impl fmt::Display for RemoteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_ranges() {
        let string = RemoteToken(STRING_TOKEN_BASE + 2 * STRING_TOKEN_STEP + 5);
        assert!(string.is_string());
        assert_eq!(string.string_length(), Some(5));
        assert!(!string.is_generic());

        let closed = RemoteToken(FIRST_GENERIC_TOKEN + 41);
        assert!(closed.is_generic());
        assert_eq!(closed.string_length(), None);

        assert!(RemoteToken::from(KnownTypeToken::Int32).is_known_type());
        assert!(!RemoteToken(41).is_known_type());
        assert!(RemoteToken::NULL.is_null());
        assert_eq!(RemoteToken(0x2A).to_string(), "0x0000002a");
    }
}
