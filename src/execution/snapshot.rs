//! Token snapshots of an execution set.
//!
//! A [`SnapShot`] records which tokens the device already knows. Uploads send the difference
//! between two snapshots, and the content hash of a snapshot identifies a flashed kernel: if
//! the board reports the same hash, nothing of the kernel is sent again.

use std::collections::BTreeSet;

use serde::Serialize;
use sha1::{Digest, Sha1};

use crate::tokens::RemoteToken;

/// Immutable set of uploaded tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapShot {
    tokens: BTreeSet<RemoteToken>,
    strings: BTreeSet<RemoteToken>,
    special: BTreeSet<RemoteToken>,
}

impl SnapShot {
    /// The snapshot of an empty device.
    #[must_use]
    pub fn empty() -> Self {
        SnapShot::default()
    }

    /// Builds a snapshot from class, method and constant tokens, string tokens and the masters
    /// of the special-type list.
    #[must_use]
    pub fn new(
        tokens: impl IntoIterator<Item = RemoteToken>,
        strings: impl IntoIterator<Item = RemoteToken>,
        special: impl IntoIterator<Item = RemoteToken>,
    ) -> Self {
        SnapShot {
            tokens: tokens.into_iter().collect(),
            strings: strings.into_iter().collect(),
            special: special.into_iter().collect(),
        }
    }

    /// Returns true if `token` is part of the snapshot.
    #[must_use]
    pub fn contains(&self, token: RemoteToken) -> bool {
        self.tokens.contains(&token) || self.strings.contains(&token) || self.special.contains(&token)
    }

    /// Returns true if `token` belongs to this snapshot but not to `from`, i.e. it has to be
    /// sent when upgrading a device from `from` to `self`.
    #[must_use]
    pub fn is_new(&self, token: RemoteToken, from: &SnapShot) -> bool {
        self.contains(token) && !from.contains(token)
    }

    /// Number of class, method and constant tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns true for the empty snapshot.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.strings.is_empty() && self.special.is_empty()
    }

    /// Stable content hash: SHA-1 over the sorted token sets, truncated to 31 bits.
    ///
    /// ```rust
    /// use ilforge::{execution::SnapShot, tokens::RemoteToken};
    ///
    /// let a = SnapShot::new([RemoteToken(42), RemoteToken(41)], [], []);
    /// let b = SnapShot::new([RemoteToken(41), RemoteToken(42)], [], []);
    /// assert_eq!(a.hash(), b.hash());
    /// assert!(a.hash() <= i32::MAX as u32);
    /// ```
    #[must_use]
    pub fn hash(&self) -> u32 {
        let mut hasher = Sha1::new();
        for set in [&self.tokens, &self.strings, &self.special] {
            hasher.update((set.len() as u32).to_le_bytes());
            for token in set {
                hasher.update(token.value().to_le_bytes());
            }
        }
        let digest = hasher.finalize();
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments() {
        let kernel = SnapShot::new([RemoteToken(41), RemoteToken(42)], [], []);
        let program = SnapShot::new(
            [RemoteToken(41), RemoteToken(42), RemoteToken(43)],
            [RemoteToken(0x7001_0002)],
            [],
        );

        assert!(!program.is_new(RemoteToken(41), &kernel));
        assert!(program.is_new(RemoteToken(43), &kernel));
        assert!(program.is_new(RemoteToken(0x7001_0002), &kernel));
        assert!(!program.is_new(RemoteToken(99), &kernel));
        assert!(program.is_new(RemoteToken(41), &SnapShot::empty()));
    }

    #[test]
    fn hash_depends_on_content_and_partition() {
        let a = SnapShot::new([RemoteToken(41)], [], []);
        let b = SnapShot::new([RemoteToken(42)], [], []);
        let c = SnapShot::new([], [RemoteToken(41)], []);

        assert_ne!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
        assert_eq!(a.hash(), a.clone().hash());
        assert_eq!(SnapShot::empty().hash(), SnapShot::empty().hash());
        assert!(SnapShot::empty().is_empty());
    }
}
