//! Key hashing for the map trie.
//!
//! The trie consumes a deterministic 32-bit hash per key, taken from
//! `std::hash::Hash` through the selected hasher and folded down to 32
//! bits. The default hasher is `DefaultHasher` (SipHash); the `fxhash` and
//! `ahash` features swap in the corresponding high-throughput hashers.
//! The fold mixes both halves of the 64-bit output so the fast hashers'
//! low-entropy low bits do not degrade the trie's fanout.

use std::hash::{Hash, Hasher};

/// Computes the 32-bit trie hash of a key.
pub(crate) fn hash_of<K: Hash + ?Sized>(key: &K) -> u32 {
    #[cfg(feature = "ahash")]
    let mut hasher = ahash::AHasher::default();

    #[cfg(all(feature = "fxhash", not(feature = "ahash")))]
    let mut hasher = rustc_hash::FxHasher::default();

    #[cfg(not(any(feature = "ahash", feature = "fxhash")))]
    let mut hasher = std::collections::hash_map::DefaultHasher::new();

    key.hash(&mut hasher);
    fold_to_u32(hasher.finish())
}

/// Folds a 64-bit hasher output into the 32-bit hash the trie consumes.
#[inline]
const fn fold_to_u32(hash: u64) -> u32 {
    ((hash >> 32) ^ (hash & 0xFFFF_FFFF)) as u32
}
