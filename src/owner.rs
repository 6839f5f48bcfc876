//! Ownership tokens for the transient claim protocol.
//!
//! A token is an opaque identity stamped on trie nodes. During a transient
//! phase, a node may be mutated in place exactly when its stored token is
//! the *same allocation* as the owning transient's token; any other node is
//! cloned first and the clone stamped with the transient's token. Tokens are
//! compared by pointer identity, never by value, and a token minted for a
//! persistent value is closed from birth, so it can never be the token of a
//! live transient.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::ReferenceCounter;

/// The ownership identity carried by interior trie nodes.
///
/// State machine: `open` (a transient may claim through it) or `closed`
/// (sealed; claims fail). Sealing is one-way.
#[derive(Clone, Debug)]
pub(crate) struct OwnerToken {
    flag: ReferenceCounter<AtomicBool>,
}

impl OwnerToken {
    /// Mints a token that is closed from birth, for persistent values.
    pub(crate) fn sealed() -> Self {
        Self {
            flag: ReferenceCounter::new(AtomicBool::new(false)),
        }
    }

    /// Mints a fresh open token for a new transient handle.
    pub(crate) fn open() -> Self {
        Self {
            flag: ReferenceCounter::new(AtomicBool::new(true)),
        }
    }

    /// Returns `true` while the owning transient has not been sealed.
    pub(crate) fn is_open(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Closes the token; every later openness check fails.
    pub(crate) fn close(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Identity comparison: `true` iff both tokens are the same allocation.
    pub(crate) fn is_same(&self, other: &Self) -> bool {
        ReferenceCounter::ptr_eq(&self.flag, &other.flag)
    }
}
