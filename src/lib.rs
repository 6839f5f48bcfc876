//! # trellis
//!
//! Persistent (immutable) collections with structural sharing and a
//! transient escape hatch for bulk mutation.
//!
//! ## Overview
//!
//! This library provides two foundational collection types for code that
//! treats values as immutable by default but still needs competitive
//! update and lookup performance:
//!
//! - [`PersistentHashMap`]: hash map over a 32-way hash array mapped trie
//! - [`PersistentVector`]: vector over a 32-way index trie with a tail buffer
//!
//! Every update returns a new version; every prior version remains valid
//! and fully usable. Untouched subtrees are shared between versions, so an
//! update allocates only the path from the touched leaf to the root.
//!
//! ## Structural Sharing
//!
//! ```rust
//! use trellis::PersistentVector;
//!
//! let vector: PersistentVector<i32> = (0..100).collect();
//! let updated = vector.update(50, 999).unwrap();
//!
//! assert_eq!(vector.get(50), Some(&50));    // Original unchanged
//! assert_eq!(updated.get(50), Some(&999));  // New version
//! ```
//!
//! ## Transients
//!
//! A transient is a short-lived, single-owner mutable view over a
//! persistent value's storage. It batches a run of mutations without the
//! per-step path-copy cost, then seals back into an ordinary immutable
//! value. Nodes are claimed through an ownership token compared by
//! identity, so structure reachable from an already-published value is
//! never mutated in place.
//!
//! ```rust
//! use trellis::PersistentVector;
//!
//! let vector: PersistentVector<i32> = PersistentVector::new();
//! let mut transient = vector.as_transient();
//! for value in 0..1000 {
//!     transient.push(value).unwrap();
//! }
//! let built = transient.persistent().unwrap();
//!
//! assert_eq!(built.len(), 1000);
//! assert!(vector.is_empty()); // the source value is untouched
//! ```
//!
//! ## Feature Flags
//!
//! - `arc`: share nodes through `Arc` instead of `Rc` (`Send + Sync` values)
//! - `fxhash`: hash keys with `rustc-hash`
//! - `ahash`: hash keys with `ahash`

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

// =============================================================================
// Reference Counter Type Alias
// =============================================================================

/// Reference-counted smart pointer type.
///
/// When the `arc` feature is enabled, this is `std::sync::Arc`,
/// which is thread-safe but has slightly higher overhead.
///
/// When the `arc` feature is disabled (default), this is `std::rc::Rc`,
/// which is faster but not thread-safe.
#[cfg(feature = "arc")]
pub(crate) type ReferenceCounter<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub(crate) type ReferenceCounter<T> = std::rc::Rc<T>;

mod error;
mod hash;
mod hashmap;
mod owner;
mod vector;

pub use error::CollectionError;
pub use hashmap::PersistentHashMap;
pub use hashmap::PersistentHashMapIntoIterator;
pub use hashmap::PersistentHashMapIterator;
pub use hashmap::PersistentHashMapKeys;
pub use hashmap::PersistentHashMapValues;
pub use hashmap::TransientHashMap;
pub use vector::PersistentVector;
pub use vector::PersistentVectorChunks;
pub use vector::PersistentVectorIntoIterator;
pub use vector::PersistentVectorIterator;
pub use vector::TransientVector;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod reference_counter_tests {
    use super::ReferenceCounter;
    use rstest::rstest;

    #[rstest]
    fn test_reference_counter_clone() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(*reference_counter, *reference_counter_clone);
    }

    #[rstest]
    fn test_reference_counter_strong_count() {
        let reference_counter: ReferenceCounter<i32> = ReferenceCounter::new(42);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
        let reference_counter_clone = reference_counter.clone();
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 2);
        drop(reference_counter_clone);
        assert_eq!(ReferenceCounter::strong_count(&reference_counter), 1);
    }
}
