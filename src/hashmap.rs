//! Persistent (immutable) hash map based on a hash array mapped trie.
//!
//! This module provides [`PersistentHashMap`], an immutable hash map that
//! uses structural sharing for efficient operations, and
//! [`TransientHashMap`], its single-owner mutable overlay.
//!
//! # Overview
//!
//! The trie branches 32 ways per level, consuming five bits of the key's
//! 32-bit hash at each step. Interior nodes come in two densities: a sparse
//! node keeps a bitmap of occupied slots and packs its children, while a
//! node whose every slot is occupied upgrades to a dense form indexed
//! directly. Keys whose full hashes collide are bundled into a collision
//! node and scanned linearly.
//!
//! - O(log32 N) `get`, `insert`, `remove` (effectively O(1) in practice)
//! - O(1) `len` and `is_empty`
//!
//! All operations return new maps without modifying the original, and
//! structural sharing ensures memory efficiency.
//!
//! # Examples
//!
//! ```rust
//! use trellis::PersistentHashMap;
//!
//! let map = PersistentHashMap::new()
//!     .insert("one".to_string(), 1)
//!     .insert("two".to_string(), 2)
//!     .insert("three".to_string(), 3);
//!
//! assert_eq!(map.get("one"), Some(&1));
//!
//! // Structural sharing: the original map is preserved
//! let updated = map.insert("one".to_string(), 100);
//! assert_eq!(map.get("one"), Some(&1));       // Original unchanged
//! assert_eq!(updated.get("one"), Some(&100)); // New version
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::iter::FromIterator;

use smallvec::SmallVec;
use static_assertions::const_assert_eq;

use crate::ReferenceCounter;
use crate::error::CollectionError;
use crate::hash::hash_of;
use crate::owner::OwnerToken;

// =============================================================================
// Constants
// =============================================================================

/// Branching factor (2^5 = 32)
const BRANCHING_FACTOR: usize = 32;

/// Bits per level in the trie
const BITS_PER_LEVEL: usize = 5;

/// Bit mask for extracting index within a node
const MASK: u32 = (BRANCHING_FACTOR - 1) as u32;

/// Bitmap value at which a sparse node upgrades to the dense form
const FULL_BITMAP: u32 = u32::MAX;

const_assert_eq!(BRANCHING_FACTOR, 1 << BITS_PER_LEVEL);

/// Extracts the child slot for `hash` at trie level `shift`.
///
/// Hash bits are exhausted below shift 30; keys with equal hashes land in
/// collision nodes before the shift could exceed it.
#[inline]
const fn mask(hash: u32, shift: usize) -> usize {
    ((hash >> shift) & MASK) as usize
}

/// Single-bit mask for the slot of `hash` at `shift`.
#[inline]
const fn bitpos(hash: u32, shift: usize) -> u32 {
    1 << mask(hash, shift)
}

// =============================================================================
// Node Definition
// =============================================================================

/// Internal node structure for the map trie.
///
/// Interior nodes carry the owner token of the transient that allocated
/// them; `Empty` and `Leaf` do not, because they are replaced wholesale
/// rather than mutated in place.
#[derive(Clone)]
enum MapNode<K, V> {
    /// No entries below this point.
    Empty,
    /// A single terminal entry.
    Leaf { hash: u32, key: K, value: V },
    /// Sparse interior node; children are packed in slot order.
    /// Invariant: `children.len() == bitmap.count_ones()`, and the bitmap
    /// is never fully set (that representation is `Full`).
    Bitmap {
        edit: OwnerToken,
        bitmap: u32,
        children: Vec<ReferenceCounter<MapNode<K, V>>>,
    },
    /// Dense interior node: every slot occupied, indexed directly.
    /// Invariant: `children.len() == BRANCHING_FACTOR`.
    Full {
        edit: OwnerToken,
        children: Vec<ReferenceCounter<MapNode<K, V>>>,
    },
    /// Entries whose keys share a full 32-bit hash but are unequal.
    /// Invariant: `entries.len() >= 2`.
    Collision {
        edit: OwnerToken,
        hash: u32,
        entries: Vec<(K, V)>,
    },
}

/// Outcome of removing a key below a node.
enum Removal<K, V> {
    /// The key was absent; nothing changed.
    Absent,
    /// The node lost its last entry and vanishes from its parent.
    Pruned,
    /// The node was replaced by a smaller one.
    Replaced(ReferenceCounter<MapNode<K, V>>),
}

// =============================================================================
// PersistentHashMap Definition
// =============================================================================

/// A persistent (immutable) hash map based on a hash array mapped trie.
///
/// `PersistentHashMap` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns. Prior
/// versions remain valid and independently usable after any update.
///
/// Iteration order is trie order (hash-dependent) and unspecified.
///
/// # Time Complexity
///
/// | Operation          | Complexity        |
/// |--------------------|-------------------|
/// | `new`              | O(1)              |
/// | `get`              | O(log32 N)        |
/// | `insert`           | O(log32 N)        |
/// | `remove`           | O(log32 N)        |
/// | `contains_key`     | O(log32 N)        |
/// | `len`              | O(1)              |
/// | `is_empty`         | O(1)              |
///
/// # Examples
///
/// ```rust
/// use trellis::PersistentHashMap;
///
/// let map = PersistentHashMap::singleton("key".to_string(), 42);
/// assert_eq!(map.get("key"), Some(&42));
/// ```
#[derive(Clone)]
pub struct PersistentHashMap<K, V> {
    /// Root node of the trie
    root: ReferenceCounter<MapNode<K, V>>,
    /// Number of entries; cached because collision nodes bundle several
    length: usize,
}

impl<K, V> PersistentHashMap<K, V> {
    /// Creates a new empty map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: ReferenceCounter::new(MapNode::Empty),
            length: 0,
        }
    }

    /// Returns the number of entries in the map.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the map contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns a lazy iterator over the entries, in trie order.
    ///
    /// The walk is pull-based: it is driven by an explicit frame stack and
    /// advances one entry per call, never materializing the map.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    ///
    /// let mut entries: Vec<(&String, &i32)> = map.iter().collect();
    /// entries.sort();
    /// assert_eq!(entries.len(), 2);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentHashMapIterator<'_, K, V> {
        PersistentHashMapIterator::new(self)
    }

    /// Returns an iterator over the keys, in trie order.
    #[must_use]
    pub fn keys(&self) -> PersistentHashMapKeys<'_, K, V> {
        PersistentHashMapKeys { inner: self.iter() }
    }

    /// Returns an iterator over the values, in trie order.
    #[must_use]
    pub fn values(&self) -> PersistentHashMapValues<'_, K, V> {
        PersistentHashMapValues { inner: self.iter() }
    }

    /// Opens a transient view over this map.
    ///
    /// The transient starts out sharing this map's trie; nodes are claimed
    /// (copied once, then reused) lazily as mutations touch them.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
    /// let mut transient = map.as_transient();
    /// transient.insert("key".to_string(), 1).unwrap();
    /// let built = transient.persistent().unwrap();
    ///
    /// assert_eq!(built.len(), 1);
    /// assert!(map.is_empty()); // the source value is untouched
    /// ```
    #[must_use]
    pub fn as_transient(&self) -> TransientHashMap<K, V> {
        TransientHashMap {
            edit: OwnerToken::open(),
            root: self.root.clone(),
            length: self.length,
        }
    }
}

impl<K: Hash + Eq, V> PersistentHashMap<K, V> {
    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash`
    /// and `Eq` on the borrowed form must match those for the key type.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new().insert("hello".to_string(), 42);
    ///
    /// // Can use &str to look up String keys
    /// assert_eq!(map.get("hello"), Some(&42));
    /// assert_eq!(map.get("world"), None);
    /// ```
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_of(key);
        Self::find_in_node(&self.root, 0, hash, key)
    }

    /// Returns `true` if the map contains a value for the specified key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Recursive descent for `get`.
    fn find_in_node<'a, Q>(
        node: &'a MapNode<K, V>,
        shift: usize,
        hash: u32,
        key: &Q,
    ) -> Option<&'a V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match node {
            MapNode::Empty => None,
            MapNode::Leaf {
                hash: leaf_hash,
                key: leaf_key,
                value,
            } => {
                if *leaf_hash == hash && leaf_key.borrow() == key {
                    Some(value)
                } else {
                    None
                }
            }
            MapNode::Bitmap {
                bitmap, children, ..
            } => {
                let bit = bitpos(hash, shift);
                if *bitmap & bit == 0 {
                    None
                } else {
                    let position = (*bitmap & (bit - 1)).count_ones() as usize;
                    Self::find_in_node(&children[position], shift + BITS_PER_LEVEL, hash, key)
                }
            }
            MapNode::Full { children, .. } => {
                Self::find_in_node(&children[mask(hash, shift)], shift + BITS_PER_LEVEL, hash, key)
            }
            MapNode::Collision {
                hash: collision_hash,
                entries,
                ..
            } => {
                if *collision_hash != hash {
                    return None;
                }
                entries
                    .iter()
                    .find(|(entry_key, _)| entry_key.borrow() == key)
                    .map(|(_, value)| value)
            }
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> PersistentHashMap<K, V> {
    /// Creates a map containing a single key-value pair.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::singleton("key".to_string(), 42);
    /// assert_eq!(map.len(), 1);
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(key: K, value: V) -> Self {
        Self::new().insert(key, value)
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already contains the key, the value is replaced silently.
    /// Inserting an entry that is already present (equal key *and* equal
    /// value) returns a map sharing the original root unchanged.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map1 = PersistentHashMap::new().insert("key".to_string(), 1);
    /// let map2 = map1.insert("key".to_string(), 2);
    ///
    /// assert_eq!(map1.get("key"), Some(&1)); // Original unchanged
    /// assert_eq!(map2.get("key"), Some(&2)); // New version
    /// ```
    #[must_use]
    pub fn insert(&self, key: K, value: V) -> Self {
        let hash = hash_of(&key);
        let mut added = false;
        let new_root = Self::assoc_in_node(&self.root, 0, hash, key, value, &mut added);

        if ReferenceCounter::ptr_eq(&new_root, &self.root) {
            return self.clone();
        }

        Self {
            root: new_root,
            length: if added { self.length + 1 } else { self.length },
        }
    }

    /// Inserts a key-value pair only if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::KeyAlreadyPresent`] when the key is
    /// present; the map is observably unchanged and the existing entry is
    /// not overwritten.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::{CollectionError, PersistentHashMap};
    ///
    /// let map = PersistentHashMap::new().insert("a".to_string(), 1);
    ///
    /// let grown = map.insert_if_absent("b".to_string(), 2).unwrap();
    /// assert_eq!(grown.len(), 2);
    ///
    /// assert_eq!(
    ///     map.insert_if_absent("a".to_string(), 3).unwrap_err(),
    ///     CollectionError::KeyAlreadyPresent
    /// );
    /// assert_eq!(map.get("a"), Some(&1));
    /// ```
    pub fn insert_if_absent(&self, key: K, value: V) -> Result<Self, CollectionError> {
        if self.contains_key(&key) {
            return Err(CollectionError::KeyAlreadyPresent);
        }
        Ok(self.insert(key, value))
    }

    /// Recursive path-copying insert.
    ///
    /// Returns the original node by identity when nothing below changed,
    /// which lets every ancestor (and finally `insert`) detect the no-op.
    fn assoc_in_node(
        node: &ReferenceCounter<MapNode<K, V>>,
        shift: usize,
        hash: u32,
        key: K,
        value: V,
        added: &mut bool,
    ) -> ReferenceCounter<MapNode<K, V>> {
        match node.as_ref() {
            MapNode::Empty => {
                *added = true;
                ReferenceCounter::new(MapNode::Leaf { hash, key, value })
            }
            MapNode::Leaf {
                hash: leaf_hash,
                key: leaf_key,
                value: leaf_value,
            } => {
                if *leaf_hash == hash && *leaf_key == key {
                    if *leaf_value == value {
                        // Identical entry: expose the no-op by identity
                        node.clone()
                    } else {
                        // Replacement, not an insertion
                        ReferenceCounter::new(MapNode::Leaf { hash, key, value })
                    }
                } else if *leaf_hash == hash {
                    // Same full hash, different keys
                    *added = true;
                    ReferenceCounter::new(MapNode::Collision {
                        edit: OwnerToken::sealed(),
                        hash,
                        entries: vec![(leaf_key.clone(), leaf_value.clone()), (key, value)],
                    })
                } else {
                    // Different hashes: seed a sparse node with the existing
                    // leaf, then insert into it
                    let seeded = ReferenceCounter::new(MapNode::Bitmap {
                        edit: OwnerToken::sealed(),
                        bitmap: bitpos(*leaf_hash, shift),
                        children: vec![node.clone()],
                    });
                    Self::assoc_in_node(&seeded, shift, hash, key, value, added)
                }
            }
            MapNode::Bitmap {
                edit,
                bitmap,
                children,
            } => {
                let bit = bitpos(hash, shift);
                let position = (*bitmap & (bit - 1)).count_ones() as usize;

                if *bitmap & bit == 0 {
                    *added = true;
                    let mut new_children = children.clone();
                    new_children.insert(
                        position,
                        ReferenceCounter::new(MapNode::Leaf { hash, key, value }),
                    );
                    let new_bitmap = *bitmap | bit;
                    if new_bitmap == FULL_BITMAP {
                        ReferenceCounter::new(MapNode::Full {
                            edit: edit.clone(),
                            children: new_children,
                        })
                    } else {
                        ReferenceCounter::new(MapNode::Bitmap {
                            edit: edit.clone(),
                            bitmap: new_bitmap,
                            children: new_children,
                        })
                    }
                } else {
                    let child = &children[position];
                    let new_child =
                        Self::assoc_in_node(child, shift + BITS_PER_LEVEL, hash, key, value, added);
                    if ReferenceCounter::ptr_eq(&new_child, child) {
                        node.clone()
                    } else {
                        let mut new_children = children.clone();
                        new_children[position] = new_child;
                        ReferenceCounter::new(MapNode::Bitmap {
                            edit: edit.clone(),
                            bitmap: *bitmap,
                            children: new_children,
                        })
                    }
                }
            }
            MapNode::Full { edit, children } => {
                let index = mask(hash, shift);
                let child = &children[index];
                let new_child =
                    Self::assoc_in_node(child, shift + BITS_PER_LEVEL, hash, key, value, added);
                if ReferenceCounter::ptr_eq(&new_child, child) {
                    node.clone()
                } else {
                    let mut new_children = children.clone();
                    new_children[index] = new_child;
                    ReferenceCounter::new(MapNode::Full {
                        edit: edit.clone(),
                        children: new_children,
                    })
                }
            }
            MapNode::Collision {
                edit,
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash == hash {
                    if let Some(position) =
                        entries.iter().position(|(entry_key, _)| *entry_key == key)
                    {
                        if entries[position].1 == value {
                            return node.clone();
                        }
                        let mut new_entries = entries.clone();
                        new_entries[position] = (key, value);
                        ReferenceCounter::new(MapNode::Collision {
                            edit: edit.clone(),
                            hash,
                            entries: new_entries,
                        })
                    } else {
                        *added = true;
                        let mut new_entries = entries.clone();
                        new_entries.push((key, value));
                        ReferenceCounter::new(MapNode::Collision {
                            edit: edit.clone(),
                            hash,
                            entries: new_entries,
                        })
                    }
                } else {
                    // Different hash: seed a sparse node with this collision
                    // bundle, then insert into it
                    let seeded = ReferenceCounter::new(MapNode::Bitmap {
                        edit: OwnerToken::sealed(),
                        bitmap: bitpos(*collision_hash, shift),
                        children: vec![node.clone()],
                    });
                    Self::assoc_in_node(&seeded, shift, hash, key, value, added)
                }
            }
        }
    }

    /// Removes a key from the map.
    ///
    /// Returns a new map without the key. If the key doesn't exist, the
    /// returned map shares the original root unchanged.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentHashMap;
    ///
    /// let map = PersistentHashMap::new()
    ///     .insert("a".to_string(), 1)
    ///     .insert("b".to_string(), 2);
    /// let removed = map.remove("a");
    ///
    /// assert_eq!(map.len(), 2);     // Original unchanged
    /// assert_eq!(removed.len(), 1);
    /// assert_eq!(removed.get("a"), None);
    /// ```
    #[must_use]
    pub fn remove<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_of(key);
        match Self::without_node(&self.root, 0, hash, key) {
            Removal::Absent => self.clone(),
            Removal::Pruned => Self::new(),
            Removal::Replaced(new_root) => Self {
                root: new_root,
                length: self.length - 1,
            },
        }
    }

    /// Recursive path-copying removal.
    fn without_node<Q>(
        node: &ReferenceCounter<MapNode<K, V>>,
        shift: usize,
        hash: u32,
        key: &Q,
    ) -> Removal<K, V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match node.as_ref() {
            MapNode::Empty => Removal::Absent,
            MapNode::Leaf {
                hash: leaf_hash,
                key: leaf_key,
                ..
            } => {
                if *leaf_hash == hash && leaf_key.borrow() == key {
                    Removal::Pruned
                } else {
                    Removal::Absent
                }
            }
            MapNode::Bitmap {
                edit,
                bitmap,
                children,
            } => {
                let bit = bitpos(hash, shift);
                if *bitmap & bit == 0 {
                    return Removal::Absent;
                }
                let position = (*bitmap & (bit - 1)).count_ones() as usize;
                match Self::without_node(&children[position], shift + BITS_PER_LEVEL, hash, key) {
                    Removal::Absent => Removal::Absent,
                    Removal::Pruned => {
                        if *bitmap == bit {
                            // Last child gone: this node vanishes too
                            Removal::Pruned
                        } else {
                            let mut new_children = children.clone();
                            new_children.remove(position);
                            Removal::Replaced(ReferenceCounter::new(MapNode::Bitmap {
                                edit: edit.clone(),
                                bitmap: *bitmap & !bit,
                                children: new_children,
                            }))
                        }
                    }
                    Removal::Replaced(new_child) => {
                        let mut new_children = children.clone();
                        new_children[position] = new_child;
                        Removal::Replaced(ReferenceCounter::new(MapNode::Bitmap {
                            edit: edit.clone(),
                            bitmap: *bitmap,
                            children: new_children,
                        }))
                    }
                }
            }
            MapNode::Full { edit, children } => {
                let index = mask(hash, shift);
                match Self::without_node(&children[index], shift + BITS_PER_LEVEL, hash, key) {
                    Removal::Absent => Removal::Absent,
                    Removal::Pruned => {
                        // Demote to the sparse form with this slot cleared
                        let mut new_children = children.clone();
                        new_children.remove(index);
                        Removal::Replaced(ReferenceCounter::new(MapNode::Bitmap {
                            edit: edit.clone(),
                            bitmap: FULL_BITMAP & !bitpos(hash, shift),
                            children: new_children,
                        }))
                    }
                    Removal::Replaced(new_child) => {
                        let mut new_children = children.clone();
                        new_children[index] = new_child;
                        Removal::Replaced(ReferenceCounter::new(MapNode::Full {
                            edit: edit.clone(),
                            children: new_children,
                        }))
                    }
                }
            }
            MapNode::Collision {
                edit,
                hash: collision_hash,
                entries,
            } => {
                if *collision_hash != hash {
                    return Removal::Absent;
                }
                match entries.iter().position(|(entry_key, _)| entry_key.borrow() == key) {
                    None => Removal::Absent,
                    Some(position) => {
                        if entries.len() == 2 {
                            // Degenerate to the remaining leaf
                            let (remaining_key, remaining_value) =
                                entries[1 - position].clone();
                            Removal::Replaced(ReferenceCounter::new(MapNode::Leaf {
                                hash,
                                key: remaining_key,
                                value: remaining_value,
                            }))
                        } else {
                            let mut new_entries = entries.clone();
                            new_entries.remove(position);
                            Removal::Replaced(ReferenceCounter::new(MapNode::Collision {
                                edit: edit.clone(),
                                hash,
                                entries: new_entries,
                            }))
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// TransientHashMap Definition
// =============================================================================

/// A single-owner mutable overlay over a [`PersistentHashMap`].
///
/// A transient batches a run of insertions and removals without the
/// per-step path-copy cost of the persistent operations. Each interior node
/// on a mutated path is claimed at most once: the first touch copies it and
/// stamps the copy with the transient's ownership token; later touches
/// mutate the claimed node in place. Structure still reachable from any
/// persistent value carries a different token and is therefore never
/// mutated.
///
/// Calling [`persistent`](Self::persistent) seals the handle; every later
/// mutating call fails with [`CollectionError::ClosedTransient`].
///
/// # Examples
///
/// ```rust
/// use trellis::PersistentHashMap;
///
/// let mut transient = PersistentHashMap::new().as_transient();
/// for value in 0..100 {
///     transient.insert(value, value * 2).unwrap();
/// }
/// let map = transient.persistent().unwrap();
///
/// assert_eq!(map.len(), 100);
/// assert!(transient.insert(100, 200).is_err()); // sealed
/// ```
pub struct TransientHashMap<K, V> {
    /// Open ownership token; minted at `as_transient`, closed at seal
    edit: OwnerToken,
    root: ReferenceCounter<MapNode<K, V>>,
    length: usize,
}

impl<K, V> TransientHashMap<K, V> {
    /// Returns the number of entries currently in the transient.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the transient contains no entries.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn ensure_editable(&self) -> Result<(), CollectionError> {
        if self.edit.is_open() {
            Ok(())
        } else {
            Err(CollectionError::ClosedTransient)
        }
    }
}

impl<K: Hash + Eq, V> TransientHashMap<K, V> {
    /// Returns a reference to the value corresponding to the key.
    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_of(key);
        PersistentHashMap::find_in_node(&self.root, 0, hash, key)
    }

    /// Returns `true` if the transient contains a value for the key.
    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> TransientHashMap<K, V> {
    /// Inserts a key-value pair in place.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle has been
    /// sealed.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), CollectionError> {
        self.ensure_editable()?;
        self.do_insert(key, value);
        Ok(())
    }

    /// Removes a key in place.
    ///
    /// Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle has been
    /// sealed.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<(), CollectionError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.ensure_editable()?;
        let hash = hash_of(key);
        let mut removed = false;
        if Self::without_in_place(&self.edit, &mut self.root, 0, hash, key, &mut removed) {
            self.root = ReferenceCounter::new(MapNode::Empty);
        }
        if removed {
            self.length -= 1;
        }
        Ok(())
    }

    /// Seals the transient and returns the immutable map.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle was
    /// already sealed.
    pub fn persistent(&mut self) -> Result<PersistentHashMap<K, V>, CollectionError> {
        self.ensure_editable()?;
        Ok(self.seal())
    }

    fn seal(&mut self) -> PersistentHashMap<K, V> {
        self.edit.close();
        PersistentHashMap {
            root: self.root.clone(),
            length: self.length,
        }
    }

    /// Insert without the openness check, for internal batch construction.
    fn do_insert(&mut self, key: K, value: V) {
        let hash = hash_of(&key);
        let mut added = false;
        Self::assoc_in_place(&self.edit, &mut self.root, 0, hash, key, value, &mut added);
        if added {
            self.length += 1;
        }
    }

    /// Claims `node` for this transient: a node carrying another owner's
    /// token is replaced by a clone stamped with `edit`. `Empty` and `Leaf`
    /// nodes are left alone; they are replaced wholesale instead.
    fn claim(edit: &OwnerToken, node: &mut ReferenceCounter<MapNode<K, V>>) {
        let owned = match node.as_ref() {
            MapNode::Empty | MapNode::Leaf { .. } => true,
            MapNode::Bitmap { edit: node_edit, .. }
            | MapNode::Full { edit: node_edit, .. }
            | MapNode::Collision { edit: node_edit, .. } => node_edit.is_same(edit),
        };
        if !owned {
            let claimed = match node.as_ref() {
                MapNode::Empty | MapNode::Leaf { .. } => return,
                MapNode::Bitmap {
                    bitmap, children, ..
                } => MapNode::Bitmap {
                    edit: edit.clone(),
                    bitmap: *bitmap,
                    children: children.clone(),
                },
                MapNode::Full { children, .. } => MapNode::Full {
                    edit: edit.clone(),
                    children: children.clone(),
                },
                MapNode::Collision { hash, entries, .. } => MapNode::Collision {
                    edit: edit.clone(),
                    hash: *hash,
                    entries: entries.clone(),
                },
            };
            *node = ReferenceCounter::new(claimed);
        }
    }

    /// In-place variant of `assoc_in_node`: claims each interior node on
    /// the path and mutates it directly.
    fn assoc_in_place(
        edit: &OwnerToken,
        node: &mut ReferenceCounter<MapNode<K, V>>,
        shift: usize,
        hash: u32,
        key: K,
        value: V,
        added: &mut bool,
    ) {
        match node.as_ref() {
            MapNode::Empty => {
                *added = true;
                *node = ReferenceCounter::new(MapNode::Leaf { hash, key, value });
            }
            MapNode::Leaf {
                hash: leaf_hash,
                key: leaf_key,
                value: leaf_value,
            } => {
                if *leaf_hash == hash && *leaf_key == key {
                    if *leaf_value != value {
                        if let MapNode::Leaf { value: slot, .. } = ReferenceCounter::make_mut(node)
                        {
                            *slot = value;
                        }
                    }
                } else if *leaf_hash == hash {
                    *added = true;
                    let entries = vec![(leaf_key.clone(), leaf_value.clone()), (key, value)];
                    *node = ReferenceCounter::new(MapNode::Collision {
                        edit: edit.clone(),
                        hash,
                        entries,
                    });
                } else {
                    let seeded = MapNode::Bitmap {
                        edit: edit.clone(),
                        bitmap: bitpos(*leaf_hash, shift),
                        children: vec![node.clone()],
                    };
                    *node = ReferenceCounter::new(seeded);
                    Self::assoc_in_place(edit, node, shift, hash, key, value, added);
                }
            }
            MapNode::Bitmap { .. } => {
                Self::claim(edit, node);
                let mut promote = false;
                if let MapNode::Bitmap {
                    bitmap, children, ..
                } = ReferenceCounter::make_mut(node)
                {
                    let bit = bitpos(hash, shift);
                    let position = (*bitmap & (bit - 1)).count_ones() as usize;
                    if *bitmap & bit == 0 {
                        *added = true;
                        children.insert(
                            position,
                            ReferenceCounter::new(MapNode::Leaf { hash, key, value }),
                        );
                        *bitmap |= bit;
                        promote = *bitmap == FULL_BITMAP;
                    } else {
                        Self::assoc_in_place(
                            edit,
                            &mut children[position],
                            shift + BITS_PER_LEVEL,
                            hash,
                            key,
                            value,
                            added,
                        );
                    }
                }
                if promote {
                    Self::promote_to_full(edit, node);
                }
            }
            MapNode::Full { .. } => {
                Self::claim(edit, node);
                if let MapNode::Full { children, .. } = ReferenceCounter::make_mut(node) {
                    let index = mask(hash, shift);
                    Self::assoc_in_place(
                        edit,
                        &mut children[index],
                        shift + BITS_PER_LEVEL,
                        hash,
                        key,
                        value,
                        added,
                    );
                }
            }
            MapNode::Collision {
                hash: collision_hash,
                ..
            } => {
                if *collision_hash == hash {
                    Self::claim(edit, node);
                    if let MapNode::Collision { entries, .. } = ReferenceCounter::make_mut(node) {
                        if let Some(position) =
                            entries.iter().position(|(entry_key, _)| *entry_key == key)
                        {
                            if entries[position].1 != value {
                                entries[position] = (key, value);
                            }
                        } else {
                            *added = true;
                            entries.push((key, value));
                        }
                    }
                } else {
                    let seeded = MapNode::Bitmap {
                        edit: edit.clone(),
                        bitmap: bitpos(*collision_hash, shift),
                        children: vec![node.clone()],
                    };
                    *node = ReferenceCounter::new(seeded);
                    Self::assoc_in_place(edit, node, shift, hash, key, value, added);
                }
            }
        }
    }

    /// Swaps a just-filled sparse node for the dense representation.
    fn promote_to_full(edit: &OwnerToken, node: &mut ReferenceCounter<MapNode<K, V>>) {
        let children = match ReferenceCounter::make_mut(node) {
            MapNode::Bitmap { children, .. } => std::mem::take(children),
            _ => return,
        };
        *node = ReferenceCounter::new(MapNode::Full {
            edit: edit.clone(),
            children,
        });
    }

    /// In-place variant of `without_node`; the return flag reports that
    /// `node` lost its last entry and should be discarded by the caller.
    fn without_in_place<Q>(
        edit: &OwnerToken,
        node: &mut ReferenceCounter<MapNode<K, V>>,
        shift: usize,
        hash: u32,
        key: &Q,
        removed: &mut bool,
    ) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match node.as_ref() {
            MapNode::Empty => false,
            MapNode::Leaf {
                hash: leaf_hash,
                key: leaf_key,
                ..
            } => {
                if *leaf_hash == hash && leaf_key.borrow() == key {
                    *removed = true;
                    true
                } else {
                    false
                }
            }
            MapNode::Bitmap { bitmap, .. } => {
                let bit = bitpos(hash, shift);
                if *bitmap & bit == 0 {
                    return false;
                }
                Self::claim(edit, node);
                let mut emptied = false;
                if let MapNode::Bitmap {
                    bitmap, children, ..
                } = ReferenceCounter::make_mut(node)
                {
                    let position = (*bitmap & (bit - 1)).count_ones() as usize;
                    if Self::without_in_place(
                        edit,
                        &mut children[position],
                        shift + BITS_PER_LEVEL,
                        hash,
                        key,
                        removed,
                    ) {
                        children.remove(position);
                        *bitmap &= !bit;
                        emptied = children.is_empty();
                    }
                }
                emptied
            }
            MapNode::Full { .. } => {
                Self::claim(edit, node);
                let mut demote = None;
                if let MapNode::Full { children, .. } = ReferenceCounter::make_mut(node) {
                    let index = mask(hash, shift);
                    if Self::without_in_place(
                        edit,
                        &mut children[index],
                        shift + BITS_PER_LEVEL,
                        hash,
                        key,
                        removed,
                    ) {
                        demote = Some(index);
                    }
                }
                if let Some(index) = demote {
                    let mut children = match ReferenceCounter::make_mut(node) {
                        MapNode::Full { children, .. } => std::mem::take(children),
                        _ => Vec::new(),
                    };
                    children.remove(index);
                    *node = ReferenceCounter::new(MapNode::Bitmap {
                        edit: edit.clone(),
                        bitmap: FULL_BITMAP & !bitpos(hash, shift),
                        children,
                    });
                }
                false
            }
            MapNode::Collision {
                hash: collision_hash,
                ..
            } => {
                if *collision_hash != hash {
                    return false;
                }
                Self::claim(edit, node);
                let mut degrade = None;
                if let MapNode::Collision { entries, .. } = ReferenceCounter::make_mut(node) {
                    if let Some(position) = entries
                        .iter()
                        .position(|(entry_key, _)| entry_key.borrow() == key)
                    {
                        *removed = true;
                        entries.remove(position);
                        if entries.len() == 1 {
                            degrade = entries.pop();
                        }
                    }
                }
                if let Some((remaining_key, remaining_value)) = degrade {
                    *node = ReferenceCounter::new(MapNode::Leaf {
                        hash,
                        key: remaining_key,
                        value: remaining_value,
                    });
                }
                false
            }
        }
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// A stack frame of the lazy trie walk: a node plus the position of the
/// next child (or collision entry) to visit.
struct MapTraversalFrame<'a, K, V> {
    node: &'a MapNode<K, V>,
    position: usize,
}

/// A lazy iterator over the entries of a [`PersistentHashMap`].
///
/// Driven by an explicit frame stack (never deeper than the trie height),
/// so the sequence is pull-based and restartable from any yielded point.
pub struct PersistentHashMapIterator<'a, K, V> {
    stack: SmallVec<[MapTraversalFrame<'a, K, V>; 8]>,
    remaining: usize,
}

impl<'a, K, V> PersistentHashMapIterator<'a, K, V> {
    fn new(map: &'a PersistentHashMap<K, V>) -> Self {
        let mut stack = SmallVec::new();
        stack.push(MapTraversalFrame {
            node: map.root.as_ref(),
            position: 0,
        });
        Self {
            stack,
            remaining: map.length,
        }
    }
}

impl<'a, K, V> Iterator for PersistentHashMapIterator<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let node = frame.node;
            let position = frame.position;
            frame.position += 1;

            match node {
                MapNode::Empty => {
                    self.stack.pop();
                }
                MapNode::Leaf { key, value, .. } => {
                    if position == 0 {
                        self.remaining -= 1;
                        return Some((key, value));
                    }
                    self.stack.pop();
                }
                MapNode::Bitmap { children, .. } | MapNode::Full { children, .. } => {
                    if position < children.len() {
                        self.stack.push(MapTraversalFrame {
                            node: children[position].as_ref(),
                            position: 0,
                        });
                    } else {
                        self.stack.pop();
                    }
                }
                MapNode::Collision { entries, .. } => {
                    if position < entries.len() {
                        self.remaining -= 1;
                        let (key, value) = &entries[position];
                        return Some((key, value));
                    }
                    self.stack.pop();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for PersistentHashMapIterator<'_, K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

/// An iterator over the keys of a [`PersistentHashMap`].
pub struct PersistentHashMapKeys<'a, K, V> {
    inner: PersistentHashMapIterator<'a, K, V>,
}

impl<'a, K, V> Iterator for PersistentHashMapKeys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, _)| key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An iterator over the values of a [`PersistentHashMap`].
pub struct PersistentHashMapValues<'a, K, V> {
    inner: PersistentHashMapIterator<'a, K, V>,
}

impl<'a, K, V> Iterator for PersistentHashMapValues<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, value)| value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A stack frame of the owning trie walk.
struct MapIntoIteratorFrame<K, V> {
    node: ReferenceCounter<MapNode<K, V>>,
    position: usize,
}

/// An owning iterator over the entries of a [`PersistentHashMap`].
///
/// Entries are cloned out of the shared trie one at a time.
pub struct PersistentHashMapIntoIterator<K, V> {
    stack: SmallVec<[MapIntoIteratorFrame<K, V>; 8]>,
    remaining: usize,
}

impl<K: Clone, V: Clone> Iterator for PersistentHashMapIntoIterator<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let position = frame.position;
            frame.position += 1;
            let node = frame.node.clone();

            match node.as_ref() {
                MapNode::Empty => {
                    self.stack.pop();
                }
                MapNode::Leaf { key, value, .. } => {
                    if position == 0 {
                        self.remaining -= 1;
                        return Some((key.clone(), value.clone()));
                    }
                    self.stack.pop();
                }
                MapNode::Bitmap { children, .. } | MapNode::Full { children, .. } => {
                    if position < children.len() {
                        self.stack.push(MapIntoIteratorFrame {
                            node: children[position].clone(),
                            position: 0,
                        });
                    } else {
                        self.stack.pop();
                    }
                }
                MapNode::Collision { entries, .. } => {
                    if position < entries.len() {
                        self.remaining -= 1;
                        let (key, value) = entries[position].clone();
                        return Some((key, value));
                    }
                    self.stack.pop();
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K: Clone, V: Clone> ExactSizeIterator for PersistentHashMapIntoIterator<K, V> {
    fn len(&self) -> usize {
        self.remaining
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<K, V> Default for PersistentHashMap<K, V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> FromIterator<(K, V)>
    for PersistentHashMap<K, V>
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut transient = Self::new().as_transient();
        for (key, value) in iter {
            transient.do_insert(key, value);
        }
        transient.seal()
    }
}

impl<K: Clone, V: Clone> IntoIterator for PersistentHashMap<K, V> {
    type Item = (K, V);
    type IntoIter = PersistentHashMapIntoIterator<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        let mut stack = SmallVec::new();
        stack.push(MapIntoIteratorFrame {
            node: self.root,
            position: 0,
        });
        PersistentHashMapIntoIterator {
            stack,
            remaining: self.length,
        }
    }
}

impl<'a, K, V> IntoIterator for &'a PersistentHashMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = PersistentHashMapIterator<'a, K, V>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for PersistentHashMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        // Iteration order is hash-dependent, so compare by lookup
        self.length == other.length
            && self.iter().all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K: Hash + Eq, V: Eq> Eq for PersistentHashMap<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentHashMap<K, V> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_map().entries(self.iter()).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// A key whose hash ignores `tag`, forcing full 32-bit collisions
    /// between keys that differ only in `tag`.
    #[derive(Clone, Debug, PartialEq, Eq)]
    struct CollidingKey {
        id: u32,
        tag: u32,
    }

    impl Hash for CollidingKey {
        fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    const fn colliding(id: u32, tag: u32) -> CollidingKey {
        CollidingKey { id, tag }
    }

    #[rstest]
    fn test_new_creates_empty() {
        let map: PersistentHashMap<String, i32> = PersistentHashMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.get("anything"), None);
    }

    #[rstest]
    fn test_insert_and_get() {
        let map = PersistentHashMap::new()
            .insert("one".to_string(), 1)
            .insert("two".to_string(), 2)
            .insert("three".to_string(), 3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("one"), Some(&1));
        assert_eq!(map.get("two"), Some(&2));
        assert_eq!(map.get("three"), Some(&3));
        assert_eq!(map.get("four"), None);
    }

    #[rstest]
    fn test_insert_replaces_value() {
        let map1 = PersistentHashMap::new().insert("key".to_string(), 1);
        let map2 = map1.insert("key".to_string(), 2);
        assert_eq!(map1.get("key"), Some(&1));
        assert_eq!(map2.get("key"), Some(&2));
        assert_eq!(map2.len(), 1);
    }

    #[rstest]
    fn test_insert_identical_entry_shares_root() {
        let map1 = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);
        let map2 = map1.insert("a".to_string(), 1);
        // Equal key and equal value: the whole trie is reused
        assert!(ReferenceCounter::ptr_eq(&map1.root, &map2.root));
        assert_eq!(map2.len(), 2);
    }

    #[rstest]
    fn test_insert_if_absent() {
        let map = PersistentHashMap::new().insert("a".to_string(), 1);

        let grown = map.insert_if_absent("b".to_string(), 2).unwrap();
        assert_eq!(grown.len(), 2);

        assert_eq!(
            map.insert_if_absent("a".to_string(), 3).unwrap_err(),
            CollectionError::KeyAlreadyPresent
        );
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.len(), 1);
    }

    #[rstest]
    fn test_remove() {
        let map = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);
        let removed = map.remove("a");

        assert_eq!(map.len(), 2);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed.get("a"), None);
        assert_eq!(removed.get("b"), Some(&2));
    }

    #[rstest]
    fn test_remove_absent_key_shares_root() {
        let map = PersistentHashMap::new().insert("a".to_string(), 1);
        let same = map.remove("missing");
        assert!(ReferenceCounter::ptr_eq(&map.root, &same.root));
        assert_eq!(same.len(), 1);
    }

    #[rstest]
    fn test_remove_last_entry_empties_map() {
        let map = PersistentHashMap::new().insert("only".to_string(), 1);
        let empty = map.remove("only");
        assert!(empty.is_empty());
        assert_eq!(map.len(), 1);
    }

    #[rstest]
    fn test_assoc_without_scenario() {
        // assoc "a", assoc "b", without "a": the intermediate map survives
        let empty: PersistentHashMap<String, i32> = PersistentHashMap::new();
        let with_a = empty.insert("a".to_string(), 1);
        let with_both = with_a.insert("b".to_string(), 2);
        let without_a = with_both.remove("a");

        assert_eq!(without_a.len(), 1);
        assert_eq!(without_a.get("a"), None);
        assert_eq!(without_a.get("b"), Some(&2));

        assert_eq!(with_both.len(), 2);
        assert_eq!(with_both.get("a"), Some(&1));
        assert_eq!(with_both.get("b"), Some(&2));
    }

    #[rstest]
    fn test_collision_entries_are_independent() {
        let first = colliding(7, 0);
        let second = colliding(7, 1);
        let third = colliding(7, 2);

        let map = PersistentHashMap::new()
            .insert(first.clone(), "first")
            .insert(second.clone(), "second")
            .insert(third.clone(), "third");

        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&first), Some(&"first"));
        assert_eq!(map.get(&second), Some(&"second"));
        assert_eq!(map.get(&third), Some(&"third"));

        let without_second = map.remove(&second);
        assert_eq!(without_second.len(), 2);
        assert_eq!(without_second.get(&second), None);
        assert_eq!(without_second.get(&first), Some(&"first"));
        assert_eq!(without_second.get(&third), Some(&"third"));
    }

    #[rstest]
    fn test_collision_degenerates_to_leaf() {
        let first = colliding(3, 0);
        let second = colliding(3, 1);

        let map = PersistentHashMap::new()
            .insert(first.clone(), 1)
            .insert(second.clone(), 2);
        let single = map.remove(&first);

        assert_eq!(single.len(), 1);
        assert!(matches!(single.root.as_ref(), MapNode::Leaf { .. }));
        assert_eq!(single.get(&second), Some(&2));
    }

    #[rstest]
    fn test_collision_node_shape() {
        let map = PersistentHashMap::new()
            .insert(colliding(9, 0), 1)
            .insert(colliding(9, 1), 2);
        assert!(matches!(
            map.root.as_ref(),
            MapNode::Collision { entries, .. } if entries.len() == 2
        ));
    }

    #[rstest]
    fn test_large_map_upgrades_root_to_full() {
        let mut map: PersistentHashMap<i32, i32> = PersistentHashMap::new();
        for key in 0..10_000 {
            map = map.insert(key, key * 2);
        }
        assert_eq!(map.len(), 10_000);
        // Every root slot is occupied at this size
        assert!(matches!(map.root.as_ref(), MapNode::Full { .. }));
        for key in 0..10_000 {
            assert_eq!(map.get(&key), Some(&(key * 2)));
        }
    }

    #[rstest]
    fn test_large_map_remove_all() {
        let mut map: PersistentHashMap<i32, i32> = PersistentHashMap::new();
        for key in 0..2_000 {
            map = map.insert(key, key);
        }
        for key in 0..2_000 {
            map = map.remove(&key);
            assert_eq!(map.get(&key), None);
        }
        assert!(map.is_empty());
    }

    #[rstest]
    fn test_iter_visits_every_entry_once() {
        let map: PersistentHashMap<i32, i32> = (0..500).map(|key| (key, key + 1)).collect();
        let mut seen: Vec<i32> = map.iter().map(|(key, _)| *key).collect();
        seen.sort_unstable();
        let expected: Vec<i32> = (0..500).collect();
        assert_eq!(seen, expected);
        for (key, value) in &map {
            assert_eq!(*value, key + 1);
        }
    }

    #[rstest]
    fn test_iter_covers_collisions() {
        let map = PersistentHashMap::new()
            .insert(colliding(1, 0), 0)
            .insert(colliding(1, 1), 1)
            .insert(colliding(2, 0), 2);
        let mut values: Vec<i32> = map.values().copied().collect();
        values.sort_unstable();
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[rstest]
    fn test_into_iter() {
        let map: PersistentHashMap<i32, i32> = (0..100).map(|key| (key, -key)).collect();
        let mut entries: Vec<(i32, i32)> = map.into_iter().collect();
        entries.sort_unstable();
        assert_eq!(entries.len(), 100);
        for (key, value) in entries {
            assert_eq!(value, -key);
        }
    }

    #[rstest]
    fn test_keys_and_values() {
        let map = PersistentHashMap::new()
            .insert("a".to_string(), 1)
            .insert("b".to_string(), 2);
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        assert_eq!(keys.len(), 2);
        let mut values: Vec<&i32> = map.values().collect();
        values.sort();
        assert_eq!(values, vec![&1, &2]);
    }

    #[rstest]
    fn test_from_iterator_and_eq() {
        let entries = vec![("a".to_string(), 1), ("b".to_string(), 2)];
        let map1: PersistentHashMap<String, i32> = entries.clone().into_iter().collect();
        let map2: PersistentHashMap<String, i32> = entries.into_iter().rev().collect();
        assert_eq!(map1, map2);

        let map3 = map1.insert("c".to_string(), 3);
        assert_ne!(map1, map3);
    }

    #[rstest]
    fn test_debug_format() {
        let map = PersistentHashMap::new().insert("key".to_string(), 1);
        assert_eq!(format!("{map:?}"), "{\"key\": 1}");
    }

    // =========================================================================
    // Transient Tests
    // =========================================================================

    #[rstest]
    fn test_transient_insert_and_seal() {
        let mut transient = PersistentHashMap::new().as_transient();
        for key in 0..1_000 {
            transient.insert(key, key * 3).unwrap();
        }
        let map = transient.persistent().unwrap();
        assert_eq!(map.len(), 1_000);
        for key in 0..1_000 {
            assert_eq!(map.get(&key), Some(&(key * 3)));
        }
    }

    #[rstest]
    fn test_transient_leaves_source_untouched() {
        let source: PersistentHashMap<i32, i32> = (0..200).map(|key| (key, key)).collect();
        let mut transient = source.as_transient();
        for key in 0..200 {
            transient.insert(key, -key).unwrap();
        }
        transient.remove(&0).unwrap();
        let mutated = transient.persistent().unwrap();

        for key in 0..200 {
            assert_eq!(source.get(&key), Some(&key));
        }
        assert_eq!(mutated.get(&0), None);
        assert_eq!(mutated.get(&1), Some(&-1));
        assert_eq!(mutated.len(), 199);
    }

    #[rstest]
    fn test_transient_remove_collision() {
        let mut transient = PersistentHashMap::new().as_transient();
        transient.insert(colliding(5, 0), 0).unwrap();
        transient.insert(colliding(5, 1), 1).unwrap();
        transient.remove(&colliding(5, 0)).unwrap();
        let map = transient.persistent().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&colliding(5, 1)), Some(&1));
    }

    #[rstest]
    fn test_transient_matches_persistent_build() {
        let persistent: PersistentHashMap<i32, i32> =
            (0..3_000).fold(PersistentHashMap::new(), |map, key| map.insert(key, key));
        let transient_built: PersistentHashMap<i32, i32> =
            (0..3_000).map(|key| (key, key)).collect();
        assert_eq!(persistent, transient_built);
    }

    #[rstest]
    fn test_closed_transient_fails() {
        let mut transient = PersistentHashMap::new().as_transient();
        transient.insert(1, 1).unwrap();
        let _map = transient.persistent().unwrap();

        assert_eq!(transient.insert(2, 2).unwrap_err(), CollectionError::ClosedTransient);
        assert_eq!(transient.remove(&1).unwrap_err(), CollectionError::ClosedTransient);
        assert_eq!(
            transient.persistent().unwrap_err(),
            CollectionError::ClosedTransient
        );
    }

    #[rstest]
    fn test_sealed_value_immune_to_later_transient() {
        let mut transient = PersistentHashMap::new().as_transient();
        for key in 0..100 {
            transient.insert(key, key).unwrap();
        }
        let sealed = transient.persistent().unwrap();

        let mut second = sealed.as_transient();
        for key in 0..100 {
            second.insert(key, key + 1).unwrap();
        }
        let mutated = second.persistent().unwrap();

        for key in 0..100 {
            assert_eq!(sealed.get(&key), Some(&key));
            assert_eq!(mutated.get(&key), Some(&(key + 1)));
        }
    }
}
