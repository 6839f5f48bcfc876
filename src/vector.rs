//! Persistent (immutable) vector based on a 32-way index trie.
//!
//! This module provides [`PersistentVector`], an immutable vector that uses
//! structural sharing for efficient operations, and [`TransientVector`], its
//! single-owner mutable overlay for batched updates.
//!
//! # Overview
//!
//! `PersistentVector` stores its elements in a fixed-arity (32-way) index
//! tree plus a small tail buffer holding the most recently appended
//! elements. An index is located by slicing it five bits at a time from the
//! root's shift down to zero; appends land in the tail and only touch the
//! tree once the tail fills up, which makes `push_back` amortized O(1).
//!
//! - O(log32 N) `get` (effectively O(1) for practical sizes)
//! - O(1) amortized `push_back`
//! - O(log32 N) `update` and `pop_back`
//! - O(1) `len` and `is_empty`
//!
//! All operations return new vectors without modifying the original, and
//! structural sharing ensures memory efficiency.
//!
//! # Examples
//!
//! ```rust
//! use trellis::PersistentVector;
//!
//! let vector: PersistentVector<i32> = (0..100).collect();
//! assert_eq!(vector.get(50), Some(&50));
//!
//! // Structural sharing: the original vector is preserved
//! let updated = vector.update(50, 999).unwrap();
//! assert_eq!(vector.get(50), Some(&50));     // Original unchanged
//! assert_eq!(updated.get(50), Some(&999));   // New version
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FromIterator;

use arrayvec::ArrayVec;
use smallvec::SmallVec;
use static_assertions::const_assert_eq;

use crate::ReferenceCounter;
use crate::error::CollectionError;
use crate::owner::OwnerToken;

// =============================================================================
// Constants
// =============================================================================

/// Branching factor (2^5 = 32)
const BRANCHING_FACTOR: usize = 32;

/// Bits per level in the trie
const BITS_PER_LEVEL: usize = 5;

/// Bit mask for extracting index within a node
const MASK: usize = BRANCHING_FACTOR - 1;

const_assert_eq!(BRANCHING_FACTOR, 1 << BITS_PER_LEVEL);

// =============================================================================
// Node Definition
// =============================================================================

/// Internal node structure for the index trie.
///
/// Every node carries the owner token of the transient that allocated it
/// (persistent constructors stamp a sealed token). The token is compared by
/// identity during transient claims and ignored everywhere else.
#[derive(Clone)]
enum VectorNode<T> {
    /// Interior node holding up to 32 children.
    Branch {
        edit: OwnerToken,
        children: [Option<ReferenceCounter<VectorNode<T>>>; BRANCHING_FACTOR],
    },
    /// Bottom node holding the elements of one 32-wide chunk.
    Leaf { edit: OwnerToken, elements: Vec<T> },
}

impl<T> VectorNode<T> {
    /// Creates an empty branch node owned by `edit`.
    fn empty_branch(edit: OwnerToken) -> Self {
        Self::Branch {
            edit,
            children: std::array::from_fn(|_| None),
        }
    }

    fn edit(&self) -> &OwnerToken {
        match self {
            Self::Branch { edit, .. } | Self::Leaf { edit, .. } => edit,
        }
    }
}

impl<T: Clone> VectorNode<T> {
    /// Clones this node with its owner replaced, for the transient claim step.
    fn claimed_clone(&self, edit: OwnerToken) -> Self {
        match self {
            Self::Branch { children, .. } => Self::Branch {
                edit,
                children: children.clone(),
            },
            Self::Leaf { elements, .. } => Self::Leaf {
                edit,
                elements: elements.clone(),
            },
        }
    }
}

// =============================================================================
// PersistentVector Definition
// =============================================================================

/// A persistent (immutable) vector based on a 32-way index trie with a
/// tail buffer.
///
/// `PersistentVector` is an immutable data structure that uses structural
/// sharing to efficiently support functional programming patterns. Prior
/// versions remain valid and independently usable after any update.
///
/// # Time Complexity
///
/// | Operation    | Complexity                    |
/// |--------------|-------------------------------|
/// | `new`        | O(1)                          |
/// | `get`        | O(log32 N)                    |
/// | `push_back`  | O(log32 N), amortized O(1)    |
/// | `pop_back`   | O(log32 N)                    |
/// | `update`     | O(log32 N)                    |
/// | `len`        | O(1)                          |
/// | `is_empty`   | O(1)                          |
///
/// # Examples
///
/// ```rust
/// use trellis::PersistentVector;
///
/// let vector: PersistentVector<i32> = (0..100).collect();
/// assert_eq!(vector.len(), 100);
/// assert_eq!(vector.get(50), Some(&50));
/// ```
#[derive(Clone)]
pub struct PersistentVector<T> {
    /// Total number of elements
    length: usize,
    /// Shift amount for index calculation: (tree height - 1) * `BITS_PER_LEVEL`
    shift: usize,
    /// Root node of the trie
    root: ReferenceCounter<VectorNode<T>>,
    /// Tail buffer for efficient append (up to 32 elements)
    tail: ReferenceCounter<[T]>,
}

impl<T> PersistentVector<T> {
    /// Creates a new empty vector.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = PersistentVector::new();
    /// assert!(vector.is_empty());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            length: 0,
            shift: BITS_PER_LEVEL,
            root: ReferenceCounter::new(VectorNode::empty_branch(OwnerToken::sealed())),
            tail: ReferenceCounter::from(Vec::<T>::new()),
        }
    }

    /// Returns the number of elements in the vector.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the vector contains no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Offset of the first tail element: every index below it lives in the
    /// tree, every index at or above it lives in the tail.
    const fn tail_offset(&self) -> usize {
        if self.length < BRANCHING_FACTOR {
            0
        } else {
            ((self.length - 1) >> BITS_PER_LEVEL) << BITS_PER_LEVEL
        }
    }

    /// Returns a reference to the element at the given index.
    ///
    /// Returns `None` if the index is out of bounds.
    ///
    /// # Complexity
    ///
    /// O(log32 N)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (1..=5).collect();
    /// assert_eq!(vector.get(0), Some(&1));
    /// assert_eq!(vector.get(4), Some(&5));
    /// assert_eq!(vector.get(10), None);
    /// ```
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.length {
            return None;
        }
        // Chunks are aligned to the branching factor, so the position within
        // the covering slice is always the low five bits.
        self.leaf_slice_for(index).get(index & MASK)
    }

    /// Returns a reference to the element at the given index, or an
    /// [`CollectionError::IndexOutOfRange`] error.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` when `index >= self.len()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (1..=5).collect();
    /// assert_eq!(vector.nth(4), Ok(&5));
    /// assert!(vector.nth(5).is_err());
    /// ```
    pub fn nth(&self, index: usize) -> Result<&T, CollectionError> {
        self.get(index).ok_or(CollectionError::IndexOutOfRange {
            index,
            length: self.length,
        })
    }

    /// Returns a reference to the first element, or `None` if the vector is
    /// empty.
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    /// Returns a reference to the last element, or `None` if the vector is
    /// empty.
    ///
    /// # Complexity
    ///
    /// O(1) - the last element is always in the tail
    #[inline]
    #[must_use]
    pub fn last(&self) -> Option<&T> {
        if self.is_empty() { None } else { self.tail.last() }
    }

    /// Returns an iterator over references to the elements.
    ///
    /// The iterator yields elements from front to back in O(N) total time
    /// through a stack-based tree traversal that visits each node exactly
    /// once.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (1..=5).collect();
    /// let collected: Vec<&i32> = vector.iter().collect();
    /// assert_eq!(collected, vec![&1, &2, &3, &4, &5]);
    /// ```
    #[must_use]
    pub fn iter(&self) -> PersistentVectorIterator<'_, T> {
        PersistentVectorIterator::new(self)
    }

    /// Returns an iterator over whole storage chunks.
    ///
    /// Each item is a full 32-element leaf array (or the shorter tail at the
    /// end), which lets bulk consumers process a chunk at a time instead of
    /// descending the tree per element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (0..70).collect();
    /// let chunk_lengths: Vec<usize> = vector.chunks().map(<[i32]>::len).collect();
    /// assert_eq!(chunk_lengths, vec![32, 32, 6]);
    /// ```
    #[must_use]
    pub fn chunks(&self) -> PersistentVectorChunks<'_, T> {
        PersistentVectorChunks {
            vector: self,
            index: 0,
        }
    }

    /// Returns the leaf-array slice covering `index`.
    ///
    /// `index` must be below `self.length`; chunk starts are always aligned
    /// to the branching factor.
    fn leaf_slice_for(&self, index: usize) -> &[T] {
        if index >= self.tail_offset() {
            return &self.tail;
        }

        let mut node = self.root.as_ref();
        let mut level = self.shift;

        while level > 0 {
            match node {
                VectorNode::Branch { children, .. } => {
                    match &children[(index >> level) & MASK] {
                        Some(child) => {
                            node = child.as_ref();
                            level -= BITS_PER_LEVEL;
                        }
                        None => return &[],
                    }
                }
                VectorNode::Leaf { .. } => break,
            }
        }

        match node {
            VectorNode::Leaf { elements, .. } => elements,
            VectorNode::Branch { .. } => &[],
        }
    }
}

impl<T: Clone> PersistentVector<T> {
    /// Creates a vector containing a single element.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector = PersistentVector::singleton(42);
    /// assert_eq!(vector.len(), 1);
    /// assert_eq!(vector.get(0), Some(&42));
    /// ```
    #[inline]
    #[must_use]
    pub fn singleton(element: T) -> Self {
        Self::new().push_back(element)
    }

    /// Creates a `PersistentVector` from a slice.
    ///
    /// The elements are cloned from the slice.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector = PersistentVector::from_slice(&[1, 2, 3, 4, 5]);
    /// assert_eq!(vector.len(), 5);
    /// assert_eq!(vector.get(0), Some(&1));
    /// ```
    #[must_use]
    pub fn from_slice(slice: &[T]) -> Self {
        slice.iter().cloned().collect()
    }

    /// Appends an element to the back of the vector.
    ///
    /// Returns a new vector with the element at the end; the original is
    /// unchanged.
    ///
    /// # Complexity
    ///
    /// O(log32 N), amortized O(1) due to the tail buffer
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector = PersistentVector::new()
    ///     .push_back(1)
    ///     .push_back(2)
    ///     .push_back(3);
    ///
    /// assert_eq!(vector.len(), 3);
    /// assert_eq!(vector.get(2), Some(&3));
    /// ```
    #[must_use]
    pub fn push_back(&self, element: T) -> Self {
        if self.tail.len() < BRANCHING_FACTOR {
            // Tail has space, just add to tail
            let mut new_tail = self.tail.to_vec();
            new_tail.push(element);

            Self {
                length: self.length + 1,
                shift: self.shift,
                root: self.root.clone(),
                tail: ReferenceCounter::from(new_tail),
            }
        } else {
            // Tail is full, push tail into the tree and start a fresh tail
            self.push_tail_to_root(element)
        }
    }

    /// Appends multiple elements to the back of the vector.
    ///
    /// More efficient than calling `push_back` repeatedly: the elements are
    /// batched through a transient and sealed once.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (1..=3).collect();
    /// let extended = vector.push_back_many(4..=6);
    ///
    /// assert_eq!(vector.len(), 3);
    /// assert_eq!(extended.len(), 6);
    /// assert_eq!(extended.get(5), Some(&6));
    /// ```
    #[must_use]
    pub fn push_back_many<I>(&self, iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let mut transient = self.as_transient();
        for element in iter {
            transient.do_push(element);
        }
        transient.seal()
    }

    /// Pushes the full tail into the tree and starts a new tail holding
    /// `element`.
    fn push_tail_to_root(&self, element: T) -> Self {
        let edit = self.root.edit().clone();
        let tail_node = VectorNode::Leaf {
            edit: edit.clone(),
            elements: self.tail.to_vec(),
        };
        let tail_offset = self.tail_offset();

        // The root is full when the tree already spans its capacity at the
        // current shift; the new tail then goes under a taller root.
        let root_overflow = (tail_offset >> self.shift) >= BRANCHING_FACTOR;

        if root_overflow {
            let mut new_root_children: [Option<ReferenceCounter<VectorNode<T>>>;
                BRANCHING_FACTOR] = std::array::from_fn(|_| None);
            new_root_children[0] = Some(self.root.clone());
            new_root_children[1] = Some(ReferenceCounter::new(Self::new_path(
                &edit, self.shift, tail_node,
            )));

            Self {
                length: self.length + 1,
                shift: self.shift + BITS_PER_LEVEL,
                root: ReferenceCounter::new(VectorNode::Branch {
                    edit,
                    children: new_root_children,
                }),
                tail: ReferenceCounter::from(vec![element]),
            }
        } else {
            let new_root =
                Self::push_tail_into_node(&self.root, self.shift, tail_offset, tail_node);

            Self {
                length: self.length + 1,
                shift: self.shift,
                root: ReferenceCounter::new(new_root),
                tail: ReferenceCounter::from(vec![element]),
            }
        }
    }

    /// Creates a left-spine path of branches down to the leaf.
    fn new_path(edit: &OwnerToken, level: usize, node: VectorNode<T>) -> VectorNode<T> {
        if level == 0 {
            node
        } else {
            let mut children: [Option<ReferenceCounter<VectorNode<T>>>; BRANCHING_FACTOR] =
                std::array::from_fn(|_| None);
            children[0] = Some(ReferenceCounter::new(Self::new_path(
                edit,
                level - BITS_PER_LEVEL,
                node,
            )));
            VectorNode::Branch {
                edit: edit.clone(),
                children,
            }
        }
    }

    /// Copy-on-write descent attaching the frozen tail as the rightmost leaf.
    fn push_tail_into_node(
        node: &ReferenceCounter<VectorNode<T>>,
        level: usize,
        tail_offset: usize,
        tail_node: VectorNode<T>,
    ) -> VectorNode<T> {
        let subindex = (tail_offset >> level) & MASK;

        match node.as_ref() {
            VectorNode::Branch { edit, children } => {
                let mut new_children = children.clone();

                if level == BITS_PER_LEVEL {
                    new_children[subindex] = Some(ReferenceCounter::new(tail_node));
                } else {
                    let child = match &children[subindex] {
                        Some(child) => Self::push_tail_into_node(
                            child,
                            level - BITS_PER_LEVEL,
                            tail_offset,
                            tail_node,
                        ),
                        None => Self::new_path(edit, level - BITS_PER_LEVEL, tail_node),
                    };
                    new_children[subindex] = Some(ReferenceCounter::new(child));
                }

                VectorNode::Branch {
                    edit: edit.clone(),
                    children: new_children,
                }
            }
            // Not reachable in a well-formed tree
            VectorNode::Leaf { .. } => tail_node,
        }
    }

    /// Replaces the element at the given index.
    ///
    /// `index == self.len()` degrades to `push_back`. The original vector is
    /// unchanged either way.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::IndexOutOfRange`] when `index > self.len()`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (0..10).collect();
    /// let updated = vector.update(5, 100).unwrap();
    ///
    /// assert_eq!(updated.get(5), Some(&100));
    /// assert_eq!(vector.get(5), Some(&5)); // Original unchanged
    ///
    /// // Updating one past the end appends
    /// let appended = vector.update(10, 10).unwrap();
    /// assert_eq!(appended.len(), 11);
    /// ```
    pub fn update(&self, index: usize, element: T) -> Result<Self, CollectionError> {
        if index == self.length {
            return Ok(self.push_back(element));
        }
        if index > self.length {
            return Err(CollectionError::IndexOutOfRange {
                index,
                length: self.length,
            });
        }

        let tail_offset = self.tail_offset();

        if index >= tail_offset {
            let mut new_tail = self.tail.to_vec();
            new_tail[index - tail_offset] = element;

            Ok(Self {
                length: self.length,
                shift: self.shift,
                root: self.root.clone(),
                tail: ReferenceCounter::from(new_tail),
            })
        } else {
            let new_root = Self::update_in_node(&self.root, self.shift, index, element);

            Ok(Self {
                length: self.length,
                shift: self.shift,
                root: ReferenceCounter::new(new_root),
                tail: self.tail.clone(),
            })
        }
    }

    /// Path-copies the tree down to the leaf holding `index`.
    fn update_in_node(
        node: &ReferenceCounter<VectorNode<T>>,
        level: usize,
        index: usize,
        element: T,
    ) -> VectorNode<T> {
        match node.as_ref() {
            VectorNode::Branch { edit, children } => {
                let subindex = (index >> level) & MASK;
                let mut new_children = children.clone();
                if let Some(child) = &children[subindex] {
                    new_children[subindex] = Some(ReferenceCounter::new(Self::update_in_node(
                        child,
                        level - BITS_PER_LEVEL,
                        index,
                        element,
                    )));
                }
                VectorNode::Branch {
                    edit: edit.clone(),
                    children: new_children,
                }
            }
            VectorNode::Leaf { edit, elements } => {
                let mut new_elements = elements.clone();
                new_elements[index & MASK] = element;
                VectorNode::Leaf {
                    edit: edit.clone(),
                    elements: new_elements,
                }
            }
        }
    }

    /// Removes the last element from the vector.
    ///
    /// Returns the new vector and the removed element; the original is
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::EmptyCollection`] when the vector is empty.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (1..=5).collect();
    /// let (remaining, element) = vector.pop_back().unwrap();
    ///
    /// assert_eq!(element, 5);
    /// assert_eq!(remaining.len(), 4);
    /// assert_eq!(vector.len(), 5); // Original unchanged
    /// ```
    pub fn pop_back(&self) -> Result<(Self, T), CollectionError> {
        if self.is_empty() {
            return Err(CollectionError::EmptyCollection);
        }

        if self.length == 1 {
            return Ok((Self::new(), self.tail[0].clone()));
        }

        if self.tail.len() > 1 {
            // Just trim the tail
            let element = self.tail[self.tail.len() - 1].clone();
            let new_tail = self.tail[..self.tail.len() - 1].to_vec();

            let new_vector = Self {
                length: self.length - 1,
                shift: self.shift,
                root: self.root.clone(),
                tail: ReferenceCounter::from(new_tail),
            };

            Ok((new_vector, element))
        } else {
            // The tail empties: the tree's last leaf becomes the new tail
            let element = self.tail[0].clone();
            let new_tail_offset = self.length - BRANCHING_FACTOR - 1;
            let new_tail = self.leaf_slice_for(new_tail_offset).to_vec();

            let (new_root, new_shift) = self.pop_tail_from_root();

            let new_vector = Self {
                length: self.length - 1,
                shift: new_shift,
                root: new_root,
                tail: ReferenceCounter::from(new_tail),
            };

            Ok((new_vector, element))
        }
    }

    /// Prunes the rightmost leaf path and shrinks the root if its second
    /// slot emptied.
    fn pop_tail_from_root(&self) -> (ReferenceCounter<VectorNode<T>>, usize) {
        let offset = self.length - 2;
        let (new_root, _) = Self::do_pop_tail(&self.root, self.shift, offset);

        if self.shift > BITS_PER_LEVEL
            && let VectorNode::Branch { children, .. } = new_root.as_ref()
            && children[1].is_none()
            && let Some(only_child) = &children[0]
        {
            return (only_child.clone(), self.shift - BITS_PER_LEVEL);
        }

        (new_root, self.shift)
    }

    /// Recursively removes the rightmost leaf; the flag reports a node left
    /// with no children.
    fn do_pop_tail(
        node: &ReferenceCounter<VectorNode<T>>,
        level: usize,
        offset: usize,
    ) -> (ReferenceCounter<VectorNode<T>>, bool) {
        let subindex = (offset >> level) & MASK;

        match node.as_ref() {
            VectorNode::Branch { edit, children } => {
                if level == BITS_PER_LEVEL {
                    let mut new_children = children.clone();
                    new_children[subindex] = None;

                    let all_empty = new_children.iter().all(Option::is_none);
                    (
                        ReferenceCounter::new(VectorNode::Branch {
                            edit: edit.clone(),
                            children: new_children,
                        }),
                        all_empty,
                    )
                } else if let Some(child) = &children[subindex] {
                    let (new_child, child_empty) =
                        Self::do_pop_tail(child, level - BITS_PER_LEVEL, offset);
                    let mut new_children = children.clone();

                    new_children[subindex] = if child_empty { None } else { Some(new_child) };

                    let all_empty = new_children.iter().all(Option::is_none);
                    (
                        ReferenceCounter::new(VectorNode::Branch {
                            edit: edit.clone(),
                            children: new_children,
                        }),
                        all_empty,
                    )
                } else {
                    (node.clone(), false)
                }
            }
            VectorNode::Leaf { .. } => (node.clone(), true),
        }
    }

    /// Opens a transient view over this vector.
    ///
    /// The transient starts out sharing this vector's tree; nodes are
    /// claimed (copied once, then reused) lazily as mutations touch them,
    /// so this call is O(1) plus one tail copy.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use trellis::PersistentVector;
    ///
    /// let vector: PersistentVector<i32> = (0..10).collect();
    /// let mut transient = vector.as_transient();
    /// transient.push(10).unwrap();
    /// let grown = transient.persistent().unwrap();
    ///
    /// assert_eq!(grown.len(), 11);
    /// assert_eq!(vector.len(), 10); // Original unchanged
    /// ```
    #[must_use]
    pub fn as_transient(&self) -> TransientVector<T> {
        TransientVector {
            edit: OwnerToken::open(),
            length: self.length,
            shift: self.shift,
            root: self.root.clone(),
            tail: self.tail.iter().cloned().collect(),
        }
    }
}

// =============================================================================
// TransientVector Definition
// =============================================================================

/// A single-owner mutable overlay over a [`PersistentVector`].
///
/// A transient batches a run of mutations without the per-step path-copy
/// cost of the persistent operations. Each node on a mutated path is
/// claimed at most once: the first touch copies it and stamps the copy with
/// the transient's ownership token; later touches mutate the claimed node
/// in place. Structure still reachable from any persistent value carries a
/// different token and is therefore never mutated.
///
/// Calling [`persistent`](Self::persistent) seals the handle and returns an
/// ordinary immutable vector; every later mutating call fails with
/// [`CollectionError::ClosedTransient`].
///
/// # Examples
///
/// ```rust
/// use trellis::PersistentVector;
///
/// let mut transient = PersistentVector::new().as_transient();
/// for value in 0..100 {
///     transient.push(value).unwrap();
/// }
/// let vector = transient.persistent().unwrap();
///
/// assert_eq!(vector.len(), 100);
/// assert!(transient.push(100).is_err()); // sealed
/// ```
pub struct TransientVector<T> {
    /// Open ownership token; minted at `as_transient`, closed at seal
    edit: OwnerToken,
    length: usize,
    shift: usize,
    root: ReferenceCounter<VectorNode<T>>,
    /// Private fixed-capacity tail; converted to the shared tail on seal
    tail: ArrayVec<T, BRANCHING_FACTOR>,
}

impl<T> TransientVector<T> {
    /// Returns the number of elements currently in the transient.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if the transient contains no elements.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    const fn tail_offset(&self) -> usize {
        if self.length < BRANCHING_FACTOR {
            0
        } else {
            ((self.length - 1) >> BITS_PER_LEVEL) << BITS_PER_LEVEL
        }
    }

    /// Returns a reference to the element at the given index, or `None` if
    /// the index is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.length {
            return None;
        }

        if index >= self.tail_offset() {
            return self.tail.get(index & MASK);
        }

        let mut node = self.root.as_ref();
        let mut level = self.shift;

        while level > 0 {
            match node {
                VectorNode::Branch { children, .. } => {
                    match &children[(index >> level) & MASK] {
                        Some(child) => {
                            node = child.as_ref();
                            level -= BITS_PER_LEVEL;
                        }
                        None => return None,
                    }
                }
                VectorNode::Leaf { .. } => break,
            }
        }

        match node {
            VectorNode::Leaf { elements, .. } => elements.get(index & MASK),
            VectorNode::Branch { .. } => None,
        }
    }

    fn ensure_editable(&self) -> Result<(), CollectionError> {
        if self.edit.is_open() {
            Ok(())
        } else {
            Err(CollectionError::ClosedTransient)
        }
    }
}

impl<T: Clone> TransientVector<T> {
    /// Appends an element in place.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle has been
    /// sealed.
    pub fn push(&mut self, element: T) -> Result<(), CollectionError> {
        self.ensure_editable()?;
        self.do_push(element);
        Ok(())
    }

    /// Replaces the element at the given index in place; `index == len()`
    /// degrades to a push.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle has been
    /// sealed, and [`CollectionError::IndexOutOfRange`] when
    /// `index > self.len()`.
    pub fn set(&mut self, index: usize, element: T) -> Result<(), CollectionError> {
        self.ensure_editable()?;

        if index == self.length {
            self.do_push(element);
            return Ok(());
        }
        if index > self.length {
            return Err(CollectionError::IndexOutOfRange {
                index,
                length: self.length,
            });
        }

        if index >= self.tail_offset() {
            self.tail[index & MASK] = element;
        } else {
            Self::set_in_place(&self.edit, &mut self.root, self.shift, index, element);
        }
        Ok(())
    }

    /// Removes and returns the last element in place.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle has been
    /// sealed, and [`CollectionError::EmptyCollection`] when the transient
    /// is empty.
    pub fn pop(&mut self) -> Result<T, CollectionError> {
        self.ensure_editable()?;

        if self.length == 0 {
            return Err(CollectionError::EmptyCollection);
        }

        if self.tail.len() > 1 || self.length == 1 {
            let element = self.tail.pop().ok_or(CollectionError::EmptyCollection)?;
            self.length -= 1;
            return Ok(element);
        }

        // The tail empties: pull the tree's last leaf back out as the tail
        let element = self.tail.pop().ok_or(CollectionError::EmptyCollection)?;
        let new_tail = self.leaf_elements_at(self.length - 2);

        if Self::pop_tail_in_place(&self.edit, &mut self.root, self.shift, self.length - 2) {
            self.root = ReferenceCounter::new(VectorNode::empty_branch(self.edit.clone()));
        }

        let mut shrink_to = None;
        if self.shift > BITS_PER_LEVEL
            && let VectorNode::Branch { children, .. } = self.root.as_ref()
            && children[1].is_none()
            && let Some(only_child) = &children[0]
        {
            shrink_to = Some(only_child.clone());
        }
        if let Some(new_root) = shrink_to {
            self.root = new_root;
            self.shift -= BITS_PER_LEVEL;
        }

        self.tail = new_tail.into_iter().collect();
        self.length -= 1;
        Ok(element)
    }

    /// Seals the transient and returns the immutable vector.
    ///
    /// The ownership token is closed, so the handle cannot be used for
    /// further mutation and no node the returned vector shares can ever be
    /// claimed again.
    ///
    /// # Errors
    ///
    /// Returns [`CollectionError::ClosedTransient`] if the handle was
    /// already sealed.
    pub fn persistent(&mut self) -> Result<PersistentVector<T>, CollectionError> {
        self.ensure_editable()?;
        Ok(self.seal())
    }

    fn seal(&mut self) -> PersistentVector<T> {
        self.edit.close();
        let tail: Vec<T> = self.tail.drain(..).collect();
        PersistentVector {
            length: self.length,
            shift: self.shift,
            root: self.root.clone(),
            tail: ReferenceCounter::from(tail),
        }
    }

    /// Append without the openness check, for internal batch construction.
    fn do_push(&mut self, element: T) {
        if self.tail.len() < BRANCHING_FACTOR {
            self.tail.push(element);
            self.length += 1;
            return;
        }

        // Full tail: freeze it into a leaf owned by this transient
        let frozen: Vec<T> = self.tail.drain(..).collect();
        let tail_node = VectorNode::Leaf {
            edit: self.edit.clone(),
            elements: frozen,
        };
        let tail_offset = self.tail_offset();

        if (tail_offset >> self.shift) >= BRANCHING_FACTOR {
            // Root overflow: grow a level
            let mut children: [Option<ReferenceCounter<VectorNode<T>>>; BRANCHING_FACTOR] =
                std::array::from_fn(|_| None);
            children[0] = Some(self.root.clone());
            children[1] = Some(ReferenceCounter::new(PersistentVector::new_path(
                &self.edit, self.shift, tail_node,
            )));
            self.root = ReferenceCounter::new(VectorNode::Branch {
                edit: self.edit.clone(),
                children,
            });
            self.shift += BITS_PER_LEVEL;
        } else {
            Self::push_tail_in_place(
                &self.edit,
                &mut self.root,
                self.shift,
                tail_offset,
                tail_node,
            );
        }

        self.tail.push(element);
        self.length += 1;
    }

    /// Claims `node` for this transient: a node carrying another owner's
    /// token is replaced by a clone stamped with `edit`.
    fn claim(edit: &OwnerToken, node: &mut ReferenceCounter<VectorNode<T>>) {
        if !node.edit().is_same(edit) {
            *node = ReferenceCounter::new(node.claimed_clone(edit.clone()));
        }
    }

    /// In-place variant of `push_tail_into_node`: claims each node on the
    /// rightmost path and mutates it directly.
    fn push_tail_in_place(
        edit: &OwnerToken,
        node: &mut ReferenceCounter<VectorNode<T>>,
        level: usize,
        tail_offset: usize,
        tail_node: VectorNode<T>,
    ) {
        Self::claim(edit, node);
        let subindex = (tail_offset >> level) & MASK;

        if let VectorNode::Branch { children, .. } = ReferenceCounter::make_mut(node) {
            if level == BITS_PER_LEVEL {
                children[subindex] = Some(ReferenceCounter::new(tail_node));
            } else if let Some(child) = &mut children[subindex] {
                Self::push_tail_in_place(edit, child, level - BITS_PER_LEVEL, tail_offset, tail_node);
            } else {
                children[subindex] = Some(ReferenceCounter::new(PersistentVector::new_path(
                    edit,
                    level - BITS_PER_LEVEL,
                    tail_node,
                )));
            }
        }
    }

    /// In-place variant of `update_in_node`.
    fn set_in_place(
        edit: &OwnerToken,
        node: &mut ReferenceCounter<VectorNode<T>>,
        level: usize,
        index: usize,
        element: T,
    ) {
        Self::claim(edit, node);

        match ReferenceCounter::make_mut(node) {
            VectorNode::Branch { children, .. } => {
                let subindex = (index >> level) & MASK;
                if let Some(child) = &mut children[subindex] {
                    Self::set_in_place(edit, child, level - BITS_PER_LEVEL, index, element);
                }
            }
            VectorNode::Leaf { elements, .. } => {
                elements[index & MASK] = element;
            }
        }
    }

    /// In-place variant of `do_pop_tail`; the return flag reports that
    /// `node` lost its last occupied slot and should be discarded.
    fn pop_tail_in_place(
        edit: &OwnerToken,
        node: &mut ReferenceCounter<VectorNode<T>>,
        level: usize,
        offset: usize,
    ) -> bool {
        Self::claim(edit, node);
        let subindex = (offset >> level) & MASK;

        if let VectorNode::Branch { children, .. } = ReferenceCounter::make_mut(node) {
            if level > BITS_PER_LEVEL {
                let child_emptied = match &mut children[subindex] {
                    Some(child) => {
                        Self::pop_tail_in_place(edit, child, level - BITS_PER_LEVEL, offset)
                    }
                    None => false,
                };
                if child_emptied {
                    children[subindex] = None;
                    if subindex == 0 {
                        return true;
                    }
                }
                false
            } else if subindex == 0 {
                true
            } else {
                children[subindex] = None;
                false
            }
        } else {
            true
        }
    }

    /// Clones out the elements of the leaf covering `index`.
    fn leaf_elements_at(&self, index: usize) -> Vec<T> {
        let mut node = self.root.as_ref();
        let mut level = self.shift;

        while level > 0 {
            match node {
                VectorNode::Branch { children, .. } => {
                    match &children[(index >> level) & MASK] {
                        Some(child) => {
                            node = child.as_ref();
                            level -= BITS_PER_LEVEL;
                        }
                        None => return Vec::new(),
                    }
                }
                VectorNode::Leaf { .. } => break,
            }
        }

        match node {
            VectorNode::Leaf { elements, .. } => elements.clone(),
            VectorNode::Branch { .. } => Vec::new(),
        }
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// Current phase of a vector iterator.
enum IteratorState {
    /// Currently traversing the tree (root) structure
    TraversingTree,
    /// Currently processing elements in the tail buffer
    ProcessingTail,
    /// All elements have been consumed
    Exhausted,
}

/// A stack entry for tree traversal.
///
/// Holds a reference to a branch node's children array and tracks which
/// child index to process next, enabling depth-first traversal with
/// efficient backtracking.
struct TraversalStackEntry<'a, T> {
    children: &'a [Option<ReferenceCounter<VectorNode<T>>>; BRANCHING_FACTOR],
    child_index: usize,
}

/// An iterator over references to elements of a [`PersistentVector`].
///
/// Uses a stack-based tree traversal to achieve O(N) total iteration cost;
/// the stack never grows past the tree height (at most 7 frames).
pub struct PersistentVectorIterator<'a, T> {
    vector: &'a PersistentVector<T>,
    traversal_stack: SmallVec<[TraversalStackEntry<'a, T>; 8]>,
    current_leaf: Option<&'a [T]>,
    leaf_index: usize,
    state: IteratorState,
    tail_index: usize,
    elements_returned: usize,
}

impl<'a, T> PersistentVectorIterator<'a, T> {
    fn new(vector: &'a PersistentVector<T>) -> Self {
        let state = if vector.is_empty() {
            IteratorState::Exhausted
        } else if vector.tail_offset() == 0 {
            // All elements are in the tail
            IteratorState::ProcessingTail
        } else {
            IteratorState::TraversingTree
        };

        let mut iterator = Self {
            vector,
            traversal_stack: SmallVec::new(),
            current_leaf: None,
            leaf_index: 0,
            state,
            tail_index: 0,
            elements_returned: 0,
        };
        if matches!(iterator.state, IteratorState::TraversingTree) {
            iterator.initialize_from_root();
        }
        iterator
    }

    /// Pushes the root branch onto the stack and descends to the first leaf.
    fn initialize_from_root(&mut self) {
        match self.vector.root.as_ref() {
            VectorNode::Branch { children, .. } => {
                self.traversal_stack.push(TraversalStackEntry {
                    children,
                    child_index: 0,
                });
                self.descend_to_first_leaf();
            }
            VectorNode::Leaf { elements, .. } => {
                self.current_leaf = Some(elements.as_slice());
                self.leaf_index = 0;
            }
        }
    }

    /// Descends from the current stack top to the next unvisited leaf,
    /// skipping empty slots and backtracking through exhausted branches.
    fn descend_to_first_leaf(&mut self) {
        while let Some(entry) = self.traversal_stack.last_mut() {
            let mut found_branch = None;
            let mut found_leaf = None;

            while entry.child_index < BRANCHING_FACTOR {
                let index = entry.child_index;
                entry.child_index += 1;

                if let Some(child) = &entry.children[index] {
                    match child.as_ref() {
                        VectorNode::Branch { children, .. } => {
                            found_branch = Some(children);
                            break;
                        }
                        VectorNode::Leaf { elements, .. } => {
                            found_leaf = Some(elements.as_slice());
                            break;
                        }
                    }
                }
            }

            if let Some(leaf) = found_leaf {
                self.current_leaf = Some(leaf);
                self.leaf_index = 0;
                return;
            }

            if let Some(branch) = found_branch {
                self.traversal_stack.push(TraversalStackEntry {
                    children: branch,
                    child_index: 0,
                });
                continue;
            }

            // All children processed, pop this entry
            self.traversal_stack.pop();
        }
    }

    /// Called when the current leaf is exhausted; transitions to the tail
    /// once the tree has no further leaves.
    fn advance_to_next_leaf(&mut self) {
        self.current_leaf = None;
        self.leaf_index = 0;

        self.descend_to_first_leaf();

        if self.current_leaf.is_none() {
            self.state = IteratorState::ProcessingTail;
            self.tail_index = 0;
        }
    }
}

impl<'a, T> Iterator for PersistentVectorIterator<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.state {
                IteratorState::TraversingTree => {
                    if let Some(leaf) = self.current_leaf {
                        if self.leaf_index < leaf.len() {
                            let element = &leaf[self.leaf_index];
                            self.leaf_index += 1;
                            self.elements_returned += 1;
                            return Some(element);
                        }
                        self.advance_to_next_leaf();
                    } else {
                        self.state = IteratorState::ProcessingTail;
                        self.tail_index = 0;
                    }
                }
                IteratorState::ProcessingTail => {
                    if self.tail_index < self.vector.tail.len() {
                        let element = &self.vector.tail[self.tail_index];
                        self.tail_index += 1;
                        self.elements_returned += 1;
                        return Some(element);
                    }
                    self.state = IteratorState::Exhausted;
                    return None;
                }
                IteratorState::Exhausted => {
                    return None;
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.vector.length.saturating_sub(self.elements_returned);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for PersistentVectorIterator<'_, T> {
    fn len(&self) -> usize {
        self.vector.length.saturating_sub(self.elements_returned)
    }
}

/// An iterator over the storage chunks of a [`PersistentVector`].
///
/// Yields each committed leaf array as a full 32-element slice and finally
/// the (possibly shorter) tail. See [`PersistentVector::chunks`].
pub struct PersistentVectorChunks<'a, T> {
    vector: &'a PersistentVector<T>,
    index: usize,
}

impl<'a, T> Iterator for PersistentVectorChunks<'a, T> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.vector.length {
            return None;
        }
        let chunk = self.vector.leaf_slice_for(self.index);
        if chunk.is_empty() {
            return None;
        }
        self.index += chunk.len();
        Some(chunk)
    }
}

/// An owning iterator over the elements of a [`PersistentVector`].
///
/// Clones one leaf chunk at a time out of the shared tree rather than
/// materializing the whole vector up front.
pub struct PersistentVectorIntoIterator<T> {
    vector: PersistentVector<T>,
    index: usize,
    chunk: std::vec::IntoIter<T>,
    elements_returned: usize,
}

impl<T: Clone> Iterator for PersistentVectorIntoIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(element) = self.chunk.next() {
                self.elements_returned += 1;
                return Some(element);
            }
            if self.index >= self.vector.length {
                return None;
            }
            let chunk = self.vector.leaf_slice_for(self.index).to_vec();
            if chunk.is_empty() {
                return None;
            }
            self.index += chunk.len();
            self.chunk = chunk.into_iter();
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.vector.length.saturating_sub(self.elements_returned);
        (remaining, Some(remaining))
    }
}

impl<T: Clone> ExactSizeIterator for PersistentVectorIntoIterator<T> {
    fn len(&self) -> usize {
        self.vector.length.saturating_sub(self.elements_returned)
    }
}

// =============================================================================
// Standard Trait Implementations
// =============================================================================

impl<T> Default for PersistentVector<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> FromIterator<T> for PersistentVector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new().push_back_many(iter)
    }
}

impl<T: Clone> IntoIterator for PersistentVector<T> {
    type Item = T;
    type IntoIter = PersistentVectorIntoIterator<T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        PersistentVectorIntoIterator {
            vector: self,
            index: 0,
            chunk: Vec::new().into_iter(),
            elements_returned: 0,
        }
    }
}

impl<'a, T> IntoIterator for &'a PersistentVector<T> {
    type Item = &'a T;
    type IntoIter = PersistentVectorIterator<'a, T>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: PartialEq> PartialEq for PersistentVector<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }
        self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Eq> Eq for PersistentVector<T> {}

impl<T: Hash> Hash for PersistentVector<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Hash the length first to distinguish vectors of different lengths
        self.length.hash(state);
        for element in self {
            element.hash(state);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentVector<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_list().entries(self.iter()).finish()
    }
}

impl<T: fmt::Display> fmt::Display for PersistentVector<T> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "[")?;
        let mut first = true;
        for element in self {
            if first {
                first = false;
            } else {
                write!(formatter, ", ")?;
            }
            write!(formatter, "{element}")?;
        }
        write!(formatter, "]")
    }
}

// =============================================================================
// Tests
// =============================================================================
