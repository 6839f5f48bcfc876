//! Property-based tests for `PersistentVector` invariants.

use proptest::prelude::*;
use trellis::PersistentVector;

proptest! {
    /// Round-trip law: an updated element is read back exactly.
    #[test]
    fn prop_get_update_law(
        elements in prop::collection::vec(any::<i32>(), 1..80),
        probe: usize,
        new_value: i32
    ) {
        let vector: PersistentVector<i32> = elements.iter().copied().collect();
        let index = probe % vector.len();

        let updated = vector.update(index, new_value).unwrap();
        prop_assert_eq!(updated.get(index), Some(&new_value));
    }

    /// An update never affects any other index, in either version.
    #[test]
    fn prop_update_isolation_law(
        elements in prop::collection::vec(any::<i32>(), 2..80),
        probe: usize,
        new_value: i32
    ) {
        let vector: PersistentVector<i32> = elements.iter().copied().collect();
        let index = probe % vector.len();
        let updated = vector.update(index, new_value).unwrap();

        for check in 0..vector.len() {
            if check != index {
                prop_assert_eq!(updated.get(check), vector.get(check));
            }
            prop_assert_eq!(vector.get(check), elements.get(check));
        }
    }

    /// Push-pop inversion: `pop_back` exactly undoes `push_back`.
    #[test]
    fn prop_push_pop_back_law(
        elements in prop::collection::vec(any::<i32>(), 0..80),
        new_element: i32
    ) {
        let vector: PersistentVector<i32> = elements.iter().copied().collect();
        let (remaining, popped) = vector.push_back(new_element).pop_back().unwrap();

        prop_assert_eq!(popped, new_element);
        prop_assert_eq!(remaining, vector);
    }

    /// Length law: `push_back` grows the length by exactly one.
    #[test]
    fn prop_push_back_length_law(
        elements in prop::collection::vec(any::<i32>(), 0..80),
        new_element: i32
    ) {
        let vector: PersistentVector<i32> = elements.iter().copied().collect();
        prop_assert_eq!(vector.push_back(new_element).len(), vector.len() + 1);
    }

    /// Persistence law: a snapshot keeps its exact contents while later
    /// versions are derived from it and mutated further.
    #[test]
    fn prop_snapshot_stability_law(
        elements in prop::collection::vec(any::<i32>(), 1..80),
        pushes in prop::collection::vec(any::<i32>(), 0..40),
        pops in 0_usize..40
    ) {
        let snapshot: PersistentVector<i32> = elements.iter().copied().collect();

        let mut derived = snapshot.clone();
        for value in pushes {
            derived = derived.push_back(value);
        }
        for _ in 0..pops {
            match derived.pop_back() {
                Ok((rest, _)) => derived = rest,
                Err(_) => break,
            }
        }

        let observed: Vec<i32> = snapshot.iter().copied().collect();
        prop_assert_eq!(observed, elements);
    }

    /// The iterator agrees with indexed access over the whole vector.
    #[test]
    fn prop_iter_matches_indexing(
        elements in prop::collection::vec(any::<i32>(), 0..200)
    ) {
        let vector: PersistentVector<i32> = elements.iter().copied().collect();
        let iterated: Vec<i32> = vector.iter().copied().collect();
        prop_assert_eq!(&iterated, &elements);

        let chunked: Vec<i32> = vector.chunks().flatten().copied().collect();
        prop_assert_eq!(&chunked, &elements);
    }

    /// Transient equivalence: any operation sequence applied through a
    /// transient seals to the same contents as the persistent operations.
    #[test]
    fn prop_transient_equivalence_law(
        initial in prop::collection::vec(any::<i32>(), 0..60),
        operations in prop::collection::vec((0_u8..3, any::<i32>()), 0..100)
    ) {
        let base: PersistentVector<i32> = initial.iter().copied().collect();
        let mut persistent = base.clone();
        let mut transient = base.as_transient();

        for (operation, value) in operations {
            match operation {
                0 => {
                    persistent = persistent.push_back(value);
                    transient.push(value).unwrap();
                }
                1 => {
                    if let Ok((rest, expected)) = persistent.pop_back() {
                        persistent = rest;
                        prop_assert_eq!(transient.pop().unwrap(), expected);
                    } else {
                        prop_assert!(transient.pop().is_err());
                    }
                }
                _ => {
                    if !persistent.is_empty() {
                        let index = value.unsigned_abs() as usize % persistent.len();
                        persistent = persistent.update(index, value).unwrap();
                        transient.set(index, value).unwrap();
                    }
                }
            }
        }

        let sealed = transient.persistent().unwrap();
        prop_assert_eq!(sealed, persistent);

        // The shared base is still exactly the initial contents
        let base_contents: Vec<i32> = base.iter().copied().collect();
        prop_assert_eq!(base_contents, initial);
    }
}
