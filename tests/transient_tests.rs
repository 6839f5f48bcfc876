//! Integration tests for the transient protocol shared by both tries.

use rstest::rstest;
use trellis::{CollectionError, PersistentHashMap, PersistentVector};

// =============================================================================
// Vector Transients
// =============================================================================

#[rstest]
fn test_vector_transient_equivalence() {
    // The same operation sequence applied persistently and transiently
    // produces the same contents.
    let base: PersistentVector<i32> = (0..50).collect();

    let mut persistent = base.clone();
    for value in 50..90 {
        persistent = persistent.push_back(value);
    }
    persistent = persistent.update(0, -1).unwrap();
    persistent = persistent.pop_back().unwrap().0;

    let mut transient = base.as_transient();
    for value in 50..90 {
        transient.push(value).unwrap();
    }
    transient.set(0, -1).unwrap();
    transient.pop().unwrap();
    let sealed = transient.persistent().unwrap();

    assert_eq!(sealed, persistent);
    // And the shared base never moved
    assert_eq!(base.len(), 50);
    assert_eq!(base.get(0), Some(&0));
}

#[rstest]
fn test_vector_transient_reads_during_mutation() {
    let mut transient = PersistentVector::new().as_transient();
    for value in 0..100 {
        transient.push(value).unwrap();
        assert_eq!(transient.len(), usize::try_from(value).unwrap() + 1);
        assert_eq!(transient.get(usize::try_from(value).unwrap()), Some(&value));
    }
    assert_eq!(transient.get(100), None);
}

#[rstest]
fn test_vector_transient_set_bounds() {
    let mut transient = PersistentVector::<i32>::new().as_transient();
    transient.push(0).unwrap();
    assert!(transient.set(0, 1).is_ok());
    assert!(transient.set(1, 2).is_ok()); // degrades to push
    assert_eq!(
        transient.set(5, 3).unwrap_err(),
        CollectionError::IndexOutOfRange {
            index: 5,
            length: 2
        }
    );
}

#[rstest]
fn test_vector_sealed_handle_rejects_everything() {
    let mut transient = PersistentVector::new().as_transient();
    transient.push(1).unwrap();
    let sealed = transient.persistent().unwrap();
    assert_eq!(sealed.len(), 1);

    assert_eq!(transient.push(2).unwrap_err(), CollectionError::ClosedTransient);
    assert_eq!(transient.set(0, 0).unwrap_err(), CollectionError::ClosedTransient);
    assert_eq!(transient.pop().unwrap_err(), CollectionError::ClosedTransient);
    assert_eq!(
        transient.persistent().unwrap_err(),
        CollectionError::ClosedTransient
    );
    // The failed calls never disturbed the sealed value
    assert_eq!(sealed.get(0), Some(&1));
}

#[rstest]
fn test_vector_snapshot_taken_before_transient_stays_fixed() {
    let snapshot: PersistentVector<i32> = (0..1_100).collect();

    let mut transient = snapshot.as_transient();
    for index in 0..1_100 {
        transient.set(index, -1).unwrap();
    }
    for _ in 0..600 {
        transient.pop().unwrap();
    }
    let mutated = transient.persistent().unwrap();

    assert_eq!(mutated.len(), 500);
    assert_eq!(mutated.get(0), Some(&-1));
    for index in 0..1_100_usize {
        let expected = i32::try_from(index).expect("index fits in i32");
        assert_eq!(snapshot.get(index), Some(&expected));
    }
}

#[rstest]
fn test_vector_transient_chain_of_batches() {
    // seal, reopen, seal again: each sealed value is independent
    let mut first = PersistentVector::new().as_transient();
    for value in 0..40 {
        first.push(value).unwrap();
    }
    let forty = first.persistent().unwrap();

    let mut second = forty.as_transient();
    for _ in 0..10 {
        second.pop().unwrap();
    }
    let thirty = second.persistent().unwrap();

    assert_eq!(forty.len(), 40);
    assert_eq!(forty.get(39), Some(&39));
    assert_eq!(thirty.len(), 30);
    assert_eq!(thirty.get(29), Some(&29));
    assert_eq!(thirty.get(30), None);
}

// =============================================================================
// Map Transients
// =============================================================================

#[rstest]
fn test_map_transient_equivalence() {
    let base: PersistentHashMap<i32, i32> = (0..100).map(|key| (key, key)).collect();

    let mut persistent = base.clone();
    for key in 100..200 {
        persistent = persistent.insert(key, key);
    }
    for key in 0..50 {
        persistent = persistent.remove(&key);
    }
    persistent = persistent.insert(75, -75);

    let mut transient = base.as_transient();
    for key in 100..200 {
        transient.insert(key, key).unwrap();
    }
    for key in 0..50 {
        transient.remove(&key).unwrap();
    }
    transient.insert(75, -75).unwrap();
    let sealed = transient.persistent().unwrap();

    assert_eq!(sealed, persistent);
    assert_eq!(base.len(), 100);
    assert_eq!(base.get(&0), Some(&0));
}

#[rstest]
fn test_map_transient_reads_during_mutation() {
    let mut transient = PersistentHashMap::new().as_transient();
    for key in 0..100 {
        transient.insert(key, key * 2).unwrap();
        assert_eq!(transient.get(&key), Some(&(key * 2)));
        assert!(transient.contains_key(&key));
    }
    assert_eq!(transient.len(), 100);
    assert_eq!(transient.get(&100), None);
}

#[rstest]
fn test_map_transient_remove_absent_is_noop() {
    let mut transient = PersistentHashMap::new().as_transient();
    transient.insert(1, 1).unwrap();
    transient.remove(&99).unwrap();
    assert_eq!(transient.len(), 1);
}

#[rstest]
fn test_map_sealed_handle_rejects_everything() {
    let mut transient = PersistentHashMap::new().as_transient();
    transient.insert("key".to_string(), 1).unwrap();
    let sealed = transient.persistent().unwrap();

    assert_eq!(
        transient.insert("other".to_string(), 2).unwrap_err(),
        CollectionError::ClosedTransient
    );
    assert_eq!(
        transient.remove("key").unwrap_err(),
        CollectionError::ClosedTransient
    );
    assert_eq!(
        transient.persistent().unwrap_err(),
        CollectionError::ClosedTransient
    );
    assert_eq!(sealed.get("key"), Some(&1));
    assert_eq!(sealed.len(), 1);
}

#[rstest]
fn test_map_snapshot_taken_before_transient_stays_fixed() {
    let snapshot: PersistentHashMap<i32, i32> = (0..1_000).map(|key| (key, key)).collect();

    let mut transient = snapshot.as_transient();
    for key in 0..1_000 {
        transient.insert(key, -key).unwrap();
    }
    for key in 500..1_000 {
        transient.remove(&key).unwrap();
    }
    let mutated = transient.persistent().unwrap();

    assert_eq!(mutated.len(), 500);
    assert_eq!(mutated.get(&0), Some(&0));
    assert_eq!(mutated.get(&1), Some(&-1));
    assert_eq!(mutated.get(&999), None);
    for key in 0..1_000 {
        assert_eq!(snapshot.get(&key), Some(&key));
    }
}
