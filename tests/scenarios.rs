//! The six concrete end-to-end scenarios from spec.md §8, run verbatim
//! against [`VtMap`].

use vertable_rs::VtMap;

#[test]
fn scenario_1_insert_erase_subset_then_iterate() {
    let mut map = VtMap::new();
    for i in 0..10u32 {
        map.insert(i, i + 1);
    }

    for k in [0u32, 3, 6, 9] {
        assert!(map.remove(&k).is_some());
    }

    assert_eq!(map.len(), 6);
    assert!(map.get(&3).is_none());
    assert_eq!(map.get(&4), Some(&5));

    let mut seen: Vec<u32> = map.values().copied().collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 4, 5, 7, 8]);
}

#[test]
fn scenario_2_reinsert_same_key_replaces_value() {
    let mut map = VtMap::new();
    assert_eq!(map.insert(0, 100), None);
    assert_eq!(map.insert(0, 200), Some(100));
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&0), Some(&200));
}

#[test]
fn scenario_3_iterator_erase_in_two_passes() {
    let mut map = VtMap::new();
    for k in (0..120u32).rev() {
        map.insert(k, k + 1);
    }
    assert_eq!(map.len(), 120);

    map.retain(|k, _| k % 4 != 0);
    assert_eq!(map.len(), 90);
    for k in 0..120u32 {
        assert_eq!(map.get(&k).is_some(), k % 4 != 0);
    }

    let mut visited = 0usize;
    map.retain(|k, _| {
        visited += 1;
        k % 2 != 0
    });
    assert_eq!(visited, 90);
    assert_eq!(map.len(), 60);

    for k in 0..120u32 {
        let should_remain = k % 4 != 0 && k % 2 != 0;
        assert_eq!(map.get(&k).is_some(), should_remain, "key {k}");
    }
}

#[test]
fn scenario_4_clone_outlives_cleaned_up_original() {
    let mut original = VtMap::new();
    for i in 0..30u32 {
        original.insert(i, i + 1);
    }

    let clone = original.clone();
    drop(original);

    assert_eq!(clone.len(), 30);
    for i in 0..30u32 {
        assert_eq!(clone.get(&i), Some(&(i + 1)));
    }
}

#[test]
fn scenario_5_reserve_then_shrink_round_trips_capacity() {
    let mut map = VtMap::new();
    map.reserve(30);
    for i in 0..30u32 {
        map.insert(i, i + 1);
    }
    let baseline_capacity = map.capacity();

    map.reserve(500);
    assert!(map.capacity() > baseline_capacity);

    map.shrink_to_fit();
    assert_eq!(map.capacity(), baseline_capacity);

    for i in 0..30u32 {
        assert_eq!(map.get(&i), Some(&(i + 1)));
    }
}

#[test]
fn scenario_6_string_key_value_map() {
    let mut map = VtMap::new();
    map.insert("This".to_string(), "is".to_string());
    map.insert("a".to_string(), "test".to_string());
    map.insert("of".to_string(), "maps".to_string());
    map.insert("with".to_string(), "strings.".to_string());
    assert_eq!(map.len(), 4);

    // Reinserting the same keys with the same values leaves size unchanged.
    map.insert("This".to_string(), "is".to_string());
    map.insert("a".to_string(), "test".to_string());
    map.insert("of".to_string(), "maps".to_string());
    map.insert("with".to_string(), "strings.".to_string());
    assert_eq!(map.len(), 4);

    map.remove("This");
    map.remove("of");
    assert_eq!(map.len(), 2);

    let mut remaining: Vec<&String> = map.values().collect();
    remaining.sort();
    assert_eq!(remaining, vec![&"strings.".to_string(), &"test".to_string()]);
}
