//! Container behavior through the heap wrappers: maps, lists, name tables
//! and string formatting.

use minnow::{FormatArg, Heap, Value, is_equal};

// =============================================================================
// 1. Maps
// =============================================================================

#[test]
fn map_string_keys_hit_by_content() {
    let mut heap = Heap::new();
    let map = heap.new_map();
    heap.add_root(map);
    let key = heap.new_string("answer");
    heap.push_temp_root(key);
    heap.map_set(map, Value::Ref(key), Value::Num(42.0)).unwrap();
    heap.pop_temp_root();

    let probe = heap.new_string("answer");
    let found = heap.map_get(map, Value::Ref(probe)).unwrap();
    assert_eq!(found.and_then(Value::as_num), Some(42.0));
}

#[test]
fn map_remove_then_reinsert_reuses_tombstones() {
    let mut heap = Heap::new();
    let map = heap.new_map();
    heap.add_root(map);
    for i in 0..64 {
        heap.map_set(map, Value::Num(f64::from(i)), Value::Num(0.0)).unwrap();
    }
    for i in 0..32 {
        assert!(heap.map_remove(map, Value::Num(f64::from(i))).unwrap().is_some());
    }
    for i in 0..32 {
        heap.map_set(map, Value::Num(f64::from(i)), Value::Num(1.0)).unwrap();
    }
    assert_eq!(heap.map(map).len(), 64);
    for i in 32..64 {
        let found = heap.map_get(map, Value::Num(f64::from(i))).unwrap();
        assert_eq!(found.and_then(Value::as_num), Some(0.0), "entry {i} lost");
    }
}

#[test]
fn map_rejects_unhashable_keys() {
    let mut heap = Heap::new();
    let map = heap.new_map();
    heap.add_root(map);
    let list = heap.new_list();
    let err = heap.map_set(map, Value::Ref(list), Value::Null).unwrap_err();
    assert!(err.message().contains("not hashable"), "{err}");
    let fiber_key = heap.new_map();
    assert!(heap.map_get(map, Value::Ref(fiber_key)).is_err());
}

#[test]
fn map_load_factor_and_shrink() {
    let mut heap = Heap::new();
    let map = heap.new_map();
    heap.add_root(map);
    for i in 0..256 {
        heap.map_set(map, Value::Num(f64::from(i)), Value::Bool(true)).unwrap();
        let record = heap.map(map);
        assert!(record.len() * 100 <= record.capacity() * 75);
    }
    let grown = heap.map(map).capacity();
    for i in 0..255 {
        heap.map_remove(map, Value::Num(f64::from(i))).unwrap();
    }
    assert!(heap.map(map).capacity() < grown);
    // Removing the last live entry clears the table entirely.
    heap.map_remove(map, Value::Num(255.0)).unwrap();
    assert_eq!(heap.map(map).capacity(), 0);
}

// =============================================================================
// 2. Lists
// =============================================================================

#[test]
fn list_insert_and_remove_shift_elements() {
    let mut heap = Heap::new();
    let list = heap.new_list();
    heap.add_root(list);
    heap.list_push(list, Value::Num(1.0));
    heap.list_push(list, Value::Num(3.0));
    heap.list_insert(list, 1, Value::Num(2.0)).unwrap();
    let items: Vec<f64> = heap.list(list).iter().map(|v| v.as_num().unwrap()).collect();
    assert_eq!(items, vec![1.0, 2.0, 3.0]);

    let removed = heap.list_remove_at(list, 0).unwrap();
    assert_eq!(removed.as_num(), Some(1.0));
    assert!(heap.list_remove_at(list, 9).is_err());
}

// =============================================================================
// 3. Value identity and equality
// =============================================================================

#[test]
fn equality_is_structural_only_for_strings_and_ranges() {
    let mut heap = Heap::new();
    let s1 = heap.new_string("same");
    heap.push_temp_root(s1);
    let s2 = heap.new_string("same");
    heap.pop_temp_root();
    assert!(is_equal(Value::Ref(s1), Value::Ref(s2), &heap));

    let r1 = heap.new_range(1.0, 5.0);
    let r2 = heap.new_range(1.0, 5.0);
    assert!(is_equal(Value::Ref(r1), Value::Ref(r2), &heap));

    let l1 = heap.new_list();
    let l2 = heap.new_list();
    assert!(!is_equal(Value::Ref(l1), Value::Ref(l2), &heap));
    assert!(is_equal(Value::Ref(l1), Value::Ref(l1), &heap));
}

// =============================================================================
// 4. String formatting
// =============================================================================

#[test]
fn string_format_splices_text_and_values() {
    let mut heap = Heap::new();
    let who = heap.new_string("fish");
    heap.push_temp_root(who);
    let out = heap.string_format("a $ of @s", &[FormatArg::Text("school"), FormatArg::Val(Value::Ref(who))]);
    heap.pop_temp_root();
    assert_eq!(heap.string(out).as_str(), "a school of fishs");
    // The result's hash is computed at construction.
    assert_eq!(heap.string(out).hash(), minnow::hash_str("a school of fishs"));
}
