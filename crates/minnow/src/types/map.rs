//! Open-addressed hash map over minnow values.
//!
//! Linear probing with tombstones: a removed slot is distinguished from an
//! empty one so later probe sequences are not broken. Slot states:
//!
//! | state     | key         | value         |
//! |-----------|-------------|---------------|
//! | empty     | `Undefined` | `Bool(false)` |
//! | tombstone | `Undefined` | `Bool(true)`  |
//! | live      | any hashable| any           |
//!
//! Probing, hashing and key equality read other heap objects (cached string
//! hashes), so map methods take the heap as an explicit parameter; the
//! heap-level wrappers (`Heap::map_get` and friends) lift the map out of its
//! slot for the duration of the call.

use crate::{
    heap::Heap,
    report::RuntimeResult,
    value::{Value, is_equal},
};

/// Smallest capacity a non-empty map keeps.
const MIN_CAPACITY: usize = 8;

/// Capacity doubles when an insert would cross the load factor and halves
/// when a removal leaves the table sparse.
const GROW_FACTOR: usize = 2;

/// Live entries stay below 75% of capacity.
const LOAD_PERCENT: usize = 75;

/// One probing slot.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
struct Slot {
    key: Value,
    value: Value,
}

impl Slot {
    const EMPTY: Self = Self { key: Value::Undefined, value: Value::Bool(false) };
    const TOMBSTONE: Self = Self { key: Value::Undefined, value: Value::Bool(true) };

    fn is_live(self) -> bool {
        !self.key.is_undefined()
    }

    fn is_tombstone(self) -> bool {
        self.key.is_undefined() && matches!(self.value, Value::Bool(true))
    }
}

/// Outcome of probing for a key.
enum Probe {
    /// The key is present at this slot.
    Live(usize),
    /// The key is absent; this is where an insert goes (first tombstone on
    /// the probe path, else the empty slot that ended it).
    Insert(usize),
}

/// Open-addressed `(key, value)` table with linear probing.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Map {
    slots: Vec<Slot>,
    count: usize,
}

impl Map {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterates live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.slots.iter().filter(|slot| slot.is_live()).map(|slot| (slot.key, slot.value))
    }

    /// Looks up `key`, erroring when the key type is unhashable.
    pub fn get(&self, heap: &Heap, key: Value) -> RuntimeResult<Option<Value>> {
        let hash = heap.key_hash(key)?;
        if self.count == 0 {
            return Ok(None);
        }
        match self.probe(heap, key, hash) {
            Probe::Live(index) => Ok(Some(self.slots[index].value)),
            Probe::Insert(_) => Ok(None),
        }
    }

    /// Inserts or replaces. The table resizes *before* the insert whenever
    /// one more live entry would cross the load factor; the count only
    /// increments on a true insertion.
    pub fn set(&mut self, heap: &Heap, key: Value, value: Value) -> RuntimeResult<()> {
        let hash = heap.key_hash(key)?;
        if (self.count + 1) * 100 > self.slots.len() * LOAD_PERCENT {
            let capacity = (self.slots.len() * GROW_FACTOR).max(MIN_CAPACITY);
            self.resize(heap, capacity);
        }
        match self.probe(heap, key, hash) {
            Probe::Live(index) => self.slots[index].value = value,
            Probe::Insert(index) => {
                self.slots[index] = Slot { key, value };
                self.count += 1;
            }
        }
        Ok(())
    }

    /// Removes `key`, tombstoning its slot. An empty result clears the table
    /// entirely; otherwise the capacity halves once the table turns sparse.
    pub fn remove(&mut self, heap: &Heap, key: Value) -> RuntimeResult<Option<Value>> {
        let hash = heap.key_hash(key)?;
        if self.count == 0 {
            return Ok(None);
        }
        let index = match self.probe(heap, key, hash) {
            Probe::Live(index) => index,
            Probe::Insert(_) => return Ok(None),
        };
        let removed = self.slots[index].value;
        self.slots[index] = Slot::TOMBSTONE;
        self.count -= 1;

        if self.count == 0 {
            self.slots.clear();
        } else {
            let capacity = self.slots.len();
            if capacity > MIN_CAPACITY && capacity / GROW_FACTOR > self.count * 100 / LOAD_PERCENT {
                self.resize(heap, capacity / GROW_FACTOR);
            }
        }
        Ok(Some(removed))
    }

    /// Probes linearly from `hash mod capacity`.
    ///
    /// Scanning records the first tombstone seen; a miss lands there (reuse)
    /// or on the empty slot that stopped the scan. When the whole ring is
    /// live-or-tombstone the first tombstone wins.
    fn probe(&self, heap: &Heap, key: Value, hash: u32) -> Probe {
        let capacity = self.slots.len();
        debug_assert!(capacity > 0, "probe on an unallocated table");
        let mut index = hash as usize % capacity;
        let mut tombstone = None;
        for _ in 0..capacity {
            let slot = self.slots[index];
            if slot.key.is_undefined() {
                if slot.is_tombstone() {
                    tombstone.get_or_insert(index);
                } else {
                    return Probe::Insert(tombstone.unwrap_or(index));
                }
            } else if is_equal(slot.key, key, heap) {
                return Probe::Live(index);
            }
            index = (index + 1) % capacity;
        }
        Probe::Insert(tombstone.expect("probe ring had no empty slot and no tombstone"))
    }

    /// Rebuilds the table at `capacity`, re-inserting live entries and
    /// dropping tombstones.
    fn resize(&mut self, heap: &Heap, capacity: usize) {
        let old = std::mem::replace(&mut self.slots, vec![Slot::EMPTY; capacity]);
        for slot in old {
            if !slot.is_live() {
                continue;
            }
            let hash = heap.key_hash(slot.key).expect("live map keys are hashable");
            match self.probe(heap, slot.key, hash) {
                Probe::Insert(index) => self.slots[index] = slot,
                Probe::Live(_) => unreachable!("duplicate key while rehashing"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value {
        Value::Num(n)
    }

    #[test]
    fn test_set_get_remove() {
        let mut heap = Heap::new();
        let mut map = Map::new();
        map.set(&heap, num(1.0), num(10.0)).unwrap();
        map.set(&heap, num(2.0), num(20.0)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&heap, num(1.0)).unwrap().unwrap().as_num(), Some(10.0));
        // Replacement does not change the count.
        map.set(&heap, num(1.0), num(11.0)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.remove(&heap, num(1.0)).unwrap().unwrap().as_num(), Some(11.0));
        assert_eq!(map.get(&heap, num(1.0)).unwrap(), None);
        let _ = heap.new_string("keep heap used");
    }

    #[test]
    fn test_string_keys_compare_by_content() {
        let mut heap = Heap::new();
        let k1 = heap.new_string("key");
        let k2 = heap.new_string("key");
        let mut map = Map::new();
        map.set(&heap, Value::Ref(k1), num(1.0)).unwrap();
        // A distinct string object with equal content hits the same entry.
        assert_eq!(map.get(&heap, Value::Ref(k2)).unwrap().unwrap().as_num(), Some(1.0));
    }

    #[test]
    fn test_unhashable_key_is_an_error() {
        let mut heap = Heap::new();
        let list = heap.new_list();
        let mut map = Map::new();
        assert!(map.set(&heap, Value::Ref(list), num(1.0)).is_err());
        assert!(map.get(&heap, Value::Ref(list)).is_err());
    }

    #[test]
    fn test_load_factor_stays_under_75_percent() {
        let heap = Heap::new();
        let mut map = Map::new();
        for i in 0..1000 {
            map.set(&heap, num(f64::from(i)), num(0.0)).unwrap();
            assert!(map.len() * 100 <= map.capacity() * LOAD_PERCENT);
        }
    }

    #[test]
    fn test_tombstone_reuse_keeps_probe_chains_intact() {
        let heap = Heap::new();
        let mut map = Map::new();
        // Fill enough entries that collisions exist, then remove and re-add.
        for i in 0..32 {
            map.set(&heap, num(f64::from(i)), num(f64::from(i))).unwrap();
        }
        for i in 0..16 {
            map.remove(&heap, num(f64::from(i))).unwrap();
        }
        for i in 16..32 {
            assert_eq!(
                map.get(&heap, num(f64::from(i))).unwrap().unwrap().as_num(),
                Some(f64::from(i)),
                "entry {i} lost after removals"
            );
        }
    }

    #[test]
    fn test_removing_last_entry_clears_the_table() {
        let heap = Heap::new();
        let mut map = Map::new();
        map.set(&heap, num(1.0), num(2.0)).unwrap();
        map.remove(&heap, num(1.0)).unwrap();
        assert_eq!(map.capacity(), 0);
        assert!(map.is_empty());
    }
}
