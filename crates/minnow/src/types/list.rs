//! Growable value sequences with an explicit capacity policy.

use crate::{
    report::{RuntimeError, RuntimeResult},
    value::Value,
};

/// Smallest capacity a non-empty list keeps.
const MIN_CAPACITY: usize = 8;

/// Capacity doubles on overflow and halves once occupancy drops to a quarter.
const GROW_FACTOR: usize = 2;

/// A value buffer that grows by `GROW_FACTOR` on overflow and gives memory
/// back once `capacity / GROW_FACTOR >= count` after a removal.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct List {
    items: Vec<Value>,
}

impl List {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: Value) -> RuntimeResult<()> {
        match self.items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(RuntimeError::index_out_of_bounds(index, self.items.len())),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.items.iter().copied()
    }

    pub fn push(&mut self, value: Value) {
        self.reserve_for_one();
        self.items.push(value);
    }

    /// Grows by one, shifts `[index..]` right, stores `value`.
    pub fn insert(&mut self, index: usize, value: Value) -> RuntimeResult<()> {
        if index > self.items.len() {
            return Err(RuntimeError::index_out_of_bounds(index, self.items.len()));
        }
        self.reserve_for_one();
        self.items.insert(index, value);
        Ok(())
    }

    /// Shifts `[index + 1..]` left and returns the removed value, halving the
    /// capacity once occupancy has dropped to a quarter.
    pub fn remove_at(&mut self, index: usize) -> RuntimeResult<Value> {
        if index >= self.items.len() {
            return Err(RuntimeError::index_out_of_bounds(index, self.items.len()));
        }
        let removed = self.items.remove(index);
        let capacity = self.items.capacity();
        if capacity > MIN_CAPACITY && capacity / GROW_FACTOR >= self.items.len() {
            self.items.shrink_to(capacity / GROW_FACTOR);
        }
        Ok(removed)
    }

    fn reserve_for_one(&mut self) {
        let len = self.items.len();
        if len == self.items.capacity() {
            let target = (len * GROW_FACTOR).max(MIN_CAPACITY);
            self.items.reserve_exact(target - len);
        }
    }
}
