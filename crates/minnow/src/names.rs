//! Ordered, de-duplicating registries of interned name strings.

use crate::{
    hash::hash_str,
    heap::{Heap, HeapId},
};

/// An append-only table of interned string objects, de-duplicated by
/// content. Indices are stable for the life of the table and are used
/// directly as bytecode operands; scripts keep three of these (bytecode
/// names, global names, function names), the latter two index-aligned with
/// their sibling buffers.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct NameTable {
    ids: Vec<HeapId>,
}

impl NameTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the index of the interned string matching `name`, comparing
    /// cached hashes before bytes.
    #[must_use]
    pub fn find(&self, heap: &Heap, name: &str) -> Option<u32> {
        let hash = hash_str(name);
        self.ids.iter().position(|&id| {
            let interned = heap.string(id);
            interned.hash() == hash && interned.as_str() == name
        }).map(|index| index as u32)
    }

    /// Appends an interned string, returning its index. The caller is
    /// responsible for de-duplication (via [`NameTable::find`]); the heap's
    /// script wrappers do exactly that.
    pub fn push(&mut self, id: HeapId) -> u32 {
        let index = self.ids.len() as u32;
        self.ids.push(id);
        index
    }

    /// The interned string at `index`.
    ///
    /// # Panics
    /// Panics when the index was never issued by this table.
    #[must_use]
    pub fn get(&self, index: u32) -> HeapId {
        self.ids[index as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = HeapId> + '_ {
        self.ids.iter().copied()
    }
}
