//! Immutable string objects with an eagerly computed content hash.

use crate::hash::hash_str;

/// An immutable byte sequence with its 32-bit FNV-1a hash precomputed at
/// construction. The hash is the fast path for map probing, name-table
/// lookup and literal-pool dedup; full byte comparison only runs after hash
/// and length already agree.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Str {
    data: Box<str>,
    hash: u32,
}

impl Str {
    #[must_use]
    pub fn new(content: &str) -> Self {
        Self {
            data: content.into(),
            hash: hash_str(content),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The cached content hash.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_cached_and_content_based() {
        let a = Str::new("hello");
        let b = Str::new("hello");
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash(), hash_str("hello"));
        assert_ne!(a.hash(), Str::new("hellp").hash());
    }
}
