//! Deterministic hash helpers for minnow values.
//!
//! Minnow intentionally uses deterministic hashing so map iteration order and
//! literal-pool dedup are reproducible across runs. Strings hash with 32-bit
//! FNV-1a (cached on the string object at construction); numbers hash their
//! IEEE-754 bit pattern through a 64-to-32-bit finalizer so `-0.0`, `0.0` and
//! every NaN payload keep distinct, stable identities.

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

/// Hashes raw bytes with 32-bit FNV-1a.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hashes UTF-8 string content with 32-bit FNV-1a.
#[must_use]
pub fn hash_str(value: &str) -> u32 {
    hash_bytes(value.as_bytes())
}

/// Mixes a 64-bit pattern down to 32 bits.
///
/// A variance-spreading finalizer in the spirit of the classic 64-to-32-bit
/// integer hash: the full input contributes to every output bit, so values
/// differing only in high bits (such as float exponents) still disperse.
#[must_use]
pub fn hash_bits(bits: u64) -> u32 {
    let mut hash = bits;
    hash = (!hash).wrapping_add(hash << 18);
    hash ^= hash >> 31;
    hash = hash.wrapping_mul(21);
    hash ^= hash >> 11;
    hash = hash.wrapping_add(hash << 6);
    hash ^= hash >> 22;
    (hash & 0x3fff_ffff) as u32
}

/// Hashes a number by its bit pattern.
///
/// Bit-pattern hashing matches value identity: NaN hashes stably, and `0.0`
/// and `-0.0` hash differently because they are distinct values in minnow.
#[must_use]
pub fn hash_number(value: f64) -> u32 {
    hash_bits(value.to_bits())
}

/// Hashes a range as the xor of its endpoint hashes.
#[must_use]
pub fn hash_range(from: f64, to: f64) -> u32 {
    hash_number(from) ^ hash_number(to)
}
