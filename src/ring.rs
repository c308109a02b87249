//! Key routing - deterministic key-to-shard index mapping
//!
//! The routing function is stateless: it folds a 128-bit digest of the key
//! into a signed 32-bit value and reduces it modulo the number of currently
//! active connections. Membership is implicit - callers pass the live count
//! on every decision, so there are no stored ring positions to keep in sync.
//!
//! The fold is the legacy memcached-client scheme (first four digest bytes,
//! little-endian, signed wraparound). It keeps deployed ring expectations
//! intact at the cost of only approximate stability when servers leave the
//! active set: remapping is mod-based, not true ketama.

/// Fold a key digest into the legacy signed 32-bit hash value
fn fold(key: &[u8]) -> i32 {
    let digest = md5::compute(key);
    i32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Calculate the shard index for a key among `active_count` servers.
///
/// Deterministic: identical inputs always return the identical index.
/// The result is always in `0..active_count`.
///
/// # Panics
/// Panics when `active_count` is zero. Callers route only after checking
/// the active set is non-empty.
///
/// # Example
/// ```
/// use memshard::ring::shard_index;
///
/// let idx = shard_index(b"user:1001", 4);
/// assert!(idx < 4);
/// assert_eq!(idx, shard_index(b"user:1001", 4));
/// ```
pub fn shard_index(key: &[u8], active_count: usize) -> usize {
    assert!(active_count > 0, "routing requires at least one active server");
    let h = i64::from(fold(key));
    h.rem_euclid(active_count as i64) as usize
}
