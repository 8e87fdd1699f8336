//! Seeded byte hashing used by [`Dict`](crate::Dict) key types.
//!
//! The seed is process-wide mutable state: set it once at startup from a
//! secure random source, before any dictionary is built, so that bucket
//! placement is not predictable across runs.

use std::sync::atomic::{AtomicU32, Ordering};

use xxhash_rust::xxh32::{xxh32, Xxh32};

static HASH_SEED: AtomicU32 = AtomicU32::new(0);

/// Set the process-wide hash seed. Affects hashes computed after the call;
/// do not change it while any [`Dict`](crate::Dict) holds entries.
pub fn set_hash_seed(seed: u32) {
    HASH_SEED.store(seed, Ordering::Relaxed);
}

/// The current process-wide hash seed.
pub fn hash_seed() -> u32 {
    HASH_SEED.load(Ordering::Relaxed)
}

/// Seeded hash of a byte string.
#[inline]
pub fn bytes_hash(data: &[u8]) -> u32 {
    xxh32(data, hash_seed())
}

/// Seeded hash of a byte string with ASCII case folded away, so that keys
/// differing only in case land in the same bucket.
pub fn bytes_hash_nocase(data: &[u8]) -> u32 {
    let mut h = Xxh32::new(hash_seed());
    let mut fold = [0u8; 64];
    for chunk in data.chunks(fold.len()) {
        let fold = &mut fold[..chunk.len()];
        fold.copy_from_slice(chunk);
        fold.make_ascii_lowercase();
        h.update(fold);
    }
    h.digest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::global_state_guard;

    #[test]
    fn seed_changes_hash() {
        let _g = global_state_guard();
        let before = bytes_hash(b"abc");
        set_hash_seed(0xdead_beef);
        let after = bytes_hash(b"abc");
        assert_ne!(before, after);
        set_hash_seed(0);
        assert_eq!(bytes_hash(b"abc"), before);
    }

    #[test]
    fn nocase_folds_ascii() {
        let _g = global_state_guard();
        assert_eq!(bytes_hash_nocase(b"FooBar"), bytes_hash_nocase(b"foobar"));
        assert_eq!(bytes_hash_nocase(b"foobar"), bytes_hash(b"foobar"));
        assert_ne!(bytes_hash_nocase(b"foobar"), bytes_hash_nocase(b"foobaz"));
    }

    #[test]
    fn nocase_spans_chunk_boundary() {
        let _g = global_state_guard();
        let mut long = vec![b'A'; 130];
        long[129] = b'Z';
        let mut lower = long.clone();
        lower.make_ascii_lowercase();
        assert_eq!(bytes_hash_nocase(&long), bytes_hash_nocase(&lower));
    }
}
