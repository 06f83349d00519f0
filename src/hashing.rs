//! Keyed hashing primitives for the two-table cuckoo scheme.
//!
//! Both candidate locations of a key are derived from a single stable hash
//! `H` (here, SeaHash) mixed with one of two per-instance salts:
//!
//!     h_i(k) = (H(k) XOR salt_i) mod capacity
//!
//! Salts are regenerated whenever the table resizes, so indices computed
//! under the old geometry are never reused under the new one.

use std::hash::Hash;

/// A fixed, non-zero constant folded into one salt to guarantee the two
/// salts never collide (see `Hasher::new`).
const SALT_SEPARATION: u64 = 0x9E37_79B9_7F4A_7C15;

/// Hash `key` with SeaHash, keyed by `salt`.
///
/// SeaHash is a fast, high-quality non-cryptographic hash; seeding it with
/// the salt gives us an independent member of a hash family rather than a
/// single fixed function, which is what the two-slot cuckoo scheme needs.
fn seeded_hash<T: Hash>(key: &T, salt: u64) -> u64 {
    let mut hasher = seahash::SeaHasher::with_seeds(salt, salt, salt, salt);
    key.hash(&mut hasher);
    std::hash::Hasher::finish(&hasher)
}

/// Derives `h1`/`h2` for a given capacity and salt pair.
///
/// One `Hasher` belongs to a single table generation: it is replaced, not
/// mutated, whenever `resize` doubles the capacity and draws fresh salts.
#[derive(Clone, Copy, Debug)]
pub struct Hasher {
    capacity: usize,
    salt1: u64,
    salt2: u64,
}

impl Hasher {
    /// Builds a hasher for `capacity` slots per table, drawing fresh salts
    /// from the thread-local entropy source.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; capacity must be positive.
    pub fn new(capacity: usize) -> Hasher {
        assert!(capacity > 0, "cuckoo table capacity must be positive");

        let salt1 = rand::random::<u64>();
        // XOR-mix a fixed non-zero constant into the second salt so that
        // salt1 == salt2 is impossible even if the entropy source were to
        // (absurdly) repeat itself.
        let salt2 = salt1 ^ SALT_SEPARATION;

        Hasher {
            capacity,
            salt1,
            salt2,
        }
    }

    /// The number of slots per table this hasher was built for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// `h1(k)`: the index into table 0.
    pub fn h1<T: Hash>(&self, key: &T) -> usize {
        (seeded_hash(key, self.salt1) as usize) % self.capacity
    }

    /// `h2(k)`: the index into table 1.
    pub fn h2<T: Hash>(&self, key: &T) -> usize {
        (seeded_hash(key, self.salt2) as usize) % self.capacity
    }

    /// The index for table `table` (0 or 1).
    pub fn index<T: Hash>(&self, table: u8, key: &T) -> usize {
        match table {
            0 => self.h1(key),
            1 => self.h2(key),
            _ => unreachable!("cuckoo hashing only ever uses two tables"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Hasher;

    #[test]
    fn salts_never_collide() {
        for _ in 0..10_000 {
            let h = Hasher::new(64);
            assert_ne!(h.salt1, h.salt2);
        }
    }

    #[test]
    fn indices_in_bounds() {
        let h = Hasher::new(17);
        for k in 0..1000u64 {
            assert!(h.h1(&k) < 17);
            assert!(h.h2(&k) < 17);
        }
    }

    #[test]
    fn fresh_hasher_draws_fresh_salts() {
        let a = Hasher::new(32);
        let b = Hasher::new(32);
        // Astronomically unlikely to collide; if it does, something is
        // wrong with the entropy source.
        assert!(a.salt1 != b.salt1 || a.salt2 != b.salt2);
    }
}
