//! The abstract set interface every backend implements identically.
//!
//! All three backends (`SequentialSet`, `LockedSet`, `TransactionalSet`)
//! implement this trait so that the workload driver, and the shared test
//! suite, can exercise any of them interchangeably.

/// A set of comparable, hashable keys, backed by one of the cuckoo-hash
/// implementations in this crate.
pub trait CuckooSet<T> {
    /// Creates an empty set with room for at least `initial_capacity`
    /// entries per table (so `2 * initial_capacity` slots total).
    fn new(initial_capacity: usize) -> Self;

    /// Inserts `key`. Returns `true` if it was newly inserted, `false` if
    /// it was already present (a no-op).
    fn add(&self, key: T) -> bool;

    /// Removes `key`. Returns `true` if it was present and removed,
    /// `false` if it was absent.
    fn remove(&self, key: &T) -> bool;

    /// Returns whether `key` is present.
    fn contains(&self, key: &T) -> bool;

    /// The number of keys currently in the set.
    ///
    /// Not linearizable under concurrent mutation; only meaningful once
    /// all other operations have quiesced.
    fn size(&self) -> usize;

    /// Inserts every key in `keys`, skipping duplicates.
    ///
    /// Returns the number of keys successfully added.
    fn populate(&self, keys: &[T]) -> usize
    where
        T: Clone,
    {
        keys.iter().filter(|k| self.add((*k).clone())).count()
    }
}
