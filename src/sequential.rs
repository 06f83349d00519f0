//! The single-threaded reference cuckoo set.
//!
//! This backend exists to anchor correctness: it has no locking, no
//! atomics, and is written the straightforward way so that its behavior
//! can be trusted as ground truth for the other two backends.
//!
//! All mutation happens through a `RefCell`, not a plain field: this both
//! gives every method `&self` (so the one `CuckooSet` trait fits all three
//! backends) and, as a side effect, gives us a reentrancy guard almost for
//! free — `RefCell` panics on a nested mutable borrow, which is exactly
//! what a resize triggered from within a resize would be. `RefCell<T>` is
//! also `!Sync`, so the type system itself enforces single-threaded use.

use std::cell::RefCell;
use std::hash::Hash;
use std::mem;

use crate::error::Error;
use crate::hashing::Hasher;
use crate::set::CuckooSet;
use crate::slot::Slot;

/// Displacement-chain budget a freshly created table starts with. Doubles
/// every resize, same as capacity.
const INITIAL_MAX_DISPLACEMENTS: usize = 32;

struct Inner<T> {
    tables: [Vec<Slot<T>>; 2],
    hasher: Hasher,
    capacity: usize,
    max_displacements: usize,
}

impl<T: Eq + Hash> Inner<T> {
    fn with_capacity(capacity: usize, max_displacements: usize) -> Inner<T> {
        let hasher = Hasher::new(capacity);
        Inner {
            tables: [new_table(capacity), new_table(capacity)],
            hasher,
            capacity,
            max_displacements,
        }
    }

    fn lookup_indices(&self, key: &T) -> (usize, usize) {
        (self.hasher.h1(key), self.hasher.h2(key))
    }

    fn contains(&self, key: &T) -> bool {
        let (i0, i1) = self.lookup_indices(key);
        self.tables[0][i0].holds(key) || self.tables[1][i1].holds(key)
    }

    fn remove(&mut self, key: &T) -> bool {
        let (i0, i1) = self.lookup_indices(key);
        if self.tables[0][i0].holds(key) {
            self.tables[0][i0] = Slot::Empty;
            true
        } else if self.tables[1][i1].holds(key) {
            self.tables[1][i1] = Slot::Empty;
            true
        } else {
            false
        }
    }

    fn size(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|t| t.iter())
            .filter(|s| !s.is_empty())
            .count()
    }

    /// Walks a displacement chain starting with `key` as the floating key.
    ///
    /// Returns `Ok(())` once the floating key finds an empty slot, or
    /// `Err(stuck)` with whichever key is left floating once
    /// `max_displacements` full alternations have been spent.
    ///
    /// Table 0 is always tried first within an alternation.
    fn insert_chain(&mut self, key: T) -> Result<(), T> {
        let mut floating = key;

        for _ in 0..self.max_displacements {
            let i0 = self.hasher.h1(&floating);
            floating = match mem::replace(&mut self.tables[0][i0], Slot::Occupied(floating)) {
                Slot::Empty => return Ok(()),
                Slot::Occupied(evicted) => evicted,
            };

            let i1 = self.hasher.h2(&floating);
            floating = match mem::replace(&mut self.tables[1][i1], Slot::Occupied(floating)) {
                Slot::Empty => return Ok(()),
                Slot::Occupied(evicted) => evicted,
            };
        }

        Err(floating)
    }

    /// Doubles capacity and the displacement budget, draws fresh salts,
    /// and rehashes every key currently in the table plus `extra` (the
    /// key that was left floating when the chain that triggered this
    /// resize ran out of budget).
    ///
    /// `extra`, together with a scan of the current slots, is exactly the
    /// full post-insertion key set: every key that was merely *displaced*
    /// during the failed chain is still sitting in a slot (displacement
    /// swaps values, it never discards one) — only the single key left
    /// floating at the very end is missing from the table. Folding it
    /// into the rehash set gives the same net effect as resizing and
    /// retrying `add` from scratch (the resize happens, and every key —
    /// old and new — ends up placed), without actually re-running `add`
    /// against a reentrant borrow.
    fn resize_with_extra(&mut self, extra: T) -> Result<(), Error> {
        let mut surviving = Vec::with_capacity(self.size() + 1);
        for table in &mut self.tables {
            for slot in table.iter_mut() {
                if let Slot::Occupied(key) = slot.take() {
                    surviving.push(key);
                }
            }
        }
        surviving.push(extra);

        let new_capacity = self.capacity * 2;
        let new_max_displacements = self.max_displacements * 2;
        *self = Inner::with_capacity(new_capacity, new_max_displacements);

        for key in surviving {
            if self.insert_chain(key).is_err() {
                return Err(Error::RehashFailed);
            }
        }

        Ok(())
    }

    fn add(&mut self, key: T) -> bool {
        if self.contains(&key) {
            return false;
        }

        match self.insert_chain(key) {
            Ok(()) => true,
            Err(stuck) => {
                self.resize_with_extra(stuck)
                    .unwrap_or_else(|e| panic!("{}", e));
                true
            }
        }
    }
}

fn new_table<T>(capacity: usize) -> Vec<Slot<T>> {
    let mut table = Vec::with_capacity(capacity);
    table.resize_with(capacity, || Slot::Empty);
    table
}

/// The single-threaded reference implementation of the cuckoo set.
pub struct SequentialSet<T> {
    inner: RefCell<Inner<T>>,
}

impl<T: Eq + Hash> CuckooSet<T> for SequentialSet<T> {
    fn new(initial_capacity: usize) -> Self {
        SequentialSet {
            inner: RefCell::new(Inner::with_capacity(
                initial_capacity.max(1),
                INITIAL_MAX_DISPLACEMENTS,
            )),
        }
    }

    fn add(&self, key: T) -> bool {
        self.inner.borrow_mut().add(key)
    }

    fn remove(&self, key: &T) -> bool {
        self.inner.borrow_mut().remove(key)
    }

    fn contains(&self, key: &T) -> bool {
        self.inner.borrow().contains(key)
    }

    fn size(&self) -> usize {
        self.inner.borrow().size()
    }
}

#[cfg(test)]
mod tests {
    use super::SequentialSet;
    use crate::set::CuckooSet;

    #[test]
    fn basic_lifecycle() {
        let s = SequentialSet::new(16);
        assert!(s.add(1));
        assert!(s.add(2));
        assert!(s.add(3));
        assert!(s.contains(&2));
        assert!(s.remove(&2));
        assert!(!s.contains(&2));
        assert_eq!(s.size(), 2);
    }

    /// Enough inserts at a small starting capacity to force multiple resizes.
    #[test]
    fn many_inserts_force_resizes() {
        let s = SequentialSet::new(4);
        for i in 1..32 {
            assert!(s.add(i));
        }
        assert_eq!(s.size(), 31);
        for i in 1..32 {
            assert!(s.contains(&i));
        }
    }

    #[test]
    fn duplicate_add_then_remove_then_remove_again() {
        let s = SequentialSet::new(16);
        assert!(s.add(7));
        assert!(!s.add(7));
        assert!(s.remove(&7));
        assert!(!s.remove(&7));
        assert!(!s.contains(&7));
    }

    #[test]
    fn populate_counts_successes_not_duplicates() {
        let s = SequentialSet::new(16);
        assert_eq!(s.populate(&[5, 5, 6]), 2);
        assert_eq!(s.size(), 2);
    }

    #[test]
    fn idempotent_add_remove() {
        let s = SequentialSet::new(16);
        assert!(s.add(42));
        assert!(!s.add(42));
        assert_eq!(s.size(), 1);
        assert!(s.remove(&42));
        assert!(!s.remove(&42));
        assert_eq!(s.size(), 0);
    }

    #[test]
    fn many_inserts_and_removals_preserve_size_law() {
        let s = SequentialSet::new(8);
        let mut expected = 0usize;
        for i in 0..500u64 {
            if s.add(i) {
                expected += 1;
            }
        }
        for i in 0..250u64 {
            if s.remove(&i) {
                expected -= 1;
            }
        }
        assert_eq!(s.size(), expected);
    }

    #[should_panic]
    #[test]
    fn reentrant_mutation_is_a_logic_error() {
        // Exercises the RefCell-backed reentrancy guard directly: holding
        // a mutable borrow while trying to take another is the nested-resize
        // logic error this guard exists to catch.
        let s = SequentialSet::<u64>::new(4);
        let _guard = s.inner.borrow_mut();
        s.add(1);
    }
}
