//! The transactional cuckoo set: every slot inspection and mutation
//! happens inside a small atomic region that either commits or aborts
//! and is retried, observed by other threads as one indivisible step.
//!
//! Each slot is a `crossbeam_epoch::Atomic<T>` cell; an atomic region is
//! realized as a pinned-epoch compare-and-set loop: snapshot the current
//! value, compute the new one purely, `compare_exchange`, and on failure
//! reload and retry. Memory reclamation for the evicted/removed pointer
//! is handed to `Guard::defer_destroy`, which only *schedules* the free
//! for once no guard can observe the old value any longer, rather than
//! running a destructor synchronously inside the region.
//!
//! Each atomic region here touches exactly one slot: the duplicate check
//! for a brand-new key reads two slots but mutates none, and every
//! displacement step is its own single-slot compare-and-swap, matching
//! the locked backend's "release and reacquire per step" discipline.
//! Nothing but the pure pointer swap lives inside a region — the
//! deferred heap release does not run synchronously, so it does not
//! violate the no-side-effects-inside-the-region rule.
//!
//! `T: Clone` is required so a key can be read back out of a slot that is
//! about to be reclaimed without racing the reclamation itself (we copy
//! the value while the epoch guard still protects the old allocation,
//! then let `defer_destroy` drop the original once no guard can see it
//! any longer).

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use parking_lot::RwLock;

use crate::error::Error;
use crate::hashing::Hasher;
use crate::set::CuckooSet;

const INITIAL_MAX_DISPLACEMENTS: usize = 32;

enum InsertOutcome<T> {
    AlreadyPresent,
    Inserted,
    ChainExhausted(T),
}

/// One pinned-epoch atomic region: compare the slot's current contents
/// against what we last observed and swap in `new_key`, handing back
/// whatever key was evicted, if any. Retries by reloading and recomputing
/// — never by touching a second slot — so this function alone is the
/// entire atomic region.
fn cas_slot<T: Eq + Clone>(cell: &Atomic<T>, new_key: T, guard: &Guard) -> Option<T> {
    let mut new = Owned::new(new_key);
    loop {
        let current = cell.load(Ordering::Acquire, guard);
        let evicted = if current.is_null() {
            None
        } else {
            Some(unsafe { current.deref() }.clone())
        };

        match cell.compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire, guard) {
            Ok(prev) => {
                if !prev.is_null() {
                    unsafe { guard.defer_destroy(prev) };
                }
                return evicted;
            }
            Err(e) => new = e.new,
        }
    }
}

/// Outcome of placing a brand-new key into its table-0 slot.
enum FirstStepOutcome<T> {
    AlreadyPresent,
    Inserted(Option<T>),
}

/// Checks `key` against both of its candidate slots and, if absent, swaps
/// it into `cell0` — retrying the whole check-and-place as one unit
/// whenever the CAS loses a race, rather than checking once and placing
/// separately. Re-validating non-duplication against freshly reloaded
/// slots on every retry is what keeps two threads concurrently calling
/// `add` with the same not-yet-present key from both passing the
/// duplicate check and then one displacing the other's freshly placed
/// copy as though it were a distinct evicted key — that would leave two
/// slots holding equal keys, breaking uniqueness. Only the first
/// displacement step needs this: every later step moves a key that is
/// already unique in the table, so it cannot collide with itself.
fn try_place_first<T: Eq + Clone>(
    cell0: &Atomic<T>,
    cell1: &Atomic<T>,
    key: T,
    guard: &Guard,
) -> FirstStepOutcome<T> {
    let mut new = Owned::new(key);
    loop {
        let current0 = cell0.load(Ordering::Acquire, guard);
        let current1 = cell1.load(Ordering::Acquire, guard);
        let dup = (!current0.is_null() && unsafe { current0.deref() } == &*new)
            || (!current1.is_null() && unsafe { current1.deref() } == &*new);
        if dup {
            return FirstStepOutcome::AlreadyPresent;
        }

        let evicted = if current0.is_null() {
            None
        } else {
            Some(unsafe { current0.deref() }.clone())
        };

        match cell0.compare_exchange(current0, new, Ordering::AcqRel, Ordering::Acquire, guard) {
            Ok(prev) => {
                if !prev.is_null() {
                    unsafe { guard.defer_destroy(prev) };
                }
                return FirstStepOutcome::Inserted(evicted);
            }
            Err(e) => new = e.new,
        }
    }
}

/// Clears a slot if it holds `key`, as one atomic region. Returns whether
/// it did.
fn cas_remove<T: Eq>(cell: &Atomic<T>, key: &T, guard: &Guard) -> bool {
    loop {
        let current = cell.load(Ordering::Acquire, guard);
        if current.is_null() || unsafe { current.deref() } != key {
            return false;
        }

        match cell.compare_exchange(
            current,
            Shared::null(),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(prev) => {
                unsafe { guard.defer_destroy(prev) };
                return true;
            }
            Err(_) => continue,
        }
    }
}

/// Steals whatever a slot holds, unconditionally. Only ever called while
/// the caller holds exclusive access to the generation (during resize),
/// so there is no contending writer to retry against.
fn extract<T>(cell: &mut Atomic<T>, guard: &Guard) -> Option<T> {
    let prev = cell.swap(Shared::null(), Ordering::AcqRel, guard);
    if prev.is_null() {
        None
    } else {
        Some(*unsafe { prev.into_owned() }.into_box())
    }
}

/// Installs `key` into a slot, unconditionally, returning whatever it
/// evicted. Only used under exclusive access (resize rehashing).
fn install<T>(cell: &mut Atomic<T>, key: T, guard: &Guard) -> Option<T> {
    let prev = cell.swap(Owned::new(key), Ordering::AcqRel, guard);
    if prev.is_null() {
        None
    } else {
        Some(*unsafe { prev.into_owned() }.into_box())
    }
}

struct Generation<T> {
    tables: [Vec<Atomic<T>>; 2],
    hasher: Hasher,
    capacity: usize,
    max_displacements: usize,
}

impl<T: Eq + Hash + Clone> Generation<T> {
    fn with_capacity(capacity: usize, max_displacements: usize) -> Generation<T> {
        Generation {
            tables: [new_table(capacity), new_table(capacity)],
            hasher: Hasher::new(capacity),
            capacity,
            max_displacements,
        }
    }

    fn contains(&self, key: &T, guard: &Guard) -> bool {
        let i0 = self.hasher.h1(key);
        let i1 = self.hasher.h2(key);
        let g0 = self.tables[0][i0].load(Ordering::Acquire, guard);
        let g1 = self.tables[1][i1].load(Ordering::Acquire, guard);
        (!g0.is_null() && unsafe { g0.deref() } == key)
            || (!g1.is_null() && unsafe { g1.deref() } == key)
    }

    fn remove(&self, key: &T, guard: &Guard) -> bool {
        let i0 = self.hasher.h1(key);
        let i1 = self.hasher.h2(key);
        cas_remove(&self.tables[0][i0], key, guard) || cas_remove(&self.tables[1][i1], key, guard)
    }

    fn size(&self, guard: &Guard) -> usize {
        self.tables
            .iter()
            .flat_map(|t| t.iter())
            .filter(|cell| !cell.load(Ordering::Acquire, guard).is_null())
            .count()
    }

    fn try_insert(&self, key: T, guard: &Guard) -> InsertOutcome<T> {
        let i0 = self.hasher.h1(&key);
        let i1 = self.hasher.h2(&key);

        let cell0 = &self.tables[0][i0];
        let cell1 = &self.tables[1][i1];
        let mut floating = match try_place_first(cell0, cell1, key, guard) {
            FirstStepOutcome::AlreadyPresent => return InsertOutcome::AlreadyPresent,
            FirstStepOutcome::Inserted(None) => return InsertOutcome::Inserted,
            FirstStepOutcome::Inserted(Some(evicted)) => evicted,
        };

        for iteration in 0..self.max_displacements {
            if iteration > 0 {
                let i0 = self.hasher.h1(&floating);
                match cas_slot(&self.tables[0][i0], floating.clone(), guard) {
                    None => return InsertOutcome::Inserted,
                    Some(evicted) => floating = evicted,
                }
            }

            let i1 = self.hasher.h2(&floating);
            match cas_slot(&self.tables[1][i1], floating.clone(), guard) {
                None => return InsertOutcome::Inserted,
                Some(evicted) => floating = evicted,
            }
        }

        InsertOutcome::ChainExhausted(floating)
    }

    /// Single-pass rehash used only under exclusive access (resize).
    fn insert_chain_exclusive(&mut self, key: T, guard: &Guard) -> Result<(), T> {
        let mut floating = key;

        for _ in 0..self.max_displacements {
            let i0 = self.hasher.h1(&floating);
            floating = match install(&mut self.tables[0][i0], floating, guard) {
                None => return Ok(()),
                Some(evicted) => evicted,
            };

            let i1 = self.hasher.h2(&floating);
            floating = match install(&mut self.tables[1][i1], floating, guard) {
                None => return Ok(()),
                Some(evicted) => evicted,
            };
        }

        Err(floating)
    }
}

fn new_table<T>(capacity: usize) -> Vec<Atomic<T>> {
    let mut table = Vec::with_capacity(capacity);
    table.resize_with(capacity, Atomic::null);
    table
}

/// The transactional implementation of the cuckoo set. Safe to share
/// across threads behind an `Arc`.
pub struct TransactionalSet<T> {
    generation: RwLock<Generation<T>>,
    /// Compare-and-set guard ensuring only one thread actually performs
    /// the full rehash during a resize; the `RwLock` above is what gives
    /// resize its exclusivity over in-flight atomic regions, applied here
    /// underneath the per-slot CAS regions rather than in place of them.
    resizing: AtomicBool,
}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> TransactionalSet<T> {
    fn resize_with_extra(&self, extra: T) {
        if self
            .resizing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let mut gen = self.generation.write();
            let guard = epoch::pin();

            let mut surviving = Vec::new();
            for table in gen.tables.iter_mut() {
                for cell in table.iter_mut() {
                    if let Some(key) = extract(cell, &guard) {
                        surviving.push(key);
                    }
                }
            }
            surviving.push(extra);

            let new_capacity = gen.capacity * 2;
            let new_max_displacements = gen.max_displacements * 2;
            *gen = Generation::with_capacity(new_capacity, new_max_displacements);

            for key in surviving {
                if gen.insert_chain_exclusive(key, &guard).is_err() {
                    self.resizing.store(false, Ordering::Release);
                    panic!("{}", Error::RehashFailed);
                }
            }

            self.resizing.store(false, Ordering::Release);
        } else {
            // Someone else is already resizing. The `resizing` CAS above
            // only tells us a winner has been chosen, not that its resize
            // has finished — racing it for the write lock could land us
            // on the still-old, still-exhausted generation before the
            // winner replaces it, and `insert_chain_exclusive` would then
            // fail spuriously. Spin until `resizing` flips back to false,
            // which happens only after the winner has installed the
            // doubled generation, then place our own leftover key against
            // the tables it leaves behind — guaranteed large enough,
            // since resize always at least doubles.
            while self.resizing.load(Ordering::Acquire) {
                std::thread::yield_now();
            }

            let mut gen = self.generation.write();
            let guard = epoch::pin();
            if gen.insert_chain_exclusive(extra, &guard).is_err() {
                panic!("{}", Error::RehashFailed);
            }
        }
    }
}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> CuckooSet<T> for TransactionalSet<T> {
    fn new(initial_capacity: usize) -> Self {
        TransactionalSet {
            generation: RwLock::new(Generation::with_capacity(
                initial_capacity.max(1),
                INITIAL_MAX_DISPLACEMENTS,
            )),
            resizing: AtomicBool::new(false),
        }
    }

    fn add(&self, key: T) -> bool {
        let guard = epoch::pin();
        let outcome = self.generation.read().try_insert(key, &guard);
        match outcome {
            InsertOutcome::AlreadyPresent => false,
            InsertOutcome::Inserted => true,
            InsertOutcome::ChainExhausted(stuck) => {
                self.resize_with_extra(stuck);
                true
            }
        }
    }

    fn remove(&self, key: &T) -> bool {
        let guard = epoch::pin();
        self.generation.read().remove(key, &guard)
    }

    fn contains(&self, key: &T) -> bool {
        let guard = epoch::pin();
        self.generation.read().contains(key, &guard)
    }

    fn size(&self) -> usize {
        let guard = epoch::pin();
        self.generation.read().size(&guard)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;
    use std::thread;

    use super::TransactionalSet;
    use crate::set::CuckooSet;

    #[test]
    fn basic_lifecycle() {
        let s = TransactionalSet::new(16);
        assert!(s.add(1));
        assert!(s.add(2));
        assert!(s.add(3));
        assert!(s.contains(&2));
        assert!(s.remove(&2));
        assert!(!s.contains(&2));
        assert_eq!(s.size(), 2);
    }

    #[test]
    fn many_inserts_force_resizes() {
        let s = TransactionalSet::new(4);
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
        let s = TransactionalSet::new(16);
        assert!(s.add(7));
        assert!(!s.add(7));
        assert!(s.remove(&7));
        assert!(!s.remove(&7));
        assert!(!s.contains(&7));
    }

    #[test]
    fn populate_counts_successes_not_duplicates() {
        let s = TransactionalSet::new(16);
        assert_eq!(s.populate(&[5, 5, 6]), 2);
        assert_eq!(s.size(), 2);
    }

    /// Many threads each own a disjoint key range and repeatedly
    /// add/remove it, scaled down for test runtime; the pre-populated
    /// keys must survive untouched and the size law must hold after join.
    #[test]
    fn disjoint_add_remove_pairs_preserve_size_law() {
        let s = Arc::new(TransactionalSet::<u64>::new(16));
        for i in 1..=100u64 {
            assert!(s.add(i));
        }

        let successes = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let s = s.clone();
            let successes = successes.clone();
            let key = 101 + t;
            handles.push(thread::spawn(move || {
                for _ in 0..2000 {
                    if s.add(key) {
                        successes.fetch_add(1, StdOrdering::SeqCst);
                    }
                    if s.remove(&key) {
                        successes.fetch_add(1, StdOrdering::SeqCst);
                    }
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(s.size(), 100);
        // Every (add, remove) pair round-trips at least once per thread.
        assert!(successes.load(StdOrdering::SeqCst) >= 8 * 2);
    }

    #[test]
    fn concurrent_spam_insert_distinct_keys() {
        let s = Arc::new(TransactionalSet::new(64));
        let mut joins = Vec::new();

        for t in 0..10u64 {
            let s = s.clone();
            joins.push(thread::spawn(move || {
                for i in t * 1000..(t + 1) * 1000 {
                    assert!(s.add(i));
                }
            }));
        }

        for j in joins {
            j.join().unwrap();
        }

        for i in 0..10_000u64 {
            assert!(s.contains(&i));
        }
        assert_eq!(s.size(), 10_000);
    }
}
