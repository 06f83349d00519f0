//! The bucket state shared by the sequential and fine-grained backends.
//!
//! There is no `Removed` tombstone variant: cuckoo hashing resolves a
//! deletion by clearing the slot outright, since lookups never probe past
//! an empty slot the way linear-probing schemes must (a key's two
//! candidate locations are fixed by its hash, not by a probe sequence).

/// A single table slot: either empty, or holding exactly one key.
#[derive(Clone, Debug)]
pub enum Slot<T> {
    Empty,
    Occupied(T),
}

impl<T> Slot<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    /// Replace this slot with `Empty`, returning whatever it held.
    pub fn take(&mut self) -> Slot<T> {
        std::mem::replace(self, Slot::Empty)
    }
}

impl<T: PartialEq> Slot<T> {
    pub fn holds(&self, key: &T) -> bool {
        match self {
            Slot::Occupied(k) => k == key,
            Slot::Empty => false,
        }
    }
}
