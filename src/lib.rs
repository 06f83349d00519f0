//! A concurrent set of comparable keys, backed by a two-table cuckoo
//! hash with dynamic resizing.
//!
//! Three interchangeable backends implement the same [`CuckooSet`]
//! trait: [`sequential::SequentialSet`] (a single-threaded reference
//! implementation), [`locked::LockedSet`] (fine-grained per-slot
//! locking), and [`transactional::TransactionalSet`] (optimistic,
//! lock-free atomic regions). All three share the same hashing scheme
//! ([`hashing::Hasher`]) and slot representation ([`slot::Slot`]), so
//! their observable behavior — which keys end up where — is identical;
//! only their concurrency story differs.

#[macro_use]
extern crate slog;
#[macro_use]
extern crate quick_error;

pub mod error;
pub mod hashing;
pub mod locked;
pub mod sequential;
pub mod set;
pub mod slot;
pub mod transactional;

pub use error::Error;
pub use locked::LockedSet;
pub use sequential::SequentialSet;
pub use set::CuckooSet;
pub use transactional::TransactionalSet;
