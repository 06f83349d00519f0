//! Error types.
//!
//! All user-visible failures of `add`/`remove`/`contains` are plain
//! booleans — nothing in this crate's public set API returns `Result` for
//! a duplicate insert or a missing key. `Error` exists only for the two
//! failure modes that are genuinely exceptional: a rehash that cannot
//! place a key even at doubled capacity, and the driver's post-join
//! size-invariant check.

quick_error! {
    pub enum Error {
        /// The displacement chain exhausted its budget again immediately
        /// after a `resize` doubled the capacity and the displacement
        /// bound.
        ///
        /// Indicates a hash quality problem (or memory corruption) and
        /// is not recoverable by retrying.
        RehashFailed {
            display("rehash failed: a key could not be placed even after doubling capacity")
        }
        /// The driver observed `expected_size != size()` after all worker
        /// threads joined.
        SizeInvariantViolated(expected: usize, observed: usize) {
            display("size invariant violated: expected {} keys, observed {}", expected, observed)
        }
    }
}
