//! Scheduling primitives shared by the tree learner and the segment store.
//!
//! Scheduling, suspension, ordering, and cancellation guarantees live
//! alongside the types that implement them below.

mod cancel;
mod concurrency_level;
mod task_pool;

pub use cancel::CancelToken;
pub use concurrency_level::{Concurrency, ConcurrencyError};
pub use task_pool::TaskPool;
