//! Concurrency primitives for the intent log
//!
//! - [`GroupCommit`]: leader/follower batching of commit requests. One caller
//!   writes a batch on behalf of everyone waiting; the others sleep until the
//!   durable watermark covers them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod group_commit;

pub use group_commit::{GroupCommit, LeaderGuard, Role};
