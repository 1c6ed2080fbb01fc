//! Continuation primitives for the segment read path.
//!
//! - [`deferred`] / [`Promise`] / [`Deferred`] - single-assignment result
//!   cells that can be awaited, chained with [`Deferred::then`], or waited on
//! - [`Executor`] - where work runs; [`ThreadPool`] and [`Inline`]
//! - [`spawn`] - run a future as a cooperative task on an executor
//! - [`block_on`] - drive a future from a synchronous caller, refusing to
//!   block a thread of the executor it depends on
//!
//! # Example
//!
//! ```
//! use io_continuation::{Executor, ThreadPool, block_on, deferred, spawn};
//! use std::sync::Arc;
//!
//! let pool: Arc<dyn Executor> = Arc::new(ThreadPool::new("io", 2).unwrap());
//! let (promise, value) = deferred::<u32>();
//! let task = spawn(&pool, async move { value.await.unwrap_or(0) * 2 });
//! promise.set(21);
//! assert_eq!(block_on(task, Some(&*pool)).unwrap(), Ok(42));
//! ```

mod deferred;
mod executor;
mod task;

pub use deferred::{Canceled, Deferred, Promise, WaitError, deferred, deferred_on};
pub use executor::{Executor, Inline, ThreadPool, Work};
pub use task::{block_on, spawn};
