//! A small M:N task runtime.
//!
//! Tasks are user-level units of work multiplexed onto a fixed pool of OS
//! threads, the execution contexts. Contexts are grouped into scheduling
//! domains, each with its own FIFO ready queue; a task is created inside one
//! domain and only ever runs on that domain's contexts.
//!
//! A task starts as soon as it is created. Its owner must destroy it, which
//! waits for the body to finish:
//!
//! ```no_run
//! use cohort::{Domain, Runtime, Task};
//!
//! # fn main() -> cohort::Result<()> {
//! let runtime = Runtime::new()?;
//! let domain = Domain::open(&runtime, "workers", 3)?;
//!
//! let mut tasks = (0..10)
//!     .map(|i| Task::create_fn(&domain, format!("task-{i}"), move || println!("hello from {i}")))
//!     .collect::<cohort::Result<Vec<_>>>()?;
//!
//! for task in tasks.iter_mut() {
//!     task.destroy()?;
//! }
//!
//! domain.close()?;
//! runtime.shutdown()
//! # }
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod runtime;
pub use runtime::{Builder, Domain, Runtime};

pub mod task;
pub use task::{Task, preempt_point, yield_now};

mod utils;

#[cfg(test)]
mod test_utils;
