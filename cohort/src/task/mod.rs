// Public API
mod handle;
pub use self::handle::{Destroy, Task, TaskInfo};

pub mod id;
pub use self::id::{Id, id, try_id};

pub(crate) mod state;
pub use self::state::State;

mod yield_now;
pub use self::yield_now::{YieldNow, preempt_point, yield_now};

// Exports
pub(crate) mod core;
