// Public API
#[allow(clippy::module_inception)]
pub mod runtime;
pub use runtime::{Builder, Runtime};

pub mod domain;
pub use domain::{Domain, DomainBuilder, DomainId, DomainInfo};

pub mod worker;
pub use worker::{ContextId, ContextInfo};

mod stats;
pub use stats::DomainStatsSnapshot;

// Exports
pub(crate) use runtime::{RuntimeConfig, RuntimeShared};

pub(crate) mod context;

mod pool;

pub(crate) mod registry;

mod shared;
