use crate::task::Id;
use std::io;

/// A centralized error type for all domain, task and runtime operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The operation referenced a domain that is closed or unknown.
    #[error("invalid domain `{0}`: domain is closed or unknown")]
    InvalidDomain(String),

    /// Rejected configuration, e.g. opening a domain with zero contexts.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tried to close a domain that still owns tasks which are not terminated.
    #[error("domain `{name}` is busy: {active} task(s) not yet terminated")]
    DomainBusy { name: String, active: usize },

    /// `destroy` was called a second time on the same task.
    #[error("task {0} was already destroyed")]
    DoubleDestroy(Id),

    /// The wait being requested can never complete.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// The runtime cannot shut down while tasks are still registered.
    #[error("runtime has {0} live task(s) that were never destroyed")]
    LiveTasks(usize),

    #[error("runtime is shut down")]
    RuntimeShutdown,

    /// Spawning an execution context thread failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A catch-all for unexpected runtime failures.
    #[error("an unexpected error occurred: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Errors caused by misuse of the API rather than by the runtime state
    /// changing underneath the caller.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Error::DoubleDestroy(_) | Error::Deadlock(_) | Error::InvalidConfig(_)
        )
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::InvalidDomain(a), Self::InvalidDomain(b)) => a == b,
            (Self::InvalidConfig(a), Self::InvalidConfig(b)) => a == b,
            (
                Self::DomainBusy { name: a, active: x },
                Self::DomainBusy { name: b, active: y },
            ) => a == b && x == y,
            (Self::DoubleDestroy(a), Self::DoubleDestroy(b)) => a == b,
            (Self::Deadlock(_), Self::Deadlock(_)) => true,
            (Self::LiveTasks(a), Self::LiveTasks(b)) => a == b,
            (Self::RuntimeShutdown, Self::RuntimeShutdown) => true,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Error: Send, Sync, std::error::Error);

    #[test]
    fn test_error_messages() {
        let err = Error::DomainBusy {
            name: "fred".to_string(),
            active: 3,
        };
        assert_eq!(
            err.to_string(),
            "domain `fred` is busy: 3 task(s) not yet terminated"
        );

        let err = Error::InvalidConfig("context count must be at least 1".to_string());
        assert!(err.to_string().contains("at least 1"));
        assert!(err.is_programming_error());
    }

    #[test]
    fn test_internal_from_anyhow() {
        let err: Error = anyhow::anyhow!("2 thread(s) panicked").into();
        assert!(matches!(err, Error::Internal(_)));
        assert!(!err.is_programming_error());
    }
}
