use std::sync::atomic::{AtomicU64, Ordering};

/// Scheduling counters of one domain. Updated with relaxed atomics, so a
/// snapshot taken while contexts are running is only approximately
/// consistent across fields.
#[derive(Debug, Default)]
pub(crate) struct DomainStats {
    admitted: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    yields: AtomicU64,
    preemptions: AtomicU64,
    panics: AtomicU64,
}

/// Point-in-time copy of a domain's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainStatsSnapshot {
    /// Pushes to the ready queue, including re-queues after a yield or wakeup.
    pub admitted: u64,
    /// Polls of a task body.
    pub dispatched: u64,
    /// Tasks that reached `Terminated`, panicked ones included.
    pub completed: u64,
    pub yields: u64,
    pub preemptions: u64,
    pub panics: u64,
}

impl DomainStats {
    pub(crate) fn record_admit(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completion(&self, panicked: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if panicked {
            self.panics.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_yield(&self) {
        self.yields.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DomainStatsSnapshot {
        DomainStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = DomainStats::default();
        stats.record_admit();
        stats.record_admit();
        stats.record_dispatch();
        stats.record_completion(false);
        stats.record_completion(true);
        stats.record_preemption();

        assert_eq!(
            stats.snapshot(),
            DomainStatsSnapshot {
                admitted: 2,
                dispatched: 1,
                completed: 2,
                yields: 0,
                preemptions: 1,
                panics: 1,
            }
        );
    }
}
