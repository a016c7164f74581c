use crate::error::{Error, Result};
use crate::runtime::context::{self, WorkerContext};
use crate::runtime::domain::{DomainId, DomainShared};
use crate::task::core::{PollOutcome, TaskCore};
use crate::task::id::TaskIdGuard;
use crate::task::state::TransitionToIdle;
use crate::task::Id;
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::fmt;
use std::iter;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Index of an execution context inside its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub(crate) usize);

impl ContextId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Point-in-time view of an execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextInfo {
    pub id: ContextId,
    pub thread_name: Option<String>,
    pub current_task: Option<Id>,
    pub polls: u64,
    pub preemption: Option<Duration>,
}

/// An execution context: one OS thread that polls tasks from the ready queue
/// of the domain it is bound to, one at a time.
#[derive(Debug)]
pub(crate) struct Worker {
    id: ContextId,

    /// Set once by `bind`. An unbound worker never runs tasks.
    domain: OnceLock<DomainId>,

    thread_name: OnceLock<String>,

    /// Task being polled right now, if any.
    current: Mutex<Option<Id>>,

    /// Guards the "one task per context" invariant.
    busy: AtomicBool,

    polls: AtomicU64,

    /// How many times `find_task` retries a contended queue before giving up.
    max_steal_retries: usize,
}

impl Worker {
    pub(crate) fn new(id: ContextId, max_steal_retries: usize) -> Self {
        Self {
            id,
            domain: OnceLock::new(),
            thread_name: OnceLock::new(),
            current: Mutex::new(None),
            busy: AtomicBool::new(false),
            polls: AtomicU64::new(0),
            max_steal_retries,
        }
    }

    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    /// Associates this context with `domain`. A context belongs to exactly
    /// one domain, so binding twice is rejected.
    pub(crate) fn bind(&self, domain: DomainId) -> Result<()> {
        self.domain.set(domain).map_err(|_| {
            Error::InvalidConfig(format!(
                "execution context {} is already bound to domain {}",
                self.id,
                self.domain.get().map_or(0, |d| d.as_u64())
            ))
        })
    }

    pub(crate) fn set_thread_name(&self, name: String) {
        _ = self.thread_name.set(name);
    }

    pub(crate) fn current_task(&self) -> Option<Id> {
        *self.current.lock()
    }

    pub(crate) fn info(&self, preemption: Option<Duration>) -> ContextInfo {
        ContextInfo {
            id: self.id,
            thread_name: self.thread_name.get().cloned(),
            current_task: self.current_task(),
            polls: self.polls.load(Ordering::Relaxed),
            preemption,
        }
    }

    fn find_task(&self, domain: &DomainShared) -> Option<Arc<TaskCore>> {
        // Repeat a maximum of `max_steal_retries` while the queue is
        // contended, otherwise return None.
        iter::repeat_with(|| domain.injector.steal())
            .take(self.max_steal_retries)
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
    }

    /// Runs on the worker thread until the domain shuts down.
    pub(crate) fn event_loop(&self, domain: &Arc<DomainShared>) -> Result<()> {
        let Some(bound) = self.domain.get() else {
            return Err(Error::InvalidConfig(format!(
                "execution context {} is not bound to a domain",
                self.id
            )));
        };
        debug_assert_eq!(*bound, domain.id);

        context::init_worker_context(WorkerContext {
            domain: domain.id,
            context: self.id,
            preemption: domain.cfg.preemption,
        });

        tracing::trace!(domain = %domain.name, context = %self.id, "execution context started");

        loop {
            if let Some(task) = self.find_task(domain) {
                self.run_task(domain, task);
                continue;
            }

            if domain.shared.is_shutdown() {
                break;
            }

            // Park until a task is admitted or the domain shuts down.
            domain.shared.park_current_thread(&domain.injector);
        }

        tracing::trace!(domain = %domain.name, context = %self.id, "execution context stopped");
        Ok(())
    }

    fn run_task(&self, domain: &Arc<DomainShared>, task: Arc<TaskCore>) {
        if !task.transition_to_running() {
            return;
        }

        let was_busy = self.busy.swap(true, Ordering::AcqRel);
        assert!(!was_busy, "execution context {} ran two tasks at once", self.id);

        *self.current.lock() = Some(task.id);
        let _guard = ScopeGuard::new(|| {
            *self.current.lock() = None;
            self.busy.store(false, Ordering::Release);
        });

        self.polls.fetch_add(1, Ordering::Relaxed);
        domain.stats.record_dispatch();

        // A stale flag from a body that returned after `preempt_point` must
        // not leak into this poll.
        _ = context::take_preempted();

        let outcome = {
            let _id_guard = TaskIdGuard::enter(task.id);
            let _span =
                tracing::trace_span!("task", id = task.id.as_u64(), name = %task.name).entered();
            task.poll()
        };

        match outcome {
            PollOutcome::Complete => {
                tracing::trace!(task = %task.id, "task body returned");
                domain.task_terminated(&task, false);
            }
            PollOutcome::Panicked(msg) => {
                tracing::warn!(task = %task.id, name = %task.name, panic = %msg, "task body panicked");
                domain.task_terminated(&task, true);
            }
            PollOutcome::Pending => match task.transition_to_idle() {
                TransitionToIdle::Requeue => {
                    if context::take_preempted() {
                        tracing::trace!(task = %task.id, "task preempted");
                        domain.stats.record_preemption();
                    } else {
                        tracing::trace!(task = %task.id, "task yielded");
                        domain.stats.record_yield();
                    }
                    domain.admit(task);
                }
                TransitionToIdle::Blocked => {
                    tracing::trace!(task = %task.id, "task blocked");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Worker: Send, Sync);

    #[test]
    fn test_bind_once() {
        let worker = Worker::new(ContextId(0), 3);

        let domain = DomainId::next();
        assert!(worker.bind(domain).is_ok());

        assert!(matches!(
            worker.bind(DomainId::next()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_idle_context_info() {
        let worker = Worker::new(ContextId(2), 3);
        let info = worker.info(Some(Duration::from_millis(10)));

        assert_eq!(info.id.as_usize(), 2);
        assert_eq!(info.current_task, None);
        assert_eq!(info.polls, 0);
        assert_eq!(info.thread_name, None);
        assert_eq!(info.preemption, Some(Duration::from_millis(10)));
    }
}
