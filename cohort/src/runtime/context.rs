use crate::runtime::domain::DomainId;
use crate::runtime::worker::ContextId;
use crate::task::Id;
use std::cell::Cell;
use std::thread_local;
use std::time::{Duration, Instant};

/// Per-thread view of the execution context running on this thread. Only
/// worker threads have one; every other thread sees `None`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerContext {
    pub(crate) domain: DomainId,
    pub(crate) context: ContextId,
    pub(crate) preemption: Option<Duration>,
}

/// The task currently being polled on this thread and when its slice began.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskSlice {
    pub(crate) id: Id,
    pub(crate) started: Instant,
}

thread_local! {
    static WORKER: Cell<Option<WorkerContext>> = const { Cell::new(None) };
    static CURRENT_TASK: Cell<Option<TaskSlice>> = const { Cell::new(None) };
    static PREEMPTED: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn init_worker_context(ctx: WorkerContext) {
    WORKER.with(|w| {
        debug_assert!(w.get().is_none(), "worker context initialized twice");
        w.set(Some(ctx));
    });
}

pub(crate) fn current_worker() -> Option<WorkerContext> {
    WORKER.with(|w| w.get())
}

pub(crate) fn current_domain() -> Option<DomainId> {
    current_worker().map(|w| w.domain)
}

pub(crate) fn current_task_id() -> Option<Id> {
    CURRENT_TASK.with(|t| t.get().map(|slice| slice.id))
}

/// Returns the previous value so callers can restore it.
pub(crate) fn set_current_task(slice: Option<TaskSlice>) -> Option<TaskSlice> {
    CURRENT_TASK.with(|t| t.replace(slice))
}

/// True when the running task has exhausted the preemption quantum of its
/// domain. Always false outside a task or when preemption is disabled.
pub(crate) fn should_preempt() -> bool {
    let Some(quantum) = current_worker().and_then(|w| w.preemption) else {
        return false;
    };

    CURRENT_TASK.with(|t| {
        t.get()
            .is_some_and(|slice| slice.started.elapsed() >= quantum)
    })
}

/// Flags the current poll as ending in a preemption rather than a voluntary
/// yield.
pub(crate) fn mark_preempted() {
    PREEMPTED.with(|p| p.set(true));
}

pub(crate) fn take_preempted() -> bool {
    PREEMPTED.with(|p| p.replace(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_no_worker_context_on_foreign_thread() {
        assert!(current_worker().is_none());
        assert!(current_domain().is_none());
        assert!(!should_preempt());
    }

    #[test]
    fn test_should_preempt_after_quantum() {
        thread::spawn(|| {
            init_worker_context(WorkerContext {
                domain: DomainId::next(),
                context: ContextId(0),
                preemption: Some(Duration::from_millis(1)),
            });

            assert_eq!(current_worker().map(|w| w.context), Some(ContextId(0)));

            // No task is running yet.
            assert!(!should_preempt());

            set_current_task(Some(TaskSlice {
                id: Id::next(),
                started: Instant::now(),
            }));
            thread::sleep(Duration::from_millis(5));
            assert!(should_preempt());

            set_current_task(None);
            assert!(!should_preempt());

            assert!(!take_preempted());
            mark_preempted();
            assert!(take_preempted());
            assert!(!take_preempted());
        })
        .join()
        .unwrap();
    }
}
