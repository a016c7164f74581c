use crate::error::{Error, Result};
use crate::runtime::domain::DomainId;
use crate::task::core::TaskCore;
use crate::task::{Id, TaskInfo};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// Every task that was created and not yet destroyed, keyed by ID. The owner's
// `Task` handle and this map are the two long-lived references to a task: the
// map is what lets the runtime refuse to shut down while a task is alive and
// detect a second destroy of the same task.
//
// Creation and destruction happen concurrently from any thread, so the map is
// sharded to keep contention low.
#[derive(Debug)]
pub(crate) struct TaskRegistry {
    tasks: DashMap<Id, Arc<TaskCore>>,

    // Keep track of size separately because DashMap impl for len iterates over
    // all shards.
    size: AtomicUsize,

    // Inserts hold the read side, closing holds the write side. This orders
    // every insert either before the emptiness check of `close` or after the
    // registry is marked closed.
    closed: RwLock<bool>,

    // Wait-for edges: waiting task -> tasks it is destroying. A task can await
    // several destroys at once, and the same target twice.
    waits: Mutex<HashMap<Id, Vec<Id>>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self {
            tasks: DashMap::new(),
            size: AtomicUsize::new(0),
            closed: RwLock::new(false),
            waits: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, task: Arc<TaskCore>) -> Result<()> {
        let closed = self.closed.read();
        if *closed {
            return Err(Error::RuntimeShutdown);
        }

        self.size.fetch_add(1, Ordering::Relaxed);
        let prev = self.tasks.insert(task.id, task);
        debug_assert!(prev.is_none(), "task IDs are never reused");
        Ok(())
    }

    /// Removes a task by its ID, returning it.
    pub(crate) fn remove(&self, id: &Id) -> Option<Arc<TaskCore>> {
        self.tasks.remove(id).map(|(_id, task)| {
            self.size.fetch_sub(1, Ordering::Relaxed);
            task
        })
    }

    pub(crate) fn contains(&self, id: &Id) -> bool {
        self.tasks.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Refuses new tasks from now on. Fails with `LiveTasks` and leaves the
    /// registry open if any task is still registered. Closing twice is a no-op.
    pub(crate) fn close(&self) -> Result<()> {
        let mut closed = self.closed.write();
        if *closed {
            return Ok(());
        }

        let live = self.len();
        if live > 0 {
            return Err(Error::LiveTasks(live));
        }

        *closed = true;
        Ok(())
    }

    /// Accepts new tasks again after a shutdown that could not complete.
    pub(crate) fn reopen(&self) {
        *self.closed.write() = false;
    }

    /// Records that `waiter` is about to wait for `target` to terminate.
    ///
    /// `waiter` is `None` when the caller is a plain thread rather than a
    /// task, which can never be part of a cycle. Fails with `Deadlock` if the
    /// wait could never complete: a task waiting on itself, or a task waiting
    /// on a task that is (transitively) waiting on it.
    pub(crate) fn begin_wait(&self, waiter: Option<Id>, target: Id) -> Result<()> {
        let Some(waiter) = waiter else {
            return Ok(());
        };

        if waiter == target {
            return Err(Error::Deadlock(format!("task {waiter} cannot destroy itself")));
        }

        let mut waits = self.waits.lock();

        // Depth-first walk of everything `target` is transitively waiting on.
        let mut seen = HashSet::new();
        let mut stack = vec![target];
        while let Some(cursor) = stack.pop() {
            if !seen.insert(cursor) {
                continue;
            }

            for &next in waits.get(&cursor).into_iter().flatten() {
                if next == waiter {
                    return Err(Error::Deadlock(format!(
                        "task {waiter} destroying task {target} closes a wait cycle"
                    )));
                }
                stack.push(next);
            }
        }

        waits.entry(waiter).or_default().push(target);
        Ok(())
    }

    /// Drops one `waiter -> target` edge recorded by `begin_wait`.
    pub(crate) fn end_wait(&self, waiter: Option<Id>, target: Id) {
        let Some(waiter) = waiter else {
            return;
        };

        let mut waits = self.waits.lock();
        if let Some(targets) = waits.get_mut(&waiter) {
            if let Some(pos) = targets.iter().position(|&t| t == target) {
                targets.swap_remove(pos);
            }
            if targets.is_empty() {
                waits.remove(&waiter);
            }
        }
    }

    /// Blocks until every registered task is terminated. Tasks created while
    /// waiting are waited for too.
    pub(crate) fn wait_all_terminated(&self) {
        loop {
            // Never block while holding a shard lock.
            let pending = self
                .tasks
                .iter()
                .filter(|entry| !entry.value().is_terminated())
                .map(|entry| Arc::clone(entry.value()))
                .collect::<Vec<_>>();

            if pending.is_empty() {
                break;
            }

            pending.iter().for_each(|task| task.wait_terminated());
        }
    }

    /// Snapshot of registered tasks, sorted by ID, optionally restricted to
    /// one domain.
    pub(crate) fn snapshot(&self, domain: Option<DomainId>) -> Vec<TaskInfo> {
        let mut infos = self
            .tasks
            .iter()
            .filter(|entry| domain.is_none_or(|d| entry.value().domain.id == d))
            .map(|entry| entry.value().info())
            .collect::<Vec<_>>();

        infos.sort_by_key(|info| info.id);
        infos
    }
}

// Test-only helpers
#[cfg(test)]
impl TaskRegistry {
    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_self_wait_is_deadlock() {
        let registry = TaskRegistry::new();
        let a = Id::next();

        assert!(matches!(
            registry.begin_wait(Some(a), a),
            Err(Error::Deadlock(_))
        ));
    }

    #[rstest]
    #[case::pair(2)]
    #[case::triangle(3)]
    #[case::long_chain(8)]
    fn test_wait_cycle_is_deadlock(#[case] len: usize) {
        let registry = TaskRegistry::new();
        let ids = (0..len).map(|_| Id::next()).collect::<Vec<_>>();

        // ids[0] -> ids[1] -> ... -> ids[len - 1]
        for pair in ids.windows(2) {
            assert!(registry.begin_wait(Some(pair[0]), pair[1]).is_ok());
        }

        assert!(matches!(
            registry.begin_wait(Some(ids[len - 1]), ids[0]),
            Err(Error::Deadlock(_))
        ));

        // Breaking the chain makes the same wait legal.
        registry.end_wait(Some(ids[0]), ids[1]);
        assert!(registry.begin_wait(Some(ids[len - 1]), ids[0]).is_ok());
    }

    #[test]
    fn test_thread_waiter_never_deadlocks() {
        let registry = TaskRegistry::new();
        let a = Id::next();

        assert!(registry.begin_wait(None, a).is_ok());
        assert!(registry.begin_wait(None, a).is_ok());
        registry.end_wait(None, a);
    }

    #[test]
    fn test_concurrent_waits_keep_every_edge() {
        let registry = TaskRegistry::new();
        let (a, b, c) = (Id::next(), Id::next(), Id::next());

        // `a` awaits the destroy of both `b` and `c`.
        assert!(registry.begin_wait(Some(a), b).is_ok());
        assert!(registry.begin_wait(Some(a), c).is_ok());

        // Either one waiting back on `a` closes a cycle.
        assert!(matches!(
            registry.begin_wait(Some(b), a),
            Err(Error::Deadlock(_))
        ));
        assert!(matches!(
            registry.begin_wait(Some(c), a),
            Err(Error::Deadlock(_))
        ));

        // Finishing the wait on `b` keeps the edge to `c`.
        registry.end_wait(Some(a), b);
        assert!(registry.begin_wait(Some(b), a).is_ok());
        assert!(matches!(
            registry.begin_wait(Some(c), a),
            Err(Error::Deadlock(_))
        ));
    }

    #[test]
    fn test_cycle_through_a_branch() {
        let registry = TaskRegistry::new();
        let (a, b, c, d) = (Id::next(), Id::next(), Id::next(), Id::next());

        // a -> b, b -> c, b -> d
        assert!(registry.begin_wait(Some(a), b).is_ok());
        assert!(registry.begin_wait(Some(b), c).is_ok());
        assert!(registry.begin_wait(Some(b), d).is_ok());

        assert!(matches!(
            registry.begin_wait(Some(d), a),
            Err(Error::Deadlock(_))
        ));
    }

    #[test]
    fn test_close_empty_registry() -> anyhow::Result<()> {
        let registry = TaskRegistry::new();
        assert!(!registry.is_closed());

        registry.close()?;
        assert!(registry.is_closed());

        // Idempotent.
        registry.close()?;
        Ok(())
    }
}
