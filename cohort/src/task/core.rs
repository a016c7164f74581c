use crate::runtime::domain::DomainShared;
use crate::task::{Id, TaskInfo};
use crate::task::state::{Lifecycle, State, TransitionToIdle, TransitionToNotified};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Result of polling a task body once.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    Pending,
    Complete,
    Panicked(String),
}

/// Shared state of a task. Referenced by the owner's [`Task`] handle, the
/// runtime registry, the domain ready queue while queued, and every waker
/// created while polling it.
///
/// [`Task`]: crate::task::Task
pub(crate) struct TaskCore {
    pub(crate) id: Id,

    pub(crate) name: String,

    pub(crate) domain: Arc<DomainShared>,

    lifecycle: Mutex<Lifecycle>,

    /// Signalled once the task reaches `Terminated`.
    terminated: Condvar,

    /// The body. Only the context currently running the task locks this, so
    /// it is never contended. It is dropped as soon as the body completes.
    future: Mutex<Option<BoxFuture>>,
}

impl TaskCore {
    pub(crate) fn new(id: Id, name: String, domain: Arc<DomainShared>, future: BoxFuture) -> Self {
        Self {
            id,
            name,
            domain,
            lifecycle: Mutex::new(Lifecycle::new()),
            terminated: Condvar::new(),
            future: Mutex::new(Some(future)),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.lifecycle.lock().state()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn panicked(&self) -> bool {
        self.lifecycle.lock().panicked()
    }

    pub(crate) fn info(&self) -> TaskInfo {
        let lifecycle = self.lifecycle.lock();
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            state: lifecycle.state(),
            domain: self.domain.name.clone(),
            panicked: lifecycle.panicked(),
        }
    }

    pub(crate) fn transition_to_ready(&self) {
        self.lifecycle.lock().transition_to_ready();
    }

    pub(crate) fn transition_to_running(&self) -> bool {
        self.lifecycle.lock().transition_to_running()
    }

    pub(crate) fn transition_to_idle(&self) -> TransitionToIdle {
        self.lifecycle.lock().transition_to_idle()
    }

    /// Polls the body once, catching panics so a faulty body can never take
    /// its execution context down with it.
    pub(crate) fn poll(self: &Arc<Self>) -> PollOutcome {
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            debug_assert!(false, "polled task {} without a body", self.id);
            return PollOutcome::Complete;
        };

        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

        let outcome = match res {
            Ok(Poll::Pending) => return PollOutcome::Pending,
            Ok(Poll::Ready(())) => PollOutcome::Complete,
            Err(payload) => PollOutcome::Panicked(panic_payload_as_str(&*payload).to_string()),
        };

        // Dropping the body may run arbitrary destructors, keep those from
        // unwinding into the worker as well.
        let body = slot.take();
        drop(slot);
        _ = panic::catch_unwind(panic::AssertUnwindSafe(move || drop(body)));

        outcome
    }

    /// Publishes `Terminated` and releases blocked joiners. Must be called
    /// with the owning domain's lock held so that closing the domain observes
    /// the termination atomically with the decrement of its active count.
    ///
    /// Returns the wakers of async joiners; the caller wakes them once the
    /// domain lock is released.
    #[must_use]
    pub(crate) fn complete(&self, panicked: bool) -> Vec<Waker> {
        let mut lifecycle = self.lifecycle.lock();
        let wakers = lifecycle.transition_to_terminated(panicked);
        self.terminated.notify_all();
        wakers
    }

    /// Blocks the calling thread until the task is terminated.
    pub(crate) fn wait_terminated(&self) {
        let mut lifecycle = self.lifecycle.lock();
        while !lifecycle.state().is_terminal() {
            self.terminated.wait(&mut lifecycle);
        }
    }

    /// Returns true if already terminated, otherwise registers `waker` to be
    /// woken on termination.
    pub(crate) fn poll_terminated(&self, waker: &Waker) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state().is_terminal() {
            true
        } else {
            lifecycle.register_join_waker(waker);
            false
        }
    }

    pub(crate) fn wake_by_ref(self: &Arc<Self>) {
        let transition = self.lifecycle.lock().transition_to_notified();

        if transition == TransitionToNotified::Submit {
            self.domain.admit(Arc::clone(self));
        }
    }
}

impl std::task::Wake for TaskCore {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        TaskCore::wake_by_ref(self);
    }
}

impl fmt::Debug for TaskCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("domain", &self.domain.name)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_payload_as_str(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(TaskCore: Send, Sync);

    #[test]
    fn test_panic_payload_as_str() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_payload_as_str(&*payload), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_payload_as_str(&*payload), "kaboom");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_payload_as_str(&*payload), "unknown panic payload");
    }
}
