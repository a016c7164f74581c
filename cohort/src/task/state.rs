use std::fmt;
use std::task::Waker;

/// Lifecycle state of a task.
///
/// ```text
/// Created -> Ready -> Running -> Terminated
///              ^         |
///              |         v
///              +---- Blocked
/// ```
///
/// A task that yields goes straight from `Running` back to `Ready` and
/// re-enters its domain's queue at the tail. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Allocated but not yet admitted to the ready queue.
    Created,
    /// Waiting in the ready queue for a context.
    Ready,
    /// Being polled by an execution context.
    Running,
    /// Suspended until something wakes it up.
    Blocked,
    /// The body returned (or panicked). Nothing leaves this state.
    Terminated,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Terminated)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Created => "created",
            State::Ready => "ready",
            State::Running => "running",
            State::Blocked => "blocked",
            State::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Outcome of a wakeup, tells the waker whether it must admit the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToNotified {
    /// Task was blocked and is now ready, the caller must admit it.
    Submit,
    /// Task is running, it will be re-admitted when the poll returns.
    DoNothing,
}

/// Outcome of a poll that returned `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToIdle {
    /// Woken while running (e.g. `yield_now`), re-admit at the queue tail.
    Requeue,
    /// Parked until a waker fires.
    Blocked,
}

/// Mutable lifecycle bookkeeping, always accessed under the task lock.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: State,

    /// Set when a wakeup happens during a poll.
    notified: bool,

    /// Body panicked instead of returning.
    panicked: bool,

    /// Tasks suspended in `destroy_async` waiting for us to terminate.
    join_wakers: Vec<Waker>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Created,
            notified: false,
            panicked: false,
            join_wakers: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> State {
        self.state
    }

    pub(crate) fn panicked(&self) -> bool {
        self.panicked
    }

    #[track_caller]
    pub(crate) fn transition_to_ready(&mut self) {
        debug_assert_eq!(self.state, State::Created, "task admitted twice");
        self.state = State::Ready;
    }

    /// Returns false if the task cannot run, which only happens if it is
    /// already terminated.
    pub(crate) fn transition_to_running(&mut self) -> bool {
        match self.state {
            State::Ready => {
                self.state = State::Running;
                self.notified = false;
                true
            }
            State::Terminated => false,
            other => {
                debug_assert!(false, "dispatched a task in state {other}");
                false
            }
        }
    }

    pub(crate) fn transition_to_idle(&mut self) -> TransitionToIdle {
        debug_assert_eq!(self.state, State::Running);

        if std::mem::take(&mut self.notified) {
            self.state = State::Ready;
            TransitionToIdle::Requeue
        } else {
            self.state = State::Blocked;
            TransitionToIdle::Blocked
        }
    }

    pub(crate) fn transition_to_notified(&mut self) -> TransitionToNotified {
        match self.state {
            State::Blocked => {
                self.state = State::Ready;
                TransitionToNotified::Submit
            }
            State::Running => {
                self.notified = true;
                TransitionToNotified::DoNothing
            }
            // Already queued, not yet admitted, or done.
            State::Created | State::Ready | State::Terminated => TransitionToNotified::DoNothing,
        }
    }

    /// Moves to `Terminated` and hands back the wakers of every task joining
    /// on us so they can be woken outside the lock.
    pub(crate) fn transition_to_terminated(&mut self, panicked: bool) -> Vec<Waker> {
        debug_assert_ne!(self.state, State::Terminated, "task terminated twice");
        self.state = State::Terminated;
        self.panicked = panicked;
        std::mem::take(&mut self.join_wakers)
    }

    pub(crate) fn register_join_waker(&mut self, waker: &Waker) {
        if !self.join_wakers.iter().any(|w| w.will_wake(waker)) {
            self.join_wakers.push(waker.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::task::Wake;

    struct NoopWaker;

    impl Wake for NoopWaker {
        fn wake(self: Arc<Self>) {}
    }

    fn running() -> Lifecycle {
        let mut lc = Lifecycle::new();
        lc.transition_to_ready();
        assert!(lc.transition_to_running());
        lc
    }

    #[test]
    fn test_full_lifecycle() {
        let mut lc = running();
        assert_eq!(lc.transition_to_idle(), TransitionToIdle::Blocked);
        assert_eq!(lc.state(), State::Blocked);

        assert_eq!(lc.transition_to_notified(), TransitionToNotified::Submit);
        assert_eq!(lc.state(), State::Ready);

        assert!(lc.transition_to_running());
        let wakers = lc.transition_to_terminated(false);
        assert!(wakers.is_empty());
        assert!(lc.state().is_terminal());
        assert!(!lc.panicked());
    }

    #[test]
    fn test_wakeup_while_running_requeues() {
        let mut lc = running();
        assert_eq!(lc.transition_to_notified(), TransitionToNotified::DoNothing);
        assert_eq!(lc.transition_to_idle(), TransitionToIdle::Requeue);
        assert_eq!(lc.state(), State::Ready);
    }

    #[rstest]
    #[case::ready(State::Ready)]
    #[case::terminated(State::Terminated)]
    fn test_wakeup_is_noop(#[case] state: State) {
        let mut lc = running();
        match state {
            State::Ready => {
                lc.transition_to_notified();
                lc.transition_to_idle();
            }
            State::Terminated => {
                lc.transition_to_terminated(false);
            }
            _ => unreachable!(),
        }

        assert_eq!(lc.state(), state);
        assert_eq!(lc.transition_to_notified(), TransitionToNotified::DoNothing);
        assert_eq!(lc.state(), state);
    }

    #[test]
    fn test_terminated_cannot_run() {
        let mut lc = running();
        lc.transition_to_terminated(true);
        assert!(lc.panicked());
        assert!(!lc.transition_to_running());
    }

    #[test]
    fn test_join_wakers_deduplicated() {
        let waker = std::task::Waker::from(Arc::new(NoopWaker));
        let other = std::task::Waker::from(Arc::new(NoopWaker));

        let mut lc = running();
        lc.register_join_waker(&waker);
        lc.register_join_waker(&waker.clone());
        lc.register_join_waker(&other);

        assert_eq!(lc.transition_to_terminated(false).len(), 2);
    }
}
