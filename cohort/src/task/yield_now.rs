use crate::runtime::context;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Future returned by [`yield_now`].
#[derive(Debug, Clone, Copy)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct YieldNow {
    awaiting_first_poll: bool,
}

impl YieldNow {
    fn new() -> Self {
        Self {
            awaiting_first_poll: true,
        }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // Only yield on first poll. Next time the task is dispatched we return.
        if self.awaiting_first_poll {
            self.awaiting_first_poll = false;

            // Waking a running task flags it, the context re-admits it at the
            // tail of the ready queue once this poll returns.
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Suspends the current task and puts it back at the tail of its domain's
/// ready queue, letting every task that was ready before it run first.
pub fn yield_now() -> YieldNow {
    YieldNow::new()
}

/// Yields if the current task has used up the preemption quantum of its
/// domain, otherwise completes immediately.
///
/// Long-running bodies in a preemptive domain call this periodically. It
/// never yields in a domain without a quantum or outside a task.
pub async fn preempt_point() {
    if context::should_preempt() {
        context::mark_preempted();
        yield_now().await;
    }
}
