use crate::error::{Error, Result};
use crate::runtime::context;
use crate::runtime::{Domain, RuntimeShared};
use crate::task::core::TaskCore;
use crate::task::{Id, State};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: Id,
    pub name: String,
    pub state: State,
    /// Name of the owning domain.
    pub domain: String,
    /// The body panicked instead of returning.
    pub panicked: bool,
}

/// Owner handle of a task.
///
/// A task starts running as soon as it is created and runs its body exactly
/// once. The owner must call [`Task::destroy`] (or await
/// [`Task::destroy_async`]) which waits for the body to finish and releases
/// the task. Dropping the handle instead leaks the task: it stays registered
/// and the runtime refuses to shut down.
pub struct Task {
    core: Arc<TaskCore>,
    runtime: Arc<RuntimeShared>,
    destroyed: bool,
}

impl Task {
    /// Creates a task running `body` in `domain` and admits it to the
    /// domain's ready queue.
    ///
    /// Fails with [`Error::InvalidDomain`] if the domain is closed and with
    /// [`Error::RuntimeShutdown`] if its runtime is shut down.
    pub fn create<F>(domain: &Domain, name: impl Into<String>, body: F) -> Result<Task>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let runtime = Arc::clone(&domain.runtime);
        runtime.ensure_running()?;

        let core = Arc::new(TaskCore::new(
            Id::next(),
            name.into(),
            Arc::clone(&domain.shared),
            Box::pin(body),
        ));

        // Registered before taking a domain slot: once the registry is closed
        // no new slot can be taken, so shutdown never finds a busy domain.
        runtime.registry.insert(Arc::clone(&core))?;
        if let Err(e) = domain.shared.reserve() {
            // Never admitted: terminate it so `wait_for_termination` does not
            // wait on it forever.
            core.complete(false).into_iter().for_each(Waker::wake);
            runtime.registry.remove(&core.id);
            return Err(e);
        }

        core.transition_to_ready();
        domain.shared.admit(Arc::clone(&core));

        tracing::debug!(task = %core.id, name = %core.name, domain = %domain.name(), "task created");

        Ok(Task {
            core,
            runtime,
            destroyed: false,
        })
    }

    /// Same as [`Task::create`] for a body without suspension points.
    pub fn create_fn<F>(domain: &Domain, name: impl Into<String>, f: F) -> Result<Task>
    where
        F: FnOnce() + Send + 'static,
    {
        Task::create(domain, name, async move { f() })
    }

    /// Blocks the calling thread until the task is terminated, then releases
    /// it. Returns immediately if it already is.
    ///
    /// Fails with [`Error::DoubleDestroy`] if the task was already destroyed
    /// and with [`Error::Deadlock`] if the wait could never complete, e.g. a
    /// task destroying itself.
    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::DoubleDestroy(self.core.id));
        }

        let waiter = context::current_task_id();

        // Blocking the only context of the target's domain means the target
        // can never run again.
        if context::current_domain() == Some(self.core.domain.id)
            && self.core.domain.workers.len() == 1
            && !self.core.is_terminated()
        {
            return Err(Error::Deadlock(format!(
                "destroying task {} blocks the only execution context of domain `{}`",
                self.core.id, self.core.domain.name
            )));
        }

        self.runtime.registry.begin_wait(waiter, self.core.id)?;
        self.core.wait_terminated();
        self.runtime.registry.end_wait(waiter, self.core.id);

        self.release()
    }

    /// Awaitable variant of [`Task::destroy`] for use inside a task body: the
    /// calling task is suspended instead of its execution context.
    pub fn destroy_async(&mut self) -> Destroy<'_> {
        Destroy {
            task: self,
            waiter: None,
            registered: false,
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.runtime.registry.remove(&self.core.id).is_none() {
            return Err(Error::DoubleDestroy(self.core.id));
        }

        self.destroyed = true;
        tracing::debug!(task = %self.core.id, name = %self.core.name, "task destroyed");
        Ok(())
    }

    pub fn id(&self) -> Id {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> State {
        self.core.state()
    }

    pub fn is_terminated(&self) -> bool {
        self.core.is_terminated()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// True once terminated if the body panicked.
    pub fn panicked(&self) -> bool {
        self.core.panicked()
    }

    /// The domain this task was created in.
    pub fn domain(&self) -> Domain {
        Domain {
            shared: Arc::clone(&self.core.domain),
            runtime: Arc::clone(&self.runtime),
        }
    }

    pub fn info(&self) -> TaskInfo {
        self.core.info()
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if !self.destroyed && self.runtime.registry.contains(&self.core.id) {
            tracing::warn!(
                task = %self.core.id,
                name = %self.core.name,
                "task handle dropped without destroy, the task is leaked"
            );
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

/// Future returned by [`Task::destroy_async`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Destroy<'a> {
    task: &'a mut Task,

    /// The awaiting task, recorded for deadlock detection.
    waiter: Option<Id>,

    registered: bool,
}

impl Future for Destroy<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if !this.registered {
            if this.task.destroyed {
                return Poll::Ready(Err(Error::DoubleDestroy(this.task.core.id)));
            }

            this.waiter = context::current_task_id();
            if let Err(e) = this.task.runtime.registry.begin_wait(this.waiter, this.task.core.id) {
                return Poll::Ready(Err(e));
            }
            this.registered = true;
        }

        if !this.task.core.poll_terminated(cx.waker()) {
            return Poll::Pending;
        }

        this.task.runtime.registry.end_wait(this.waiter, this.task.core.id);
        this.registered = false;

        Poll::Ready(this.task.release())
    }
}

impl Drop for Destroy<'_> {
    fn drop(&mut self) {
        if self.registered {
            self.task.runtime.registry.end_wait(self.waiter, self.task.core.id);
        }
    }
}

impl fmt::Debug for Destroy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destroy")
            .field("task", &self.task.core.id)
            .field("registered", &self.registered)
            .finish()
    }
}
