use crate::error::{Error, Result};
use crate::runtime::context;
use crate::runtime::domain::{Domain, DomainBuilder, DomainConfig, DomainInfo, DomainShared};
use crate::runtime::registry::TaskRegistry;
use crate::task::TaskInfo;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Maximum number of attempts at popping a contended ready queue.
const MAX_STEAL_RETRIES: usize = 3;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn(&str, usize) -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    ThreadNameFn(Arc::new(|domain, context| format!("cohort-{domain}-{context}")))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Print a placeholder since the closure itself isn't printable.
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

#[derive(Debug)]
pub struct Builder {
    /// Execution contexts of a domain opened without an explicit count.
    /// Defaults to 1 per CPU core.
    default_contexts: Option<usize>,

    /// Preemption quantum of a domain opened without an explicit one.
    default_preemption: Option<Duration>,

    /// Name fn used for execution context threads.
    thread_name: ThreadNameFn,

    /// Stack size used for execution context threads.
    thread_stack_size: Option<usize>,

    /// How many times an execution context retries popping its ready queue
    /// when it is contended, before considering it empty.
    max_steal_retries: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            default_contexts: None,
            default_preemption: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            max_steal_retries: MAX_STEAL_RETRIES,
        }
    }

    /// Number of execution contexts for domains opened through a
    /// [`DomainBuilder`] that does not set its own.
    #[track_caller]
    pub fn default_contexts(mut self, val: usize) -> Self {
        assert!(val > 0, "default_contexts must be greater than 0");
        self.default_contexts = Some(val);
        self
    }

    /// Preemption quantum for domains that do not set their own. By default
    /// domains are not preemptive.
    #[track_caller]
    pub fn default_preemption(mut self, quantum: Duration) -> Self {
        assert!(!quantum.is_zero(), "default_preemption must be greater than 0");
        self.default_preemption = Some(quantum);
        self
    }

    /// Sets a function used to generate the name of execution context
    /// threads from the domain name and the context index.
    ///
    /// The default name is "cohort-{domain}-{index}". Thread names are
    /// truncated beyond 15 bytes according to pthread limitations.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize) -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for execution context threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies minimal stack size.
    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(val > 0, "thread_stack_size must be greater than 0");
        self.thread_stack_size = Some(val);
        self
    }

    #[track_caller]
    pub fn max_steal_retries(mut self, val: usize) -> Self {
        assert!(val > 0, "max_steal_retries must be greater than 0");
        self.max_steal_retries = val;
        self
    }

    /// Creates the configured `Runtime`. No domain is open yet.
    pub fn try_build(self) -> Result<Runtime> {
        let cfg = RuntimeConfig::try_from(self)?;
        Ok(Runtime::from_config(cfg))
    }
}

// Export runtime builder as a RuntimeConfig object consumed by every domain
// and execution context.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub(crate) default_contexts: usize,
    pub(crate) default_preemption: Option<Duration>,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) max_steal_retries: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            default_contexts: 1,
            default_preemption: None,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            max_steal_retries: MAX_STEAL_RETRIES,
        }
    }
}

impl TryFrom<Builder> for RuntimeConfig {
    type Error = Error;

    fn try_from(builder: Builder) -> Result<Self> {
        let default_contexts = match builder.default_contexts {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        Ok(RuntimeConfig {
            default_contexts,
            default_preemption: builder.default_preemption,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            max_steal_retries: builder.max_steal_retries,
        })
    }
}

/// State shared by the runtime and every domain and task handle created from
/// it.
#[derive(Debug)]
pub(crate) struct RuntimeShared {
    pub(crate) cfg: RuntimeConfig,

    pub(crate) registry: TaskRegistry,

    /// Open domains, in opening order. A domain is removed once closed.
    domains: RwLock<Vec<Arc<DomainShared>>>,

    shutdown: AtomicBool,
}

impl RuntimeShared {
    fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            registry: TaskRegistry::new(),
            domains: RwLock::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.is_shutdown() {
            Err(Error::RuntimeShutdown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn open_domain(self: &Arc<Self>, name: String, cfg: DomainConfig) -> Result<Domain> {
        // Held across the start so two concurrent opens cannot both claim
        // the same name. Shutdown sets its flag under the same lock.
        let mut domains = self.domains.write();
        self.ensure_running()?;

        if domains.iter().any(|d| d.name == name) {
            return Err(Error::InvalidConfig(format!(
                "a domain named `{name}` is already open"
            )));
        }

        let shared = DomainShared::start(name, cfg, &self.cfg)?;
        domains.push(Arc::clone(&shared));

        Ok(Domain {
            shared,
            runtime: Arc::clone(self),
        })
    }

    pub(crate) fn close_domain(&self, domain: &Arc<DomainShared>) -> Result<()> {
        domain.close()?;
        self.domains.write().retain(|d| d.id != domain.id);
        Ok(())
    }

    fn find_domain(self: &Arc<Self>, name: &str) -> Option<Domain> {
        self.domains
            .read()
            .iter()
            .find(|d| d.name == name)
            .map(|d| Domain {
                shared: Arc::clone(d),
                runtime: Arc::clone(self),
            })
    }

    fn domain_infos(&self) -> Vec<DomainInfo> {
        self.domains.read().iter().map(|d| d.info()).collect()
    }

    fn wait_for_termination(&self) -> Result<()> {
        if let Some(id) = context::current_task_id() {
            return Err(Error::Deadlock(format!(
                "task {id} cannot wait for every task to terminate"
            )));
        }

        self.registry.wait_all_terminated();
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        // Held until the runtime is either shut down or left running, so no
        // domain can be opened in between.
        let mut domains = self.domains.write();
        if self.is_shutdown() {
            return Ok(());
        }

        if let Some(current) = context::current_domain()
            && domains.iter().any(|d| d.id == current)
        {
            return Err(Error::Deadlock(
                "runtime cannot be shut down from one of its execution contexts".to_string(),
            ));
        }

        // Refuses new tasks from here on, unless some are still alive.
        self.registry.close()?;

        let mut first_err = None;
        let mut still_open = Vec::new();

        for domain in domains.drain(..) {
            match domain.close() {
                // Closed through a handle in the meantime.
                Ok(()) | Err(Error::InvalidDomain(_)) => {}
                Err(e) => {
                    tracing::error!(domain = %domain.name, error = %e, "failed to close domain");
                    first_err.get_or_insert(e);
                    if domain.is_open() {
                        still_open.push(domain);
                    }
                }
            }
        }

        if let Some(e) = first_err {
            // Left running: a later shutdown retries the domains still open.
            *domains = still_open;
            self.registry.reopen();
            return Err(e);
        }

        self.shutdown.store(true, Ordering::Release);
        tracing::info!("runtime shut down");
        Ok(())
    }
}

/// Owns the task registry and every open scheduling domain.
///
/// There is no ambient runtime: domains are opened from a `Runtime` and tasks
/// are created in a domain, so every operation reaches its runtime through
/// the handle it is called on.
///
/// Dropping a `Runtime` shuts it down. Shutting down while a task was never
/// destroyed is fatal: the drop panics.
#[derive(Debug)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Creates a runtime with the default configuration.
    pub fn new() -> Result<Runtime> {
        Builder::new().try_build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    fn from_config(cfg: RuntimeConfig) -> Runtime {
        Runtime {
            shared: Arc::new(RuntimeShared::new(cfg)),
        }
    }

    /// Opens a domain with `contexts` execution contexts and the runtime's
    /// default preemption.
    pub fn open_domain(&self, name: impl Into<String>, contexts: usize) -> Result<Domain> {
        self.domain_builder(name).contexts(contexts).open()
    }

    pub fn domain_builder(&self, name: impl Into<String>) -> DomainBuilder {
        DomainBuilder::new(Arc::clone(&self.shared), name.into())
    }

    /// Open domains, in opening order.
    pub fn domains(&self) -> Vec<DomainInfo> {
        self.shared.domain_infos()
    }

    pub fn find_domain(&self, name: &str) -> Option<Domain> {
        self.shared.find_domain(name)
    }

    /// Every task created and not yet destroyed, in creation order.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.shared.registry.snapshot(None)
    }

    /// Number of tasks created and not yet destroyed.
    pub fn live_tasks(&self) -> usize {
        self.shared.registry.len()
    }

    /// Blocks the calling thread until every registered task is terminated.
    /// Terminated tasks still need to be destroyed by their owner.
    ///
    /// Fails with [`Error::Deadlock`] when called from a task body.
    pub fn wait_for_termination(&self) -> Result<()> {
        self.shared.wait_for_termination()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Closes every open domain and refuses any further domain or task.
    ///
    /// Fails with [`Error::LiveTasks`] if a task was never destroyed, in
    /// which case nothing is closed. Calling it again after a successful
    /// shutdown is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.shutdown()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shared.shutdown() {
            tracing::error!(error = %e, "runtime dropped without a clean shutdown");

            if !thread::panicking() {
                panic!("runtime dropped without a clean shutdown: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RuntimeConfig: Send, Sync, Clone);
    assert_impl_all!(Runtime: Send, Sync);

    #[test]
    fn test_default_thread_name() {
        let cfg = RuntimeConfig::default();
        assert_eq!((cfg.thread_name.0)("fred", 2), "cohort-fred-2");
    }

    #[test]
    fn test_builder_resolves_defaults() -> anyhow::Result<()> {
        let cfg = RuntimeConfig::try_from(Builder::new())?;
        assert!(cfg.default_contexts >= 1);
        assert_eq!(cfg.default_preemption, None);
        assert_eq!(cfg.max_steal_retries, MAX_STEAL_RETRIES);

        let cfg = RuntimeConfig::try_from(
            Builder::new()
                .default_contexts(3)
                .default_preemption(Duration::from_millis(5))
                .thread_name_fn(|domain, n| format!("{domain}:{n}")),
        )?;
        assert_eq!(cfg.default_contexts, 3);
        assert_eq!(cfg.default_preemption, Some(Duration::from_millis(5)));
        assert_eq!((cfg.thread_name.0)("d", 0), "d:0");
        Ok(())
    }

    #[test]
    #[should_panic(expected = "default_contexts must be greater than 0")]
    fn test_builder_rejects_zero_contexts() {
        let _ = Builder::new().default_contexts(0);
    }
}
