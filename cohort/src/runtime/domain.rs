use crate::error::{Error, Result};
use crate::runtime::context;
use crate::runtime::pool::ThreadPool;
use crate::runtime::runtime::{RuntimeConfig, RuntimeShared};
use crate::runtime::shared::Shared;
use crate::runtime::stats::{DomainStats, DomainStatsSnapshot};
use crate::runtime::worker::{ContextId, ContextInfo, Worker};
use crate::runtime::Runtime;
use crate::task::core::TaskCore;
use crate::task::TaskInfo;
use crossbeam_deque::Injector;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;
use std::time::Duration;

/// Uniquely identifies a scheduling domain among all domains opened in this
/// process. Never reused.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct DomainId(NonZeroU64);

impl DomainId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => panic!("failed to generate unique domain ID: bitspace exhausted"),
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-domain settings, resolved from a [`DomainBuilder`] and the runtime
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DomainConfig {
    pub(crate) contexts: usize,
    pub(crate) preemption: Option<Duration>,
}

/// Point-in-time view of a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    pub id: DomainId,
    pub name: String,
    pub contexts: usize,
    pub active_tasks: usize,
    pub open: bool,
    pub preemption: Option<Duration>,
}

#[derive(Debug)]
struct DomainState {
    open: bool,

    /// Tasks created in this domain that are not yet terminated.
    active: usize,
}

/// State shared by a domain's handles, its execution contexts and every task
/// created in it.
pub(crate) struct DomainShared {
    pub(crate) id: DomainId,

    pub(crate) name: String,

    pub(crate) cfg: DomainConfig,

    /// FIFO ready queue.
    pub(crate) injector: Injector<Arc<TaskCore>>,

    pub(crate) shared: Shared,

    pub(crate) stats: DomainStats,

    pub(crate) workers: Vec<Arc<Worker>>,

    /// Lock ordering: always taken before any task lifecycle lock.
    state: Mutex<DomainState>,

    pool: ThreadPool,
}

impl DomainShared {
    fn new(name: String, cfg: DomainConfig, runtime_cfg: &RuntimeConfig) -> Result<Self> {
        let id = DomainId::next();

        let workers = (0..cfg.contexts)
            .map(|i| {
                let worker = Arc::new(Worker::new(ContextId(i), runtime_cfg.max_steal_retries));
                worker.bind(id).map(|_| worker)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            name,
            cfg,
            injector: Injector::new(),
            shared: Shared::new(),
            stats: DomainStats::default(),
            workers,
            state: Mutex::new(DomainState {
                open: true,
                active: 0,
            }),
            pool: ThreadPool::new(),
        })
    }

    /// Creates the domain and starts its execution contexts.
    pub(crate) fn start(
        name: String,
        cfg: DomainConfig,
        runtime_cfg: &RuntimeConfig,
    ) -> Result<Arc<Self>> {
        if cfg.contexts == 0 {
            return Err(Error::InvalidConfig(format!(
                "domain `{name}` needs at least one execution context"
            )));
        }

        let domain = Arc::new(Self::new(name, cfg, runtime_cfg)?);
        domain.pool.spawn_all(&domain, runtime_cfg)?;

        tracing::info!(
            domain = %domain.name,
            id = %domain.id,
            contexts = cfg.contexts,
            preemption = ?cfg.preemption,
            "domain opened"
        );

        Ok(domain)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().open
    }

    pub(crate) fn active_tasks(&self) -> usize {
        self.state.lock().active
    }

    /// Reserves a slot for a new task. Fails if the domain is closed.
    pub(crate) fn reserve(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::InvalidDomain(self.name.clone()));
        }

        state.active += 1;
        Ok(())
    }

    /// Pushes `task` at the tail of the ready queue and wakes an idle
    /// context.
    pub(crate) fn admit(&self, task: Arc<TaskCore>) {
        debug_assert_eq!(task.domain.id, self.id, "task admitted to a foreign domain");

        self.injector.push(task);
        self.stats.record_admit();
        self.shared.unpark_one_thread();
    }

    /// Marks `task` terminated and releases its slot, atomically with
    /// respect to `close`.
    pub(crate) fn task_terminated(&self, task: &TaskCore, panicked: bool) {
        let wakers = {
            let mut state = self.state.lock();
            debug_assert!(state.active > 0);
            state.active -= 1;
            task.complete(panicked)
        };

        self.stats.record_completion(panicked);
        wakers.into_iter().for_each(Waker::wake);
    }

    /// Stops accepting tasks, then stops and joins every execution context.
    pub(crate) fn close(&self) -> Result<()> {
        if let Some(worker) = context::current_worker()
            && worker.domain == self.id
        {
            return Err(Error::Deadlock(format!(
                "domain `{}` cannot be closed from its own execution context {}",
                self.name, worker.context
            )));
        }

        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(Error::InvalidDomain(self.name.clone()));
            }

            if state.active > 0 {
                return Err(Error::DomainBusy {
                    name: self.name.clone(),
                    active: state.active,
                });
            }

            state.open = false;
        }

        self.shared.initiate_shutdown();
        self.pool.join_all()?;

        tracing::info!(domain = %self.name, id = %self.id, "domain closed");
        Ok(())
    }

    pub(crate) fn contexts(&self) -> Vec<ContextInfo> {
        self.workers
            .iter()
            .map(|w| w.info(self.cfg.preemption))
            .collect()
    }

    pub(crate) fn info(&self) -> DomainInfo {
        let state = self.state.lock();
        DomainInfo {
            id: self.id,
            name: self.name.clone(),
            contexts: self.workers.len(),
            active_tasks: state.active,
            open: state.open,
            preemption: self.cfg.preemption,
        }
    }
}

// Test-only helpers
#[cfg(test)]
impl DomainShared {
    /// Gives back a slot obtained from `reserve` for a task that was never
    /// admitted.
    pub(crate) fn unreserve(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.active > 0);
        state.active -= 1;
    }
}

impl fmt::Debug for DomainShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainShared")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cfg", &self.cfg)
            .field("threads", &self.pool.len())
            .finish_non_exhaustive()
    }
}

/// A scheduling domain: a fixed set of execution contexts sharing one FIFO
/// ready queue. Tasks are created inside a domain and never leave it.
///
/// Handles are cheap to clone; every clone refers to the same domain.
#[derive(Clone)]
pub struct Domain {
    pub(crate) shared: Arc<DomainShared>,
    pub(crate) runtime: Arc<RuntimeShared>,
}

impl Domain {
    /// Opens a domain named `name` backed by `contexts` execution contexts.
    ///
    /// Fails with [`Error::InvalidConfig`] if `contexts` is zero or another
    /// open domain of `runtime` already uses `name`.
    pub fn open(runtime: &Runtime, name: impl Into<String>, contexts: usize) -> Result<Domain> {
        runtime.domain_builder(name).contexts(contexts).open()
    }

    /// Closes the domain and joins its execution contexts.
    ///
    /// Fails with [`Error::DomainBusy`] while any task of the domain is not
    /// terminated, and with [`Error::InvalidDomain`] if the domain is already
    /// closed.
    pub fn close(&self) -> Result<()> {
        self.runtime.close_domain(&self.shared)
    }

    pub fn id(&self) -> DomainId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn num_contexts(&self) -> usize {
        self.shared.workers.len()
    }

    pub fn preemption(&self) -> Option<Duration> {
        self.shared.cfg.preemption
    }

    pub fn active_tasks(&self) -> usize {
        self.shared.active_tasks()
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Undestroyed tasks created in this domain.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.runtime.registry.snapshot(Some(self.shared.id))
    }

    pub fn contexts(&self) -> Vec<ContextInfo> {
        self.shared.contexts()
    }

    pub fn stats(&self) -> DomainStatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn info(&self) -> DomainInfo {
        self.shared.info()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .finish()
    }
}

impl PartialEq for Domain {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for Domain {}

/// Configures and opens a [`Domain`]. Obtained from
/// [`Runtime::domain_builder`].
#[derive(Debug)]
#[must_use = "a DomainBuilder does nothing until `open` is called"]
pub struct DomainBuilder {
    runtime: Arc<RuntimeShared>,
    name: String,
    contexts: Option<usize>,
    preemption: Option<Duration>,
}

impl DomainBuilder {
    pub(crate) fn new(runtime: Arc<RuntimeShared>, name: String) -> Self {
        let preemption = runtime.cfg.default_preemption;
        Self {
            runtime,
            name,
            contexts: None,
            preemption,
        }
    }

    /// Number of execution contexts. Defaults to the runtime's
    /// `default_contexts`.
    pub fn contexts(mut self, val: usize) -> Self {
        self.contexts = Some(val);
        self
    }

    /// Preemption quantum: a task that reaches [`preempt_point`] after
    /// running for at least `quantum` in its current slice yields.
    ///
    /// [`preempt_point`]: crate::task::preempt_point
    #[track_caller]
    pub fn preemption(mut self, quantum: Duration) -> Self {
        assert!(!quantum.is_zero(), "preemption quantum must be greater than 0");
        self.preemption = Some(quantum);
        self
    }

    /// Disables preemption for this domain, overriding the runtime default.
    pub fn no_preemption(mut self) -> Self {
        self.preemption = None;
        self
    }

    pub fn open(self) -> Result<Domain> {
        let cfg = DomainConfig {
            contexts: self.contexts.unwrap_or(self.runtime.cfg.default_contexts),
            preemption: self.preemption,
        };

        self.runtime.open_domain(self.name, cfg)
    }
}
