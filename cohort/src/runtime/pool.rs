use crate::error::Result;
use crate::runtime::RuntimeConfig;
use crate::runtime::domain::DomainShared;
use crate::runtime::worker::Worker;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

/// The OS threads backing the execution contexts of one domain.
#[derive(Debug, Default)]
pub(crate) struct ThreadPool {
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Spawns one thread per worker of `domain` and waits until every thread
    /// has entered its event loop.
    ///
    /// If a spawn fails the threads already started are shut down and joined
    /// before the error is returned.
    pub(crate) fn spawn_all(&self, domain: &Arc<DomainShared>, cfg: &RuntimeConfig) -> Result<()> {
        let (started_tx, started_rx) = mpsc::channel();
        let mut handles = self.handles.lock();

        for worker in domain.workers.iter() {
            let res = spawn_worker_thread(
                Arc::clone(domain),
                Arc::clone(worker),
                cfg,
                started_tx.clone(),
            );

            match res {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    domain.shared.initiate_shutdown();
                    handles.drain(..).for_each(|h| {
                        _ = h.join();
                    });
                    return Err(e.into());
                }
            }
        }

        // Spawning threads is async, wait for all threads to be started...
        drop(started_tx);
        for _ in 0..handles.len() {
            if started_rx.recv().is_err() {
                break;
            }
        }

        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub(crate) fn join_all(&self) -> anyhow::Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock());

        let errors = handles
            .into_iter()
            .filter_map(|handle| {
                let name = handle.thread().name().map(str::to_string);
                handle.join().err().map(|_| name)
            })
            .collect::<Vec<_>>();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} thread(s) panicked: {:?}", errors.len(), errors))
        }
    }
}

fn spawn_worker_thread(
    domain: Arc<DomainShared>,
    worker: Arc<Worker>,
    cfg: &RuntimeConfig,
    started: mpsc::Sender<()>,
) -> std::io::Result<thread::JoinHandle<()>> {
    let name = (cfg.thread_name.0)(&domain.name, worker.id().as_usize());
    worker.set_thread_name(name.clone());

    let mut builder = thread::Builder::new().name(name);

    if let Some(stack_size) = cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder.spawn(move || {
        _ = started.send(());
        drop(started);

        if let Err(e) = worker.event_loop(&domain) {
            tracing::error!(domain = %domain.name, context = %worker.id(), error = %e, "execution context failed");
            debug_assert!(false, "execution context failed: {e}");
        }
    })
}
