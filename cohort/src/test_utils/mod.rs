use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

/// Installs a `tracing` subscriber writing to the test harness output. Set
/// `RUST_LOG` to see runtime events.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Polls `cond` until it holds or `timeout` expires. Returns the last value
/// of `cond`.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }

    cond()
}

/// A one-shot latch. Task bodies block their execution context on `wait`
/// until the test calls `open`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.inner.0.lock()
    }

    pub(crate) fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock();
        while !*open {
            cvar.wait(&mut open);
        }
    }
}

/// Shared, ordered log of events emitted by task bodies.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}
