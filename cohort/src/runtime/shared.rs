use crossbeam_deque::Injector;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

/// A parked execution context and the flag it spins on to filter out
/// spurious wakeups.
#[derive(Debug)]
struct ParkedThread {
    thread: Thread,
    should_unpark: Arc<AtomicBool>,
}

/// Coordination state shared between the execution contexts of one domain.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) shutdown: AtomicBool,

    /// LIFO collection of parked threads. We unpark in LIFO order as the
    /// latest parked thread is the one where CPU cache will be the hottest.
    parked_threads: RwLock<VecDeque<ParkedThread>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Parks the current thread until new work is admitted or the domain
    /// shuts down.
    pub(crate) fn park_current_thread<T>(&self, injector: &Injector<T>) {
        let should_unpark = {
            let mut parked_threads = self.parked_threads.write();

            // Checked *while holding the lock*: producers push before taking
            // the lock to unpark, so we either see their task here or they
            // see us in the parked list.
            if !injector.is_empty() || self.is_shutdown() {
                return;
            }

            let should_unpark = Arc::new(AtomicBool::new(false));
            parked_threads.push_back(ParkedThread {
                thread: thread::current(),
                should_unpark: Arc::clone(&should_unpark),
            });
            should_unpark
        };

        // Loop to account for spurious wakeups as per docs.
        while !should_unpark.load(Ordering::Acquire) {
            thread::park();
        }
    }

    pub(crate) fn unpark_one_thread(&self) -> bool {
        if let Some(parked) = self.parked_threads.write().pop_back() {
            parked.should_unpark.store(true, Ordering::Release);
            parked.thread.unpark();
            true
        } else {
            false
        }
    }

    pub(crate) fn unpark_all_threads(&self) -> usize {
        let mut num_unparked = 0;
        let mut parked_threads = self.parked_threads.write();

        while let Some(parked) = parked_threads.pop_back() {
            num_unparked += 1;
            parked.should_unpark.store(true, Ordering::Release);
            parked.thread.unpark();
        }

        num_unparked
    }

    /// Flags shutdown then wakes every parked context so it can observe it.
    pub(crate) fn initiate_shutdown(&self) {
        {
            // Take the lock so no context can slip between its shutdown check
            // and pushing itself in the parked list.
            let _parked_threads = self.parked_threads.write();
            self.shutdown.store(true, Ordering::Release);
        }

        self.unpark_all_threads();
    }
}

// Test-only helpers
#[cfg(test)]
impl Shared {
    pub(crate) fn num_parked(&self) -> usize {
        self.parked_threads.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::wait_until;
    use static_assertions::assert_impl_all;
    use std::time::Duration;

    assert_impl_all!(Shared: Send, Sync);

    #[test]
    fn test_park_returns_when_work_is_pending() {
        let shared = Shared::new();
        let injector = Injector::new();
        injector.push(1);

        // Must not block.
        shared.park_current_thread(&injector);
        assert_eq!(shared.num_parked(), 0);
    }

    #[test]
    fn test_unpark_one_thread() {
        let shared = Arc::new(Shared::new());
        let injector = Arc::new(Injector::<u32>::new());

        let handle = {
            let shared = Arc::clone(&shared);
            let injector = Arc::clone(&injector);
            thread::spawn(move || shared.park_current_thread(&injector))
        };

        assert!(wait_until(Duration::from_secs(5), || shared.num_parked() == 1));
        assert!(shared.unpark_one_thread());
        handle.join().unwrap();

        assert!(!shared.unpark_one_thread());
    }

    #[test]
    fn test_shutdown_unparks_everyone() {
        let shared = Arc::new(Shared::new());
        let injector = Arc::new(Injector::<u32>::new());

        let handles = (0..3)
            .map(|_| {
                let shared = Arc::clone(&shared);
                let injector = Arc::clone(&injector);
                thread::spawn(move || shared.park_current_thread(&injector))
            })
            .collect::<Vec<_>>();

        assert!(wait_until(Duration::from_secs(5), || shared.num_parked() == 3));
        shared.initiate_shutdown();

        handles.into_iter().for_each(|h| h.join().unwrap());
        assert!(shared.is_shutdown());

        // Parking after shutdown is a no-op.
        shared.park_current_thread(&injector);
    }
}
