use anyhow::Result;
use cohort::task::State;
use cohort::{Runtime, Task};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const NUM_CONTEXTS: usize = 3;
const NUM_TASKS: usize = 10;

fn init_tracing() {
    _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// Ten spinning tasks over three contexts of a preemptive domain: every task
/// gets to run, then they are destroyed in creation order.
#[test]
fn test_spinning_tasks_share_contexts() -> Result<()> {
    init_tracing();

    let runtime = Runtime::new()?;
    let fred = runtime
        .domain_builder("fred")
        .contexts(NUM_CONTEXTS)
        .preemption(Duration::from_millis(1))
        .open()?;

    let stop = Arc::new(AtomicBool::new(false));
    let started = Arc::new(AtomicUsize::new(0));

    let mut tasks = (0..NUM_TASKS)
        .map(|tid| {
            let stop = Arc::clone(&stop);
            let started = Arc::clone(&started);

            Task::create(&fred, format!("T{tid}"), async move {
                started.fetch_add(1, Ordering::SeqCst);
                while !stop.load(Ordering::Acquire) {
                    std::hint::spin_loop();
                    cohort::preempt_point().await;
                }
            })
        })
        .collect::<cohort::Result<Vec<_>>>()?;

    // More tasks than contexts, only preemption lets all of them start.
    assert!(wait_until(Duration::from_secs(10), || {
        started.load(Ordering::SeqCst) == NUM_TASKS
    }));

    let infos = fred.tasks();
    assert_eq!(infos.len(), NUM_TASKS);
    assert!(infos.iter().all(|t| t.domain == "fred" && t.state != State::Terminated));

    let names = infos.iter().map(|t| t.name.as_str()).collect::<HashSet<_>>();
    assert!((0..NUM_TASKS).all(|tid| names.contains(format!("T{tid}").as_str())));

    assert_eq!(fred.contexts().len(), NUM_CONTEXTS);
    assert!(fred.close().is_err());

    stop.store(true, Ordering::Release);
    for task in tasks.iter_mut() {
        task.destroy()?;
        assert!(task.is_terminated());
    }

    assert!(fred.stats().preemptions > 0);
    assert_eq!(runtime.live_tasks(), 0);

    fred.close()?;
    runtime.shutdown()?;
    Ok(())
}

/// A plain thread destroying tasks in creation order while they still run.
#[test]
fn test_destroy_in_order_while_running() -> Result<()> {
    init_tracing();

    let runtime = Runtime::builder().default_contexts(NUM_CONTEXTS).try_build()?;
    let fred = runtime.open_domain("fred", NUM_CONTEXTS)?;

    let mut tasks = (0..NUM_TASKS)
        .map(|tid| {
            Task::create_fn(&fred, format!("T{tid}"), move || {
                thread::sleep(Duration::from_millis(2 * tid as u64));
            })
        })
        .collect::<cohort::Result<Vec<_>>>()?;

    tasks.iter_mut().try_for_each(Task::destroy)?;

    assert!(fred.tasks().is_empty());
    assert_eq!(fred.stats().completed, NUM_TASKS as u64);

    fred.close()?;
    runtime.shutdown()?;
    Ok(())
}
