/// Runs a closure when dropped, including while unwinding.
///
/// Used to restore per-context bookkeeping after polling a task body, no
/// matter how the poll ended.
pub(crate) struct ScopeGuard<F: FnOnce()> {
    // Taken on drop so the closure runs at most once.
    closure: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
        }
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic;

    #[test]
    fn test_runs_on_drop() {
        let ran = Cell::new(false);
        {
            let _guard = ScopeGuard::new(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }

    #[test]
    fn test_runs_while_unwinding() {
        let ran = Cell::new(false);
        let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            let _guard = ScopeGuard::new(|| ran.set(true));
            panic!("boom");
        }));

        assert!(res.is_err());
        assert!(ran.get());
    }
}
