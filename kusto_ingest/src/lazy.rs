use std::sync::OnceLock;

use parking_lot::Mutex;

/// A value created at most once, on first use
///
/// Reads after creation are a single atomic load. Creation is serialized by a lock so that
/// racing first users run the initializer exactly once. A failed initializer leaves the slot
/// empty and the next caller tries again.
#[derive(Debug)]
pub(crate) struct LazyOnce<T> {
    value: OnceLock<T>,
    init: Mutex<()>,
}

impl<T> Default for LazyOnce<T> {
    fn default() -> Self {
        Self {
            value: OnceLock::new(),
            init: Mutex::new(()),
        }
    }
}

impl<T> LazyOnce<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.value.get()
    }

    pub(crate) fn get_or_try_init<E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(v) = self.get() {
            return Ok(v);
        }

        let _guard = self.init.lock();
        // another caller may have won the race while we waited
        if let Some(v) = self.value.get() {
            return Ok(v);
        }
        let v = f()?;
        Ok(self.value.get_or_init(|| v))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use super::LazyOnce;

    #[test]
    fn concurrent_first_use_initializes_once() {
        const N: usize = 16;
        let lazy = Arc::new(LazyOnce::<usize>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|i| {
                let lazy = Arc::clone(&lazy);
                let calls = Arc::clone(&calls);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    *lazy
                        .get_or_try_init(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, ()>(i)
                        })
                        .unwrap()
                })
            })
            .collect();

        let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(seen.iter().all(|v| *v == seen[0]));
        assert_eq!(lazy.get(), Some(&seen[0]));
    }

    #[test]
    fn failed_init_retries() {
        let lazy = LazyOnce::<&str>::new();
        assert_eq!(lazy.get_or_try_init(|| Err("nope")), Err("nope"));
        assert_eq!(lazy.get(), None);
        assert_eq!(lazy.get_or_try_init(|| Ok::<_, &str>("yes")), Ok(&"yes"));
        assert_eq!(lazy.get_or_try_init(|| Err("unused")), Ok(&"yes"));
    }
}
