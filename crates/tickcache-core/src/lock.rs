//! A mutex usable from both ordinary and async call sites.

use tokio::sync::{Mutex, MutexGuard};

/// Wraps the data it protects; every acquire returns a guard that releases
/// the lock when dropped, on every exit path.
#[derive(Debug, Default)]
pub struct AsyncLock<T> {
    inner: Mutex<T>,
}

impl<T> AsyncLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Non-blocking check: true if nobody holds the lock right now.
    ///
    /// Per-tick code uses this to skip work instead of stalling the frame.
    /// The answer may be stale by the time the caller acts on it; use
    /// [`try_lock`](Self::try_lock) when the work itself needs the lock.
    pub fn is_free(&self) -> bool {
        self.inner.try_lock().is_ok()
    }

    /// Acquire from an async call stack.
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().await
    }

    /// Acquire from an ordinary call stack.
    ///
    /// Panics if called from within an async execution context.
    pub fn lock_blocking(&self) -> MutexGuard<'_, T> {
        self.inner.blocking_lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_is_free_reflects_holder() {
        let lock = AsyncLock::new(0);
        assert!(lock.is_free());
        {
            let mut guard = lock.lock().await;
            *guard += 1;
            assert!(!lock.is_free());
            assert!(lock.try_lock().is_none());
        }
        assert!(lock.is_free());
        assert_eq!(*lock.try_lock().unwrap(), 1);
    }

    #[test]
    fn test_blocking_lock_from_threads() {
        let lock = Arc::new(AsyncLock::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let lock = lock.clone();
                std::thread::spawn(move || lock.lock_blocking().push(i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut values = lock.lock_blocking().clone();
        values.sort();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_released_on_panic() {
        let lock = Arc::new(AsyncLock::new(()));
        let inner = lock.clone();
        let result = std::thread::spawn(move || {
            let _guard = inner.lock_blocking();
            panic!("holder failed");
        })
        .join();
        assert!(result.is_err());
        assert!(lock.is_free());
    }
}
