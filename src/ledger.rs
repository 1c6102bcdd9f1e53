//! Usage ledger: bytes currently allocated through one allocator context.

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Running total of allocated bytes.
///
/// Until [`enable_thread_safety`] is called, updates are plain load/store
/// pairs: concurrent writers may lose updates and must be serialized by the
/// caller. Afterwards every update and read goes through a mutex.
///
/// [`enable_thread_safety`]: UsageLedger::enable_thread_safety
pub struct UsageLedger {
    used: CachePadded<AtomicUsize>,
    thread_safe: AtomicBool,
    lock: Mutex<()>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self {
            used: CachePadded::new(AtomicUsize::new(0)),
            thread_safe: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    /// Turn on locking. One-way.
    pub fn enable_thread_safety(&self) {
        self.thread_safe.store(true, Ordering::SeqCst);
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe.load(Ordering::Acquire)
    }

    fn guarded<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.is_thread_safe() {
            let _guard = self.lock.lock();
            f()
        } else {
            f()
        }
    }

    pub fn used(&self) -> usize {
        self.guarded(|| self.used.load(Ordering::Relaxed))
    }

    pub fn increment(&self, bytes: usize) {
        self.guarded(|| {
            let current = self.used.load(Ordering::Relaxed);
            self.used
                .store(current.saturating_add(bytes), Ordering::Relaxed);
        });
    }

    /// Subtract `bytes`, clamping at zero. Underflow means an unpaired
    /// release or a lost unguarded update, and is logged.
    pub fn decrement(&self, bytes: usize) {
        self.guarded(|| {
            let current = self.used.load(Ordering::Relaxed);
            let next = current.checked_sub(bytes).unwrap_or_else(|| {
                tracing::error!(used = current, bytes, "usage ledger underflow");
                0
            });
            self.used.store(next, Ordering::Relaxed);
        });
    }
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageLedger")
            .field("used", &self.used.load(Ordering::Relaxed))
            .field("thread_safe", &self.is_thread_safe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increment_decrement() {
        let ledger = UsageLedger::new();
        ledger.increment(100);
        ledger.increment(28);
        assert_eq!(ledger.used(), 128);

        ledger.decrement(100);
        assert_eq!(ledger.used(), 28);
    }

    #[test]
    fn test_underflow_clamps() {
        let ledger = UsageLedger::new();
        ledger.increment(8);
        ledger.decrement(16);
        assert_eq!(ledger.used(), 0);
    }

    #[test]
    fn test_thread_safety_is_one_way() {
        let ledger = UsageLedger::new();
        assert!(!ledger.is_thread_safe());

        ledger.enable_thread_safety();
        ledger.enable_thread_safety();
        assert!(ledger.is_thread_safe());
    }

    #[test]
    fn test_concurrent_updates_when_safe() {
        let ledger = Arc::new(UsageLedger::new());
        ledger.enable_thread_safety();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ledger.increment(3);
                    }
                    for _ in 0..500 {
                        ledger.decrement(2);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.used(), 8 * (3000 - 1000));
    }
}
