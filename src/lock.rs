//! Pluggable locking for the thread registry.
//!
//! Readers never take these locks: `enter`/`exit` touch only the calling
//! thread's record. The write role serializes registry mutation (register,
//! deregister); the read role covers reclaim-side scans, which may overlap
//! each other but not a mutation. Under an exclusive lock both roles
//! collapse onto the same lock.

use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Lock supplied by the caller to guard the thread registry.
///
/// `&self` is the lock's own context; implementations carry whatever state
/// they need behind it. Each `*_lock` call must be balanced by the matching
/// `*_unlock` on the same thread.
pub trait RegistryLock: Send + Sync {
    /// Acquire the read role (registry scans).
    fn read_lock(&self);
    /// Release the read role.
    fn read_unlock(&self);
    /// Acquire the write role (registry mutation).
    fn write_lock(&self);
    /// Release the write role.
    fn write_unlock(&self);
}

/// Test-test-and-set spinlock. Both roles map onto the one exclusive lock.
pub struct Spin {
    acquired: AtomicBool,
}

impl Spin {
    /// Create an unlocked spinlock.
    pub const fn new() -> Self {
        Self {
            acquired: AtomicBool::new(false),
        }
    }

    #[inline]
    fn acquire(&self) {
        loop {
            // Test phase: spin on relaxed load (stays in cache)
            while self.acquired.load(Ordering::Relaxed) {
                spin_loop();
            }
            // Test-and-set phase: attempt to acquire
            if !self.acquired.swap(true, Ordering::Acquire) {
                return;
            }
        }
    }

    #[inline]
    fn release(&self) {
        self.acquired.store(false, Ordering::Release);
    }
}

impl Default for Spin {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryLock for Spin {
    #[inline]
    fn read_lock(&self) {
        self.acquire();
    }
    #[inline]
    fn read_unlock(&self) {
        self.release();
    }
    #[inline]
    fn write_lock(&self) {
        self.acquire();
    }
    #[inline]
    fn write_unlock(&self) {
        self.release();
    }
}

const WRITER: u32 = 1 << 31;

/// Reader/writer spinlock: concurrent read holds, exclusive write hold.
///
/// Lets reclaim scans from several threads overlap while register and
/// deregister still exclude everything.
pub struct RwSpin {
    state: AtomicU32,
}

impl RwSpin {
    /// Create an unlocked reader/writer spinlock.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
        }
    }
}

impl Default for RwSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryLock for RwSpin {
    fn read_lock(&self) {
        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & WRITER == 0
                && self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            spin_loop();
        }
    }

    #[inline]
    fn read_unlock(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!((prev & !WRITER) > 0, "read_unlock without read_lock");
    }

    fn write_lock(&self) {
        loop {
            if self
                .state
                .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            spin_loop();
        }
    }

    #[inline]
    fn write_unlock(&self) {
        self.state.store(0, Ordering::Release);
    }
}

/// No-op lock for single-threaded or externally synchronized use.
pub struct Unlocked {
    _private: (),
}

impl Unlocked {
    /// Create the no-op lock.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that registry mutations and scans never
    /// run concurrently: either a single thread drives the reclaimer, or
    /// an external mechanism provides the exclusion this lock skips.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegistryLock for Unlocked {
    #[inline]
    fn read_lock(&self) {}
    #[inline]
    fn read_unlock(&self) {}
    #[inline]
    fn write_lock(&self) {}
    #[inline]
    fn write_unlock(&self) {}
}

/// RAII holder for the read role.
pub(crate) struct ReadGuard<'a, L: RegistryLock>(&'a L);

impl<L: RegistryLock> Drop for ReadGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        self.0.read_unlock();
    }
}

#[inline]
pub(crate) fn read<L: RegistryLock>(lock: &L) -> ReadGuard<'_, L> {
    lock.read_lock();
    ReadGuard(lock)
}

/// RAII holder for the write role.
pub(crate) struct WriteGuard<'a, L: RegistryLock>(&'a L);

impl<L: RegistryLock> Drop for WriteGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        self.0.write_unlock();
    }
}

#[inline]
pub(crate) fn write<L: RegistryLock>(lock: &L) -> WriteGuard<'_, L> {
    lock.write_lock();
    WriteGuard(lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_spin_mutual_exclusion() {
        let lock = Arc::new(Spin::new());
        let counter = Arc::new(core::cell::UnsafeCell::new(0u64));

        struct Shared(Arc<core::cell::UnsafeCell<u64>>);
        // SAFETY: every access below happens under the lock.
        unsafe impl Send for Shared {}

        let mut handles = vec![];
        for _ in 0..4 {
            let lock = lock.clone();
            let shared = Shared(counter.clone());
            handles.push(thread::spawn(move || {
                // Capture the whole `Shared` wrapper, not just its field,
                // so the `Send` impl above applies.
                let shared = shared;
                for _ in 0..10_000 {
                    lock.write_lock();
                    unsafe { *shared.0.get() += 1 };
                    lock.write_unlock();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(unsafe { *counter.get() }, 40_000);
    }

    #[test]
    fn test_rwspin_roles() {
        let lock = RwSpin::new();
        lock.read_lock();
        lock.read_lock();
        lock.read_unlock();
        lock.read_unlock();
        lock.write_lock();
        lock.write_unlock();
    }
}
