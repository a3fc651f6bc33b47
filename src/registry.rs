//! Thread registry.
//!
//! Every participating thread owns one `ThreadRecord` for the lifetime of
//! its registration. Records are linked into an intrusive doubly linked
//! list so reclaim scans visit exactly the attached records. Attach and
//! detach take the registry lock's write role; scans take the read role;
//! `enter`/`exit` touch only the owning record and take no lock at all.

use crate::lock::{self, RegistryLock};
use alloc::boxed::Box;
use core::cell::Cell;
use core::sync::atomic::{fence, Ordering};
use crossbeam_utils::Backoff;
use portable_atomic::AtomicU64;

#[cfg(not(feature = "dyn-registry"))]
use crossbeam_utils::CachePadded;

/// Upper bound on concurrently registered threads with the pooled registry.
///
/// Registration past this bound panics. The `dyn-registry` feature lifts
/// the bound by allocating records on demand.
#[cfg(not(feature = "dyn-registry"))]
pub const MAX_THREADS: usize = 128;

/// Per-thread participation record.
///
/// `announced` is the thread's last published clock value; 0 means the
/// thread is idle. `nesting` counts reentrant critical sections and is
/// only ever touched by the owning thread.
pub(crate) struct ThreadRecord {
    next: Cell<*mut ThreadRecord>,
    prev: Cell<*mut ThreadRecord>,
    announced: AtomicU64,
    nesting: Cell<u32>,
}

// SAFETY: `announced` is atomic. The link cells are written only under the
// registry lock's write role and read under either role. `nesting` is
// read and written exclusively by the thread that owns the registration.
unsafe impl Send for ThreadRecord {}
// SAFETY: see above; cross-thread access is confined to `announced` and
// the lock-guarded link cells.
unsafe impl Sync for ThreadRecord {}

impl ThreadRecord {
    const fn new() -> Self {
        Self {
            next: Cell::new(core::ptr::null_mut()),
            prev: Cell::new(core::ptr::null_mut()),
            announced: AtomicU64::new(0),
            nesting: Cell::new(0),
        }
    }

    fn reset(&self) {
        self.announced.store(0, Ordering::Relaxed);
        self.nesting.set(0);
    }

    /// Begin a critical section, announcing the current value of `clock`.
    ///
    /// Only the outermost of nested sections publishes. The announcement
    /// is ordered before any subsequent protected load: the release store
    /// followed by a full fence pairs with the fence reclaimers issue
    /// before scanning. The clock load is sequentially consistent, as is
    /// the load retirement tags a node with: a thread that can still hold
    /// a node never announces a newer value than the node's tag.
    #[inline]
    pub(crate) fn begin_critical(&self, clock: &AtomicU64) {
        let nesting = self.nesting.get();
        self.nesting.set(nesting + 1);
        if nesting == 0 {
            let observed = clock.load(Ordering::SeqCst);
            self.announced.store(observed, Ordering::Release);
            fence(Ordering::SeqCst);
        }
    }

    /// End a critical section. The outermost exit clears the announcement
    /// after the caller's last protected access.
    #[inline]
    pub(crate) fn end_critical(&self) {
        let nesting = self.nesting.get();
        assert!(nesting > 0, "critical section exit without a matching enter");
        if nesting == 1 {
            self.announced.store(0, Ordering::Release);
        }
        self.nesting.set(nesting - 1);
    }

    #[inline]
    pub(crate) fn in_critical(&self) -> bool {
        self.nesting.get() > 0
    }
}

/// Registry of attached thread records, guarded by a caller-supplied lock.
pub(crate) struct Registry<L: RegistryLock> {
    lock: L,
    head: Cell<*mut ThreadRecord>,
    /// Owns the pooled record storage; records are reached through the
    /// free list and the registry list, never through this field.
    #[cfg(not(feature = "dyn-registry"))]
    _pool: Box<[CachePadded<ThreadRecord>]>,
    #[cfg(not(feature = "dyn-registry"))]
    free: Cell<*mut ThreadRecord>,
}

// SAFETY: `head` (and the pooled free list) are only accessed under the
// registry lock; records themselves are Sync.
unsafe impl<L: RegistryLock> Send for Registry<L> {}
unsafe impl<L: RegistryLock> Sync for Registry<L> {}

impl<L: RegistryLock> Registry<L> {
    #[cfg(not(feature = "dyn-registry"))]
    pub(crate) fn new(lock: L) -> Self {
        let pool: Box<[CachePadded<ThreadRecord>]> = (0..MAX_THREADS)
            .map(|_| CachePadded::new(ThreadRecord::new()))
            .collect();
        // Thread every pooled record onto the free list through its own
        // next link. The pool is heap storage, so these addresses are
        // stable for the registry's lifetime.
        let mut free = core::ptr::null_mut();
        for slot in pool.iter().rev() {
            let record: &ThreadRecord = slot;
            record.next.set(free);
            free = record as *const ThreadRecord as *mut ThreadRecord;
        }
        Self {
            lock,
            head: Cell::new(core::ptr::null_mut()),
            _pool: pool,
            free: Cell::new(free),
        }
    }

    #[cfg(feature = "dyn-registry")]
    pub(crate) fn new(lock: L) -> Self {
        Self {
            lock,
            head: Cell::new(core::ptr::null_mut()),
        }
    }

    /// Attach a fresh record and make it visible to future scans.
    pub(crate) fn attach(&self) -> *mut ThreadRecord {
        let _write = lock::write(&self.lock);
        let record = self.take_record();
        // SAFETY: `record` came from the pool or a fresh allocation and is
        // not yet linked; the write role excludes every other link access.
        unsafe {
            (*record).reset();
            let head = self.head.get();
            (*record).prev.set(core::ptr::null_mut());
            (*record).next.set(head);
            if !head.is_null() {
                (*head).prev.set(record);
            }
            self.head.set(record);
        }
        record
    }

    /// Detach a record registered through [`attach`](Self::attach).
    ///
    /// # Safety
    ///
    /// `record` must have been returned by `attach` on this registry and
    /// not yet detached. The owning thread must have left every critical
    /// section.
    pub(crate) unsafe fn detach(&self, record: *mut ThreadRecord) {
        assert!(
            !(*record).in_critical(),
            "thread deregistered inside a critical section"
        );
        assert_eq!(
            (*record).announced.load(Ordering::Relaxed),
            0,
            "thread deregistered with a published announcement"
        );
        {
            let _write = lock::write(&self.lock);
            let prev = (*record).prev.get();
            let next = (*record).next.get();
            if !prev.is_null() {
                (*prev).next.set(next);
            } else {
                self.head.set(next);
            }
            if !next.is_null() {
                (*next).prev.set(prev);
            }
            self.give_back(record);
        }
    }

    #[cfg(not(feature = "dyn-registry"))]
    fn take_record(&self) -> *mut ThreadRecord {
        let record = self.free.get();
        assert!(
            !record.is_null(),
            "quiesce: exceeded maximum thread count ({MAX_THREADS})"
        );
        // SAFETY: free-list records are pool slots no thread references.
        unsafe { self.free.set((*record).next.get()) };
        record
    }

    #[cfg(not(feature = "dyn-registry"))]
    unsafe fn give_back(&self, record: *mut ThreadRecord) {
        (*record).next.set(self.free.get());
        self.free.set(record);
    }

    #[cfg(feature = "dyn-registry")]
    fn take_record(&self) -> *mut ThreadRecord {
        Box::into_raw(Box::new(ThreadRecord::new()))
    }

    #[cfg(feature = "dyn-registry")]
    unsafe fn give_back(&self, record: *mut ThreadRecord) {
        drop(Box::from_raw(record));
    }

    /// Wait until every attached thread is idle or has announced a clock
    /// value of at least `clock`.
    ///
    /// Returns the minimum announcement among threads that satisfied the
    /// condition, or 0 when all attached threads were idle. Blocks while
    /// any active thread still announces a value behind `clock`.
    pub(crate) fn wait_until_observed(&self, clock: u64) -> u64 {
        let _read = lock::read(&self.lock);
        let mut min = u64::MAX;
        let mut cursor = self.head.get();
        while !cursor.is_null() {
            // SAFETY: the read role pins the list structure; announcements
            // are atomic loads.
            let record = unsafe { &*cursor };
            let backoff = Backoff::new();
            loop {
                let announced = record.announced.load(Ordering::SeqCst);
                if announced == 0 {
                    break;
                }
                if announced >= clock {
                    min = min.min(announced);
                    break;
                }
                backoff.snooze();
            }
            cursor = record.next.get();
        }
        if min == u64::MAX { 0 } else { min }
    }

    /// Minimum clock announced by any active thread, or 0 when every
    /// attached thread is idle.
    pub(crate) fn min_announced(&self) -> u64 {
        let _read = lock::read(&self.lock);
        let mut min = u64::MAX;
        let mut cursor = self.head.get();
        while !cursor.is_null() {
            // SAFETY: as in `wait_until_observed`.
            let record = unsafe { &*cursor };
            let announced = record.announced.load(Ordering::SeqCst);
            if announced != 0 {
                min = min.min(announced);
            }
            cursor = record.next.get();
        }
        if min == u64::MAX { 0 } else { min }
    }
}

impl<L: RegistryLock> Drop for Registry<L> {
    fn drop(&mut self) {
        debug_assert!(
            self.head.get().is_null(),
            "registry dropped with attached thread records"
        );
    }
}
