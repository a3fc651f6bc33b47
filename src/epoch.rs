//! Epoch-based reclamation.
//!
//! A global epoch counter and three retire buckets. Entering threads
//! announce the epoch they observed; retirements land in the current
//! epoch's bucket. When every active thread has observed epoch `e`, the
//! bucket two epochs behind can no longer be referenced: recycle drains
//! it, then advances the global epoch.
//!
//! After Fraser's classic epoch design: with the global epoch at `e`,
//! active threads announce `e-1` or `e`, so nodes retired at `e-2` are
//! unreachable.

use crate::list::RetireList;
use crate::lock::{RegistryLock, Spin};
use crate::node::{self, DestroyFn, RetiredNode};
use crate::registry::{Registry, ThreadRecord};
use crate::smr::{Guard, Smr, SmrLocal};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{fence, Ordering};
use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU64;

const EPOCH_BUCKETS: u64 = 3;

/// Bucket receiving retirements while the global epoch is `epoch`.
#[inline]
fn bucket_index(epoch: u64) -> usize {
    (epoch % EPOCH_BUCKETS) as usize
}

/// Bucket of the previous epoch: the one recycle may drain.
#[inline]
fn prev_bucket_index(epoch: u64) -> usize {
    ((epoch + 2) % EPOCH_BUCKETS) as usize
}

struct EbrCore<L: RegistryLock> {
    epoch: CachePadded<AtomicU64>,
    buckets: [RetireList; EPOCH_BUCKETS as usize],
    registry: Registry<L>,
}

impl<L: RegistryLock> EbrCore<L> {
    fn recycle(&self) -> usize {
        fence(Ordering::SeqCst);
        let global = self.epoch.load(Ordering::SeqCst);
        let head = self.buckets[prev_bucket_index(global)].take_all();
        let observed = self.registry.wait_until_observed(global);
        debug_assert!(observed == 0 || observed >= global);
        // Every thread is now idle or has observed `global`. Advance before
        // destroying: a thread entering from here on announces at least
        // `global` and retires into the current bucket, never the drained one.
        if let Err(actual) =
            self.epoch
                .compare_exchange(global, global + 1, Ordering::SeqCst, Ordering::SeqCst)
        {
            // Lost the race to another recycler, which advanced for us.
            debug_assert!(actual >= global);
        }
        // SAFETY: the exchange above detached the chain; its nodes were
        // retired two epochs back and no active thread can reach them.
        unsafe { node::destroy_chain(head) }
    }

    fn sync(&self) {
        fence(Ordering::SeqCst);
        let global = self.epoch.load(Ordering::SeqCst);
        let target = global + 2;
        let mut current = global;
        // Takes at most two advances to reach the target.
        while current < target {
            let observed = self.registry.wait_until_observed(current);
            if observed == 0 || observed >= target {
                return;
            }
            current = match self.epoch.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => current + 1,
                Err(actual) => actual,
            };
        }
    }
}

impl<L: RegistryLock> Drop for EbrCore<L> {
    fn drop(&mut self) {
        for bucket in &self.buckets {
            // SAFETY: the last handle is going away; no thread can retire
            // into or scan these buckets anymore.
            let _ = unsafe { node::destroy_chain(bucket.take_all()) };
        }
    }
}

/// Epoch-based reclamation scheme.
///
/// Cheap to clone; all clones share one epoch, one registry, and one set
/// of retire buckets. Dropping the last clone (and the last
/// [`EbrLocal`]) destroys every node still retired.
pub struct Ebr<L: RegistryLock = Spin> {
    core: Arc<EbrCore<L>>,
}

impl Ebr<Spin> {
    /// Create a scheme guarded by the built-in spinlock.
    pub fn new() -> Self {
        Self::with_lock(Spin::new())
    }
}

impl Default for Ebr<Spin> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RegistryLock> Ebr<L> {
    /// Create a scheme guarded by a caller-supplied registry lock.
    pub fn with_lock(lock: L) -> Self {
        Self {
            core: Arc::new(EbrCore {
                epoch: CachePadded::new(AtomicU64::new(1)),
                buckets: [RetireList::new(), RetireList::new(), RetireList::new()],
                registry: Registry::new(lock),
            }),
        }
    }

    /// Register the calling thread. Dropping the handle deregisters.
    pub fn register(&self) -> EbrLocal<L> {
        EbrLocal {
            record: self.core.registry.attach(),
            core: self.core.clone(),
        }
    }

    /// Drain the bucket that no active thread can reference, then advance
    /// the global epoch. Returns the number of nodes destroyed.
    ///
    /// Blocks while any active thread still lags behind the current
    /// epoch; call it from a thread that is outside any critical section,
    /// ideally a dedicated recycler.
    pub fn recycle(&self) -> usize {
        self.core.recycle()
    }

    /// Block until nodes detached before this call are safe to free.
    ///
    /// On return the observed epoch has advanced twice, or every thread
    /// was seen idle. Spins on lagging threads; prefer retire + recycle
    /// unless immediate manual freeing is required.
    pub fn sync(&self) {
        self.core.sync()
    }

    /// Approximate number of retired nodes not yet destroyed.
    pub fn pending(&self) -> u64 {
        self.core.buckets.iter().map(RetireList::len).sum()
    }
}

impl<L: RegistryLock> Clone for Ebr<L> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<L: RegistryLock> Smr for Ebr<L> {
    type Local = EbrLocal<L>;

    fn register(&self) -> EbrLocal<L> {
        Ebr::register(self)
    }

    fn recycle(&self) -> usize {
        Ebr::recycle(self)
    }

    fn sync(&self) {
        Ebr::sync(self)
    }
}

/// Per-thread handle of an [`Ebr`] scheme.
///
/// Owned by one thread at a time; dropping it deregisters the thread.
/// Dropping while a critical section is open is a contract violation and
/// panics.
pub struct EbrLocal<L: RegistryLock = Spin> {
    core: Arc<EbrCore<L>>,
    record: *mut ThreadRecord,
}

// SAFETY: moving the handle moves exclusive use of the record's
// owner-only state with it; the handle is not Sync, so that state is
// never touched from two threads at once.
unsafe impl<L: RegistryLock> Send for EbrLocal<L> {}

impl<L: RegistryLock> EbrLocal<L> {
    #[inline]
    fn record(&self) -> &ThreadRecord {
        // SAFETY: the record stays attached until this handle drops, and
        // the core (kept alive by our Arc) owns its storage.
        unsafe { &*self.record }
    }

    /// Begin a critical section, announcing the current global epoch.
    #[inline]
    pub fn enter(&self) {
        self.record().begin_critical(&self.core.epoch);
    }

    /// End a critical section.
    #[inline]
    pub fn exit(&self) {
        self.record().end_critical();
    }

    /// Enter a critical section for the lifetime of the returned guard.
    #[inline]
    pub fn pin(&self) -> Guard<'_, Self> {
        SmrLocal::pin(self)
    }

    /// Hand an unlinked node to the reclaimer; it lands in the current
    /// epoch's bucket.
    ///
    /// # Safety
    ///
    /// See [`SmrLocal::retire`].
    pub unsafe fn retire(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ()) {
        fence(Ordering::SeqCst);
        let epoch = self.core.epoch.load(Ordering::SeqCst);
        self.core.buckets[bucket_index(epoch)].push(node, destroy, arg);
    }

    /// Retire a `Box`-allocated node whose type embeds [`RetiredNode`] at
    /// offset 0; the reclaimer reconstitutes and drops the box.
    ///
    /// # Safety
    ///
    /// - `ptr` must come from `Box::into_raw` and not be retired twice.
    /// - `T` must be `#[repr(C)]` with `RetiredNode` as its *first*
    ///   field. The pointer is cast to `*mut RetiredNode` unconditionally
    ///   and list links are written through the first bytes of the
    ///   allocation; anything else there is immediate undefined behavior.
    /// - The caller must not access `*ptr` after this call.
    pub unsafe fn retire_boxed<T: 'static>(&self, ptr: *mut T) {
        unsafe fn reclaim_boxed<T>(node: *mut RetiredNode, _arg: *mut ()) {
            drop(Box::from_raw(node as *mut T));
        }
        self.retire(ptr as *mut RetiredNode, reclaim_boxed::<T>, core::ptr::null_mut());
    }
}

impl<L: RegistryLock> SmrLocal for EbrLocal<L> {
    #[inline]
    fn enter(&self) {
        EbrLocal::enter(self)
    }

    #[inline]
    fn exit(&self) {
        EbrLocal::exit(self)
    }

    unsafe fn retire(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ()) {
        EbrLocal::retire(self, node, destroy, arg)
    }
}

impl<L: RegistryLock> Drop for EbrLocal<L> {
    fn drop(&mut self) {
        // SAFETY: attached at registration, detached exactly once, here.
        unsafe { self.core.registry.detach(self.record) };
    }
}
