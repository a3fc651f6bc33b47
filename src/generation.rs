//! Generation-dump reclamation.
//!
//! Retired nodes are tagged with the global generation at retirement and
//! collected on one shared list. A recycle pass dumps the list, computes
//! the safe boundary — the minimum generation announced by any active
//! thread, or "now" when none is active — frees every node tagged
//! strictly below it, and splices the survivors back. Threads may batch
//! retirements in a small local buffer that flushes as a single splice.

use crate::list::{RetireBuffer, RetireList};
use crate::lock::{RegistryLock, Spin};
use crate::node::{self, DestroyFn, RetiredNode};
use crate::registry::{Registry, ThreadRecord};
use crate::smr::{Guard, Smr, SmrLocal};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{fence, Ordering};
use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU64;

struct GenDumpCore<L: RegistryLock> {
    generation: CachePadded<AtomicU64>,
    retired: RetireList,
    registry: Registry<L>,
}

impl<L: RegistryLock> GenDumpCore<L> {
    fn recycle(&self) -> usize {
        fence(Ordering::SeqCst);
        let head = self.retired.take_all();
        if head.is_null() {
            self.generation.fetch_add(1, Ordering::SeqCst);
            return 0;
        }
        // Active threads lower-bound what they might still reference with
        // their announced generation. With none active, everything retired
        // so far is unreachable.
        let min_active = self.registry.min_announced();
        let boundary = if min_active == 0 { u64::MAX } else { min_active };

        let mut freed = core::ptr::null_mut();
        let mut keep_head = core::ptr::null_mut();
        let mut keep_tail: *mut RetiredNode = core::ptr::null_mut();
        let mut kept = 0u64;
        let mut curr = head;
        // SAFETY: the chain was detached by the exchange above and is
        // exclusively ours until the survivors are spliced back.
        unsafe {
            while !curr.is_null() {
                let next = (*curr).next;
                if (*curr).tag < boundary {
                    (*curr).next = freed;
                    freed = curr;
                } else {
                    (*curr).next = core::ptr::null_mut();
                    if keep_tail.is_null() {
                        keep_head = curr;
                    } else {
                        (*keep_tail).next = curr;
                    }
                    keep_tail = curr;
                    kept += 1;
                }
                curr = next;
            }
            if !keep_head.is_null() {
                self.retired.splice(keep_head, keep_tail, kept);
            }
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        // SAFETY: every node on `freed` is tagged below the boundary, so
        // no thread active since before its retirement remains.
        unsafe { node::destroy_chain(freed) }
    }

    fn sync(&self) {
        fence(Ordering::SeqCst);
        let snapshot = self.generation.load(Ordering::SeqCst);
        // Advance so that threads entering from now on announce a value
        // above the snapshot, then wait out everyone at or below it.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.registry.wait_until_observed(snapshot + 1);
    }
}

impl<L: RegistryLock> Drop for GenDumpCore<L> {
    fn drop(&mut self) {
        // SAFETY: the last handle is going away; nothing can retire into
        // or drain this list anymore.
        let _ = unsafe { node::destroy_chain(self.retired.take_all()) };
    }
}

/// Generation-dump reclamation scheme.
///
/// Cheap to clone; all clones share one generation counter, one registry,
/// and one retire list. Dropping the last clone (and the last
/// [`GenDumpLocal`]) destroys every node still retired.
pub struct GenDump<L: RegistryLock = Spin> {
    core: Arc<GenDumpCore<L>>,
}

impl GenDump<Spin> {
    /// Create a scheme guarded by the built-in spinlock.
    pub fn new() -> Self {
        Self::with_lock(Spin::new())
    }
}

impl Default for GenDump<Spin> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RegistryLock> GenDump<L> {
    /// Create a scheme guarded by a caller-supplied registry lock.
    pub fn with_lock(lock: L) -> Self {
        Self {
            core: Arc::new(GenDumpCore {
                generation: CachePadded::new(AtomicU64::new(1)),
                retired: RetireList::new(),
                registry: Registry::new(lock),
            }),
        }
    }

    /// Register the calling thread. Dropping the handle deregisters.
    pub fn register(&self) -> GenDumpLocal<L> {
        GenDumpLocal {
            record: self.core.registry.attach(),
            core: self.core.clone(),
            buffer: RetireBuffer::new(),
        }
    }

    /// Dump the retire list, free every node whose tag lies strictly
    /// below the safe boundary, splice the rest back, and advance the
    /// generation. Returns the number of nodes destroyed.
    ///
    /// Never waits on active threads: a lagging reader only lowers the
    /// boundary, it cannot stall the pass.
    pub fn recycle(&self) -> usize {
        self.core.recycle()
    }

    /// Block until everything retired before this call is eligible for
    /// reclamation, i.e. until no thread active since before the call
    /// remains in its critical section.
    ///
    /// Covers retirements visible on the shared list; flush local buffers
    /// first when the buffered path is in use.
    pub fn sync(&self) {
        self.core.sync()
    }

    /// Approximate number of retired nodes on the shared list.
    pub fn pending(&self) -> u64 {
        self.core.retired.len()
    }
}

impl<L: RegistryLock> Clone for GenDump<L> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl<L: RegistryLock> Smr for GenDump<L> {
    type Local = GenDumpLocal<L>;

    fn register(&self) -> GenDumpLocal<L> {
        GenDump::register(self)
    }

    fn recycle(&self) -> usize {
        GenDump::recycle(self)
    }

    fn sync(&self) {
        GenDump::sync(self)
    }
}

/// Per-thread handle of a [`GenDump`] scheme.
///
/// Owns the thread's retire buffer. Dropping the handle flushes the
/// buffer and deregisters the thread; dropping while a critical section
/// is open panics.
pub struct GenDumpLocal<L: RegistryLock = Spin> {
    core: Arc<GenDumpCore<L>>,
    record: *mut ThreadRecord,
    buffer: RetireBuffer,
}

// SAFETY: moving the handle moves exclusive use of the record's
// owner-only state and of the buffer with it; the handle is not Sync.
unsafe impl<L: RegistryLock> Send for GenDumpLocal<L> {}

impl<L: RegistryLock> GenDumpLocal<L> {
    #[inline]
    fn record(&self) -> &ThreadRecord {
        // SAFETY: the record stays attached until this handle drops, and
        // the core (kept alive by our Arc) owns its storage.
        unsafe { &*self.record }
    }

    /// Begin a critical section, announcing the current generation.
    #[inline]
    pub fn enter(&self) {
        self.record().begin_critical(&self.core.generation);
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

    /// Hand an unlinked node straight to the shared retire list, tagged
    /// with the current generation.
    ///
    /// # Safety
    ///
    /// See [`SmrLocal::retire`].
    pub unsafe fn retire(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ()) {
        fence(Ordering::SeqCst);
        // Sequentially consistent, like the clock load in enter: a thread
        // that loaded the node before it was unlinked announces no more
        // than this tag, so the boundary stays at or below it.
        let generation = self.core.generation.load(Ordering::SeqCst);
        (*node).tag = generation;
        self.core.retired.push(node, destroy, arg);
    }

    /// Buffered variant of [`retire`](Self::retire): the node lands in
    /// this thread's buffer and reaches the shared list in one splice
    /// when the buffer overflows, on [`flush`](Self::flush), or when the
    /// handle drops.
    ///
    /// # Safety
    ///
    /// See [`SmrLocal::retire`].
    pub unsafe fn retire_local(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ()) {
        fence(Ordering::SeqCst);
        let generation = self.core.generation.load(Ordering::SeqCst);
        (*node).destroy = Some(destroy);
        (*node).arg = arg;
        (*node).tag = generation;
        if let Some((head, tail, count)) = self.buffer.insert_or_flush(node) {
            self.core.retired.splice(head, tail, count);
        }
    }

    /// Splice the local buffer's contents onto the shared list now.
    pub fn flush(&self) {
        if let Some((head, tail, count)) = self.buffer.pop_all() {
            // SAFETY: the chain holds nodes this thread buffered; they
            // were armed by `retire_local`.
            unsafe { self.core.retired.splice(head, tail, count) };
        }
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

    /// Buffered variant of [`retire_boxed`](Self::retire_boxed).
    ///
    /// # Safety
    ///
    /// Same contract as [`retire_boxed`](Self::retire_boxed).
    pub unsafe fn retire_local_boxed<T: 'static>(&self, ptr: *mut T) {
        unsafe fn reclaim_boxed<T>(node: *mut RetiredNode, _arg: *mut ()) {
            drop(Box::from_raw(node as *mut T));
        }
        self.retire_local(ptr as *mut RetiredNode, reclaim_boxed::<T>, core::ptr::null_mut());
    }
}

impl<L: RegistryLock> SmrLocal for GenDumpLocal<L> {
    #[inline]
    fn enter(&self) {
        GenDumpLocal::enter(self)
    }

    #[inline]
    fn exit(&self) {
        GenDumpLocal::exit(self)
    }

    unsafe fn retire(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ()) {
        GenDumpLocal::retire(self, node, destroy, arg)
    }
}

impl<L: RegistryLock> Drop for GenDumpLocal<L> {
    fn drop(&mut self) {
        self.flush();
        // SAFETY: attached at registration, detached exactly once, here.
        unsafe { self.core.registry.detach(self.record) };
    }
}
