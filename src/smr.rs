//! Reclamation strategy interface.
//!
//! One capability set — register, deregister, enter, exit, retire,
//! recycle, sync — with two conforming schemes behind it. Collections
//! written against [`Smr`] and [`SmrLocal`] run unchanged on either
//! scheme; deregistration is the drop of the local handle.

use crate::node::{DestroyFn, RetiredNode};

/// A safe-memory-reclamation scheme.
///
/// Values are cheap handles over shared state: clone one per thread, or
/// move clones into spawned threads. The scheme's remaining retired nodes
/// are destroyed when the last handle (and local) drops.
pub trait Smr: Clone {
    /// Per-thread participation handle.
    type Local: SmrLocal;

    /// Register the calling thread and return its local handle.
    ///
    /// Must precede any enter or retire from that thread. Dropping the
    /// returned handle deregisters.
    fn register(&self) -> Self::Local;

    /// Free every retired node that no thread can still reference.
    ///
    /// Returns the number of nodes destroyed. May briefly hold the
    /// registry lock; never blocks `enter`/`exit` on other threads.
    fn recycle(&self) -> usize;

    /// Block until everything retired before this call is eligible for
    /// reclamation (not necessarily yet destroyed).
    fn sync(&self);
}

/// Per-thread side of a reclamation scheme.
pub trait SmrLocal {
    /// Begin a critical section. Wait-free; nests.
    fn enter(&self);

    /// End a critical section. Wait-free; the outermost exit publishes
    /// that the thread retains no protected reference.
    fn exit(&self);

    /// Hand an unlinked node to the reclaimer.
    ///
    /// # Safety
    ///
    /// `node` must point to a valid `RetiredNode` at offset 0 of its
    /// allocation, already unlinked from every shared structure, and must
    /// be retired at most once. The caller must not touch the node after
    /// this call; `destroy(node, arg)` runs exactly once, when no thread
    /// can reference the node.
    unsafe fn retire(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ());

    /// Enter a critical section for the lifetime of the returned guard.
    #[inline]
    fn pin(&self) -> Guard<'_, Self>
    where
        Self: Sized,
    {
        self.enter();
        Guard { local: self }
    }
}

/// RAII critical section: dropping the guard is the matching `exit`.
///
/// Nested guards are permitted; only the outermost pair publishes and
/// clears the thread's announcement.
#[must_use = "the critical section ends as soon as the guard is dropped"]
pub struct Guard<'a, L: SmrLocal> {
    local: &'a L,
}

impl<L: SmrLocal> Drop for Guard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        self.local.exit();
    }
}
