//! Shared retire list and per-thread retire buffer.
//!
//! The shared list is a singly linked LIFO updated by a CAS splice that
//! never loses previously linked nodes and accepts multi-node chains in a
//! single publication. The buffer accumulates a thread's retirements and
//! flushes them as one splice.

use crate::node::{DestroyFn, RetiredNode};
use core::cell::Cell;
use core::sync::atomic::{AtomicPtr, Ordering};
use crossbeam_utils::Backoff;
use portable_atomic::AtomicU64;

/// Capacity of the per-thread retire buffer.
///
/// A buffered retirement reaches the shared list at the latest when this
/// many nodes are already buffered; the overflowing batch is spliced as
/// one unit.
pub const RETIRE_BUFFER_CAP: usize = 4;

/// Lock-free list of retired nodes awaiting reclamation.
///
/// The length counter is advisory: it is updated with relaxed operations
/// and may lag behind the list itself. Emptiness is judged from the head
/// pointer, never from the counter.
pub(crate) struct RetireList {
    head: AtomicPtr<RetiredNode>,
    count: AtomicU64,
}

impl RetireList {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(core::ptr::null_mut()),
            count: AtomicU64::new(0),
        }
    }

    /// Approximate number of nodes in the list.
    pub(crate) fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Retire a single node onto the list.
    ///
    /// # Safety
    ///
    /// `node` must point to a valid `RetiredNode` that is not reachable by
    /// any thread outside the reclaimer and is not present in any retire
    /// list or buffer.
    pub(crate) unsafe fn push(&self, node: *mut RetiredNode, destroy: DestroyFn, arg: *mut ()) {
        (*node).destroy = Some(destroy);
        (*node).arg = arg;
        (*node).next = core::ptr::null_mut();
        self.connect(node, node);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Splice a prelinked chain `head -> .. -> tail` onto the list in one
    /// publication step.
    ///
    /// # Safety
    ///
    /// The chain must be exclusively owned by the caller, every node's
    /// callback fields must be set, and `tail` must terminate the chain.
    pub(crate) unsafe fn splice(
        &self,
        head: *mut RetiredNode,
        tail: *mut RetiredNode,
        count: u64,
    ) {
        debug_assert!((*tail).next.is_null());
        self.connect(head, tail);
        self.count.fetch_add(count, Ordering::Relaxed);
    }

    /// Link `head -> .. -> tail` in front of the current list head.
    ///
    /// Retries on contention; a failed CAS re-links `tail` to the observed
    /// head, so no published node is ever dropped from the list.
    fn connect(&self, head: *mut RetiredNode, tail: *mut RetiredNode) {
        let backoff = Backoff::new();
        let mut cmp = self.head.load(Ordering::Relaxed);
        loop {
            // The chain is still private here; publish happens at the CAS.
            unsafe { (*tail).next = cmp };
            match self
                .head
                .compare_exchange_weak(cmp, head, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => {
                    cmp = observed;
                    backoff.spin();
                }
            }
        }
    }

    /// Detach the whole list and reset the advisory counter.
    pub(crate) fn take_all(&self) -> *mut RetiredNode {
        let head = self.head.swap(core::ptr::null_mut(), Ordering::Acquire);
        self.count.store(0, Ordering::Relaxed);
        head
    }
}

// SAFETY: the head pointer is atomic and the counter is advisory; nodes are
// transferred in and out with release/acquire pairs.
unsafe impl Send for RetireList {}
unsafe impl Sync for RetireList {}

/// Fixed-capacity buffer of retirements owned by a single thread.
///
/// Entries are chained through their `next` links as they are inserted, so
/// a full buffer pops out as a ready-made list for one splice.
pub(crate) struct RetireBuffer {
    slots: [Cell<*mut RetiredNode>; RETIRE_BUFFER_CAP],
    len: Cell<usize>,
}

impl RetireBuffer {
    pub(crate) const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: Cell<*mut RetiredNode> = Cell::new(core::ptr::null_mut());
        Self {
            slots: [EMPTY; RETIRE_BUFFER_CAP],
            len: Cell::new(0),
        }
    }

    /// Insert a node, chaining it to the previous entry. When the buffer
    /// is already full, the node is linked in front of the buffered chain
    /// instead and the whole chain `(head, tail, count)` is handed back
    /// for a single splice; the buffer comes out empty.
    ///
    /// # Safety
    ///
    /// `node` must be exclusively owned by the buffering thread with its
    /// callback fields already set.
    pub(crate) unsafe fn insert_or_flush(
        &self,
        node: *mut RetiredNode,
    ) -> Option<(*mut RetiredNode, *mut RetiredNode, u64)> {
        let len = self.len.get();
        if len < RETIRE_BUFFER_CAP {
            (*node).next = if len == 0 {
                core::ptr::null_mut()
            } else {
                self.slots[len - 1].get()
            };
            self.slots[len].set(node);
            self.len.set(len + 1);
            return None;
        }
        (*node).next = self.slots[len - 1].get();
        self.len.set(0);
        Some((node, self.slots[0].get(), len as u64 + 1))
    }

    /// Empty the buffer, returning the chain `(head, tail, count)` where
    /// `head` is the most recent insertion and `tail` the oldest.
    pub(crate) fn pop_all(&self) -> Option<(*mut RetiredNode, *mut RetiredNode, u64)> {
        let len = self.len.get();
        if len == 0 {
            return None;
        }
        let head = self.slots[len - 1].get();
        let tail = self.slots[0].get();
        self.len.set(0);
        Some((head, tail, len as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    unsafe fn free_node(node: *mut RetiredNode, _arg: *mut ()) {
        drop(Box::from_raw(node));
    }

    fn raw_node() -> *mut RetiredNode {
        Box::into_raw(Box::new(RetiredNode::new()))
    }

    #[test]
    fn test_push_take_all() {
        let list = RetireList::new();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);

        let a = raw_node();
        let b = raw_node();
        unsafe {
            list.push(a, free_node, core::ptr::null_mut());
            list.push(b, free_node, core::ptr::null_mut());
        }
        assert!(!list.is_empty());
        assert_eq!(list.len(), 2);

        let head = list.take_all();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        // LIFO: the most recent retirement heads the chain.
        assert_eq!(head, b);
        unsafe {
            assert_eq!((*head).next, a);
            assert_eq!(crate::node::destroy_chain(head), 2);
        }
    }

    #[test]
    fn test_buffer_overflow_hands_back_one_chain() {
        let buffer = RetireBuffer::new();
        let mut nodes = [core::ptr::null_mut(); RETIRE_BUFFER_CAP + 1];
        for slot in nodes.iter_mut() {
            *slot = raw_node();
            unsafe { (**slot).destroy = Some(free_node) };
        }

        for node in &nodes[..RETIRE_BUFFER_CAP] {
            assert!(unsafe { buffer.insert_or_flush(*node) }.is_none());
        }
        let (head, tail, count) = unsafe { buffer.insert_or_flush(nodes[RETIRE_BUFFER_CAP]) }
            .expect("overflow must hand the chain back");
        assert_eq!(count, RETIRE_BUFFER_CAP as u64 + 1);
        assert_eq!(head, nodes[RETIRE_BUFFER_CAP]);
        assert_eq!(tail, nodes[0]);
        assert!(buffer.pop_all().is_none());

        let list = RetireList::new();
        unsafe { list.splice(head, tail, count) };
        assert_eq!(list.len(), RETIRE_BUFFER_CAP as u64 + 1);
        unsafe {
            assert_eq!(
                crate::node::destroy_chain(list.take_all()),
                RETIRE_BUFFER_CAP + 1
            );
        }
    }

    #[test]
    fn test_buffer_pop_all_orders_chain() {
        let buffer = RetireBuffer::new();
        let a = raw_node();
        let b = raw_node();
        unsafe {
            (*a).destroy = Some(free_node);
            (*b).destroy = Some(free_node);
            assert!(buffer.insert_or_flush(a).is_none());
            assert!(buffer.insert_or_flush(b).is_none());
        }

        let (head, tail, count) = buffer.pop_all().expect("buffer holds two nodes");
        assert_eq!((head, tail, count), (b, a, 2));
        unsafe {
            assert_eq!((*head).next, a);
            assert!((*tail).next.is_null());
            assert_eq!(crate::node::destroy_chain(head), 2);
        }
        assert!(buffer.pop_all().is_none());
    }
}
