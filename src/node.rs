//! Retired node record.
//!
//! A `RetiredNode` is embedded at offset 0 of a collection's node type
//! (`#[repr(C)]`). Retiring hands the node to the reclaimer together with a
//! type-erased destroy callback; the callback runs exactly once, when no
//! thread can hold a reference to the node anymore.

/// Type-erased destroy callback.
///
/// Receives the retired node and the argument passed at retirement. The
/// callback releases the node's storage and must not publish the node again.
pub type DestroyFn = unsafe fn(*mut RetiredNode, *mut ());

/// Reclamation record embedded in a collection's node.
///
/// Must be the *first* field of a `#[repr(C)]` struct so that a pointer to
/// the outer node and a pointer to its `RetiredNode` are interchangeable.
/// The fields are written by the reclaimer once the node has been retired;
/// until then the record is inert and costs one pointer-sized link, a
/// callback slot, and a clock tag.
#[repr(C)]
pub struct RetiredNode {
    /// Next node in whichever retire list currently owns this node.
    /// Also used to chain nodes through the per-thread retire buffer.
    pub(crate) next: *mut RetiredNode,
    /// Destroy callback, set at retirement.
    pub(crate) destroy: Option<DestroyFn>,
    /// Argument forwarded to the destroy callback.
    pub(crate) arg: *mut (),
    /// Logical clock value at retirement. The generation scheme frees a
    /// node once the safe boundary moves strictly past this tag; the
    /// epoch scheme encodes age in the bucket instead and leaves it 0.
    pub(crate) tag: u64,
}

impl RetiredNode {
    /// Create an inert record with null links.
    pub const fn new() -> Self {
        Self {
            next: core::ptr::null_mut(),
            destroy: None,
            arg: core::ptr::null_mut(),
            tag: 0,
        }
    }
}

impl Default for RetiredNode {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: RetiredNode contains only raw pointers and plain integers. After
// retirement the node is owned by exactly one retire list or drain chain at
// a time; list hand-offs synchronize through the list head atomics.
unsafe impl Send for RetiredNode {}
// SAFETY: the fields are only written while the node is exclusively owned
// (by the retiring thread before the publishing CAS, or by the draining
// thread after the exchange that emptied the list).
unsafe impl Sync for RetiredNode {}

/// Run the destroy callback of every node in the chain starting at `head`.
///
/// Returns the number of nodes destroyed.
///
/// # Safety
///
/// `head` must be the start of a retire chain that no other thread can
/// reach, with every node's callback fields set by a retire operation.
pub(crate) unsafe fn destroy_chain(head: *mut RetiredNode) -> usize {
    let mut count = 0;
    let mut curr = head;
    while !curr.is_null() {
        let next = (*curr).next;
        debug_assert!((*curr).destroy.is_some(), "retired node without destroy callback");
        if let Some(destroy) = (*curr).destroy {
            destroy(curr, (*curr).arg);
        }
        curr = next;
        count += 1;
    }
    count
}
