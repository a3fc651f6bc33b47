//! Treiber stack built on the reclamation interface
//!
//! The stack is written against `SmrLocal`, so the same code runs on the
//! generation-dump and the epoch scheme; `main` picks one.

use quiesce::{Cleaner, GenDump, RetiredNode, SmrLocal};
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[repr(C)]
struct Node<T> {
    retired: RetiredNode,
    value: ManuallyDrop<T>,
    next: *mut Node<T>,
}

/// Frees a popped node's shell. The value was already taken out by the
/// popping thread, so only the box itself goes here.
unsafe fn reclaim_shell<T>(node: *mut RetiredNode, _arg: *mut ()) {
    drop(Box::from_raw(node as *mut Node<T>));
}

struct TreiberStack<T> {
    head: AtomicPtr<Node<T>>,
}

impl<T> TreiberStack<T> {
    fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push never dereferences shared nodes, so it needs no critical
    /// section and no registration.
    fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            retired: RetiredNode::new(),
            value: ManuallyDrop::new(value),
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    /// Pop reads `head.next` while another thread may pop and retire
    /// `head`; the critical section keeps the node's storage alive until
    /// the guard drops.
    fn pop<L: SmrLocal>(&self, local: &L) -> Option<T> {
        loop {
            let guard = local.pin();
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            let next = unsafe { (*head).next };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // This thread unlinked the node and owns its value; the
                // shell is handed to the reclaimer.
                let value = unsafe { ManuallyDrop::take(&mut (*head).value) };
                unsafe {
                    local.retire(head as *mut RetiredNode, reclaim_shell::<T>, ptr::null_mut())
                };
                return Some(value);
            }
            drop(guard);
        }
    }
}

impl<T> Drop for TreiberStack<T> {
    fn drop(&mut self) {
        let mut curr = *self.head.get_mut();
        while !curr.is_null() {
            let mut node = unsafe { Box::from_raw(curr) };
            unsafe { ManuallyDrop::drop(&mut node.value) };
            curr = node.next;
        }
    }
}

fn main() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 4;
    const PER_PRODUCER: usize = 50000;

    // Swap in `Ebr::new()` to run the identical stack on the epoch scheme.
    let scheme = GenDump::new();
    let stack = Arc::new(TreiberStack::new());
    let popped = Arc::new(AtomicUsize::new(0));
    let total = PRODUCERS * PER_PRODUCER;

    // A background recycler keeps the retire list short while the
    // consumers churn.
    let cleaner = Cleaner::spawn(scheme.clone(), Duration::from_millis(1));

    let mut handles = vec![];

    for tid in 0..PRODUCERS {
        let stack = stack.clone();
        handles.push(thread::spawn(move || {
            for i in 0..PER_PRODUCER {
                stack.push(tid * PER_PRODUCER + i);
            }
            0usize
        }));
    }

    for _ in 0..CONSUMERS {
        let scheme = scheme.clone();
        let stack = stack.clone();
        let popped = popped.clone();
        handles.push(thread::spawn(move || {
            let local = scheme.register();
            let mut sum = 0usize;
            loop {
                if popped.load(Ordering::Relaxed) >= total {
                    break;
                }
                match stack.pop(&local) {
                    Some(value) => {
                        sum += value;
                        popped.fetch_add(1, Ordering::Relaxed);
                    }
                    None => thread::yield_now(),
                }
            }
            sum
        }));
    }

    let sum: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let freed = cleaner.stop();

    println!("Popped {} values, sum {}", total, sum);
    println!("Cleaner destroyed {} nodes", freed);
    assert_eq!(sum, total * (total - 1) / 2);

    println!("Example completed successfully!");
}
