//! Tests for the sync barrier
//!
//! `sync` returns only once every critical section that was open when it
//! was called has ended. After that, storage detached before the call
//! can be freed directly, without going through retire.

use quiesce::{Ebr, GenDump, RetiredNode, Smr, SmrLocal};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[repr(C)]
struct ValueNode {
    retired: RetiredNode,
    value: usize,
    drops: Arc<AtomicUsize>,
}

impl ValueNode {
    fn new(value: usize, drops: &Arc<AtomicUsize>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            retired: RetiredNode::new(),
            value,
            drops: drops.clone(),
        }))
    }
}

impl Drop for ValueNode {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

fn sync_blocks_on_prior_reader<S>(scheme: S)
where
    S: Smr + Send + 'static,
    S::Local: SmrLocal + Send + 'static,
{
    let reader_in = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let scheme = scheme.clone();
        let reader_in = reader_in.clone();
        let release = release.clone();
        thread::spawn(move || {
            let local = scheme.register();
            local.enter();
            reader_in.store(true, Ordering::Release);
            while !release.load(Ordering::Acquire) {
                thread::yield_now();
            }
            local.exit();
        })
    };

    while !reader_in.load(Ordering::Acquire) {
        thread::yield_now();
    }

    let syncer = {
        let scheme = scheme.clone();
        let done = done.clone();
        thread::spawn(move || {
            scheme.sync();
            done.store(true, Ordering::Release);
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::Acquire));

    release.store(true, Ordering::Release);
    reader.join().unwrap();
    syncer.join().unwrap();
    assert!(done.load(Ordering::Acquire));
}

#[test]
fn test_gdump_sync_blocks_on_prior_reader() {
    sync_blocks_on_prior_reader(GenDump::new());
}

#[test]
fn test_ebr_sync_blocks_on_prior_reader() {
    sync_blocks_on_prior_reader(Ebr::new());
}

#[test]
fn test_gdump_sync_returns_when_idle() {
    let scheme = GenDump::new();
    let _idle = scheme.register();
    scheme.sync();
}

#[test]
fn test_ebr_sync_returns_when_idle() {
    let scheme = Ebr::new();
    let _idle = scheme.register();
    scheme.sync();
}

/// Readers chase a shared pointer under their critical sections while the
/// writer swaps it out, syncs, and frees the detached node directly.
fn sync_then_free_directly<S>(scheme: S)
where
    S: Smr + Send + 'static,
    S::Local: SmrLocal + Send + 'static,
{
    const READERS: usize = 4;
    const SWAPS: usize = 2000;

    let drops = Arc::new(AtomicUsize::new(0));
    let shared = Arc::new(AtomicPtr::new(ValueNode::new(0, &drops)));
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = vec![];

    for _ in 0..READERS {
        let scheme = scheme.clone();
        let shared = shared.clone();
        let stop = stop.clone();

        handles.push(thread::spawn(move || {
            let local = scheme.register();
            while !stop.load(Ordering::Acquire) {
                let guard = local.pin();
                let ptr = shared.load(Ordering::Acquire);
                if let Some(node) = unsafe { ptr.as_ref() } {
                    let _ = node.value;
                }
                drop(guard);
            }
        }));
    }

    for i in 1..=SWAPS {
        let old = shared.swap(ValueNode::new(i, &drops), Ordering::AcqRel);
        scheme.sync();
        // Every reader that could have loaded `old` has left its
        // critical section: no retire needed.
        unsafe { drop(Box::from_raw(old)) };
    }

    stop.store(true, Ordering::Release);
    for handle in handles {
        handle.join().unwrap();
    }

    let last = shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
    unsafe { drop(Box::from_raw(last)) };
    assert_eq!(drops.load(Ordering::Relaxed), SWAPS + 1);
}

#[test]
fn test_gdump_sync_then_free_directly() {
    sync_then_free_directly(GenDump::new());
}

#[test]
fn test_ebr_sync_then_free_directly() {
    sync_then_free_directly(Ebr::new());
}
