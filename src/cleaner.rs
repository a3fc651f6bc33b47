//! Background recycling.
//!
//! A [`Cleaner`] owns a thread that periodically runs [`Smr::recycle`]
//! on a scheme handle until it is stopped. It exists so that programs
//! with bursty retirement do not have to weave recycle calls into their
//! hot paths; the shared retire list stays bounded as long as the
//! cleaner keeps up.

use crate::smr::Smr;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a background recycler thread.
///
/// The thread runs one recycle pass immediately, then one per interval.
/// [`stop`](Cleaner::stop) shuts it down and reports how many nodes it
/// destroyed over its lifetime; dropping the handle shuts it down too,
/// discarding the count.
#[must_use = "the recycler stops as soon as the handle is dropped"]
pub struct Cleaner {
    handle: Option<JoinHandle<usize>>,
    stop: Arc<AtomicBool>,
}

impl Cleaner {
    /// Spawn a recycler over a clone of `scheme`, sleeping `interval`
    /// between passes.
    ///
    /// The thread never enters a critical section of its own, so it
    /// needs no registration. With an epoch scheme its passes block on
    /// lagging critical sections, which only delays cleanup; with a
    /// generation scheme they never block.
    pub fn spawn<S>(scheme: S, interval: Duration) -> Self
    where
        S: Smr + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("smr-cleaner".into())
            .spawn(move || {
                let mut freed = 0usize;
                while !thread_stop.load(Ordering::Acquire) {
                    freed += scheme.recycle();
                    thread::sleep(interval);
                }
                // Catch retirements that raced with shutdown.
                freed + scheme.recycle()
            })
            .expect("failed to spawn the recycler thread");
        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Stop the recycler, run one final pass on its thread, and return
    /// the total number of nodes it destroyed.
    pub fn stop(mut self) -> usize {
        self.stop.store(true, Ordering::Release);
        match self.handle.take() {
            Some(handle) => handle.join().expect("recycler thread panicked"),
            None => 0,
        }
    }
}

impl Drop for Cleaner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Release);
            // Swallow a panic from the recycler rather than aborting by
            // panicking during unwind.
            let _ = handle.join();
        }
    }
}
