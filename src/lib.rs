//! Quiesce: pluggable safe memory reclamation for lock-free data structures
//!
//! Quiesce decouples *when* a node becomes unreachable from *when* its
//! memory is destroyed. Readers bracket their accesses with critical
//! sections, writers retire unlinked nodes to the scheme, and recycle
//! passes destroy exactly those nodes that no reader can still hold.
//!
//! # Key Features
//!
//! - **Two schemes, one interface**: generation-dump ([`GenDump`]) and
//!   epoch-based ([`Ebr`]) reclamation behind the [`Smr`]/[`SmrLocal`]
//!   traits
//! - **Wait-free critical sections**: enter and exit touch only the
//!   calling thread's own record
//! - **Batched retirement**: a per-thread buffer turns bursts of
//!   retirements into a single list splice
//! - **Pluggable registry lock**: spin, reader-writer, or none at all
//!   via [`RegistryLock`]
//!
//! # Example
//!
//! ```rust,ignore
//! use quiesce::{GenDump, RetiredNode, Smr, SmrLocal};
//!
//! #[repr(C)]
//! struct Node {
//!     retired: RetiredNode,
//!     value: u64,
//! }
//!
//! let scheme = GenDump::new();
//! let local = scheme.register();
//!
//! let node = Box::into_raw(Box::new(Node {
//!     retired: RetiredNode::new(),
//!     value: 7,
//! }));
//!
//! {
//!     let _guard = local.pin();
//!     // dereference shared pointers here
//! }
//!
//! // after unlinking `node` from the structure:
//! unsafe { local.retire_boxed(node) };
//!
//! // a later pass destroys it once no reader can still hold it
//! scheme.recycle();
//! ```

#![warn(missing_docs)]

extern crate alloc;

mod node;
mod list;
mod lock;
mod registry;
mod smr;
mod epoch;
mod generation;
mod cleaner;

pub use node::{DestroyFn, RetiredNode};
pub use lock::{RegistryLock, RwSpin, Spin, Unlocked};
pub use smr::{Guard, Smr, SmrLocal};
pub use epoch::{Ebr, EbrLocal};
pub use generation::{GenDump, GenDumpLocal};
pub use cleaner::Cleaner;

pub use list::RETIRE_BUFFER_CAP;
#[cfg(not(feature = "dyn-registry"))]
pub use registry::MAX_THREADS;

// Re-export for convenience
pub use core::sync::atomic::Ordering;
