//! Vireo VM Core Runtime
//!
//! This crate provides the shared runtime core of the Vireo virtual machine:
//! - **Callsite interning**: deduplicated call-shape descriptors with
//!   derivation operators (`vm::callsite`)
//! - **Identifier hashing**: a compact Robin-Hood index hash and the string
//!   interner built on it (`vm::index_hash`, `vm::interner`)
//! - **GC orchestration**: the stop-the-world rendezvous protocol for
//!   generational nursery collection (`vm::gc`, `vm::thread`,
//!   `vm::instance`)
//!
//! # Example
//!
//! ```rust,ignore
//! use vireo_engine::{gc, VmInstance};
//!
//! let instance = VmInstance::new();
//! let tc = instance.attach_thread();
//!
//! // Allocation enters a collection cycle when the nursery fills.
//! let ptr = gc::allocate(&instance, &tc, 64, 8);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// VM module: callsites, identifier interning, GC, and per-thread state
pub mod vm;

pub use vm::{
    gc, get_common, is_common, ArgFlag, Callsite, CallsiteError, CallsiteStore, CommonCallsite,
    GcStatus, IndexHash, Interner, Symbol, ThreadContext, VmInstance, ARITY_LIMIT,
    NUM_COMMON_CALLSITES,
};
