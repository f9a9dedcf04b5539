//! Vireo VM core runtime
//!
//! This module provides the pieces of the runtime shared by every mutator
//! thread:
//! - Callsite descriptors and their interning store (`callsite` module)
//! - The index hash table used for identifier interning (`index_hash` and
//!   `interner` modules)
//! - Per-thread state and the stop-the-world GC orchestration (`thread`,
//!   `instance`, and `gc` modules)

pub mod callsite;
pub mod gc;
pub mod index_hash;
pub mod instance;
pub mod interner;
pub mod thread;

pub use callsite::{
    get_common, is_common, ArgFlag, Callsite, CallsiteError, CallsiteStore, CommonCallsite,
    ARITY_LIMIT, NUM_COMMON_CALLSITES,
};
pub use gc::Nursery;
pub use index_hash::IndexHash;
pub use instance::VmInstance;
pub use interner::{Interner, Symbol};
pub use thread::{GcStatus, ThreadContext};
