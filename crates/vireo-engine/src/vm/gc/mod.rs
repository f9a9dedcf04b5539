//! Garbage collection: nursery allocation and stop-the-world orchestration
//!
//! The VM uses a generational scheme. Each mutator thread bump-allocates
//! young objects from its own nursery; when a nursery runs out, every thread
//! rendezvous for a stop-the-world nursery collection driven by a single
//! elected coordinator.

pub mod nursery;
pub mod orchestrate;

pub use nursery::Nursery;
pub use orchestrate::{
    allocate, enter_from_allocator, enter_from_interrupt, mark_thread_blocked,
    mark_thread_unblocked, safepoint,
};
