//! Per-mutator thread state
//!
//! Each mutator thread owns a [`ThreadContext`]: its GC status word and its
//! nursery. The status word is the handshake point of the stop-the-world
//! protocol; every transition goes through a compare-and-swap so that a
//! signalling coordinator and a self-transitioning thread serialize cleanly.

use super::gc::Nursery;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// A mutator thread's position in the GC protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcStatus {
    /// Running normally; no collection pending for this thread.
    None = 0,
    /// A coordinator asked this thread to enlist at its next safepoint.
    Interrupt = 1,
    /// The thread is blocked in native code and cannot reach a safepoint.
    Unable = 2,
    /// A coordinator claimed a blocked thread's roots for the current cycle.
    Stolen = 3,
}

impl GcStatus {
    fn from_u8(raw: u8) -> GcStatus {
        match raw {
            0 => GcStatus::None,
            1 => GcStatus::Interrupt,
            2 => GcStatus::Unable,
            3 => GcStatus::Stolen,
            other => panic!("invalid gc status word: {other}"),
        }
    }
}

/// Per-thread mutator record.
pub struct ThreadContext {
    /// Identifier assigned at attach time, unique within the instance.
    thread_id: u32,

    /// Status word for the stop-the-world handshake.
    gc_status: AtomicU8,

    /// This thread's nursery. Lockable from outside the owner because the
    /// coordinator collects stolen threads' nurseries on their behalf.
    nursery: Mutex<Nursery>,
}

impl ThreadContext {
    pub(crate) fn new(thread_id: u32) -> ThreadContext {
        ThreadContext {
            thread_id,
            gc_status: AtomicU8::new(GcStatus::None as u8),
            nursery: Mutex::new(Nursery::new()),
        }
    }

    /// Identifier assigned at attach time.
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// Current GC status.
    pub fn gc_status(&self) -> GcStatus {
        GcStatus::from_u8(self.gc_status.load(Ordering::Acquire))
    }

    /// Transition the status word from `from` to `to`. On failure returns the
    /// status actually observed.
    pub(crate) fn cas_gc_status(&self, from: GcStatus, to: GcStatus) -> Result<(), GcStatus> {
        self.gc_status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(GcStatus::from_u8)
    }

    /// This thread's nursery.
    pub fn nursery(&self) -> &Mutex<Nursery> {
        &self.nursery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_thread_is_running() {
        let tc = ThreadContext::new(7);
        assert_eq!(tc.thread_id(), 7);
        assert_eq!(tc.gc_status(), GcStatus::None);
    }

    #[test]
    fn test_cas_transitions() {
        let tc = ThreadContext::new(0);

        assert!(tc.cas_gc_status(GcStatus::None, GcStatus::Unable).is_ok());
        assert_eq!(tc.gc_status(), GcStatus::Unable);

        assert!(tc.cas_gc_status(GcStatus::Unable, GcStatus::Stolen).is_ok());
        assert_eq!(tc.gc_status(), GcStatus::Stolen);
    }

    #[test]
    fn test_failed_cas_reports_observed_status() {
        let tc = ThreadContext::new(0);

        let err = tc.cas_gc_status(GcStatus::Interrupt, GcStatus::None);
        assert_eq!(err, Err(GcStatus::None));
        assert_eq!(tc.gc_status(), GcStatus::None);
    }
}
