//! Process-wide VM instance state
//!
//! The instance owns everything shared across mutator threads: the thread
//! registry, the GC rendezvous counters, the callsite interning store, and
//! the identifier interner.

use super::callsite::CallsiteStore;
use super::interner::{Interner, Symbol};
use super::thread::{GcStatus, ThreadContext};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide VM state shared by every mutator thread.
pub struct VmInstance {
    /// Registry of every attached mutator thread. The mutex is held only to
    /// snapshot membership, so attaches stay cheap.
    pub(crate) threads: Mutex<Vec<Arc<ThreadContext>>>,

    /// Source of thread identifiers.
    next_thread_id: AtomicU32,

    /// Monotone collection cycle counter. Incremented exactly once per
    /// cycle, inside the coordinator election winner.
    pub(crate) gc_seq_number: AtomicU64,

    /// Number of threads enlisted so far in the in-flight cycle.
    pub(crate) starting_gc: AtomicU32,

    /// Enlistment target of the in-flight cycle; zero between cycles, which
    /// makes it double as the coordinator election flag.
    pub(crate) expected_gc_threads: AtomicU32,

    /// Running total of nursery bytes discarded by collections.
    pub(crate) gc_reclaimed_bytes: AtomicU64,

    /// Interning store for callsite descriptors.
    callsites: CallsiteStore,

    /// Identifier interner.
    symbols: Mutex<Interner>,
}

impl VmInstance {
    /// Create an instance with the common callsites already interned.
    pub fn new() -> Arc<VmInstance> {
        let instance = VmInstance {
            threads: Mutex::new(Vec::new()),
            next_thread_id: AtomicU32::new(1),
            gc_seq_number: AtomicU64::new(0),
            starting_gc: AtomicU32::new(0),
            expected_gc_threads: AtomicU32::new(0),
            gc_reclaimed_bytes: AtomicU64::new(0),
            callsites: CallsiteStore::new(),
            symbols: Mutex::new(Interner::new()),
        };
        instance.callsites.initialize_common();
        Arc::new(instance)
    }

    /// Register a new mutator thread and hand back its context.
    pub fn attach_thread(&self) -> Arc<ThreadContext> {
        let thread_id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        let tc = Arc::new(ThreadContext::new(thread_id));
        self.threads.lock().push(Arc::clone(&tc));
        tc
    }

    /// Remove a mutator thread from the registry. The thread must be out of
    /// any GC cycle; detaching mid-handshake would strand the rendezvous.
    pub fn detach_thread(&self, tc: &Arc<ThreadContext>) {
        assert_eq!(
            tc.gc_status(),
            GcStatus::None,
            "thread must leave the GC protocol before detaching"
        );
        self.threads.lock().retain(|other| !Arc::ptr_eq(other, tc));
    }

    /// Number of attached mutator threads.
    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }

    /// The callsite interning store.
    pub fn callsites(&self) -> &CallsiteStore {
        &self.callsites
    }

    /// The identifier interner.
    pub fn symbols(&self) -> &Mutex<Interner> {
        &self.symbols
    }

    /// Intern an identifier through the instance's interner.
    pub fn intern_symbol(&self, name: &str) -> Symbol {
        self.symbols.lock().intern(name)
    }

    /// Completed-cycle counter.
    pub fn gc_seq_number(&self) -> u64 {
        self.gc_seq_number.load(Ordering::SeqCst)
    }

    /// Threads enlisted so far in the in-flight cycle; zero between cycles.
    pub fn starting_gc(&self) -> u32 {
        self.starting_gc.load(Ordering::SeqCst)
    }

    /// Enlistment target of the in-flight cycle; zero between cycles.
    pub fn expected_gc_threads(&self) -> u32 {
        self.expected_gc_threads.load(Ordering::SeqCst)
    }

    /// Total nursery bytes discarded by collections so far.
    pub fn gc_reclaimed_bytes(&self) -> u64 {
        self.gc_reclaimed_bytes.load(Ordering::Relaxed)
    }
}
