//! Stop-the-world collection orchestration
//!
//! Mutator threads rendezvous for a nursery collection through three shared
//! atomics on the instance plus one status word per thread:
//!
//! - `expected_gc_threads` is the enlistment target of the in-flight cycle
//!   and, because it is zero between cycles, the coordinator election flag.
//! - `starting_gc` counts enlisted threads.
//! - each thread's `gc_status` records whether it is running, interrupted,
//!   blocked in native code, or had its roots stolen while blocked.
//!
//! The thread whose allocation fails first wins the election and drives the
//! cycle: it counts the registered threads, signals each of them, waits for
//! full enlistment, collects, and clears the counters. Running threads
//! enlist themselves at their next safepoint; blocked threads are enlisted
//! on their behalf by the coordinator, which marks them stolen and collects
//! their nurseries for them. A cycle is never cancelled; it runs to
//! completion once the election is won.

use crate::vm::instance::VmInstance;
use crate::vm::thread::{GcStatus, ThreadContext};
use std::hint;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

/// Allocate from the thread's nursery, entering a collection cycle when the
/// nursery is exhausted.
///
/// The returned pointer is valid until the thread's next collection. A
/// request that still does not fit a freshly collected nursery is fatal.
pub fn allocate(instance: &VmInstance, tc: &ThreadContext, size: usize, align: usize) -> *mut u8 {
    if let Some(ptr) = tc.nursery().lock().try_alloc(size, align) {
        return ptr;
    }

    enter_from_allocator(instance, tc);

    match tc.nursery().lock().try_alloc(size, align) {
        Some(ptr) => ptr,
        None => panic!("allocation of {size} bytes exceeds nursery capacity"),
    }
}

/// Safepoint poll: enlist in an in-flight collection cycle if a coordinator
/// asked us to. Cheap enough for interpreter loop back-edges.
#[inline(always)]
pub fn safepoint(instance: &VmInstance, tc: &ThreadContext) {
    if tc.gc_status() == GcStatus::Interrupt {
        enlist_at_safepoint(instance, tc);
    }
}

#[cold]
#[inline(never)]
fn enlist_at_safepoint(instance: &VmInstance, tc: &ThreadContext) {
    enter_from_interrupt(instance, tc);
}

/// Run a collection cycle from the allocator slow path.
///
/// Exactly one caller per cycle wins the election and becomes the
/// coordinator; every other caller participates as if interrupted. The
/// context must be attached to `instance`, or the rendezvous count will
/// never be met.
pub fn enter_from_allocator(instance: &VmInstance, tc: &ThreadContext) {
    let threads = instance.threads.lock();
    let expected = threads.len() as u32;

    if instance
        .expected_gc_threads
        .compare_exchange(0, expected, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        // Won the election; we are the coordinator for this cycle.
        instance.gc_seq_number.fetch_add(1, Ordering::SeqCst);
        instance.starting_gc.fetch_add(1, Ordering::SeqCst);

        let mut stolen: Vec<Arc<ThreadContext>> = Vec::new();
        for other in threads
            .iter()
            .filter(|other| other.thread_id() != tc.thread_id())
        {
            if signal_one_thread(instance, other) {
                stolen.push(Arc::clone(other));
            }
        }
        // Release the registry before the rendezvous so new threads can keep
        // spawning; they were not counted and sit this cycle out.
        drop(threads);

        wait_for_enlistment(instance);
        collect_nursery(instance, tc);
        for blocked in &stolen {
            collect_nursery(instance, blocked);
            if let Err(observed) = blocked.cas_gc_status(GcStatus::Stolen, GcStatus::Unable) {
                panic!(
                    "stolen thread {} changed GC status to {:?} mid-cycle",
                    blocked.thread_id(),
                    observed
                );
            }
        }

        instance.starting_gc.store(0, Ordering::SeqCst);
        instance.expected_gc_threads.store(0, Ordering::SeqCst);
    } else {
        drop(threads);
        // Lost the election. If the winner's census counted us it will
        // signal us, so wait for the interrupt and take the usual
        // interrupted path; if we attached after the census, wait out the
        // in-flight cycle and try again.
        loop {
            if tc.gc_status() == GcStatus::Interrupt {
                enter_from_interrupt(instance, tc);
                return;
            }
            if instance.expected_gc_threads.load(Ordering::SeqCst) == 0 {
                enter_from_allocator(instance, tc);
                return;
            }
            hint::spin_loop();
        }
    }
}

/// Participate in the in-flight cycle as an interrupted thread: enlist, wait
/// for the full rendezvous, collect the local nursery, and return to the
/// running state.
pub fn enter_from_interrupt(instance: &VmInstance, tc: &ThreadContext) {
    instance.starting_gc.fetch_add(1, Ordering::SeqCst);
    wait_for_enlistment(instance);
    collect_nursery(instance, tc);

    if let Err(observed) = tc.cas_gc_status(GcStatus::Interrupt, GcStatus::None) {
        panic!(
            "thread {} finished GC participation in status {:?}",
            tc.thread_id(),
            observed
        );
    }
}

/// Bracket a call that may block in native code: leave the GC protocol so an
/// in-flight cycle does not wait on us.
pub fn mark_thread_blocked(instance: &VmInstance, tc: &ThreadContext) {
    loop {
        match tc.cas_gc_status(GcStatus::None, GcStatus::Unable) {
            Ok(()) => return,
            // A coordinator got to us first; finish that cycle, then block.
            Err(GcStatus::Interrupt) => enter_from_interrupt(instance, tc),
            Err(observed) => panic!(
                "cannot block thread {} while in GC status {:?}",
                tc.thread_id(),
                observed
            ),
        }
    }
}

/// Return from a native call. If a cycle stole this thread's roots, wait for
/// the coordinator to hand them back rather than re-entering the running
/// state mid-cycle.
pub fn mark_thread_unblocked(tc: &ThreadContext) {
    while tc.cas_gc_status(GcStatus::Unable, GcStatus::None).is_err() {
        thread::yield_now();
    }
}

/// Ask one registered thread to take part in the cycle. Returns true when
/// the thread was blocked and enlisted on its behalf.
fn signal_one_thread(instance: &VmInstance, target: &ThreadContext) -> bool {
    loop {
        // Running: it will enlist itself at its next safepoint.
        if target
            .cas_gc_status(GcStatus::None, GcStatus::Interrupt)
            .is_ok()
        {
            return false;
        }
        // Blocked in native code: claim its roots and count it ourselves.
        if target
            .cas_gc_status(GcStatus::Unable, GcStatus::Stolen)
            .is_ok()
        {
            instance.starting_gc.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        // The target raced between running and blocked; try again.
        hint::spin_loop();
    }
}

/// Spin until every counted thread has enlisted.
fn wait_for_enlistment(instance: &VmInstance) {
    let mut backoff = 1;
    loop {
        let expected = instance.expected_gc_threads.load(Ordering::SeqCst);
        let starting = instance.starting_gc.load(Ordering::SeqCst);
        if starting == expected {
            return;
        }
        for _ in 0..backoff {
            hint::spin_loop();
        }
        backoff = (backoff * 2).min(1024);
    }
}

/// Local nursery collection for one enlisted thread.
fn collect_nursery(instance: &VmInstance, tc: &ThreadContext) {
    let reclaimed = tc.nursery().lock().reset();
    instance
        .gc_reclaimed_bytes
        .fetch_add(reclaimed as u64, Ordering::Relaxed);
}
