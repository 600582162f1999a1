// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the reaper thread, which disposes of exited threads.
//!
//! An exiting thread cannot free its own stack: it is still standing on
//! it. Instead, when a thread's last reference is dropped, the thread is
//! enqueued on the graveyard and the reaper woken. The reaper drains the
//! graveyard atomically, then destroys each corpse with interrupts
//! enabled, keeping memory release off the critical path of the exiting
//! thread.

use crate::queues::{ThreadQueue, WaitQueue};
use crate::scheduler;
use crate::thread::{ThreadId, THREADS};
use interrupts::{in_atomic_section, with_atomic};
use lazy_static::lazy_static;
use x86_64::instructions::interrupts as irqctl;

lazy_static! {
    /// The queue of finished threads needing disposal.
    ///
    static ref GRAVEYARD: spin::Mutex<ThreadQueue> = spin::Mutex::new(ThreadQueue::new());

    /// The wait queue used by exited threads to signal the
    /// reaper.
    ///
    static ref REAPER_WAIT: WaitQueue = WaitQueue::new();
}

/// Hands the given thread to the reaper for destruction.
/// Must be called inside an atomic section.
///
pub(crate) fn reap_thread(thread: ThreadId) {
    debug_assert!(in_atomic_section());

    GRAVEYARD.lock().push(thread);
    scheduler::wake_up(&REAPER_WAIT);
}

/// Destroys the given thread, reclaiming its resources.
///
/// Called with interrupts enabled. Dropping the table's
/// reference frees the stack frame and releases the user
/// context, if this was its last thread.
///
fn destroy_thread(thread: ThreadId) {
    let corpse = with_atomic(|| THREADS.lock().remove(&thread));
    drop(corpse);
}

/// The body of the reaper thread.
///
pub(crate) fn reaper_loop(_arg: u64) {
    irqctl::disable();

    loop {
        // See if there are any threads needing disposal.
        let corpses = GRAVEYARD.lock().drain();
        if corpses.is_empty() {
            // The graveyard is empty, so wait for a
            // thread to die.
            scheduler::wait(&REAPER_WAIT);
            continue;
        }

        // We have emptied the graveyard, so we can
        // re-enable interrupts while we dispose of the
        // dead threads.
        irqctl::enable();
        scheduler::yield_now();

        for corpse in corpses {
            destroy_thread(corpse);
        }

        irqctl::disable();
    }
}
