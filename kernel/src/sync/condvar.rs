// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements condition variables over the kernel mutex.

use crate::mutex::{Mutex, MutexGuard};
use interrupts::{begin_atomic, end_atomic, with_atomic};
use multitasking::{set_preemption_disabled, wait, wake_up, wake_up_one, WaitQueue};

/// A condition variable.
///
/// A condition carries no state of its own beyond its wait
/// queue; it is always used together with a caller-supplied
/// [`Mutex`] protecting the condition's data.
///
pub struct Condition {
    wait_queue: WaitQueue,
}

impl Condition {
    /// Returns a new condition variable with no waiters.
    ///
    pub fn new() -> Self {
        Condition {
            wait_queue: WaitQueue::new(),
        }
    }

    /// Atomically releases the mutex held through `guard`
    /// and waits on the condition, re-acquiring the mutex
    /// once woken.
    ///
    /// Releasing the lock and joining the wait queue happen
    /// with preemption disabled, so no other thread can
    /// take the mutex and signal before this thread is
    /// waiting; the notification cannot be missed.
    ///
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        debug_assert!(!interrupts::in_atomic_section());

        let mutex: &'a Mutex<T> = guard.into_mutex();

        // Turn off scheduling, then release the mutex. No
        // other thread can run until we are on the wait
        // queue.
        set_preemption_disabled(true);
        mutex.unlock_internal();

        // Atomically re-enable preemption and wait in the
        // condition's wait queue. On wakeup, restore the
        // preemption gate.
        let token = begin_atomic();
        set_preemption_disabled(false);
        wait(&self.wait_queue);
        set_preemption_disabled(true);
        end_atomic(token);

        // Reacquire the mutex, then turn scheduling back
        // on.
        mutex.lock_internal();
        set_preemption_disabled(false);

        mutex.guard()
    }

    /// Wakes one thread waiting on the condition.
    ///
    /// The mutex paired with the condition should be held.
    ///
    pub fn signal(&self) {
        debug_assert!(!interrupts::in_atomic_section());
        with_atomic(|| wake_up_one(&self.wait_queue));
    }

    /// Wakes every thread waiting on the condition.
    ///
    /// The mutex paired with the condition should be held.
    ///
    pub fn broadcast(&self) {
        debug_assert!(!interrupts::in_atomic_section());
        with_atomic(|| wake_up(&self.wait_queue));
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::new()
    }
}
