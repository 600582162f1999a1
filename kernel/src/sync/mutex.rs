// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel's blocking mutex.
//!
//! The locking discipline disables preemption, not interrupts: while a
//! mutex operation is manipulating the lock state, the timer may tick
//! but cannot switch threads, so no other thread can observe the state
//! mid-change. When the lock is contended, the waiter atomically
//! re-enables preemption and sleeps on the mutex's wait queue; unlocking
//! wakes the highest-priority waiter.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use interrupts::{begin_atomic, end_atomic, with_atomic};
use multitasking::{
    current_thread, preemption_disabled, set_preemption_disabled, wait, wake_up_one, WaitQueue,
};

/// A mutual exclusion lock protecting a value of type `T`.
///
/// Locking returns a [`MutexGuard`]; the lock is released
/// when the guard drops. Only the owning thread may
/// release the lock, and a thread that tries to re-acquire
/// a mutex it already holds is a bug, caught by assertion
/// in debug builds.
///
pub struct Mutex<T> {
    locked: AtomicBool,

    // The id of the owning thread, or 0 when unlocked.
    // locked is true if and only if owner is non-zero.
    owner: AtomicU64,

    wait_queue: WaitQueue,
    value: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Returns a new, unlocked mutex protecting `value`.
    ///
    pub fn new(value: T) -> Self {
        Mutex {
            locked: AtomicBool::new(false),
            owner: AtomicU64::new(0),
            wait_queue: WaitQueue::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the mutex, blocking until it is available,
    /// and returns a guard granting access to the value.
    ///
    pub fn lock(&self) -> MutexGuard<'_, T> {
        debug_assert!(!interrupts::in_atomic_section());

        set_preemption_disabled(true);
        self.lock_internal();
        set_preemption_disabled(false);

        MutexGuard { mutex: self }
    }

    /// Returns whether the current thread holds the lock.
    ///
    pub fn is_held(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
            && self.owner.load(Ordering::SeqCst) == current_thread().id().as_u64()
    }

    /// The mutex is locked by someone else. Atomically
    /// re-enable preemption and sleep on the wait queue;
    /// on waking, restore the preemption gate.
    ///
    fn wait_for_unlock(&self) {
        debug_assert!(self.locked.load(Ordering::SeqCst));
        debug_assert!(preemption_disabled());

        let token = begin_atomic();
        set_preemption_disabled(false);
        wait(&self.wait_queue);
        set_preemption_disabled(true);
        end_atomic(token);
    }

    /// Acquires the lock state. Preemption must already be
    /// disabled.
    ///
    pub(crate) fn lock_internal(&self) {
        debug_assert!(preemption_disabled());

        // Make sure we're not already holding the mutex:
        // the condition variable wait relies on unlocking
        // releasing the lock completely, so re-entry can
        // never be made to work.
        debug_assert!(!self.is_held(), "re-entrant mutex lock");

        // Wait until the mutex is in an unlocked state.
        while self.locked.load(Ordering::SeqCst) {
            self.wait_for_unlock();
        }

        // Now it's ours.
        self.locked.store(true, Ordering::SeqCst);
        self.owner
            .store(current_thread().id().as_u64(), Ordering::SeqCst);
    }

    /// Releases the lock state. Preemption must already be
    /// disabled.
    ///
    pub(crate) fn unlock_internal(&self) {
        debug_assert!(preemption_disabled());

        // Make sure the mutex was actually acquired by
        // this thread.
        debug_assert!(self.is_held(), "mutex unlocked by a thread that does not hold it");

        self.locked.store(false, Ordering::SeqCst);
        self.owner.store(0, Ordering::SeqCst);

        // If there are threads waiting to acquire the
        // mutex, wake one of them up. It is legal to
        // inspect the queue with interrupts enabled
        // because preemption is disabled, so no thread can
        // concurrently add itself.
        with_atomic(|| {
            if !self.wait_queue.is_empty() {
                wake_up_one(&self.wait_queue);
            }
        });
    }

    /// Builds a guard for a mutex whose lock state the
    /// caller has already acquired with
    /// [`lock_internal`](Self::lock_internal).
    ///
    pub(crate) fn guard(&self) -> MutexGuard<'_, T> {
        debug_assert!(self.is_held());
        MutexGuard { mutex: self }
    }
}

/// Grants access to the value protected by a [`Mutex`],
/// releasing the lock when dropped.
///
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<'a, T> MutexGuard<'a, T> {
    /// Releases the guard without unlocking the mutex.
    /// Used by the condition variable, which unlocks the
    /// mutex itself.
    ///
    pub(crate) fn into_mutex(self) -> &'a Mutex<T> {
        let mutex = self.mutex;
        core::mem::forget(self);
        mutex
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        set_preemption_disabled(true);
        self.mutex.unlock_internal();
        set_preemption_disabled(false);
    }
}
