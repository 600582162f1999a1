// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel's blocking synchronization primitives.
//!
//! Unlike disabling interrupts, these primitives offer no protection
//! against concurrent execution of interrupt handlers. They are for use
//! by kernel threads, with interrupts enabled.
//!
//! - [`Mutex`] is a blocking mutual-exclusion lock with an owner. Its
//!   operations run with preemption disabled but interrupts enabled,
//!   except for the brief sleep while the lock is contended. Re-entrant
//!   locking is a bug and is detected.
//! - [`Condition`] is a condition variable, always paired with a
//!   caller-supplied mutex.
//! - [`semaphore`] provides named counting semaphores with per-thread
//!   registration controlling who may operate on them.

#![no_std]

extern crate alloc;

mod condvar;
mod mutex;
pub mod semaphore;

pub use condvar::Condition;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{
    create_semaphore, destroy_semaphore, p, v, SemaphoreId, MAX_REGISTERED_THREADS,
    MAX_SEMAPHORE_NAME,
};
