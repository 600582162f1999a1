// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements preemptive multitasking, using independent threads of execution.
//!
//! This crate allows the kernel to start an arbitrary number of threads,
//! preemptively scheduling between them under one of two interchangeable
//! policies. Threads can block on wait queues, be woken, exit, and be
//! joined by their creators.
//!
//! ## Initialisation
//!
//! [`init`] turns the kernel's boot flow of control into the initial
//! thread, then starts the two housekeeping threads: the idle thread,
//! which guarantees that a runnable thread always exists, and the
//! reaper, which reclaims the stacks and metadata of exited threads.
//!
//! ## Manipulating threads
//!
//! Kernel threads start with [`start_kernel_thread`]; user processes
//! start with [`start_user_thread`], which takes the process's user
//! context. A running thread may give up the CPU with
//! [`yield_now`](scheduler::yield_now), block with
//! [`wait`](scheduler::wait), terminate with [`exit`], or be preempted
//! when it exhausts its quantum. A joinable thread's creator collects
//! its exit code with [`join`].
//!
//! Calling [`debug`] will print the scheduling state of every thread.

#![no_std]

extern crate alloc;

mod queues;
mod reaper;
mod scheduler;
mod switch;
mod thread;
mod tlocal;

pub use queues::{ThreadQueue, WaitQueue};
pub use scheduler::{
    make_runnable, make_runnable_atomic, policy, preempt, preemption_disabled, quantum, ready,
    request_reschedule, schedule, set_preemption_disabled, set_scheduling_policy, timer_tick,
    wait, wake_up, wake_up_one, yield_now, DEFAULT_QUANTUM, RUN_QUEUE_LEVELS,
};
pub use thread::{
    current_thread, debug, exit, join, lookup, start_kernel_thread, start_user_thread, Thread,
    ThreadId, PRIORITY_HIGH, PRIORITY_IDLE, PRIORITY_LOW, PRIORITY_NORMAL, PRIORITY_USER,
};
pub use tlocal::{
    tlocal_create, tlocal_get, tlocal_put, TlocalDestructor, TlocalKey, MAX_TLOCAL_KEYS,
};

use ember_abi::Error;
use interrupts::with_atomic;

/// Initialise the thread scheduler, making the boot flow
/// of control the initial thread and starting the idle and
/// reaper threads.
///
/// After `init` returns, timer interrupts may preempt the
/// running thread whenever its quantum expires.
///
pub fn init() -> Result<(), Error> {
    // Create the initial thread context and make it
    // current.
    let initial = thread::Thread::create_initial_thread();
    with_atomic(|| {
        thread::THREADS.lock().insert(initial.id(), initial.clone());
        *thread::CURRENT_THREAD.lock() = Some(initial);
    });

    scheduler::mark_ready();

    // Create the idle thread.
    let idle = start_kernel_thread(scheduler::idle_loop, 0, PRIORITY_IDLE, true)?;
    scheduler::set_idle_thread(idle.id());

    // Create the reaper thread.
    start_kernel_thread(reaper::reaper_loop, 0, PRIORITY_NORMAL, true)?;

    Ok(())
}
