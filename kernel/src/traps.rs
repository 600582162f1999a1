// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Terminates processes that trap.
//!
//! A general-protection fault, stack exception, or page fault raised
//! from user privilege kills the offending process with exit code -1;
//! its siblings continue untouched. The same faults in kernel mode are
//! kernel bugs and panic in the interrupts crate.

use serial::println;

/// Installs the kernel's fault and syscall handlers.
///
pub fn init() {
    interrupts::set_fault_handler(fault_handler);
    interrupts::set_syscall_handler(crate::syscall::dispatch);
}

/// Handles a fault a process can cause.
///
fn fault_handler(vector: u8, error_code: u64, from_user: bool) {
    if !from_user {
        // Returning tells the interrupts crate to treat
        // this as a kernel bug.
        return;
    }

    let current = multitasking::current_thread();
    println!(
        "Exception {} (error code {:#x}) received, killing {}",
        vector,
        error_code,
        current.id()
    );
    drop(current);

    // Send the thread to the reaper. We never get here
    // for kernel threads, so the exit cannot tear down
    // kernel state.
    multitasking::exit(-1);
}
