// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! switch contains the functionality to switch between threads.
//!
//! This is the architecture-specific residue of the scheduler, with a
//! narrow contract: given pointers to the outgoing and incoming threads'
//! saved stack pointer cells, save the callee-saved state on the current
//! stack, swap stacks, and resume whatever the incoming stack describes.
//! New threads' stacks are prebuilt so that "resuming" them enters a
//! launch stub.

use core::arch::global_asm;

global_asm!(include_str!("switch.s"));

// The following functions are implemented in switch.s.
//
extern "sysv64" {
    /// switch_stack replaces the current stack with a new
    /// stack, using the System V ABI. Its last action is
    /// to start executing the new thread.
    ///
    /// switch_stack takes a pointer to each thread's saved
    /// stack pointer cell.
    ///
    pub fn switch_stack(current_stack_pointer: *mut u64, new_stack_pointer: *const u64);

    /// launch_kernel_thread starts a new kernel thread by
    /// being the address "returned to" by switch_stack.
    ///
    /// It enables interrupts, then pops the thread's entry
    /// point and argument from the stack and makes the
    /// call. If the entry point returns, the thread exits
    /// cleanly with code 0 via kernel_thread_exit.
    ///
    pub fn launch_kernel_thread() -> !;

    /// launch_user_thread starts a new user process by
    /// being the address "returned to" by switch_stack.
    ///
    /// It pops the argument block address into `rsi` and
    /// the user data selector into the data segment
    /// registers, then irets into the prebuilt
    /// user-privilege frame.
    ///
    pub fn launch_user_thread() -> !;
}

/// Called from launch_kernel_thread when a thread's entry
/// point returns.
///
#[no_mangle]
extern "sysv64" fn kernel_thread_exit() -> ! {
    crate::thread::exit(0);
}
