// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Saves the full register frame when the kernel is entered by trap.
//!
//! The x86-interrupt calling convention preserves registers, but it does
//! not let a handler read or modify them. The syscall gate needs both:
//! arguments arrive in named registers and the result leaves in `rax`.
//! The entry stub in `entry.s` therefore builds a [`SavedRegisters`]
//! frame on the stack and hands a pointer to it to the dispatcher
//! installed with [`set_syscall_handler`]. When the dispatcher returns,
//! the stub restores the (possibly modified) frame and returns to the
//! interrupted code.

use core::arch::global_asm;
use core::sync::atomic::{AtomicUsize, Ordering};

global_asm!(include_str!("entry.s"));

// The syscall_entry function is implemented in entry.s.
//
extern "C" {
    /// syscall_entry is the entry point invoked when a
    /// process raises the syscall trap gate.
    ///
    pub(crate) fn syscall_entry();
}

/// The registers of the interrupted code, as saved by the
/// syscall entry stub.
///
/// The layout must be kept up to date with the push
/// sequence in `entry.s`. Handlers read syscall arguments
/// from the named fields and write the result to
/// [`rax`](SavedRegisters::rax).
///
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SavedRegisters {
    // General-purpose registers, pushed by the entry stub.
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    // The trap vector and error code. The stub pushes a
    // zero error code for vectors where the CPU does not
    // supply one, so the layout is the same for every trap.
    pub vector: u64,
    pub error_code: u64,

    // Pushed by the CPU when the trap is taken.
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl SavedRegisters {
    /// Returns whether the frame was saved from user
    /// privilege.
    ///
    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// The signature of the syscall dispatcher.
///
/// The dispatcher receives the saved frame, reads the call
/// number and arguments from it, and writes the result to
/// its `rax` field.
///
pub type SyscallHandler = fn(&mut SavedRegisters);

static SYSCALL_HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Installs the kernel's syscall dispatcher.
///
pub fn set_syscall_handler(handler: SyscallHandler) {
    SYSCALL_HANDLER.store(handler as usize, Ordering::SeqCst);
}

/// Called from the entry stub with the saved frame.
///
#[no_mangle]
extern "sysv64" fn syscall_trampoline(frame: *mut SavedRegisters) {
    let frame = unsafe { &mut *frame };
    let handler = SYSCALL_HANDLER.load(Ordering::SeqCst);
    if handler == 0 {
        // No dispatcher is installed yet, so the call
        // cannot be carried out.
        frame.rax = ember_abi::Error::Unsupported.code() as u64;
        return;
    }

    let handler: SyscallHandler = unsafe { core::mem::transmute(handler) };
    handler(frame);
}
