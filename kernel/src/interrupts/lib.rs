// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles hardware and software interrupts and the [Programmable Interrupt Controller](https://en.wikipedia.org/wiki/Programmable_interrupt_controller) (PIC).
//!
//! ## Atomic sections
//!
//! The lowest synchronization primitive in the kernel is the atomic
//! section: a region of code executed with external interrupts disabled.
//! [`begin_atomic`] disables interrupts and returns a token recording
//! whether they were enabled on entry; [`end_atomic`] restores exactly
//! that state, so nested sections compose correctly and only the
//! outermost `end_atomic` re-enables delivery. All code that inspects or
//! mutates scheduler state, run queues, wait queues, or device queues
//! executes inside such a section, or from an interrupt handler, which is
//! intrinsically atomic on this target.
//!
//! ## CPU exceptions
//!
//! [`init`] sets up the interrupt descriptor table with handlers for CPU
//! exceptions. Faults that a user process can cause (general protection,
//! stack, and page faults) are routed to the handler installed with
//! [`set_fault_handler`], which the kernel uses to terminate the
//! offending process. The same faults in kernel mode panic.
//!
//! ## System calls
//!
//! Vector [`SYSCALL_VECTOR`](ember_abi::SYSCALL_VECTOR) is a trap gate
//! reachable from user privilege. Its entry stub saves every register
//! into a [`SavedRegisters`] frame and passes it to the dispatcher
//! installed with [`set_syscall_handler`]; the dispatcher's result is
//! written back to the frame's `rax` before the stub returns to the
//! process.
//!
//! ## IRQ handling and the PIC
//!
//! The PIC's IRQs are registered using the [`register_irq`] function,
//! making it easier to handle IRQs without needing to know the details
//! of the PIC. IRQ handlers are passed the IRQ number as an [`Irq`] and
//! acknowledge it with [`Irq::acknowledge`].

#![no_std]
#![feature(abi_x86_interrupt)]

mod frame;
mod irq;

pub use frame::{set_syscall_handler, SavedRegisters, SyscallHandler};
pub use irq::{register_irq, Irq};

use core::sync::atomic::{AtomicUsize, Ordering};
use ember_abi::SYSCALL_VECTOR;
use lazy_static::lazy_static;
use pic8259::ChainedPics;
use serial::println;
use x86_64::instructions::interrupts;
use x86_64::registers::control::Cr2;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::{PrivilegeLevel, VirtAddr};

/// The offset at which the first PIC's IRQs are mapped into
/// the IDT.
///
pub const PIC_1_OFFSET: usize = 32;

/// The offset at which the second PIC's IRQs are mapped
/// into the IDT.
///
pub const PIC_2_OFFSET: usize = PIC_1_OFFSET + 8;

/// PICS is the set of chained programmable interrupt
/// controllers.
///
pub(crate) static PICS: spin::Mutex<ChainedPics> =
    spin::Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET as u8, PIC_2_OFFSET as u8) });

/// Records whether interrupts were enabled when an atomic
/// section began.
///
/// The token must be handed back to [`end_atomic`], which
/// restores exactly the recorded state.
///
#[must_use]
#[derive(Debug)]
pub struct AtomicToken {
    was_enabled: bool,
}

/// Start an interrupt-atomic region.
///
/// Returns a token recording whether interrupts were
/// enabled at the beginning of the call.
///
pub fn begin_atomic() -> AtomicToken {
    let was_enabled = interrupts::are_enabled();
    if was_enabled {
        interrupts::disable();
    }

    AtomicToken { was_enabled }
}

/// End an interrupt-atomic region, restoring the interrupt
/// state recorded in `token`.
///
/// An inner nested section observes interrupts already
/// disabled, so its token leaves them disabled; only the
/// outermost `end_atomic` re-enables delivery.
///
pub fn end_atomic(token: AtomicToken) {
    debug_assert!(!interrupts::are_enabled());
    if token.was_enabled {
        interrupts::enable();
    }
}

/// Returns whether the CPU is currently executing
/// atomically with respect to external interrupts.
///
pub fn in_atomic_section() -> bool {
    !interrupts::are_enabled()
}

/// Runs the given closure inside an atomic section.
///
pub fn with_atomic<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let token = begin_atomic();
    let result = f();
    end_atomic(token);
    result
}

/// The signature of the handler for faults a user process
/// can cause.
///
/// The handler receives the faulting vector, the error
/// code, and whether the fault arrived from user privilege.
/// If the fault came from a user process, the handler is
/// expected not to return.
///
pub type FaultHandler = fn(vector: u8, error_code: u64, from_user: bool);

static FAULT_HANDLER: AtomicUsize = AtomicUsize::new(0);

/// Installs the handler called when a process-killable
/// fault occurs.
///
pub fn set_fault_handler(handler: FaultHandler) {
    FAULT_HANDLER.store(handler as usize, Ordering::SeqCst);
}

fn dispatch_fault(vector: u8, error_code: u64, frame: &InterruptStackFrame) {
    let from_user = frame.code_segment & 3 == PrivilegeLevel::Ring3 as u64;
    let handler = FAULT_HANDLER.load(Ordering::SeqCst);
    if handler != 0 {
        let handler: FaultHandler = unsafe { core::mem::transmute(handler) };
        handler(vector, error_code, from_user);
    }

    // Either no handler is installed or the fault came
    // from kernel code. Both are kernel bugs.
    panic!(
        "EXCEPTION: unhandled fault {} (error code {:#x})\n{:#?}",
        vector, error_code, frame
    );
}

/// Loads the [Interrupt Descriptor Table](https://en.wikipedia.org/wiki/Interrupt_descriptor_table) (IDT)
/// and the PIC.
///
/// The PIC is remapped from its initial offsets so that it
/// does not overlap with CPU exceptions. All IRQs in the
/// PIC are disabled by default. Individual IRQs can be
/// enabled by registering a handler using [`register_irq`].
///
pub fn init() {
    IDT.load();
    unsafe {
        let mut pics = PICS.lock();
        pics.initialize();
        pics.disable(); // We disable all PIC lines by default.
    }
}

lazy_static! {
    /// IDT is our interrupt descriptor table.
    ///
    /// We configure it with our CPU exception handlers, the
    /// syscall trap gate, plus default handlers for the
    /// IRQs.
    ///
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(segmentation::DOUBLE_FAULT_IST_INDEX);
        }
        idt.segment_not_present
            .set_handler_fn(segment_not_present_handler);
        idt.stack_segment_fault
            .set_handler_fn(stack_segment_fault_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);

        for (i, handler) in irq::IRQ_HANDLERS.iter().enumerate() {
            idt[PIC_1_OFFSET + i].set_handler_fn(*handler);
        }

        // The syscall gate saves the full register frame,
        // so it uses a raw entry stub rather than an
        // x86-interrupt handler. User privilege may invoke
        // it directly.
        unsafe {
            idt[SYSCALL_VECTOR as usize]
                .set_handler_addr(VirtAddr::new(frame::syscall_entry as usize as u64))
                .set_privilege_level(PrivilegeLevel::Ring3);
        }

        idt
    };
}

// CPU exception handlers.

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    panic!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn segment_not_present_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    panic!(
        "EXCEPTION: SEGMENT NOT PRESENT: index {}\n{:#?}",
        error_code, stack_frame
    );
}

extern "x86-interrupt" fn stack_segment_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    dispatch_fault(12, error_code, &stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    dispatch_fault(13, error_code, &stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    println!("EXCEPTION: PAGE FAULT accessing {:?}", Cr2::read());
    dispatch_fault(14, error_code.bits(), &stack_frame);
}
