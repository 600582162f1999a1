// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the core of the Ember kernel.
//!
//! The interesting machinery lives in the crates under `src`; this crate
//! is the glue that wires them together. [`init`] brings the kernel up
//! in dependency order, the [`syscall`] module dispatches traps from
//! user processes, [`spawn`] starts new processes from executables on
//! the filesystem, and [`traps`] terminates processes that fault.

#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![feature(alloc_error_handler)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;
use interrupts::Irq;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::InterruptStackFrame;

pub mod allocator;
pub mod spawn;
pub mod syscall;
pub mod traps;

/// The IRQ line for the programmable interval timer.
///
const TIMER_IRQ: Irq = Irq::new_unsafe(0);

/// init sets up the core functions of the kernel, in
/// dependency order: segmentation, interrupts, the heap,
/// the timer, the console, the scheduler, the keyboard,
/// and the syscall and fault dispatchers. Interrupts are
/// enabled on return.
///
pub fn init() {
    segmentation::init();
    interrupts::init();
    allocator::init();
    time::init();
    vga::init();

    multitasking::init().expect("failed to initialise the scheduler");

    keyboard::init();
    traps::init();
    interrupts::register_irq(TIMER_IRQ, timer_interrupt_handler);

    x86_64::instructions::interrupts::enable();
}

/// The timer interrupt handler: the heartbeat of
/// preemption.
///
/// Each tick advances the global ticker and charges the
/// current thread. Once the controller has been
/// acknowledged, the scheduler is given the chance to
/// preempt, which happens when the thread has exhausted
/// its quantum and preemption is enabled.
///
fn timer_interrupt_handler(_frame: InterruptStackFrame, irq: Irq) {
    time::tick();
    multitasking::timer_tick();

    irq.acknowledge();

    multitasking::preempt();
}

#[alloc_error_handler]
fn alloc_error_handler(layout: alloc::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout)
}

/// halt_loop halts the CPU using a loop of the hlt
/// instruction.
///
pub fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// Testable represents a test function.
///
pub trait Testable {
    fn run(&self);
}

/// Wrap tests with debug statements.
///
impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        serial::print!("{}...\t", core::any::type_name::<T>());
        self();
        serial::println!("[ok]");
    }
}

/// Entry point for the set of in-kernel tests.
///
pub fn test_runner(tests: &[&dyn Testable]) {
    serial::println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

/// Panic handler for in-kernel tests.
///
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial::println!("[failed]\n");
    serial::println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
    halt_loop();
}

/// QemuExitCode represents the two valid values for
/// exiting QEMU.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// exit_qemu uses the 0xf4 I/O port to instruct QEMU to
/// exit with the given exit code.
///
pub fn exit_qemu(exit_code: QemuExitCode) {
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
}

#[cfg(test)]
use bootloader::{entry_point, BootInfo};

#[cfg(test)]
entry_point!(test_kernel_main);

/// test_kernel_main is the entry point when the kernel's
/// own tests run in the emulator.
///
#[cfg(test)]
fn test_kernel_main(_boot_info: &'static BootInfo) -> ! {
    init();
    test_main();
    halt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
