// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exercises the scheduler and synchronization layer with real threads.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec::Vec;
use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use ember_abi::SchedulingPolicy;
use multitasking::{join, start_kernel_thread, yield_now, PRIORITY_NORMAL};

entry_point!(main);

fn main(_boot_info: &'static BootInfo) -> ! {
    kernel::init();

    test_main();
    kernel::halt_loop();
}

fn exit_with_arg(arg: u64) {
    multitasking::exit(arg as i64);
}

#[test_case]
fn join_returns_exit_code() {
    let thread =
        start_kernel_thread(exit_with_arg, 42, PRIORITY_NORMAL, false).expect("start failed");
    assert_eq!(join(&thread), Ok(42));

    // A thread that returns from its body exits with
    // code 0.
    fn plain(_arg: u64) {}
    let thread = start_kernel_thread(plain, 0, PRIORITY_NORMAL, false).expect("start failed");
    assert_eq!(join(&thread), Ok(0));
}

/// The interleaving log for the ping/pong test.
///
static EVENTS: spin::Mutex<Vec<u8>> = spin::Mutex::new(Vec::new());

fn ping_side(_arg: u64) {
    let ping = sync::create_semaphore("test-ping", 1).expect("create failed");
    let pong = sync::create_semaphore("test-pong", 0).expect("create failed");

    for _ in 0..5 {
        sync::p(pong).expect("p failed");
        EVENTS.lock().push(b'A');
        sync::v(ping).expect("v failed");
    }

    sync::destroy_semaphore(ping).expect("destroy failed");
    sync::destroy_semaphore(pong).expect("destroy failed");
}

fn pong_side(_arg: u64) {
    let ping = sync::create_semaphore("test-ping", 1).expect("create failed");
    let pong = sync::create_semaphore("test-pong", 0).expect("create failed");

    for _ in 0..5 {
        sync::p(ping).expect("p failed");
        EVENTS.lock().push(b'B');
        sync::v(pong).expect("v failed");
    }

    sync::destroy_semaphore(ping).expect("destroy failed");
    sync::destroy_semaphore(pong).expect("destroy failed");
}

#[test_case]
fn semaphore_ping_pong() {
    let a = start_kernel_thread(ping_side, 0, PRIORITY_NORMAL, false).expect("start failed");
    let b = start_kernel_thread(pong_side, 0, PRIORITY_NORMAL, false).expect("start failed");

    assert_eq!(join(&a), Ok(0));
    assert_eq!(join(&b), Ok(0));

    // Both sides ran to completion and their prints
    // strictly alternate, starting with the side that
    // found a positive count.
    let events = EVENTS.lock();
    assert_eq!(events.as_slice(), b"BABABABABA");
}

static SPINNER_PROGRESS: AtomicU64 = AtomicU64::new(0);
static SPINNER_STOP: AtomicBool = AtomicBool::new(false);

fn spinner(_arg: u64) {
    // CPU-bound: never yields voluntarily.
    while !SPINNER_STOP.load(Ordering::SeqCst) {
        SPINNER_PROGRESS.fetch_add(1, Ordering::SeqCst);
    }
}

#[test_case]
fn preemption_shares_the_processor() {
    let thread = start_kernel_thread(spinner, 0, PRIORITY_NORMAL, false).expect("start failed");

    // Hand the CPU to the spinner. Only preemption can
    // bring control back here, since the spinner never
    // yields.
    yield_now();
    while SPINNER_PROGRESS.load(Ordering::SeqCst) == 0 {
        yield_now();
    }

    SPINNER_STOP.store(true, Ordering::SeqCst);
    assert_eq!(join(&thread), Ok(0));
}

#[test_case]
fn policy_change_round_trip() {
    assert_eq!(multitasking::policy(), SchedulingPolicy::MultilevelFeedback);

    multitasking::set_scheduling_policy(SchedulingPolicy::RoundRobin, 2);
    assert_eq!(multitasking::policy(), SchedulingPolicy::RoundRobin);
    assert_eq!(multitasking::quantum(), 2);

    // Scheduling still works across the change.
    yield_now();

    multitasking::set_scheduling_policy(
        SchedulingPolicy::MultilevelFeedback,
        multitasking::DEFAULT_QUANTUM,
    );
    assert_eq!(multitasking::policy(), SchedulingPolicy::MultilevelFeedback);
    yield_now();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::test_panic_handler(info)
}
