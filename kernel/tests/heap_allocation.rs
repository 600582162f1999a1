// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;
use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;

entry_point!(main);

fn main(_boot_info: &'static BootInfo) -> ! {
    kernel::init();

    test_main();
    kernel::halt_loop();
}

#[test_case]
fn simple_allocation() {
    let heap_value_1 = Box::new(41);
    let heap_value_2 = Box::new(13);
    assert_eq!(*heap_value_1, 41);
    assert_eq!(*heap_value_2, 13);
}

#[test_case]
fn large_vec() {
    let n = 1000u64;
    let mut vec = Vec::new();
    for i in 0..n {
        vec.push(i);
    }
    assert_eq!(vec.iter().sum::<u64>(), (n - 1) * n / 2);
}

#[test_case]
fn many_boxes() {
    // Churn through more allocations than the heap could
    // hold at once, so leaks show up as exhaustion.
    for i in 0..100_000u64 {
        let x = Box::new(i);
        assert_eq!(*x, i);
    }
}

#[test_case]
fn frame_allocation() {
    let a = physmem::allocate_frame().expect("failed to allocate frame");
    let b = physmem::allocate_frame().expect("failed to allocate frame");
    assert_ne!(a.start_address(), b.start_address());

    physmem::free_frame(a);
    physmem::free_frame(b);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::test_panic_handler(info)
}
