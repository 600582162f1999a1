// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The Ember kernel's entry point.
//!
//! Brings the kernel up, mounts the boot filesystem from a RAM disk,
//! starts a pair of kernel threads that exercise the named semaphores,
//! and hands the rest of the boot to the shell, if one is present on
//! the boot volume.

#![no_std]
#![no_main]

extern crate alloc;

use alloc::boxed::Box;
use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use filesystem::fat::FatFileSystem;
use multitasking::{start_kernel_thread, PRIORITY_NORMAL};
use serial::println;
use storage::block::RamDisk;

entry_point!(kernel_main);

/// The number of rounds the ping/pong demonstration
/// threads play.
///
const PING_PONG_ROUNDS: usize = 5;

/// One side of the ping/pong pair: waits on one semaphore
/// and releases the other, strictly alternating with its
/// peer.
///
fn ping_thread(_arg: u64) {
    let ping = sync::create_semaphore("ping", 1).expect("failed to create ping semaphore");
    let pong = sync::create_semaphore("pong", 0).expect("failed to create pong semaphore");

    for round in 0..PING_PONG_ROUNDS {
        sync::p(pong).expect("p(pong) failed");
        println!("ping {}", round);
        sync::v(ping).expect("v(ping) failed");
    }

    sync::destroy_semaphore(ping).expect("failed to destroy ping semaphore");
    sync::destroy_semaphore(pong).expect("failed to destroy pong semaphore");
}

fn pong_thread(_arg: u64) {
    let ping = sync::create_semaphore("ping", 1).expect("failed to create ping semaphore");
    let pong = sync::create_semaphore("pong", 0).expect("failed to create pong semaphore");

    for round in 0..PING_PONG_ROUNDS {
        sync::p(ping).expect("p(ping) failed");
        println!("pong {}", round);
        sync::v(pong).expect("v(pong) failed");
    }

    sync::destroy_semaphore(ping).expect("failed to destroy ping semaphore");
    sync::destroy_semaphore(pong).expect("failed to destroy pong semaphore");
}

/// Builds and mounts the boot volume at `/c`.
///
/// The volume is a FAT-style image served from a RAM disk.
/// Nothing writes to it, so it is mounted read-only.
///
fn mount_boot_volume() {
    let files: [(&str, &[u8]); 1] = [("greeting.txt", b"Ember boot volume\n")];
    let image = filesystem::fat::build_image(&files).expect("failed to build boot image");

    let disk = RamDisk::new(&image, false).expect("failed to build boot RAM disk");
    let boot_volume = FatFileSystem::mount(Box::new(disk)).expect("failed to mount boot volume");
    filesystem::mount("/c", Box::new(boot_volume)).expect("failed to mount /c");
}

fn kernel_main(_boot_info: &'static BootInfo) -> ! {
    println!("Ember kernel starting");
    kernel::init();

    mount_boot_volume();
    if let Ok(greeting) = filesystem::read_fully("/c/greeting.txt") {
        vga::put_buf(&greeting);
    }

    // Let the semaphore demonstration threads play in the
    // background while the boot continues.
    start_kernel_thread(ping_thread, 0, PRIORITY_NORMAL, true)
        .expect("failed to start ping thread");
    start_kernel_thread(pong_thread, 0, PRIORITY_NORMAL, true)
        .expect("failed to start pong thread");

    // Hand over to the shell, if the boot volume carries
    // one.
    match kernel::spawn::spawn("shell.exe", "shell.exe") {
        Ok(shell) => {
            let exit_code = multitasking::join(&shell).expect("failed to join the shell");
            println!("shell exited with code {}", exit_code);
        }
        Err(error) => println!("no shell on the boot volume: {:?}", error),
    }

    // The boot thread's work is done; the kernel idles
    // between interrupts from here on.
    multitasking::exit(0);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("{}", info);
    kernel::halt_loop();
}
