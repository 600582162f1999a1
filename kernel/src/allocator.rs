// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! allocator provides the functionality to allocate heap memory.
//!
//! The kernel reserves a fixed region for its heap at link time and
//! hands it to a linked-list allocator. Variable-size kernel objects
//! such as thread metadata and file buffers come from here; thread
//! stacks come from the frame pool instead.
//!
//! Interrupt handlers allocate too (waking a thread can grow a run
//! queue), so the heap lock is only ever held inside an atomic section.
//! Without that, a timer tick arriving while the interrupted thread
//! held the lock would spin forever.

use core::alloc::{GlobalAlloc, Layout};
use linked_list_allocator::LockedHeap;
use x86_64::instructions::interrupts::without_interrupts;

/// The heap, wrapped so that every operation runs with
/// interrupts masked.
///
struct IrqSafeHeap(LockedHeap);

unsafe impl GlobalAlloc for IrqSafeHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        without_interrupts(|| self.0.alloc(layout))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        without_interrupts(|| self.0.dealloc(ptr, layout))
    }
}

#[global_allocator]
static ALLOCATOR: IrqSafeHeap = IrqSafeHeap(LockedHeap::empty());

/// The size of the kernel heap in bytes.
///
const KERNEL_HEAP_SIZE: usize = 8 << 20; // 8 MiB.

/// The static region backing the heap.
///
#[repr(align(4096))]
struct HeapSpace([u8; KERNEL_HEAP_SIZE]);

static mut HEAP_SPACE: HeapSpace = HeapSpace([0u8; KERNEL_HEAP_SIZE]);

/// init initialises the static global allocator over the
/// reserved heap region.
///
pub fn init() {
    unsafe {
        ALLOCATOR
            .0
            .lock()
            .init(HEAP_SPACE.0.as_mut_ptr(), KERNEL_HEAP_SIZE);
    }
}
