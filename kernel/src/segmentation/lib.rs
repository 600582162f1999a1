// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Manages segmentation for the kernel, including the [Global Descriptor Table] (GDT).
//!
//! This crate provides a single consistent approach to handling the GDT
//! and TSS. The GDT layout used is as follows:
//!
//! | Index | Descriptor    | Comment                                      |
//! |-------|---------------|----------------------------------------------|
//! | 0     | NULL          | Not usable                                   |
//! | 1     | `kernel_code` | All kernel code                              |
//! | 2     | `kernel_data` | Kernel stacks                                |
//! | 3 - 4 | `task_state`  | Uses up two slots                            |
//! | 5     | `user_code`   | Rewritten with the current process's pair    |
//! | 6     | `user_data`   | Rewritten with the current process's pair    |
//!
//! Slots 5 and 6 describe the memory region of whichever process is
//! current. Each user context carries a [`SegmentPair`] covering its
//! region with user privilege; switching to the process loads that pair
//! into the two reserved slots with [`load_segment_pair`].
//!
//! [Global Descriptor Table]: https://en.wikipedia.org/wiki/Global_Descriptor_Table

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]

mod descriptor;

pub use descriptor::SegmentPair;

use core::pin::Pin;
use core::sync::atomic::{AtomicBool, Ordering};
use descriptor::{kernel_code_segment, kernel_data_segment, tss_segment};
use x86_64::instructions::segmentation::{Segment, CS, SS};
use x86_64::instructions::tables::{lgdt, load_tss};
use x86_64::structures::gdt::SegmentSelector;
use x86_64::structures::tss::TaskStateSegment;
use x86_64::structures::DescriptorTablePointer;
use x86_64::{PrivilegeLevel, VirtAddr};

/// The number of descriptor slots in the GDT.
///
const GDT_ENTRIES: usize = 7;

/// The slot indices described in the crate documentation.
///
const KERNEL_CODE_INDEX: u16 = 1;
const KERNEL_DATA_INDEX: u16 = 2;
const TASK_STATE_INDEX: u16 = 3;
const USER_CODE_INDEX: u16 = 5;
const USER_DATA_INDEX: u16 = 6;

/// Index into the TSS where the double fault handler's
/// stack is stored.
///
/// This ensures that the double fault handler operates
/// with a known-good stack, so that a kernel stack overflow
/// does not lead to a triple fault.
///
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

/// The size of the extra stack reserved for the double
/// fault handler.
///
const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5; // 20 KiB.

/// Index into the TSS privilege stack table holding the
/// stack used when a trap arrives from user mode.
///
/// Each time the scheduler switches to a user thread, it
/// stores the thread's kernel stack top at this index (or
/// zero for kernel threads, which never change privilege).
///
const INTERRUPT_KERNEL_STACK_INDEX: usize = PrivilegeLevel::Ring0 as usize;

/// The kernel's segment data.
///
/// Although this is a mutable static, it's safe in practice:
/// it is initialised once, before the scheduler starts, and
/// thereafter only mutated inside interrupts-disabled
/// sections by the single CPU that owns it. We don't expose
/// the static outside this module.
///
static mut SEGMENT_DATA: SegmentData = SegmentData::new_uninitialised();

static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Initialise and activate the kernel's segment data.
///
/// # Panics
///
/// `init` will panic if called more than once.
///
pub fn init() {
    if INITIALISED.swap(true, Ordering::SeqCst) {
        panic!("segmentation::init() called a second time");
    }

    let mut pinned = unsafe { Pin::new(&mut SEGMENT_DATA) };
    pinned.init();
    pinned.activate();
}

/// Invoke a callback acting on the segment data.
///
/// # Panics
///
/// `with_segment_data` will panic if called before [`init`].
///
pub fn with_segment_data<F: FnOnce(&mut Pin<&mut SegmentData>)>(f: F) {
    if !INITIALISED.load(Ordering::SeqCst) {
        panic!("segmentation::with_segment_data() called before being initialised");
    }

    let mut pinned = unsafe { Pin::new(&mut SEGMENT_DATA) };
    f(&mut pinned);
}

/// Sets the stack used when a trap arrives from user mode.
///
/// This should be set whenever the current thread changes,
/// with the new thread's kernel stack top, or zero for
/// kernel threads.
///
pub fn set_interrupt_stack(stack_top: VirtAddr) {
    with_segment_data(|data| data.set_interrupt_stack(stack_top));
}

/// Loads the given user segment pair into the GDT slots
/// reserved for the current process.
///
/// The caller must have interrupts disabled: the pair is
/// observed by the CPU when it next loads the user
/// selectors, and a preemption between the two slot writes
/// would let another process run with a mismatched pair.
///
pub fn load_segment_pair(pair: &SegmentPair) {
    with_segment_data(|data| data.load_segment_pair(pair));
}

/// Returns the kernel's code and data segment selectors.
///
pub fn kernel_selectors() -> (SegmentSelector, SegmentSelector) {
    (
        SegmentSelector::new(KERNEL_CODE_INDEX, PrivilegeLevel::Ring0),
        SegmentSelector::new(KERNEL_DATA_INDEX, PrivilegeLevel::Ring0),
    )
}

/// Returns the code and data segment selectors describing
/// the current process's memory region.
///
/// The selectors are the same for every process; the
/// descriptors they name are rewritten on each context
/// switch.
///
pub fn user_selectors() -> (SegmentSelector, SegmentSelector) {
    (
        SegmentSelector::new(USER_CODE_INDEX, PrivilegeLevel::Ring3),
        SegmentSelector::new(USER_DATA_INDEX, PrivilegeLevel::Ring3),
    )
}

/// Contains the global descriptor table and task state segment.
///
pub struct SegmentData {
    // Our descriptor table, in the layout described in the
    // crate documentation.
    gdt: [u64; GDT_ENTRIES],

    // Our task state segment.
    tss: TaskStateSegment,

    // Whether the structures are set up and currently in
    // use.
    is_initialised: bool,
    is_active: bool,

    // The stack we reserve for the double fault handler.
    // We only store this so it doesn't get dropped.
    //
    // Placed last in the struct to minimise padding.
    #[allow(dead_code)]
    double_fault_stack: [u8; DOUBLE_FAULT_STACK_SIZE],
}

impl SegmentData {
    /// Returns an uninitialised GDT.
    ///
    /// It's necessary to create and initialise the GDT in
    /// two separate steps so that the initialisation takes
    /// place on the final address.
    ///
    const fn new_uninitialised() -> Self {
        SegmentData {
            gdt: [0u64; GDT_ENTRIES],
            tss: TaskStateSegment::new(),
            is_initialised: false,
            is_active: false,
            double_fault_stack: [0u8; DOUBLE_FAULT_STACK_SIZE],
        }
    }

    /// Returns a static, immutable reference to the TSS.
    ///
    /// Note that although we use unsafe and cheat the type
    /// system, this is safe in practice, as the segment
    /// data is a static that is never dropped.
    ///
    fn tss_ref(self: &Pin<&mut Self>) -> &'static TaskStateSegment {
        let ptr = (&self.tss) as *const TaskStateSegment;
        unsafe { &*ptr }
    }

    /// Initialise the segment data, making it ready to
    /// activate.
    ///
    /// # Panics
    ///
    /// `init` will panic if the data has already been
    /// initialised.
    ///
    fn init(self: &mut Pin<&mut Self>) {
        if self.is_initialised {
            panic!("SegmentData is being initialised a second time");
        }

        // Set up the TSS.
        let stack_bottom = VirtAddr::from_ptr(&self.double_fault_stack);
        let stack_top = stack_bottom + self.double_fault_stack.len();
        self.tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = stack_top;

        // Then fill in the descriptors. The user slots stay
        // null until the first process is switched in.
        let (tss_low, tss_high) = tss_segment(self.tss_ref());
        self.gdt[KERNEL_CODE_INDEX as usize] = kernel_code_segment();
        self.gdt[KERNEL_DATA_INDEX as usize] = kernel_data_segment();
        self.gdt[TASK_STATE_INDEX as usize] = tss_low;
        self.gdt[TASK_STATE_INDEX as usize + 1] = tss_high;

        self.is_initialised = true;
    }

    /// Activate the segment data, loading it into the CPU.
    ///
    /// # Panics
    ///
    /// `activate` will panic if the data has already been
    /// activated, or if the data has not been initialised.
    ///
    fn activate(self: &mut Pin<&mut Self>) {
        if !self.is_initialised {
            panic!("SegmentData is being activated before being initialised");
        }

        if self.is_active {
            panic!("SegmentData is being activated a second time");
        }

        let pointer = DescriptorTablePointer {
            limit: (GDT_ENTRIES * 8 - 1) as u16,
            base: VirtAddr::from_ptr(self.gdt.as_ptr()),
        };

        let (kernel_code, kernel_data) = kernel_selectors();
        unsafe {
            lgdt(&pointer);

            CS::set_reg(kernel_code);
            SS::set_reg(kernel_data);

            load_tss(SegmentSelector::new(
                TASK_STATE_INDEX,
                PrivilegeLevel::Ring0,
            ));
        }

        self.is_active = true;
    }

    /// Sets the stack used for handling traps that arrive
    /// from user mode.
    ///
    /// The passed address should be the address of the top
    /// of the stack, or zero.
    ///
    pub fn set_interrupt_stack(self: &mut Pin<&mut Self>, stack_top: VirtAddr) {
        self.tss.privilege_stack_table[INTERRUPT_KERNEL_STACK_INDEX] = stack_top;
    }

    /// Writes the given pair into the user descriptor
    /// slots.
    ///
    /// The CPU picks the new descriptors up the next time
    /// the user selectors are loaded, which happens when
    /// the thread returns to user mode.
    ///
    pub fn load_segment_pair(self: &mut Pin<&mut Self>, pair: &SegmentPair) {
        self.gdt[USER_CODE_INDEX as usize] = pair.code();
        self.gdt[USER_DATA_INDEX as usize] = pair.data();
    }
}
