// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Allocates 4 KiB physical frames from a fixed pool.
//!
//! The kernel reserves a static pool of page-aligned memory at link time
//! and hands it out one [`Frame`] at a time. Thread stacks are single
//! frames; other variable-size kernel objects come from the heap
//! allocator instead.
//!
//! Allocation state is a [`bitmap_index::Bitmap`] in which a set bit
//! marks a free frame.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]

extern crate alloc;

use align::PAGE_SIZE;
use bitmap_index::Bitmap;
use core::cell::UnsafeCell;
use lazy_static::lazy_static;
use spin::Mutex;

/// The size of each allocated frame in bytes.
///
pub const FRAME_SIZE: usize = PAGE_SIZE;

/// The number of frames in the static pool.
///
const POOL_FRAMES: usize = 1024; // 4 MiB.

/// The static pool from which frames are carved.
///
/// The wrapper exists to force page alignment and to give
/// the kernel a Sync handle on the memory. The bytes are
/// only ever reached through frames handed out by the
/// allocator, which never hands out the same frame twice.
///
#[repr(align(4096))]
struct Pool(UnsafeCell<[u8; POOL_FRAMES * FRAME_SIZE]>);

unsafe impl Sync for Pool {}

static POOL: Pool = Pool(UnsafeCell::new([0u8; POOL_FRAMES * FRAME_SIZE]));

lazy_static! {
    /// ALLOCATOR records which frames of [`POOL`] are free.
    ///
    pub static ref ALLOCATOR: Mutex<FrameAllocator> =
        Mutex::new(FrameAllocator::new(POOL_FRAMES));
}

/// A single 4 KiB frame of kernel memory.
///
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    index: usize,
}

impl Frame {
    /// Returns the address of the first byte in the frame.
    ///
    pub fn start_address(&self) -> usize {
        POOL.0.get() as usize + self.index * FRAME_SIZE
    }

    /// Returns the address one past the last byte in the
    /// frame.
    ///
    pub fn end_address(&self) -> usize {
        self.start_address() + FRAME_SIZE
    }
}

/// Tracks the allocation state of the frame pool.
///
pub struct FrameAllocator {
    free: Bitmap,
}

impl FrameAllocator {
    fn new(frames: usize) -> Self {
        FrameAllocator {
            free: Bitmap::new_set(frames),
        }
    }

    /// Returns the number of frames not currently
    /// allocated.
    ///
    pub fn free_frames(&self) -> usize {
        self.free.num_set()
    }

    fn allocate(&mut self) -> Option<Frame> {
        let index = self.free.next_set()?;
        self.free.unset(index);
        Some(Frame { index })
    }

    fn deallocate(&mut self, frame: Frame) {
        debug_assert!(!self.free.get(frame.index), "frame freed twice");
        self.free.set(frame.index);
    }
}

/// Allocates a single frame, or returns None if the pool
/// is exhausted.
///
pub fn allocate_frame() -> Option<Frame> {
    ALLOCATOR.lock().allocate()
}

/// Returns the given frame to the pool.
///
pub fn free_frame(frame: Frame) {
    ALLOCATOR.lock().deallocate(frame);
}

#[cfg(test)]
mod tests {
    use super::allocate_frame;
    use super::free_frame;
    use super::FRAME_SIZE;

    #[test]
    fn test_allocate_and_free() {
        let a = allocate_frame().expect("failed to allocate frame");
        let b = allocate_frame().expect("failed to allocate frame");

        assert_ne!(a.start_address(), b.start_address());
        assert_eq!(a.start_address() % FRAME_SIZE, 0);
        assert_eq!(b.start_address() % FRAME_SIZE, 0);
        assert_eq!(a.end_address() - a.start_address(), FRAME_SIZE);

        free_frame(a);
        free_frame(b);
    }

    #[test]
    fn test_frames_are_distinct() {
        let frames: alloc::vec::Vec<_> =
            (0..8).map(|_| allocate_frame().expect("exhausted")).collect();

        for (i, a) in frames.iter().enumerate() {
            for b in frames.iter().skip(i + 1) {
                assert!(
                    a.end_address() <= b.start_address()
                        || b.end_address() <= a.start_address()
                );
            }
        }

        for frame in frames {
            free_frame(frame);
        }
    }
}
