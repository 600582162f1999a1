// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the user context: a process's memory region, descriptor
//! pair, and the checked copies across the privilege boundary.

use align::PAGE_SIZE;
use alloc::vec::Vec;
use core::ptr;
use ember_abi::Error;
use segmentation::SegmentPair;

/// A contiguous, page-aligned region of kernel memory
/// holding a process image.
///
/// The region is reached through a raw pointer because the
/// process mutates it from user mode while the kernel holds
/// shared references to the context; all kernel accesses go
/// through the checked copy operations below.
///
struct UserRegion {
    base: *mut u8,
    size: usize,
}

unsafe impl Send for UserRegion {}
unsafe impl Sync for UserRegion {}

impl UserRegion {
    /// Allocates a zeroed region of `size` bytes, aligned
    /// to the page size.
    ///
    fn new(size: usize) -> Result<UserRegion, Error> {
        let layout = core::alloc::Layout::from_size_align(size, PAGE_SIZE)
            .map_err(|_| Error::InvalidArgument)?;

        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        if base.is_null() {
            return Err(Error::OutOfMemory);
        }

        Ok(UserRegion { base, size })
    }

    fn base(&self) -> *mut u8 {
        self.base
    }
}

impl Drop for UserRegion {
    fn drop(&mut self) {
        // The layout here matches the one used in new, so
        // the deallocation is sound.
        let layout = core::alloc::Layout::from_size_align(self.size, PAGE_SIZE).unwrap();
        unsafe { alloc::alloc::dealloc(self.base(), layout) };
    }
}

/// A user context: everything needed to run a thread at
/// user privilege.
///
/// The context owns the process's memory region and the
/// descriptor pair covering it. The context is shared by
/// reference counting; when the last reference drops, the
/// region is freed and the descriptor pair becomes inert.
///
pub struct UserContext {
    region: UserRegion,

    // The code/data descriptor pair covering the region
    // with user privilege.
    pair: SegmentPair,

    // The process entry point, as a user address.
    entry_address: u64,

    // The argument block's location, as a user address.
    argument_block_address: u64,

    // The initial user stack pointer.
    initial_stack_pointer: u64,
}

impl UserContext {
    /// Allocates a context with a zeroed region of `size`
    /// bytes (rounded up to whole pages).
    ///
    /// The entry point, argument block, and stack pointer
    /// are set by the loader once the image is in place.
    ///
    pub(crate) fn new(size: usize) -> Result<UserContext, Error> {
        let size = align::round_up_to_page(size);
        let region = UserRegion::new(size)?;
        let pair = SegmentPair::new(region.base() as usize, size);

        Ok(UserContext {
            region,
            pair,
            entry_address: 0,
            argument_block_address: 0,
            initial_stack_pointer: 0,
        })
    }

    pub(crate) fn set_entry(
        &mut self,
        entry_address: u64,
        argument_block_address: u64,
        initial_stack_pointer: u64,
    ) {
        self.entry_address = entry_address;
        self.argument_block_address = argument_block_address;
        self.initial_stack_pointer = initial_stack_pointer;
    }

    /// Returns the size of the process's region in bytes.
    ///
    pub fn size(&self) -> usize {
        self.region.size
    }

    /// Returns the descriptor pair covering the region.
    ///
    pub fn segment_pair(&self) -> &SegmentPair {
        &self.pair
    }

    /// Returns the process entry point, as a user address.
    ///
    pub fn entry_address(&self) -> u64 {
        self.entry_address
    }

    /// Returns the argument block's user address.
    ///
    pub fn argument_block_address(&self) -> u64 {
        self.argument_block_address
    }

    /// Returns the process's initial stack pointer.
    ///
    pub fn initial_stack_pointer(&self) -> u64 {
        self.initial_stack_pointer
    }

    /// Returns whether `[user_addr, user_addr + len)` lies
    /// entirely within the process's region.
    ///
    fn validate(&self, user_addr: u64, len: usize) -> bool {
        let size = self.region.size as u64;
        if user_addr >= size {
            return false;
        }

        // No overflow: user_addr < size, so the subtraction
        // is exact, and the comparison bounds len.
        len as u64 <= size - user_addr
    }

    /// Copies `dst.len()` bytes from the user address
    /// `src_user` into the kernel buffer `dst`.
    ///
    /// If any part of the user range is outside the
    /// process's region, nothing is copied.
    ///
    pub fn copy_from_user(&self, dst: &mut [u8], src_user: u64) -> Result<(), Error> {
        if !self.validate(src_user, dst.len()) {
            return Err(Error::InvalidArgument);
        }

        unsafe {
            let src = self.region.base().add(src_user as usize);
            ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len());
        }

        Ok(())
    }

    /// Copies the kernel buffer `src` to the user address
    /// `dst_user`.
    ///
    /// If any part of the user range is outside the
    /// process's region, nothing is copied.
    ///
    pub fn copy_to_user(&self, dst_user: u64, src: &[u8]) -> Result<(), Error> {
        if !self.validate(dst_user, src.len()) {
            return Err(Error::InvalidArgument);
        }

        unsafe {
            let dst = self.region.base().add(dst_user as usize);
            ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len());
        }

        Ok(())
    }

    /// Copies a string of `len` bytes from the user address
    /// `src_user` into a fresh kernel buffer of `len + 1`
    /// bytes, nul-terminated.
    ///
    /// Fails with [`Error::InvalidArgument`] if `len`
    /// exceeds `max_len` or the user range is invalid, and
    /// with [`Error::OutOfMemory`] if the kernel buffer
    /// cannot be allocated.
    ///
    pub fn copy_user_string(
        &self,
        src_user: u64,
        len: usize,
        max_len: usize,
    ) -> Result<Vec<u8>, Error> {
        if len > max_len {
            return Err(Error::InvalidArgument);
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(len + 1)
            .map_err(|_| Error::OutOfMemory)?;
        buf.resize(len, 0);

        self.copy_from_user(&mut buf, src_user)?;

        // Terminate the copy so the string's end survives
        // whatever the process does to its memory next.
        buf.push(0);

        Ok(buf)
    }

    /// Copies bytes into the region while the image is
    /// being built, before the process runs.
    ///
    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        self.copy_to_user(offset as u64, bytes)
            .map_err(|_| Error::BadExecutable)
    }
}

#[cfg(test)]
mod tests {
    use super::UserContext;
    use align::PAGE_SIZE;
    use ember_abi::Error;

    #[test]
    fn test_copy_round_trip() {
        let context = UserContext::new(2 * PAGE_SIZE).expect("failed to allocate context");

        let message = b"the quick brown fox";
        context
            .copy_to_user(123, message)
            .expect("copy_to_user failed");

        let mut read_back = [0u8; 19];
        context
            .copy_from_user(&mut read_back, 123)
            .expect("copy_from_user failed");
        assert_eq!(&read_back, message);
    }

    #[test]
    fn test_out_of_bounds_rejected_without_mutation() {
        let context = UserContext::new(PAGE_SIZE).expect("failed to allocate context");
        let size = context.size() as u64;

        // Ranges that poke out of the region fail.
        assert_eq!(
            context.copy_to_user(size - 4, &[1, 2, 3, 4, 5]),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            context.copy_to_user(size, &[1]),
            Err(Error::InvalidArgument)
        );

        // A failed copy must not have mutated the region:
        // the tail bytes are still zero.
        let mut tail = [0xffu8; 4];
        context
            .copy_from_user(&mut tail, size - 4)
            .expect("copy_from_user failed");
        assert_eq!(tail, [0, 0, 0, 0]);

        // A failed read must not mutate the kernel buffer.
        let mut buf = [7u8; 4];
        assert_eq!(
            context.copy_from_user(&mut buf, size - 2),
            Err(Error::InvalidArgument)
        );
        assert_eq!(buf, [7, 7, 7, 7]);

        // Addresses that would overflow are rejected, not
        // wrapped.
        assert_eq!(
            context.copy_to_user(u64::MAX - 1, &[1, 2, 3]),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn test_copy_user_string() {
        let context = UserContext::new(PAGE_SIZE).expect("failed to allocate context");
        context
            .copy_to_user(64, b"hello.exe")
            .expect("copy_to_user failed");

        // The copy holds the declared bytes plus a
        // terminating nul.
        let copied = context
            .copy_user_string(64, 9, 255)
            .expect("copy_user_string failed");
        assert_eq!(copied.len(), 10);
        assert_eq!(&copied, b"hello.exe\0");
        assert_eq!(copied[9], 0);

        // Length caps are applied before any copying.
        assert_eq!(
            context.copy_user_string(64, 9, 8),
            Err(Error::InvalidArgument)
        );

        // Bad ranges propagate the validation failure.
        let size = context.size() as u64;
        assert_eq!(
            context.copy_user_string(size - 2, 9, 255),
            Err(Error::InvalidArgument)
        );
    }
}
