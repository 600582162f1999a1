// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Builds raw segment descriptors for the GDT.
//!
//! Most descriptors are fixed for the kernel's lifetime, but each user
//! context carries a [`SegmentPair`]: a code and a data descriptor that
//! both cover the context's memory region with user privilege, sized in
//! page units. The pair is written into the GDT's reserved user slots
//! when the context becomes current.

use align::pages_for;
use x86_64::structures::gdt::{Descriptor, DescriptorFlags};
use x86_64::structures::tss::TaskStateSegment;

// Access byte values, as laid out in the descriptor format:
// present, DPL, non-system, executable/writable, accessed.
// The accessed bit is pre-set so the CPU never writes to
// the table.
//
const ACCESS_USER_CODE: u64 = 0xFB; // P | DPL3 | S | E | R | A.
const ACCESS_USER_DATA: u64 = 0xF3; // P | DPL3 | S | W | A.

// Flags nibble values: page granularity, plus the long-mode
// bit for code and the 32-bit default bit for data.
//
const FLAGS_USER_CODE: u64 = 0xA; // G | L.
const FLAGS_USER_DATA: u64 = 0xC; // G | D/B.

/// Returns the kernel's code segment descriptor.
///
pub(super) fn kernel_code_segment() -> u64 {
    DescriptorFlags::KERNEL_CODE64.bits()
}

/// Returns the kernel's data segment descriptor.
///
pub(super) fn kernel_data_segment() -> u64 {
    DescriptorFlags::KERNEL_DATA.bits()
}

/// Returns the two raw slots describing the given TSS.
///
pub(super) fn tss_segment(tss: &'static TaskStateSegment) -> (u64, u64) {
    match Descriptor::tss_segment(tss) {
        Descriptor::SystemSegment(low, high) => (low, high),
        // Descriptor::tss_segment always returns a system
        // segment.
        Descriptor::UserSegment(_) => unreachable!(),
    }
}

/// Encodes a descriptor from its base address, limit in
/// pages, access byte, and flags nibble.
///
/// The descriptor format only has room for the low 32 bits
/// of the base and 20 bits of page-granular limit.
///
fn encode_segment(base: u32, limit_pages: u32, access: u64, flags: u64) -> u64 {
    let base = base as u64;

    // A page-granular limit names the last valid page, so
    // a region of n pages has limit n - 1.
    let limit = limit_pages.saturating_sub(1) as u64 & 0xF_FFFF;

    (limit & 0xFFFF)
        | (base & 0xFF_FFFF) << 16
        | access << 40
        | (limit >> 16) << 48
        | flags << 52
        | (base >> 24) << 56
}

/// A code and data descriptor pair covering one user
/// context's memory region.
///
/// Both descriptors grant user privilege and are sized in
/// page units. The pair is inert data until it is loaded
/// with [`load_segment_pair`](super::load_segment_pair).
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentPair {
    code: u64,
    data: u64,
}

impl SegmentPair {
    /// Builds the descriptor pair for a region of `size`
    /// bytes starting at `base`.
    ///
    pub fn new(base: usize, size: usize) -> SegmentPair {
        let pages = pages_for(size) as u32;
        SegmentPair {
            code: encode_segment(base as u32, pages, ACCESS_USER_CODE, FLAGS_USER_CODE),
            data: encode_segment(base as u32, pages, ACCESS_USER_DATA, FLAGS_USER_DATA),
        }
    }

    /// Returns the raw code descriptor.
    ///
    pub fn code(&self) -> u64 {
        self.code
    }

    /// Returns the raw data descriptor.
    ///
    pub fn data(&self) -> u64 {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::encode_segment;
    use super::SegmentPair;
    use super::ACCESS_USER_CODE;
    use super::ACCESS_USER_DATA;
    use super::FLAGS_USER_CODE;
    use super::FLAGS_USER_DATA;

    #[test]
    fn test_encode_full_segments() {
        // A base-zero descriptor covering the full 20-bit
        // page-granular limit must match the architectural
        // flat user segments (x86_64's USER_CODE64 and
        // USER_DATA values).
        assert_eq!(
            encode_segment(0, 0x10_0000, ACCESS_USER_CODE, FLAGS_USER_CODE),
            0x00AF_FB00_0000_FFFF
        );
        assert_eq!(
            encode_segment(0, 0x10_0000, ACCESS_USER_DATA, FLAGS_USER_DATA),
            0x00CF_F300_0000_FFFF
        );
    }

    #[test]
    fn test_encode_fields() {
        // Decode the fields back out of an encoded
        // descriptor to check their placement.
        let base = 0x1234_5678u32;
        let desc = encode_segment(base, 16, ACCESS_USER_DATA, FLAGS_USER_DATA);

        let limit = (desc & 0xFFFF) | ((desc >> 48) & 0xF) << 16;
        let decoded_base = ((desc >> 16) & 0xFF_FFFF) | ((desc >> 56) & 0xFF) << 24;
        let access = (desc >> 40) & 0xFF;
        let flags = (desc >> 52) & 0xF;

        assert_eq!(limit, 15);
        assert_eq!(decoded_base, base as u64);
        assert_eq!(access, ACCESS_USER_DATA);
        assert_eq!(flags, FLAGS_USER_DATA);
    }

    #[test]
    fn test_segment_pair() {
        let pair = SegmentPair::new(0x7000, 8192);
        let other = SegmentPair::new(0x7000, 8192);
        assert_eq!(pair, other);

        // Code and data descriptors differ only in their
        // access and flags fields.
        assert_ne!(pair.code(), pair.data());
        assert_eq!(pair.code() & 0xFFFF, pair.data() & 0xFFFF);
    }
}
