// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements block storage devices for the kernel.
//!
//! A block device exposes fixed-size segments that can be read and
//! written whole. The filesystem layer consumes this interface; the
//! kernel's boot image is served by [`RamDisk`], a device backed by a
//! byte buffer in memory.

use alloc::vec::Vec;
use bitflags::bitflags;
use ember_abi::Error;

bitflags! {
    /// The list of operations that can be supported by
    /// a device.
    ///
    pub struct Operations: usize {
        /// Read data from a device.
        const READ = 1 << 0;

        /// Write data to a device.
        const WRITE = 1 << 1;
    }
}

/// Represents a block storage device.
///
pub trait Device {
    /// Returns the number of bytes in each segment.
    ///
    fn segment_size(&self) -> usize;

    /// Returns the device capacity as a number of
    /// segments.
    ///
    fn num_segments(&self) -> usize;

    /// Returns the device capacity in bytes.
    ///
    fn capacity(&self) -> usize;

    /// Returns the set of operations supported by the
    /// device.
    ///
    /// If an unsupported operation is attempted, it
    /// will return [`Error::Unsupported`].
    ///
    fn operations(&self) -> Operations;

    /// Populates a byte slice with data from the device.
    ///
    /// `segment` indicates from which segment the data
    /// should be read. The data read will start at the
    /// offset `segment` * [`segment_size`](Self::segment_size).
    ///
    /// Note that `buf` must have a length that is an exact
    /// multiple of the [`segment_size`](Self::segment_size).
    ///
    /// `read` returns the number of bytes read.
    ///
    fn read(&mut self, segment: usize, buf: &mut [u8]) -> Result<usize, Error>;

    /// Writes data from a byte slice to the device.
    ///
    /// `segment` indicates at which segment the data
    /// should be written. The data written will start at
    /// the offset `segment` * [`segment_size`](Self::segment_size).
    ///
    /// Note that `buf` must have a length that is an exact
    /// multiple of the [`segment_size`](Self::segment_size).
    ///
    /// `write` returns the number of bytes written.
    ///
    fn write(&mut self, segment: usize, buf: &[u8]) -> Result<usize, Error>;
}

/// The segment size used by [`RamDisk`] devices.
///
pub const RAM_DISK_SEGMENT_SIZE: usize = 512;

/// A block device backed by a buffer in kernel memory.
///
/// The kernel uses a RAM disk to serve the boot filesystem
/// image; tests use it to build filesystem images in memory.
///
pub struct RamDisk {
    data: Vec<u8>,
    writable: bool,
}

impl RamDisk {
    /// Returns a new RAM disk containing a copy of the
    /// given image.
    ///
    /// The image length must be an exact multiple of
    /// [`RAM_DISK_SEGMENT_SIZE`].
    ///
    pub fn new(image: &[u8], writable: bool) -> Result<Self, Error> {
        if image.is_empty() || image.len() % RAM_DISK_SEGMENT_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }

        let mut data = Vec::new();
        data.extend_from_slice(image);

        Ok(RamDisk { data, writable })
    }

    fn check_access(&self, segment: usize, len: usize) -> Result<(), Error> {
        if len == 0 || len % RAM_DISK_SEGMENT_SIZE != 0 {
            return Err(Error::InvalidArgument);
        }

        let start = segment * RAM_DISK_SEGMENT_SIZE;
        if start >= self.data.len() || len > self.data.len() - start {
            return Err(Error::InvalidArgument);
        }

        Ok(())
    }
}

impl Device for RamDisk {
    fn segment_size(&self) -> usize {
        RAM_DISK_SEGMENT_SIZE
    }

    fn num_segments(&self) -> usize {
        self.data.len() / RAM_DISK_SEGMENT_SIZE
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn operations(&self) -> Operations {
        if self.writable {
            Operations::READ | Operations::WRITE
        } else {
            Operations::READ
        }
    }

    fn read(&mut self, segment: usize, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_access(segment, buf.len())?;

        let start = segment * RAM_DISK_SEGMENT_SIZE;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);

        Ok(buf.len())
    }

    fn write(&mut self, segment: usize, buf: &[u8]) -> Result<usize, Error> {
        if !self.writable {
            return Err(Error::Unsupported);
        }

        self.check_access(segment, buf.len())?;

        let start = segment * RAM_DISK_SEGMENT_SIZE;
        self.data[start..start + buf.len()].copy_from_slice(buf);

        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::Device;
    use super::RamDisk;
    use super::RAM_DISK_SEGMENT_SIZE;
    use alloc::vec;
    use ember_abi::Error;

    #[test]
    fn test_ram_disk() {
        let mut image = vec![0u8; 4 * RAM_DISK_SEGMENT_SIZE];
        image[RAM_DISK_SEGMENT_SIZE] = 0xab;

        let mut disk = RamDisk::new(&image, true).expect("failed to build RAM disk");
        assert_eq!(disk.num_segments(), 4);
        assert_eq!(disk.capacity(), image.len());

        let mut buf = vec![0u8; RAM_DISK_SEGMENT_SIZE];
        disk.read(1, &mut buf).expect("read failed");
        assert_eq!(buf[0], 0xab);

        buf[0] = 0xcd;
        disk.write(3, &buf).expect("write failed");
        disk.read(3, &mut buf).expect("read failed");
        assert_eq!(buf[0], 0xcd);

        // Out-of-range and misaligned accesses are rejected.
        assert_eq!(disk.read(4, &mut buf), Err(Error::InvalidArgument));
        assert_eq!(disk.read(0, &mut buf[..7]), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_read_only_ram_disk() {
        let image = vec![0u8; RAM_DISK_SEGMENT_SIZE];
        let mut disk = RamDisk::new(&image, false).expect("failed to build RAM disk");

        let buf = vec![0u8; RAM_DISK_SEGMENT_SIZE];
        assert_eq!(disk.write(0, &buf), Err(Error::Unsupported));
    }
}
