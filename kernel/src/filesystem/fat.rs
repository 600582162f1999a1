// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements a read-only FAT-style filesystem over a block device.
//!
//! The on-disk layout is deliberately simple. Block 0 holds the
//! superblock: a magic number, the location and length of the file
//! allocation table, and the location and entry count of the root
//! directory. The FAT holds one 32-bit entry per device block, chaining
//! each file's blocks; the root directory is a flat array of fixed-size
//! entries, so there are no subdirectories.
//!
//! [`build_image`] assembles an image from a list of files. The boot
//! path uses it to build the initial RAM filesystem, taking the place
//! of an offline image-building tool.

use crate::{FileInfo, FileSystem, FileType, Permissions, SEPARATOR};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;
use ember_abi::Error;
use storage::block::Device;

/// The block size the filesystem is laid out in. This must
/// match the underlying device's segment size.
///
pub const BLOCK_SIZE: usize = 512;

/// The magic number identifying a filesystem image.
///
const FAT_MAGIC: u32 = 0x4652_4154; // "FRAT".

/// A FAT entry marking the end of a file's chain.
///
const FAT_ENTRY_EOF: u32 = 0xffff_ffff;

/// A FAT entry marking an unused block.
///
const FAT_ENTRY_FREE: u32 = 0;

/// The size of one directory entry on disk.
///
const DIR_ENTRY_SIZE: usize = 64;

/// The longest representable file name.
///
const MAX_NAME: usize = 48;

bitflags! {
    /// Directory entry flags.
    ///
    struct EntryFlags: u32 {
        /// The entry names a directory.
        const DIRECTORY = 1 << 0;

        /// The entry's file may not be modified.
        const READ_ONLY = 1 << 1;
    }
}

/// The superblock, stored at the start of block 0.
///
/// All fields are little-endian 32-bit values: the magic
/// number, the FAT's first block and length in blocks, and
/// the root directory's first block and entry count.
///
#[derive(Clone, Copy, Debug)]
struct SuperBlock {
    magic: u32,
    fat_offset: u32,
    fat_length: u32,
    root_dir_offset: u32,
    root_dir_count: u32,
}

impl SuperBlock {
    fn parse(block: &[u8]) -> Result<SuperBlock, Error> {
        let field = |index: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&block[index * 4..index * 4 + 4]);
            u32::from_le_bytes(bytes)
        };

        let superblock = SuperBlock {
            magic: field(0),
            fat_offset: field(1),
            fat_length: field(2),
            root_dir_offset: field(3),
            root_dir_count: field(4),
        };

        if superblock.magic != FAT_MAGIC {
            return Err(Error::InvalidFilesystem);
        }

        // Do the filesystem parameters look reasonable?
        if superblock.fat_offset == 0 || superblock.fat_length == 0 || superblock.root_dir_offset == 0
        {
            return Err(Error::InvalidFilesystem);
        }

        Ok(superblock)
    }

    fn encode(&self, block: &mut [u8]) {
        let fields = [
            self.magic,
            self.fat_offset,
            self.fat_length,
            self.root_dir_offset,
            self.root_dir_count,
        ];
        for (index, value) in fields.iter().enumerate() {
            block[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
}

/// One root directory entry.
///
#[derive(Clone, Debug)]
struct DirEntry {
    flags: EntryFlags,
    first_block: u32,
    file_size: u32,
    name: String,
}

impl DirEntry {
    fn parse(raw: &[u8]) -> Result<DirEntry, Error> {
        let field = |index: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&raw[index * 4..index * 4 + 4]);
            u32::from_le_bytes(bytes)
        };

        let name_bytes = &raw[16..16 + MAX_NAME];
        let len = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_NAME);
        let name = core::str::from_utf8(&name_bytes[..len])
            .map_err(|_| Error::InvalidFilesystem)?;

        Ok(DirEntry {
            flags: EntryFlags::from_bits_truncate(field(0)),
            first_block: field(1),
            file_size: field(2),
            name: String::from(name),
        })
    }

    fn encode(&self, raw: &mut [u8]) {
        raw[0..4].copy_from_slice(&self.flags.bits().to_le_bytes());
        raw[4..8].copy_from_slice(&self.first_block.to_le_bytes());
        raw[8..12].copy_from_slice(&self.file_size.to_le_bytes());
        raw[16..16 + self.name.len()].copy_from_slice(self.name.as_bytes());
    }

    fn info(&self) -> FileInfo {
        let mut permissions = Permissions::READ | Permissions::EXECUTE;
        if !self.flags.contains(EntryFlags::READ_ONLY) {
            permissions |= Permissions::WRITE;
        }

        FileInfo {
            name: self.name.clone(),
            file_type: if self.flags.contains(EntryFlags::DIRECTORY) {
                FileType::Directory
            } else {
                FileType::RegularFile
            },
            permissions,
            size: self.file_size as usize,
        }
    }
}

/// A mounted FAT-style filesystem.
///
/// The FAT and root directory are read into memory when
/// the filesystem mounts; only file contents are read from
/// the device afterwards.
///
pub struct FatFileSystem {
    device: Box<dyn Device + Send>,
    fat: Vec<u32>,
    root: Vec<DirEntry>,
}

impl FatFileSystem {
    /// Mounts the filesystem on the given device.
    ///
    pub fn mount(mut device: Box<dyn Device + Send>) -> Result<FatFileSystem, Error> {
        if device.segment_size() != BLOCK_SIZE {
            return Err(Error::InvalidFilesystem);
        }

        // Read the superblock.
        let mut block = vec![0u8; BLOCK_SIZE];
        device.read(0, &mut block)?;
        let superblock = SuperBlock::parse(&block)?;

        // Read the FAT.
        let mut fat = Vec::new();
        for i in 0..superblock.fat_length {
            device.read((superblock.fat_offset + i) as usize, &mut block)?;
            for chunk in block.chunks_exact(4) {
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(chunk);
                fat.push(u32::from_le_bytes(bytes));
            }
        }

        // Read the root directory.
        let mut root = Vec::new();
        let dir_bytes = superblock.root_dir_count as usize * DIR_ENTRY_SIZE;
        let dir_blocks = align::align_up_usize(dir_bytes, BLOCK_SIZE) / BLOCK_SIZE;
        let mut raw_dir = Vec::new();
        for i in 0..dir_blocks {
            device.read(superblock.root_dir_offset as usize + i, &mut block)?;
            raw_dir.extend_from_slice(&block);
        }

        for i in 0..superblock.root_dir_count as usize {
            let raw = &raw_dir[i * DIR_ENTRY_SIZE..(i + 1) * DIR_ENTRY_SIZE];
            root.push(DirEntry::parse(raw)?);
        }

        Ok(FatFileSystem { device, fat, root })
    }

    /// Resolves a path relative to the mount point. The
    /// namespace is flat, so anything with an interior
    /// separator is not found.
    ///
    fn lookup(&self, path: &str) -> Result<&DirEntry, Error> {
        let name = path.strip_prefix(SEPARATOR).unwrap_or(path);
        if name.is_empty() {
            return Err(Error::NotFound);
        }
        if name.contains(SEPARATOR) {
            return Err(Error::NotADirectory);
        }

        self.root
            .iter()
            .find(|entry| entry.name == name)
            .ok_or(Error::NotFound)
    }
}

impl FileSystem for FatFileSystem {
    fn stat(&mut self, path: &str) -> Result<FileInfo, Error> {
        Ok(self.lookup(path)?.info())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, Error> {
        let (mut current, size) = {
            let entry = self.lookup(path)?;
            if entry.flags.contains(EntryFlags::DIRECTORY) {
                return Err(Error::Unsupported);
            }
            (entry.first_block, entry.file_size as usize)
        };

        // Traverse the FAT, reading the file's blocks in
        // chain order.
        let mut contents = Vec::with_capacity(size);
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            if current == FAT_ENTRY_FREE || current == FAT_ENTRY_EOF {
                // Unexpected end of chain: probable
                // filesystem corruption.
                return Err(Error::Io);
            }

            self.device.read(current as usize, &mut block)?;

            let take = remaining.min(BLOCK_SIZE);
            contents.extend_from_slice(&block[..take]);
            remaining -= take;

            current = *self.fat.get(current as usize).ok_or(Error::Io)?;
        }

        Ok(contents)
    }
}

/// Assembles a filesystem image holding the given files.
///
/// This takes the place of an offline image-building tool:
/// the boot path feeds the result to a RAM disk and mounts
/// it. Returns an error if a name is too long for a
/// directory entry.
///
pub fn build_image(files: &[(&str, &[u8])]) -> Result<Vec<u8>, Error> {
    for (name, _) in files {
        if name.is_empty() || name.len() > MAX_NAME {
            return Err(Error::NameTooLong);
        }
    }

    // Lay out the image: superblock, FAT, directory, then
    // each file's data blocks in directory order.
    let dir_bytes = files.len() * DIR_ENTRY_SIZE;
    let dir_blocks = align::align_up_usize(dir_bytes, BLOCK_SIZE) / BLOCK_SIZE;
    let data_blocks: usize = files
        .iter()
        .map(|(_, data)| align::align_up_usize(data.len(), BLOCK_SIZE) / BLOCK_SIZE)
        .sum();

    // Provisionally size the FAT to cover every block in
    // the image. The FAT's own length feeds back into the
    // block count, so grow it until it covers itself.
    let mut fat_blocks = 1;
    loop {
        let total = 1 + fat_blocks + dir_blocks + data_blocks;
        let needed = align::align_up_usize(total * 4, BLOCK_SIZE) / BLOCK_SIZE;
        if needed <= fat_blocks {
            break;
        }
        fat_blocks = needed;
    }

    let fat_offset = 1;
    let root_dir_offset = fat_offset + fat_blocks;
    let first_data_block = root_dir_offset + dir_blocks;
    let total_blocks = first_data_block + data_blocks;

    let mut image = vec![0u8; total_blocks * BLOCK_SIZE];
    let mut fat = vec![FAT_ENTRY_FREE; fat_blocks * BLOCK_SIZE / 4];

    // Write the directory entries and file contents,
    // chaining each file's blocks in the FAT.
    let mut next_free = first_data_block;
    for (index, (name, data)) in files.iter().enumerate() {
        let blocks = align::align_up_usize(data.len(), BLOCK_SIZE) / BLOCK_SIZE;

        let entry = DirEntry {
            flags: EntryFlags::READ_ONLY,
            first_block: next_free as u32,
            file_size: data.len() as u32,
            name: String::from(*name),
        };

        let offset = root_dir_offset * BLOCK_SIZE + index * DIR_ENTRY_SIZE;
        entry.encode(&mut image[offset..offset + DIR_ENTRY_SIZE]);

        image[next_free * BLOCK_SIZE..next_free * BLOCK_SIZE + data.len()].copy_from_slice(data);

        for i in 0..blocks {
            fat[next_free + i] = if i + 1 == blocks {
                FAT_ENTRY_EOF
            } else {
                (next_free + i + 1) as u32
            };
        }
        next_free += blocks;
    }

    // Write the FAT.
    for (i, entry) in fat.iter().enumerate() {
        let offset = fat_offset * BLOCK_SIZE + i * 4;
        image[offset..offset + 4].copy_from_slice(&entry.to_le_bytes());
    }

    // Write the superblock last, once the layout is final.
    let superblock = SuperBlock {
        magic: FAT_MAGIC,
        fat_offset: fat_offset as u32,
        fat_length: fat_blocks as u32,
        root_dir_offset: root_dir_offset as u32,
        root_dir_count: files.len() as u32,
    };
    superblock.encode(&mut image[..BLOCK_SIZE]);

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::build_image;
    use super::FatFileSystem;
    use super::BLOCK_SIZE;
    use crate::{FileSystem, FileType};
    use alloc::boxed::Box;
    use alloc::vec;
    use alloc::vec::Vec;
    use ember_abi::Error;
    use storage::block::RamDisk;

    fn mount_image(image: &[u8]) -> FatFileSystem {
        let disk = RamDisk::new(image, false).expect("failed to build RAM disk");
        FatFileSystem::mount(Box::new(disk)).expect("mount failed")
    }

    #[test]
    fn test_read_files() {
        // One small file and one spanning several blocks.
        let mut big = Vec::new();
        for i in 0..(2 * BLOCK_SIZE + 77) {
            big.push((i % 251) as u8);
        }

        let image = build_image(&[("hello.exe", b"hello, world"), ("big.bin", &big)])
            .expect("build_image failed");
        let mut fs = mount_image(&image);

        let info = fs.stat("/hello.exe").expect("stat failed");
        assert_eq!(info.name, "hello.exe");
        assert_eq!(info.file_type, FileType::RegularFile);
        assert_eq!(info.size, 12);

        assert_eq!(fs.read_file("/hello.exe").expect("read failed"), b"hello, world");
        assert_eq!(fs.read_file("/big.bin").expect("read failed"), big);

        // Names resolve with or without the leading
        // separator, but nothing nests.
        assert!(fs.read_file("hello.exe").is_ok());
        assert_eq!(fs.read_file("/no-such-file"), Err(Error::NotFound));
        assert_eq!(fs.stat("/a/b"), Err(Error::NotADirectory));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let image = build_image(&[("a", b"1")]).expect("build_image failed");

        let mut corrupt = image.clone();
        corrupt[0] ^= 0xff;
        let disk = RamDisk::new(&corrupt, false).expect("failed to build RAM disk");
        assert!(matches!(
            FatFileSystem::mount(Box::new(disk)),
            Err(Error::InvalidFilesystem)
        ));
    }

    #[test]
    fn test_corrupt_chain_detected() {
        let image = build_image(&[("chained", &vec![7u8; 3 * BLOCK_SIZE])])
            .expect("build_image failed");

        // Find the superblock's FAT location and cut the
        // file's chain short by marking its first block
        // EOF.
        let mut corrupt = image.clone();
        let fat_offset = u32::from_le_bytes([image[4], image[5], image[6], image[7]]) as usize;

        let mut fs = mount_image(&image);
        let first_block = {
            let entry = fs.lookup("chained").expect("lookup failed");
            entry.first_block as usize
        };

        let slot = fat_offset * BLOCK_SIZE + first_block * 4;
        corrupt[slot..slot + 4].copy_from_slice(&super::FAT_ENTRY_EOF.to_le_bytes());

        let mut fs = mount_image(&corrupt);
        assert_eq!(fs.read_file("chained"), Err(Error::Io));
    }
}
