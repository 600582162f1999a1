// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides functionality to parse and validate ELF executables.
//!
//! The kernel accepts a deliberately small subset of ELF: a 64-bit
//! little-endian executable whose program header table yields at most
//! [`EXE_MAX_SEGMENTS`] loadable segments. Anything else, such as an
//! interpreted binary or a thread-local storage segment, is rejected
//! before any memory is allocated for the process.

use alloc::vec::Vec;
use bitflags::bitflags;
use ember_abi::Error;
use xmas_elf::header::{sanity_check, Class, Data, Machine, Version};
use xmas_elf::program::{ProgramHeader, Type};
use xmas_elf::ElfFile;

/// The maximum number of loadable segments we allow.
///
/// Normally an executable needs only a code segment and a
/// data segment; linkers sometimes emit a third. Anything
/// beyond that is rejected.
///
pub const EXE_MAX_SEGMENTS: usize = 3;

bitflags! {
    /// The memory protections requested by a segment,
    /// using the ELF `p_flags` values.
    ///
    pub struct SegmentProt: u32 {
        /// The segment is executable.
        const EXECUTE = 1 << 0;

        /// The segment is writable.
        const WRITE = 1 << 1;

        /// The segment is readable.
        const READ = 1 << 2;
    }
}

/// A segment of an executable: a region of the file to be
/// placed into process memory.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExeSegment {
    /// Offset of the segment's data in the executable
    /// file.
    pub offset_in_file: usize,

    /// Length of the segment's data in the file.
    pub length_in_file: usize,

    /// The segment's start address in user memory.
    pub start_address: usize,

    /// The segment's size in memory. Any tail beyond the
    /// file data is zero.
    pub size_in_memory: usize,

    /// The protections the segment requests.
    pub prot: SegmentProt,
}

/// All information needed to load and start an executable.
///
#[derive(Debug, PartialEq, Eq)]
pub struct ExeFormat {
    /// The loadable segments, in file order.
    pub segments: Vec<ExeSegment>,

    /// The code entry point, as a user address.
    pub entry_address: u64,
}

/// From the bytes of an ELF executable, determine how its
/// segments need to be loaded into memory.
///
/// All structural problems map to
/// [`Error::BadExecutable`].
///
pub fn parse_elf_executable(data: &[u8]) -> Result<ExeFormat, Error> {
    parse(data).map_err(|_reason| Error::BadExecutable)
}

fn parse(data: &[u8]) -> Result<ExeFormat, &'static str> {
    const GNU_STACK: Type = Type::OsSpecific(1685382481); // GNU stack segment.

    let elf = ElfFile::new(data)?;
    sanity_check(&elf)?;

    match elf.header.pt1.class() {
        Class::SixtyFour => {}
        Class::ThirtyTwo => return Err("32-bit binaries are not supported"),
        _ => return Err("unknown binary class"),
    }

    match elf.header.pt1.data() {
        Data::LittleEndian => {}
        Data::BigEndian => return Err("big endian binaries are not supported"),
        _ => return Err("unknown binary data"),
    }

    match elf.header.pt1.version() {
        Version::Current => {}
        _ => return Err("unknown binary version"),
    }

    // We ignore the OS ABI.

    match elf.header.pt2.machine().as_machine() {
        Machine::X86_64 => {}
        _ => return Err("unsupported instruction set architecture"),
    }

    let entry_address = elf.header.pt2.entry_point();

    // Collect the loadable segments, checking everything
    // is correct so the loader cannot fail half-way
    // through building a process image.
    let mut segments = Vec::new();
    for prog in elf.program_iter() {
        match prog {
            ProgramHeader::Ph64(header) => {
                let typ = header.get_type()?;
                match typ {
                    Type::Load => {
                        if header.mem_size < header.file_size {
                            return Err("program segment is larger on disk than in memory");
                        }

                        let offset = header.offset as usize;
                        let length = header.file_size as usize;
                        if offset.checked_add(length).map_or(true, |end| end > data.len()) {
                            return Err("program segment data is outside the file");
                        }

                        header
                            .virtual_addr
                            .checked_add(header.mem_size)
                            .ok_or("invalid memory size in program segment")?;

                        if segments.len() == EXE_MAX_SEGMENTS {
                            return Err("too many program segments");
                        }

                        segments.push(ExeSegment {
                            offset_in_file: offset,
                            length_in_file: length,
                            start_address: header.virtual_addr as usize,
                            size_in_memory: header.mem_size as usize,
                            prot: SegmentProt::from_bits_truncate(header.flags.0),
                        });
                    }
                    Type::Tls => {
                        return Err("thread-local storage is not yet supported");
                    }
                    Type::Interp => {
                        return Err("interpreted binaries are not yet supported");
                    }
                    GNU_STACK => {
                        if header.flags.is_execute() {
                            return Err("executable stacks are not supported");
                        }
                    }
                    _ => {} // Ignore for now.
                }
            }
            ProgramHeader::Ph32(_) => return Err("32-bit binaries are not supported"),
        }
    }

    // Check that the entry point is in one of the
    // segments.
    segments
        .iter()
        .find(|segment| {
            let start = segment.start_address as u64;
            let end = start + segment.size_in_memory as u64;
            start <= entry_address && entry_address < end
        })
        .ok_or("entry point is not in any program segment")?;

    Ok(ExeFormat {
        segments,
        entry_address,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::parse_elf_executable;
    use super::SegmentProt;
    use alloc::vec::Vec;
    use ember_abi::Error;
    use hex_literal::hex;

    /// A minimal statically-linked x86_64 executable.
    ///
    /// ```text
    /// % readelf -W -l simple.elf
    ///
    /// Elf file type is EXEC (Executable file)
    /// Entry point 0x201170
    /// There are 5 program headers, starting at offset 64
    ///
    /// Program Headers:
    ///   Type      Offset   VirtAddr           FileSiz  MemSiz   Flg Align
    ///   PHDR      0x000040 0x0000000000200040 0x000118 0x000118 R   0x8
    ///   LOAD      0x000000 0x0000000000200000 0x000170 0x000170 R   0x1000
    ///   LOAD      0x000170 0x0000000000201170 0x000005 0x000005 R E 0x1000
    ///   GNU_STACK 0x000000 0x0000000000000000 0x000000 0x000000 RW  0
    ///   NOTE      0x000158 0x0000000000200158 0x000018 0x000018 R   0x4
    /// ```
    ///
    pub(crate) fn simple_executable() -> Vec<u8> {
        let mut elf = hex!(
            "7f454c4602010100000000000000000002003e0001000000701120000000"
            "000040000000000000000002000000000000000000004000380005004000"
            "070005000600000004000000400000000000000040002000000000004000"
            "200000000000180100000000000018010000000000000800000000000000"
            "010000000400000000000000000000000000200000000000000020000000"
            "000070010000000000007001000000000000001000000000000001000000"
            "050000007001000000000000701120000000000070112000000000000500"
            "0000000000000500000000000000001000000000000051e5746406000000"
            "000000000000000000000000000000000000000000000000000000000000"
            "000000000000000000000000000000000000040000000400000058010000"
            "000000005801200000000000580120000000000018000000000000001800"
            "0000000000000400000000000000040000000800000003000000474e5500"
            "2dd0365d5b0e7deb"
        )
        .to_vec();
        elf.extend_from_slice(&hex!("4831c00f05")); // xor eax, eax; syscall.
        elf
    }

    #[test]
    fn test_elf_parsing() {
        let simple = simple_executable();
        let format = parse_elf_executable(&simple).expect("failed to parse executable");

        assert_eq!(format.entry_address, 0x201170);
        assert_eq!(format.segments.len(), 2);

        let first = &format.segments[0];
        assert_eq!(first.offset_in_file, 0);
        assert_eq!(first.length_in_file, 0x170);
        assert_eq!(first.start_address, 0x200000);
        assert_eq!(first.size_in_memory, 0x170);
        assert_eq!(first.prot, SegmentProt::READ);

        let second = &format.segments[1];
        assert_eq!(second.offset_in_file, 0x170);
        assert_eq!(second.length_in_file, 5);
        assert_eq!(second.start_address, 0x201170);
        assert_eq!(second.size_in_memory, 5);
        assert_eq!(second.prot, SegmentProt::READ | SegmentProt::EXECUTE);
    }

    #[test]
    fn test_malformed_executables_rejected() {
        let simple = simple_executable();

        // Truncation loses segment data and headers.
        assert_eq!(
            parse_elf_executable(&simple[..100]),
            Err(Error::BadExecutable)
        );

        // Not an ELF file at all.
        assert_eq!(
            parse_elf_executable(b"MZ this is not an ELF binary"),
            Err(Error::BadExecutable)
        );
    }
}
