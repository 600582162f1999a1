// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Loads a parsed executable into a fresh user context.
//!
//! The process image is laid out from the bottom of the region: the
//! executable's segments at their virtual addresses, then the user
//! stack, then the argument block. The stack grows down from the
//! argument block, so the initial stack pointer is the block's address.

use crate::argblock;
use crate::context::UserContext;
use crate::elf::ExeFormat;
use align::round_up_to_page;
use alloc::vec;
use ember_abi::Error;

/// The size in bytes of a process's user stack.
///
pub const USER_STACK_SIZE: usize = 8192;

/// Loads a user executable into memory by creating a
/// [`UserContext`] holding its image.
///
/// `exe_data` is the executable file's bytes, `format` the
/// parsed segment information, and `command` the complete
/// command line, which becomes the process's argument
/// block.
///
pub fn load_user_program(
    exe_data: &[u8],
    format: &ExeFormat,
    command: &str,
) -> Result<UserContext, Error> {
    // Determine how much memory the segments need.
    let mut max_va = 0;
    for segment in format.segments.iter() {
        let top = segment
            .start_address
            .checked_add(segment.size_in_memory)
            .ok_or(Error::BadExecutable)?;
        if top > max_va {
            max_va = top;
        }
    }

    // The argument block sits above the stack.
    let (num_args, arg_block_size) = argblock::argument_block_size(command);
    let arg_block_address = round_up_to_page(max_va) + USER_STACK_SIZE;
    let size = arg_block_address + arg_block_size;

    let mut context = UserContext::new(size)?;

    // Copy each segment into place. Any tail up to the
    // segment's memory size is already zero.
    for segment in format.segments.iter() {
        let data = exe_data
            .get(segment.offset_in_file..segment.offset_in_file + segment.length_in_file)
            .ok_or(Error::BadExecutable)?;
        context.write(segment.start_address, data)?;
    }

    // Format the argument block at its user address.
    let mut block = vec![0u8; arg_block_size];
    argblock::format_argument_block(&mut block, num_args, arg_block_address as u64, command);
    context.write(arg_block_address, &block)?;

    // The stack grows down from the argument block.
    context.set_entry(
        format.entry_address,
        arg_block_address as u64,
        arg_block_address as u64,
    );

    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::load_user_program;
    use super::USER_STACK_SIZE;
    use crate::elf::tests::simple_executable;
    use crate::elf::parse_elf_executable;
    use align::round_up_to_page;

    #[test]
    fn test_load_simple_executable() {
        let exe = simple_executable();
        let format = parse_elf_executable(&exe).expect("failed to parse executable");
        let context =
            load_user_program(&exe, &format, "simple.exe one two").expect("failed to load");

        // The image is laid out segments, stack, argument
        // block.
        let max_va = 0x201170 + 5;
        let arg_block_address = round_up_to_page(max_va) + USER_STACK_SIZE;
        assert_eq!(context.entry_address(), 0x201170);
        assert_eq!(context.argument_block_address(), arg_block_address as u64);
        assert_eq!(context.initial_stack_pointer(), arg_block_address as u64);
        assert_eq!(context.size(), round_up_to_page(arg_block_address + 16 + 4 * 8 + 19));

        // Segment bytes land at their virtual addresses.
        let mut code = [0u8; 5];
        context
            .copy_from_user(&mut code, 0x201170)
            .expect("copy_from_user failed");
        assert_eq!(&code, &exe[0x170..0x175]);

        let mut header = [0u8; 4];
        context
            .copy_from_user(&mut header, 0x200000)
            .expect("copy_from_user failed");
        assert_eq!(&header, b"\x7fELF");

        // The argument block holds the command's tokens.
        let mut argc = [0u8; 8];
        context
            .copy_from_user(&mut argc, arg_block_address as u64)
            .expect("copy_from_user failed");
        assert_eq!(u64::from_le_bytes(argc), 3);
    }
}
