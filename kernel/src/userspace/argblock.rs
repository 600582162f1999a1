// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Builds the command-line argument block for a new process.
//!
//! The block lives at a user address inside the process's region and is
//! laid out contiguously: a header of `{argc, argv}`, then the argv
//! array of `argc + 1` pointers (the last one null), then the argument
//! strings themselves, each nul-terminated. Every pointer in the block
//! is a user-mode address, computed from the block's own user address.
//!
//! Tokenization splits the command on spaces, tabs, carriage returns,
//! and line feeds, with no quoting or escaping.

/// The size in bytes of the `{argc, argv}` header at the
/// start of the block.
///
const HEADER_SIZE: usize = 16;

/// The size in bytes of each pointer in the block.
///
const POINTER_SIZE: usize = 8;

fn is_space(byte: u8) -> bool {
    byte == b' ' || byte == b'\t' || byte == b'\r' || byte == b'\n'
}

/// An iterator over the whitespace-separated tokens of a
/// command string.
///
fn tokens(command: &str) -> impl Iterator<Item = &[u8]> {
    command
        .as_bytes()
        .split(|&byte| is_space(byte))
        .filter(|token| !token.is_empty())
}

/// Determines the number of arguments and the buffer size
/// needed to format an argument block for the given
/// command.
///
pub fn argument_block_size(command: &str) -> (usize, usize) {
    let mut num_args = 0;
    let mut size = HEADER_SIZE;

    for token in tokens(command) {
        num_args += 1;
        size += POINTER_SIZE; // The argv entry.
        size += token.len() + 1; // The string, nul-terminated.
    }

    // argv is terminated by a null pointer.
    size += POINTER_SIZE;

    (num_args, size)
}

fn put_u64(block: &mut [u8], offset: usize, value: u64) {
    block[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Formats a process's argument block into `block`.
///
/// [`argument_block_size`] must be called first to size the
/// buffer and count the arguments. `user_address` is the
/// address the block will have in user mode; every pointer
/// stored in the block is relative to it.
///
/// # Panics
///
/// `format_argument_block` will panic if `block` is smaller
/// than the size reported by [`argument_block_size`].
///
pub fn format_argument_block(
    block: &mut [u8],
    num_args: usize,
    user_address: u64,
    command: &str,
) {
    // The header: argc, then argv pointing immediately
    // after the header.
    put_u64(block, 0, num_args as u64);
    put_u64(block, 8, user_address + HEADER_SIZE as u64);

    // The argv array sits after the header; the strings
    // are packed after the array's null terminator.
    let mut argv = HEADER_SIZE;
    let mut dst = HEADER_SIZE + (num_args + 1) * POINTER_SIZE;

    for token in tokens(command) {
        put_u64(block, argv, user_address + dst as u64);
        argv += POINTER_SIZE;

        block[dst..dst + token.len()].copy_from_slice(token);
        dst += token.len();
        block[dst] = 0;
        dst += 1;
    }

    // Argv terminated by a null pointer.
    put_u64(block, argv, 0);
}

#[cfg(test)]
mod tests {
    use super::argument_block_size;
    use super::format_argument_block;
    use super::HEADER_SIZE;
    use super::POINTER_SIZE;
    use alloc::vec;
    use alloc::vec::Vec;

    fn get_u64(block: &[u8], offset: usize) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&block[offset..offset + 8]);
        u64::from_le_bytes(bytes)
    }

    /// Parses a formatted block back into its argument
    /// strings, checking the pointer structure on the way.
    ///
    fn parse_block(block: &[u8], user_address: u64) -> Vec<Vec<u8>> {
        let argc = get_u64(block, 0) as usize;
        let argv = get_u64(block, 8);
        assert_eq!(argv, user_address + HEADER_SIZE as u64);

        let mut args = Vec::new();
        for i in 0..argc {
            let slot = (argv - user_address) as usize + i * POINTER_SIZE;
            let ptr = get_u64(block, slot);
            assert!(ptr > user_address);

            let mut offset = (ptr - user_address) as usize;
            let mut arg = Vec::new();
            while block[offset] != 0 {
                arg.push(block[offset]);
                offset += 1;
            }

            args.push(arg);
        }

        // The array is terminated by a null pointer.
        let terminator = (argv - user_address) as usize + argc * POINTER_SIZE;
        assert_eq!(get_u64(block, terminator), 0);

        args
    }

    #[test]
    fn test_block_reproduces_tokens() {
        let command = "shell.exe -c  ls\t/c\r\n";
        let (num_args, size) = argument_block_size(command);
        assert_eq!(num_args, 4);

        let user_address = 0x6000;
        let mut block = vec![0u8; size];
        format_argument_block(&mut block, num_args, user_address, command);

        let args = parse_block(&block, user_address);
        assert_eq!(
            args,
            vec![
                b"shell.exe".to_vec(),
                b"-c".to_vec(),
                b"ls".to_vec(),
                b"/c".to_vec(),
            ]
        );
    }

    #[test]
    fn test_empty_command() {
        let (num_args, size) = argument_block_size("   ");
        assert_eq!(num_args, 0);
        assert_eq!(size, HEADER_SIZE + POINTER_SIZE);

        let mut block = vec![0u8; size];
        format_argument_block(&mut block, num_args, 0x8000, "   ");

        assert_eq!(parse_block(&block, 0x8000), Vec::<Vec<u8>>::new());
    }
}
