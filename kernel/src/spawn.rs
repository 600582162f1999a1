// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Starts user processes from executables on the filesystem.
//!
//! Spawning reads the executable's bytes through the VFS, parses them
//! as ELF, builds a user context holding the process image and argument
//! block, and starts a user thread running it. A bare program name (no
//! separator) is resolved against the executable search path, trying
//! each directory in turn and appending `.exe` when the name has no
//! suffix.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ember_abi::Error;
use filesystem::SEPARATOR;
use multitasking::Thread;

/// The `:`-separated list of directories searched for bare
/// program names.
///
const DEFAULT_PATH: &str = "/c:/a";

/// The suffix appended to bare program names that lack
/// one.
///
const EXE_SUFFIX: &str = ".exe";

/// Reads the executable named by `program`.
///
/// An explicit path (one containing a separator) is read
/// as-is. A bare name is tried in each directory of the
/// search path until one succeeds. Any failure to find the
/// file reports [`Error::NotFound`].
///
fn read_executable(program: &str) -> Result<Vec<u8>, Error> {
    if program.contains(SEPARATOR) {
        return filesystem::read_fully(program).map_err(|_| Error::NotFound);
    }

    let name = if program.ends_with(EXE_SUFFIX) {
        String::from(program)
    } else {
        format!("{}{}", program, EXE_SUFFIX)
    };

    for dir in DEFAULT_PATH.split(':') {
        let candidate = format!("{}{}{}", dir, SEPARATOR, name);
        if let Ok(contents) = filesystem::read_fully(&candidate) {
            return Ok(contents);
        }
    }

    Err(Error::NotFound)
}

/// Spawns a user process.
///
/// `program` names the executable file; `command` is the
/// complete command line, which becomes the new process's
/// argument block. Returns the new thread; its id is the
/// process id reported to user mode.
///
/// The caller becomes the new process's owner and is
/// expected to collect its exit code with the wait
/// syscall.
///
pub fn spawn(program: &str, command: &str) -> Result<Arc<Thread>, Error> {
    let exe_data = read_executable(program)?;

    let format = userspace::parse_elf_executable(&exe_data)?;
    let context = userspace::load_user_program(&exe_data, &format, command)?;
    drop(exe_data);

    multitasking::start_user_thread(Arc::new(context), false)
}
