// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the kernel's syscalls, allowing user processes to access
//! kernel functionality.
//!
//! The dispatcher reads the call number from `rax` of the saved frame
//! and indexes the fixed handler table; an out-of-range number
//! terminates the offending process with exit code -1. Handlers read
//! their arguments from the frame's named registers (`rbx`, `rcx`,
//! `rdx`, `rsi`, `rdi` in order), validate them, copy any user buffers
//! into kernel memory, and enable interrupts around work that may
//! block. The handler's result is written back to the frame's `rax`:
//! a non-negative value on success, or one of the stable negative
//! error codes.

use alloc::string::String;
use alloc::sync::Arc;
use ember_abi::{Error, MAX_QUANTUM, MIN_QUANTUM};
use interrupts::SavedRegisters;
use serial::println;
use sync::SemaphoreId;
use userspace::UserContext;
use x86_64::instructions::interrupts as irqctl;

/// The longest path accepted by spawn.
///
const MAX_PATH_LEN: usize = 1024;

/// The longest command line accepted by spawn, and the
/// longest string accepted by print_string.
///
const MAX_STRING_LEN: usize = 1023;

/// The signature of a system call handler.
///
type SyscallFn = fn(&mut SavedRegisters) -> Result<i64, Error>;

/// The global table of system call handler functions. The
/// indices form the kernel's stable syscall numbering.
///
static SYSCALL_TABLE: [SyscallFn; 16] = [
    sys_null,
    sys_exit,
    sys_print_string,
    sys_get_key,
    sys_set_attr,
    sys_get_cursor,
    sys_put_cursor,
    sys_spawn,
    sys_wait,
    sys_get_pid,
    sys_set_scheduling_policy,
    sys_get_time_of_day,
    sys_create_semaphore,
    sys_p,
    sys_v,
    sys_destroy_semaphore,
];

/// Dispatches one trap from a user process.
///
/// Installed as the syscall handler at boot; see
/// [`traps::init`](crate::traps::init).
///
pub fn dispatch(frame: &mut SavedRegisters) {
    let number = frame.rax as usize;
    if number >= SYSCALL_TABLE.len() {
        // An illegal syscall number kills the process.
        println!(
            "Illegal system call {} by {}",
            number,
            multitasking::current_thread().id()
        );
        multitasking::exit(-1);
    }

    frame.rax = match SYSCALL_TABLE[number](frame) {
        Ok(value) => value as u64,
        Err(error) => error.code() as u64,
    };

    // A timer tick during the call may have exhausted the
    // quantum. Honour the reschedule flag before the
    // process resumes, exactly as the interrupt return
    // path does.
    multitasking::preempt();
}

/// Returns the calling process's user context.
///
fn current_context() -> Result<Arc<UserContext>, Error> {
    multitasking::current_thread()
        .user_context()
        .ok_or(Error::Unspecified)
}

/// Copies a string argument out of the calling process.
///
fn copy_user_string(user_addr: u64, len: usize, max_len: usize) -> Result<String, Error> {
    let mut buf = current_context()?.copy_user_string(user_addr, len, max_len)?;

    // Drop the terminating nul; it marks the end of the
    // string rather than being part of it.
    buf.pop();

    String::from_utf8(buf).map_err(|_| Error::InvalidArgument)
}

/// Null system call: does nothing except return control to
/// the interrupted process.
///
fn sys_null(_frame: &mut SavedRegisters) -> Result<i64, Error> {
    Ok(0)
}

/// Exit: the interrupted process is terminated.
///
/// * `rbx` - the process exit code.
///
/// Never returns to user mode.
///
fn sys_exit(frame: &mut SavedRegisters) -> Result<i64, Error> {
    multitasking::exit(frame.rbx as i64);
}

/// Print a string to the console.
///
/// * `rbx` - user pointer of the string to be printed.
/// * `rcx` - number of bytes to print.
///
fn sys_print_string(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let length = frame.rcx as usize;
    if length > 0 {
        let buf = current_context()?.copy_user_string(frame.rbx, length, MAX_STRING_LEN)?;
        vga::put_buf(&buf[..length]);
    }

    Ok(0)
}

/// Get a single key press from the console. Suspends the
/// process until a key press is available.
///
fn sys_get_key(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let _ = frame;

    irqctl::enable();
    let keycode = keyboard::wait_for_key();
    irqctl::disable();

    Ok(keycode.0 as i64)
}

/// Set the current console text attributes.
///
/// * `rbx` - the attribute byte to use.
///
fn sys_set_attr(frame: &mut SavedRegisters) -> Result<i64, Error> {
    vga::set_current_attr(frame.rbx as u8);
    Ok(0)
}

/// Get the current cursor position.
///
/// * `rbx` - user pointer where the row is stored.
/// * `rcx` - user pointer where the column is stored.
///
fn sys_get_cursor(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let (row, col) = vga::get_cursor();

    let context = current_context()?;
    context.copy_to_user(frame.rbx, &(row as i32).to_le_bytes())?;
    context.copy_to_user(frame.rcx, &(col as i32).to_le_bytes())?;

    Ok(0)
}

/// Set the current cursor position.
///
/// * `rbx` - the new row.
/// * `rcx` - the new column.
///
fn sys_put_cursor(frame: &mut SavedRegisters) -> Result<i64, Error> {
    if vga::put_cursor(frame.rbx as usize, frame.rcx as usize) {
        Ok(0)
    } else {
        Err(Error::Unspecified)
    }
}

/// Create a new user process.
///
/// * `rbx` - user address of the executable's path.
/// * `rcx` - length of the path.
/// * `rdx` - user address of the command string.
/// * `rsi` - length of the command string.
///
/// Returns the pid of the new process.
///
fn sys_spawn(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let program = copy_user_string(frame.rbx, frame.rcx as usize, MAX_PATH_LEN)?;
    let command = copy_user_string(frame.rdx, frame.rsi as usize, MAX_STRING_LEN)?;

    // Loading the executable reads the filesystem, which
    // may block.
    irqctl::enable();
    let result = crate::spawn::spawn(&program, &command);
    irqctl::disable();

    let thread = result?;
    Ok(thread.id().as_u64() as i64)
}

/// Wait for a process to exit.
///
/// * `rbx` - pid of the process to wait for.
///
/// Returns the exit code of the process. Only the process
/// that spawned it may wait for it.
///
fn sys_wait(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let thread = multitasking::lookup(frame.rbx).ok_or(Error::NotFound)?;

    irqctl::enable();
    let exit_code = multitasking::join(&thread);
    irqctl::disable();

    exit_code
}

/// Get the pid of the current process.
///
fn sys_get_pid(_frame: &mut SavedRegisters) -> Result<i64, Error> {
    Ok(multitasking::current_thread().id().as_u64() as i64)
}

/// Set the scheduling policy.
///
/// * `rbx` - the policy: 0 for round-robin, 1 for
///   multi-level feedback.
/// * `rcx` - the quantum, in timer ticks.
///
fn sys_set_scheduling_policy(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let policy =
        ember_abi::SchedulingPolicy::from_u64(frame.rbx).ok_or(Error::InvalidArgument)?;

    let quantum = frame.rcx;
    if !(MIN_QUANTUM..=MAX_QUANTUM).contains(&quantum) {
        return Err(Error::InvalidArgument);
    }

    multitasking::set_scheduling_policy(policy, quantum);
    Ok(0)
}

/// Get the time of day: the value of the global tick
/// counter.
///
fn sys_get_time_of_day(_frame: &mut SavedRegisters) -> Result<i64, Error> {
    Ok(time::ticks() as i64)
}

/// Create a semaphore, or register with an existing one of
/// the same name.
///
/// * `rbx` - user address of the semaphore's name.
/// * `rcx` - length of the name.
/// * `rdx` - the initial semaphore count.
///
/// Returns the semaphore id.
///
fn sys_create_semaphore(frame: &mut SavedRegisters) -> Result<i64, Error> {
    let name_len = frame.rcx as usize;
    if name_len == 0 || name_len > sync::MAX_SEMAPHORE_NAME {
        return Err(Error::InvalidArgument);
    }

    let name = copy_user_string(frame.rbx, name_len, sync::MAX_SEMAPHORE_NAME)?;
    let id = sync::create_semaphore(&name, frame.rdx as i64)?;

    Ok(id.as_u64() as i64)
}

fn semaphore_id(frame: &SavedRegisters) -> Result<SemaphoreId, Error> {
    if frame.rbx == 0 {
        return Err(Error::InvalidArgument);
    }

    Ok(SemaphoreId(frame.rbx))
}

/// Acquire a semaphore, blocking until its count is
/// positive.
///
/// * `rbx` - the semaphore id.
///
fn sys_p(frame: &mut SavedRegisters) -> Result<i64, Error> {
    sync::p(semaphore_id(frame)?)?;
    Ok(0)
}

/// Release a semaphore.
///
/// * `rbx` - the semaphore id.
///
fn sys_v(frame: &mut SavedRegisters) -> Result<i64, Error> {
    sync::v(semaphore_id(frame)?)?;
    Ok(0)
}

/// Deregister from (and possibly destroy) a semaphore.
///
/// * `rbx` - the semaphore id.
///
fn sys_destroy_semaphore(frame: &mut SavedRegisters) -> Result<i64, Error> {
    sync::destroy_semaphore(semaphore_id(frame)?)?;
    Ok(0)
}
