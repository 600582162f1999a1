// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the stable ABI shared between the Ember kernel and user
//! processes.
//!
//! This crate defines the system call numbering, the error codes returned
//! to user mode, the scheduling policy codes, and the keycode format
//! produced by the keyboard driver. The values here form a stable
//! contract; they must not be renumbered.

#![no_std]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::inline_asm_x86_att_syntax)]
#![deny(clippy::missing_panics_doc)]
#![deny(clippy::panic)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![deny(unused_crate_dependencies)]
#![forbid(unsafe_code)]

pub mod keycode;

pub use keycode::Keycode;

/// The interrupt vector used to enter the kernel from
/// user mode.
///
pub const SYSCALL_VECTOR: u8 = 0x90;

/// The set of syscalls implemented by the Ember kernel.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Syscall {
    /// Do nothing and return zero.
    Null = 0,

    /// Exit the current process.
    Exit = 1,

    /// Write a string to the console.
    PrintString = 2,

    /// Wait for a key press and return its keycode.
    GetKey = 3,

    /// Set the current console text attributes.
    SetAttr = 4,

    /// Read the current cursor position.
    GetCursor = 5,

    /// Move the cursor.
    PutCursor = 6,

    /// Start a new user process from an executable file.
    Spawn = 7,

    /// Wait for a process to exit and return its exit code.
    Wait = 8,

    /// Return the current process's id.
    GetPid = 9,

    /// Select the scheduling policy and quantum.
    SetSchedulingPolicy = 10,

    /// Return the global timer tick counter.
    GetTimeOfDay = 11,

    /// Create (or register with) a named semaphore.
    CreateSemaphore = 12,

    /// Acquire a semaphore.
    P = 13,

    /// Release a semaphore.
    V = 14,

    /// Deregister from (and possibly destroy) a semaphore.
    DestroySemaphore = 15,
    // Ensure new values are added to from_u64 and to
    // check_numerical_conversion below.
}

impl Syscall {
    /// Returns the syscall with the given numerical value
    /// or None.
    ///
    pub fn from_u64(num: u64) -> Option<Self> {
        match num {
            0 => Some(Self::Null),
            1 => Some(Self::Exit),
            2 => Some(Self::PrintString),
            3 => Some(Self::GetKey),
            4 => Some(Self::SetAttr),
            5 => Some(Self::GetCursor),
            6 => Some(Self::PutCursor),
            7 => Some(Self::Spawn),
            8 => Some(Self::Wait),
            9 => Some(Self::GetPid),
            10 => Some(Self::SetSchedulingPolicy),
            11 => Some(Self::GetTimeOfDay),
            12 => Some(Self::CreateSemaphore),
            13 => Some(Self::P),
            14 => Some(Self::V),
            15 => Some(Self::DestroySemaphore),
            _ => None,
        }
    }
}

/// The set of error codes returned by kernel functions and
/// propagated unchanged to user mode by the syscall layer.
///
/// Every code is strictly negative, so a non-negative syscall
/// return value always indicates success.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// Unspecified error.
    Unspecified = -1,

    /// No such file or directory.
    NotFound = -2,

    /// Operation not supported.
    Unsupported = -3,

    /// No such device.
    NoDevice = -4,

    /// Input/output error.
    Io = -5,

    /// Resource in use.
    Busy = -6,

    /// Out of memory.
    OutOfMemory = -7,

    /// No such filesystem.
    NoFilesystem = -8,

    /// Name too long.
    NameTooLong = -9,

    /// Invalid format for filesystem.
    InvalidFilesystem = -10,

    /// Permission denied.
    AccessDenied = -11,

    /// Invalid argument.
    InvalidArgument = -12,

    /// File descriptor table full.
    FdTableFull = -13,

    /// Not a directory.
    NotADirectory = -14,

    /// File or directory already exists.
    Exists = -15,

    /// Out of space on device.
    OutOfSpace = -16,

    /// Pipe has no reader.
    BrokenPipe = -17,

    /// Invalid executable format.
    BadExecutable = -18,
    // Ensure new values are added to from_code and to
    // check_numerical_conversion below.
}

impl Error {
    /// Returns the numerical code for this error, as seen
    /// by user mode.
    ///
    pub const fn code(self) -> i64 {
        self as i64
    }

    /// Returns the error with the given numerical code
    /// or None.
    ///
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(Self::Unspecified),
            -2 => Some(Self::NotFound),
            -3 => Some(Self::Unsupported),
            -4 => Some(Self::NoDevice),
            -5 => Some(Self::Io),
            -6 => Some(Self::Busy),
            -7 => Some(Self::OutOfMemory),
            -8 => Some(Self::NoFilesystem),
            -9 => Some(Self::NameTooLong),
            -10 => Some(Self::InvalidFilesystem),
            -11 => Some(Self::AccessDenied),
            -12 => Some(Self::InvalidArgument),
            -13 => Some(Self::FdTableFull),
            -14 => Some(Self::NotADirectory),
            -15 => Some(Self::Exists),
            -16 => Some(Self::OutOfSpace),
            -17 => Some(Self::BrokenPipe),
            -18 => Some(Self::BadExecutable),
            _ => None,
        }
    }
}

/// A result type for kernel operations whose failures are
/// reported to user mode.
///
pub type Result<T> = core::result::Result<T, Error>;

/// The scheduling policies selectable with the
/// [`SetSchedulingPolicy`](Syscall::SetSchedulingPolicy) syscall.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulingPolicy {
    /// All runnable threads share one queue.
    RoundRobin = 0,

    /// Runnable threads are spread over levelled queues,
    /// with CPU-bound threads migrating to lower levels.
    MultilevelFeedback = 1,
}

impl SchedulingPolicy {
    /// Returns the policy with the given numerical value
    /// or None.
    ///
    pub fn from_u64(num: u64) -> Option<Self> {
        match num {
            0 => Some(Self::RoundRobin),
            1 => Some(Self::MultilevelFeedback),
            _ => None,
        }
    }
}

/// The smallest quantum accepted by
/// [`SetSchedulingPolicy`](Syscall::SetSchedulingPolicy), in timer ticks.
///
pub const MIN_QUANTUM: u64 = 1;

/// The largest quantum accepted by
/// [`SetSchedulingPolicy`](Syscall::SetSchedulingPolicy), in timer ticks.
///
pub const MAX_QUANTUM: u64 = 100;

#[cfg(test)]
mod tests {
    use super::Error;
    use super::SchedulingPolicy;
    use super::Syscall;

    #[test]
    fn check_numerical_conversion() {
        let syscalls = [
            Syscall::Null,
            Syscall::Exit,
            Syscall::PrintString,
            Syscall::GetKey,
            Syscall::SetAttr,
            Syscall::GetCursor,
            Syscall::PutCursor,
            Syscall::Spawn,
            Syscall::Wait,
            Syscall::GetPid,
            Syscall::SetSchedulingPolicy,
            Syscall::GetTimeOfDay,
            Syscall::CreateSemaphore,
            Syscall::P,
            Syscall::V,
            Syscall::DestroySemaphore,
        ];

        for (i, syscall) in syscalls.iter().copied().enumerate() {
            assert_eq!(i as u64, syscall as u64);
            assert_eq!(Some(syscall), Syscall::from_u64(syscall as u64));
        }

        let errors = [
            Error::Unspecified,
            Error::NotFound,
            Error::Unsupported,
            Error::NoDevice,
            Error::Io,
            Error::Busy,
            Error::OutOfMemory,
            Error::NoFilesystem,
            Error::NameTooLong,
            Error::InvalidFilesystem,
            Error::AccessDenied,
            Error::InvalidArgument,
            Error::FdTableFull,
            Error::NotADirectory,
            Error::Exists,
            Error::OutOfSpace,
            Error::BrokenPipe,
            Error::BadExecutable,
        ];

        for (i, error) in errors.iter().copied().enumerate() {
            assert_eq!(error.code(), -1 - (i as i64));
            assert_eq!(Some(error), Error::from_code(error.code()));
        }

        assert_eq!(None, Error::from_code(0));
        assert_eq!(None, Error::from_code(-19));

        assert_eq!(
            Some(SchedulingPolicy::RoundRobin),
            SchedulingPolicy::from_u64(0)
        );
        assert_eq!(
            Some(SchedulingPolicy::MultilevelFeedback),
            SchedulingPolicy::from_u64(1)
        );
        assert_eq!(None, SchedulingPolicy::from_u64(2));
    }
}
