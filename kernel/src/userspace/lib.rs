// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements per-process user contexts and the kernel/user boundary.
//!
//! A user context is a contiguous, page-aligned memory region holding a
//! process's image: its executable segments at their virtual addresses
//! (which coincide with offsets in the region), a fixed-size user stack,
//! and the command-line argument block. Two descriptors cover the region
//! as user-privilege code and data; the scheduler loads them when a
//! thread carrying the context becomes current.
//!
//! User-mode addresses are offsets into the region. Every transfer
//! across the privilege boundary goes through the context's checked copy
//! operations, which validate the whole user range before moving any
//! bytes.

#![no_std]

extern crate alloc;

mod argblock;
mod context;
mod elf;
mod load;

pub use argblock::{argument_block_size, format_argument_block};
pub use context::UserContext;
pub use elf::{parse_elf_executable, ExeFormat, ExeSegment, SegmentProt, EXE_MAX_SEGMENTS};
pub use load::{load_user_program, USER_STACK_SIZE};
