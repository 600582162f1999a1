// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Handles the hardware timer for regular ticks.
//!
//! This crate programs the [Programmable Interval Timer](https://en.wikipedia.org/wiki/Programmable_interval_timer)
//! (PIT) and maintains the kernel's monotonic tick counter. The counter
//! is incremented once per timer interrupt by the kernel's timer handler
//! and is the time base for scheduling quanta and the `get_time_of_day`
//! syscall.

#![no_std]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]

mod ticker;

pub use ticker::tick;
pub use ticker::ticks;
pub use ticker::TICKS_PER_SECOND;

/// Initialise the time functionality.
///
/// `init` sets the PIT's timer frequency to
/// [`TICKS_PER_SECOND`] Hz. The tick counter does not advance
/// until the kernel registers a handler for the timer IRQ.
///
pub fn init() {
    ticker::init();
}
