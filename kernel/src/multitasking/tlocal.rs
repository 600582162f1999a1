// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements thread-local storage, in the style of POSIX
//! thread-specific data.
//!
//! Each thread carries [`MAX_TLOCAL_KEYS`] slots, addressed by small
//! integer keys allocated from a global counter. A key may have a
//! destructor, which runs on the value left in the slot when its thread
//! exits. Destructors can store into other slots, so exit iterates up to
//! [`MIN_DESTRUCTOR_ITERATIONS`] passes, stopping early once a pass
//! clears nothing.

use crate::thread::{current_thread, Thread};
use ember_abi::Error;
use interrupts::{in_atomic_section, with_atomic};
use x86_64::instructions::interrupts as irqctl;

/// The number of thread-local slots per thread.
///
pub const MAX_TLOCAL_KEYS: usize = 128;

/// The maximum number of destructor passes run at thread
/// exit.
///
const MIN_DESTRUCTOR_ITERATIONS: usize = 4;

/// A key naming one thread-local slot in every thread.
///
pub type TlocalKey = usize;

/// A destructor for thread-local values, invoked at thread
/// exit with the value left in the slot.
///
pub type TlocalDestructor = fn(*mut u8);

struct TlocalKeys {
    count: usize,
    destructors: [Option<TlocalDestructor>; MAX_TLOCAL_KEYS],
}

/// The global key counter and the destructor for each
/// allocated key.
///
static KEYS: spin::Mutex<TlocalKeys> = spin::Mutex::new(TlocalKeys {
    count: 0,
    destructors: [None; MAX_TLOCAL_KEYS],
});

/// Allocates a key for accessing thread-local data,
/// pairing it with an optional destructor.
///
pub fn tlocal_create(destructor: Option<TlocalDestructor>) -> Result<TlocalKey, Error> {
    with_atomic(|| {
        let mut keys = KEYS.lock();
        if keys.count == MAX_TLOCAL_KEYS {
            return Err(Error::Unspecified);
        }

        let key = keys.count;
        keys.destructors[key] = destructor;
        keys.count += 1;

        Ok(key)
    })
}

/// Stores a value in the current thread's slot for the
/// given key.
///
/// # Panics
///
/// `tlocal_put` will panic if the key has not been
/// allocated.
///
pub fn tlocal_put(key: TlocalKey, value: *mut u8) {
    with_atomic(|| {
        assert!(key < KEYS.lock().count);

        let current = current_thread();
        unsafe { (*current.tlocal.get())[key] = value };
    })
}

/// Returns the value in the current thread's slot for the
/// given key.
///
/// # Panics
///
/// `tlocal_get` will panic if the key has not been
/// allocated.
///
pub fn tlocal_get(key: TlocalKey) -> *mut u8 {
    with_atomic(|| {
        assert!(key < KEYS.lock().count);

        let current = current_thread();
        unsafe { (*current.tlocal.get())[key] }
    })
}

/// Cleans up the exiting thread's thread-local data.
///
/// Called with interrupts disabled. We follow the POSIX
/// style of possibly invoking a destructor more than once,
/// because a destructor might make other thread-local data
/// live again. If a pass clears nothing, we are done.
///
/// Interrupts are re-enabled around each destructor call,
/// as destructors may block.
///
pub(crate) fn tlocal_exit(thread: &Thread) {
    debug_assert!(in_atomic_section());

    for _ in 0..MIN_DESTRUCTOR_ITERATIONS {
        let mut called = false;

        for key in 0..MAX_TLOCAL_KEYS {
            let value = unsafe { (*thread.tlocal.get())[key] };
            let destructor = KEYS.lock().destructors[key];

            if let (false, Some(destructor)) = (value.is_null(), destructor) {
                unsafe { (*thread.tlocal.get())[key] = core::ptr::null_mut() };
                called = true;

                irqctl::enable();
                destructor(value);
                irqctl::disable();
            }
        }

        if !called {
            break;
        }
    }
}
