// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the PS/2 keyboard driver.
//!
//! The interrupt handler reads scan codes from the controller, feeds
//! them through the [`decode`] state machine, and pushes the resulting
//! keycodes into a bounded queue. Consumers take keycodes with the
//! non-blocking [`read_key`] or block in [`wait_for_key`] until one
//! arrives; the handler wakes them and requests a reschedule so a
//! waiting thread runs promptly.

#![no_std]

pub mod decode;

use decode::DecodeState;
use ember_abi::Keycode;
use interrupts::{begin_atomic, end_atomic, register_irq, with_atomic, Irq};
use lazy_static::lazy_static;
use multitasking::WaitQueue;
use spin::Mutex;
use x86_64::instructions::port::Port;
use x86_64::structures::idt::InterruptStackFrame;

/// The IRQ line the keyboard raises.
///
const KEYBOARD_IRQ: Irq = Irq::new_unsafe(1);

// The keyboard controller's I/O ports.
//
const KB_STATUS_PORT: u16 = 0x64;
const KB_DATA_PORT: u16 = 0x60;

/// Set in the status byte when a scan code is available.
///
const KB_OUTPUT_FULL: u8 = 0x01;

/// The number of keycodes the queue can hold. Keycodes
/// arriving into a full queue are dropped.
///
const QUEUE_SIZE: usize = 256;

/// A bounded ring of keycodes, in case they arrive faster
/// than the consumer can deal with them.
///
struct KeyQueue {
    codes: [Keycode; QUEUE_SIZE],
    head: usize,
    tail: usize,
}

impl KeyQueue {
    const fn new() -> Self {
        KeyQueue {
            codes: [Keycode(0); QUEUE_SIZE],
            head: 0,
            tail: 0,
        }
    }

    fn next(index: usize) -> usize {
        (index + 1) % QUEUE_SIZE
    }

    fn enqueue(&mut self, keycode: Keycode) {
        if Self::next(self.tail) == self.head {
            // Queue overflow: the event is dropped.
            return;
        }

        self.codes[self.tail] = keycode;
        self.tail = Self::next(self.tail);
    }

    fn dequeue(&mut self) -> Option<Keycode> {
        if self.head == self.tail {
            return None;
        }

        let keycode = self.codes[self.head];
        self.head = Self::next(self.head);
        Some(keycode)
    }
}

static QUEUE: Mutex<KeyQueue> = Mutex::new(KeyQueue::new());
static DECODER: Mutex<DecodeState> = Mutex::new(DecodeState::new());

lazy_static! {
    /// Threads blocked waiting for a keyboard event.
    ///
    static ref WAIT_QUEUE: WaitQueue = WaitQueue::new();
}

/// The keyboard interrupt handler.
///
fn keyboard_interrupt_handler(_frame: InterruptStackFrame, irq: Irq) {
    let mut status_port: Port<u8> = Port::new(KB_STATUS_PORT);
    let mut data_port: Port<u8> = Port::new(KB_DATA_PORT);

    let status = unsafe { status_port.read() };
    if status & KB_OUTPUT_FULL != 0 {
        // There is a byte available. We must consume it
        // even if the decoder drops the event.
        let scan_code = unsafe { data_port.read() };

        if let Some(keycode) = DECODER.lock().decode(scan_code) {
            QUEUE.lock().enqueue(keycode);

            // Wake up event consumers, and ask for a new
            // thread upon return from the interrupt
            // (hopefully the one waiting for this event).
            multitasking::wake_up(&WAIT_QUEUE);
            multitasking::request_reschedule();
        }
    }

    irq.acknowledge();
}

/// Initialise the keyboard driver, registering its
/// interrupt handler.
///
pub fn init() {
    register_irq(KEYBOARD_IRQ, keyboard_interrupt_handler);
}

/// Polls for a key event, returning immediately.
///
pub fn read_key() -> Option<Keycode> {
    with_atomic(|| QUEUE.lock().dequeue())
}

/// Waits for a key event, blocking the calling thread
/// until one is available.
///
pub fn wait_for_key() -> Keycode {
    let token = begin_atomic();

    let keycode = loop {
        if let Some(keycode) = QUEUE.lock().dequeue() {
            break keycode;
        }

        multitasking::wait(&WAIT_QUEUE);
    };

    end_atomic(token);
    keycode
}
