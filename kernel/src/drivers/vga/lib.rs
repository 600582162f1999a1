// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the VGA text console.
//!
//! The console is a fixed 80x25 grid of character cells at physical
//! address 0xb8000, with a hardware cursor addressed through the CRT
//! controller's I/O ports. Output honours a subset of VT100/ANSI escape
//! sequences, decoded by the [`escape`] module's parser; everything else
//! is written literally with the current attribute byte, scrolling when
//! the bottom line fills.

#![no_std]

pub mod escape;

use escape::{apply_attributes, Action, Parser};
use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;
use x86_64::instructions::interrupts::without_interrupts;
use x86_64::instructions::port::Port;

/// The number of character columns on the screen.
///
pub const NUMCOLS: usize = 80;

/// The number of character rows on the screen.
///
pub const NUMROWS: usize = 25;

/// The width in columns of one tab stop.
///
const TABWIDTH: usize = 8;

// The VGA text mode colours.
//
pub const BLACK: u8 = 0;
pub const BLUE: u8 = 1;
pub const GREEN: u8 = 2;
pub const CYAN: u8 = 3;
pub const RED: u8 = 4;
pub const MAGENTA: u8 = 5;
pub const AMBER: u8 = 6;
pub const GRAY: u8 = 7;

/// Added to a colour to produce its bright variant.
///
pub const BRIGHT: u8 = 8;

/// Builds an attribute byte from a background and
/// foreground colour.
///
pub const fn attribute(background: u8, foreground: u8) -> u8 {
    foreground | (background << 4)
}

/// The attribute used at startup and after an attribute
/// reset.
///
pub const DEFAULT_ATTRIBUTE: u8 = attribute(BLACK, GRAY);

/// The physical address of the text buffer.
///
const VIDEO_MEMORY: usize = 0xb8000;

// The CRT controller ports driving the hardware cursor.
//
const CRT_ADDR_PORT: u16 = 0x3d4;
const CRT_DATA_PORT: u16 = 0x3d5;
const CRT_CURSOR_LOC_HIGH: u8 = 0x0e;
const CRT_CURSOR_LOC_LOW: u8 = 0x0f;

/// One character cell: the character and its attribute.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    character: u8,
    attribute: u8,
}

/// The hardware text buffer.
///
#[repr(transparent)]
struct Buffer {
    cells: [[Volatile<ScreenChar>; NUMCOLS]; NUMROWS],
}

/// The console state: cursor position, attribute, and the
/// escape sequence parser.
///
pub struct Console {
    row: usize,
    col: usize,
    save_row: usize,
    save_col: usize,
    attr: u8,
    parser: Parser,
    buffer: &'static mut Buffer,
}

lazy_static! {
    /// CONSOLE is the single console instance, covering
    /// the whole screen. Nothing else touches the video
    /// memory.
    ///
    static ref CONSOLE: Mutex<Console> = Mutex::new(Console {
        row: 0,
        col: 0,
        save_row: 0,
        save_col: 0,
        attr: DEFAULT_ATTRIBUTE,
        parser: Parser::new(),
        buffer: unsafe { &mut *(VIDEO_MEMORY as *mut Buffer) },
    });
}

impl Console {
    fn buffer(&mut self) -> &mut Buffer {
        &mut *self.buffer
    }

    fn blank(&self) -> ScreenChar {
        ScreenChar {
            character: b' ',
            attribute: self.attr,
        }
    }

    /// Scrolls the display one line, clearing out the last
    /// line with the current attribute.
    ///
    fn scroll(&mut self) {
        let buffer = self.buffer();
        for row in 1..NUMROWS {
            for col in 0..NUMCOLS {
                let cell = buffer.cells[row][col].read();
                buffer.cells[row - 1][col].write(cell);
            }
        }

        let blank = self.blank();
        for col in 0..NUMCOLS {
            self.buffer().cells[NUMROWS - 1][col].write(blank);
        }
    }

    /// Clears from the cursor to the end of the line using
    /// the current attribute.
    ///
    fn clear_to_eol(&mut self) {
        let blank = self.blank();
        let row = self.row;
        for col in self.col..NUMCOLS {
            self.buffer().cells[row][col].write(blank);
        }
    }

    /// Moves to the beginning of the next line, scrolling
    /// if necessary.
    ///
    fn newline(&mut self) {
        self.row += 1;
        self.col = 0;
        if self.row == NUMROWS {
            self.scroll();
            self.row = NUMROWS - 1;
        }
    }

    /// Writes the graphic representation of the given byte
    /// at the current position, advancing the cursor and
    /// scrolling if necessary.
    ///
    fn put_graphic_char(&mut self, byte: u8) {
        let cell = ScreenChar {
            character: byte,
            attribute: self.attr,
        };
        let (row, col) = (self.row, self.col);
        self.buffer().cells[row][col].write(cell);

        if self.col < NUMCOLS - 1 {
            self.col += 1;
        } else {
            self.newline();
        }
    }

    /// Writes one literal byte, expanding newlines and
    /// tabs.
    ///
    fn output_literal(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.clear_to_eol();
                self.newline();
            }

            b'\t' => {
                let mut spaces = TABWIDTH - (self.col % TABWIDTH);
                while spaces > 0 {
                    self.put_graphic_char(b' ');
                    spaces -= 1;
                }
            }

            _ => self.put_graphic_char(byte),
        }
    }

    /// Moves the cursor to a new position, stopping at the
    /// screen borders.
    ///
    fn move_cursor(&mut self, row: i32, col: i32) {
        self.row = row.clamp(0, NUMROWS as i32 - 1) as usize;
        self.col = col.clamp(0, NUMCOLS as i32 - 1) as usize;
    }

    fn clear(&mut self) {
        let blank = self.blank();
        for row in 0..NUMROWS {
            for col in 0..NUMCOLS {
                self.buffer().cells[row][col].write(blank);
            }
        }
    }

    /// Applies one decoded console action.
    ///
    fn apply(&mut self, action: Action) {
        match action {
            Action::Literal(byte) => self.output_literal(byte),
            Action::ClearToEol => self.clear_to_eol(),
            Action::Save => {
                self.save_row = self.row;
                self.save_col = self.col;
            }
            Action::Restore => {
                self.row = self.save_row;
                self.col = self.save_col;
            }
            Action::Move { rows, cols } => {
                self.move_cursor(self.row as i32 + rows, self.col as i32 + cols)
            }
            Action::MoveTo { row, col } => self.move_cursor(row, col),
            Action::ClearScreen => {
                self.clear();
                self.row = 0;
                self.col = 0;
            }
            Action::SetAttributes { args, count } => {
                self.attr = apply_attributes(self.attr, &args[..count]);
            }
        }
    }

    fn put_byte(&mut self, byte: u8) {
        if let Some(action) = self.parser.feed(byte) {
            self.apply(action);
        }
    }

    /// Updates the location of the hardware cursor to
    /// match the console state.
    ///
    fn update_cursor(&self) {
        let position = (self.row * NUMCOLS + self.col) as u16;

        let mut addr: Port<u8> = Port::new(CRT_ADDR_PORT);
        let mut data: Port<u8> = Port::new(CRT_DATA_PORT);

        unsafe {
            // Save the original contents of the CRT
            // address register and restore it after.
            let orig = addr.read();

            addr.write(CRT_CURSOR_LOC_HIGH);
            data.write((position >> 8) as u8);

            addr.write(CRT_CURSOR_LOC_LOW);
            data.write(position as u8);

            addr.write(orig);
        }
    }
}

/// Initialise the console, clearing the screen.
///
pub fn init() {
    without_interrupts(|| {
        let mut console = CONSOLE.lock();
        console.clear();
        console.update_cursor();
    });
}

/// Writes the given bytes to the console, interpreting
/// escape sequences, and moves the hardware cursor to the
/// final position.
///
pub fn put_buf(buf: &[u8]) {
    without_interrupts(|| {
        let mut console = CONSOLE.lock();
        for &byte in buf {
            console.put_byte(byte);
        }

        console.update_cursor();
    });
}

/// Sets the attribute byte used for subsequent output.
///
pub fn set_current_attr(attr: u8) {
    without_interrupts(|| {
        CONSOLE.lock().attr = attr;
    });
}

/// Returns the current cursor position as (row, column).
///
pub fn get_cursor() -> (usize, usize) {
    without_interrupts(|| {
        let console = CONSOLE.lock();
        (console.row, console.col)
    })
}

/// Moves the cursor to the given position. Returns false
/// without moving if the position is off the screen.
///
pub fn put_cursor(row: usize, col: usize) -> bool {
    if row >= NUMROWS || col >= NUMCOLS {
        return false;
    }

    without_interrupts(|| {
        let mut console = CONSOLE.lock();
        console.row = row;
        console.col = col;
        console.update_cursor();
    });

    true
}

/// Clears the screen using the current attribute.
///
pub fn clear_screen() {
    without_interrupts(|| {
        CONSOLE.lock().clear();
    });
}
