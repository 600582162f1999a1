// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Parses the console's supported subset of VT100/ANSI escape sequences.
//!
//! The parser is a byte-at-a-time state machine, separate from the
//! hardware so the sequence grammar can be exercised on its own. It
//! recognises `CSI n;m H|f` (absolute cursor), `CSI n A|B|C|D` (relative
//! cursor), `CSI s|u` (save/restore), `CSI K` (erase to end of line),
//! `CSI 2 J` (clear), and `CSI ... m` (attributes). Unknown commands are
//! swallowed without effect.
//!
//! Information sources for VT100 and ANSI escape sequences:
//! - http://www.lns.cornell.edu/~pvhp/dcl/vt100.html
//! - http://en.wikipedia.org/wiki/ANSI_escape_code

/// The escape character starting each sequence.
///
pub const ESC: u8 = 0x1b;

/// The maximum number of numeric arguments a sequence can
/// carry. Further arguments are ignored.
///
pub const MAX_ESCAPE_ARGS: usize = 8;

/// One console operation decoded from the output stream.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Output this byte literally.
    Literal(u8),

    /// Move the cursor by the given deltas, stopping at
    /// the screen borders.
    Move { rows: i32, cols: i32 },

    /// Move the cursor to the given position (0-based).
    MoveTo { row: i32, col: i32 },

    /// Save the cursor position.
    Save,

    /// Restore the most recently saved cursor position.
    Restore,

    /// Erase from the cursor to the end of the line.
    ClearToEol,

    /// Clear the whole screen and home the cursor.
    ClearScreen,

    /// Apply the given attribute arguments.
    SetAttributes {
        args: [i32; MAX_ESCAPE_ARGS],
        count: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Normal state: output is echoed verbatim.
    Normal,

    /// Saw the escape character.
    Escape,

    /// Saw the '[' introducing the control sequence.
    Csi,

    /// Scanning a numeric argument.
    Arg,
}

/// The escape sequence parser.
///
#[derive(Debug)]
pub struct Parser {
    state: State,
    args: [i32; MAX_ESCAPE_ARGS],
    num_args: usize,
}

impl Parser {
    /// Returns a parser in the normal state.
    ///
    pub const fn new() -> Self {
        Parser {
            state: State::Normal,
            args: [0; MAX_ESCAPE_ARGS],
            num_args: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::Normal;
        self.num_args = 0;
    }

    fn start_arg(&mut self) {
        if self.num_args < MAX_ESCAPE_ARGS {
            self.args[self.num_args] = 0;
        }

        self.num_args += 1;
    }

    fn add_digit(&mut self, byte: u8) {
        if self.num_args <= MAX_ESCAPE_ARGS {
            let arg = &mut self.args[self.num_args - 1];
            *arg = *arg * 10 + (byte - b'0') as i32;
        }
    }

    /// Returns argument `index`, or zero if that argument
    /// was not actually specified.
    ///
    fn arg(&self, index: usize) -> i32 {
        if index < self.num_args {
            self.args[index]
        } else {
            0
        }
    }

    /// Interprets the command byte ending a sequence.
    ///
    fn command(&mut self, byte: u8) -> Option<Action> {
        let action = match byte {
            b'K' => Some(Action::ClearToEol),
            b's' => Some(Action::Save),
            b'u' => Some(Action::Restore),
            b'A' => Some(Action::Move {
                rows: -self.arg(0),
                cols: 0,
            }),
            b'B' => Some(Action::Move {
                rows: self.arg(0),
                cols: 0,
            }),
            b'C' => Some(Action::Move {
                rows: 0,
                cols: self.arg(0),
            }),
            b'D' => Some(Action::Move {
                rows: 0,
                cols: -self.arg(0),
            }),
            b'm' => Some(Action::SetAttributes {
                args: self.args,
                count: self.num_args.min(MAX_ESCAPE_ARGS),
            }),
            b'H' | b'f' => {
                if self.num_args == 2 {
                    Some(Action::MoveTo {
                        row: self.arg(0) - 1,
                        col: self.arg(1) - 1,
                    })
                } else {
                    None
                }
            }
            b'J' => {
                if self.num_args == 1 && self.arg(0) == 2 {
                    Some(Action::ClearScreen)
                } else {
                    None
                }
            }
            _ => None,
        };

        self.reset();
        action
    }

    /// Feeds one byte of console output to the parser,
    /// returning the action it completes, if any.
    ///
    pub fn feed(&mut self, byte: u8) -> Option<Action> {
        match self.state {
            State::Normal => {
                if byte == ESC {
                    self.state = State::Escape;
                    self.num_args = 0;
                    None
                } else {
                    Some(Action::Literal(byte))
                }
            }

            State::Escape => {
                if byte == b'[' {
                    self.state = State::Csi;
                } else {
                    self.reset();
                }

                None
            }

            State::Csi => {
                if byte.is_ascii_digit() {
                    self.start_arg();
                    self.state = State::Arg;
                    self.add_digit(byte);
                    None
                } else if byte == b';' {
                    // For "n;m" commands, "n" is implicitly
                    // 1 if omitted.
                    self.start_arg();
                    self.add_digit(b'1');
                    self.start_arg();
                    self.state = State::Arg;
                    None
                } else {
                    self.command(byte)
                }
            }

            State::Arg => {
                if byte.is_ascii_digit() {
                    self.add_digit(byte);
                    None
                } else if byte == b';' {
                    self.start_arg();
                    None
                } else {
                    self.command(byte)
                }
            }
        }
    }
}

/// Table mapping ANSI colours to VGA text mode colours.
///
const ANSI_TO_VGA_COLOR: [u8; 8] = [
    super::BLACK,
    super::RED,
    super::GREEN,
    super::AMBER,
    super::BLUE,
    super::MAGENTA,
    super::CYAN,
    super::GRAY,
];

/// Applies the arguments of an attribute sequence to the
/// given attribute byte: 0 resets, 1 sets bright, 30-37
/// choose the foreground, and 40-47 the background.
///
pub fn apply_attributes(current: u8, args: &[i32]) -> u8 {
    let mut attr = current & !super::BRIGHT;

    for &value in args {
        if value == 0 {
            attr = super::DEFAULT_ATTRIBUTE;
        } else if value == 1 {
            attr |= super::BRIGHT;
        } else if (30..=37).contains(&value) {
            attr = (attr & !0x7) | ANSI_TO_VGA_COLOR[(value - 30) as usize];
        } else if (40..=47).contains(&value) {
            attr = (attr & !(0x7 << 4)) | (ANSI_TO_VGA_COLOR[(value - 40) as usize] << 4);
        }
    }

    attr
}

#[cfg(test)]
mod tests {
    use super::apply_attributes;
    use super::Action;
    use super::Parser;
    use super::ESC;
    use crate::{attribute, AMBER, BLUE, BRIGHT, DEFAULT_ATTRIBUTE, GRAY, RED};

    fn feed_all(parser: &mut Parser, bytes: &[u8]) -> Option<Action> {
        let mut last = None;
        for &byte in bytes {
            if let Some(action) = parser.feed(byte) {
                last = Some(action);
            }
        }

        last
    }

    #[test]
    fn test_literals_pass_through() {
        let mut parser = Parser::new();
        assert_eq!(parser.feed(b'x'), Some(Action::Literal(b'x')));
        assert_eq!(parser.feed(b'\n'), Some(Action::Literal(b'\n')));
    }

    #[test]
    fn test_cursor_sequences() {
        let mut parser = Parser::new();

        assert_eq!(
            feed_all(&mut parser, b"\x1b[3;7H"),
            Some(Action::MoveTo { row: 2, col: 6 })
        );
        assert_eq!(
            feed_all(&mut parser, b"\x1b[12;1f"),
            Some(Action::MoveTo { row: 11, col: 0 })
        );

        // A row omitted before ';' is implicitly 1.
        assert_eq!(
            feed_all(&mut parser, b"\x1b[;5H"),
            Some(Action::MoveTo { row: 0, col: 4 })
        );

        assert_eq!(
            feed_all(&mut parser, b"\x1b[4A"),
            Some(Action::Move { rows: -4, cols: 0 })
        );
        assert_eq!(
            feed_all(&mut parser, b"\x1b[2B"),
            Some(Action::Move { rows: 2, cols: 0 })
        );
        assert_eq!(
            feed_all(&mut parser, b"\x1b[9C"),
            Some(Action::Move { rows: 0, cols: 9 })
        );
        assert_eq!(
            feed_all(&mut parser, b"\x1b[1D"),
            Some(Action::Move { rows: 0, cols: -1 })
        );

        assert_eq!(feed_all(&mut parser, b"\x1b[s"), Some(Action::Save));
        assert_eq!(feed_all(&mut parser, b"\x1b[u"), Some(Action::Restore));
        assert_eq!(feed_all(&mut parser, b"\x1b[K"), Some(Action::ClearToEol));
        assert_eq!(
            feed_all(&mut parser, b"\x1b[2J"),
            Some(Action::ClearScreen)
        );

        // J without the right argument does nothing.
        assert_eq!(feed_all(&mut parser, b"\x1b[J"), None);
        assert_eq!(feed_all(&mut parser, b"\x1b[1J"), None);
    }

    #[test]
    fn test_malformed_sequences_are_swallowed() {
        let mut parser = Parser::new();

        // ESC not followed by '[' cancels the sequence.
        assert_eq!(parser.feed(ESC), None);
        assert_eq!(parser.feed(b'x'), None);

        // The parser is back to normal afterwards.
        assert_eq!(parser.feed(b'y'), Some(Action::Literal(b'y')));

        // Unknown commands are consumed without effect.
        assert_eq!(feed_all(&mut parser, b"\x1b[5Q"), None);
        assert_eq!(parser.feed(b'z'), Some(Action::Literal(b'z')));
    }

    #[test]
    fn test_attributes() {
        let mut parser = Parser::new();
        let action = feed_all(&mut parser, b"\x1b[1;34;47m");
        match action {
            Some(Action::SetAttributes { args, count }) => {
                assert_eq!(&args[..count], &[1, 34, 47]);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_apply_attributes() {
        let plain = attribute(crate::BLACK, GRAY);

        // Reset.
        assert_eq!(apply_attributes(0x42, &[0]), DEFAULT_ATTRIBUTE);

        // Bright is additive; colours replace their field.
        assert_eq!(apply_attributes(plain, &[1]), plain | BRIGHT);
        assert_eq!(apply_attributes(plain, &[31]), attribute(crate::BLACK, RED));
        assert_eq!(apply_attributes(plain, &[33, 44]), attribute(BLUE, AMBER));

        // Bright is dropped unless re-requested.
        assert_eq!(
            apply_attributes(plain | BRIGHT, &[31]),
            attribute(crate::BLACK, RED)
        );
    }
}
