// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Translates keyboard scan codes into keycodes.
//!
//! The decoder assumes an 83-key keyboard producing scan code set 1. It
//! tracks the modifier state itself: shift, control, and alt presses
//! update the state and produce no keycode, while every other key event
//! yields a keycode stamped with the modifier flags and, for releases,
//! the release flag.
//!
//! Information sources:
//! - Chapter 8 of _The Undocumented PC_, 2nd ed, by Frank van Gilluwe,
//!   ISBN 0-201-47950-8.
//! - Pages 400-409 of _The Programmers PC Sourcebook_, by Thom Hogan,
//!   ISBN 1-55615-118-7.

use ember_abi::keycode::{self, Keycode};

/// The high bit of a scan code is set when the key is
/// released.
///
const KEY_RELEASE: u8 = 0x80;

const ASCII_ESC: u8 = 0x1b;
const ASCII_BS: u8 = 0x08;

/// A shorthand for ASCII entries in the scan tables.
///
const fn a(byte: u8) -> Keycode {
    Keycode::from_ascii(byte)
}

/// Translation from scan code to keycode, when shift is
/// not pressed.
///
#[rustfmt::skip]
static SCAN_TABLE_NO_SHIFT: [Keycode; 0x58] = [
    keycode::KEY_UNKNOWN, a(ASCII_ESC), a(b'1'), a(b'2'),            // 0x00 - 0x03
    a(b'3'), a(b'4'), a(b'5'), a(b'6'),                              // 0x04 - 0x07
    a(b'7'), a(b'8'), a(b'9'), a(b'0'),                              // 0x08 - 0x0B
    a(b'-'), a(b'='), a(ASCII_BS), a(b'\t'),                         // 0x0C - 0x0F
    a(b'q'), a(b'w'), a(b'e'), a(b'r'),                              // 0x10 - 0x13
    a(b't'), a(b'y'), a(b'u'), a(b'i'),                              // 0x14 - 0x17
    a(b'o'), a(b'p'), a(b'['), a(b']'),                              // 0x18 - 0x1B
    a(b'\r'), keycode::KEY_LCTRL, a(b'a'), a(b's'),                  // 0x1C - 0x1F
    a(b'd'), a(b'f'), a(b'g'), a(b'h'),                              // 0x20 - 0x23
    a(b'j'), a(b'k'), a(b'l'), a(b';'),                              // 0x24 - 0x27
    a(b'\''), a(b'`'), keycode::KEY_LSHIFT, a(b'\\'),                // 0x28 - 0x2B
    a(b'z'), a(b'x'), a(b'c'), a(b'v'),                              // 0x2C - 0x2F
    a(b'b'), a(b'n'), a(b'm'), a(b','),                              // 0x30 - 0x33
    a(b'.'), a(b'/'), keycode::KEY_RSHIFT, keycode::KEY_PRINTSCREEN, // 0x34 - 0x37
    keycode::KEY_LALT, a(b' '), keycode::KEY_CAPSLOCK, keycode::KEY_F1, // 0x38 - 0x3B
    keycode::KEY_F2, keycode::KEY_F3, keycode::KEY_F4, keycode::KEY_F5, // 0x3C - 0x3F
    keycode::KEY_F6, keycode::KEY_F7, keycode::KEY_F8, keycode::KEY_F9, // 0x40 - 0x43
    keycode::KEY_F10, keycode::KEY_NUMLOCK, keycode::KEY_SCROLLLOCK, keycode::KEY_KPHOME, // 0x44 - 0x47
    keycode::KEY_KPUP, keycode::KEY_KPPGUP, keycode::KEY_KPMINUS, keycode::KEY_KPLEFT, // 0x48 - 0x4B
    keycode::KEY_KPCENTER, keycode::KEY_KPRIGHT, keycode::KEY_KPPLUS, keycode::KEY_KPEND, // 0x4C - 0x4F
    keycode::KEY_KPDOWN, keycode::KEY_KPPGDOWN, keycode::KEY_KPINSERT, keycode::KEY_KPDELETE, // 0x50 - 0x53
    keycode::KEY_SYSREQ, keycode::KEY_UNKNOWN, keycode::KEY_UNKNOWN, keycode::KEY_UNKNOWN, // 0x54 - 0x57
];

/// Translation from scan code to keycode, when shift *is*
/// pressed. Keep this in sync with the unshifted table
/// above; they must be the same size.
///
#[rustfmt::skip]
static SCAN_TABLE_WITH_SHIFT: [Keycode; 0x58] = [
    keycode::KEY_UNKNOWN, a(ASCII_ESC), a(b'!'), a(b'@'),            // 0x00 - 0x03
    a(b'#'), a(b'$'), a(b'%'), a(b'^'),                              // 0x04 - 0x07
    a(b'&'), a(b'*'), a(b'('), a(b')'),                              // 0x08 - 0x0B
    a(b'_'), a(b'+'), a(ASCII_BS), a(b'\t'),                         // 0x0C - 0x0F
    a(b'Q'), a(b'W'), a(b'E'), a(b'R'),                              // 0x10 - 0x13
    a(b'T'), a(b'Y'), a(b'U'), a(b'I'),                              // 0x14 - 0x17
    a(b'O'), a(b'P'), a(b'{'), a(b'}'),                              // 0x18 - 0x1B
    a(b'\r'), keycode::KEY_LCTRL, a(b'A'), a(b'S'),                  // 0x1C - 0x1F
    a(b'D'), a(b'F'), a(b'G'), a(b'H'),                              // 0x20 - 0x23
    a(b'J'), a(b'K'), a(b'L'), a(b':'),                              // 0x24 - 0x27
    a(b'"'), a(b'~'), keycode::KEY_LSHIFT, a(b'|'),                  // 0x28 - 0x2B
    a(b'Z'), a(b'X'), a(b'C'), a(b'V'),                              // 0x2C - 0x2F
    a(b'B'), a(b'N'), a(b'M'), a(b'<'),                              // 0x30 - 0x33
    a(b'>'), a(b'?'), keycode::KEY_RSHIFT, keycode::KEY_PRINTSCREEN, // 0x34 - 0x37
    keycode::KEY_LALT, a(b' '), keycode::KEY_CAPSLOCK, keycode::KEY_F1, // 0x38 - 0x3B
    keycode::KEY_F2, keycode::KEY_F3, keycode::KEY_F4, keycode::KEY_F5, // 0x3C - 0x3F
    keycode::KEY_F6, keycode::KEY_F7, keycode::KEY_F8, keycode::KEY_F9, // 0x40 - 0x43
    keycode::KEY_F10, keycode::KEY_NUMLOCK, keycode::KEY_SCROLLLOCK, keycode::KEY_KPHOME, // 0x44 - 0x47
    keycode::KEY_KPUP, keycode::KEY_KPPGUP, keycode::KEY_KPMINUS, keycode::KEY_KPLEFT, // 0x48 - 0x4B
    keycode::KEY_KPCENTER, keycode::KEY_KPRIGHT, keycode::KEY_KPPLUS, keycode::KEY_KPEND, // 0x4C - 0x4F
    keycode::KEY_KPDOWN, keycode::KEY_KPPGDOWN, keycode::KEY_KPINSERT, keycode::KEY_KPDELETE, // 0x50 - 0x53
    keycode::KEY_SYSREQ, keycode::KEY_UNKNOWN, keycode::KEY_UNKNOWN, keycode::KEY_UNKNOWN, // 0x54 - 0x57
];

// The current modifier state.
//
const LEFT_SHIFT: u16 = 0x01;
const RIGHT_SHIFT: u16 = 0x02;
const LEFT_CTRL: u16 = 0x04;
const RIGHT_CTRL: u16 = 0x08;
const LEFT_ALT: u16 = 0x10;
const RIGHT_ALT: u16 = 0x20;
const SHIFT_MASK: u16 = LEFT_SHIFT | RIGHT_SHIFT;
const CTRL_MASK: u16 = LEFT_CTRL | RIGHT_CTRL;
const ALT_MASK: u16 = LEFT_ALT | RIGHT_ALT;

/// Tracks which modifier keys are currently held.
///
#[derive(Debug, Default)]
pub struct DecodeState {
    modifiers: u16,
}

impl DecodeState {
    /// Returns a decoder with no modifiers held.
    ///
    pub const fn new() -> Self {
        DecodeState { modifiers: 0 }
    }

    /// Decodes one scan code.
    ///
    /// Modifier keys update the state and produce nothing;
    /// unknown scan codes are dropped. Everything else
    /// produces a keycode carrying the modifier and
    /// release flags.
    ///
    pub fn decode(&mut self, scan_code: u8) -> Option<Keycode> {
        let release = scan_code & KEY_RELEASE != 0;
        let scan_code = (scan_code & !KEY_RELEASE) as usize;

        if scan_code >= SCAN_TABLE_NO_SHIFT.len() {
            return None;
        }

        let shift = self.modifiers & SHIFT_MASK != 0;
        let keycode = if shift {
            SCAN_TABLE_WITH_SHIFT[scan_code]
        } else {
            SCAN_TABLE_NO_SHIFT[scan_code]
        };

        // Modifier keys set flags rather than queueing an
        // event.
        let flag = match keycode {
            keycode::KEY_LSHIFT => Some(LEFT_SHIFT),
            keycode::KEY_RSHIFT => Some(RIGHT_SHIFT),
            keycode::KEY_LCTRL => Some(LEFT_CTRL),
            keycode::KEY_RCTRL => Some(RIGHT_CTRL),
            keycode::KEY_LALT => Some(LEFT_ALT),
            keycode::KEY_RALT => Some(RIGHT_ALT),
            _ => None,
        };

        if let Some(flag) = flag {
            if release {
                self.modifiers &= !flag;
            } else {
                self.modifiers |= flag;
            }

            return None;
        }

        // Format the keycode.
        let mut flags = 0;
        if shift {
            flags |= keycode::SHIFT;
        }
        if self.modifiers & CTRL_MASK != 0 {
            flags |= keycode::CTRL;
        }
        if self.modifiers & ALT_MASK != 0 {
            flags |= keycode::ALT;
        }
        if release {
            flags |= keycode::RELEASE;
        }

        Some(keycode.with_flags(flags))
    }
}

#[cfg(test)]
mod tests {
    use super::DecodeState;
    use ember_abi::keycode::{self, Keycode};

    // A few scan codes used below.
    const SCAN_A: u8 = 0x1e;
    const SCAN_ONE: u8 = 0x02;
    const SCAN_LSHIFT: u8 = 0x2a;
    const SCAN_LCTRL: u8 = 0x1d;
    const SCAN_F1: u8 = 0x3b;
    const SCAN_KP_HOME: u8 = 0x47;
    const RELEASE: u8 = 0x80;

    #[test]
    fn test_plain_keys() {
        let mut state = DecodeState::new();

        assert_eq!(state.decode(SCAN_A), Some(Keycode::from_ascii(b'a')));
        assert_eq!(
            state.decode(SCAN_A | RELEASE),
            Some(Keycode::from_ascii(b'a').with_flags(keycode::RELEASE))
        );
        assert_eq!(state.decode(SCAN_F1), Some(keycode::KEY_F1));
        assert_eq!(state.decode(SCAN_KP_HOME), Some(keycode::KEY_KPHOME));
    }

    #[test]
    fn test_shift_state() {
        let mut state = DecodeState::new();

        // The shift press itself produces no event.
        assert_eq!(state.decode(SCAN_LSHIFT), None);

        // While held, keys translate through the shifted
        // table and carry the shift flag.
        assert_eq!(
            state.decode(SCAN_A),
            Some(Keycode::from_ascii(b'A').with_flags(keycode::SHIFT))
        );
        assert_eq!(
            state.decode(SCAN_ONE),
            Some(Keycode::from_ascii(b'!').with_flags(keycode::SHIFT))
        );

        // Releasing shift restores the plain table.
        assert_eq!(state.decode(SCAN_LSHIFT | RELEASE), None);
        assert_eq!(state.decode(SCAN_A), Some(Keycode::from_ascii(b'a')));
    }

    #[test]
    fn test_ctrl_flag() {
        let mut state = DecodeState::new();

        assert_eq!(state.decode(SCAN_LCTRL), None);
        assert_eq!(
            state.decode(SCAN_A),
            Some(Keycode::from_ascii(b'a').with_flags(keycode::CTRL))
        );
        assert_eq!(state.decode(SCAN_LCTRL | RELEASE), None);
    }

    #[test]
    fn test_unknown_scan_codes_dropped() {
        let mut state = DecodeState::new();
        assert_eq!(state.decode(0x58), None);
        assert_eq!(state.decode(0x7f), None);
    }
}
