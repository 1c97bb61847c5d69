//! Boot-protocol keyboard reports
//!
//! Layout (8 bytes):
//! ```text
//! Byte 0: Modifier keys (bitfield, bit 1 = Left Shift)
//! Byte 1: Reserved (0x00)
//! Byte 2-7: Up to 6 simultaneous key codes (USB HID usage codes)
//! ```
//!
//! The single-byte output report carries the host's LED state.

use hid_class::HidReport;

/// Keyboard report size in bytes
pub const KEYBOARD_REPORT_SIZE: usize = 8;

pub const MODIFIER_LEFT_SHIFT: u8 = 0x02;

const KEY_A: u8 = 0x04;
const KEY_1: u8 = 0x1E;
const KEY_0: u8 = 0x27;
const KEY_ENTER: u8 = 0x28;
const KEY_SPACE: u8 = 0x2C;
pub const KEY_CAPS_LOCK: u8 = 0x39;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifier: u8,
    pub keycodes: [u8; 6],
}

impl KeyboardReport {
    /// All keys released
    pub const fn released() -> Self {
        Self {
            modifier: 0,
            keycodes: [0; 6],
        }
    }

    pub const fn key(modifier: u8, keycode: u8) -> Self {
        Self {
            modifier,
            keycodes: [keycode, 0, 0, 0, 0, 0],
        }
    }

    /// Press report for an ASCII character, if the layout has one
    pub fn for_char(c: char) -> Option<Self> {
        let report = match c {
            'a'..='z' => Self::key(0, KEY_A + (c as u8 - b'a')),
            'A'..='Z' => Self::key(MODIFIER_LEFT_SHIFT, KEY_A + (c as u8 - b'A')),
            '1'..='9' => Self::key(0, KEY_1 + (c as u8 - b'1')),
            '0' => Self::key(0, KEY_0),
            ' ' => Self::key(0, KEY_SPACE),
            '\n' => Self::key(0, KEY_ENTER),
            _ => return None,
        };
        Some(report)
    }

    /// Inverse of [`KeyboardReport::for_char`]
    pub fn to_char(&self) -> Option<char> {
        let keycode = self.keycodes[0];
        let shifted = self.modifier & MODIFIER_LEFT_SHIFT != 0;
        match keycode {
            k if (KEY_A..KEY_A + 26).contains(&k) => {
                let base = if shifted { b'A' } else { b'a' };
                Some((base + (k - KEY_A)) as char)
            }
            k if (KEY_1..KEY_0).contains(&k) => Some((b'1' + (k - KEY_1)) as char),
            KEY_0 => Some('0'),
            KEY_SPACE => Some(' '),
            KEY_ENTER => Some('\n'),
            _ => None,
        }
    }

    pub fn is_released(&self) -> bool {
        self.modifier == 0 && self.keycodes.iter().all(|&k| k == 0)
    }

    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_SIZE] {
        let mut bytes = [0u8; KEYBOARD_REPORT_SIZE];
        bytes[0] = self.modifier;
        bytes[2..8].copy_from_slice(&self.keycodes);
        bytes
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < KEYBOARD_REPORT_SIZE {
            return None;
        }
        let mut keycodes = [0u8; 6];
        keycodes.copy_from_slice(&data[2..8]);
        Some(Self {
            modifier: data[0],
            keycodes,
        })
    }

    pub fn to_report(&self) -> HidReport {
        HidReport::unnumbered(self.to_bytes())
    }
}

/// Press/release pairs typing `text`; characters without a key are skipped
pub fn typing_sequence(text: &str) -> Vec<KeyboardReport> {
    text.chars()
        .filter_map(KeyboardReport::for_char)
        .flat_map(|press| [press, KeyboardReport::released()])
        .collect()
}

/// Host LED state from an output report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedState {
    pub num_lock: bool,
    pub caps_lock: bool,
    pub scroll_lock: bool,
}

impl LedState {
    pub fn from_report(data: &[u8]) -> Option<Self> {
        let bits = *data.first()?;
        Some(Self {
            num_lock: bits & 0x01 != 0,
            caps_lock: bits & 0x02 != 0,
            scroll_lock: bits & 0x04 != 0,
        })
    }

    pub fn to_report(&self) -> [u8; 1] {
        [u8::from(self.num_lock) | u8::from(self.caps_lock) << 1 | u8::from(self.scroll_lock) << 2]
    }
}
