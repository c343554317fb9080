//! High-bit text encoding used by the keyboard and display registers.
//!
//! Printable characters travel with bit 7 set (`'A'` is `0xC1`). Control keys
//! are fixed codes that the monitor compares bit-exact.

/// Carriage return, ends a line.
pub const CR: u8 = 0x8D;
/// Escape, abandons the current line.
pub const ESCAPE: u8 = 0x9B;
/// Backspace, the underscore key (`'_' | 0x80`).
pub const BACKSPACE: u8 = 0xDF;
/// Printed before a fresh line after Escape or a malformed command.
pub const PROMPT: u8 = b'\\' | 0x80;
pub const SPACE: u8 = b' ' | 0x80;
pub const DOT: u8 = b'.' | 0x80;
pub const COLON: u8 = b':' | 0x80;
pub const RUN: u8 = b'R' | 0x80;

/// Encode a host character as the keyboard would deliver it.
///
/// Letters are folded to upper case (the keyboard has no lower case), line
/// endings become CR, DEL and ASCII backspace become the underscore key.
/// Returns `None` for characters the keyboard cannot produce.
pub fn encode_key(c: char) -> Option<u8> {
    match c {
        '\n' | '\r' => Some(CR),
        '\u{1b}' => Some(ESCAPE),
        '\u{08}' | '\u{7f}' => Some(BACKSPACE),
        ' '..='~' => Some(c.to_ascii_uppercase() as u8 | 0x80),
        _ => None,
    }
}

/// Encode a string of keystrokes, dropping anything the keyboard can't type.
pub fn encode_keys(text: &str) -> Vec<u8> {
    text.chars().filter_map(encode_key).collect()
}

/// Decode a byte written to the display register.
///
/// CR becomes a newline; other control codes are not shown.
pub fn decode_display(byte: u8) -> Option<char> {
    match byte & 0x7F {
        0x0D => Some('\n'),
        b @ 0x20..=0x7E => Some(b as char),
        _ => None,
    }
}

/// Decode a run of display bytes into host text.
pub fn decode_display_text(bytes: &[u8]) -> String {
    bytes.iter().filter_map(|&b| decode_display(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_codes_are_bit_exact() {
        assert_eq!(encode_key('\n'), Some(0x8D));
        assert_eq!(encode_key('\r'), Some(0x8D));
        assert_eq!(encode_key('\u{1b}'), Some(0x9B));
        assert_eq!(encode_key('\u{7f}'), Some(0xDF));
        assert_eq!(encode_key('_'), Some(0xDF));
        assert_eq!(PROMPT, 0xDC);
    }

    #[test]
    fn test_letters_fold_to_upper_case() {
        assert_eq!(encode_key('a'), Some(b'A' | 0x80));
        assert_eq!(encode_keys("0300r"), vec![0xB0, 0xB3, 0xB0, 0xB0, 0xD2]);
        assert_eq!(encode_key('é'), None);
    }

    #[test]
    fn test_display_decoding() {
        assert_eq!(decode_display(CR), Some('\n'));
        assert_eq!(decode_display(ESCAPE), None);
        assert_eq!(decode_display_text(&[0xB0, 0xBA, SPACE, 0xC1]), "0: A");
    }
}
