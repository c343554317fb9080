//! Hex digit parsing over the high-bit text encoding.

/// Value of one hex digit (`'0'..='9'`, `'A'..='F'`, bit 7 set), or `None`.
pub fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        0xB0..=0xB9 => Some(byte - 0xB0),
        0xC1..=0xC6 => Some(byte - 0xC1 + 10),
        _ => None,
    }
}

/// Display character for the low nibble of `value`.
pub fn hex_digit(value: u8) -> u8 {
    let nibble = value & 0x0F;
    if nibble < 10 {
        (b'0' + nibble) | 0x80
    } else {
        (b'A' + nibble - 10) | 0x80
    }
}

/// Two display characters for a byte, high nibble first.
pub fn byte_digits(value: u8) -> [u8; 2] {
    [hex_digit(value >> 4), hex_digit(value)]
}

/// 16-bit value built one digit at a time.
///
/// Digits shift in from the right; anything pushed out of the top is lost,
/// so only the last four digits of a long run survive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HexAccumulator {
    value: u16,
    digits_seen: bool,
}

impl HexAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb `byte` if it is a hex digit. Returns false (and leaves the
    /// accumulator untouched) otherwise.
    pub fn push(&mut self, byte: u8) -> bool {
        match hex_value(byte) {
            Some(digit) => {
                self.value = (self.value << 4) | digit as u16;
                self.digits_seen = true;
                true
            }
            None => false,
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }

    pub fn low_byte(&self) -> u8 {
        (self.value & 0xFF) as u8
    }

    pub fn has_digits(&self) -> bool {
        self.digits_seen
    }
}

/// Result of scanning a hex run out of an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexRun {
    pub value: HexAccumulator,
    /// Index of the first byte after the run.
    pub end: usize,
}

impl HexRun {
    pub fn is_empty(&self) -> bool {
        !self.value.has_digits()
    }
}

/// Scan the maximal hex run of `line` starting at `start`.
pub fn parse_hex_run(line: &[u8], start: usize) -> HexRun {
    let mut value = HexAccumulator::new();
    let mut end = start;
    while end < line.len() && value.push(line[end]) {
        end += 1;
    }
    HexRun { value, end }
}
