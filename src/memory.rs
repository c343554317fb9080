use thiserror::Error;

pub const MEMORY_SIZE: usize = 65536;

/// Anything the monitor and the CPU can address.
///
/// Reads take `&mut self` because memory-mapped registers change state when
/// read (the keyboard strobe clears).
pub trait Bus {
    fn read(&mut self, address: u16) -> u8;
    fn write(&mut self, address: u16, value: u8);

    // Read a 16-bit value in little-endian format
    fn read_u16(&mut self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexLoadError {
    #[error("invalid hex byte {0:?}")]
    InvalidByte(String),
}

#[derive(Clone)]
pub struct Memory {
    data: Box<[u8; MEMORY_SIZE]>, // 64KB address space
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            data: Box::new([0; MEMORY_SIZE]),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.data[address as usize]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.data[address as usize] = value;
    }

    /// Copy `data` in at `start_address`, wrapping at the top of memory.
    pub fn load_rom(&mut self, data: &[u8], start_address: u16) {
        let mut address = start_address;
        for &byte in data {
            self.write(address, byte);
            address = address.wrapping_add(1);
        }
    }

    /// Load whitespace-separated hex bytes, e.g. `"a9 01 8d 00 02"`.
    /// Returns the number of bytes written.
    pub fn write_hex(&mut self, start_address: u16, text: &str) -> Result<usize, HexLoadError> {
        let bytes = text
            .split_whitespace()
            .map(|token| {
                u8::from_str_radix(token, 16).map_err(|_| HexLoadError::InvalidByte(token.to_string()))
            })
            .collect::<Result<Vec<u8>, _>>()?;
        self.load_rom(&bytes, start_address);
        Ok(bytes.len())
    }

    // Read a 16-bit value in little-endian format
    pub fn read_u16(&self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    // Write a 16-bit value in little-endian format
    pub fn write_u16(&mut self, address: u16, value: u16) {
        self.write(address, (value & 0xFF) as u8);
        self.write(address.wrapping_add(1), (value >> 8) as u8);
    }

    /// `length` bytes from `address`, wrapping at the top of memory.
    pub fn read_range(&self, address: u16, length: u16) -> Vec<u8> {
        (0..length).map(|i| self.read(address.wrapping_add(i))).collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory").field("size", &MEMORY_SIZE).finish()
    }
}

impl Bus for Memory {
    fn read(&mut self, address: u16) -> u8 {
        Memory::read(self, address)
    }

    fn write(&mut self, address: u16, value: u8) {
        Memory::write(self, address, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mut memory = Memory::new();
        memory.write(0x0300, 0xA9);
        assert_eq!(memory.read(0x0300), 0xA9);
        assert_eq!(memory.read(0x0301), 0x00);
    }

    #[test]
    fn test_u16_little_endian() {
        let mut memory = Memory::new();
        memory.write_u16(0xFFFC, 0xFF00);
        assert_eq!(memory.read(0xFFFC), 0x00);
        assert_eq!(memory.read(0xFFFD), 0xFF);
        assert_eq!(memory.read_u16(0xFFFC), 0xFF00);
        assert_eq!(Bus::read_u16(&mut memory, 0xFFFC), 0xFF00);
    }

    #[test]
    fn test_write_hex() {
        let mut memory = Memory::new();
        let written = memory.write_hex(0x0200, "a9 01\n8d 00 02").unwrap();
        assert_eq!(written, 5);
        assert_eq!(memory.read_range(0x0200, 5), vec![0xA9, 0x01, 0x8D, 0x00, 0x02]);

        assert_eq!(
            memory.write_hex(0x0200, "a9 zz"),
            Err(HexLoadError::InvalidByte("zz".to_string()))
        );
    }

    #[test]
    fn test_load_wraps_at_top_of_memory() {
        let mut memory = Memory::new();
        memory.load_rom(&[1, 2, 3], 0xFFFF);
        assert_eq!(memory.read(0xFFFF), 1);
        assert_eq!(memory.read(0x0000), 2);
        assert_eq!(memory.read(0x0001), 3);
    }
}
