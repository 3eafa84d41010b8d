//! Host memory and I/O bus.
//!
//! The core never owns program or data storage. Every access goes through
//! the [`Bus`] trait, which a host implements with whatever decoding,
//! mirroring or fill policy it wants. [`Memory`] is a reference host with
//! the on-chip layout of a given [`Variant`]:
//!
//! | Space   | Address Range        | Content                        |
//! |---------|----------------------|--------------------------------|
//! | program | 0x0000–rom_words-1   | Mask ROM (10-bit words)        |
//! | data    | 0x000–0x001          | Interrupt control (in the core)|
//! | data    | 0x020–0x020+ram-1    | General RAM (nibbles)          |
//! | data    | 0x3C0–0x3FF          | Stack window                   |
//!
//! Unmapped program reads return all ones; unmapped data reads return zero
//! and writes are dropped.

use crate::variant::Variant;
use crate::{hex, Error, DATA_MASK, PC_MASK, RAM_BASE, STACK_BASE};

/// Data space size in nibbles (10-bit address).
pub const DATA_SIZE: usize = 0x400;

/// Host side of the CPU: program ROM, data RAM and the latched I/O lines.
///
/// Program addresses are already masked to 14 bits and data addresses to
/// 10 bits. Data values are nibbles; the core masks reads to 4 bits.
pub trait Bus {
    fn read_program(&mut self, addr: u16) -> u16;
    fn read_data(&mut self, addr: u16) -> u8;
    fn write_data(&mut self, addr: u16, value: u8);

    /// Read R port `port` (input latch).
    fn read_r(&mut self, _port: u8) -> u8 { 0xF }
    /// Write R port `port` (output latch).
    fn write_r(&mut self, _port: u8, _value: u8) {}
    /// Read discrete pin D`pin`.
    fn read_d(&mut self, _pin: u8) -> bool { false }
    /// Drive discrete pin D`pin`.
    fn write_d(&mut self, _pin: u8, _state: bool) {}
    /// STS: start the serial interface.
    fn serial_start(&mut self) {}
}

/// Reference host memory laid out like the on-chip ROM/RAM of a variant.
pub struct Memory {
    /// Mask ROM, one 10-bit word per entry
    pub rom: Vec<u16>,
    /// Full data space; only mapped ranges are used
    pub data: Vec<u8>,
    /// R port output latches
    pub r_out: [u8; 16],
    /// R port input levels seen by LAR/LBR
    pub r_in: [u8; 16],
    /// D pin output latches
    pub d_out: u16,
    /// D pin input levels seen by TD/TDD
    pub d_in: u16,
    /// Number of STS executions
    pub serial_starts: u32,
    ram_end: u16,
}

impl Memory {
    pub fn new(variant: &Variant) -> Self {
        Memory {
            rom: vec![0u16; variant.rom_words as usize],
            data: vec![0u8; DATA_SIZE],
            r_out: [0xF; 16],
            r_in: [0xF; 16],
            d_out: 0,
            d_in: 0,
            serial_starts: 0,
            ram_end: RAM_BASE + variant.ram_nibbles,
        }
    }

    /// Load a ROM image of little-endian 16-bit words.
    ///
    /// Returns the number of words loaded.
    pub fn load_rom(&mut self, image: &[u8]) -> Result<usize, Error> {
        let words = (image.len() + 1) / 2;
        if words > self.rom.len() {
            return Err(Error::RomTooLarge { words, capacity: self.rom.len() });
        }
        for (i, pair) in image.chunks(2).enumerate() {
            let lo = pair[0] as u16;
            let hi = pair.get(1).copied().unwrap_or(0) as u16;
            self.rom[i] = (hi << 8 | lo) & 0x3FF;
        }
        Ok(words)
    }

    /// Load a ROM image in Intel HEX format (same byte layout as [`load_rom`](Self::load_rom)).
    pub fn load_hex(&mut self, hex_str: &str) -> Result<usize, Error> {
        let mut bytes = vec![0u8; self.rom.len() * 2];
        let size = hex::parse_hex(hex_str, &mut bytes)?;
        self.load_rom(&bytes[..size])
    }

    /// Copy words straight into ROM starting at address 0.
    pub fn load_words(&mut self, words: &[u16]) {
        for (slot, w) in self.rom.iter_mut().zip(words) {
            *slot = *w & 0x3FF;
        }
    }

    #[inline(always)]
    fn is_mapped(&self, addr: u16) -> bool {
        (RAM_BASE..self.ram_end).contains(&addr) || addr >= STACK_BASE
    }

    /// General RAM window `(start, end)` (end exclusive).
    pub fn ram_window(&self) -> (u16, u16) {
        (RAM_BASE, self.ram_end)
    }

    pub fn r_port(&self, port: u8) -> u8 {
        self.r_out[(port & 0xF) as usize]
    }

    pub fn d_pin(&self, pin: u8) -> bool {
        self.d_out >> (pin & 0xF) & 1 != 0
    }

    pub fn set_d_input(&mut self, pin: u8, state: bool) {
        let bit = 1 << (pin & 0xF);
        if state { self.d_in |= bit; } else { self.d_in &= !bit; }
    }
}

impl Bus for Memory {
    #[inline(always)]
    fn read_program(&mut self, addr: u16) -> u16 {
        self.rom.get((addr & PC_MASK) as usize).copied().unwrap_or(0xFFFF)
    }

    #[inline(always)]
    fn read_data(&mut self, addr: u16) -> u8 {
        let addr = addr & DATA_MASK;
        if self.is_mapped(addr) { self.data[addr as usize] } else { 0 }
    }

    #[inline(always)]
    fn write_data(&mut self, addr: u16, value: u8) {
        let addr = addr & DATA_MASK;
        if self.is_mapped(addr) {
            self.data[addr as usize] = value & 0xF;
        }
    }

    fn read_r(&mut self, port: u8) -> u8 {
        self.r_in[(port & 0xF) as usize] & 0xF
    }

    fn write_r(&mut self, port: u8, value: u8) {
        self.r_out[(port & 0xF) as usize] = value & 0xF;
    }

    fn read_d(&mut self, pin: u8) -> bool {
        self.d_in >> (pin & 0xF) & 1 != 0
    }

    fn write_d(&mut self, pin: u8, state: bool) {
        let bit = 1 << (pin & 0xF);
        if state { self.d_out |= bit; } else { self.d_out &= !bit; }
    }

    fn serial_start(&mut self) {
        self.serial_starts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_windows() {
        let mut mem = Memory::new(&Variant::HMCS402);
        assert_eq!(mem.ram_window(), (0x020, 0x020 + 96));
        mem.write_data(0x020, 0x1A);
        assert_eq!(mem.read_data(0x020), 0xA);
        mem.write_data(0x020 + 96, 5);
        assert_eq!(mem.read_data(0x020 + 96), 0);
        mem.write_data(0x3C0, 7);
        assert_eq!(mem.read_data(0x3C0), 7);
        mem.write_data(0x010, 7);
        assert_eq!(mem.read_data(0x010), 0);
    }

    #[test]
    fn test_program_unmapped_reads_high() {
        let mut mem = Memory::new(&Variant::HMCS402);
        mem.load_words(&[0x230, 0x244]);
        assert_eq!(mem.read_program(1), 0x244);
        assert_eq!(mem.read_program(0x800), 0xFFFF);
    }

    #[test]
    fn test_load_rom_little_endian() {
        let mut mem = Memory::new(&Variant::HMCS402);
        let n = mem.load_rom(&[0x30, 0x02, 0x44, 0xFE]).unwrap();
        assert_eq!(n, 2);
        assert_eq!(mem.rom[0], 0x230);
        assert_eq!(mem.rom[1], 0x244);
    }

    #[test]
    fn test_load_rom_too_large() {
        let mut mem = Memory::new(&Variant::HMCS402);
        let image = vec![0u8; 0x800 * 2 + 2];
        assert!(mem.load_rom(&image).is_err());
    }

    #[test]
    fn test_load_hex() {
        let mut mem = Memory::new(&Variant::HMCS404);
        let n = mem.load_hex(":040000003002440284\n:00000001FF\n").unwrap();
        assert_eq!(n, 2);
        assert_eq!(mem.rom[0], 0x230);
        assert_eq!(mem.rom[1], 0x244);
    }

    #[test]
    fn test_ports() {
        let mut mem = Memory::new(&Variant::HMCS402);
        mem.write_r(3, 0x5);
        assert_eq!(mem.r_port(3), 5);
        mem.write_d(9, true);
        assert!(mem.d_pin(9));
        mem.set_d_input(2, true);
        assert!(mem.read_d(2));
        assert!(!mem.read_d(3));
    }
}
