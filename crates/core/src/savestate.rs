//! Save state for the core and the reference host memory.
//!
//! Captures the register file, cycle bookkeeping, the data space and the
//! port latches using bincode serialization with deflate compression.
//! Program ROM is not stored; the ROM image is reloaded separately.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "H4SS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | ROM words        |  u16 little-endian
//! +------------------+
//! | RAM nibbles      |  u16 little-endian
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::memory::{Memory, DATA_SIZE};
use crate::opcodes::OPCODE_MASK;
use crate::variant::Variant;
use crate::{Cpu, Error, Hmcs400, PC_MASK, STACK_BASE, STACK_TOP};

/// Magic bytes identifying an HMCS400 save state.
const MAGIC: &[u8; 4] = b"H4SS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveState {
    pub cpu: Cpu,
    /// Cycle budget carried into the next run
    pub icount: i64,

    // Memory
    pub data: Vec<u8>,
    pub r_out: [u8; 16],
    pub d_out: u16,
}

impl SaveState {
    /// Encode with header for the given variant.
    pub fn to_bytes(&self, variant: &Variant) -> Result<Vec<u8>, Error> {
        let payload = bincode::serialize(self)?;
        let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&variant.rom_words.to_le_bytes());
        out.extend_from_slice(&variant.ram_nibbles.to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Decode, verifying magic, version and that the variant matches.
    pub fn from_bytes(data: &[u8], variant: &Variant) -> Result<SaveState, Error> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidState("file too small".into()));
        }
        if &data[0..4] != MAGIC {
            return Err(Error::InvalidState("bad magic".into()));
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::InvalidState(format!(
                "unsupported version {} (expected {})", version, FORMAT_VERSION)));
        }
        let rom_words = u16::from_le_bytes([data[8], data[9]]);
        let ram_nibbles = u16::from_le_bytes([data[10], data[11]]);
        if rom_words != variant.rom_words || ram_nibbles != variant.ram_nibbles {
            return Err(Error::InvalidState(format!(
                "variant mismatch: save={}/{} current={}/{}",
                rom_words, ram_nibbles, variant.rom_words, variant.ram_nibbles)));
        }

        let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
            .map_err(|e| Error::InvalidState(format!("decompress error: {:?}", e)))?;

        let state: SaveState = bincode::deserialize(&decompressed)?;
        state.validate()?;
        Ok(state)
    }

    /// Reject register and memory values the hardware cannot hold.
    pub fn validate(&self) -> Result<(), Error> {
        let bad = |msg: String| Err(Error::InvalidState(msg));
        let c = &self.cpu;

        if self.data.len() != DATA_SIZE {
            return bad(format!("data space of {} nibbles", self.data.len()));
        }
        if let Some(addr) = self.data.iter().position(|&v| v > 0xF) {
            return bad(format!("data ${:03X} holds {:#X}", addr, self.data[addr]));
        }
        let nibbles = [("A", c.a), ("B", c.b), ("X", c.x), ("Y", c.y), ("SPX", c.spx), ("SPY", c.spy)];
        for (name, v) in nibbles {
            if v > 0xF {
                return bad(format!("{} = {:#X}", name, v));
            }
        }
        if let Some(port) = self.r_out.iter().position(|&v| v > 0xF) {
            return bad(format!("R{} = {:#X}", port, self.r_out[port]));
        }
        if c.w > 3 {
            return bad(format!("W = {:#X}", c.w));
        }
        if !(STACK_BASE - 1..=STACK_TOP).contains(&c.sp) {
            return bad(format!("SP = ${:03X}", c.sp));
        }
        if c.pc > PC_MASK || c.prev_pc > PC_MASK {
            return bad(format!("PC = ${:04X}", c.pc));
        }
        if c.op > OPCODE_MASK || c.param > OPCODE_MASK {
            return bad(format!("opcode {:03X} {:03X}", c.op, c.param));
        }
        Ok(())
    }
}

/// Save state to file.
pub fn save_to_file(state: &SaveState, variant: &Variant, path: &Path) -> Result<(), Error> {
    std::fs::write(path, state.to_bytes(variant)?)?;
    Ok(())
}

/// Load state from file.
pub fn load_from_file(path: &Path, variant: &Variant) -> Result<SaveState, Error> {
    let data = std::fs::read(path)?;
    SaveState::from_bytes(&data, variant)
}

/// Derive save state file path from ROM file path.
/// `game.bin` → `game.state`, `game.hex` → `game.state`
pub fn state_path(rom_path: &str) -> String {
    let p = Path::new(rom_path);
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or("rom");
    let dir = p.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem)).to_string_lossy().into_owned()
}

impl Hmcs400 {
    pub fn save_state(&self, mem: &Memory) -> SaveState {
        SaveState {
            cpu: self.cpu.clone(),
            icount: self.icount,
            data: mem.data.clone(),
            r_out: mem.r_out,
            d_out: mem.d_out,
        }
    }

    /// Restore a state taken with [`save_state`](Self::save_state).
    ///
    /// Host hooks and diagnostic counters are left as they are.
    pub fn restore_state(&mut self, mem: &mut Memory, state: SaveState) {
        self.cpu = state.cpu;
        self.icount = state.icount;
        mem.data = state.data;
        mem.r_out = state.r_out;
        mem.d_out = state.d_out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bus;

    fn running_machine() -> (Hmcs400, Memory) {
        let mut core = Hmcs400::new(Variant::HMCS404);
        let mut mem = Memory::new(core.variant());
        // LAI 5 ; LXI 2 ; LMA ; CAL 8 ; LRA 3
        mem.load_words(&[0x235, 0x222, 0x094, 0x1C8]);
        mem.rom[8] = 0x2D3;
        core.run(&mut mem, 6);
        (core, mem)
    }

    #[test]
    fn test_save_restore_resumes_identically() {
        let (mut core, mut mem) = running_machine();
        let snapshot = core.save_state(&mem);
        let bytes = snapshot.to_bytes(core.variant()).unwrap();

        core.run(&mut mem, 10);
        let after = core.cpu.clone();

        let restored = SaveState::from_bytes(&bytes, core.variant()).unwrap();
        assert_eq!(restored, snapshot);
        core.restore_state(&mut mem, restored);
        assert_eq!(core.cpu.pc, 9);
        assert_eq!(mem.read_data(0x020), 5);
        assert_eq!(mem.r_port(3), 5);
        core.run(&mut mem, 10);
        assert_eq!(core.cpu, after);
    }

    #[test]
    fn test_rejects_bad_header() {
        let (core, mem) = running_machine();
        let mut bytes = core.save_state(&mem).to_bytes(core.variant()).unwrap();

        assert!(SaveState::from_bytes(&bytes[..8], core.variant()).is_err());
        assert!(SaveState::from_bytes(&bytes, &Variant::HMCS408).is_err());

        bytes[4] = 2;
        assert!(SaveState::from_bytes(&bytes, core.variant()).is_err());
        bytes[4] = 1;
        bytes[0] = b'X';
        assert!(SaveState::from_bytes(&bytes, core.variant()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_registers() {
        let (core, mem) = running_machine();
        let good = core.save_state(&mem);
        assert!(SaveState::from_bytes(&good.to_bytes(core.variant()).unwrap(), core.variant()).is_ok());

        let tamper: [fn(&mut SaveState); 9] = [
            |s| s.cpu.sp = 0x7FF,
            |s| s.cpu.sp = 0x3BE,
            |s| s.cpu.a = 0xFF,
            |s| s.cpu.spy = 0x10,
            |s| s.cpu.w = 4,
            |s| s.cpu.pc = 0x4000,
            |s| s.cpu.op = 0x400,
            |s| s.data[0x021] = 0x10,
            |s| s.data.truncate(0x200),
        ];
        for (i, f) in tamper.iter().enumerate() {
            let mut s = good.clone();
            f(&mut s);
            let r = SaveState::from_bytes(&s.to_bytes(core.variant()).unwrap(), core.variant());
            assert!(matches!(r, Err(Error::InvalidState(_))), "case {}", i);
        }
    }

    #[test]
    fn test_full_stack_state_is_accepted() {
        let (core, mem) = running_machine();
        let mut s = core.save_state(&mem);
        s.cpu.sp = STACK_BASE - 1;
        let restored = SaveState::from_bytes(&s.to_bytes(core.variant()).unwrap(), core.variant()).unwrap();
        assert_eq!(restored.cpu.stack_depth(), crate::STACK_FRAMES);
    }

    #[test]
    fn test_state_path() {
        assert_eq!(state_path("roms/game.bin"), "roms/game.state");
    }
}
