//! # hmcs400-core
//!
//! Cycle-accurate instruction core for the Hitachi HMCS400 family of 4-bit
//! microcontrollers (HMCS402, HMCS404, HMCS408 and their C/CL/AC grades).
//!
//! The core reproduces the CPU only: registers, program counter, carry,
//! the 10-bit instruction encodings (one or two words), compare-and-skip
//! control flow, the nibble call stack, interrupts and the standby/stop
//! modes. Program ROM, data RAM and the I/O pins belong to the host and are
//! reached through the [`Bus`] trait.
//!
//! ## Architecture
//!
//! - [`Hmcs400`]: Fetch/dispatch loop with a cycle budget, interrupt
//!   acknowledge and halt/wake
//! - [`Cpu`]: Register file and instruction semantics
//! - [`opcodes`]: Instruction record, tiered decode rules, 1024-entry table
//! - [`variant`]: Variant descriptor, part-number catalog, [`Registry`]
//! - [`memory`]: [`Bus`] trait and the reference host [`Memory`]
//! - [`hex`]: Intel HEX ROM images
//! - [`trace`]: Diagnostics and host hooks
//! - [`savestate`]: Save/restore of core state and RAM
//!
//! ## Running
//!
//! The host grants a cycle budget per call to [`Hmcs400::run`]. The loop
//! stops once the budget is spent; an instruction that straddles the end
//! borrows from the next call, so cycle totals stay exact across calls.

pub mod cpu;
pub mod hex;
pub mod memory;
pub mod opcodes;
pub mod savestate;
pub mod trace;
pub mod variant;

pub use cpu::{Cpu, RunState};
pub use memory::{Bus, Memory};
pub use opcodes::{Fetched, Instruction};
pub use trace::{Diagnostic, DiagnosticCounts};
pub use variant::{Divider, Model, Registry, Variant};

use thiserror::Error;

/// Program counter mask (14-bit word address)
pub const PC_MASK: u16 = 0x3FFF;
/// Data address mask (10-bit nibble address)
pub const DATA_MASK: u16 = 0x3FF;
/// First general RAM nibble
pub const RAM_BASE: u16 = 0x020;
/// Memory registers MR0–MR15 used by LAMR/XMRA
pub const MR_BASE: u16 = 0x040;
/// Lowest nibble of the stack window
pub const STACK_BASE: u16 = 0x3C0;
/// Highest nibble of the stack window (SP after reset)
pub const STACK_TOP: u16 = 0x3FF;
/// Call frames that fit in the 64-nibble stack window
pub const STACK_FRAMES: usize = 16;
/// Interrupt vectors for INT0 and INT1
pub const INT_VECTORS: [u16; 2] = [0x0002, 0x0004];
/// Cycles taken by an interrupt acknowledge
pub const INT_ACK_CYCLES: u32 = 2;
/// Longest instruction in cycles, not counting words it skips
pub const MAX_INSTRUCTION_CYCLES: u32 = 3;

/// Host-facing errors. Execution itself never fails.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("invalid clock divider {0} (expected 4, 8 or 16)")]
    InvalidDivider(u32),
    #[error("model has no clock divider mask option")]
    DividerNotSupported,
    #[error("ROM image of {words} words exceeds {capacity} words")]
    RomTooLarge { words: usize, capacity: usize },
    #[error("Intel HEX line {line}: {msg}")]
    Hex { line: usize, msg: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serde(#[from] bincode::Error),
    #[error("invalid save state: {0}")]
    InvalidState(String),
}

/// HMCS400 engine: register file, variant and host hooks.
pub struct Hmcs400 {
    pub cpu: Cpu,
    pub hooks: trace::Hooks,
    variant: Variant,
    /// Remaining cycle budget; negative after an instruction overran it
    icount: i64,
}

impl Hmcs400 {
    pub fn new(variant: Variant) -> Self {
        Hmcs400 {
            cpu: Cpu::new(),
            hooks: trace::Hooks::default(),
            variant,
            icount: 0,
        }
    }

    /// Build a core for a catalog part.
    pub fn from_model(registry: &Registry, name: &str) -> Result<Self, Error> {
        Ok(Self::new(registry.get(name)?.variant))
    }

    pub fn variant(&self) -> &Variant {
        &self.variant
    }

    /// Reset: PC to 0, empty stack, interrupts disabled and masked, running.
    ///
    /// Data registers keep their contents.
    pub fn reset(&mut self) {
        let c = &mut self.cpu;
        c.pc = 0;
        c.prev_pc = 0;
        c.sp = STACK_TOP;
        c.ie = false;
        c.irq_flag = [false; 2];
        c.irq_mask = [true; 2];
        c.state = RunState::Running;
        self.icount = 0;
    }

    pub fn set_trace_hook(&mut self, hook: impl FnMut(u16) + 'static) {
        self.hooks.trace = Some(Box::new(hook));
    }

    pub fn set_diagnostic_hook(&mut self, hook: impl FnMut(&Diagnostic) + 'static) {
        self.hooks.diagnostic = Some(Box::new(hook));
    }

    pub fn diagnostics(&self) -> DiagnosticCounts {
        self.hooks.counts
    }

    /// Drive interrupt line 0 or 1. Sampled at the next instruction boundary.
    pub fn set_input_line(&mut self, line: usize, asserted: bool) {
        if let Some(l) = self.cpu.irq_line.get_mut(line) {
            *l = asserted;
        }
    }

    /// Leave standby/stop.
    pub fn wake(&mut self) {
        if self.cpu.state != RunState::Running {
            log::debug!("wake from {:?} at ${:04X}", self.cpu.state, self.cpu.pc);
            self.cpu.state = RunState::Running;
        }
    }

    pub fn is_halted(&self) -> bool {
        self.cpu.state != RunState::Running
    }

    /// Read the word at PC, advance PC and consume one cycle.
    #[inline(always)]
    pub fn fetch<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let data = bus.read_program(self.cpu.pc);
        self.cpu.pc = (self.cpu.pc + 1) & PC_MASK;
        self.consume(1);
        data & opcodes::OPCODE_MASK
    }

    #[inline(always)]
    fn consume(&mut self, cycles: u64) {
        self.icount -= cycles as i64;
        self.cpu.tick += cycles;
    }

    /// Run for `cycles` instruction cycles and return the cycles consumed.
    pub fn run<B: Bus>(&mut self, bus: &mut B, cycles: u64) -> u64 {
        let start = self.cpu.tick;
        self.icount = self.icount.saturating_add(i64::try_from(cycles).unwrap_or(i64::MAX));

        while self.icount > 0 {
            if self.is_halted() {
                self.sample_interrupts();
                let idle = self.icount as u64;
                self.consume(idle);
                break;
            }
            self.step(bus);
        }

        self.cpu.tick - start
    }

    /// Run for `clocks` oscillator clocks, converted through the divider.
    pub fn run_clocks<B: Bus>(&mut self, bus: &mut B, clocks: u64) -> u64 {
        let cycles = self.variant.clocks_to_cycles(clocks);
        let done = self.run(bus, cycles);
        self.variant.cycles_to_clocks(done)
    }

    /// Execute one instruction boundary and return the cycles it took.
    ///
    /// That is an interrupt acknowledge, one instruction, or a single idle
    /// cycle when halted.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> u32 {
        let start = self.cpu.tick;

        if self.is_halted() {
            self.sample_interrupts();
            self.consume(1);
            return 1;
        }

        if let Some(line) = self.pending_interrupt() {
            self.do_interrupt(bus, line);
            return (self.cpu.tick - start) as u32;
        }

        let f = self.fetch_instruction(bus);
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("{:04X}: {:03X} {:03X} {:?}", f.pc, f.op, f.param, f.inst);
        }
        let extra = self.execute_inst(bus, f);
        self.consume(extra as u64);

        (self.cpu.tick - start) as u32
    }

    /// Fetch the opcode, the second word if the opcode takes one, and decode.
    pub fn fetch_instruction<B: Bus>(&mut self, bus: &mut B) -> Fetched {
        let pc = self.cpu.pc;
        self.cpu.prev_pc = pc;
        self.hooks.instruction(pc);

        let op = self.fetch(bus);
        let param = if opcodes::is_two_word(op) { self.fetch(bus) } else { 0 };
        self.cpu.op = op;
        self.cpu.param = param;

        Fetched { pc, op, param, inst: opcodes::decode(op) }
    }

    /// Latch rising edges of the interrupt lines into IF0/IF1.
    fn sample_interrupts(&mut self) {
        for n in 0..2 {
            let level = self.cpu.irq_line[n];
            if level && !self.cpu.irq_sampled[n] {
                self.cpu.irq_flag[n] = true;
            }
            self.cpu.irq_sampled[n] = level;
        }
    }

    /// Line to acknowledge at this boundary, INT0 first.
    fn pending_interrupt(&mut self) -> Option<usize> {
        self.sample_interrupts();
        if !self.cpu.ie {
            return None;
        }
        (0..2).find(|&n| self.cpu.irq_flag[n] && !self.cpu.irq_mask[n])
    }

    /// Acknowledge an interrupt: push PC, disable interrupts, jump to the vector.
    fn do_interrupt<B: Bus>(&mut self, bus: &mut B, line: usize) {
        log::debug!("INT{} at ${:04X}", line, self.cpu.pc);
        self.cpu.prev_pc = self.cpu.pc;
        self.push_stack(bus);
        self.cpu.ie = false;
        self.cpu.pc = INT_VECTORS[line];
        self.consume(INT_ACK_CYCLES as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn machine(program: &[u16]) -> (Hmcs400, Memory) {
        let core = Hmcs400::new(Variant::HMCS404);
        let mut mem = Memory::new(core.variant());
        mem.load_words(program);
        (core, mem)
    }

    #[test]
    fn test_fetch_wraps_and_masks() {
        let (mut core, mut mem) = machine(&[]);
        mem.rom[5] = 0xFFFF;
        core.cpu.pc = 5;
        assert_eq!(core.fetch(&mut mem), 0x3FF);
        assert_eq!(core.cpu.pc, 6);

        for pc in [0u16, 0x7FF, 0x1234, 0x3FFF] {
            core.cpu.pc = pc;
            let op = core.fetch(&mut mem);
            assert_eq!(op & !0x3FF, 0);
            assert_eq!(core.cpu.pc, (pc + 1) % 16384);
        }
    }

    #[test]
    fn test_fetch_consumes_one_cycle() {
        let (mut core, mut mem) = machine(&[0x000]);
        let t = core.cpu.tick;
        core.fetch(&mut mem);
        assert_eq!(core.cpu.tick, t + 1);
    }

    #[test]
    fn test_lai_then_lbr_advances_two() {
        // LAI 0 ; LBR 4
        let (mut core, mut mem) = machine(&[0x0230, 0x0244]);
        core.cpu.a = 7;
        core.cpu.ca = false;
        let used = core.run(&mut mem, 2);
        assert_eq!(used, 2);
        assert_eq!(core.cpu.pc, 2);
        assert_eq!(core.cpu.a, 0);
        assert_eq!(core.cpu.b, 0xF);
    }

    #[test]
    fn test_two_word_instruction_fetches_param() {
        // LMID 5,$021
        let (mut core, mut mem) = machine(&[0x1A5, 0x021]);
        let c = core.step(&mut mem);
        assert_eq!(c, 2);
        assert_eq!(core.cpu.pc, 2);
        assert_eq!(core.cpu.param, 0x021);
        assert_eq!(mem.data[0x021], 5);
    }

    #[test]
    fn test_budget_overrun_carries_over() {
        // CAL 3 takes 2 cycles; a 1-cycle budget overruns by one
        let (mut core, mut mem) = machine(&[0x1C3, 0x000, 0x000, 0x000, 0x000]);
        assert_eq!(core.run(&mut mem, 1), 2);
        assert_eq!(core.cpu.pc, 3);
        // the next cycle is already paid for
        assert_eq!(core.run(&mut mem, 1), 0);
        assert_eq!(core.run(&mut mem, 1), 1);
        assert_eq!(core.cpu.pc, 4);
    }

    #[test]
    fn test_trace_hook_sees_each_pc() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        // NOP ; LMID 1,$020 ; NOP
        let (mut core, mut mem) = machine(&[0x000, 0x1A1, 0x020, 0x000]);
        core.set_trace_hook(move |pc| sink.borrow_mut().push(pc));
        core.run(&mut mem, 4);
        assert_eq!(*seen.borrow(), vec![0, 1, 3]);
    }

    #[test]
    fn test_standby_until_wake() {
        // SBY ; LAI 9
        let (mut core, mut mem) = machine(&[0x14C, 0x239]);
        assert_eq!(core.run(&mut mem, 10), 10);
        assert_eq!(core.cpu.state, RunState::Standby);
        assert_eq!(core.cpu.pc, 1);
        assert_eq!(core.cpu.a, 0);
        core.run(&mut mem, 10);
        assert_eq!(core.cpu.pc, 1);

        core.wake();
        core.run(&mut mem, 1);
        assert_eq!(core.cpu.a, 9);
        assert_eq!(core.cpu.pc, 2);
    }

    #[test]
    fn test_stop_ignores_interrupts() {
        let (mut core, mut mem) = machine(&[0x14D, 0x000]);
        core.cpu.ie = true;
        core.cpu.irq_mask = [false; 2];
        core.run(&mut mem, 1);
        assert_eq!(core.cpu.state, RunState::Stop);
        core.set_input_line(0, true);
        core.run(&mut mem, 5);
        assert_eq!(core.cpu.pc, 1);
        // the edge was latched while stopped and is taken after waking
        assert!(core.cpu.irq_flag[0]);
        core.wake();
        core.step(&mut mem);
        assert_eq!(core.cpu.pc, INT_VECTORS[0]);
    }

    #[test]
    fn test_interrupt_acknowledge() {
        let mut program = vec![0x000u16; 16];
        program[2] = 0x011; // RTNI at the INT0 vector
        let (mut core, mut mem) = machine(&program);
        core.cpu.pc = 8;
        core.cpu.ie = true;
        core.cpu.irq_mask[0] = false;
        core.cpu.ca = true;
        core.set_input_line(0, true);

        let c = core.step(&mut mem);
        assert_eq!(c, INT_ACK_CYCLES);
        assert_eq!(core.cpu.pc, 2);
        assert!(!core.cpu.ie);
        assert_eq!(core.cpu.stack_depth(), 1);

        // level stays high: no new edge, IE off, RTNI executes
        core.cpu.ca = false;
        assert_eq!(core.step(&mut mem), 3);
        assert_eq!(core.cpu.pc, 8);
        assert!(core.cpu.ie);
        assert!(core.cpu.ca);
        assert_eq!(core.cpu.sp, STACK_TOP);
    }

    #[test]
    fn test_interrupt_masked_or_disabled() {
        let (mut core, mut mem) = machine(&[0x000; 8]);
        core.cpu.ie = true;
        core.set_input_line(1, true);
        core.step(&mut mem);
        assert_eq!(core.cpu.pc, 1);
        assert!(core.cpu.irq_flag[1]);

        core.cpu.irq_mask[1] = false;
        core.cpu.ie = false;
        core.step(&mut mem);
        assert_eq!(core.cpu.pc, 2);

        core.cpu.ie = true;
        core.step(&mut mem);
        assert_eq!(core.cpu.pc, INT_VECTORS[1]);
    }

    #[test]
    fn test_int0_has_priority() {
        let (mut core, mut mem) = machine(&[0x000; 8]);
        core.cpu.ie = true;
        core.cpu.irq_mask = [false; 2];
        core.set_input_line(0, true);
        core.set_input_line(1, true);
        core.step(&mut mem);
        assert_eq!(core.cpu.pc, INT_VECTORS[0]);
        assert!(core.cpu.irq_flag[1]);
    }

    #[test]
    fn test_reset() {
        let (mut core, mut mem) = machine(&[0x1C8, 0x000]);
        core.cpu.a = 3;
        core.run(&mut mem, 2);
        assert_eq!(core.cpu.stack_depth(), 1);
        core.reset();
        assert_eq!(core.cpu.pc, 0);
        assert_eq!(core.cpu.sp, STACK_TOP);
        assert_eq!(core.cpu.irq_mask, [true; 2]);
        assert_eq!(core.cpu.a, 3);
    }

    #[test]
    fn test_from_model() {
        let reg = Registry::new();
        let core = Hmcs400::from_model(&reg, "hd614088").unwrap();
        assert_eq!(core.variant().rom_words, 0x2000);
        assert!(Hmcs400::from_model(&reg, "z80").is_err());
    }

    #[test]
    fn test_run_clocks_uses_divider() {
        let v = Variant::HMCS408.with_divider(Divider::Div4).unwrap();
        let mut core = Hmcs400::new(v);
        let mut mem = Memory::new(&v);
        assert_eq!(core.run_clocks(&mut mem, 16), 16);
        assert_eq!(core.cpu.pc, 4);
    }

    #[test]
    fn test_halted_run_spends_large_budget() {
        // SBY
        let (mut core, mut mem) = machine(&[0x14C]);
        let budget = 1u64 << 32;
        assert_eq!(core.run(&mut mem, budget), budget);
        assert!(core.is_halted());
        assert_eq!(core.run(&mut mem, 5), 5);
        assert_eq!(core.cpu.tick, budget + 5);
    }

    #[test]
    fn test_huge_budget_saturates() {
        let (mut core, mut mem) = machine(&[0x14C]);
        let used = core.run(&mut mem, u64::MAX);
        assert_eq!(used, i64::MAX as u64);
        assert_eq!(core.run(&mut mem, 3), 3);
    }

    #[test]
    fn test_instruction_cycle_bound() {
        for op in 0..opcodes::OPCODE_COUNT as u16 {
            let f = Fetched { pc: 0, op, param: 0, inst: opcodes::decode(op) };
            let cycles = f.words() as u32 + opcodes::extra_cycles(f.inst) as u32;
            assert!(cycles >= 1 && cycles <= MAX_INSTRUCTION_CYCLES, "op {:03X}", op);
        }
    }

    #[test]
    fn test_step_matches_declared_cost() {
        // LMID 1,$020 ; CAL 4 ; ... ; RTN
        let (mut core, mut mem) = machine(&[0x1A1, 0x020, 0x1C4, 0x000, 0x010]);
        for _ in 0..3 {
            let f = core.fetch_instruction(&mut mem);
            let extra = core.execute_inst(&mut mem, f);
            assert_eq!(extra, opcodes::extra_cycles(f.inst));
            assert!((f.words() + extra) as u32 <= MAX_INSTRUCTION_CYCLES);
        }
        assert_eq!(core.cpu.pc, 3);
    }
}
