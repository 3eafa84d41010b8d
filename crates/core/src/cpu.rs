//! HMCS400 CPU core.
//!
//! Register file and instruction semantics for the ~90 HMCS400 operations:
//! transfers, 4-bit arithmetic, compare-and-skip, RAM bit manipulation,
//! branches/calls through the nibble stack, discrete/R-port I/O, and the
//! standby/stop modes. The execute step runs on [`Hmcs400`] so that data
//! accesses can reach the interrupt-control nibbles held inside the core
//! and the diagnostic hooks.
//!
//! All register and memory values are nibbles and wrap modulo 16. The carry
//! flag is the carry-out of the 4-bit operation; for SMC, which subtracts by
//! adding the complement, that means carry set = no borrow. Conditional
//! instructions skip the following instruction (one or two words) when their
//! condition holds, at one cycle per skipped word.

use serde::{Deserialize, Serialize};

use crate::memory::Bus;
use crate::opcodes::{self, Addr, Fetched, Instruction, SwapSp};
use crate::trace::Diagnostic;
use crate::{Hmcs400, DATA_MASK, MR_BASE, PC_MASK, STACK_BASE, STACK_TOP};

/// Execution state of the fetch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Fetching and executing instructions
    Running,
    /// SBY executed; waiting for a wake signal
    Standby,
    /// STOP executed; waiting for a wake signal
    Stop,
}

/// HMCS400 register file.
///
/// `w` is write-only on early mask revisions; this core lets LAW read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    /// Program counter (14-bit word address of the next fetch)
    pub pc: u16,
    /// Address of the instruction being executed
    pub prev_pc: u16,
    /// Current opcode word
    pub op: u16,
    /// Second word of the current instruction, zero if none
    pub param: u16,
    /// Accumulator
    pub a: u8,
    pub b: u8,
    /// RAM page register (2 bits)
    pub w: u8,
    pub x: u8,
    pub y: u8,
    pub spx: u8,
    pub spy: u8,
    /// Stack pointer, next free nibble in 0x3C0..=0x3FF (0x3BF when full)
    pub sp: u16,
    /// Carry
    pub ca: bool,
    /// Interrupt enable
    pub ie: bool,
    /// Interrupt request flags IF0, IF1
    pub irq_flag: [bool; 2],
    /// Interrupt masks IM0, IM1 (true = masked)
    pub irq_mask: [bool; 2],
    /// Host-driven interrupt line levels
    pub irq_line: [bool; 2],
    /// Line levels at the previous instruction boundary
    pub irq_sampled: [bool; 2],
    pub state: RunState,
    /// Monotonic cycle counter
    pub tick: u64,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            pc: 0,
            prev_pc: 0,
            op: 0,
            param: 0,
            a: 0,
            b: 0,
            w: 0,
            x: 0,
            y: 0,
            spx: 0,
            spy: 0,
            sp: STACK_TOP,
            ca: false,
            ie: false,
            irq_flag: [false; 2],
            irq_mask: [true; 2],
            irq_line: [false; 2],
            irq_sampled: [false; 2],
            state: RunState::Running,
            tick: 0,
        }
    }

    /// Indexed RAM address W:X:Y.
    #[inline(always)]
    pub fn ram_addr(&self) -> u16 {
        ((self.w as u16 & 3) << 8 | (self.x as u16) << 4 | self.y as u16) & DATA_MASK
    }

    /// Number of call frames currently on the stack.
    pub fn stack_depth(&self) -> usize {
        (STACK_TOP.saturating_sub(self.sp) / 4) as usize
    }

    #[inline(always)]
    fn swap_sp(&mut self, swap: SwapSp) {
        if swap.x { std::mem::swap(&mut self.x, &mut self.spx); }
        if swap.y { std::mem::swap(&mut self.y, &mut self.spy); }
    }

    /// `a + b + cin`; sets carry on overflow of the nibble.
    #[inline(always)]
    pub fn add(&mut self, a: u8, b: u8, cin: bool) -> u8 {
        let r = (a & 0xF) + (b & 0xF) + cin as u8;
        self.ca = r > 0xF;
        r & 0xF
    }

    /// `m - a - !cin` computed as `m + !a + cin`; carry set when no borrow.
    #[inline(always)]
    pub fn sub_complement(&mut self, m: u8, a: u8, cin: bool) -> u8 {
        self.add(m, !a & 0xF, cin)
    }

    /// Increment a nibble; carry set when it wraps to 0.
    #[inline(always)]
    fn inc(&mut self, v: u8) -> u8 {
        let r = v.wrapping_add(1) & 0xF;
        self.ca = r == 0;
        r
    }

    /// Decrement a nibble; carry set when it wraps to 15.
    #[inline(always)]
    fn dec(&mut self, v: u8) -> u8 {
        let r = v.wrapping_sub(1) & 0xF;
        self.ca = r == 0xF;
        r
    }

    /// Decimal adjust after addition.
    pub fn daa(&mut self) {
        if self.ca || self.a > 9 {
            self.a = self.a.wrapping_add(6) & 0xF;
            self.ca = true;
        }
    }

    /// Decimal adjust after subtraction.
    pub fn das(&mut self) {
        if !self.ca || self.a > 9 {
            self.a = self.a.wrapping_add(10) & 0xF;
            self.ca = false;
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Instruction execution on Hmcs400 ----

impl Hmcs400 {
    /// Execute one fetched instruction and return cycles beyond its fetches.
    ///
    /// The program counter already points past the instruction (and its
    /// second word, if any).
    pub fn execute_inst<B: Bus>(&mut self, bus: &mut B, f: Fetched) -> u8 {
        let inst = f.inst;
        let mut extra = opcodes::extra_cycles(inst);

        match inst {
            Instruction::Illegal => {
                self.hooks.report(Diagnostic::IllegalOpcode { pc: f.pc, op: f.op });
            }

            // -- Immediate --
            Instruction::Lai { i } => self.cpu.a = i,
            Instruction::Lbi { i } => self.cpu.b = i,
            Instruction::Lmid { i } => {
                let addr = self.operand(Addr::Direct, f);
                self.write_mem(bus, addr, i);
            }
            Instruction::Lmiiy { i } => {
                let addr = self.cpu.ram_addr();
                self.write_mem(bus, addr, i);
                self.cpu.y = (self.cpu.y + 1) & 0xF;
            }

            // -- Register-to-register --
            Instruction::Lab => self.cpu.a = self.cpu.b,
            Instruction::Lba => self.cpu.b = self.cpu.a,
            Instruction::Law => self.cpu.a = self.cpu.w & 3,
            Instruction::Lay => self.cpu.a = self.cpu.y,
            Instruction::Laspx => self.cpu.a = self.cpu.spx,
            Instruction::Laspy => self.cpu.a = self.cpu.spy,
            Instruction::Lamr { m } => self.cpu.a = self.read_mem(bus, MR_BASE | m as u16),
            Instruction::Xmra { m } => {
                let addr = MR_BASE | m as u16;
                let v = self.read_mem(bus, addr);
                self.write_mem(bus, addr, self.cpu.a);
                self.cpu.a = v;
            }

            // -- RAM address registers --
            Instruction::Lwi { i } => self.cpu.w = i & 3,
            Instruction::Lxi { i } => self.cpu.x = i,
            Instruction::Lyi { i } => self.cpu.y = i,
            Instruction::Lwa => self.cpu.w = self.cpu.a & 3,
            Instruction::Lxa => self.cpu.x = self.cpu.a,
            Instruction::Lya => self.cpu.y = self.cpu.a,
            Instruction::Iy => self.cpu.y = self.cpu.inc(self.cpu.y),
            Instruction::Dy => self.cpu.y = self.cpu.dec(self.cpu.y),
            Instruction::Ayy => self.cpu.y = self.cpu.add(self.cpu.y, self.cpu.a, false),
            Instruction::Syy => {
                let (y, a) = (self.cpu.y, self.cpu.a);
                self.cpu.ca = a > y;
                self.cpu.y = y.wrapping_sub(a) & 0xF;
            }
            Instruction::Xsp(swap) => self.cpu.swap_sp(swap),

            // -- RAM-register --
            Instruction::Lam { addr, swap } => {
                let addr = self.operand(addr, f);
                self.cpu.a = self.read_mem(bus, addr);
                self.cpu.swap_sp(swap);
            }
            Instruction::Lbm { swap } => {
                let addr = self.cpu.ram_addr();
                self.cpu.b = self.read_mem(bus, addr);
                self.cpu.swap_sp(swap);
            }
            Instruction::Lma { addr, swap } => {
                let addr = self.operand(addr, f);
                self.write_mem(bus, addr, self.cpu.a);
                self.cpu.swap_sp(swap);
            }
            Instruction::Lmaiy { x } => {
                let addr = self.cpu.ram_addr();
                self.write_mem(bus, addr, self.cpu.a);
                self.cpu.y = (self.cpu.y + 1) & 0xF;
                self.cpu.swap_sp(SwapSp { x, y: false });
            }
            Instruction::Lmady { x } => {
                let addr = self.cpu.ram_addr();
                self.write_mem(bus, addr, self.cpu.a);
                self.cpu.y = self.cpu.y.wrapping_sub(1) & 0xF;
                self.cpu.swap_sp(SwapSp { x, y: false });
            }
            Instruction::Xma { addr, swap } => {
                let addr = self.operand(addr, f);
                let v = self.read_mem(bus, addr);
                self.write_mem(bus, addr, self.cpu.a);
                self.cpu.a = v;
                self.cpu.swap_sp(swap);
            }
            Instruction::Xmb { swap } => {
                let addr = self.cpu.ram_addr();
                let v = self.read_mem(bus, addr);
                self.write_mem(bus, addr, self.cpu.b);
                self.cpu.b = v;
                self.cpu.swap_sp(swap);
            }

            // -- Arithmetic --
            Instruction::Ai { i } => self.cpu.a = self.cpu.add(self.cpu.a, i, false),
            Instruction::Ib => self.cpu.b = self.cpu.inc(self.cpu.b),
            Instruction::Db => self.cpu.b = self.cpu.dec(self.cpu.b),
            Instruction::Daa => self.cpu.daa(),
            Instruction::Das => self.cpu.das(),
            Instruction::Nega => self.cpu.a = self.cpu.a.wrapping_neg() & 0xF,
            Instruction::Comb => self.cpu.b = !self.cpu.b & 0xF,
            Instruction::Rotr => {
                let a = self.cpu.a;
                self.cpu.a = (a >> 1) | (self.cpu.ca as u8) << 3;
                self.cpu.ca = a & 1 != 0;
            }
            Instruction::Rotl => {
                let a = self.cpu.a;
                self.cpu.a = (a << 1 | self.cpu.ca as u8) & 0xF;
                self.cpu.ca = a & 8 != 0;
            }
            Instruction::Sec => self.cpu.ca = true,
            Instruction::Rec => self.cpu.ca = false,
            Instruction::Tc => {
                if self.cpu.ca { extra += self.skip_next(bus); }
            }
            Instruction::Am { addr } => {
                let m = self.read_operand(bus, addr, f);
                self.cpu.a = self.cpu.add(self.cpu.a, m, false);
            }
            Instruction::Amc { addr } => {
                let m = self.read_operand(bus, addr, f);
                self.cpu.a = self.cpu.add(self.cpu.a, m, self.cpu.ca);
            }
            Instruction::Smc { addr } => {
                let m = self.read_operand(bus, addr, f);
                self.cpu.a = self.cpu.sub_complement(m, self.cpu.a, self.cpu.ca);
            }
            Instruction::Or => self.cpu.a |= self.cpu.b,
            Instruction::Anm { addr } => {
                let m = self.read_operand(bus, addr, f);
                self.cpu.a &= m;
            }
            Instruction::Orm { addr } => {
                let m = self.read_operand(bus, addr, f);
                self.cpu.a |= m;
            }
            Instruction::Eorm { addr } => {
                let m = self.read_operand(bus, addr, f);
                self.cpu.a ^= m;
            }

            // -- Compare and skip --
            Instruction::Inem { i, addr } => {
                let m = self.read_operand(bus, addr, f);
                if i != m { extra += self.skip_next(bus); }
            }
            Instruction::Anem { addr } => {
                let m = self.read_operand(bus, addr, f);
                if self.cpu.a != m { extra += self.skip_next(bus); }
            }
            Instruction::Bnem => {
                let m = self.read_operand(bus, Addr::Indexed, f);
                if self.cpu.b != m { extra += self.skip_next(bus); }
            }
            Instruction::Ynei { i } => {
                if self.cpu.y != i { extra += self.skip_next(bus); }
            }
            Instruction::Ilem { i, addr } => {
                let m = self.read_operand(bus, addr, f);
                if i <= m { extra += self.skip_next(bus); }
            }
            Instruction::Alem { addr } => {
                let m = self.read_operand(bus, addr, f);
                if self.cpu.a <= m { extra += self.skip_next(bus); }
            }
            Instruction::Blem => {
                let m = self.read_operand(bus, Addr::Indexed, f);
                if self.cpu.b <= m { extra += self.skip_next(bus); }
            }
            Instruction::Alei { i } => {
                if self.cpu.a <= i { extra += self.skip_next(bus); }
            }

            // -- RAM bit manipulation --
            Instruction::Sem { n, addr } => {
                let addr = self.operand(addr, f);
                let v = self.read_mem(bus, addr) | 1 << n;
                self.write_mem(bus, addr, v);
            }
            Instruction::Rem { n, addr } => {
                let addr = self.operand(addr, f);
                let v = self.read_mem(bus, addr) & !(1 << n);
                self.write_mem(bus, addr, v);
            }
            Instruction::Tm { n, addr } => {
                let m = self.read_operand(bus, addr, f);
                if m >> n & 1 != 0 { extra += self.skip_next(bus); }
            }

            // -- Branch --
            Instruction::Br { b } => {
                self.cpu.pc = (self.cpu.pc & !0xFF) | b as u16;
            }
            Instruction::Brl { hi } | Instruction::Jmpl { hi } => {
                self.cpu.pc = long_target(hi, f.param);
            }
            Instruction::Cal { a } => {
                self.push_stack(bus);
                self.cpu.pc = a as u16;
            }
            Instruction::Call { hi } => {
                self.push_stack(bus);
                self.cpu.pc = long_target(hi, f.param);
            }
            Instruction::Tbr { p } => {
                self.cpu.pc = table_address(p, self.cpu.b, self.cpu.a);
            }
            Instruction::Rtn => {
                if let Some(data) = self.pop_stack(bus) {
                    self.cpu.pc = data & PC_MASK;
                }
            }
            Instruction::Rtni => {
                if let Some(data) = self.pop_stack(bus) {
                    self.cpu.pc = data & PC_MASK;
                    self.cpu.ca = data & 0x8000 != 0;
                }
                self.cpu.ie = true;
            }

            // -- I/O --
            Instruction::Sed => bus.write_d(self.cpu.y, true),
            Instruction::Sedd { m } => bus.write_d(m, true),
            Instruction::Red => bus.write_d(self.cpu.y, false),
            Instruction::Redd { m } => bus.write_d(m, false),
            Instruction::Td => {
                if bus.read_d(self.cpu.y) { extra += self.skip_next(bus); }
            }
            Instruction::Tdd { m } => {
                if bus.read_d(m) { extra += self.skip_next(bus); }
            }
            Instruction::Lar { p } => self.cpu.a = bus.read_r(p) & 0xF,
            Instruction::Lbr { p } => self.cpu.b = bus.read_r(p) & 0xF,
            Instruction::Lra { p } => bus.write_r(p, self.cpu.a),
            Instruction::Lrb { p } => bus.write_r(p, self.cpu.b),
            Instruction::P { p } => {
                let addr = table_address(p, self.cpu.b, self.cpu.a);
                let data = bus.read_program(addr) & opcodes::OPCODE_MASK;
                if data & 0x100 != 0 {
                    self.cpu.b = (data >> 4 & 0xF) as u8;
                    self.cpu.a = (data & 0xF) as u8;
                }
                if data & 0x200 != 0 {
                    bus.write_r(2, (data & 0xF) as u8);
                    bus.write_r(3, (data >> 4 & 0xF) as u8);
                }
            }

            // -- Control --
            Instruction::Sts => bus.serial_start(),
            Instruction::Sby => self.halt(RunState::Standby),
            Instruction::Stop => self.halt(RunState::Stop),
        }

        extra
    }

    /// RAM address of an operand.
    #[inline(always)]
    fn operand(&self, addr: Addr, f: Fetched) -> u16 {
        match addr {
            Addr::Indexed => self.cpu.ram_addr(),
            Addr::Direct => f.param & DATA_MASK,
        }
    }

    #[inline(always)]
    fn read_operand<B: Bus>(&mut self, bus: &mut B, addr: Addr, f: Fetched) -> u8 {
        let addr = self.operand(addr, f);
        self.read_mem(bus, addr)
    }

    /// Data read on behalf of an instruction.
    ///
    /// Interrupt control lives at 0x000/0x001; the stack window is off limits.
    pub(crate) fn read_mem<B: Bus>(&mut self, bus: &mut B, addr: u16) -> u8 {
        let addr = addr & DATA_MASK;
        match addr {
            0x000 => {
                let c = &self.cpu;
                c.ie as u8 | (c.irq_flag[0] as u8) << 1 | (c.irq_mask[0] as u8) << 2 | (c.irq_flag[1] as u8) << 3
            }
            0x001 => self.cpu.irq_mask[1] as u8,
            a if a >= STACK_BASE => {
                self.hooks.report(Diagnostic::StackWindowAccess { pc: self.cpu.prev_pc, addr: a });
                0
            }
            a => bus.read_data(a) & 0xF,
        }
    }

    pub(crate) fn write_mem<B: Bus>(&mut self, bus: &mut B, addr: u16, value: u8) {
        let addr = addr & DATA_MASK;
        let value = value & 0xF;
        match addr {
            0x000 => {
                self.cpu.ie = value & 1 != 0;
                self.cpu.irq_flag[0] = value & 2 != 0;
                self.cpu.irq_mask[0] = value & 4 != 0;
                self.cpu.irq_flag[1] = value & 8 != 0;
            }
            0x001 => self.cpu.irq_mask[1] = value & 1 != 0,
            a if a >= STACK_BASE => {
                self.hooks.report(Diagnostic::StackWindowAccess { pc: self.cpu.prev_pc, addr: a });
            }
            a => bus.write_data(a, value),
        }
    }

    /// Push PC and carry as four nibbles. Returns false if the window is full.
    pub(crate) fn push_stack<B: Bus>(&mut self, bus: &mut B) -> bool {
        if self.cpu.sp < STACK_BASE + 3 {
            self.hooks.report(Diagnostic::StackOverflow { pc: self.cpu.prev_pc });
            return false;
        }
        let mut data = self.cpu.pc & PC_MASK | (self.cpu.ca as u16) << 15;
        for _ in 0..4 {
            bus.write_data(self.cpu.sp, (data & 0xF) as u8);
            self.cpu.sp -= 1;
            data >>= 4;
        }
        true
    }

    /// Pop a stack frame, or `None` if the window is empty.
    pub(crate) fn pop_stack<B: Bus>(&mut self, bus: &mut B) -> Option<u16> {
        if self.cpu.sp > STACK_TOP - 4 {
            self.hooks.report(Diagnostic::StackUnderflow { pc: self.cpu.prev_pc });
            return None;
        }
        let mut data = 0u16;
        for _ in 0..4 {
            self.cpu.sp += 1;
            data = data << 4 | (bus.read_data(self.cpu.sp) & 0xF) as u16;
        }
        Some(data)
    }

    /// Skip the next instruction without executing it.
    ///
    /// Advances PC by 1 or 2 words and returns the cycles spent.
    pub(crate) fn skip_next<B: Bus>(&mut self, bus: &mut B) -> u8 {
        let next = bus.read_program(self.cpu.pc) & opcodes::OPCODE_MASK;
        let words = if opcodes::is_two_word(next) { 2 } else { 1 };
        self.cpu.pc = (self.cpu.pc + words) & PC_MASK;
        words as u8
    }

    fn halt(&mut self, state: RunState) {
        log::debug!("{:?} at ${:04X}", state, self.cpu.prev_pc);
        self.cpu.state = state;
    }
}

/// JMPL/BRL/CALL target: 4 bits from the opcode, 10 from the second word.
#[inline(always)]
fn long_target(hi: u8, param: u16) -> u16 {
    ((hi as u16) << 10 | (param & 0x3FF)) & PC_MASK
}

/// TBR/P table address: p3..p0, 0, 0, B, A.
#[inline(always)]
fn table_address(p: u8, b: u8, a: u8) -> u16 {
    ((p as u16 & 0xF) << 10 | (b as u16 & 0xF) << 4 | a as u16 & 0xF) & PC_MASK
}
