//! HMCS400 instruction decoder.
//!
//! Opcodes are 10-bit words. Instructions in the ranges `0x100..0x140` and
//! `0x150..0x1B0` carry a second word (a direct RAM address or the low bits
//! of a long jump target); everything else is a single word.
//!
//! Decoding resolves in three tiers, widest mask first:
//!
//! 1. `op & 0x3F0` page classes, then the whole `0x300..0x3FF` BR class
//! 2. `op & 0x3FC` for bit operations and RAM forms with an SPX/SPY exchange
//! 3. exact match, falling back to [`Instruction::Illegal`]
//!
//! The rules live in [`RULES`] in that order; a value that matches several
//! rules takes the first. [`decode`] reads a 1024-entry table built once from
//! the rules.

use std::sync::OnceLock;

/// Number of distinct opcode words.
pub const OPCODE_COUNT: usize = 1024;

/// Mask applied to every fetched word.
pub const OPCODE_MASK: u16 = 0x3FF;

/// RAM operand selection for instructions that have both an indexed and a
/// direct (two-word) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addr {
    /// W:X:Y
    Indexed,
    /// Address taken from the second instruction word
    Direct,
}

/// Post-access exchange of X with SPX and/or Y with SPY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapSp {
    pub x: bool,
    pub y: bool,
}

impl SwapSp {
    pub const NONE: SwapSp = SwapSp { x: false, y: false };

    /// Decode from opcode bits 0 (X) and 1 (Y).
    pub fn from_op(op: u16) -> Self {
        SwapSp { x: op & 1 != 0, y: op & 2 != 0 }
    }
}

/// Decoded HMCS400 instruction with operands.
///
/// Immediates (`i`), memory-register indices (`m`), port numbers (`p`) and
/// bit numbers (`n`) are already extracted from the opcode. Long jump
/// variants carry the high 4 target bits; the low 10 come from the second
/// word at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Illegal,

    // Immediate transfer
    Lai { i: u8 },
    Lbi { i: u8 },
    Lmid { i: u8 },
    Lmiiy { i: u8 },

    // Register-to-register
    Lab,
    Lba,
    Law,
    Lay,
    Laspx,
    Laspy,
    Lamr { m: u8 },
    Xmra { m: u8 },

    // RAM address registers
    Lwi { i: u8 },
    Lxi { i: u8 },
    Lyi { i: u8 },
    Lwa,
    Lxa,
    Lya,
    Iy,
    Dy,
    Ayy,
    Syy,
    Xsp(SwapSp),

    // RAM-register
    Lam { addr: Addr, swap: SwapSp },
    Lbm { swap: SwapSp },
    Lma { addr: Addr, swap: SwapSp },
    Lmaiy { x: bool },
    Lmady { x: bool },
    Xma { addr: Addr, swap: SwapSp },
    Xmb { swap: SwapSp },

    // Arithmetic
    Ai { i: u8 },
    Ib,
    Db,
    Daa,
    Das,
    Nega,
    Comb,
    Rotr,
    Rotl,
    Sec,
    Rec,
    Tc,
    Am { addr: Addr },
    Amc { addr: Addr },
    Smc { addr: Addr },
    Or,
    Anm { addr: Addr },
    Orm { addr: Addr },
    Eorm { addr: Addr },

    // Compare (skip on condition)
    Inem { i: u8, addr: Addr },
    Anem { addr: Addr },
    Bnem,
    Ynei { i: u8 },
    Ilem { i: u8, addr: Addr },
    Alem { addr: Addr },
    Blem,
    Alei { i: u8 },

    // RAM bit manipulation
    Sem { n: u8, addr: Addr },
    Rem { n: u8, addr: Addr },
    Tm { n: u8, addr: Addr },

    // ROM address
    Br { b: u8 },
    Brl { hi: u8 },
    Jmpl { hi: u8 },
    Cal { a: u8 },
    Call { hi: u8 },
    Tbr { p: u8 },
    Rtn,
    Rtni,

    // Input/output
    Sed,
    Sedd { m: u8 },
    Red,
    Redd { m: u8 },
    Td,
    Tdd { m: u8 },
    Lar { p: u8 },
    Lbr { p: u8 },
    Lra { p: u8 },
    Lrb { p: u8 },
    P { p: u8 },

    // Control
    Sts,
    Sby,
    Stop,
}

/// Whether an opcode is followed by a second (address) word.
#[inline(always)]
pub fn is_two_word(op: u16) -> bool {
    (0x100..0x140).contains(&op) || (0x150..0x1B0).contains(&op)
}

/// Decode tier a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    /// `0x3F0` page classes and the `0x300` BR class
    Page,
    /// `0x3FC` field classes
    Field,
    /// Exact opcode values
    Exact,
}

/// One decode rule: `op & mask == value` selects `build(op)`.
#[derive(Clone, Copy)]
pub struct Rule {
    pub tier: Tier,
    pub mask: u16,
    pub value: u16,
    pub build: fn(u16) -> Instruction,
}

impl Rule {
    #[inline(always)]
    pub fn matches(&self, op: u16) -> bool {
        op & self.mask == self.value
    }
}

const fn page(value: u16, build: fn(u16) -> Instruction) -> Rule {
    Rule { tier: Tier::Page, mask: 0x3F0, value, build }
}

const fn field(value: u16, build: fn(u16) -> Instruction) -> Rule {
    Rule { tier: Tier::Field, mask: 0x3FC, value, build }
}

const fn exact(value: u16, build: fn(u16) -> Instruction) -> Rule {
    Rule { tier: Tier::Exact, mask: 0x3FF, value, build }
}

fn imm(op: u16) -> u8 { (op & 0xF) as u8 }

/// Indexed form below 0x100, direct form above.
fn addr(op: u16) -> Addr {
    if op & 0x100 != 0 { Addr::Direct } else { Addr::Indexed }
}

/// Decode rules in precedence order.
pub static RULES: &[Rule] = &[
    // tier 1: 0x3F0
    page(0x1C0, |op| Instruction::Cal { a: (op & 0x3F) as u8 }),
    page(0x1D0, |op| Instruction::Cal { a: (op & 0x3F) as u8 }),
    page(0x1E0, |op| Instruction::Cal { a: (op & 0x3F) as u8 }),
    page(0x1F0, |op| Instruction::Cal { a: (op & 0x3F) as u8 }),

    page(0x020, |op| Instruction::Inem { i: imm(op), addr: Addr::Indexed }),
    page(0x120, |op| Instruction::Inem { i: imm(op), addr: Addr::Direct }),
    page(0x030, |op| Instruction::Ilem { i: imm(op), addr: Addr::Indexed }),
    page(0x130, |op| Instruction::Ilem { i: imm(op), addr: Addr::Direct }),
    page(0x070, |op| Instruction::Ynei { i: imm(op) }),
    page(0x0B0, |op| Instruction::Tbr { p: imm(op) }),
    page(0x150, |op| Instruction::Jmpl { hi: imm(op) }),
    page(0x160, |op| Instruction::Call { hi: imm(op) }),
    page(0x170, |op| Instruction::Brl { hi: imm(op) }),
    page(0x1A0, |op| Instruction::Lmid { i: imm(op) }),
    page(0x1B0, |op| Instruction::P { p: imm(op) }),

    page(0x200, |op| Instruction::Lbi { i: imm(op) }),
    page(0x210, |op| Instruction::Lyi { i: imm(op) }),
    page(0x220, |op| Instruction::Lxi { i: imm(op) }),
    page(0x230, |op| Instruction::Lai { i: imm(op) }),
    page(0x240, |op| Instruction::Lbr { p: imm(op) }),
    page(0x250, |op| Instruction::Lar { p: imm(op) }),
    page(0x260, |op| Instruction::Redd { m: imm(op) }),
    page(0x270, |op| Instruction::Lamr { m: imm(op) }),
    page(0x280, |op| Instruction::Ai { i: imm(op) }),
    page(0x290, |op| Instruction::Lmiiy { i: imm(op) }),
    page(0x2A0, |op| Instruction::Tdd { m: imm(op) }),
    page(0x2B0, |op| Instruction::Alei { i: imm(op) }),
    page(0x2C0, |op| Instruction::Lrb { p: imm(op) }),
    page(0x2D0, |op| Instruction::Lra { p: imm(op) }),
    page(0x2E0, |op| Instruction::Sedd { m: imm(op) }),
    page(0x2F0, |op| Instruction::Xmra { m: imm(op) }),

    Rule { tier: Tier::Page, mask: 0x300, value: 0x300, build: |op| Instruction::Br { b: (op & 0xFF) as u8 } },

    // tier 2: 0x3FC
    field(0x084, |op| Instruction::Sem { n: (op & 3) as u8, addr: Addr::Indexed }),
    field(0x184, |op| Instruction::Sem { n: (op & 3) as u8, addr: Addr::Direct }),
    field(0x088, |op| Instruction::Rem { n: (op & 3) as u8, addr: Addr::Indexed }),
    field(0x188, |op| Instruction::Rem { n: (op & 3) as u8, addr: Addr::Direct }),
    field(0x08C, |op| Instruction::Tm { n: (op & 3) as u8, addr: Addr::Indexed }),
    field(0x18C, |op| Instruction::Tm { n: (op & 3) as u8, addr: Addr::Direct }),

    field(0x000, |op| Instruction::Xsp(SwapSp::from_op(op))),
    field(0x040, |op| Instruction::Lbm { swap: SwapSp::from_op(op) }),
    field(0x080, |op| Instruction::Xma { addr: Addr::Indexed, swap: SwapSp::from_op(op) }),
    field(0x090, |op| Instruction::Lam { addr: Addr::Indexed, swap: SwapSp::from_op(op) }),
    field(0x094, |op| Instruction::Lma { addr: Addr::Indexed, swap: SwapSp::from_op(op) }),
    field(0x0C0, |op| Instruction::Xmb { swap: SwapSp::from_op(op) }),
    field(0x0F0, |op| Instruction::Lwi { i: (op & 3) as u8 }),

    // tier 3: exact
    exact(0x004, |op| Instruction::Anem { addr: addr(op) }),
    exact(0x104, |op| Instruction::Anem { addr: addr(op) }),
    exact(0x008, |op| Instruction::Am { addr: addr(op) }),
    exact(0x108, |op| Instruction::Am { addr: addr(op) }),
    exact(0x00C, |op| Instruction::Orm { addr: addr(op) }),
    exact(0x10C, |op| Instruction::Orm { addr: addr(op) }),
    exact(0x014, |op| Instruction::Alem { addr: addr(op) }),
    exact(0x114, |op| Instruction::Alem { addr: addr(op) }),
    exact(0x018, |op| Instruction::Amc { addr: addr(op) }),
    exact(0x118, |op| Instruction::Amc { addr: addr(op) }),
    exact(0x01C, |op| Instruction::Eorm { addr: addr(op) }),
    exact(0x11C, |op| Instruction::Eorm { addr: addr(op) }),
    exact(0x098, |op| Instruction::Smc { addr: addr(op) }),
    exact(0x198, |op| Instruction::Smc { addr: addr(op) }),
    exact(0x09C, |op| Instruction::Anm { addr: addr(op) }),
    exact(0x19C, |op| Instruction::Anm { addr: addr(op) }),

    exact(0x010, |_| Instruction::Rtn),
    exact(0x011, |_| Instruction::Rtni),
    exact(0x044, |_| Instruction::Bnem),
    exact(0x048, |_| Instruction::Lab),
    exact(0x04C, |_| Instruction::Ib),
    exact(0x050, |_| Instruction::Lmaiy { x: false }),
    exact(0x051, |_| Instruction::Lmaiy { x: true }),
    exact(0x054, |_| Instruction::Ayy),
    exact(0x058, |_| Instruction::Laspy),
    exact(0x05C, |_| Instruction::Iy),
    exact(0x060, |_| Instruction::Nega),
    exact(0x064, |_| Instruction::Red),
    exact(0x068, |_| Instruction::Laspx),
    exact(0x06F, |_| Instruction::Tc),

    exact(0x0A0, |_| Instruction::Rotr),
    exact(0x0A1, |_| Instruction::Rotl),
    exact(0x0A6, |_| Instruction::Daa),
    exact(0x0AA, |_| Instruction::Das),
    exact(0x0AF, |_| Instruction::Lay),
    exact(0x0C4, |_| Instruction::Blem),
    exact(0x0C8, |_| Instruction::Lba),
    exact(0x0CF, |_| Instruction::Db),
    exact(0x0D0, |_| Instruction::Lmady { x: false }),
    exact(0x0D1, |_| Instruction::Lmady { x: true }),
    exact(0x0D4, |_| Instruction::Syy),
    exact(0x0D8, |_| Instruction::Lya),
    exact(0x0DF, |_| Instruction::Dy),
    exact(0x0E0, |_| Instruction::Td),
    exact(0x0E4, |_| Instruction::Sed),
    exact(0x0E8, |_| Instruction::Lxa),
    exact(0x0EC, |_| Instruction::Rec),
    exact(0x0EF, |_| Instruction::Sec),

    exact(0x100, |_| Instruction::Law),
    exact(0x110, |_| Instruction::Lwa),
    exact(0x140, |_| Instruction::Comb),
    exact(0x144, |_| Instruction::Or),
    exact(0x148, |_| Instruction::Sts),
    exact(0x14C, |_| Instruction::Sby),
    exact(0x14D, |_| Instruction::Stop),
    exact(0x180, |_| Instruction::Xma { addr: Addr::Direct, swap: SwapSp::NONE }),
    exact(0x190, |_| Instruction::Lam { addr: Addr::Direct, swap: SwapSp::NONE }),
    exact(0x194, |_| Instruction::Lma { addr: Addr::Direct, swap: SwapSp::NONE }),
];

/// Index of the rule selecting `op`, or `None` for an illegal opcode.
pub fn find_rule(op: u16) -> Option<usize> {
    let op = op & OPCODE_MASK;
    RULES.iter().position(|r| r.matches(op))
}

/// Decode by walking [`RULES`] in order.
pub fn decode_rules(op: u16) -> Instruction {
    let op = op & OPCODE_MASK;
    match find_rule(op) {
        Some(i) => (RULES[i].build)(op),
        None => Instruction::Illegal,
    }
}

static DECODE_TABLE: OnceLock<Box<[Instruction; OPCODE_COUNT]>> = OnceLock::new();

fn table() -> &'static [Instruction; OPCODE_COUNT] {
    DECODE_TABLE.get_or_init(|| {
        let mut t = Box::new([Instruction::Illegal; OPCODE_COUNT]);
        for (op, slot) in t.iter_mut().enumerate() {
            *slot = decode_rules(op as u16);
        }
        t
    })
}

/// Decode a 10-bit opcode word. Bits above bit 9 are ignored.
#[inline(always)]
pub fn decode(op: u16) -> Instruction {
    table()[(op & OPCODE_MASK) as usize]
}

/// Fixed cycle cost beyond the one cycle per fetched word.
pub fn extra_cycles(inst: Instruction) -> u8 {
    match inst {
        Instruction::Cal { .. } | Instruction::Tbr { .. } | Instruction::P { .. } => 1,
        Instruction::Rtn | Instruction::Rtni => 2,
        _ => 0,
    }
}

/// One fetched instruction: opcode word plus the optional second word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fetched {
    /// Address of the opcode word
    pub pc: u16,
    pub op: u16,
    /// Second word, zero for single-word instructions
    pub param: u16,
    pub inst: Instruction,
}

impl Fetched {
    pub fn words(&self) -> u8 {
        if is_two_word(self.op) { 2 } else { 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_rules() {
        for op in 0..OPCODE_COUNT as u16 {
            assert_eq!(decode(op), decode_rules(op), "op {:03X}", op);
            assert_eq!(decode(op), decode(op));
        }
    }

    #[test]
    fn test_high_bits_ignored() {
        assert_eq!(decode(0xFE30), decode(0x230));
        assert_eq!(decode(0x0400), decode(0x000));
    }

    #[test]
    fn test_two_word_ranges() {
        assert!(!is_two_word(0x0FF));
        assert!(is_two_word(0x100));
        assert!(is_two_word(0x13F));
        assert!(!is_two_word(0x140));
        assert!(!is_two_word(0x14F));
        assert!(is_two_word(0x150));
        assert!(is_two_word(0x1AF));
        assert!(!is_two_word(0x1B0));
        assert!(!is_two_word(0x1C0));
    }

    #[test]
    fn test_tier_order_is_monotonic() {
        let tiers: Vec<Tier> = RULES.iter().map(|r| r.tier).collect();
        let mut sorted = tiers.clone();
        sorted.sort();
        assert_eq!(tiers, sorted);
    }

    #[test]
    fn test_page_tier_wins() {
        // 0x028 is INEM at 0x3F0 even though its low bits look like AM (0x008)
        assert_eq!(decode(0x028), Instruction::Inem { i: 8, addr: Addr::Indexed });
        assert_eq!(decode(0x084), Instruction::Sem { n: 0, addr: Addr::Indexed });
        // whole 0x3xx class is BR
        assert_eq!(decode(0x3A5), Instruction::Br { b: 0xA5 });
        assert_eq!(decode(0x300), Instruction::Br { b: 0x00 });
        // CAL covers 0x1C0..0x1FF
        assert_eq!(decode(0x1FF), Instruction::Cal { a: 0x3F });
        assert_eq!(find_rule(0x3FF).map(|i| RULES[i].tier), Some(Tier::Page));
    }

    #[test]
    fn test_field_tier() {
        assert_eq!(decode(0x000), Instruction::Xsp(SwapSp::NONE));
        assert_eq!(decode(0x003), Instruction::Xsp(SwapSp { x: true, y: true }));
        assert_eq!(decode(0x092), Instruction::Lam { addr: Addr::Indexed, swap: SwapSp { x: false, y: true } });
        assert_eq!(decode(0x18F), Instruction::Tm { n: 3, addr: Addr::Direct });
        assert_eq!(decode(0x0F2), Instruction::Lwi { i: 2 });
        assert_eq!(find_rule(0x0F2).map(|i| RULES[i].tier), Some(Tier::Field));
    }

    #[test]
    fn test_exact_tier() {
        assert_eq!(decode(0x010), Instruction::Rtn);
        assert_eq!(decode(0x011), Instruction::Rtni);
        assert_eq!(decode(0x108), Instruction::Am { addr: Addr::Direct });
        assert_eq!(decode(0x008), Instruction::Am { addr: Addr::Indexed });
        assert_eq!(decode(0x14D), Instruction::Stop);
        assert_eq!(decode(0x180), Instruction::Xma { addr: Addr::Direct, swap: SwapSp::NONE });
    }

    #[test]
    fn test_illegal_opcodes() {
        for op in [0x012u16, 0x06E, 0x0A2, 0x0FC, 0x101, 0x14E, 0x181, 0x191] {
            assert_eq!(decode(op), Instruction::Illegal, "op {:03X}", op);
            assert_eq!(find_rule(op), None);
        }
    }

    #[test]
    fn test_every_legal_opcode_has_one_first_rule() {
        let legal = (0..OPCODE_COUNT as u16).filter(|&op| find_rule(op).is_some()).count();
        assert_eq!(legal, 862);
        assert_eq!(OPCODE_COUNT - legal, 162);
    }

    #[test]
    fn test_extra_cycles() {
        assert_eq!(extra_cycles(Instruction::Rtn), 2);
        assert_eq!(extra_cycles(Instruction::Cal { a: 0 }), 1);
        assert_eq!(extra_cycles(Instruction::Lab), 0);
        assert_eq!(extra_cycles(Instruction::Illegal), 0);
    }
}
