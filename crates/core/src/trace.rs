//! Diagnostic events and host hooks.
//!
//! Anomalies never abort execution. Each one becomes a [`Diagnostic`] that is
//! logged, counted, and handed to the diagnostic hook if the host installed
//! one. The trace hook sees every program counter right before its fetch.

use std::fmt;

/// Something the core recovered from locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// Unassigned opcode executed as a no-op
    IllegalOpcode { pc: u16, op: u16 },
    /// Call or interrupt with a full stack window; the push was dropped
    StackOverflow { pc: u16 },
    /// Return with an empty stack window; execution continued in sequence
    StackUnderflow { pc: u16 },
    /// A non-stack instruction addressed the stack window; the access was dropped
    StackWindowAccess { pc: u16, addr: u16 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Diagnostic::IllegalOpcode { pc, op } =>
                write!(f, "unknown opcode ${:03X} at ${:04X}", op, pc),
            Diagnostic::StackOverflow { pc } =>
                write!(f, "stack overflow at ${:04X}", pc),
            Diagnostic::StackUnderflow { pc } =>
                write!(f, "stack underflow at ${:04X}", pc),
            Diagnostic::StackWindowAccess { pc, addr } =>
                write!(f, "data access to stack window ${:03X} at ${:04X}", addr, pc),
        }
    }
}

/// Running totals per diagnostic kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticCounts {
    pub illegal_opcodes: u64,
    pub stack_overflows: u64,
    pub stack_underflows: u64,
    pub stack_window_accesses: u64,
}

impl DiagnosticCounts {
    pub fn total(&self) -> u64 {
        self.illegal_opcodes + self.stack_overflows + self.stack_underflows + self.stack_window_accesses
    }
}

/// Called with the PC of each instruction before it is fetched.
pub type TraceHook = Box<dyn FnMut(u16)>;
/// Called with every diagnostic event.
pub type DiagnosticHook = Box<dyn FnMut(&Diagnostic)>;

/// Installed hooks plus the event counters.
#[derive(Default)]
pub struct Hooks {
    pub trace: Option<TraceHook>,
    pub diagnostic: Option<DiagnosticHook>,
    pub counts: DiagnosticCounts,
}

impl Hooks {
    #[inline(always)]
    pub fn instruction(&mut self, pc: u16) {
        if let Some(hook) = self.trace.as_mut() {
            hook(pc);
        }
    }

    pub fn report(&mut self, diag: Diagnostic) {
        match diag {
            Diagnostic::IllegalOpcode { .. } => self.counts.illegal_opcodes += 1,
            Diagnostic::StackOverflow { .. } => self.counts.stack_overflows += 1,
            Diagnostic::StackUnderflow { .. } => self.counts.stack_underflows += 1,
            Diagnostic::StackWindowAccess { .. } => self.counts.stack_window_accesses += 1,
        }
        log::warn!("{}", diag);
        if let Some(hook) = self.diagnostic.as_mut() {
            hook(&diag);
        }
    }
}
