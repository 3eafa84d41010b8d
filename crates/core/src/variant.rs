//! Chip variants of the HMCS400 family.
//!
//! All parts share the same instruction set; they differ only in ROM/RAM
//! capacity and in whether the system clock divider is a mask option.
//!
//! | Family  | ROM (words) | RAM (nibbles) | Divider option |
//! |---------|-------------|---------------|----------------|
//! | HMCS402 | 2048        | 96            | no             |
//! | HMCS404 | 4096        | 192           | no             |
//! | HMCS408 | 8192        | 448           | 4 / 8 / 16     |
//!
//! RAM sizes exclude the 64-nibble stack window at the top of data space.
//! The [`CATALOG`] maps every part number to its descriptor, and a
//! [`Registry`] built from it is handed to whatever host assembles a machine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Error;

/// System clock divider (oscillator clocks per instruction cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Divider {
    Div4,
    Div8,
    Div16,
}

impl Divider {
    pub fn value(self) -> u32 {
        match self {
            Divider::Div4 => 4,
            Divider::Div8 => 8,
            Divider::Div16 => 16,
        }
    }

    /// Parse a numeric divider (4, 8 or 16).
    pub fn from_value(v: u32) -> Result<Self, Error> {
        match v {
            4 => Ok(Divider::Div4),
            8 => Ok(Divider::Div8),
            16 => Ok(Divider::Div16),
            _ => Err(Error::InvalidDivider(v)),
        }
    }
}

/// Immutable per-instance configuration: memory capacity and clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// ROM size in 10-bit words
    pub rom_words: u16,
    /// General RAM size in nibbles, not counting the stack window
    pub ram_nibbles: u16,
    /// Whether the divider is selectable by mask option
    pub has_divider_option: bool,
    /// Active system clock divider
    pub divider: Divider,
}

impl Variant {
    pub const HMCS402: Variant = Variant {
        rom_words: 0x800,
        ram_nibbles: 96,
        has_divider_option: false,
        divider: Divider::Div8,
    };
    pub const HMCS404: Variant = Variant {
        rom_words: 0x1000,
        ram_nibbles: 192,
        has_divider_option: false,
        divider: Divider::Div8,
    };
    pub const HMCS408: Variant = Variant {
        rom_words: 0x2000,
        ram_nibbles: 448,
        has_divider_option: true,
        divider: Divider::Div8,
    };

    /// Return a copy of this descriptor with another divider selected.
    ///
    /// Only parts with the divider mask option accept this.
    pub fn with_divider(self, divider: Divider) -> Result<Self, Error> {
        if !self.has_divider_option {
            return Err(Error::DividerNotSupported);
        }
        Ok(Variant { divider, ..self })
    }

    /// Instruction cycles elapsed for `clocks` oscillator clocks (rounded up).
    pub fn clocks_to_cycles(&self, clocks: u64) -> u64 {
        let div = self.divider.value() as u64;
        clocks.div_ceil(div)
    }

    pub fn cycles_to_clocks(&self, cycles: u64) -> u64 {
        cycles.saturating_mul(self.divider.value() as u64)
    }
}

/// Manufacturing grade of a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    /// Standard
    C,
    /// Low-power
    CL,
    /// High-speed
    AC,
}

/// One orderable part number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Model {
    /// Part number in lower case, e.g. `"hd614080"`
    pub name: &'static str,
    /// Family name, e.g. `"HMCS408"`
    pub family: &'static str,
    pub grade: Grade,
    /// Mask revision (2 added the LAW/LWA opcodes on real silicon)
    pub revision: u8,
    pub variant: Variant,
}

const fn model(name: &'static str, family: &'static str, grade: Grade, revision: u8, variant: Variant) -> Model {
    Model { name, family, grade, revision, variant }
}

/// Every known part number, grouped by family.
pub static CATALOG: &[Model] = &[
    model("hd614022", "HMCS402", Grade::C, 2, Variant::HMCS402),
    model("hd614023", "HMCS402", Grade::C, 1, Variant::HMCS402),
    model("hd614025", "HMCS402", Grade::CL, 2, Variant::HMCS402),
    model("hd614026", "HMCS402", Grade::CL, 1, Variant::HMCS402),
    model("hd614028", "HMCS402", Grade::AC, 2, Variant::HMCS402),
    model("hd614029", "HMCS402", Grade::AC, 1, Variant::HMCS402),
    model("hd614042", "HMCS404", Grade::C, 2, Variant::HMCS404),
    model("hd614043", "HMCS404", Grade::C, 1, Variant::HMCS404),
    model("hd614045", "HMCS404", Grade::CL, 2, Variant::HMCS404),
    model("hd614046", "HMCS404", Grade::CL, 1, Variant::HMCS404),
    model("hd614048", "HMCS404", Grade::AC, 2, Variant::HMCS404),
    model("hd614049", "HMCS404", Grade::AC, 1, Variant::HMCS404),
    model("hd614080", "HMCS408", Grade::C, 2, Variant::HMCS408),
    model("hd614081", "HMCS408", Grade::C, 1, Variant::HMCS408),
    model("hd614085", "HMCS408", Grade::CL, 2, Variant::HMCS408),
    model("hd614086", "HMCS408", Grade::CL, 1, Variant::HMCS408),
    model("hd614088", "HMCS408", Grade::AC, 2, Variant::HMCS408),
    model("hd614089", "HMCS408", Grade::AC, 1, Variant::HMCS408),
];

/// Lookup of part numbers to catalog entries.
///
/// Built once by the host at start-up and passed to whatever code assembles
/// a machine; there is no global registration.
pub struct Registry {
    models: HashMap<&'static str, &'static Model>,
}

impl Registry {
    pub fn new() -> Self {
        Self::from_models(CATALOG)
    }

    pub fn from_models(models: &'static [Model]) -> Self {
        Registry {
            models: models.iter().map(|m| (m.name, m)).collect(),
        }
    }

    /// Find a model by part number (case-insensitive).
    pub fn get(&self, name: &str) -> Result<&'static Model, Error> {
        self.models
            .get(name.to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// Part numbers, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.models.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize { self.models.len() }

    pub fn is_empty(&self) -> bool { self.models.is_empty() }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
