//! Per-boot CIC parameters.
//!
//! The host-command layer decides which chip to impersonate and stores a
//! [`CicConfig`] in a [`ConfigCell`]; the CIC task reads it once per session
//! at LoadConfig.

use core::cell::Cell;

use crate::sync::{self, Mutex};

/// Checksum of the 6102/7101 boot code.
pub const CHECKSUM_6102: [u8; 6] = [0xA5, 0x36, 0xC0, 0xF1, 0xD8, 0x59];

/// Session parameters supplied by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CicConfig {
    /// Do not answer the console at all.
    pub disabled: bool,
    /// Impersonate a 64DD CIC: different ID bit and the detection probe.
    pub dd_mode: bool,
    pub seed: u8,
    /// IPL3 checksum, most significant byte first.
    pub checksum: [u8; 6],
}

impl CicConfig {
    /// Decode the two argument words of the host's CIC command.
    ///
    /// ```text
    /// word 0: [31:25] unused  [24] disable  [23:16] seed  [15:0] checksum[47:32]
    /// word 1: checksum[31:0]
    /// ```
    pub const fn from_command_args(args: [u32; 2], dd_mode: bool) -> CicConfig {
        let [hi, lo] = args;
        CicConfig {
            disabled: hi & (1 << 24) != 0,
            dd_mode,
            seed: (hi >> 16) as u8,
            checksum: [
                (hi >> 8) as u8,
                hi as u8,
                (lo >> 24) as u8,
                (lo >> 16) as u8,
                (lo >> 8) as u8,
                lo as u8,
            ],
        }
    }

    /// Parameters of a known chip, with the checksum of the boot code it
    /// guards.
    pub const fn for_variant(variant: CicVariant, checksum: [u8; 6]) -> CicConfig {
        CicConfig {
            disabled: false,
            dd_mode: variant.is_64dd(),
            seed: variant.seed(),
            checksum,
        }
    }
}

impl Default for CicConfig {
    fn default() -> Self {
        CicConfig::for_variant(CicVariant::Cic6102, CHECKSUM_6102)
    }
}

/// CIC chips found in retail cartridges and the 64DD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CicVariant {
    Cic6101,
    /// Also 7101.
    Cic6102,
    /// Also 7103.
    Cic6103,
    /// Also 7105.
    Cic6105,
    /// Also 7106.
    Cic6106,
    /// 64DD, Japanese retail.
    Cic8303,
    /// 64DD, US development units.
    Dd64Us,
}

impl CicVariant {
    pub const ALL: [CicVariant; 7] = [
        CicVariant::Cic6101,
        CicVariant::Cic6102,
        CicVariant::Cic6103,
        CicVariant::Cic6105,
        CicVariant::Cic6106,
        CicVariant::Cic8303,
        CicVariant::Dd64Us,
    ];

    pub const fn seed(self) -> u8 {
        match self {
            CicVariant::Cic6101 | CicVariant::Cic6102 => 0x3F,
            CicVariant::Cic6103 => 0x78,
            CicVariant::Cic6105 => 0x91,
            CicVariant::Cic6106 => 0x85,
            CicVariant::Cic8303 => 0xDD,
            CicVariant::Dd64Us => 0xDE,
        }
    }

    pub const fn is_64dd(self) -> bool {
        matches!(self, CicVariant::Cic8303 | CicVariant::Dd64Us)
    }
}

/// Configuration shared between the host-command layer and the CIC task.
pub struct ConfigCell {
    inner: Mutex<Cell<CicConfig>>,
}

impl ConfigCell {
    pub const fn new(config: CicConfig) -> Self {
        Self {
            inner: Mutex::new(Cell::new(config)),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> CicConfig {
        sync::critical_section(|cs| self.inner.borrow(cs).get())
    }

    /// Replace the configuration. Takes effect at the next session.
    pub fn set(&self, config: CicConfig) {
        sync::critical_section(|cs| self.inner.borrow(cs).set(config));
    }
}

impl Default for ConfigCell {
    fn default() -> Self {
        Self::new(CicConfig::default())
    }
}
