//! Fixed RAM images loaded at InitRam, one per region.
//!
//! The lower half is the console-side key state, the upper half the
//! cartridge-side state that compare mode permutes. Offsets 0x01 and 0x11 are
//! overwritten with nibbles supplied by the console.

use super::Region;

/// Nibbles in the working RAM window.
pub const RAM_NIBBLES: usize = 32;

pub const NTSC_RAM: [u8; RAM_NIBBLES] = [
    0xE, 0x0, 0x9, 0xA, 0x1, 0x8, 0x5, 0xA, 0x1, 0x3, 0xE, 0x1, 0x0, 0xD, 0xE, 0xC, //
    0x0, 0xB, 0x1, 0x4, 0xF, 0x8, 0xB, 0x5, 0x7, 0xC, 0xD, 0x6, 0x1, 0xE, 0x9, 0x8,
];

pub const PAL_RAM: [u8; RAM_NIBBLES] = [
    0xE, 0x0, 0x4, 0xF, 0x5, 0x1, 0x2, 0x1, 0x7, 0x1, 0x9, 0x8, 0x5, 0x7, 0x5, 0xA, //
    0x0, 0xB, 0x1, 0x2, 0x3, 0xF, 0x8, 0x2, 0x7, 0x1, 0x9, 0x8, 0x1, 0x1, 0x5, 0xC,
];

/// RAM image for `region`.
pub const fn ram_table(region: Region) -> &'static [u8; RAM_NIBBLES] {
    match region {
        Region::Ntsc => &NTSC_RAM,
        Region::Pal => &PAL_RAM,
    }
}

/// Nibble values of the seed window before encoding: a fixed `B 5` header
/// followed by the seed byte twice.
pub const SEED_HEADER: [u8; 2] = [0xB, 0x5];

/// Byte written at the start of X105 mode.
pub const X105_MAGIC: u8 = 0xAA;

/// Nibbles exchanged in X105 mode.
pub const X105_NIBBLES: usize = 30;
