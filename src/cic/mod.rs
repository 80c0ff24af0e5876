//! # CIC Emulator
//!
//! Impersonates the cartridge authentication chip the console negotiates
//! with at boot and polls while it runs.
//!
//! ```text
//! ┌────────────────────────────┬────────────────────────────┐
//! │  task.rs (scheduled)       │  poll.rs (busy-poll)       │
//! │  bridge mailbox + yield    │  embedded-hal pins + clock │
//! ├────────────────────────────┴────────────────────────────┤
//! │            protocol.rs: Link · Session · Phase          │
//! ├─────────────────────────────────────────────────────────┤
//! │   algorithm.rs: encode_round · round · x105_algorithm   │
//! ├─────────────────────────────────────────────────────────┤
//! │   consts.rs: region RAM tables  ·  params.rs: CicConfig │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Both drivers run the same `protocol::Session`; they only differ in how a
//! bit gets on and off the DATA line.

pub mod algorithm;
pub mod consts;
pub mod params;
pub mod poll;
pub mod protocol;
pub mod task;

pub use params::{CicConfig, CicVariant, ConfigCell};
pub use protocol::{Link, Phase, Session};

/// Console video region. Selects the ID bit and the RAM seed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Region {
    #[default]
    Ntsc,
    Pal,
}

impl Region {
    /// The other region. Used to retry with the opposite guess after a
    /// seed timeout.
    #[inline]
    pub const fn flipped(self) -> Region {
        match self {
            Region::Ntsc => Region::Pal,
            Region::Pal => Region::Ntsc,
        }
    }
}
