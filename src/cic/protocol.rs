//! # CIC Protocol State Machine
//!
//! One session of the exchange with the console, from power-on to the
//! endless command loop:
//!
//! ```text
//! WaitPowerOn → LoadConfig → SendId → SendSeed → SendChecksum → InitRam
//!                                                                  │
//!                      ┌───────────────────────────────────────────┘
//!                      ▼
//!                 CommandLoop ──► Compare (0) | X105 (2) | SoftReset (3)
//! ```
//!
//! There is no terminal state. A session only ends with an error; the driver
//! then stops answering until the console raises RESET again, which starts a
//! new session from WaitPowerOn.
//!
//! The session talks to the bus exclusively through [`Link`], one bit at a
//! time. Nibbles go MSB first.

use core::convert::Infallible;

use super::algorithm::{encode_checksum, encode_seed, round, x105_algorithm, HALF};
use super::consts::{ram_table, X105_MAGIC, X105_NIBBLES};
use super::params::{CicConfig, ConfigCell};
use super::Region;
use crate::config::{SEED_DEADLINE, SOFT_RESET_WINDOW};
use crate::error::CicError;
use crate::hal::{ErrorCategory, RegionStore, StatusLed};

/// Bit-level access to the console bus.
///
/// Every blocking call returns only once the bit has crossed the bus (one
/// CLOCK falling edge), or with an error that ends the session.
pub trait Link {
    /// Block until the console is powered and out of reset.
    fn wait_power_on(&mut self);

    /// Release DATA for one clock and return the level the console drove.
    fn read(&mut self) -> Result<bool, CicError>;

    /// Drive `bit` for one clock. `true` leaves the line released.
    fn write(&mut self, bit: bool) -> Result<(), CicError>;

    /// Probe for a foreign 64DD CIC on the next rising clock edge. If one
    /// answers, a later `read`/`write` reports `DetectionFailure`.
    fn start_detect(&mut self);

    /// Start the session deadline. While it is armed and elapsed, `read` and
    /// `write` report `ProtocolTimeout`.
    fn arm_deadline(&mut self, duration: u32);

    /// Stop the session deadline.
    fn disarm_deadline(&mut self);

    /// Block until the armed deadline elapses.
    fn wait_deadline(&mut self) -> Result<(), CicError>;

    /// Whether the console is still holding RESET released.
    fn reset_held(&mut self) -> bool;

    /// Pull DATA low until the next bit cell releases it.
    fn pull_data_low(&mut self);

    fn read_nibble(&mut self) -> Result<u8, CicError> {
        let mut nibble = 0;
        for _ in 0..4 {
            nibble = (nibble << 1) | u8::from(self.read()?);
        }
        Ok(nibble)
    }

    fn write_nibble(&mut self, nibble: u8) -> Result<(), CicError> {
        for shift in (0..4).rev() {
            self.write(nibble & (1 << shift) != 0)?;
        }
        Ok(())
    }

    fn write_nibbles(&mut self, nibbles: &[u8]) -> Result<(), CicError> {
        nibbles.iter().try_for_each(|&nibble| self.write_nibble(nibble))
    }
}

/// Session phase, for logging and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    WaitPowerOn,
    LoadConfig,
    SendId,
    SendSeed,
    SendChecksum,
    InitRam,
    CommandLoop,
}

/// Opcodes of the command loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Compare,
    X105,
    SoftReset,
}

impl TryFrom<u8> for Command {
    type Error = CicError;

    fn try_from(opcode: u8) -> Result<Self, Self::Error> {
        match opcode {
            0 => Ok(Command::Compare),
            2 => Ok(Command::X105),
            3 => Ok(Command::SoftReset),
            other => Err(CicError::UnrecognizedCommand(other)),
        }
    }
}

/// State owned by one CIC session.
pub struct Session {
    phase: Phase,
    config: CicConfig,
    region: Region,
    /// Working RAM: lower half (console key), upper half (cartridge key).
    ram: [[u8; HALF]; 2],
    x105: [u8; X105_NIBBLES],
}

impl Session {
    pub const fn new() -> Self {
        Self {
            phase: Phase::WaitPowerOn,
            config: CicConfig {
                disabled: false,
                dd_mode: false,
                seed: 0,
                checksum: [0; 6],
            },
            region: Region::Ntsc,
            ram: [[0; HALF]; 2],
            x105: [0; X105_NIBBLES],
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Region answered with this session.
    pub fn region(&self) -> Region {
        self.region
    }

    fn enter(&mut self, phase: Phase) {
        crate::trace!("cic: {:?}", phase);
        self.phase = phase;
    }

    /// Run one session. Never returns `Ok`: the command loop only ends with
    /// an error.
    pub fn run<L, B>(&mut self, link: &mut L, board: &mut B, config: &ConfigCell) -> Result<Infallible, CicError>
    where
        L: Link + ?Sized,
        B: RegionStore + StatusLed + ?Sized,
    {
        *self = Session::new();
        link.wait_power_on();

        self.load_config(board, config)?;
        self.send_id(link)?;
        self.send_seed(link, board)?;
        self.send_checksum(link)?;
        self.init_ram(link)?;

        self.enter(Phase::CommandLoop);
        loop {
            let opcode = (u8::from(link.read()?) << 1) | u8::from(link.read()?);
            let command = Command::try_from(opcode)?;
            crate::trace!("cic: command {:?}", command);
            match command {
                Command::Compare => self.compare(link)?,
                Command::X105 => self.x105(link)?,
                Command::SoftReset => self.soft_reset(link)?,
            }
        }
    }

    fn load_config<B>(&mut self, board: &mut B, config: &ConfigCell) -> Result<(), CicError>
    where
        B: RegionStore + ?Sized,
    {
        self.enter(Phase::LoadConfig);
        self.config = config.get();
        if self.config.disabled {
            return Err(CicError::ConfigDisabled);
        }
        self.region = board.region();
        crate::info!(
            "cic: session start, region {:?} seed {:#x} 64dd {}",
            self.region,
            self.config.seed,
            self.config.dd_mode
        );
        Ok(())
    }

    fn send_id<L: Link + ?Sized>(&mut self, link: &mut L) -> Result<(), CicError> {
        self.enter(Phase::SendId);
        if self.config.dd_mode {
            link.start_detect();
        }
        link.write(self.config.dd_mode)?;
        link.write(self.region == Region::Pal)?;
        link.write(false)?;
        link.write(true)
    }

    fn send_seed<L, B>(&mut self, link: &mut L, board: &mut B) -> Result<(), CicError>
    where
        L: Link + ?Sized,
        B: RegionStore + StatusLed + ?Sized,
    {
        self.enter(Phase::SendSeed);
        let stream = encode_seed(self.config.seed);

        link.arm_deadline(SEED_DEADLINE);
        let sent = link.write_nibbles(&stream);
        link.disarm_deadline();

        if sent == Err(CicError::ProtocolTimeout) {
            // Most likely the console runs in the other region; guess that next boot.
            let region = self.region.flipped();
            crate::warn!("cic: seed deadline missed, retrying as {:?}", region);
            board.set_region(region);
            board.blink_error(ErrorCategory::Cic);
        }
        sent
    }

    fn send_checksum<L: Link + ?Sized>(&mut self, link: &mut L) -> Result<(), CicError> {
        self.enter(Phase::SendChecksum);
        link.read()?;
        link.write_nibbles(&encode_checksum(&self.config.checksum))
    }

    fn init_ram<L: Link + ?Sized>(&mut self, link: &mut L) -> Result<(), CicError> {
        self.enter(Phase::InitRam);
        let table = ram_table(self.region);
        for (half, image) in self.ram.iter_mut().zip(table.chunks_exact(HALF)) {
            half.copy_from_slice(image);
        }
        self.ram[0][1] = link.read_nibble()?;
        self.ram[1][1] = link.read_nibble()?;
        Ok(())
    }

    fn compare<L: Link + ?Sized>(&mut self, link: &mut L) -> Result<(), CicError> {
        let upper = &mut self.ram[1];
        for _ in 0..3 {
            round(upper);
        }

        let mut index = match upper[7] & 0xF {
            0 => 1,
            start => usize::from(start),
        };
        loop {
            link.read()?;
            link.write(self.ram[1][index] & 0x1 != 0)?;
            index = match self.region {
                Region::Ntsc => (index + 1) & 0xF,
                Region::Pal => index - 1,
            };
            if index == 0 {
                return Ok(());
            }
        }
    }

    fn x105<L: Link + ?Sized>(&mut self, link: &mut L) -> Result<(), CicError> {
        link.write_nibble(X105_MAGIC >> 4)?;
        link.write_nibble(X105_MAGIC & 0xF)?;
        for nibble in self.x105.iter_mut() {
            *nibble = link.read_nibble()?;
        }
        x105_algorithm(&mut self.x105);
        link.write(false)?;
        link.write_nibbles(&self.x105)
    }

    fn soft_reset<L: Link + ?Sized>(&mut self, link: &mut L) -> Result<(), CicError> {
        link.read()?;
        link.arm_deadline(SOFT_RESET_WINDOW);
        let waited = link.wait_deadline();
        link.disarm_deadline();
        waited?;

        if link.reset_held() {
            crate::debug!("cic: acknowledging soft reset");
            link.pull_data_low();
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cic::params::CHECKSUM_6102;
    use crate::cic::CicVariant;
    use std::collections::VecDeque;

    /// Link that replays console bits from a script and records everything
    /// the session drives. Running out of script ends the session.
    #[derive(Default)]
    struct ScriptLink {
        incoming: VecDeque<bool>,
        written: Vec<bool>,
        /// Writes allowed after arming before the deadline fires.
        deadline_after: Option<usize>,
        armed: Option<usize>,
        detect_requests: usize,
        reset_held: bool,
        pulled_low: bool,
    }

    impl ScriptLink {
        fn with_console(bits: &[bool]) -> Self {
            Self {
                incoming: bits.iter().copied().collect(),
                reset_held: true,
                ..Self::default()
            }
        }

        fn expired(&self) -> bool {
            match (self.armed, self.deadline_after) {
                (Some(writes), Some(limit)) => writes >= limit,
                _ => false,
            }
        }
    }

    impl Link for ScriptLink {
        fn wait_power_on(&mut self) {}

        fn read(&mut self) -> Result<bool, CicError> {
            self.incoming.pop_front().ok_or(CicError::Interrupted)
        }

        fn write(&mut self, bit: bool) -> Result<(), CicError> {
            if self.expired() {
                return Err(CicError::ProtocolTimeout);
            }
            if let Some(writes) = self.armed.as_mut() {
                *writes += 1;
            }
            self.pulled_low = false;
            self.written.push(bit);
            Ok(())
        }

        fn start_detect(&mut self) {
            self.detect_requests += 1;
        }

        fn arm_deadline(&mut self, _duration: u32) {
            self.armed = Some(0);
        }

        fn disarm_deadline(&mut self) {
            self.armed = None;
        }

        fn wait_deadline(&mut self) -> Result<(), CicError> {
            Ok(())
        }

        fn reset_held(&mut self) -> bool {
            self.reset_held
        }

        fn pull_data_low(&mut self) {
            self.pulled_low = true;
        }
    }

    #[derive(Default)]
    struct Board {
        region: Region,
        blinking: Option<ErrorCategory>,
    }

    impl RegionStore for Board {
        fn region(&self) -> Region {
            self.region
        }

        fn set_region(&mut self, region: Region) {
            self.region = region;
        }
    }

    impl StatusLed for Board {
        fn blink_error(&mut self, category: ErrorCategory) {
            self.blinking = Some(category);
        }

        fn clear_error(&mut self, _category: ErrorCategory) {
            self.blinking = None;
        }
    }

    fn bits(nibbles: &[u8]) -> Vec<bool> {
        nibbles
            .iter()
            .flat_map(|&n| (0..4).rev().map(move |shift| n & (1 << shift) != 0))
            .collect()
    }

    fn flags(values: &[u8]) -> Vec<bool> {
        values.iter().map(|&v| v != 0).collect()
    }

    /// Console side of the boot up to the command loop: the checksum
    /// handshake bit and the two InitRam nibbles.
    fn boot_script() -> Vec<bool> {
        let mut script = vec![false];
        script.extend(bits(&[0x3, 0x5]));
        script
    }

    const ID_BITS: usize = 4;
    const SEED_BITS: usize = 24;
    const CHECKSUM_BITS: usize = 64;
    const BOOT_BITS: usize = ID_BITS + SEED_BITS + CHECKSUM_BITS;

    fn run(link: &mut ScriptLink, board: &mut Board, config: CicConfig) -> CicError {
        let cell = ConfigCell::new(config);
        let mut session = Session::new();
        session.run(link, board, &cell).unwrap_err()
    }

    #[test]
    fn test_6102_boot_trace() {
        let mut link = ScriptLink::with_console(&boot_script());
        let mut board = Board::default();

        assert_eq!(run(&mut link, &mut board, CicConfig::default()), CicError::Interrupted);

        let mut expected = flags(&[0, 0, 0, 1]);
        expected.extend(bits(&[0xB, 0xD, 0x3, 0x9, 0x3, 0xD]));
        expected.extend(bits(&[
            0x0, 0x4, 0xE, 0x2, 0xF, 0xA, 0xC, 0x5, 0x2, 0x1, 0x0, 0xF, 0xC, 0xE, 0x2, 0xF,
        ]));
        assert_eq!(link.written, expected);
        assert_eq!(link.detect_requests, 0);
    }

    #[test]
    fn test_pal_id_bit() {
        let mut link = ScriptLink::with_console(&[]);
        let mut board = Board {
            region: Region::Pal,
            ..Board::default()
        };

        run(&mut link, &mut board, CicConfig::default());
        assert_eq!(link.written[..ID_BITS], flags(&[0, 1, 0, 1]));
    }

    #[test]
    fn test_64dd_probe_before_id() {
        let mut link = ScriptLink::with_console(&[]);
        let mut board = Board::default();
        let config = CicConfig::for_variant(CicVariant::Cic8303, CHECKSUM_6102);

        run(&mut link, &mut board, config);
        assert_eq!(link.detect_requests, 1);
        assert_eq!(link.written[..ID_BITS], flags(&[1, 0, 0, 1]));
        assert_eq!(link.written[ID_BITS..ID_BITS + SEED_BITS], bits(&[0xB, 0xD, 0xD, 0xB, 0x7, 0x1]));
    }

    #[test]
    fn test_disabled_config_stays_silent() {
        let mut link = ScriptLink::with_console(&boot_script());
        let mut board = Board::default();
        let config = CicConfig {
            disabled: true,
            ..CicConfig::default()
        };

        assert_eq!(run(&mut link, &mut board, config), CicError::ConfigDisabled);
        assert!(link.written.is_empty());
    }

    #[test]
    fn test_seed_timeout_flips_region() {
        let mut link = ScriptLink {
            deadline_after: Some(10),
            ..ScriptLink::with_console(&boot_script())
        };
        let mut board = Board::default();

        assert_eq!(run(&mut link, &mut board, CicConfig::default()), CicError::ProtocolTimeout);
        assert_eq!(board.region, Region::Pal);
        assert_eq!(board.blinking, Some(ErrorCategory::Cic));
        assert_eq!(link.written.len(), ID_BITS + 10);
        assert_eq!(link.armed, None);
    }

    #[test]
    fn test_seed_deadline_not_reached() {
        let mut link = ScriptLink {
            deadline_after: Some(SEED_BITS),
            ..ScriptLink::with_console(&boot_script())
        };
        let mut board = Board::default();

        assert_eq!(run(&mut link, &mut board, CicConfig::default()), CicError::Interrupted);
        assert_eq!(board.region, Region::Ntsc);
        assert_eq!(board.blinking, None);
        assert_eq!(link.written.len(), BOOT_BITS);
    }

    /// Response bits of one compare after a boot in which the console
    /// supplies nibbles 3 and 5 at InitRam (offsets 0x01 and 0x11).
    fn compare_response(region: Region) -> Vec<bool> {
        let mut script = boot_script();
        script.extend([false, false]);
        // Console bits during compare are discarded by the emulator
        script.extend([true; 16]);
        let mut link = ScriptLink::with_console(&script);
        let mut board = Board {
            region,
            ..Board::default()
        };

        run(&mut link, &mut board, CicConfig::default());
        link.written.split_off(BOOT_BITS)
    }

    #[test]
    fn test_compare_walks_forward_on_ntsc() {
        assert_eq!(compare_response(Region::Ntsc), flags(&[1, 0, 1, 1, 1, 1, 0, 1, 0, 1, 1]));
    }

    #[test]
    fn test_compare_walks_backward_on_pal() {
        assert_eq!(
            compare_response(Region::Pal),
            flags(&[1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1])
        );
    }

    #[test]
    fn test_x105_exchange() {
        let challenge: Vec<u8> = (0..X105_NIBBLES).map(|i| ((i * 7 + 3) & 0xF) as u8).collect();
        let mut script = boot_script();
        script.extend([true, false]);
        script.extend(bits(&challenge));
        let mut link = ScriptLink::with_console(&script);
        let mut board = Board::default();

        run(&mut link, &mut board, CicConfig::default());

        let mut expected = bits(&[0xA, 0xA]);
        expected.push(false);
        expected.extend(bits(&[
            0xA, 0xA, 0xD, 0xB, 0xA, 0x6, 0xF, 0xD, 0xA, 0x2, 0x7, 0x1, 0xA, 0xE, 0xF, 0x5, 0x4, 0x0,
            0x9, 0x1, 0xC, 0x4, 0xF, 0xD, 0xA, 0x2, 0x7, 0x1, 0xA, 0xE,
        ]));
        assert_eq!(link.written[BOOT_BITS..], expected);
    }

    #[test]
    fn test_soft_reset_acknowledged_while_reset_held() {
        let mut script = boot_script();
        script.extend([true, true, false]);
        let mut link = ScriptLink::with_console(&script);
        let mut board = Board::default();

        assert_eq!(run(&mut link, &mut board, CicConfig::default()), CicError::Interrupted);
        assert!(link.pulled_low);
        assert_eq!(link.armed, None);
    }

    #[test]
    fn test_soft_reset_ignored_after_reset_dropped() {
        let mut script = boot_script();
        script.extend([true, true, false]);
        let mut link = ScriptLink {
            reset_held: false,
            ..ScriptLink::with_console(&script)
        };
        let mut board = Board::default();

        run(&mut link, &mut board, CicConfig::default());
        assert!(!link.pulled_low);
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let mut script = boot_script();
        script.extend([false, true]);
        let mut link = ScriptLink::with_console(&script);
        let mut board = Board::default();

        assert_eq!(
            run(&mut link, &mut board, CicConfig::default()),
            CicError::UnrecognizedCommand(1)
        );
        assert_eq!(link.written.len(), BOOT_BITS);
    }

    #[test]
    fn test_session_restarts_from_scratch() {
        let mut script = boot_script();
        script.extend([false, false]);
        script.extend([true; 16]);
        let mut board = Board::default();
        let cell = ConfigCell::default();
        let mut session = Session::new();

        let mut first = ScriptLink::with_console(&script);
        let _ = session.run(&mut first, &mut board, &cell);
        assert_eq!(session.phase(), Phase::CommandLoop);

        let mut second = ScriptLink::with_console(&script);
        let _ = session.run(&mut second, &mut board, &cell);
        assert_eq!(first.written, second.written);
    }

    #[test]
    fn test_opcode_decode() {
        assert_eq!(Command::try_from(0), Ok(Command::Compare));
        assert_eq!(Command::try_from(2), Ok(Command::X105));
        assert_eq!(Command::try_from(3), Ok(Command::SoftReset));
        assert_eq!(Command::try_from(1), Err(CicError::UnrecognizedCommand(1)));
    }
}
