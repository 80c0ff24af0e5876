//! # Busy-Poll CIC Driver
//!
//! Runs the protocol without the kernel or any interrupt: the CPU spins on
//! the CLOCK line and moves DATA itself. Used on boards where the CIC owns
//! the whole microcontroller.
//!
//! ```text
//! CLOCK ‾‾‾‾\_______/‾‾‾‾‾‾‾\_______/‾‾‾‾
//!           │       │
//!           │       └─ rising: release DATA (64DD probe on the first one)
//!           └─ falling: drive the bit / sample the console
//! ```

use embedded_hal::digital::{InputPin, OutputPin};

use super::params::ConfigCell;
use super::protocol::{Link, Session};
use crate::error::CicError;
use crate::hal::{ErrorCategory, Monotonic, RegionStore, StatusLed};

#[derive(Debug, Clone, Copy)]
struct Deadline {
    start: u32,
    duration: u32,
}

/// [`Link`] that polls the bus pins directly.
pub struct PollingLink<R, C, D, M> {
    reset: R,
    clock: C,
    data: D,
    time: M,
    deadline: Option<Deadline>,
    detect: bool,
}

impl<R, C, D, M> PollingLink<R, C, D, M>
where
    R: InputPin,
    C: InputPin,
    D: InputPin + OutputPin,
    M: Monotonic,
{
    pub fn new(reset: R, clock: C, data: D, time: M) -> Self {
        Self {
            reset,
            clock,
            data,
            time,
            deadline: None,
            detect: false,
        }
    }

    fn expired(&mut self) -> bool {
        match self.deadline {
            Some(deadline) => self.time.now().wrapping_sub(deadline.start) >= deadline.duration,
            None => false,
        }
    }

    /// Spin until CLOCK reads `high`.
    fn wait_clock(&mut self, high: bool) -> Result<(), CicError> {
        loop {
            if !self.reset.is_high().unwrap_or(false) {
                return Err(CicError::Interrupted);
            }
            if self.expired() {
                return Err(CicError::ProtocolTimeout);
            }
            if self.clock.is_high().unwrap_or(!high) == high {
                return Ok(());
            }
        }
    }

    /// Release DATA and end the bit cell on the rising edge.
    fn finish_cell(&mut self) -> Result<(), CicError> {
        self.wait_clock(true)?;
        let _ = self.data.set_high();
        if core::mem::take(&mut self.detect) && self.data.is_low().unwrap_or(false) {
            return Err(CicError::DetectionFailure);
        }
        Ok(())
    }

    /// Release DATA. Called after a session ends.
    pub fn release(&mut self) {
        let _ = self.data.set_high();
    }

    /// Spin until the console pulls RESET low.
    pub fn wait_reset_low(&mut self) {
        while self.reset.is_high().unwrap_or(false) {}
    }
}

impl<R, C, D, M> Link for PollingLink<R, C, D, M>
where
    R: InputPin,
    C: InputPin,
    D: InputPin + OutputPin,
    M: Monotonic,
{
    fn wait_power_on(&mut self) {
        while !self.reset.is_high().unwrap_or(false) {}
    }

    fn read(&mut self) -> Result<bool, CicError> {
        self.wait_clock(false)?;
        let bit = self.data.is_high().unwrap_or(true);
        self.finish_cell()?;
        Ok(bit)
    }

    fn write(&mut self, bit: bool) -> Result<(), CicError> {
        self.wait_clock(false)?;
        if !bit {
            let _ = self.data.set_low();
        }
        self.finish_cell()
    }

    fn start_detect(&mut self) {
        self.detect = true;
    }

    fn arm_deadline(&mut self, duration: u32) {
        let start = self.time.now();
        self.deadline = Some(Deadline { start, duration });
    }

    fn disarm_deadline(&mut self) {
        self.deadline = None;
    }

    fn wait_deadline(&mut self) -> Result<(), CicError> {
        while self.deadline.is_some() && !self.expired() {}
        Ok(())
    }

    fn reset_held(&mut self) -> bool {
        self.reset.is_high().unwrap_or(false)
    }

    fn pull_data_low(&mut self) {
        let _ = self.data.set_low();
    }
}

/// Standalone CIC: a [`PollingLink`], the board services, and the session.
pub struct PollingCic<R, C, D, M, B> {
    link: PollingLink<R, C, D, M>,
    board: B,
    session: Session,
}

impl<R, C, D, M, B> PollingCic<R, C, D, M, B>
where
    R: InputPin,
    C: InputPin,
    D: InputPin + OutputPin,
    M: Monotonic,
    B: RegionStore + StatusLed,
{
    pub fn new(link: PollingLink<R, C, D, M>, board: B) -> Self {
        Self {
            link,
            board,
            session: Session::new(),
        }
    }

    /// Run one session to its end and release the bus.
    pub fn run_once(&mut self, config: &ConfigCell) -> CicError {
        let error = match self.session.run(&mut self.link, &mut self.board, config) {
            Ok(never) => match never {},
            Err(error) => error,
        };
        self.link.disarm_deadline();
        self.link.release();
        crate::debug!("cic: session ended in {:?}: {:?}", self.session.phase(), error);
        error
    }

    /// Serve sessions forever. After every session the driver stays off the
    /// bus until the console cycles RESET. **Does not return.**
    pub fn run_forever(&mut self, config: &ConfigCell) -> ! {
        loop {
            let error = self.run_once(config);
            if !error.is_recoverable() {
                crate::warn!("cic: {:?}, waiting for reset", error);
            }
            self.wait_for_reset();
        }
    }

    /// Stay off the bus until the console drops RESET, then clear the error
    /// indicator as a RESET falling edge does.
    pub fn wait_for_reset(&mut self) {
        self.link.wait_reset_low();
        self.board.clear_error(ErrorCategory::Cic);
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
