//! # External Collaborators
//!
//! Narrow interfaces to the rest of the cartridge firmware. The CIC core only
//! ever talks to the outside world through these traits and the
//! `embedded-hal` digital pin traits (RESET, CLOCK, DATA).
//!
//! Implementations live in the board layer (register glue on the target) or
//! in `sim` on the host.

use crate::cic::Region;

/// Hardware one-shot timers known to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Protocol deadlines of the CIC task.
    Cic,
}

/// One-shot hardware timer service.
///
/// At most one arm is outstanding per id; arming again restarts it. When a
/// timer elapses the board calls the handler it routes to that id (for
/// `TimerId::Cic`: [`crate::bridge::Bridge::on_deadline`]) in interrupt
/// context.
pub trait TimerService {
    /// Start (or restart) the timer `id` to elapse after `duration` units.
    fn arm(&mut self, id: TimerId, duration: u32);

    /// Cancel timer `id`. Its handler will not run for the cancelled arm.
    fn disarm(&mut self, id: TimerId);
}

/// Free-running time base for the busy-poll driver, in timer units. Wraps.
pub trait Monotonic {
    /// Current time.
    fn now(&mut self) -> u32;
}

/// Persisted console region (battery-backed on the real board).
pub trait RegionStore {
    /// Region to answer with.
    fn region(&self) -> Region;

    /// Overwrite the persisted region.
    fn set_region(&mut self, region: Region);
}

/// Error categories understood by the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCategory {
    /// CIC negotiation failed.
    Cic,
}

/// Status indicator used to signal errors to the user.
pub trait StatusLed {
    /// Start the blink pattern for `category`.
    fn blink_error(&mut self, category: ErrorCategory);

    /// Stop signalling `category`.
    fn clear_error(&mut self, category: ErrorCategory);
}

impl<T: TimerService + ?Sized> TimerService for &mut T {
    fn arm(&mut self, id: TimerId, duration: u32) {
        (**self).arm(id, duration)
    }

    fn disarm(&mut self, id: TimerId) {
        (**self).disarm(id)
    }
}

impl<T: RegionStore + ?Sized> RegionStore for &mut T {
    fn region(&self) -> Region {
        (**self).region()
    }

    fn set_region(&mut self, region: Region) {
        (**self).set_region(region)
    }
}

impl<T: StatusLed + ?Sized> StatusLed for &mut T {
    fn blink_error(&mut self, category: ErrorCategory) {
        (**self).blink_error(category)
    }

    fn clear_error(&mut self, category: ErrorCategory) {
        (**self).clear_error(category)
    }
}
