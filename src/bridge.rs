//! # Interrupt-to-Task Bridge
//!
//! GPIO edge handlers for the console's RESET and CLOCK lines, and the
//! single-bit mailboxes that carry data between them and the CIC task.
//!
//! ## Edge semantics
//!
//! ```text
//! RESET  ↓  disable, release DATA, clear the CIC error indicator
//! RESET  ↑  enable, set_ready_and_reset(CIC)      (only session start)
//! CLOCK  ↓  drive the prepared bit (or release), sample DATA, set_ready(CIC)
//! CLOCK  ↑  release DATA; first edge after `start_detect` probes for a
//!           genuine 64DD CIC and silently disables the session if found
//! ```
//!
//! ## Mailbox contract
//!
//! Each mailbox holds at most one unconsumed bit and a new post overwrites an
//! old one. A task that misses an edge therefore loses a bit. That is part of
//! the real-time contract, not a defect: the clock is slow enough that the
//! task always runs between two edges.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::{InputPin, OutputPin};

use crate::hal::{ErrorCategory, StatusLed};
use crate::kernel::TaskControl;
use crate::task::TaskId;

/// A single-slot, overwrite-on-post bit mailbox.
pub struct Mailbox {
    bit: AtomicBool,
    full: AtomicBool,
}

impl Mailbox {
    /// An empty mailbox.
    pub const fn new() -> Self {
        Self {
            bit: AtomicBool::new(false),
            full: AtomicBool::new(false),
        }
    }

    /// Store `bit`, replacing any unconsumed value.
    #[inline]
    pub fn post(&self, bit: bool) {
        self.bit.store(bit, Ordering::Relaxed);
        self.full.store(true, Ordering::Release);
    }

    /// Consume the stored bit, if any.
    #[inline]
    pub fn take(&self) -> Option<bool> {
        if self.full.swap(false, Ordering::Acquire) {
            Some(self.bit.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Drop any unconsumed value.
    #[inline]
    pub fn clear(&self) {
        self.full.store(false, Ordering::Release);
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between the CIC edge handlers and the CIC task.
pub struct Bridge {
    task: TaskId,
    enabled: AtomicBool,
    detect: AtomicBool,
    foreign: AtomicBool,
    deadline: AtomicBool,
    /// Next bit to drive, posted by the task. `true` releases the line.
    drive: Mailbox,
    /// Last bit sampled on a falling clock edge, posted by the ISR.
    sampled: Mailbox,
}

impl Bridge {
    /// A disabled bridge that wakes `task`.
    pub const fn new(task: TaskId) -> Self {
        Self {
            task,
            enabled: AtomicBool::new(false),
            detect: AtomicBool::new(false),
            foreign: AtomicBool::new(false),
            deadline: AtomicBool::new(false),
            drive: Mailbox::new(),
            sampled: Mailbox::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Interrupt side
    // -----------------------------------------------------------------------

    /// RESET falling edge: the console went down.
    pub fn on_reset_falling<D, L>(&self, data: &mut D, led: &mut L)
    where
        D: OutputPin,
        L: StatusLed,
    {
        self.enabled.store(false, Ordering::Release);
        self.detect.store(false, Ordering::Relaxed);
        let _ = data.set_high();
        led.clear_error(ErrorCategory::Cic);
    }

    /// RESET rising edge: the console came up. Starts a fresh session.
    pub fn on_reset_rising<K: TaskControl + ?Sized>(&self, kernel: &K) {
        self.detect.store(false, Ordering::Relaxed);
        self.foreign.store(false, Ordering::Relaxed);
        self.deadline.store(false, Ordering::Relaxed);
        self.drive.clear();
        self.sampled.clear();
        self.enabled.store(true, Ordering::Release);
        kernel.set_ready_and_reset(self.task);
    }

    /// CLOCK falling edge: the sample/drive point of every bit.
    pub fn on_clock_falling<D, K>(&self, data: &mut D, kernel: &K)
    where
        D: InputPin + OutputPin,
        K: TaskControl + ?Sized,
    {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let _ = match self.drive.take() {
            Some(false) => data.set_low(),
            _ => data.set_high(),
        };
        self.sampled.post(data.is_high().unwrap_or(true));
        kernel.set_ready(self.task);
    }

    /// CLOCK rising edge: end of the bit cell.
    pub fn on_clock_rising<D, K>(&self, data: &mut D, kernel: &K)
    where
        D: InputPin + OutputPin,
        K: TaskControl + ?Sized,
    {
        let _ = data.set_high();
        if self.detect.swap(false, Ordering::AcqRel) && data.is_low().unwrap_or(false) {
            // Somebody else is holding the line: a real 64DD CIC answered.
            self.enabled.store(false, Ordering::Release);
            self.foreign.store(true, Ordering::Release);
            kernel.set_ready(self.task);
        }
    }

    /// Timer `TimerId::Cic` elapsed.
    pub fn on_deadline<K: TaskControl + ?Sized>(&self, kernel: &K) {
        self.deadline.store(true, Ordering::Release);
        kernel.set_ready(self.task);
    }

    // -----------------------------------------------------------------------
    // Task side
    // -----------------------------------------------------------------------

    /// Whether a session is in progress.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Probe on the next rising clock edge.
    pub fn start_detect(&self) {
        self.detect.store(true, Ordering::Release);
    }

    /// Whether the probe found another CIC on the bus this session.
    pub fn foreign_cic_detected(&self) -> bool {
        self.foreign.load(Ordering::Acquire)
    }

    /// Prepare the bit the next falling edge drives, discarding any stale
    /// sample so the task only wakes up on a new edge.
    pub fn prepare(&self, bit: bool) {
        self.sampled.clear();
        self.drive.post(bit);
    }

    /// Drop a prepared bit nobody is waiting for anymore.
    pub fn withdraw(&self) {
        self.drive.clear();
    }

    /// Bit captured by the most recent falling edge, if not yet consumed.
    pub fn take_sample(&self) -> Option<bool> {
        self.sampled.take()
    }

    /// Clear the deadline flag, before arming or after disarming the timer.
    pub fn clear_deadline(&self) {
        self.deadline.store(false, Ordering::Release);
    }

    /// Whether the armed deadline has elapsed.
    pub fn deadline_expired(&self) -> bool {
        self.deadline.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::convert::Infallible;
    use embedded_hal::digital::ErrorType;

    /// Open-drain line with an optional external device pulling it low.
    #[derive(Default)]
    struct Line {
        driven_low: bool,
        external_low: bool,
    }

    impl ErrorType for Line {
        type Error = Infallible;
    }

    impl OutputPin for Line {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.driven_low = true;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.driven_low = false;
            Ok(())
        }
    }

    impl InputPin for Line {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(!(self.driven_low || self.external_low))
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(self.driven_low || self.external_low)
        }
    }

    #[derive(Default)]
    struct Wakeups {
        ready: Cell<u32>,
        resets: Cell<u32>,
    }

    impl TaskControl for Wakeups {
        fn yield_now(&self) {}

        fn set_ready(&self, _id: TaskId) {
            self.ready.set(self.ready.get() + 1);
        }

        fn set_ready_and_reset(&self, _id: TaskId) {
            self.resets.set(self.resets.get() + 1);
        }
    }

    #[derive(Default)]
    struct Led {
        cleared: u32,
    }

    impl StatusLed for Led {
        fn blink_error(&mut self, _category: ErrorCategory) {}

        fn clear_error(&mut self, _category: ErrorCategory) {
            self.cleared += 1;
        }
    }

    #[test]
    fn test_mailbox_overwrite_on_miss() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.take(), None);

        mailbox.post(false);
        mailbox.post(true);
        assert_eq!(mailbox.take(), Some(true));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn test_clock_ignored_until_reset_rises() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        let mut line = Line::default();

        bridge.prepare(false);
        bridge.on_clock_falling(&mut line, &kernel);
        assert!(!line.driven_low);
        assert_eq!(kernel.ready.get(), 0);

        bridge.on_reset_rising(&kernel);
        assert!(bridge.is_enabled());
        assert_eq!(kernel.resets.get(), 1);
    }

    #[test]
    fn test_falling_edge_drives_then_samples() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        let mut line = Line::default();
        bridge.on_reset_rising(&kernel);

        bridge.prepare(false);
        bridge.on_clock_falling(&mut line, &kernel);
        assert!(line.driven_low);
        assert_eq!(bridge.take_sample(), Some(false));
        assert_eq!(kernel.ready.get(), 1);

        bridge.on_clock_rising(&mut line, &kernel);
        assert!(!line.driven_low);

        // Read mode: the line is released and the console's level is sampled
        bridge.prepare(true);
        line.external_low = true;
        bridge.on_clock_falling(&mut line, &kernel);
        assert!(!line.driven_low);
        assert_eq!(bridge.take_sample(), Some(false));
    }

    #[test]
    fn test_missed_edge_releases_line() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        let mut line = Line::default();
        bridge.on_reset_rising(&kernel);

        bridge.prepare(false);
        bridge.on_clock_falling(&mut line, &kernel);
        bridge.on_clock_rising(&mut line, &kernel);

        // The task did not run in between: nothing prepared, line stays released
        bridge.on_clock_falling(&mut line, &kernel);
        assert!(!line.driven_low);
        assert_eq!(bridge.take_sample(), Some(true));
    }

    #[test]
    fn test_detection_probe_disables_session() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        let mut line = Line::default();
        bridge.on_reset_rising(&kernel);

        bridge.start_detect();
        line.external_low = true;
        bridge.on_clock_rising(&mut line, &kernel);
        assert!(!bridge.is_enabled());
        assert!(bridge.foreign_cic_detected());
        assert_eq!(kernel.ready.get(), 1);

        // Later edges are ignored entirely
        bridge.on_clock_falling(&mut line, &kernel);
        assert_eq!(kernel.ready.get(), 1);

        bridge.on_reset_rising(&kernel);
        assert!(!bridge.foreign_cic_detected());
    }

    #[test]
    fn test_detection_probe_is_one_shot() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        let mut line = Line::default();
        bridge.on_reset_rising(&kernel);

        bridge.start_detect();
        bridge.on_clock_rising(&mut line, &kernel);
        assert!(bridge.is_enabled());

        line.external_low = true;
        bridge.on_clock_rising(&mut line, &kernel);
        assert!(bridge.is_enabled());
        assert!(!bridge.foreign_cic_detected());
    }

    #[test]
    fn test_reset_falling_releases_and_clears_error() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        let mut line = Line::default();
        let mut led = Led::default();
        bridge.on_reset_rising(&kernel);

        bridge.prepare(false);
        bridge.on_clock_falling(&mut line, &kernel);
        bridge.on_reset_falling(&mut line, &mut led);

        assert!(!bridge.is_enabled());
        assert!(!line.driven_low);
        assert_eq!(led.cleared, 1);
    }

    #[test]
    fn test_deadline_wakes_task() {
        let bridge = Bridge::new(TaskId::CIC);
        let kernel = Wakeups::default();
        assert!(!bridge.deadline_expired());

        bridge.on_deadline(&kernel);
        assert!(bridge.deadline_expired());
        assert_eq!(kernel.ready.get(), 1);

        bridge.clear_deadline();
        assert!(!bridge.deadline_expired());
    }
}
