//! # Scheduled CIC Task
//!
//! Runs the protocol as task `TaskId::CIC` on the cooperative kernel. Bits
//! cross the bus in the GPIO edge handlers ([`Bridge`]); the task only
//! prepares the next bit, yields, and picks up the sample when the falling
//! edge wakes it.
//!
//! A console reset rebuilds the task from its entry point, so a session is
//! never torn down by the task itself: after an error it parks in a yield
//! loop until that happens.

use embedded_hal::digital::{InputPin, OutputPin};

use super::params::ConfigCell;
use super::protocol::{Link, Session};
use crate::bridge::Bridge;
use crate::error::CicError;
use crate::hal::{RegionStore, StatusLed, TimerId, TimerService};
use crate::kernel::TaskControl;
use crate::task::TaskId;

/// [`Link`] over the bridge mailboxes.
pub struct TaskLink<'a, K: ?Sized, D, R, T> {
    bridge: &'a Bridge,
    kernel: &'a K,
    data: D,
    reset: R,
    timer: T,
    armed: bool,
}

impl<'a, K, D, R, T> TaskLink<'a, K, D, R, T>
where
    K: TaskControl + ?Sized,
    D: OutputPin,
    R: InputPin,
    T: TimerService,
{
    pub fn new(bridge: &'a Bridge, kernel: &'a K, data: D, reset: R, timer: T) -> Self {
        Self {
            bridge,
            kernel,
            data,
            reset,
            timer,
            armed: false,
        }
    }

    /// Queue `bit` for the next falling edge and sleep until it has been
    /// driven. Returns the level sampled on that edge.
    fn exchange(&mut self, bit: bool) -> Result<bool, CicError> {
        self.bridge.prepare(bit);
        let error = loop {
            self.kernel.yield_now();
            if let Some(sample) = self.bridge.take_sample() {
                return Ok(sample);
            }
            if self.bridge.foreign_cic_detected() {
                break CicError::DetectionFailure;
            }
            if self.armed && self.bridge.deadline_expired() {
                break CicError::ProtocolTimeout;
            }
        };
        self.bridge.withdraw();
        Err(error)
    }
}

impl<K, D, R, T> Link for TaskLink<'_, K, D, R, T>
where
    K: TaskControl + ?Sized,
    D: OutputPin,
    R: InputPin,
    T: TimerService,
{
    fn wait_power_on(&mut self) {
        while !self.bridge.is_enabled() {
            self.kernel.yield_now();
        }
    }

    fn read(&mut self) -> Result<bool, CicError> {
        self.exchange(true)
    }

    fn write(&mut self, bit: bool) -> Result<(), CicError> {
        self.exchange(bit).map(|_| ())
    }

    fn start_detect(&mut self) {
        self.bridge.start_detect();
    }

    fn arm_deadline(&mut self, duration: u32) {
        self.bridge.clear_deadline();
        self.armed = true;
        self.timer.arm(TimerId::Cic, duration);
    }

    fn disarm_deadline(&mut self) {
        self.timer.disarm(TimerId::Cic);
        self.armed = false;
        self.bridge.clear_deadline();
    }

    fn wait_deadline(&mut self) -> Result<(), CicError> {
        // Clock edges keep waking the task; only the timer ends the wait.
        while !self.bridge.deadline_expired() {
            self.kernel.yield_now();
        }
        Ok(())
    }

    fn reset_held(&mut self) -> bool {
        self.reset.is_high().unwrap_or(false)
    }

    fn pull_data_low(&mut self) {
        let _ = self.data.set_low();
    }
}

/// Body of the CIC task. Runs one session per task (re)start and parks
/// after it ends. **Does not return.**
pub fn run_task<K, D, R, T, B>(
    bridge: &Bridge,
    kernel: &K,
    data: D,
    reset: R,
    timer: T,
    mut board: B,
    config: &ConfigCell,
) -> !
where
    K: TaskControl + ?Sized,
    D: OutputPin,
    R: InputPin,
    T: TimerService,
    B: RegionStore + StatusLed,
{
    let mut link = TaskLink::new(bridge, kernel, data, reset, timer);
    let mut session = Session::new();

    let Err(error) = session.run(&mut link, &mut board, config);
    match error {
        CicError::DetectionFailure | CicError::ConfigDisabled => {
            crate::info!("cic: standing down ({:?})", error)
        }
        _ => crate::error!("cic: session ended in {:?}: {:?}", session.phase(), error),
    }
    if let Some(words) = kernel.stack_high_water(TaskId::CIC) {
        crate::debug!("cic: stack high water {} words", words);
    }

    loop {
        kernel.yield_now();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::cic::params::CicConfig;
    use crate::cic::Region;
    use crate::sim::SimBus;
    use std::cell::RefCell;
    use std::panic::{self, AssertUnwindSafe};

    /// Kernel that reports a fixed stack depth and refuses to park.
    #[derive(Default)]
    struct Measuring {
        queried: RefCell<Vec<TaskId>>,
    }

    impl TaskControl for Measuring {
        fn yield_now(&self) {
            panic!("parked");
        }

        fn set_ready(&self, _id: TaskId) {}

        fn set_ready_and_reset(&self, _id: TaskId) {}

        fn stack_high_water(&self, id: TaskId) -> Option<usize> {
            self.queried.borrow_mut().push(id);
            Some(42)
        }
    }

    #[test]
    fn test_stack_depth_read_before_parking() {
        let bus = SimBus::new(Region::Ntsc);
        let kernel = Measuring::default();
        let bridge = Bridge::new(TaskId::CIC);
        bridge.on_reset_rising(&kernel);
        let config = ConfigCell::new(CicConfig {
            disabled: true,
            ..CicConfig::default()
        });

        let parked = panic::catch_unwind(AssertUnwindSafe(|| {
            run_task(&bridge, &kernel, bus.data(), bus.reset(), bus.timer(), bus.board(), &config)
        }));

        assert!(parked.is_err());
        assert_eq!(*kernel.queried.borrow(), [TaskId::CIC]);
    }
}
