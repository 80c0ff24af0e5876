//! # Console Simulator (host only)
//!
//! A deterministic model of the console side of the CIC bus, for tests and
//! the host build of the firmware binary.
//!
//! - [`SimBus`]: the shared wires (RESET, CLOCK, open-drain DATA as a
//!   wired-AND of every driver), a timer, and the persisted region and LED.
//!   Hands out `embedded-hal` pins and the `hal` services.
//! - [`Console`]: runs the scheduled CIC task on the host kernel and plays
//!   the console by calling the bridge's edge handlers directly.
//! - The busy-poll driver needs no harness: its [`ClockLine`] advances a
//!   scripted console by one half-cycle on every read.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use crate::bridge::Bridge;
use crate::cic::params::{CicConfig, ConfigCell};
use crate::cic::task::run_task;
use crate::cic::Region;
use crate::config::CIC_STACK_WORDS;
use crate::error::KernelError;
use crate::hal::{ErrorCategory, Monotonic, RegionStore, StatusLed, TimerId, TimerService};
use crate::kernel::Kernel;
use crate::task::TaskId;

/// Timer units per clock half-cycle unless overridden.
pub const DEFAULT_HALF_PERIOD: u32 = 10;

/// One bit cell of a scripted console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Release DATA and record what the emulator drives.
    Listen,
    /// Drive a bit for the emulator to read.
    Send(bool),
}

struct Bus {
    reset_high: bool,
    clock_high: bool,
    emulator_low: bool,
    console_low: bool,
    foreign_low: bool,
    foreign_attached: bool,
    half_period: u32,
    now: u32,
    timer: Option<u32>,
    region: Region,
    blinking: Option<ErrorCategory>,
    script: VecDeque<Cycle>,
    listening: bool,
    received: Vec<bool>,
}

impl Bus {
    fn data_high(&self) -> bool {
        !(self.emulator_low || self.console_low || self.foreign_low)
    }

    /// Falling CLOCK edge: the console puts its next bit on the line.
    fn fall(&mut self, cycle: Cycle) {
        self.clock_high = false;
        self.foreign_low = false;
        self.console_low = cycle == Cycle::Send(false);
        self.listening = cycle == Cycle::Listen;
        self.now = self.now.wrapping_add(self.half_period);
    }

    /// Rising CLOCK edge: the console samples, then lets go of the line.
    fn rise(&mut self) {
        if self.listening {
            let bit = self.data_high();
            self.received.push(bit);
        }
        self.clock_high = true;
        self.console_low = false;
        self.listening = false;
        self.foreign_low = self.foreign_attached;
        self.now = self.now.wrapping_add(self.half_period);
    }
}

/// Handle to the simulated wires. Clones share the same bus.
#[derive(Clone)]
pub struct SimBus {
    bus: Arc<Mutex<Bus>>,
}

impl SimBus {
    pub fn new(region: Region) -> Self {
        Self {
            bus: Arc::new(Mutex::new(Bus {
                reset_high: false,
                clock_high: true,
                emulator_low: false,
                console_low: false,
                foreign_low: false,
                foreign_attached: false,
                half_period: DEFAULT_HALF_PERIOD,
                now: 0,
                timer: None,
                region,
                blinking: None,
                script: VecDeque::new(),
                listening: false,
                received: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bus> {
        self.bus.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn data(&self) -> DataLine {
        DataLine { bus: self.clone() }
    }

    pub fn reset(&self) -> ResetLine {
        ResetLine { bus: self.clone() }
    }

    pub fn clock(&self) -> ClockLine {
        ClockLine { bus: self.clone() }
    }

    pub fn timer(&self) -> SimTimer {
        SimTimer { bus: self.clone() }
    }

    pub fn board(&self) -> SimBoard {
        SimBoard { bus: self.clone() }
    }

    pub fn set_reset(&self, high: bool) {
        self.lock().reset_high = high;
    }

    pub fn set_half_period(&self, units: u32) {
        self.lock().half_period = units;
    }

    /// Plug in a genuine 64DD CIC that pulls DATA low while CLOCK is high.
    pub fn attach_foreign_cic(&self) {
        self.lock().foreign_attached = true;
    }

    /// Append bit cells to the console script (busy-poll driver only).
    pub fn script(&self, cycles: impl IntoIterator<Item = Cycle>) {
        self.lock().script.extend(cycles);
    }

    pub fn script_listen(&self, bits: usize) {
        self.script(std::iter::repeat(Cycle::Listen).take(bits));
    }

    pub fn script_send(&self, bits: &[bool]) {
        self.script(bits.iter().map(|&bit| Cycle::Send(bit)));
    }

    /// Everything the console has sampled while listening, oldest first.
    pub fn take_received(&self) -> Vec<bool> {
        std::mem::take(&mut self.lock().received)
    }

    pub fn data_high(&self) -> bool {
        self.lock().data_high()
    }

    /// Whether the emulator itself is pulling DATA low.
    pub fn emulator_pulling_low(&self) -> bool {
        self.lock().emulator_low
    }

    pub fn region(&self) -> Region {
        self.lock().region
    }

    pub fn blinking(&self) -> Option<ErrorCategory> {
        self.lock().blinking
    }
}

// ---------------------------------------------------------------------------
// Pins
// ---------------------------------------------------------------------------

/// Emulator side of the open-drain DATA line.
#[derive(Clone)]
pub struct DataLine {
    bus: SimBus,
}

impl ErrorType for DataLine {
    type Error = Infallible;
}

impl OutputPin for DataLine {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.bus.lock().emulator_low = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.bus.lock().emulator_low = false;
        Ok(())
    }
}

impl InputPin for DataLine {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.bus.data_high())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.bus.data_high())
    }
}

/// RESET as seen by the emulator. High while the console runs.
#[derive(Clone)]
pub struct ResetLine {
    bus: SimBus,
}

impl ErrorType for ResetLine {
    type Error = Infallible;
}

impl InputPin for ResetLine {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.bus.lock().reset_high)
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.bus.lock().reset_high)
    }
}

/// CLOCK for the busy-poll driver. Every read toggles the line and plays
/// the scripted console's side of that edge; an empty script powers the
/// console off.
#[derive(Clone)]
pub struct ClockLine {
    bus: SimBus,
}

impl ClockLine {
    fn toggle(&mut self) -> bool {
        let mut bus = self.bus.lock();
        if bus.clock_high {
            match bus.script.pop_front() {
                Some(cycle) => bus.fall(cycle),
                None => {
                    bus.reset_high = false;
                    bus.fall(Cycle::Listen);
                }
            }
        } else {
            bus.rise();
        }
        bus.clock_high
    }
}

impl ErrorType for ClockLine {
    type Error = Infallible;
}

impl InputPin for ClockLine {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(self.toggle())
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!self.toggle())
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// One-shot timer and time base on the simulated clock. Every `now` read
/// costs one unit, so busy-wait loops make progress.
#[derive(Clone)]
pub struct SimTimer {
    bus: SimBus,
}

impl TimerService for SimTimer {
    fn arm(&mut self, _id: TimerId, duration: u32) {
        let mut bus = self.bus.lock();
        bus.timer = Some(bus.now.wrapping_add(duration));
    }

    fn disarm(&mut self, _id: TimerId) {
        self.bus.lock().timer = None;
    }
}

impl Monotonic for SimTimer {
    fn now(&mut self) -> u32 {
        let mut bus = self.bus.lock();
        bus.now = bus.now.wrapping_add(1);
        bus.now
    }
}

/// Region store and status LED.
#[derive(Clone)]
pub struct SimBoard {
    bus: SimBus,
}

impl RegionStore for SimBoard {
    fn region(&self) -> Region {
        self.bus.region()
    }

    fn set_region(&mut self, region: Region) {
        self.bus.lock().region = region;
    }
}

impl StatusLed for SimBoard {
    fn blink_error(&mut self, category: ErrorCategory) {
        self.bus.lock().blinking = Some(category);
    }

    fn clear_error(&mut self, category: ErrorCategory) {
        let mut bus = self.bus.lock();
        if bus.blinking == Some(category) {
            bus.blinking = None;
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduled harness
// ---------------------------------------------------------------------------

/// Console driving the scheduled CIC task through the bridge's edge
/// handlers, the way the GPIO and timer interrupts do on hardware.
pub struct Console {
    bus: SimBus,
    kernel: Arc<Kernel>,
    bridge: Arc<Bridge>,
    config: Arc<ConfigCell>,
    data: DataLine,
    board: SimBoard,
}

impl Console {
    /// Create the kernel and the CIC task. The console starts powered off.
    pub fn new(config: CicConfig, region: Region) -> Result<Console, KernelError> {
        let bus = SimBus::new(region);
        let kernel = Kernel::new();
        let bridge = Arc::new(Bridge::new(TaskId::CIC));
        let config = Arc::new(ConfigCell::new(config));

        let entry = {
            let bus = bus.clone();
            let bridge = Arc::clone(&bridge);
            let config = Arc::clone(&config);
            let kernel = Arc::downgrade(&kernel);
            move || {
                let Some(kernel) = kernel.upgrade() else {
                    return;
                };
                run_task(
                    &bridge,
                    &*kernel,
                    bus.data(),
                    bus.reset(),
                    bus.timer(),
                    bus.board(),
                    &config,
                )
            }
        };
        kernel.create(TaskId::CIC, entry, CIC_STACK_WORDS)?;
        kernel.run_until_idle();

        Ok(Console {
            data: bus.data(),
            board: bus.board(),
            bus,
            kernel,
            bridge,
            config,
        })
    }

    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    pub fn config(&self) -> &ConfigCell {
        &self.config
    }

    pub fn cic_enabled(&self) -> bool {
        self.bridge.is_enabled()
    }

    pub fn cic_ready(&self) -> bool {
        self.kernel.is_ready(TaskId::CIC)
    }

    /// RESET rising edge.
    pub fn power_on(&mut self) {
        self.bus.set_reset(true);
        self.bridge.on_reset_rising(&*self.kernel);
        self.kernel.run_until_idle();
    }

    /// RESET falling edge.
    pub fn power_off(&mut self) {
        self.bus.set_reset(false);
        self.bridge.on_reset_falling(&mut self.data, &mut self.board);
        self.kernel.run_until_idle();
    }

    /// One bit cell. `Some(bit)` is driven by the console, `None` releases
    /// the line. Returns the level on DATA at the sample point.
    pub fn cycle(&mut self, console: Option<bool>) -> bool {
        let cycle = match console {
            Some(bit) => Cycle::Send(bit),
            None => Cycle::Listen,
        };

        self.bus.lock().fall(cycle);
        self.bridge.on_clock_falling(&mut self.data, &*self.kernel);
        let level = self.bus.data_high();
        self.kernel.run_until_idle();
        self.fire_timer();

        self.bus.lock().rise();
        self.bridge.on_clock_rising(&mut self.data, &*self.kernel);
        self.kernel.run_until_idle();
        self.fire_timer();

        level
    }

    /// Let `units` of time pass with CLOCK idle.
    pub fn advance(&mut self, units: u32) {
        {
            let mut bus = self.bus.lock();
            bus.now = bus.now.wrapping_add(units);
        }
        self.fire_timer();
    }

    fn fire_timer(&mut self) {
        let due = {
            let mut bus = self.bus.lock();
            match bus.timer {
                Some(at) if bus.now.wrapping_sub(at) as i32 >= 0 => {
                    bus.timer = None;
                    true
                }
                _ => false,
            }
        };
        if due {
            self.bridge.on_deadline(&*self.kernel);
            self.kernel.run_until_idle();
        }
    }

    pub fn receive_bits(&mut self, count: usize) -> Vec<bool> {
        (0..count).map(|_| self.cycle(None)).collect()
    }

    pub fn receive_nibbles(&mut self, count: usize) -> Vec<u8> {
        (0..count)
            .map(|_| {
                self.receive_bits(4)
                    .into_iter()
                    .fold(0, |nibble, bit| (nibble << 1) | u8::from(bit))
            })
            .collect()
    }

    pub fn send_bits(&mut self, bits: &[bool]) {
        for &bit in bits {
            self.cycle(Some(bit));
        }
    }

    pub fn send_nibbles(&mut self, nibbles: &[u8]) {
        for &nibble in nibbles {
            self.send_bits(&nibble_bits(nibble));
        }
    }
}

/// The four bits of `nibble`, MSB first.
pub fn nibble_bits(nibble: u8) -> [bool; 4] {
    [3, 2, 1, 0].map(|shift| nibble & (1 << shift) != 0)
}

// ---------------------------------------------------------------------------
// End-to-end tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cic::algorithm::encode_checksum;
    use crate::cic::params::CHECKSUM_6102;
    use crate::cic::poll::{PollingCic, PollingLink};
    use crate::cic::CicVariant;
    use crate::error::CicError;

    const SEED_6102: [u8; 6] = [0xB, 0xD, 0x3, 0x9, 0x3, 0xD];
    const CHECKSUM_6102_STREAM: [u8; 16] =
        [0x0, 0x4, 0xE, 0x2, 0xF, 0xA, 0xC, 0x5, 0x2, 0x1, 0x0, 0xF, 0xC, 0xE, 0x2, 0xF];

    fn flags(values: &[u8]) -> Vec<bool> {
        values.iter().map(|&v| v != 0).collect()
    }

    fn bits(nibbles: &[u8]) -> Vec<bool> {
        nibbles.iter().flat_map(|&n| nibble_bits(n)).collect()
    }

    /// Console side of a boot up to the command loop.
    fn boot(console: &mut Console) {
        console.power_on();
        assert_eq!(console.receive_bits(4), flags(&[0, 0, 0, 1]));
        assert_eq!(console.receive_nibbles(6), SEED_6102);
        console.send_bits(&[false]);
        assert_eq!(console.receive_nibbles(16), CHECKSUM_6102_STREAM);
        console.send_nibbles(&[0x3, 0x5]);
    }

    fn compare(console: &mut Console, steps: usize) -> Vec<bool> {
        console.send_bits(&[false, false]);
        (0..steps)
            .map(|_| {
                console.cycle(Some(true));
                console.cycle(None)
            })
            .collect()
    }

    #[test]
    fn test_scheduled_6102_ntsc_boot() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);
        assert!(console.cic_enabled());
        assert_eq!(console.bus().blinking(), None);
    }

    #[test]
    fn test_task_idle_before_power_on() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        assert!(!console.cic_ready());
        // No RESET edge yet: clock edges are ignored
        assert_eq!(console.receive_bits(4), flags(&[1, 1, 1, 1]));
    }

    #[test]
    fn test_scheduled_compare_ntsc() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);
        assert_eq!(compare(&mut console, 11), flags(&[1, 0, 1, 1, 1, 1, 0, 1, 0, 1, 1]));
    }

    #[test]
    fn test_scheduled_compare_pal() {
        let mut console = Console::new(CicConfig::default(), Region::Pal).unwrap();
        console.power_on();
        assert_eq!(console.receive_bits(4), flags(&[0, 1, 0, 1]));
        console.receive_nibbles(6);
        console.send_bits(&[false]);
        console.receive_nibbles(16);
        console.send_nibbles(&[0x3, 0x5]);

        assert_eq!(
            compare(&mut console, 14),
            flags(&[1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1])
        );
    }

    #[test]
    fn test_scheduled_x105() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);

        let challenge: Vec<u8> = (0..30).map(|i| ((i * 7 + 3) & 0xF) as u8).collect();
        console.send_bits(&[true, false]);
        assert_eq!(console.receive_nibbles(2), [0xA, 0xA]);
        console.send_nibbles(&challenge);
        assert_eq!(console.receive_bits(1), [false]);
        assert_eq!(
            console.receive_nibbles(30),
            [
                0xA, 0xA, 0xD, 0xB, 0xA, 0x6, 0xF, 0xD, 0xA, 0x2, 0x7, 0x1, 0xA, 0xE, 0xF, 0x5, 0x4,
                0x0, 0x9, 0x1, 0xC, 0x4, 0xF, 0xD, 0xA, 0x2, 0x7, 0x1, 0xA, 0xE,
            ]
        );
    }

    #[test]
    fn test_seed_timeout_flips_region_and_blinks() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        console.power_on();
        console.receive_bits(4);
        console.receive_bits(3);

        console.advance(1000);
        assert_eq!(console.bus().region(), Region::Pal);
        assert_eq!(console.bus().blinking(), Some(ErrorCategory::Cic));

        // Dead until the next RESET edge
        assert_eq!(console.receive_bits(8), flags(&[1; 8]));

        // Power cycling clears the LED and the next boot answers as PAL
        console.power_off();
        assert_eq!(console.bus().blinking(), None);
        console.power_on();
        assert_eq!(console.receive_bits(4), flags(&[0, 1, 0, 1]));
    }

    #[test]
    fn test_soft_reset_acknowledged() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);

        // The window opened on the last falling edge, half a period ago
        console.send_bits(&[true, true, false]);
        assert!(!console.bus().emulator_pulling_low());
        console.advance(550 - DEFAULT_HALF_PERIOD - 1);
        assert!(!console.bus().emulator_pulling_low());
        console.advance(1);
        assert!(console.bus().emulator_pulling_low());

        // The next bit cell releases the line and the command loop goes on
        console.cycle(Some(true));
        assert!(!console.bus().emulator_pulling_low());
        assert!(console.cic_enabled());
    }

    #[test]
    fn test_soft_reset_not_acknowledged_after_reset_drops() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);

        console.send_bits(&[true, true, false]);
        console.power_off();
        console.advance(600);
        assert!(!console.bus().emulator_pulling_low());
    }

    #[test]
    fn test_reset_mid_command_restarts_session() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);

        // Abandon an X105 exchange halfway through the challenge
        console.send_bits(&[true, false]);
        console.receive_nibbles(2);
        console.send_nibbles(&[0x1, 0x2, 0x3]);

        console.power_off();
        console.power_on();
        assert_eq!(console.receive_bits(4), flags(&[0, 0, 0, 1]));
        assert_eq!(console.receive_nibbles(6), SEED_6102);
    }

    #[test]
    fn test_64dd_id_and_seed() {
        let config = CicConfig::for_variant(CicVariant::Cic8303, CHECKSUM_6102);
        let mut console = Console::new(config, Region::Ntsc).unwrap();
        console.power_on();

        assert_eq!(console.receive_bits(4), flags(&[1, 0, 0, 1]));
        assert_eq!(console.receive_nibbles(6), [0xB, 0xD, 0xD, 0xB, 0x7, 0x1]);
        assert!(console.cic_enabled());
    }

    #[test]
    fn test_64dd_yields_to_foreign_cic() {
        let config = CicConfig::for_variant(CicVariant::Cic8303, CHECKSUM_6102);
        let mut console = Console::new(config, Region::Ntsc).unwrap();
        console.bus().attach_foreign_cic();
        console.power_on();

        console.cycle(None);
        assert!(!console.cic_enabled());
        assert!(!console.cic_ready());
        assert_eq!(console.receive_bits(8), flags(&[1; 8]));
    }

    #[test]
    fn test_unknown_opcode_hangs() {
        let mut console = Console::new(CicConfig::default(), Region::Ntsc).unwrap();
        boot(&mut console);

        console.send_bits(&[false, true]);
        assert!(!console.cic_ready());
        assert_eq!(console.receive_bits(8), flags(&[1; 8]));
    }

    #[test]
    fn test_disabled_config_never_answers() {
        let config = CicConfig {
            disabled: true,
            ..CicConfig::default()
        };
        let mut console = Console::new(config, Region::Ntsc).unwrap();
        console.power_on();
        assert_eq!(console.receive_bits(8), flags(&[1; 8]));

        // Re-enabled by the host: takes effect at the next RESET
        console.config().set(CicConfig::default());
        console.power_off();
        console.power_on();
        assert_eq!(console.receive_bits(4), flags(&[0, 0, 0, 1]));
    }

    fn polling(bus: &SimBus) -> PollingCic<ResetLine, ClockLine, DataLine, SimTimer, SimBoard> {
        let link = PollingLink::new(bus.reset(), bus.clock(), bus.data(), bus.timer());
        PollingCic::new(link, bus.board())
    }

    #[test]
    fn test_polling_6102_boot_and_compare() {
        let bus = SimBus::new(Region::Ntsc);
        bus.script_listen(4 + 24);
        bus.script_send(&[false]);
        bus.script_listen(64);
        bus.script_send(&bits(&[0x3, 0x5]));
        bus.script_send(&[false, false]);
        for _ in 0..11 {
            bus.script_send(&[true]);
            bus.script_listen(1);
        }
        bus.set_reset(true);

        let mut cic = polling(&bus);
        assert_eq!(cic.run_once(&ConfigCell::default()), CicError::Interrupted);

        let mut expected = flags(&[0, 0, 0, 1]);
        expected.extend(bits(&SEED_6102));
        expected.extend(bits(&encode_checksum(&CHECKSUM_6102)));
        expected.extend(flags(&[1, 0, 1, 1, 1, 1, 0, 1, 0, 1, 1]));
        assert_eq!(bus.take_received(), expected);
        assert!(bus.data_high());
    }

    #[test]
    fn test_polling_seed_timeout() {
        let bus = SimBus::new(Region::Ntsc);
        bus.set_half_period(50);
        bus.script_listen(28);
        bus.set_reset(true);

        let mut cic = polling(&bus);
        assert_eq!(cic.run_once(&ConfigCell::default()), CicError::ProtocolTimeout);
        assert_eq!(cic.board().region(), Region::Pal);
        assert_eq!(bus.blinking(), Some(ErrorCategory::Cic));
    }

    #[test]
    fn test_polling_reset_low_clears_error_led() {
        let bus = SimBus::new(Region::Ntsc);
        bus.set_half_period(50);
        bus.script_listen(28);
        bus.set_reset(true);

        let mut cic = polling(&bus);
        assert_eq!(cic.run_once(&ConfigCell::default()), CicError::ProtocolTimeout);
        assert_eq!(bus.blinking(), Some(ErrorCategory::Cic));

        bus.set_reset(false);
        cic.wait_for_reset();
        assert_eq!(bus.blinking(), None);
        // The flipped region survives the reset
        assert_eq!(cic.board().region(), Region::Pal);
    }

    #[test]
    fn test_polling_64dd_yields_to_foreign_cic() {
        let bus = SimBus::new(Region::Ntsc);
        bus.attach_foreign_cic();
        bus.script_listen(4);
        bus.set_reset(true);

        let config = ConfigCell::new(CicConfig::for_variant(CicVariant::Dd64Us, CHECKSUM_6102));
        let mut cic = polling(&bus);
        assert_eq!(cic.run_once(&config), CicError::DetectionFailure);
    }
}
