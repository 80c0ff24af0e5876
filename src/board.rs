//! STM32F401 register glue for the cartridge board.
//!
//! | Signal | Pin  | Mode                         | Interrupt      |
//! |--------|------|------------------------------|----------------|
//! | RESET  | PA0  | input                        | EXTI0, both    |
//! | CLOCK  | PA1  | input                        | EXTI1, both    |
//! | DATA   | PA2  | open-drain output, idle high | none           |
//! | LED    | PC13 | push-pull, active low        | SysTick blink  |
//!
//! TIM2 is the one-shot `TimerId::Cic` timer at one tick per microsecond.
//! The region lives in RTC backup register 0 so it survives console resets.

use core::convert::Infallible;
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{NVIC, SYST};
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

use cic_emu::cic::Region;
use cic_emu::config::{SYSTEM_CLOCK_HZ, TIMER_TICK_HZ};
use cic_emu::hal::{ErrorCategory, RegionStore, StatusLed, TimerId, TimerService};

// ============================================================================
// Registers
// ============================================================================

const RCC_BASE: usize = 0x4002_3800;
const RCC_AHB1ENR: usize = RCC_BASE + 0x30;
const RCC_APB1ENR: usize = RCC_BASE + 0x40;
const RCC_APB2ENR: usize = RCC_BASE + 0x44;

const PWR_CR: usize = 0x4000_7000;
const PWR_CR_DBP: u32 = 1 << 8;

const RTC_BKP0R: usize = 0x4000_2800 + 0x50;

const GPIOA_BASE: usize = 0x4002_0000;
const GPIOC_BASE: usize = 0x4002_0800;
const GPIO_MODER: usize = 0x00;
const GPIO_OTYPER: usize = 0x04;
const GPIO_IDR: usize = 0x10;
const GPIO_BSRR: usize = 0x18;

const EXTI_BASE: usize = 0x4001_3C00;
const EXTI_IMR: usize = EXTI_BASE + 0x00;
const EXTI_RTSR: usize = EXTI_BASE + 0x08;
const EXTI_FTSR: usize = EXTI_BASE + 0x0C;
const EXTI_PR: usize = EXTI_BASE + 0x14;

const TIM2_BASE: usize = 0x4000_0000;
const TIM_CR1: usize = TIM2_BASE + 0x00;
const TIM_DIER: usize = TIM2_BASE + 0x0C;
const TIM_SR: usize = TIM2_BASE + 0x10;
const TIM_EGR: usize = TIM2_BASE + 0x14;
const TIM_CNT: usize = TIM2_BASE + 0x24;
const TIM_PSC: usize = TIM2_BASE + 0x28;
const TIM_ARR: usize = TIM2_BASE + 0x2C;
const TIM_CR1_CEN: u32 = 1 << 0;
const TIM_CR1_URS: u32 = 1 << 2;
const TIM_CR1_OPM: u32 = 1 << 3;

const RESET_PIN: u32 = 0;
const CLOCK_PIN: u32 = 1;
const DATA_PIN: u32 = 2;
const LED_PIN: u32 = 13;

/// LED toggles per second while an error is shown.
const BLINK_HZ: u32 = 4;

#[inline(always)]
fn mmio_read(addr: usize) -> u32 {
    unsafe { read_volatile(addr as *const u32) }
}

#[inline(always)]
fn mmio_write(addr: usize, value: u32) {
    unsafe { write_volatile(addr as *mut u32, value) }
}

#[inline(always)]
fn mmio_modify(addr: usize, clear: u32, set: u32) {
    mmio_write(addr, (mmio_read(addr) & !clear) | set)
}

fn pin_high(port: usize, pin: u32) -> bool {
    mmio_read(port + GPIO_IDR) & (1 << pin) != 0
}

fn pin_set(port: usize, pin: u32, high: bool) {
    let bit = if high { 1 << pin } else { 1 << (pin + 16) };
    mmio_write(port + GPIO_BSRR, bit);
}

// ============================================================================
// Interrupts
// ============================================================================

/// Device interrupts used by the firmware (STM32F401 vector positions).
#[derive(Debug, Clone, Copy)]
pub enum Irq {
    Exti0 = 6,
    Exti1 = 7,
    Tim2 = 28,
}

unsafe impl InterruptNumber for Irq {
    fn number(self) -> u16 {
        self as u16
    }
}

/// Acknowledge the EXTI line of `pin`.
pub fn clear_edge(pin: u32) {
    mmio_write(EXTI_PR, 1 << pin);
}

pub fn clear_reset_edge() {
    clear_edge(RESET_PIN);
}

pub fn clear_clock_edge() {
    clear_edge(CLOCK_PIN);
}

/// Acknowledge a TIM2 update. Returns whether one was pending.
pub fn clear_timer_update() -> bool {
    let pending = mmio_read(TIM_SR) & 1 != 0;
    mmio_write(TIM_SR, 0);
    pending
}

/// Bring up clocks, pins, the edge interrupts, TIM2 and the LED blinker.
pub fn init(nvic: &mut NVIC, syst: &mut SYST) {
    // GPIOA, GPIOC; TIM2, PWR; SYSCFG
    mmio_modify(RCC_AHB1ENR, 0, (1 << 0) | (1 << 2));
    mmio_modify(RCC_APB1ENR, 0, (1 << 0) | (1 << 28));
    mmio_modify(RCC_APB2ENR, 0, 1 << 14);
    mmio_modify(PWR_CR, 0, PWR_CR_DBP);

    // DATA: released open-drain output
    pin_set(GPIOA_BASE, DATA_PIN, true);
    mmio_modify(GPIOA_BASE + GPIO_OTYPER, 0, 1 << DATA_PIN);
    mmio_modify(GPIOA_BASE + GPIO_MODER, 0b11 << (DATA_PIN * 2), 0b01 << (DATA_PIN * 2));
    // RESET, CLOCK: inputs
    mmio_modify(GPIOA_BASE + GPIO_MODER, (0b11 << (RESET_PIN * 2)) | (0b11 << (CLOCK_PIN * 2)), 0);
    // LED: output, off
    pin_set(GPIOC_BASE, LED_PIN, true);
    mmio_modify(GPIOC_BASE + GPIO_MODER, 0b11 << (LED_PIN * 2), 0b01 << (LED_PIN * 2));

    // EXTI0/EXTI1 default to port A; both edges on each
    let lines = (1 << RESET_PIN) | (1 << CLOCK_PIN);
    mmio_modify(EXTI_RTSR, 0, lines);
    mmio_modify(EXTI_FTSR, 0, lines);
    mmio_write(EXTI_PR, lines);
    mmio_modify(EXTI_IMR, 0, lines);

    mmio_write(TIM_CR1, TIM_CR1_URS);
    mmio_write(TIM_PSC, SYSTEM_CLOCK_HZ / TIMER_TICK_HZ - 1);

    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(SYSTEM_CLOCK_HZ / BLINK_HZ - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();

    // Safety: priorities are uniform; no priority-based critical section exists.
    unsafe {
        nvic.set_priority(Irq::Exti0, 0x40);
        nvic.set_priority(Irq::Exti1, 0x40);
        nvic.set_priority(Irq::Tim2, 0x80);
        NVIC::unmask(Irq::Exti0);
        NVIC::unmask(Irq::Exti1);
        NVIC::unmask(Irq::Tim2);
    }
}

// ============================================================================
// Pins
// ============================================================================

/// PA2, the open-drain DATA line.
#[derive(Debug, Clone, Copy)]
pub struct DataPin;

impl ErrorType for DataPin {
    type Error = Infallible;
}

impl OutputPin for DataPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        pin_set(GPIOA_BASE, DATA_PIN, false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        pin_set(GPIOA_BASE, DATA_PIN, true);
        Ok(())
    }
}

impl InputPin for DataPin {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(pin_high(GPIOA_BASE, DATA_PIN))
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!pin_high(GPIOA_BASE, DATA_PIN))
    }
}

/// PA0 (RESET) or PA1 (CLOCK).
#[derive(Debug, Clone, Copy)]
pub struct InputLine(u32);

pub const RESET: InputLine = InputLine(RESET_PIN);
pub const CLOCK: InputLine = InputLine(CLOCK_PIN);

impl ErrorType for InputLine {
    type Error = Infallible;
}

impl InputPin for InputLine {
    fn is_high(&mut self) -> Result<bool, Infallible> {
        Ok(pin_high(GPIOA_BASE, self.0))
    }

    fn is_low(&mut self) -> Result<bool, Infallible> {
        Ok(!pin_high(GPIOA_BASE, self.0))
    }
}

// ============================================================================
// Services
// ============================================================================

/// TIM2 as a one-shot timer.
#[derive(Debug, Clone, Copy)]
pub struct Timer;

impl TimerService for Timer {
    fn arm(&mut self, _id: TimerId, duration: u32) {
        mmio_write(TIM_CR1, TIM_CR1_URS);
        mmio_write(TIM_ARR, duration);
        mmio_write(TIM_CNT, 0);
        // Latch the prescaler without raising an interrupt
        mmio_write(TIM_EGR, 1);
        mmio_write(TIM_SR, 0);
        mmio_write(TIM_DIER, 1);
        mmio_write(TIM_CR1, TIM_CR1_URS | TIM_CR1_OPM | TIM_CR1_CEN);
    }

    fn disarm(&mut self, _id: TimerId) {
        mmio_write(TIM_CR1, TIM_CR1_URS);
        mmio_write(TIM_DIER, 0);
        mmio_write(TIM_SR, 0);
    }
}

static BLINKING: AtomicBool = AtomicBool::new(false);

/// Backup-register region store and the status LED.
#[derive(Debug, Clone, Copy)]
pub struct Board;

impl RegionStore for Board {
    fn region(&self) -> Region {
        if mmio_read(RTC_BKP0R) & 1 != 0 {
            Region::Pal
        } else {
            Region::Ntsc
        }
    }

    fn set_region(&mut self, region: Region) {
        mmio_modify(RTC_BKP0R, 1, u32::from(region == Region::Pal));
    }
}

impl StatusLed for Board {
    fn blink_error(&mut self, _category: ErrorCategory) {
        BLINKING.store(true, Ordering::Relaxed);
    }

    fn clear_error(&mut self, _category: ErrorCategory) {
        BLINKING.store(false, Ordering::Relaxed);
    }
}

/// SysTick body: toggle the LED while an error is shown, else keep it off.
pub fn blink_tick() {
    if BLINKING.load(Ordering::Relaxed) {
        let on = !pin_high(GPIOC_BASE, LED_PIN);
        pin_set(GPIOC_BASE, LED_PIN, on);
    } else {
        pin_set(GPIOC_BASE, LED_PIN, true);
    }
}
