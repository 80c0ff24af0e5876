//! # CIC Firmware
//!
//! Cortex-M4 image: the cooperative kernel with the CIC emulator as task 0,
//! fed by the RESET/CLOCK edge interrupts and the TIM2 deadline.
//!
//! ```text
//!  EXTI0 (RESET ↑↓) ──┐
//!  EXTI1 (CLOCK ↑↓) ──┼──► Bridge ──set_ready──► KERNEL ──PendSV──► cic_task
//!  TIM2  (deadline) ──┘
//! ```
//!
//! On the host the same binary plays a simulated 6102/7101 NTSC boot
//! through the scheduled task and logs the exchange.

#![cfg_attr(target_os = "none", no_std, no_main)]

#[cfg(target_os = "none")]
mod board;

#[cfg(target_os = "none")]
#[allow(non_snake_case)]
mod firmware {
    use core::ptr::addr_of_mut;

    use cortex_m_rt::{entry, exception};
    #[cfg(feature = "defmt")]
    use defmt_rtt as _;
    use panic_halt as _;

    use cic_emu::bridge::Bridge;
    use cic_emu::cic::params::{CicConfig, CicVariant, ConfigCell, CHECKSUM_6102};
    use cic_emu::cic::task::run_task;
    use cic_emu::config::CIC_STACK_WORDS;
    use cic_emu::kernel::KERNEL;
    use cic_emu::task::TaskId;
    use embedded_hal::digital::InputPin;

    use crate::board::{self, Board, DataPin, Timer, CLOCK, RESET};

    static BRIDGE: Bridge = Bridge::new(TaskId::CIC);

    /// Written by the host-command layer before the console is powered.
    pub static CIC_CONFIG: ConfigCell = ConfigCell::new(CicConfig::for_variant(CicVariant::Cic6102, CHECKSUM_6102));

    static mut CIC_STACK: [u32; CIC_STACK_WORDS] = [0; CIC_STACK_WORDS];

    extern "C" fn cic_task() -> ! {
        run_task(&BRIDGE, &KERNEL, DataPin, RESET, Timer, Board, &CIC_CONFIG)
    }

    #[entry]
    fn main() -> ! {
        let Some(mut core) = cortex_m::Peripherals::take() else {
            loop {
                cortex_m::asm::wfi();
            }
        };
        board::init(&mut core.NVIC, &mut core.SYST);

        // Safety: the stack is handed to the kernel exactly once, here.
        let stack = unsafe { &mut *addr_of_mut!(CIC_STACK) };
        if let Err(error) = KERNEL.create(TaskId::CIC, cic_task, stack) {
            cic_emu::error!("cic task: {:?}", error);
        }

        // The console may already be running when we come out of reset
        let mut reset = RESET;
        if reset.is_high().unwrap_or(false) {
            BRIDGE.on_reset_rising(&KERNEL);
        }

        KERNEL.start(core)
    }

    #[no_mangle]
    extern "C" fn EXTI0() {
        board::clear_reset_edge();
        let mut reset = RESET;
        if reset.is_high().unwrap_or(false) {
            BRIDGE.on_reset_rising(&KERNEL);
        } else {
            BRIDGE.on_reset_falling(&mut DataPin, &mut Board);
        }
    }

    #[no_mangle]
    extern "C" fn EXTI1() {
        board::clear_clock_edge();
        let mut clock = CLOCK;
        if clock.is_high().unwrap_or(true) {
            BRIDGE.on_clock_rising(&mut DataPin, &KERNEL);
        } else {
            BRIDGE.on_clock_falling(&mut DataPin, &KERNEL);
        }
    }

    #[no_mangle]
    extern "C" fn TIM2() {
        if board::clear_timer_update() {
            BRIDGE.on_deadline(&KERNEL);
        }
    }

    #[exception]
    fn SysTick() {
        board::blink_tick();
    }

    /// Device vector table: EXTI0, EXTI1 and TIM2, everything else unused.
    #[repr(C)]
    pub union Vector {
        handler: unsafe extern "C" fn(),
        reserved: usize,
    }

    extern "C" {
        fn DefaultHandler();
    }

    const fn table() -> [Vector; 29] {
        let mut vectors = [const { Vector { handler: DefaultHandler } }; 29];
        vectors[board::Irq::Exti0 as usize] = Vector { handler: EXTI0 };
        vectors[board::Irq::Exti1 as usize] = Vector { handler: EXTI1 };
        vectors[board::Irq::Tim2 as usize] = Vector { handler: TIM2 };
        vectors
    }

    #[link_section = ".vector_table.interrupts"]
    #[no_mangle]
    pub static __INTERRUPTS: [Vector; 29] = table();
}

#[cfg(not(target_os = "none"))]
fn main() {
    use cic_emu::cic::params::CicConfig;
    use cic_emu::cic::Region;
    use cic_emu::sim::Console;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let mut console = match Console::new(CicConfig::default(), Region::Ntsc) {
        Ok(console) => console,
        Err(error) => {
            cic_emu::error!("cannot create the CIC task: {:?}", error);
            return;
        }
    };

    console.power_on();
    let id = console.receive_nibbles(1);
    let seed = console.receive_nibbles(6);
    console.send_bits(&[false]);
    let checksum = console.receive_nibbles(16);
    console.send_nibbles(&[0x3, 0x5]);
    cic_emu::info!("id {:x?} seed {:x?} checksum {:x?}", id, seed, checksum);

    console.send_bits(&[false, false]);
    let response: Vec<u8> = (0..11)
        .map(|_| {
            console.cycle(Some(true));
            u8::from(console.cycle(None))
        })
        .collect();
    cic_emu::info!("compare response {:?}", response);

    console.power_off();
}
