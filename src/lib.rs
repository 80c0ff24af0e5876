//! # cic-emu
//!
//! Emulator for the N64 lockout chip (CIC) on a Cortex-M4 cartridge board.
//! The console talks to the CIC over a three-wire bus (RESET, CLOCK and an
//! open-drain DATA line); the emulator answers with the chip's ID, seed and
//! checksum, then serves the console's runtime commands until the next
//! reset.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │        CIC protocol (cic/protocol.rs) · Session        │
//! │  LoadConfig · SendId · SendSeed · SendChecksum · ...   │
//! ├───────────────────────────┬────────────────────────────┤
//! │  Scheduled link           │  Busy-poll link            │
//! │  cic/task.rs              │  cic/poll.rs               │
//! │  ─ TaskLink               │  ─ PollingLink             │
//! ├───────────────────────────┤  ─ PollingCic              │
//! │  Bridge (bridge.rs)       │                            │
//! │  edge handlers ⇄ task     │                            │
//! ├───────────────────────────┤                            │
//! │  Kernel (kernel.rs)       │                            │
//! │  create · start · yield   │                            │
//! │  set_ready · reset        │                            │
//! ├──────────────┬────────────┴───────┬────────────────────┤
//! │  Scheduler   │  Task model        │  Sync primitives   │
//! │  scheduler.rs│  task.rs           │  sync.rs           │
//! ├──────────────┴────────────────────┴────────────────────┤
//! │  Arch port: arch/cortex_m4.rs (PendSV) · arch/host.rs  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! The algorithms (`cic/algorithm.rs`) and the per-chip parameters
//! (`cic/params.rs`) are pure and shared by both drivers. Board services
//! the protocol needs (one-shot timer, region storage, status LED) are the
//! traits in [`hal`].
//!
//! ## Scheduling Model
//!
//! Cooperative, fixed priority: the lowest-numbered ready task runs until
//! it yields. Interrupt handlers only mark tasks ready or request a reset,
//! which rebuilds a task at its entry point the next time it is picked.
//!
//! ## Memory Model
//!
//! - **No heap** on target: all state is statically allocated
//! - **Per-task stacks** are `'static` arrays handed to [`kernel::Kernel::create`]
//! - **Critical sections** via the `critical-section` crate
//!
//! On the host the arch port runs each task on its own thread, handing a
//! baton back and forth, so the kernel and the CIC task can be tested
//! end to end (see [`sim`]).

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
mod fmt;

pub mod arch;
pub mod bridge;
pub mod cic;
pub mod config;
pub mod error;
pub mod hal;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;

#[cfg(not(target_os = "none"))]
pub mod sim;
