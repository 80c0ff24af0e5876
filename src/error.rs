//! # Error Taxonomy
//!
//! Errors never cross the task boundary. Inside the CIC task they propagate
//! with `?` up to the driver, which turns every one of them into the same
//! observable outcome: stop answering on the protocol lines until the console
//! raises RESET again.

/// Why a CIC session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CicError {
    /// The encoded seed was not fully streamed before the seed deadline.
    /// Recovered by flipping the persisted region and waiting for RESET.
    ProtocolTimeout,
    /// The console issued an opcode the emulator does not implement.
    UnrecognizedCommand(u8),
    /// A genuine 64DD CIC answered the detection probe; this emulator yields
    /// the bus to it.
    DetectionFailure,
    /// The subsystem is disabled by configuration.
    ConfigDisabled,
    /// RESET dropped while the busy-poll driver was waiting on the bus.
    Interrupted,
}

impl CicError {
    /// Fatal outcomes require a fresh RESET edge; the timeout additionally
    /// leaves the region flipped for the next attempt.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, CicError::ProtocolTimeout | CicError::Interrupted)
    }
}

/// Errors reported by task creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// A task was already created with this id. Tasks are never destroyed.
    AlreadyCreated,
    /// The supplied stack cannot hold the initial context frame.
    StackTooSmall,
}
