//! The breakpoint and watchpoint bookkeeping of a core, as consumed by the
//! bring-up core at its interface boundary.

use crate::arm::ArmError;

/// Kinds of data accesses a watchpoint can match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchpointKind {
    /// Match read accesses.
    Read,
    /// Match write accesses.
    Write,
    /// Match both read and write accesses.
    ReadWrite,
}

/// Manager of the hardware comparators and software breakpoint shadows of
/// a single core.
///
/// The bring-up core never tracks comparators itself; it asks the manager
/// to arm them and to clean software-breakpoint shadow bytes out of memory
/// it has read.
pub trait BreakpointManager: Send {
    /// Arm a hardware watchpoint matching `kind` accesses of `size` bytes
    /// at `address`.
    fn set_watchpoint(
        &mut self,
        address: u64,
        size: u32,
        kind: WatchpointKind,
    ) -> Result<(), ArmError>;

    /// Replace bytes in `data` (read from `address`) that are currently
    /// shadowed by software breakpoints with their original values.
    fn filter_memory(&mut self, address: u64, data: &mut [u8]);
}
