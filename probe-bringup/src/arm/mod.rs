//! All the interface bits for ARM.

pub mod breakpoints;
pub mod core;
pub mod memory;

pub use self::core::armv8m;

use std::fmt;

/// Access port address: the index of an access port on the debug port.
///
/// Access ports are discovered during bring-up and owned by the debug port
/// for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApAddress(pub u8);

impl fmt::Display for ApAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AP #{}", self.0)
    }
}

/// ARM specific errors.
///
/// [`ArmError::TransferFault`] and [`ArmError::TransferTimeout`] are the
/// expected transients of this family (e.g. while the debug mailbox comes
/// back up after a reset). They are retried only inside the polling loops
/// that document them; everywhere else, and for every other kind, the
/// first occurrence aborts the operation.
#[derive(Debug, thiserror::Error, docsplay::Display)]
pub enum ArmError {
    /// A fault was reported by the target during a transfer.
    TransferFault,

    /// A transfer timed out waiting for the target to respond.
    TransferTimeout,

    /// An operation did not complete within its session timeout.
    Timeout,

    /// The core did not leave its reset state within the allotted time.
    ResetTimeout,

    /// The flash-erase probe never signalled completion.
    ProbeTimeout,

    /// {0} does not exist.
    ApDoesNotExist(ApAddress),

    /// Some uncategorized error occurred.
    Other(#[from] anyhow::Error),
}

/// Low-level access port register access.
///
/// Operations on this trait closely match the transactions on the wire.
/// Implementors only do basic error handling, such as retrying WAIT
/// responses; everything else is the responsibility of the caller. Calls
/// block for the transport's round-trip latency.
pub trait DapAccess {
    /// Read a 32-bit register at `addr` on the given access port.
    fn read_raw_ap_register(&mut self, ap: ApAddress, addr: u8) -> Result<u32, ArmError>;

    /// Write a 32-bit register at `addr` on the given access port.
    fn write_raw_ap_register(&mut self, ap: ApAddress, addr: u8, value: u32)
        -> Result<(), ArmError>;
}

/// The debug probe as seen by the bring-up core: raw AP register access
/// plus per-AP memory interfaces.
pub trait ArmProbeInterface: DapAccess {
    /// Returns a memory interface that performs its accesses through the
    /// given access port.
    fn memory_interface(
        &mut self,
        ap: ApAddress,
    ) -> Result<Box<dyn memory::ArmMemoryInterface>, ArmError>;
}
