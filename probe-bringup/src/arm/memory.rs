//! Memory access traits for ARM targets.

use crate::arm::ArmError;

/// The security state a core currently executes in.
///
/// On this family the state decides which physical alias of a peripheral
/// has to be used for an access to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityState {
    /// The core executes in the secure state.
    Secure,
    /// The core executes in the non-secure state.
    NonSecure,
}

/// An interface to be implemented by drivers that allow raw target memory
/// access through an access port.
///
/// Accesses are addressed in the core's current security state. All calls
/// are blocking I/O over the physical transport.
pub trait ArmMemoryInterface {
    /// Read a block of 8-bit words at `address`.
    fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError>;

    /// Read a block of 32-bit words at `address` in the target's endianness.
    ///
    /// The address has to be a multiple of 4.
    fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError>;

    /// Write a block of 8-bit words at `address`.
    fn write_8(&mut self, address: u64, data: &[u8]) -> Result<(), ArmError>;

    /// Write a block of 32-bit words at `address` in the target's endianness.
    ///
    /// The address has to be a multiple of 4.
    fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError>;

    /// Read a 32-bit word at `address`.
    fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
        let mut word = 0;
        self.read_32(address, std::slice::from_mut(&mut word))?;
        Ok(word)
    }

    /// Write a 32-bit word at `address`.
    fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
        self.write_32(address, std::slice::from_ref(&data))
    }

    /// Flush any pending transactions to the target.
    fn flush(&mut self) -> Result<(), ArmError>;

    /// The security state the next accesses will be performed in.
    fn security_state(&mut self) -> Result<SecurityState, ArmError>;
}
