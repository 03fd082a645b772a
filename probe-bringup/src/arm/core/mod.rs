//! Core state and the operations shared by all cores of a session.

pub mod armv8m;

use std::sync::{Arc, Mutex};

use probe_bringup_target::MemoryMap;

use crate::arm::armv8m::{Aircr, Dhcsr};
use crate::arm::breakpoints::BreakpointManager;
use crate::arm::memory::ArmMemoryInterface;
use crate::arm::{ApAddress, ArmError};

/// A memory mapped register, for simple debug register access.
pub trait MemoryMappedRegister: Clone + From<u32> + Into<u32> + Sized + std::fmt::Debug {
    /// The register's address in the target memory.
    const ADDRESS: u64;
    /// The register's name.
    const NAME: &'static str;
}

/// The reset mechanism a core uses when a reset is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetType {
    /// Request a system-wide reset via AIRCR.SYSRESETREQ.
    #[default]
    SysResetReq,
    /// Request a local core reset via AIRCR.VECTRESET.
    ///
    /// Only meaningful while the core is halted in Debug state.
    VectReset,
}

/// The halt strategy that was armed for the next reset.
///
/// Selected once per reset-catch activation and cleared on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetCatchMode {
    /// No catch is armed.
    #[default]
    None,
    /// A hardware breakpoint comparator is armed on the reset vector.
    Breakpoint,
    /// A data watchpoint is armed on the boot ROM completion sentinel.
    Watchpoint,
}

/// Transient reset-catch bookkeeping, recomputed on every activation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ResetCatchState {
    pub(crate) mode: ResetCatchMode,
    pub(crate) saved_demcr: Option<u32>,
    pub(crate) delegate_handled: bool,
}

/// Family or board specific override hooks.
///
/// Each hook returns whether it fully handled the operation; the default
/// implementations report "not handled", which is also the behavior when no
/// delegate is registered at all.
pub trait CoreDelegate: Send + Sync {
    /// Called before the reset mechanism is asserted. Returning `true`
    /// means the delegate performed the reset itself.
    fn will_reset(&self, core: &mut Core) -> Result<bool, ArmError> {
        let _ = core;
        Ok(false)
    }

    /// Called after the core has been halted following a reset.
    fn did_reset(&self, core: &mut Core) -> Result<(), ArmError> {
        let _ = core;
        Ok(())
    }

    /// Called when a reset catch is being armed. Returning `true` means the
    /// delegate armed the catch itself and no hardware is programmed; the
    /// result also suppresses the hardware cleanup on release.
    fn set_reset_catch(&self, core: &mut Core) -> Result<bool, ArmError> {
        let _ = core;
        Ok(false)
    }

    /// Called when a reset catch is being released.
    fn clear_reset_catch(&self, core: &mut Core) -> Result<bool, ArmError> {
        let _ = core;
        Ok(false)
    }

    /// Called when trace capture is being started.
    fn trace_start(&self, core: &mut Core) -> Result<bool, ArmError> {
        let _ = core;
        Ok(false)
    }
}

/// A single CPU of the target, backed by one access port.
///
/// Cores are created during the bring-up pipeline and persist for the
/// session. The run token increments on every reset so that state cached
/// elsewhere (register caches, unwind state) can be invalidated.
pub struct Core {
    id: usize,
    ap: ApAddress,
    memory: Box<dyn ArmMemoryInterface>,
    breakpoints: Arc<Mutex<dyn BreakpointManager>>,
    memory_map: Arc<MemoryMap>,
    run_token: u32,
    default_reset_type: ResetType,
    pub(crate) reset_catch: ResetCatchState,
    pub(crate) flash_erased: bool,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("id", &self.id)
            .field("ap", &self.ap)
            .field("run_token", &self.run_token)
            .field("reset_catch", &self.reset_catch)
            .field("flash_erased", &self.flash_erased)
            .finish_non_exhaustive()
    }
}

impl Core {
    /// Creates a core on top of the given memory interface.
    pub fn new(
        id: usize,
        ap: ApAddress,
        memory: Box<dyn ArmMemoryInterface>,
        breakpoints: Arc<Mutex<dyn BreakpointManager>>,
        memory_map: Arc<MemoryMap>,
        default_reset_type: ResetType,
    ) -> Self {
        Core {
            id,
            ap,
            memory,
            breakpoints,
            memory_map,
            run_token: 0,
            default_reset_type,
            reset_catch: ResetCatchState::default(),
            // Assume the worst until a reset catch has probed the flash.
            flash_erased: true,
        }
    }

    /// The index of this core within the session.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The access port this core is reached through.
    pub fn ap(&self) -> ApAddress {
        self.ap
    }

    /// Monotonically increasing token, incremented on every reset.
    pub fn run_token(&self) -> u32 {
        self.run_token
    }

    pub(crate) fn bump_run_token(&mut self) {
        self.run_token = self.run_token.wrapping_add(1);
    }

    /// Whether the last reset-catch probe found the flash erased.
    pub fn flash_erased(&self) -> bool {
        self.flash_erased
    }

    /// The halt strategy currently armed for the next reset.
    pub fn reset_catch_mode(&self) -> ResetCatchMode {
        self.reset_catch.mode
    }

    /// The reset mechanism used when no delegate takes over the reset.
    pub fn default_reset_type(&self) -> ResetType {
        self.default_reset_type
    }

    /// The shared memory map of the target.
    pub fn memory_map(&self) -> Arc<MemoryMap> {
        self.memory_map.clone()
    }

    /// The breakpoint and watchpoint manager of this core.
    pub fn breakpoints(&self) -> Arc<Mutex<dyn BreakpointManager>> {
        self.breakpoints.clone()
    }

    /// Halt the core.
    pub fn halt(&mut self) -> Result<(), ArmError> {
        let mut dhcsr = Dhcsr(0);
        dhcsr.set_c_halt(true);
        dhcsr.set_c_debugen(true);
        dhcsr.enable_write();
        self.memory.write_word_32(Dhcsr::ADDRESS, dhcsr.into())?;
        self.memory.flush()
    }

    /// Assert the configured reset mechanism via AIRCR.
    ///
    /// Errors are ignored: the reset tears down the very transfer that
    /// requested it, so a failed response does not mean a failed reset.
    pub fn request_reset(&mut self) {
        let mut aircr = Aircr(0);
        aircr.vectkey();
        match self.default_reset_type {
            ResetType::SysResetReq => aircr.set_sysresetreq(true),
            ResetType::VectReset => aircr.set_vectreset(true),
        }
        self.memory.write_word_32(Aircr::ADDRESS, aircr.into()).ok();
        self.memory.flush().ok();
    }

    /// Read a 32-bit word at `address`.
    pub fn read_word_32(&mut self, address: u64) -> Result<u32, ArmError> {
        self.memory.read_word_32(address)
    }

    /// Write a 32-bit word at `address`.
    pub fn write_word_32(&mut self, address: u64, data: u32) -> Result<(), ArmError> {
        self.memory.write_word_32(address, data)
    }

    /// Read a block of bytes at `address`.
    pub fn read_8(&mut self, address: u64, data: &mut [u8]) -> Result<(), ArmError> {
        self.memory.read_8(address, data)
    }

    /// Read a block of 32-bit words at `address`.
    pub fn read_32(&mut self, address: u64, data: &mut [u32]) -> Result<(), ArmError> {
        self.memory.read_32(address, data)
    }

    /// Write a block of 32-bit words at `address`.
    pub fn write_32(&mut self, address: u64, data: &[u32]) -> Result<(), ArmError> {
        self.memory.write_32(address, data)
    }

    /// Flush pending transactions to the target.
    pub fn flush(&mut self) -> Result<(), ArmError> {
        self.memory.flush()
    }
}
