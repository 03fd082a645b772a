//! # Bring-up and reset management for LPC55xx-class targets
//!
//! This crate brings the debug access logic of a multi-core microcontroller
//! into a known state after power-on or reset, and lets a core be halted
//! precisely at a deterministic instruction regardless of whether the
//! device's flash has been erased.
//!
//! The pieces fit together like this:
//!
//! - [`sequencer`] holds the composable bring-up pipeline: an ordered set
//!   of named steps that chip families customize with structural edits
//!   instead of forking the whole procedure.
//! - [`session`] owns the per-target state (probe handle, discovered access
//!   ports, created cores) and provides the generic base bring-up sequence.
//! - [`vendor::nxp::Lpc55xx`] is the family implementation: debug mailbox
//!   resynchronization, flash-erase-aware memory reads, the
//!   breakpoint-or-watchpoint reset catch and the reset sequencer.
//! - [`arm`] contains the consumed interface boundaries (AP register
//!   client, raw memory access, breakpoint manager) and the Cortex-M debug
//!   register definitions.
//!
//! The physical probe transport and the DP/AP wire encoding live behind
//! [`arm::ArmProbeInterface`]; this crate never talks USB or SWD itself.
#![warn(missing_docs)]

pub mod arm;
mod error;
pub mod event;
pub mod sequencer;
pub mod session;
pub mod vendor;

#[cfg(test)]
pub(crate) mod test;

pub use error::Error;
pub use probe_bringup_target::{MemoryMap, MemoryRegion};
