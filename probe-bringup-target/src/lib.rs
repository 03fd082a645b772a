//! Target description schema
//!
//! Bringing up a debug session requires some static knowledge about the
//! target: the layout of its address space, which regions are backed by
//! non-volatile memory, and the flash algorithm that can be loaded to
//! operate on those regions. This crate contains the schema structs for
//! that description, suitable for loading from YAML target description
//! files.
#![warn(missing_docs)]

mod flash_algorithm;
mod flash_properties;
mod memory;
pub(crate) mod serialize;

pub use flash_algorithm::RawFlashAlgorithm;
pub use flash_properties::FlashProperties;
pub use memory::{
    GenericRegion, MemoryAccess, MemoryMap, MemoryRange, MemoryRegion, NvmRegion, RamRegion,
    SectorDescription,
};
