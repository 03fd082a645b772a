use crate::flash_algorithm::RawFlashAlgorithm;
use crate::serialize::{hex_range, hex_u_int};
use serde::{Deserialize, Serialize};
use std::ops::Range;

fn default_true() -> bool {
    true
}

/// Access permissions of a memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryAccess {
    /// True if the region is readable.
    #[serde(default = "default_true")]
    pub read: bool,
    /// True if the region is writable.
    #[serde(default = "default_true")]
    pub write: bool,
    /// True if the region is executable.
    #[serde(default = "default_true")]
    pub execute: bool,
    /// True if the chip boots from this memory.
    #[serde(default)]
    pub boot: bool,
}

impl Default for MemoryAccess {
    fn default() -> Self {
        MemoryAccess {
            read: true,
            write: true,
            execute: true,
            boot: false,
        }
    }
}

/// Represents a region in RAM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RamRegion {
    /// A name to describe the region.
    pub name: Option<String>,
    /// Address range of the region.
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
    /// Access permissions for the region.
    #[serde(default)]
    pub access: Option<MemoryAccess>,
}

/// Represents a region in non-volatile memory (e.g. flash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NvmRegion {
    /// A name to describe the region.
    pub name: Option<String>,
    /// Address range of the region.
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
    /// Access permissions for the region.
    #[serde(default)]
    pub access: Option<MemoryAccess>,
    /// The erase-block size of the region.
    #[serde(serialize_with = "hex_u_int")]
    pub block_size: u32,
    /// The flash algorithm that operates on this region, if any.
    #[serde(default)]
    pub algorithm: Option<RawFlashAlgorithm>,
}

/// Represents a generic region, which is neither RAM nor non-volatile
/// memory (e.g. a peripheral address range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericRegion {
    /// A name to describe the region.
    pub name: Option<String>,
    /// Address range of the region.
    #[serde(serialize_with = "hex_range")]
    pub range: Range<u64>,
    /// Access permissions for the region.
    #[serde(default)]
    pub access: Option<MemoryAccess>,
}

/// Information about a group of flash sectors.
///
/// Starting at `address` (relative to the start of the flash), all
/// following sectors have a size of `size`, until another
/// `SectorDescription` changes the sector size or the flash ends.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorDescription {
    /// Size of each individual flash sector.
    #[serde(serialize_with = "hex_u_int")]
    pub size: u64,
    /// Start address of the group of flash sectors, relative
    /// to the start address of the flash.
    #[serde(serialize_with = "hex_u_int")]
    pub address: u64,
}

/// Declares the type of a memory region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemoryRegion {
    /// Memory region describing RAM.
    Ram(RamRegion),
    /// Generic memory region, which is neither flash nor RAM.
    Generic(GenericRegion),
    /// Memory region describing flash or other non-volatile memory.
    #[serde(alias = "Flash")]
    Nvm(NvmRegion),
}

impl MemoryRegion {
    /// Returns the NVM region if this is an NVM region, otherwise None.
    pub fn as_nvm_region(&self) -> Option<&NvmRegion> {
        match self {
            MemoryRegion::Nvm(region) => Some(region),
            _ => None,
        }
    }

    /// Returns the address range of the memory region.
    pub fn address_range(&self) -> Range<u64> {
        match self {
            MemoryRegion::Ram(rr) => rr.range.clone(),
            MemoryRegion::Generic(gr) => gr.range.clone(),
            MemoryRegion::Nvm(nr) => nr.range.clone(),
        }
    }

    /// Returns whether the memory region contains the given address.
    pub fn contains(&self, address: u64) -> bool {
        self.address_range().contains(&address)
    }

    /// Returns whether the region fully contains `length` bytes starting
    /// at `address`.
    pub fn contains_range(&self, address: u64, length: usize) -> bool {
        self.address_range()
            .contains_range(&(address..address + length as u64))
    }

    /// Returns `true` if the memory region is [`Nvm`].
    ///
    /// [`Nvm`]: MemoryRegion::Nvm
    #[must_use]
    pub fn is_nvm(&self) -> bool {
        matches!(self, Self::Nvm(..))
    }
}

/// The memory map of a target: a set of non-overlapping regions which
/// collectively describe the addressable space.
///
/// The map is part of the static target description. It is built once and
/// treated as read-only by all bring-up and reset operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMap(Vec<MemoryRegion>);

impl MemoryMap {
    /// Creates a memory map from a list of regions.
    pub fn new(regions: Vec<MemoryRegion>) -> Self {
        MemoryMap(regions)
    }

    /// Returns the region which contains the given address, if any.
    pub fn region_for_address(&self, address: u64) -> Option<&MemoryRegion> {
        self.0.iter().find(|region| region.contains(address))
    }

    /// All regions of the map, in declaration order.
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.0
    }
}

/// Enables the user to do range intersection testing.
pub trait MemoryRange {
    /// Returns true if `self` contains `range` fully.
    fn contains_range(&self, range: &Range<u64>) -> bool;

    /// Returns true if `self` intersects `range` partially.
    fn intersects_range(&self, range: &Range<u64>) -> bool;
}

impl MemoryRange for Range<u64> {
    fn contains_range(&self, range: &Range<u64>) -> bool {
        if range.end == 0 {
            false
        } else {
            self.contains(&range.start) && self.contains(&(range.end - 1))
        }
    }

    fn intersects_range(&self, range: &Range<u64>) -> bool {
        if range.end == 0 {
            false
        } else {
            self.contains(&range.start) && !self.contains(&(range.end - 1))
                || !self.contains(&range.start) && self.contains(&(range.end - 1))
                || self.contains_range(range)
                || range.contains_range(self)
        }
    }
}
