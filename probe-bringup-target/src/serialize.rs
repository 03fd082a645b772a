//! Serializers that render addresses as hex strings in human-readable
//! formats while keeping compact integers in binary ones.

use serde::{self, ser::SerializeStruct, Serializer};
use std::ops::Range;

pub(crate) fn hex_range<S>(memory_range: &Range<u64>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let human_readable = serializer.is_human_readable();
    let mut state = serializer.serialize_struct("Range", 2)?;
    if human_readable {
        state.serialize_field("start", format!("{:#x}", memory_range.start).as_str())?;
        state.serialize_field("end", format!("{:#x}", memory_range.end).as_str())?;
    } else {
        state.serialize_field("start", &memory_range.start)?;
        state.serialize_field("end", &memory_range.end)?;
    }
    state.end()
}

pub(crate) fn hex_u_int<T, S>(memory_address: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: std::fmt::LowerHex + SerializeUnsignedInt,
{
    if serializer.is_human_readable() {
        serializer.serialize_str(format!("{memory_address:#x}").as_str())
    } else {
        memory_address.serialize_int(serializer)
    }
}

/// Constrains hex serialization to unsigned integers while staying generic
/// over their width.
pub(crate) trait SerializeUnsignedInt {
    fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer;
}

impl SerializeUnsignedInt for u8 {
    fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(*self)
    }
}

impl SerializeUnsignedInt for u32 {
    fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(*self)
    }
}

impl SerializeUnsignedInt for u64 {
    fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(*self)
    }
}
