#[macro_use]
pub mod error;

pub mod bit_memory;
pub mod bit_reader;
pub mod bit_table;
pub mod code_info;
pub mod memory;
pub mod method_header;
pub mod stack_map;
pub mod version;

use crate::art::error::{ArtError, ErrorKind};

// Little-endian fixed-width reads. Sizes are in bytes, as in the dex format
// naming (u1, u2, u4, u8).
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, ArtError>
{
    if bytes.len() < *ix + 1
    {
        fail!(Truncated, "Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, ArtError>
{
    if bytes.len() < *ix + 2
    {
        fail!(Truncated, "Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, ArtError>
{
    if bytes.len() < *ix + 4
    {
        fail!(Truncated, "Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result =
        ((bytes[*ix + 3] as u32) << 24) | ((bytes[*ix + 2] as u32) << 16) | ((bytes[*ix + 1] as u32) << 8) | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_u8(bytes: &[u8], ix: &mut usize) -> Result<u64, ArtError>
{
    let low = read_u4(bytes, ix)? as u64;
    let high = read_u4(bytes, ix)? as u64;
    Ok((high << 32) | low)
}
