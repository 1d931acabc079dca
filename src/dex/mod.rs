#[macro_use]
pub mod error;

pub mod annotations;
pub mod class_data;
pub mod code_item;
pub mod debug_info;
pub mod dex_file;
pub mod encoded_values;
pub(crate) mod leb;
pub mod region;

use crate::dex::error::{DexError, DexErrorKind};
use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1};

// Basic little-endian reads over a byte cursor. Every helper checks the
// remaining length before touching the slice.
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!(DexErrorKind::MalformedStructure, "unexpected end of region reading u1 at offset {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!(DexErrorKind::MalformedStructure, "unexpected end of region reading u2 at offset {}", *ix);
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!(DexErrorKind::MalformedStructure, "unexpected end of region reading u4 at offset {}", *ix);
    }
    let result =
        ((bytes[*ix + 3] as u32) << 24) | ((bytes[*ix + 2] as u32) << 16) | ((bytes[*ix + 1] as u32) << 8) | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    let (val, size) = decode_uleb128(&bytes[(*ix).min(bytes.len())..])?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    let (val, size) = decode_sleb128(&bytes[(*ix).min(bytes.len())..])?;
    *ix += size;
    Ok(val)
}

/// Reads a ULEB128p1. The encoded value 0 comes back as `NO_INDEX`, which is
/// how "no entry" is spelled in every slot that uses this encoding.
pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    let (val, size) = decode_uleb128p1(&bytes[(*ix).min(bytes.len())..])?;
    *ix += size;
    Ok(val)
}

/// Borrows `length` bytes at the cursor without copying.
pub(crate) fn read_x<'a>(bytes: &'a [u8], ix: &mut usize, length: usize) -> Result<&'a [u8], DexError>
{
    if bytes.len() - (*ix).min(bytes.len()) >= length
    {
        let slice = &bytes[*ix..*ix + length];
        *ix += length;
        Ok(slice)
    }
    else
    {
        Err(DexError::new(
            DexErrorKind::MalformedStructure,
            "region too short for array read",
        ))
    }
}
