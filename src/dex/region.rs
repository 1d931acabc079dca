//! The read-only byte range a container is parsed out of.
//!
//! A `Region` is the only raw input the reader ever touches: a borrowed
//! contiguous range plus a location label (typically the file name) that is
//! attached to every structural failure. How the bytes came to exist - a
//! file mapping, an archive entry, a test vector - is the caller's concern.

use crate::dex::error::{DexError, DexErrorKind};

#[derive(Debug)]
pub struct Region<'a>
{
    bytes: &'a [u8],
    location: String,
}

impl<'a> Region<'a>
{
    pub fn new(bytes: &'a [u8], location: &str) -> Region<'a>
    {
        Region { bytes, location: location.to_string() }
    }

    pub fn bytes(&self) -> &'a [u8]
    {
        self.bytes
    }

    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    pub fn location(&self) -> &str
    {
        &self.location
    }

    /// Borrows `len` bytes starting at `off`, or fails if any part of the
    /// range falls outside the region.
    pub fn slice(&self, off: usize, len: usize) -> Result<&'a [u8], DexError>
    {
        match off.checked_add(len)
        {
            Some(end) if end <= self.bytes.len() => Ok(&self.bytes[off..end]),
            _ => Err(err!(
                DexErrorKind::MalformedStructure,
                "range [{}, {}+{}) outside region of {} bytes", off, off, len, self.bytes.len()
            )),
        }
    }

    /// Borrows everything from `off` to the end of the region.
    pub fn slice_from(&self, off: usize) -> Result<&'a [u8], DexError>
    {
        if off > self.bytes.len()
        {
            fail!(DexErrorKind::MalformedStructure, "offset {} outside region of {} bytes", off, self.bytes.len());
        }
        Ok(&self.bytes[off..])
    }
}
