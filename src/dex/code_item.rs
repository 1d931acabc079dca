//! Code items, try ranges and catch-handler sets.
//!
//! A code_item is laid out as six fixed 16/32-bit fields, the instruction
//! array (16-bit code units), optional 2-byte padding, `tries_size`
//! try_items at 4-byte alignment, and the catch-handler data block. Handler
//! offsets inside try_items are relative to the start of that block.

use crate::dex::dex_file::{DexFile, NO_INDEX_16};
use crate::dex::error::{DexError, DexErrorKind};
use crate::dex::{read_sleb128, read_u2, read_u4, read_uleb128};

pub const TRY_ITEM_SIZE: usize = 8;

/// Decoded fixed header of a code_item. The instruction array and exception
/// tables stay in the region and are read through `DexFile` accessors.
#[derive(Debug, Clone, Copy)]
pub struct CodeItem {
    pub offset: u32,
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub tries_size: u16,
    pub debug_info_off: u32,
    pub insns_size_in_code_units: u32,
    insns_off: usize,
}

impl CodeItem
{
    /// Offset of the first code unit.
    pub fn insns_off(&self) -> usize
    {
        self.insns_off
    }

    /// Offset just past the last code unit, rounded up to the 4-byte
    /// alignment where try_items begin.
    fn tries_off(&self) -> usize
    {
        let insns_end = self.insns_off + self.insns_size_in_code_units as usize * 2;
        (insns_end + 3) & !3
    }

    /// Offset of the catch-handler data block.
    fn handlers_off(&self) -> usize
    {
        self.tries_off() + self.tries_size as usize * TRY_ITEM_SIZE
    }
}

/// One try_item: a range of code units with attached handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler_off: u16,
}

impl TryItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TryItem, DexError>
    {
        Ok(TryItem {
            start_addr: read_u4(bytes, ix)?,
            insn_count: read_u2(bytes, ix)?,
            handler_off: read_u2(bytes, ix)?,
        })
    }
}

/// Walks one encoded_catch_handler set.
///
/// The set begins with a signed LEB128 size: positive for N typed handlers,
/// negative for |N| typed handlers followed by a catch-all. The catch-all
/// reports `NO_INDEX_16` as its type index.
pub struct CatchHandlerIterator<'a> {
    bytes: &'a [u8],
    ix: usize,
    remaining_count: i32,
    catch_all: bool,
    handler_type_idx: u16,
    handler_address: u32,
}

impl<'a> CatchHandlerIterator<'a>
{
    pub(crate) fn new(bytes: &'a [u8], offset: usize) -> Result<CatchHandlerIterator<'a>, DexError>
    {
        let mut it = CatchHandlerIterator {
            bytes,
            ix: offset,
            remaining_count: 0,
            catch_all: false,
            handler_type_idx: 0,
            handler_address: 0,
        };
        let size = read_sleb128(bytes, &mut it.ix)?;
        if size <= 0 {
            it.catch_all = true;
            it.remaining_count = -size;
        } else {
            it.remaining_count = size;
        }
        it.next()?;
        Ok(it)
    }

    pub fn has_next(&self) -> bool
    {
        self.remaining_count != -1 || self.catch_all
    }

    /// Loads the next handler: a typed one while any remain, then the
    /// catch-all if present. Past the end this parks `remaining_count` at
    /// -1 and reads nothing.
    pub fn next(&mut self) -> Result<(), DexError>
    {
        if self.remaining_count > 0 {
            self.handler_type_idx = index_u16(read_uleb128(self.bytes, &mut self.ix)?)?;
            self.handler_address = read_uleb128(self.bytes, &mut self.ix)?;
            self.remaining_count -= 1;
            return Ok(());
        }
        if self.catch_all {
            self.handler_type_idx = NO_INDEX_16;
            self.handler_address = read_uleb128(self.bytes, &mut self.ix)?;
            self.catch_all = false;
            return Ok(());
        }
        self.remaining_count = -1;
        Ok(())
    }

    /// Type index of the caught exception; `NO_INDEX_16` for the catch-all.
    pub fn handler_type_idx(&self) -> u16
    {
        self.handler_type_idx
    }

    /// Handler address in code units from the start of the method.
    pub fn handler_address(&self) -> u32
    {
        self.handler_address
    }

    /// Offset just past this handler set. Only meaningful once the set is
    /// exhausted; used to locate the next set in the block.
    pub fn end_offset(&self) -> usize
    {
        debug_assert!(!self.has_next());
        self.ix
    }
}

fn index_u16(value: u32) -> Result<u16, DexError>
{
    u16::try_from(value)
        .map_err(|_| err!(DexErrorKind::MalformedStructure, "handler type index {} exceeds the 16-bit index space", value))
}

impl<'a> DexFile<'a>
{
    /// The code item at `code_off`, or `None` for offset 0 (abstract or
    /// native methods have no code).
    pub fn code_item_at(&self, code_off: u32) -> Result<Option<CodeItem>, DexError>
    {
        if code_off == 0 {
            return Ok(None);
        }
        if code_off % 4 != 0 {
            return Err(self.located(err!(DexErrorKind::MalformedStructure, "code item at offset {} is not 4-byte aligned", code_off)));
        }

        let bytes = self.region().bytes();
        let mut ix = code_off as usize;
        let registers_size = read_u2(bytes, &mut ix).map_err(|e| self.located(e))?;
        let ins_size = read_u2(bytes, &mut ix).map_err(|e| self.located(e))?;
        let outs_size = read_u2(bytes, &mut ix).map_err(|e| self.located(e))?;
        let tries_size = read_u2(bytes, &mut ix).map_err(|e| self.located(e))?;
        let debug_info_off = read_u4(bytes, &mut ix).map_err(|e| self.located(e))?;
        let insns_size_in_code_units = read_u4(bytes, &mut ix).map_err(|e| self.located(e))?;

        let code = CodeItem {
            offset: code_off,
            registers_size,
            ins_size,
            outs_size,
            tries_size,
            debug_info_off,
            insns_size_in_code_units,
            insns_off: ix,
        };

        // The instruction array and any try_items must fit in the region.
        self.region().slice(code.insns_off, code.insns_size_in_code_units as usize * 2).map_err(|e| self.located(e))?;
        if code.tries_size > 0 {
            self.region()
                .slice(code.tries_off(), code.tries_size as usize * TRY_ITEM_SIZE)
                .map_err(|e| self.located(e))?;
        }
        Ok(Some(code))
    }

    /// The raw instruction array of a code item, two bytes per code unit.
    pub fn insns(&self, code: &CodeItem) -> Result<&'a [u8], DexError>
    {
        self.region()
            .slice(code.insns_off, code.insns_size_in_code_units as usize * 2)
            .map_err(|e| self.located(e))
    }

    pub fn try_item(&self, code: &CodeItem, idx: u16) -> Result<TryItem, DexError>
    {
        if idx >= code.tries_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "try item index {} out of range ({} entries)", idx, code.tries_size
            )));
        }
        let mut ix = code.tries_off() + idx as usize * TRY_ITEM_SIZE;
        TryItem::read(self.region().bytes(), &mut ix).map_err(|e| self.located(e))
    }

    /// Scans the try_items of a code item for the one covering `address`
    /// and returns its handler offset, or `None` when the address is not
    /// inside any try range. Ranges never overlap, so at most one matches.
    pub fn find_catch_handler_offset(&self, code: &CodeItem, address: u32) -> Result<Option<u32>, DexError>
    {
        for i in 0..code.tries_size
        {
            let item = self.try_item(code, i)?;
            if address >= item.start_addr && address < item.start_addr + item.insn_count as u32 {
                return Ok(Some(item.handler_off as u32));
            }
        }
        Ok(None)
    }

    /// Iterates the catch-handler set at `handler_off` within the handler
    /// data block of a code item.
    pub fn catch_handlers_at(&self, code: &CodeItem, handler_off: u32) -> Result<CatchHandlerIterator<'a>, DexError>
    {
        let offset = code.handlers_off() + handler_off as usize;
        if offset >= self.region().len() {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "catch handler data at offset {} outside region of {} bytes", offset, self.region().len()
            )));
        }
        CatchHandlerIterator::new(self.region().bytes(), offset).map_err(|e| self.located(e))
    }

    /// Convenience: the handlers covering `address`, or `None` when no try
    /// range contains it.
    pub fn catch_handlers_for_address(&self, code: &CodeItem, address: u32) -> Result<Option<CatchHandlerIterator<'a>>, DexError>
    {
        match self.find_catch_handler_offset(code, address)?
        {
            Some(off) => self.catch_handlers_at(code, off).map(Some),
            None => Ok(None),
        }
    }
}
