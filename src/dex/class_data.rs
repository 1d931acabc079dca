//! Iteration over the LEB128-packed class_data_item.
//!
//! The stream is four unsigned LEB128 counts (static fields, instance
//! fields, direct methods, virtual methods) followed by four delta-encoded
//! member arrays. Member indices are deltas against the previous entry of
//! the same array, so the iterator keeps the running index itself.

use crate::dex::code_item::CodeItem;
use crate::dex::dex_file::{ClassDefItem, DexFile};
use crate::dex::error::{DexError, DexErrorKind};
use crate::dex::read_uleb128;

#[derive(Debug, Default, Clone, Copy)]
struct ClassDataField {
    field_idx_delta: u32,
    access_flags: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct ClassDataMethod {
    method_idx_delta: u32,
    access_flags: u32,
    code_off: u32,
}

/// Streams the members of one class out of its class_data_item.
///
/// The four sub-arrays are visited in file order; `member_index()` always
/// holds the absolute index of the current entry within its id pool.
#[derive(Debug)]
pub struct ClassDataIterator<'d, 'a> {
    dex: &'d DexFile<'a>,
    ix: usize,
    pos: u32,
    last_idx: u32,
    static_fields_size: u32,
    instance_fields_size: u32,
    direct_methods_size: u32,
    virtual_methods_size: u32,
    field: ClassDataField,
    method: ClassDataMethod,
}

impl<'d, 'a> ClassDataIterator<'d, 'a>
{
    /// Starts decoding at `class_data_off`. Reads the four counts and, when
    /// the class has any members, the first entry.
    pub fn new(dex: &'d DexFile<'a>, class_data_off: u32) -> Result<ClassDataIterator<'d, 'a>, DexError>
    {
        let bytes = dex.region().bytes();
        if class_data_off as usize >= bytes.len() {
            return Err(dex.located(err!(
                DexErrorKind::MalformedStructure,
                "class data offset {} outside region of {} bytes", class_data_off, bytes.len()
            )));
        }

        let mut ix = class_data_off as usize;
        let static_fields_size = read_uleb128(bytes, &mut ix).map_err(|e| dex.located(e))?;
        let instance_fields_size = read_uleb128(bytes, &mut ix).map_err(|e| dex.located(e))?;
        let direct_methods_size = read_uleb128(bytes, &mut ix).map_err(|e| dex.located(e))?;
        let virtual_methods_size = read_uleb128(bytes, &mut ix).map_err(|e| dex.located(e))?;

        let mut it = ClassDataIterator {
            dex,
            ix,
            pos: 0,
            last_idx: 0,
            static_fields_size,
            instance_fields_size,
            direct_methods_size,
            virtual_methods_size,
            field: ClassDataField::default(),
            method: ClassDataMethod::default(),
        };
        if it.end_of_instance_fields_pos() > 0 {
            it.read_field()?;
        } else if it.end_of_virtual_methods_pos() > 0 {
            it.read_method()?;
        }
        Ok(it)
    }

    pub fn num_static_fields(&self) -> u32
    {
        self.static_fields_size
    }

    pub fn num_instance_fields(&self) -> u32
    {
        self.instance_fields_size
    }

    pub fn num_direct_methods(&self) -> u32
    {
        self.direct_methods_size
    }

    pub fn num_virtual_methods(&self) -> u32
    {
        self.virtual_methods_size
    }

    fn end_of_static_fields_pos(&self) -> u32
    {
        self.static_fields_size
    }

    fn end_of_instance_fields_pos(&self) -> u32
    {
        self.end_of_static_fields_pos() + self.instance_fields_size
    }

    fn end_of_direct_methods_pos(&self) -> u32
    {
        self.end_of_instance_fields_pos() + self.direct_methods_size
    }

    fn end_of_virtual_methods_pos(&self) -> u32
    {
        self.end_of_direct_methods_pos() + self.virtual_methods_size
    }

    pub fn has_next_static_field(&self) -> bool
    {
        self.pos < self.end_of_static_fields_pos()
    }

    pub fn has_next_instance_field(&self) -> bool
    {
        self.pos >= self.end_of_static_fields_pos() && self.pos < self.end_of_instance_fields_pos()
    }

    pub fn has_next_direct_method(&self) -> bool
    {
        self.pos >= self.end_of_instance_fields_pos() && self.pos < self.end_of_direct_methods_pos()
    }

    pub fn has_next_virtual_method(&self) -> bool
    {
        self.pos >= self.end_of_direct_methods_pos() && self.pos < self.end_of_virtual_methods_pos()
    }

    pub fn has_next(&self) -> bool
    {
        self.pos < self.end_of_virtual_methods_pos()
    }

    /// Advances to the next member. `last_idx` resets to zero whenever the
    /// stream crosses into a non-empty sub-array, so the delta chains of
    /// the four arrays stay independent.
    pub fn next(&mut self) -> Result<(), DexError>
    {
        self.pos += 1;
        if self.pos < self.end_of_static_fields_pos() {
            self.last_idx = self.member_index();
            self.read_field()?;
        } else if self.pos == self.end_of_static_fields_pos() && self.instance_fields_size > 0 {
            self.last_idx = 0;
            self.read_field()?;
        } else if self.pos < self.end_of_instance_fields_pos() {
            self.last_idx = self.member_index();
            self.read_field()?;
        } else if self.pos == self.end_of_instance_fields_pos() && self.direct_methods_size > 0 {
            self.last_idx = 0;
            self.read_method()?;
        } else if self.pos < self.end_of_direct_methods_pos() {
            self.last_idx = self.member_index();
            self.read_method()?;
        } else if self.pos == self.end_of_direct_methods_pos() && self.virtual_methods_size > 0 {
            self.last_idx = 0;
            self.read_method()?;
        } else if self.pos < self.end_of_virtual_methods_pos() {
            self.last_idx = self.member_index();
            self.read_method()?;
        }
        Ok(())
    }

    /// Absolute index of the current member within the field or method pool.
    pub fn member_index(&self) -> u32
    {
        if self.pos < self.end_of_instance_fields_pos() {
            self.last_idx + self.field.field_idx_delta
        } else {
            self.last_idx + self.method.method_idx_delta
        }
    }

    pub fn member_access_flags(&self) -> u32
    {
        if self.pos < self.end_of_instance_fields_pos() {
            self.field.access_flags
        } else {
            self.method.access_flags
        }
    }

    /// Code item offset of the current method; 0 for abstract or native.
    pub fn method_code_offset(&self) -> u32
    {
        self.method.code_off
    }

    /// The code item of the current method, or `None` for abstract/native.
    pub fn method_code_item(&self) -> Result<Option<CodeItem>, DexError>
    {
        self.dex.code_item_at(self.method.code_off)
    }

    /// Absolute offset of the next unread byte of the stream. After the
    /// iterator is exhausted this is the end of the class_data_item.
    pub fn byte_offset(&self) -> usize
    {
        self.ix
    }

    fn read_field(&mut self) -> Result<(), DexError>
    {
        let bytes = self.dex.region().bytes();
        self.field.field_idx_delta = read_uleb128(bytes, &mut self.ix).map_err(|e| self.dex.located(e))?;
        self.field.access_flags = read_uleb128(bytes, &mut self.ix).map_err(|e| self.dex.located(e))?;
        Ok(())
    }

    fn read_method(&mut self) -> Result<(), DexError>
    {
        let bytes = self.dex.region().bytes();
        self.method.method_idx_delta = read_uleb128(bytes, &mut self.ix).map_err(|e| self.dex.located(e))?;
        self.method.access_flags = read_uleb128(bytes, &mut self.ix).map_err(|e| self.dex.located(e))?;
        self.method.code_off = read_uleb128(bytes, &mut self.ix).map_err(|e| self.dex.located(e))?;
        Ok(())
    }
}

impl<'a> DexFile<'a>
{
    /// Iterates the members of a class, or `None` when the class declares
    /// no class data (no fields or methods at all).
    pub fn class_data<'d>(&'d self, def: &ClassDefItem) -> Result<Option<ClassDataIterator<'d, 'a>>, DexError>
    {
        if def.class_data_off == 0 {
            return Ok(None);
        }
        ClassDataIterator::new(self, def.class_data_off).map(Some)
    }
}
