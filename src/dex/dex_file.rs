/* Dex container header, identifier pools and semantic lookups */

use std::borrow::Cow;
use std::collections::HashMap;

use log::{debug, warn};
use once_cell::sync::OnceCell;

use crate::dex::error::{DexError, DexErrorKind};
use crate::dex::region::Region;
use crate::dex::{read_u2, read_u4, read_uleb128, read_x};

/* Constants */
pub const DEX_FILE_MAGIC: [u8; 4] = [0x64, 0x65, 0x78, 0x0a]; // "dex\n"
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const NO_INDEX: u32 = 0xffffffff;
pub const NO_INDEX_16: u16 = 0xffff;

pub const HEADER_ITEM_SIZE: usize = 0x70;
pub const STRING_ID_ITEM_SIZE: usize = 4;
pub const TYPE_ID_ITEM_SIZE: usize = 4;
pub const PROTO_ID_ITEM_SIZE: usize = 12;
pub const FIELD_ID_ITEM_SIZE: usize = 8;
pub const METHOD_ID_ITEM_SIZE: usize = 8;
pub const CLASS_DEF_ITEM_SIZE: usize = 32;

/* Access flags */
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_PROTECTED: u32 = 0x4;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_SYNCHRONIZED: u32 = 0x20;
pub const ACC_VOLATILE: u32 = 0x40;
pub const ACC_BRIDGE: u32 = 0x40;
pub const ACC_TRANSIENT: u32 = 0x80;
pub const ACC_VARARGS: u32 = 0x80;
pub const ACC_NATIVE: u32 = 0x100;
pub const ACC_INTERFACE: u32 = 0x200;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_STRICT: u32 = 0x800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;
pub const ACC_DECLARED_SYNCHRONIZED: u32 = 0x20000;

#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError>
    {
        if bytes.len() < HEADER_ITEM_SIZE {
            fail!(DexErrorKind::MalformedHeader, "region of {} bytes is too small for a header", bytes.len());
        }

        let magic = <[u8; 8]>::try_from(read_x(bytes, ix, 8)?).unwrap();
        if magic[0..4] != DEX_FILE_MAGIC {
            fail!(DexErrorKind::MalformedHeader, "invalid magic value {:02x?}", &magic[0..4]);
        }
        if !magic[4].is_ascii_digit() || !magic[5].is_ascii_digit() || !magic[6].is_ascii_digit() || magic[7] != 0 {
            fail!(DexErrorKind::MalformedHeader, "invalid version in magic {:02x?}", &magic[4..8]);
        }

        let header = Header {
            magic,
            checksum: read_u4(bytes, ix)?,
            signature: <[u8; 20]>::try_from(read_x(bytes, ix, 20)?).unwrap(),
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        };

        if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
            fail!(DexErrorKind::MalformedHeader, "byte-swapped containers are not supported");
        }
        if header.endian_tag != ENDIAN_CONSTANT {
            fail!(DexErrorKind::MalformedHeader, "invalid endian tag {:#010x}", header.endian_tag);
        }

        Ok(header)
    }

    /// The numeric container version, e.g. 35 for magic version "035".
    pub fn version(&self) -> u32
    {
        (self.magic[4] - b'0') as u32 * 100 + (self.magic[5] - b'0') as u32 * 10 + (self.magic[6] - b'0') as u32
    }

    /// Checks that every declared section lies fully inside the region.
    pub fn check_bounds(&self, region_len: usize) -> Result<(), DexError>
    {
        if self.file_size as usize > region_len {
            fail!(DexErrorKind::MalformedHeader, "declared file size {} exceeds region of {} bytes", self.file_size, region_len);
        }
        if self.type_ids_size > 65535 {
            fail!(DexErrorKind::MalformedHeader, "{} type ids exceed the 16-bit index space", self.type_ids_size);
        }
        if self.proto_ids_size > 65535 {
            fail!(DexErrorKind::MalformedHeader, "{} proto ids exceed the 16-bit index space", self.proto_ids_size);
        }

        check_section("string_ids", self.string_ids_size, self.string_ids_off, STRING_ID_ITEM_SIZE, region_len)?;
        check_section("type_ids", self.type_ids_size, self.type_ids_off, TYPE_ID_ITEM_SIZE, region_len)?;
        check_section("proto_ids", self.proto_ids_size, self.proto_ids_off, PROTO_ID_ITEM_SIZE, region_len)?;
        check_section("field_ids", self.field_ids_size, self.field_ids_off, FIELD_ID_ITEM_SIZE, region_len)?;
        check_section("method_ids", self.method_ids_size, self.method_ids_off, METHOD_ID_ITEM_SIZE, region_len)?;
        check_section("class_defs", self.class_defs_size, self.class_defs_off, CLASS_DEF_ITEM_SIZE, region_len)?;
        Ok(())
    }
}

fn check_section(name: &str, size: u32, off: u32, stride: usize, region_len: usize) -> Result<(), DexError>
{
    let end = off as u64 + size as u64 * stride as u64;
    if end > region_len as u64 {
        fail!(
            DexErrorKind::MalformedHeader,
            "{} section ({} entries at offset {}) runs past region of {} bytes", name, size, off, region_len
        );
    }
    Ok(())
}

/// string_id_item. `offset` is the absolute position of this record, kept so
/// the record can be turned back into its pool index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringItem {
    pub offset: u32,
    pub string_data_off: u32,
}

impl StringItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<StringItem, DexError>
    {
        let offset = *ix as u32;
        Ok(StringItem { offset, string_data_off: read_u4(bytes, ix)? })
    }
}

/// type_id_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeItem {
    pub offset: u32,
    pub descriptor_idx: u32,
}

impl TypeItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeItem, DexError>
    {
        let offset = *ix as u32;
        Ok(TypeItem { offset, descriptor_idx: read_u4(bytes, ix)? })
    }
}

/// proto_id_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrototypeItem {
    pub offset: u32,
    pub shorty_idx: u32,
    pub return_type_idx: u16,
    pub parameters_off: u32,
}

impl PrototypeItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<PrototypeItem, DexError>
    {
        let offset = *ix as u32;
        let shorty_idx = read_u4(bytes, ix)?;
        let return_type_idx = read_u2(bytes, ix)?;
        let _pad = read_u2(bytes, ix)?;
        let parameters_off = read_u4(bytes, ix)?;
        Ok(PrototypeItem { offset, shorty_idx, return_type_idx, parameters_off })
    }
}

/// field_id_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldItem {
    pub offset: u32,
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

impl FieldItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldItem, DexError>
    {
        let offset = *ix as u32;
        Ok(FieldItem {
            offset,
            class_idx: read_u2(bytes, ix)?,
            type_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

/// method_id_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodItem {
    pub offset: u32,
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

impl MethodItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodItem, DexError>
    {
        let offset = *ix as u32;
        Ok(MethodItem {
            offset,
            class_idx: read_u2(bytes, ix)?,
            proto_idx: read_u2(bytes, ix)?,
            name_idx: read_u4(bytes, ix)?,
        })
    }
}

/// class_def_item. Offsets are absolute; zero means "no such item".
/// `superclass_idx` and `source_file_idx` use the `NO_INDEX` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDefItem {
    pub offset: u32,
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDefItem
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDefItem, DexError>
    {
        let offset = *ix as u32;
        Ok(ClassDefItem {
            offset,
            class_idx: read_u4(bytes, ix)?,
            access_flags: read_u4(bytes, ix)?,
            superclass_idx: read_u4(bytes, ix)?,
            interfaces_off: read_u4(bytes, ix)?,
            source_file_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
            class_data_off: read_u4(bytes, ix)?,
            static_values_off: read_u4(bytes, ix)?,
        })
    }
}

/// A type_list view: a 32-bit count followed by that many 16-bit type
/// indices, 4-byte aligned inside the region.
#[derive(Debug, Clone, Copy)]
pub struct TypeList<'a> {
    entries: &'a [u8],
    size: u32,
}

impl<'a> TypeList<'a>
{
    pub fn size(&self) -> u32
    {
        self.size
    }

    pub fn type_idx(&self, idx: u32) -> Result<u16, DexError>
    {
        if idx >= self.size {
            fail!(DexErrorKind::IndexOutOfRange, "type list index {} out of range ({} entries)", idx, self.size);
        }
        let mut ix = idx as usize * 2;
        read_u2(self.entries, &mut ix)
    }
}

/// Walks a type list, pairing each entry with its resolved descriptor.
/// Also serves as the iterator over a prototype's parameters.
pub struct TypeListIterator<'d, 'a> {
    dex: &'d DexFile<'a>,
    list: Option<TypeList<'a>>,
    size: u32,
    pos: u32,
}

impl<'d, 'a> TypeListIterator<'d, 'a>
{
    pub fn new(dex: &'d DexFile<'a>, list: Option<TypeList<'a>>) -> TypeListIterator<'d, 'a>
    {
        let size = list.as_ref().map_or(0, |l| l.size());
        TypeListIterator { dex, list, size, pos: 0 }
    }

    pub fn has_next(&self) -> bool
    {
        self.pos < self.size
    }

    pub fn next(&mut self)
    {
        self.pos += 1;
    }

    pub fn type_idx(&self) -> Result<u16, DexError>
    {
        match &self.list
        {
            Some(list) => list.type_idx(self.pos),
            None => fail!(DexErrorKind::IndexOutOfRange, "type list iterator has no current entry"),
        }
    }

    pub fn descriptor(&self) -> Result<&'a [u8], DexError>
    {
        self.dex.type_descriptor_by_idx(self.type_idx()? as u32)
    }
}

/// A parsed DEX container: the validated header plus typed views over a
/// single read-only byte region. All accessors borrow from the region; none
/// copy string or code data.
#[derive(Debug)]
pub struct DexFile<'a> {
    region: Region<'a>,
    header: Header,
    class_def_index: OnceCell<HashMap<&'a [u8], u32>>,
}

impl<'a> DexFile<'a>
{
    /// Opens a container over existing memory. No partially constructed
    /// container is ever returned: a malformed header fails here.
    pub fn open(bytes: &'a [u8], location: &str) -> Result<DexFile<'a>, DexError>
    {
        DexFile::from_region(Region::new(bytes, location))
    }

    pub fn from_region(region: Region<'a>) -> Result<DexFile<'a>, DexError>
    {
        let mut ix = 0;
        let header = Header::read(region.bytes(), &mut ix)
            .and_then(|h| h.check_bounds(region.len()).map(|_| h))
            .map_err(|e| DexError::with_context(e, region.location().to_string()))?;

        debug!(
            "opened dex container {} (version {:03}, {} classes)",
            region.location(),
            header.version(),
            header.class_defs_size
        );

        Ok(DexFile { region, header, class_def_index: OnceCell::new() })
    }

    pub fn region(&self) -> &Region<'a>
    {
        &self.region
    }

    pub fn location(&self) -> &str
    {
        self.region.location()
    }

    pub fn header(&self) -> &Header
    {
        &self.header
    }

    pub fn version(&self) -> u32
    {
        self.header.version()
    }

    pub(crate) fn located(&self, e: DexError) -> DexError
    {
        DexError::with_context(e, self.region.location().to_string())
    }

    fn index_in_section(&self, offset: u32, section_off: u32, stride: usize, count: u32, what: &str) -> Result<u32, DexError>
    {
        let rel = (offset as usize).checked_sub(section_off as usize);
        match rel
        {
            Some(rel) if rel % stride == 0 && (rel / stride) < count as usize => Ok((rel / stride) as u32),
            _ => Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "{} record at offset {} lies outside its section", what, offset
            ))),
        }
    }

    /* String pool */

    pub fn num_string_ids(&self) -> u32
    {
        self.header.string_ids_size
    }

    pub fn get_string_id(&self, idx: u32) -> Result<StringItem, DexError>
    {
        if idx >= self.header.string_ids_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "string index {} out of range ({} entries)", idx, self.header.string_ids_size
            )));
        }
        let mut ix = self.header.string_ids_off as usize + idx as usize * STRING_ID_ITEM_SIZE;
        StringItem::read(self.region.bytes(), &mut ix).map_err(|e| self.located(e))
    }

    pub fn index_for_string_id(&self, id: &StringItem) -> Result<u32, DexError>
    {
        self.index_in_section(id.offset, self.header.string_ids_off, STRING_ID_ITEM_SIZE, self.header.string_ids_size, "string_id")
    }

    /// Returns the MUTF-8 bytes behind a string id together with the UTF-16
    /// length declared in front of them. The terminating NUL is excluded.
    pub fn string_data(&self, id: &StringItem) -> Result<(&'a [u8], u32), DexError>
    {
        let bytes = self.region.bytes();
        let mut ix = id.string_data_off as usize;
        if ix >= bytes.len() {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "string data offset {} outside region of {} bytes", ix, bytes.len()
            )));
        }
        let utf16_len = read_uleb128(bytes, &mut ix).map_err(|e| self.located(e))?;
        let terminator = bytes[ix..].iter().position(|&b| b == 0).ok_or_else(|| {
            self.located(err!(DexErrorKind::MalformedStructure, "unterminated string data at offset {}", ix))
        })?;
        Ok((&bytes[ix..ix + terminator], utf16_len))
    }

    pub fn string_data_by_idx(&self, idx: u32) -> Result<(&'a [u8], u32), DexError>
    {
        let id = self.get_string_id(idx)?;
        self.string_data(&id)
    }

    /// Decodes the string behind `idx` out of its MUTF-8 encoding.
    pub fn string_by_idx(&self, idx: u32) -> Result<Cow<'a, str>, DexError>
    {
        let (data, _) = self.string_data_by_idx(idx)?;
        cesu8::from_java_cesu8(data)
            .map_err(|_| self.located(err!(DexErrorKind::MalformedStructure, "string {} is not valid MUTF-8", idx)))
    }

    /// Binary search for a string by its raw MUTF-8 bytes. The pool is
    /// required by the format to be sorted by exactly this comparison.
    pub fn find_string_id(&self, needle: &[u8]) -> Result<Option<u32>, DexError>
    {
        let mut lo = 0u32;
        let mut hi = self.header.string_ids_size;
        while lo < hi
        {
            let mid = lo + (hi - lo) / 2;
            let (data, _) = self.string_data_by_idx(mid)?;
            match data.cmp(needle)
            {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /// `find_string_id` for callers holding ordinary UTF-8 text.
    pub fn find_string(&self, s: &str) -> Result<Option<u32>, DexError>
    {
        self.find_string_id(&cesu8::to_java_cesu8(s))
    }

    /* Type pool */

    pub fn num_type_ids(&self) -> u32
    {
        self.header.type_ids_size
    }

    pub fn get_type_id(&self, idx: u32) -> Result<TypeItem, DexError>
    {
        if idx >= self.header.type_ids_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "type index {} out of range ({} entries)", idx, self.header.type_ids_size
            )));
        }
        let mut ix = self.header.type_ids_off as usize + idx as usize * TYPE_ID_ITEM_SIZE;
        TypeItem::read(self.region.bytes(), &mut ix).map_err(|e| self.located(e))
    }

    pub fn index_for_type_id(&self, id: &TypeItem) -> Result<u32, DexError>
    {
        self.index_in_section(id.offset, self.header.type_ids_off, TYPE_ID_ITEM_SIZE, self.header.type_ids_size, "type_id")
    }

    pub fn type_descriptor(&self, id: &TypeItem) -> Result<&'a [u8], DexError>
    {
        self.string_data_by_idx(id.descriptor_idx).map(|(data, _)| data)
    }

    pub fn type_descriptor_by_idx(&self, idx: u32) -> Result<&'a [u8], DexError>
    {
        let id = self.get_type_id(idx)?;
        self.type_descriptor(&id)
    }

    /// Binary search over type ids by their descriptor string index. Type
    /// ids are sorted by that index.
    pub fn find_type_id(&self, string_idx: u32) -> Result<Option<u32>, DexError>
    {
        let mut lo = 0u32;
        let mut hi = self.header.type_ids_size;
        while lo < hi
        {
            let mid = lo + (hi - lo) / 2;
            let id = self.get_type_id(mid)?;
            match id.descriptor_idx.cmp(&string_idx)
            {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /* Prototype pool */

    pub fn num_proto_ids(&self) -> u32
    {
        self.header.proto_ids_size
    }

    pub fn get_proto_id(&self, idx: u32) -> Result<PrototypeItem, DexError>
    {
        if idx >= self.header.proto_ids_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "proto index {} out of range ({} entries)", idx, self.header.proto_ids_size
            )));
        }
        let mut ix = self.header.proto_ids_off as usize + idx as usize * PROTO_ID_ITEM_SIZE;
        PrototypeItem::read(self.region.bytes(), &mut ix).map_err(|e| self.located(e))
    }

    pub fn index_for_proto_id(&self, id: &PrototypeItem) -> Result<u32, DexError>
    {
        self.index_in_section(id.offset, self.header.proto_ids_off, PROTO_ID_ITEM_SIZE, self.header.proto_ids_size, "proto_id")
    }

    pub fn shorty(&self, proto: &PrototypeItem) -> Result<&'a [u8], DexError>
    {
        self.string_data_by_idx(proto.shorty_idx).map(|(data, _)| data)
    }

    pub fn return_type_descriptor(&self, proto: &PrototypeItem) -> Result<&'a [u8], DexError>
    {
        self.type_descriptor_by_idx(proto.return_type_idx as u32)
    }

    /// The parameter type list of a prototype, or `None` for no parameters.
    pub fn proto_parameters(&self, proto: &PrototypeItem) -> Result<Option<TypeList<'a>>, DexError>
    {
        self.type_list_at(proto.parameters_off)
    }

    pub fn parameter_iterator<'d>(&'d self, proto: &PrototypeItem) -> Result<TypeListIterator<'d, 'a>, DexError>
    {
        Ok(TypeListIterator::new(self, self.proto_parameters(proto)?))
    }

    /// Binary search for a prototype by return type and parameter sequence.
    /// The pool is sorted by return type index, then by parameter type
    /// indices compared lexicographically.
    pub fn find_proto_id(&self, return_type_idx: u16, param_type_idxs: &[u16]) -> Result<Option<u32>, DexError>
    {
        let mut lo = 0u32;
        let mut hi = self.header.proto_ids_size;
        while lo < hi
        {
            let mid = lo + (hi - lo) / 2;
            let proto = self.get_proto_id(mid)?;
            let mut order = proto.return_type_idx.cmp(&return_type_idx);
            if order == std::cmp::Ordering::Equal {
                order = self.compare_proto_params(&proto, param_type_idxs)?;
            }
            match order
            {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    fn compare_proto_params(&self, proto: &PrototypeItem, rhs: &[u16]) -> Result<std::cmp::Ordering, DexError>
    {
        let params = self.proto_parameters(proto)?;
        let lhs_len = params.as_ref().map_or(0, |l| l.size());
        for i in 0..lhs_len.min(rhs.len() as u32)
        {
            let lhs_idx = params.as_ref().unwrap().type_idx(i)?;
            let order = lhs_idx.cmp(&rhs[i as usize]);
            if order != std::cmp::Ordering::Equal {
                return Ok(order);
            }
        }
        Ok((lhs_len as usize).cmp(&rhs.len()))
    }

    /// Renders a prototype as a JNI method signature,
    /// e.g. `(ILjava/lang/String;)V`.
    pub fn proto_signature(&self, proto: &PrototypeItem) -> Result<String, DexError>
    {
        let mut result = String::from("(");
        if let Some(params) = self.proto_parameters(proto)?
        {
            for i in 0..params.size()
            {
                let descriptor = self.type_descriptor_by_idx(params.type_idx(i)? as u32)?;
                result.push_str(&self.decode_descriptor(descriptor)?);
            }
        }
        result.push(')');
        let ret = self.return_type_descriptor(proto)?;
        result.push_str(&self.decode_descriptor(ret)?);
        Ok(result)
    }

    fn decode_descriptor(&self, descriptor: &[u8]) -> Result<String, DexError>
    {
        match cesu8::from_java_cesu8(descriptor)
        {
            Ok(s) => Ok(s.into_owned()),
            Err(_) => Err(self.located(err!(DexErrorKind::MalformedStructure, "descriptor is not valid MUTF-8"))),
        }
    }

    /// Parses a JNI signature into `(return_type_idx, param_type_idxs)`
    /// against this container's pools. `None` when the signature is not
    /// well formed or names a type this container does not define.
    pub fn create_type_list(&self, signature: &str) -> Result<Option<(u16, Vec<u16>)>, DexError>
    {
        let bytes = signature.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Ok(None);
        }

        let mut param_type_idxs = Vec::new();
        let mut i = 1;
        let mut return_type_idx = None;
        let mut in_params = true;
        while i < bytes.len()
        {
            if in_params && bytes[i] == b')' {
                in_params = false;
                i += 1;
                continue;
            }
            let start = i;
            while i < bytes.len() && bytes[i] == b'[' { i += 1; }
            if i >= bytes.len() {
                return Ok(None);
            }
            if bytes[i] == b'L'
            {
                while i < bytes.len() && bytes[i] != b';' { i += 1; }
                if i >= bytes.len() {
                    return Ok(None);
                }
            }
            else if !b"ZBSCIJFDV".contains(&bytes[i])
            {
                return Ok(None);
            }
            i += 1;

            let type_idx = match self.find_string_id(&bytes[start..i])?
            {
                Some(string_idx) => match self.find_type_id(string_idx)?
                {
                    Some(type_idx) => type_idx as u16,
                    None => return Ok(None),
                },
                None => return Ok(None),
            };
            if in_params {
                param_type_idxs.push(type_idx);
            } else if return_type_idx.is_some() {
                return Ok(None); // trailing garbage after the return type
            } else {
                return_type_idx = Some(type_idx);
            }
        }

        Ok(return_type_idx.map(|ret| (ret, param_type_idxs)))
    }

    /* Field pool */

    pub fn num_field_ids(&self) -> u32
    {
        self.header.field_ids_size
    }

    pub fn get_field_id(&self, idx: u32) -> Result<FieldItem, DexError>
    {
        if idx >= self.header.field_ids_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "field index {} out of range ({} entries)", idx, self.header.field_ids_size
            )));
        }
        let mut ix = self.header.field_ids_off as usize + idx as usize * FIELD_ID_ITEM_SIZE;
        FieldItem::read(self.region.bytes(), &mut ix).map_err(|e| self.located(e))
    }

    pub fn index_for_field_id(&self, id: &FieldItem) -> Result<u32, DexError>
    {
        self.index_in_section(id.offset, self.header.field_ids_off, FIELD_ID_ITEM_SIZE, self.header.field_ids_size, "field_id")
    }

    pub fn field_name(&self, field: &FieldItem) -> Result<&'a [u8], DexError>
    {
        self.string_data_by_idx(field.name_idx).map(|(data, _)| data)
    }

    pub fn field_type_descriptor(&self, field: &FieldItem) -> Result<&'a [u8], DexError>
    {
        self.type_descriptor_by_idx(field.type_idx as u32)
    }

    pub fn field_class_descriptor(&self, field: &FieldItem) -> Result<&'a [u8], DexError>
    {
        self.type_descriptor_by_idx(field.class_idx as u32)
    }

    /// Binary search for a field by `(declaring class, name, type)`. Field
    /// ids are sorted by exactly this tuple.
    pub fn find_field_id(&self, class_idx: u16, name_idx: u32, type_idx: u16) -> Result<Option<u32>, DexError>
    {
        let needle = (class_idx, name_idx, type_idx);
        let mut lo = 0u32;
        let mut hi = self.header.field_ids_size;
        while lo < hi
        {
            let mid = lo + (hi - lo) / 2;
            let f = self.get_field_id(mid)?;
            match (f.class_idx, f.name_idx, f.type_idx).cmp(&needle)
            {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /* Method pool */

    pub fn num_method_ids(&self) -> u32
    {
        self.header.method_ids_size
    }

    pub fn get_method_id(&self, idx: u32) -> Result<MethodItem, DexError>
    {
        if idx >= self.header.method_ids_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "method index {} out of range ({} entries)", idx, self.header.method_ids_size
            )));
        }
        let mut ix = self.header.method_ids_off as usize + idx as usize * METHOD_ID_ITEM_SIZE;
        MethodItem::read(self.region.bytes(), &mut ix).map_err(|e| self.located(e))
    }

    pub fn index_for_method_id(&self, id: &MethodItem) -> Result<u32, DexError>
    {
        self.index_in_section(id.offset, self.header.method_ids_off, METHOD_ID_ITEM_SIZE, self.header.method_ids_size, "method_id")
    }

    pub fn method_name(&self, method: &MethodItem) -> Result<&'a [u8], DexError>
    {
        self.string_data_by_idx(method.name_idx).map(|(data, _)| data)
    }

    pub fn method_class_descriptor(&self, method: &MethodItem) -> Result<&'a [u8], DexError>
    {
        self.type_descriptor_by_idx(method.class_idx as u32)
    }

    pub fn method_prototype(&self, method: &MethodItem) -> Result<PrototypeItem, DexError>
    {
        self.get_proto_id(method.proto_idx as u32)
    }

    pub fn method_shorty(&self, method: &MethodItem) -> Result<&'a [u8], DexError>
    {
        let proto = self.method_prototype(method)?;
        self.shorty(&proto)
    }

    pub fn method_signature(&self, method: &MethodItem) -> Result<String, DexError>
    {
        let proto = self.method_prototype(method)?;
        self.proto_signature(&proto)
    }

    /// Binary search for a method by `(declaring class, name, prototype)`.
    pub fn find_method_id(&self, class_idx: u16, name_idx: u32, proto_idx: u16) -> Result<Option<u32>, DexError>
    {
        let needle = (class_idx, name_idx, proto_idx);
        let mut lo = 0u32;
        let mut hi = self.header.method_ids_size;
        while lo < hi
        {
            let mid = lo + (hi - lo) / 2;
            let m = self.get_method_id(mid)?;
            match (m.class_idx, m.name_idx, m.proto_idx).cmp(&needle)
            {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(mid)),
            }
        }
        Ok(None)
    }

    /* Class definitions */

    pub fn num_class_defs(&self) -> u32
    {
        self.header.class_defs_size
    }

    pub fn get_class_def(&self, idx: u32) -> Result<ClassDefItem, DexError>
    {
        if idx >= self.header.class_defs_size {
            return Err(self.located(err!(
                DexErrorKind::IndexOutOfRange,
                "class def index {} out of range ({} entries)", idx, self.header.class_defs_size
            )));
        }
        let mut ix = self.header.class_defs_off as usize + idx as usize * CLASS_DEF_ITEM_SIZE;
        ClassDefItem::read(self.region.bytes(), &mut ix).map_err(|e| self.located(e))
    }

    pub fn index_for_class_def(&self, def: &ClassDefItem) -> Result<u32, DexError>
    {
        self.index_in_section(def.offset, self.header.class_defs_off, CLASS_DEF_ITEM_SIZE, self.header.class_defs_size, "class_def")
    }

    pub fn class_descriptor(&self, def: &ClassDefItem) -> Result<&'a [u8], DexError>
    {
        self.type_descriptor_by_idx(def.class_idx)
    }

    /// The source file recorded for a class, or `None` when absent.
    pub fn source_file(&self, def: &ClassDefItem) -> Result<Option<&'a [u8]>, DexError>
    {
        if def.source_file_idx == NO_INDEX {
            return Ok(None);
        }
        self.string_data_by_idx(def.source_file_idx).map(|(data, _)| Some(data))
    }

    /// The interface list of a class, or `None` when it implements nothing.
    pub fn interfaces(&self, def: &ClassDefItem) -> Result<Option<TypeList<'a>>, DexError>
    {
        self.type_list_at(def.interfaces_off)
    }

    /// Reads the type_list at an absolute offset; offset 0 means "none".
    pub fn type_list_at(&self, off: u32) -> Result<Option<TypeList<'a>>, DexError>
    {
        if off == 0 {
            return Ok(None);
        }
        if off % 4 != 0 {
            return Err(self.located(err!(DexErrorKind::MalformedStructure, "type list at offset {} is not 4-byte aligned", off)));
        }
        let mut ix = off as usize;
        let size = read_u4(self.region.bytes(), &mut ix).map_err(|e| self.located(e))?;
        let entries = self.region.slice(ix, size as usize * 2).map_err(|e| self.located(e))?;
        Ok(Some(TypeList { entries, size }))
    }

    /* Descriptor index */

    fn class_def_index_map(&self) -> Result<&HashMap<&'a [u8], u32>, DexError>
    {
        self.class_def_index.get_or_try_init(|| {
            let mut index = HashMap::with_capacity(self.header.class_defs_size as usize);
            for i in 0..self.header.class_defs_size
            {
                let def = self.get_class_def(i)?;
                let descriptor: &'a [u8] = self.class_descriptor(&def)?;
                if index.insert(descriptor, i).is_some() {
                    warn!(
                        "{}: duplicate class descriptor {}",
                        self.location(),
                        String::from_utf8_lossy(descriptor)
                    );
                }
            }
            Ok(index)
        })
    }

    /// Looks up a class definition index by raw descriptor bytes. The index
    /// is built once, on first use.
    pub fn find_class_def_index(&self, descriptor: &[u8]) -> Result<Option<u32>, DexError>
    {
        Ok(self.class_def_index_map()?.get(descriptor).copied())
    }

    /// Looks up a class definition by raw descriptor bytes.
    pub fn find_class_def(&self, descriptor: &[u8]) -> Result<Option<ClassDefItem>, DexError>
    {
        match self.find_class_def_index(descriptor)?
        {
            Some(idx) => Ok(Some(self.get_class_def(idx)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header_bytes() -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_ITEM_SIZE);
        bytes.extend_from_slice(b"dex\n035\0");
        bytes.extend_from_slice(&0u32.to_le_bytes()); // checksum
        bytes.extend_from_slice(&[0u8; 20]); // signature
        bytes.extend_from_slice(&(HEADER_ITEM_SIZE as u32).to_le_bytes()); // file_size
        bytes.extend_from_slice(&(HEADER_ITEM_SIZE as u32).to_le_bytes()); // header_size
        bytes.extend_from_slice(&ENDIAN_CONSTANT.to_le_bytes());
        while bytes.len() < HEADER_ITEM_SIZE {
            bytes.extend_from_slice(&0u32.to_le_bytes()); // link/map/sections all empty
        }
        bytes
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"dey\n035\0";
        let err = DexFile::open(bytes, "bad.dex").unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::MalformedHeader);

        let mut bytes = minimal_header_bytes();
        bytes[0] = b'd';
        bytes[1] = b'e';
        bytes[2] = b'y';
        let err = DexFile::open(&bytes, "bad.dex").unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::MalformedHeader);
    }

    #[test]
    fn rejects_bad_version() {
        let mut bytes = minimal_header_bytes();
        bytes[4] = b'x';
        let err = DexFile::open(&bytes, "bad.dex").unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::MalformedHeader);
    }

    #[test]
    fn rejects_bad_endian_tag() {
        let mut bytes = minimal_header_bytes();
        bytes[40..44].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        let err = DexFile::open(&bytes, "swapped.dex").unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::MalformedHeader);
    }

    #[test]
    fn rejects_section_past_region() {
        let mut bytes = minimal_header_bytes();
        // string_ids: 100 entries at offset 0x70, far past the region end
        bytes[56..60].copy_from_slice(&100u32.to_le_bytes());
        bytes[60..64].copy_from_slice(&(HEADER_ITEM_SIZE as u32).to_le_bytes());
        let err = DexFile::open(&bytes, "trunc.dex").unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::MalformedHeader);
    }

    #[test]
    fn accepts_minimal_header() {
        let bytes = minimal_header_bytes();
        let dex = DexFile::open(&bytes, "minimal.dex").expect("open minimal container");
        assert_eq!(dex.version(), 35);
        assert_eq!(dex.num_string_ids(), 0);
        assert_eq!(dex.num_class_defs(), 0);
        assert!(dex.find_string_id(b"anything").unwrap().is_none());
        assert!(dex.find_class_def(b"Lfoo/Bar;").unwrap().is_none());
    }

    #[test]
    fn version_decodes_digits() {
        let mut bytes = minimal_header_bytes();
        bytes[4..7].copy_from_slice(b"039");
        let dex = DexFile::open(&bytes, "v39.dex").unwrap();
        assert_eq!(dex.version(), 39);
    }
}
