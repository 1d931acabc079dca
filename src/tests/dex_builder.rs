//! Assembles miniature DEX images in memory for the test suite.
//!
//! Usage follows the file layout: declare every pool entry first (strings
//! in sorted order, ids in their canonical sort order), then append data
//! blobs (code items, class data, debug streams), then patch the class defs
//! that reference them and call `build`. Blob offsets returned by
//! `append_blob` are absolute, so blobs may reference each other as long as
//! a referenced blob is appended first.

use crate::dex::dex_file::{
    CLASS_DEF_ITEM_SIZE, ENDIAN_CONSTANT, FIELD_ID_ITEM_SIZE, HEADER_ITEM_SIZE, METHOD_ID_ITEM_SIZE,
    PROTO_ID_ITEM_SIZE, STRING_ID_ITEM_SIZE, TYPE_ID_ITEM_SIZE,
};

pub(crate) use crate::dex::leb::{encode_sleb128, encode_uleb128, encode_uleb128p1};

pub fn push_u2(out: &mut Vec<u8>, val: u16) {
    out.extend_from_slice(&val.to_le_bytes());
}

pub fn push_u4(out: &mut Vec<u8>, val: u32) {
    out.extend_from_slice(&val.to_le_bytes());
}

struct ProtoSpec {
    shorty_idx: u32,
    return_type_idx: u16,
    params: Vec<u16>,
}

struct ClassDefSpec {
    class_idx: u32,
    access_flags: u32,
    superclass_idx: u32,
    interfaces: Vec<u16>,
    source_file_idx: u32,
    class_data_off: u32,
    static_values_off: u32,
}

pub struct DexBuilder {
    strings: Vec<Vec<u8>>,
    types: Vec<u32>,
    protos: Vec<ProtoSpec>,
    fields: Vec<(u16, u16, u32)>,
    methods: Vec<(u16, u16, u32)>,
    class_defs: Vec<ClassDefSpec>,
    blobs: Vec<u8>,
    pools_frozen: bool,
}

impl DexBuilder {
    pub fn new() -> DexBuilder {
        DexBuilder {
            strings: vec![],
            types: vec![],
            protos: vec![],
            fields: vec![],
            methods: vec![],
            class_defs: vec![],
            blobs: vec![],
            pools_frozen: false,
        }
    }

    /// Adds a string to the pool. Strings must be added in their byte-sorted
    /// order; the fixture only supports ASCII so the declared UTF-16 length
    /// equals the byte length.
    pub fn string(&mut self, s: &str) -> u32 {
        assert!(!self.pools_frozen, "pool entries must be declared before data blobs");
        assert!(s.is_ascii(), "fixture strings must be ASCII");
        if let Some(last) = self.strings.last() {
            assert!(last.as_slice() < s.as_bytes(), "strings must be added pre-sorted");
        }
        self.strings.push(s.as_bytes().to_vec());
        (self.strings.len() - 1) as u32
    }

    pub fn type_id(&mut self, string_idx: u32) -> u16 {
        assert!(!self.pools_frozen);
        self.types.push(string_idx);
        (self.types.len() - 1) as u16
    }

    pub fn proto(&mut self, shorty_idx: u32, return_type_idx: u16, params: Vec<u16>) -> u16 {
        assert!(!self.pools_frozen);
        self.protos.push(ProtoSpec { shorty_idx, return_type_idx, params });
        (self.protos.len() - 1) as u16
    }

    pub fn field(&mut self, class_idx: u16, type_idx: u16, name_idx: u32) -> u32 {
        assert!(!self.pools_frozen);
        self.fields.push((class_idx, type_idx, name_idx));
        (self.fields.len() - 1) as u32
    }

    pub fn method(&mut self, class_idx: u16, proto_idx: u16, name_idx: u32) -> u32 {
        assert!(!self.pools_frozen);
        self.methods.push((class_idx, proto_idx, name_idx));
        (self.methods.len() - 1) as u32
    }

    pub fn class_def(
        &mut self,
        class_idx: u16,
        access_flags: u32,
        superclass_idx: u32,
        interfaces: Vec<u16>,
        source_file_idx: u32,
    ) -> usize {
        assert!(!self.pools_frozen);
        self.class_defs.push(ClassDefSpec {
            class_idx: class_idx as u32,
            access_flags,
            superclass_idx,
            interfaces,
            source_file_idx,
            class_data_off: 0,
            static_values_off: 0,
        });
        self.class_defs.len() - 1
    }

    /// Absolute offset where the data area begins. Declaring further pool
    /// entries after calling this would shift it, so the pools freeze here.
    pub fn data_base(&mut self) -> usize {
        self.pools_frozen = true;
        HEADER_ITEM_SIZE
            + self.strings.len() * STRING_ID_ITEM_SIZE
            + self.types.len() * TYPE_ID_ITEM_SIZE
            + self.protos.len() * PROTO_ID_ITEM_SIZE
            + self.fields.len() * FIELD_ID_ITEM_SIZE
            + self.methods.len() * METHOD_ID_ITEM_SIZE
            + self.class_defs.len() * CLASS_DEF_ITEM_SIZE
    }

    /// Appends a data blob padded to `align` and returns its absolute offset.
    pub fn append_blob(&mut self, bytes: &[u8], align: usize) -> u32 {
        let base = self.data_base();
        while (base + self.blobs.len()) % align != 0 {
            self.blobs.push(0);
        }
        let offset = base + self.blobs.len();
        self.blobs.extend_from_slice(bytes);
        offset as u32
    }

    pub fn set_class_data_off(&mut self, class_def: usize, off: u32) {
        self.class_defs[class_def].class_data_off = off;
    }

    pub fn set_static_values_off(&mut self, class_def: usize, off: u32) {
        self.class_defs[class_def].static_values_off = off;
    }

    pub fn build(&mut self) -> Vec<u8> {
        let base = self.data_base();

        // Data area: test blobs first (their offsets were handed out), then
        // string data, then the 4-byte aligned type lists.
        let mut data = self.blobs.clone();
        let mut string_data_offs = Vec::with_capacity(self.strings.len());
        for s in &self.strings {
            string_data_offs.push((base + data.len()) as u32);
            data.extend_from_slice(&encode_uleb128(s.len() as u32));
            data.extend_from_slice(s);
            data.push(0);
        }

        let write_type_list = |data: &mut Vec<u8>, list: &[u16]| -> u32 {
            if list.is_empty() {
                return 0;
            }
            while (base + data.len()) % 4 != 0 {
                data.push(0);
            }
            let off = (base + data.len()) as u32;
            push_u4(data, list.len() as u32);
            for &idx in list {
                push_u2(data, idx);
            }
            off
        };

        let proto_params_offs: Vec<u32> =
            self.protos.iter().map(|p| write_type_list(&mut data, &p.params)).collect();
        let interfaces_offs: Vec<u32> =
            self.class_defs.iter().map(|c| write_type_list(&mut data, &c.interfaces)).collect();

        // Fixed-size sections between the header and the data area.
        let mut out = Vec::with_capacity(base + data.len());
        out.resize(HEADER_ITEM_SIZE, 0);

        let string_ids_off = section_off(out.len(), self.strings.len());
        for off in &string_data_offs {
            push_u4(&mut out, *off);
        }
        let type_ids_off = section_off(out.len(), self.types.len());
        for descriptor_idx in &self.types {
            push_u4(&mut out, *descriptor_idx);
        }
        let proto_ids_off = section_off(out.len(), self.protos.len());
        for (proto, params_off) in self.protos.iter().zip(&proto_params_offs) {
            push_u4(&mut out, proto.shorty_idx);
            push_u2(&mut out, proto.return_type_idx);
            push_u2(&mut out, 0);
            push_u4(&mut out, *params_off);
        }
        let field_ids_off = section_off(out.len(), self.fields.len());
        for (class_idx, type_idx, name_idx) in &self.fields {
            push_u2(&mut out, *class_idx);
            push_u2(&mut out, *type_idx);
            push_u4(&mut out, *name_idx);
        }
        let method_ids_off = section_off(out.len(), self.methods.len());
        for (class_idx, proto_idx, name_idx) in &self.methods {
            push_u2(&mut out, *class_idx);
            push_u2(&mut out, *proto_idx);
            push_u4(&mut out, *name_idx);
        }
        let class_defs_off = section_off(out.len(), self.class_defs.len());
        for (def, interfaces_off) in self.class_defs.iter().zip(&interfaces_offs) {
            push_u4(&mut out, def.class_idx);
            push_u4(&mut out, def.access_flags);
            push_u4(&mut out, def.superclass_idx);
            push_u4(&mut out, *interfaces_off);
            push_u4(&mut out, def.source_file_idx);
            push_u4(&mut out, 0); // annotations_off
            push_u4(&mut out, def.class_data_off);
            push_u4(&mut out, def.static_values_off);
        }

        assert_eq!(out.len(), base);
        out.extend_from_slice(&data);

        // Header last, once every size is known.
        let mut header = Vec::with_capacity(HEADER_ITEM_SIZE);
        header.extend_from_slice(b"dex\n035\0");
        push_u4(&mut header, 0); // checksum, not verified by the reader
        header.extend_from_slice(&[0u8; 20]); // signature
        push_u4(&mut header, out.len() as u32);
        push_u4(&mut header, HEADER_ITEM_SIZE as u32);
        push_u4(&mut header, ENDIAN_CONSTANT);
        push_u4(&mut header, 0); // link_size
        push_u4(&mut header, 0); // link_off
        push_u4(&mut header, 0); // map_off
        push_u4(&mut header, self.strings.len() as u32);
        push_u4(&mut header, string_ids_off);
        push_u4(&mut header, self.types.len() as u32);
        push_u4(&mut header, type_ids_off);
        push_u4(&mut header, self.protos.len() as u32);
        push_u4(&mut header, proto_ids_off);
        push_u4(&mut header, self.fields.len() as u32);
        push_u4(&mut header, field_ids_off);
        push_u4(&mut header, self.methods.len() as u32);
        push_u4(&mut header, method_ids_off);
        push_u4(&mut header, self.class_defs.len() as u32);
        push_u4(&mut header, class_defs_off);
        push_u4(&mut header, 0); // data_size, unused by the reader
        push_u4(&mut header, 0); // data_off
        out[..HEADER_ITEM_SIZE].copy_from_slice(&header);

        out
    }
}

fn section_off(current: usize, count: usize) -> u32 {
    if count == 0 {
        0
    } else {
        current as u32
    }
}
