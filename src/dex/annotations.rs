//! Read-only views of the DEX annotation structures:
//! - annotations_directory_item
//! - annotation_set_item
//! - annotation_set_ref_list
//! - annotation_item (wraps EncodedAnnotation)
//!
//! All offsets are absolute within the region; 0 means "absent".

use crate::dex::dex_file::{ClassDefItem, DexFile};
use crate::dex::encoded_values::EncodedAnnotation;
use crate::dex::error::{DexError, DexErrorKind};
use crate::dex::{read_u1, read_u4};

pub const VISIBILITY_BUILD: u8 = 0x00;
pub const VISIBILITY_RUNTIME: u8 = 0x01;
pub const VISIBILITY_SYSTEM: u8 = 0x02;

/// annotation_item
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    /// Visibility: 0x00 = build, 0x01 = runtime, 0x02 = system
    pub visibility: u8,
    /// The encoded annotation payload
    pub annotation: EncodedAnnotation,
}

impl AnnotationItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationItem, DexError> {
        let visibility = read_u1(bytes, ix)?;
        let annotation = EncodedAnnotation::read(bytes, ix)?;
        Ok(AnnotationItem {
            visibility,
            annotation,
        })
    }
}

/// annotation_set_item: offsets to `annotation_item`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSetItem {
    pub entries: Vec<u32>,
}

impl AnnotationSetItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSetItem, DexError> {
        let size = read_u4(bytes, ix)? as usize;
        let mut entries = Vec::with_capacity(size.min(64));
        for _ in 0..size {
            entries.push(read_u4(bytes, ix)?);
        }
        Ok(AnnotationSetItem { entries })
    }
}

/// annotation_set_ref_list: offsets to `annotation_set_item`s, one per
/// method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSetRefList {
    pub list: Vec<u32>,
}

impl AnnotationSetRefList {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSetRefList, DexError> {
        let size = read_u4(bytes, ix)? as usize;
        let mut list = Vec::with_capacity(size.min(64));
        for _ in 0..size {
            list.push(read_u4(bytes, ix)?);
        }
        Ok(AnnotationSetRefList { list })
    }
}

/// field_annotations entry: `annotations_off` points at an annotation_set_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAnnotations {
    pub field_idx: u32,
    pub annotations_off: u32,
}

impl FieldAnnotations {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldAnnotations, DexError> {
        Ok(FieldAnnotations {
            field_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
        })
    }
}

/// method_annotations entry: `annotations_off` points at an annotation_set_item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodAnnotations {
    pub method_idx: u32,
    pub annotations_off: u32,
}

impl MethodAnnotations {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodAnnotations, DexError> {
        Ok(MethodAnnotations {
            method_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
        })
    }
}

/// parameter_annotations entry: `annotations_off` points at an
/// annotation_set_ref_list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterAnnotations {
    pub method_idx: u32,
    pub annotations_off: u32,
}

impl ParameterAnnotations {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ParameterAnnotations, DexError> {
        Ok(ParameterAnnotations {
            method_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
        })
    }
}

/// annotations_directory_item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationsDirectoryItem {
    /// Offset to the class `annotation_set_item` (or 0 if none)
    pub class_annotations_off: u32,
    pub field_annotations: Vec<FieldAnnotations>,
    pub method_annotations: Vec<MethodAnnotations>,
    pub parameter_annotations: Vec<ParameterAnnotations>,
}

impl AnnotationsDirectoryItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationsDirectoryItem, DexError> {
        let class_annotations_off = read_u4(bytes, ix)?;
        let fields_size = read_u4(bytes, ix)? as usize;
        let annotated_methods_size = read_u4(bytes, ix)? as usize;
        let annotated_parameters_size = read_u4(bytes, ix)? as usize;

        let mut field_annotations = Vec::with_capacity(fields_size.min(64));
        for _ in 0..fields_size {
            field_annotations.push(FieldAnnotations::read(bytes, ix)?);
        }

        let mut method_annotations = Vec::with_capacity(annotated_methods_size.min(64));
        for _ in 0..annotated_methods_size {
            method_annotations.push(MethodAnnotations::read(bytes, ix)?);
        }

        let mut parameter_annotations = Vec::with_capacity(annotated_parameters_size.min(64));
        for _ in 0..annotated_parameters_size {
            parameter_annotations.push(ParameterAnnotations::read(bytes, ix)?);
        }

        Ok(AnnotationsDirectoryItem {
            class_annotations_off,
            field_annotations,
            method_annotations,
            parameter_annotations,
        })
    }
}

impl<'a> DexFile<'a>
{
    /// The annotations directory of a class, or `None` when the class has
    /// no annotations at all.
    pub fn annotations_directory(&self, def: &ClassDefItem) -> Result<Option<AnnotationsDirectoryItem>, DexError>
    {
        if def.annotations_off == 0 {
            return Ok(None);
        }
        if def.annotations_off % 4 != 0 {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "annotations directory at offset {} is not 4-byte aligned", def.annotations_off
            )));
        }
        let mut ix = def.annotations_off as usize;
        if ix >= self.region().len() {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "annotations directory offset {} outside region of {} bytes", ix, self.region().len()
            )));
        }
        AnnotationsDirectoryItem::read(self.region().bytes(), &mut ix)
            .map(Some)
            .map_err(|e| self.located(e))
    }

    /// The annotation_set_item at an absolute offset; offset 0 means none.
    pub fn annotation_set_at(&self, off: u32) -> Result<Option<AnnotationSetItem>, DexError>
    {
        if off == 0 {
            return Ok(None);
        }
        let mut ix = off as usize;
        if ix >= self.region().len() {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "annotation set offset {} outside region of {} bytes", ix, self.region().len()
            )));
        }
        AnnotationSetItem::read(self.region().bytes(), &mut ix)
            .map(Some)
            .map_err(|e| self.located(e))
    }

    /// The annotation_item at an absolute offset.
    pub fn annotation_item_at(&self, off: u32) -> Result<AnnotationItem, DexError>
    {
        let mut ix = off as usize;
        if ix >= self.region().len() {
            return Err(self.located(err!(
                DexErrorKind::MalformedStructure,
                "annotation item offset {} outside region of {} bytes", ix, self.region().len()
            )));
        }
        AnnotationItem::read(self.region().bytes(), &mut ix).map_err(|e| self.located(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_item_read() {
        // visibility 1, annotation type_idx=3 with no elements
        let buf = [0x01, 0x03, 0x00];
        let mut ix = 0;
        let item = AnnotationItem::read(&buf, &mut ix).expect("read failed");
        assert_eq!(ix, buf.len());
        assert_eq!(item.visibility, VISIBILITY_RUNTIME);
        assert_eq!(item.annotation.type_idx, 3);
        assert!(item.annotation.elements.is_empty());
    }

    #[test]
    fn test_annotation_set_item_read() {
        let mut buf = vec![];
        buf.extend_from_slice(&3u32.to_le_bytes());
        for off in [0x10u32, 0x20, 0x30] {
            buf.extend_from_slice(&off.to_le_bytes());
        }
        let mut ix = 0;
        let set = AnnotationSetItem::read(&buf, &mut ix).expect("read failed");
        assert_eq!(ix, buf.len());
        assert_eq!(set.entries, vec![0x10, 0x20, 0x30]);
    }

    #[test]
    fn test_annotations_directory_read() {
        let mut buf = vec![];
        buf.extend_from_slice(&0x1000u32.to_le_bytes()); // class_annotations_off
        buf.extend_from_slice(&1u32.to_le_bytes()); // fields_size
        buf.extend_from_slice(&1u32.to_le_bytes()); // methods_size
        buf.extend_from_slice(&0u32.to_le_bytes()); // parameters_size
        buf.extend_from_slice(&1u32.to_le_bytes()); // field_idx
        buf.extend_from_slice(&0x2000u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes()); // method_idx
        buf.extend_from_slice(&0x3000u32.to_le_bytes());

        let mut ix = 0;
        let dir = AnnotationsDirectoryItem::read(&buf, &mut ix).expect("read failed");
        assert_eq!(ix, buf.len());
        assert_eq!(dir.class_annotations_off, 0x1000);
        assert_eq!(dir.field_annotations, vec![FieldAnnotations { field_idx: 1, annotations_off: 0x2000 }]);
        assert_eq!(dir.method_annotations, vec![MethodAnnotations { method_idx: 2, annotations_off: 0x3000 }]);
        assert!(dir.parameter_annotations.is_empty());
    }

    #[test]
    fn test_truncated_directory_fails() {
        let mut buf = vec![];
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&5u32.to_le_bytes()); // five field entries promised, none present
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        let mut ix = 0;
        assert!(AnnotationsDirectoryItem::read(&buf, &mut ix).is_err());
    }
}
