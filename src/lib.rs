//! # Dexview
//!
//! A zero-copy reader for the Android Dalvik executable ("DEX") container
//! format: open a read-only byte region once, then traverse its string,
//! type, prototype, field and method pools, class definitions, class data,
//! encoded static values, exception tables and debug-information streams
//! through borrowed views.
//!
//! The caller supplies the bytes (a file read, a memory mapping, an
//! extracted archive entry) together with a location label used in error
//! messages; nothing here touches the filesystem.
//!
//! # Examples
//!
//! ```no_run
//!  use dexview::DexFile;
//!
//!  let bytes = std::fs::read("classes.dex").unwrap();
//!  let dex = DexFile::open(&bytes, "classes.dex").unwrap();
//!  println!("version {}, {} classes", dex.version(), dex.num_class_defs());
//!
//!  if let Some(def) = dex.find_class_def(b"Ljava/lang/Object;").unwrap() {
//!      println!("access flags {:#x}", def.access_flags);
//!  }
//! ```

pub mod dex;

pub use crate::dex::class_data::ClassDataIterator;
pub use crate::dex::code_item::{CatchHandlerIterator, CodeItem, TryItem};
pub use crate::dex::debug_info::LocalEvent;
pub use crate::dex::dex_file::{
    ClassDefItem, DexFile, FieldItem, Header, MethodItem, PrototypeItem, StringItem, TypeItem, TypeList,
    TypeListIterator, NO_INDEX, NO_INDEX_16,
};
pub use crate::dex::encoded_values::{EncodedArrayIterator, EncodedValue};
pub use crate::dex::error::{DexError, DexErrorKind};
pub use crate::dex::region::Region;

#[cfg(test)]
mod tests;
