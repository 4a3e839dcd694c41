//! Fixed-size records stored in the import directory and in the dynamic import side-tables.
//!
//! All records are little-endian with no padding. Decoding never reads past the parser's buffer:
//! if fewer bytes remain than the size of the record, decoding returns `None`.

#[cfg(test)]
mod tests;

use crate::encoder::Encoder;
use crate::parser::Parser;
use dynlink_coff::Rva;
use static_assertions::const_assert_eq;
use std::mem::size_of;
use zerocopy::byteorder::{LE, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// A record with a fixed binary layout.
pub trait Record: Sized + FromBytes + IntoBytes + Immutable + KnownLayout + Unaligned {
    /// Size in bytes of the encoded record.
    const SIZE: usize = size_of::<Self>();

    /// Decodes one record and advances the parser. Returns `None` (and leaves the parser where it
    /// was) if fewer than [`Self::SIZE`] bytes remain.
    fn decode(p: &mut Parser) -> Option<Self> {
        p.copy::<Self>().ok()
    }

    /// Appends the encoded record.
    fn encode(&self, e: &mut Encoder) {
        e.t(self)
    }
}

/// 1-based index into a string table or a record table. The value 0 means "absent".
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Ordinal(pub u32);

impl Ordinal {
    pub const ABSENT: Ordinal = Ordinal(0);

    /// The ordinal of the element at 0-based position `index`.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// The 0-based position this ordinal refers to, or `None` if the ordinal is absent.
    pub fn index(self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }

    pub fn is_absent(self) -> bool {
        self.0 == 0
    }
}

/// Byte offset of a NUL-terminated name within the link descriptor table's own data.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct NameOffset(pub u32);

/// 1-based byte offset of a local symbol list within the symbol indexer table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct IndexerOffset(pub u32);

impl IndexerOffset {
    /// Builds the offset of a list that starts at 0-based byte position `pos`.
    pub fn from_position(pos: usize) -> Self {
        Self(pos as u32 + 1)
    }

    /// The 0-based byte position of the list, or `None` for the (invalid) value 0.
    pub fn position(self) -> Option<usize> {
        self.0.checked_sub(1).map(|i| i as usize)
    }
}

/// `IMAGE_IMPORT_DESCRIPTOR`: one entry of the import directory. An all-zero entry terminates
/// the directory.
#[repr(C)]
#[derive(
    Clone, Default, Eq, PartialEq, Hash, Debug, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct ImportDirectoryEntry {
    pub original_first_thunk: U32<LE>,
    pub time_date_stamp: U32<LE>,
    pub forwarder_chain: U32<LE>,
    /// RVA of the ASCII name of the imported module.
    pub name: U32<LE>,
    pub first_thunk: U32<LE>,
}

const_assert_eq!(size_of::<ImportDirectoryEntry>(), 20);

impl Record for ImportDirectoryEntry {}

impl ImportDirectoryEntry {
    /// The terminating entry.
    pub const ZERO: Self = Self {
        original_first_thunk: U32::ZERO,
        time_date_stamp: U32::ZERO,
        forwarder_chain: U32::ZERO,
        name: U32::ZERO,
        first_thunk: U32::ZERO,
    };

    pub fn new(
        original_first_thunk: u32,
        time_date_stamp: u32,
        forwarder_chain: u32,
        name: Rva,
        first_thunk: u32,
    ) -> Self {
        Self {
            original_first_thunk: U32::new(original_first_thunk),
            time_date_stamp: U32::new(time_date_stamp),
            forwarder_chain: U32::new(forwarder_chain),
            name: U32::new(name.0),
            first_thunk: U32::new(first_thunk),
        }
    }

    pub fn name_rva(&self) -> Rva {
        Rva(self.name.get())
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Reads entries until a zero entry or the end of the data, whichever comes first. The zero
    /// entry is not included.
    pub fn read_all(bytes: &[u8]) -> Vec<Self> {
        let mut p = Parser::new(bytes);
        let mut entries = Vec::new();
        while let Some(entry) = Self::decode(&mut p) {
            if entry.is_zero() {
                break;
            }
            entries.push(entry);
        }
        entries
    }

    /// Writes the entries followed by a zero entry.
    pub fn write_all(entries: &[Self], e: &mut Encoder) {
        for entry in entries.iter() {
            entry.encode(e);
        }
        Self::ZERO.encode(e);
    }
}

/// A link descriptor: one imported module whose symbols are resolved at runtime.
#[repr(C)]
#[derive(
    Clone, Default, Eq, PartialEq, Hash, Debug, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct DynamicImportDescriptor {
    /// Offset of the module name within the link descriptor table (not an RVA, despite what the
    /// loader-side field is usually called).
    pub target_name_rva: U32<LE>,
    pub symbol_indexer_offset: U32<LE>,
}

const_assert_eq!(size_of::<DynamicImportDescriptor>(), 8);

impl Record for DynamicImportDescriptor {}

impl DynamicImportDescriptor {
    pub fn new(target_name: NameOffset, symbol_indexer: IndexerOffset) -> Self {
        Self {
            target_name_rva: U32::new(target_name.0),
            symbol_indexer_offset: U32::new(symbol_indexer.0),
        }
    }

    pub fn target_name(&self) -> NameOffset {
        NameOffset(self.target_name_rva.get())
    }

    pub fn symbol_indexer(&self) -> IndexerOffset {
        IndexerOffset(self.symbol_indexer_offset.get())
    }
}

/// How a single symbol is located at runtime.
#[repr(C)]
#[derive(
    Clone, Default, Eq, PartialEq, Hash, Debug, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct DynamicSymbolDescriptor {
    /// Ordinal in the symbol name table. The same ordinal indexes the demangled name table.
    pub symbol_index: U32<LE>,
    /// Ordinal in the signature table, or 0 if the symbol is located by address.
    pub signature_index: U32<LE>,
    /// Offset from the module base. Meaningful only when `signature_index` is 0.
    pub address_offset: U64<LE>,
}

const_assert_eq!(size_of::<DynamicSymbolDescriptor>(), 16);

impl Record for DynamicSymbolDescriptor {}

impl DynamicSymbolDescriptor {
    /// A symbol located at a fixed offset from the module base.
    pub fn with_address(symbol: Ordinal, address_offset: u64) -> Self {
        Self {
            symbol_index: U32::new(symbol.0),
            signature_index: U32::ZERO,
            address_offset: U64::new(address_offset),
        }
    }

    /// A symbol located by scanning memory for a byte pattern.
    pub fn with_signature(symbol: Ordinal, signature: Ordinal) -> Self {
        Self {
            symbol_index: U32::new(symbol.0),
            signature_index: U32::new(signature.0),
            address_offset: U64::ZERO,
        }
    }

    pub fn symbol(&self) -> Ordinal {
        Ordinal(self.symbol_index.get())
    }

    pub fn signature(&self) -> Ordinal {
        Ordinal(self.signature_index.get())
    }

    /// The address offset, or `None` if the symbol is located by signature or the offset is 0.
    pub fn address(&self) -> Option<u64> {
        if !self.signature().is_absent() {
            return None;
        }
        match self.address_offset.get() {
            0 => None,
            a => Some(a),
        }
    }
}

/// The header at the start of the normal-imports section. It records where the import directory
/// was before the first patch, so that the image can be restored exactly.
#[repr(C)]
#[derive(
    Clone, Default, Eq, PartialEq, Hash, Debug, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct NormalImportsHeader {
    pub original_import_directory_rva: U32<LE>,
    pub original_import_directory_size: U32<LE>,
}

const_assert_eq!(size_of::<NormalImportsHeader>(), 8);

impl Record for NormalImportsHeader {}

impl NormalImportsHeader {
    pub fn new(rva: Rva, size: u32) -> Self {
        Self {
            original_import_directory_rva: U32::new(rva.0),
            original_import_directory_size: U32::new(size),
        }
    }

    pub fn rva(&self) -> Rva {
        Rva(self.original_import_directory_rva.get())
    }

    pub fn size(&self) -> u32 {
        self.original_import_directory_size.get()
    }

    /// Indicates whether the header holds a saved import directory.
    pub fn is_present(&self) -> bool {
        self.rva().0 != 0
    }
}
