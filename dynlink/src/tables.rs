//! Readers and writers for the side-table layouts.
//!
//! * Array tables: a `u32` count followed by that many fixed-size records.
//! * String tables: a `u32` count followed by that many NUL-terminated strings. The string at
//!   0-based position `i` has ordinal `i + 1`.
//! * The symbol indexer table: a stream of local lists, each a `u32` count followed by that many
//!   `u32` ordinals into the symbol descriptor table. It has no header of its own; lists are
//!   addressed by [`IndexerOffset`].
//! * The link descriptor table: a `u32` count, that many [`DynamicImportDescriptor`] records,
//!   then the NUL-terminated module names. Each descriptor points at its name with a
//!   [`NameOffset`] relative to the start of the table.
//!
//! Counts are written as placeholders and back-patched once the number of elements is known.
//! When reading, the leading count of an array or string table is advisory: the reader never
//! reads past the data, and a mismatch is only logged.

#[cfg(test)]
mod tests;

use crate::encoder::{Encoder, Placeholder};
use crate::parser::{Parser, ParserError};
use crate::records::{DynamicImportDescriptor, IndexerOffset, NameOffset, Ordinal, Record};
use bstr::BStr;
use std::marker::PhantomData;
use tracing::warn;

/// Reads an array table.
pub fn read_array_table<T: Record>(bytes: &[u8]) -> Result<Vec<T>, ParserError> {
    let mut p = Parser::new(bytes);
    let count = p.u32()? as usize;

    let mut records = Vec::with_capacity(count.min(p.len() / T::SIZE.max(1)));
    while records.len() < count {
        let Some(r) = T::decode(&mut p) else {
            break;
        };
        records.push(r);
    }

    if records.len() != count {
        warn!(
            count,
            found = records.len(),
            "array table is shorter than its count"
        );
    }
    Ok(records)
}

/// Builds an array table.
pub struct ArrayTableWriter<T> {
    buf: Vec<u8>,
    count_at: Placeholder,
    count: u32,
    _record: PhantomData<T>,
}

impl<T: Record> Default for ArrayTableWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> ArrayTableWriter<T> {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        let count_at = Encoder::new(&mut buf).u32_placeholder();
        Self {
            buf,
            count_at,
            count: 0,
            _record: PhantomData,
        }
    }

    /// Appends a record and returns its ordinal.
    pub fn push(&mut self, record: &T) -> Ordinal {
        record.encode(&mut Encoder::new(&mut self.buf));
        self.count += 1;
        Ordinal(self.count)
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(mut self) -> Vec<u8> {
        Encoder::new(&mut self.buf).set_u32(self.count_at, self.count);
        self.buf
    }
}

/// A decoded string table. The strings borrow from the table data.
#[derive(Clone, Default)]
pub struct StringTable<'a> {
    strings: Vec<&'a BStr>,
}

impl<'a> StringTable<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParserError> {
        let mut p = Parser::new(bytes);
        let count = p.u32()? as usize;

        let mut strings = Vec::with_capacity(count.min(p.len()));
        while strings.len() < count {
            let Ok(s) = p.strz() else {
                break;
            };
            strings.push(s);
        }

        if strings.len() != count {
            warn!(
                count,
                found = strings.len(),
                "string table is shorter than its count"
            );
        }
        Ok(Self { strings })
    }

    /// Looks up a string by ordinal. The absent ordinal (0) is never found.
    pub fn get(&self, ordinal: Ordinal) -> Option<&'a BStr> {
        self.strings.get(ordinal.index()?).copied()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a BStr> + '_ {
        self.strings.iter().copied()
    }
}

/// Builds a string table.
pub struct StringTableWriter {
    buf: Vec<u8>,
    count_at: Placeholder,
    count: u32,
}

impl Default for StringTableWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTableWriter {
    pub fn new() -> Self {
        let mut buf = Vec::new();
        let count_at = Encoder::new(&mut buf).u32_placeholder();
        Self {
            buf,
            count_at,
            count: 0,
        }
    }

    /// Appends a string and returns its ordinal. Strings are not interned; pushing the same
    /// string twice gives two ordinals.
    pub fn push(&mut self, s: &BStr) -> Ordinal {
        Encoder::new(&mut self.buf).strz(s);
        self.count += 1;
        Ordinal(self.count)
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(mut self) -> Vec<u8> {
        Encoder::new(&mut self.buf).set_u32(self.count_at, self.count);
        self.buf
    }
}

/// Reads the local list at `offset` from the symbol indexer table. Unlike the top-level tables,
/// a list that is shorter than its count is an error, because the next list would otherwise be
/// misread as part of this one.
pub fn read_symbol_list(indexer: &[u8], offset: IndexerOffset) -> Result<Vec<Ordinal>, ParserError> {
    let Some(pos) = offset.position() else {
        return Err(ParserError::new());
    };
    let mut p = Parser::at(indexer, pos)?;
    let count = p.u32()? as usize;
    if count > p.len() / 4 {
        return Err(ParserError::new());
    }
    (0..count).map(|_| Ok(Ordinal(p.u32()?))).collect()
}

/// Builds the symbol indexer table.
#[derive(Default)]
pub struct SymbolIndexerWriter {
    buf: Vec<u8>,
}

impl SymbolIndexerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a local list and returns the offset that refers to it.
    pub fn push_list(&mut self, ordinals: &[Ordinal]) -> IndexerOffset {
        let offset = IndexerOffset::from_position(self.buf.len());
        let mut e = Encoder::new(&mut self.buf);
        let count_at = e.u32_placeholder();
        for ordinal in ordinals.iter() {
            e.u32(ordinal.0);
        }
        e.set_u32(count_at, ordinals.len() as u32);
        offset
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// A decoded link descriptor table.
pub struct LinkDescriptorTable<'a> {
    bytes: &'a [u8],
    pub descriptors: Vec<DynamicImportDescriptor>,
}

impl<'a> LinkDescriptorTable<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, ParserError> {
        Ok(Self {
            bytes,
            descriptors: read_array_table(bytes)?,
        })
    }

    /// Reads the module name of a descriptor from the name pool.
    pub fn target_name(&self, desc: &DynamicImportDescriptor) -> Result<&'a BStr, ParserError> {
        Parser::at(self.bytes, desc.target_name().0 as usize)?.strz()
    }
}

/// Builds the link descriptor table from `(module name, symbol list)` pairs, in order.
pub fn write_link_descriptor_table(entries: &[(&BStr, IndexerOffset)]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);

    let count_at = e.u32_placeholder();
    let mut name_offset = 4 + entries.len() * DynamicImportDescriptor::SIZE;
    for &(name, indexer) in entries.iter() {
        DynamicImportDescriptor::new(NameOffset(name_offset as u32), indexer).encode(&mut e);
        name_offset += name.len() + 1;
    }
    for &(name, _) in entries.iter() {
        e.strz(name);
    }
    e.set_u32(count_at, entries.len() as u32);

    buf
}
