//! The six side-table sections that describe the dynamically linked modules and their symbols.
//!
//! ```text
//! .dlnkdt  link descriptors ──► name pool (module names)
//!              │ SymbolIndexerOffset
//!              ▼
//! .symidx  local lists of symbol descriptor ordinals
//!              │
//!              ▼
//! .symsdt  symbol descriptors ──► .symsnt / .symsdn (by SymbolIndex)
//!                              └─► .sympst (by SignatureIndex)
//! ```
//!
//! The tables are always rebuilt from scratch. Ordinals are assigned in descriptor order, then in
//! symbol order within each descriptor, so the same descriptors always give the same bytes.

#[cfg(test)]
mod tests;

use crate::error::PatchError;
use crate::records::{DynamicSymbolDescriptor, Ordinal};
use crate::sections;
use crate::symbols::{ResolvedDynamicLinkDescriptor, ResolvedDynamicSymbolDescriptor};
use crate::tables::{
    ArrayTableWriter, LinkDescriptorTable, StringTable, StringTableWriter, SymbolIndexerWriter,
    read_array_table, read_symbol_list, write_link_descriptor_table,
};
use bstr::BStr;
use dynlink_coff::{PeImage, SectionCharacteristics};
use tracing::{debug, debug_span, trace, warn};

/// The encoded contents of the six side-table sections.
#[derive(Clone, Default, Eq, PartialEq, Debug)]
pub struct SideTables {
    pub link_descriptors: Vec<u8>,
    pub symbol_indexer: Vec<u8>,
    pub symbol_descriptors: Vec<u8>,
    pub symbol_names: Vec<u8>,
    pub demangled_names: Vec<u8>,
    pub signatures: Vec<u8>,
}

/// Returns the contents of a section, without the padding that file alignment adds.
pub fn section_bytes<'a>(image: &'a PeImage, name: &str) -> Option<&'a [u8]> {
    let section = image.section(name)?;
    let len = match section.virtual_size() as usize {
        0 => section.data.len(),
        n => n.min(section.data.len()),
    };
    Some(&section.data[..len])
}

impl SideTables {
    /// Encodes the descriptors.
    pub fn build(descriptors: &[ResolvedDynamicLinkDescriptor]) -> Self {
        let _span = debug_span!("SideTables::build").entered();

        let mut names = StringTableWriter::new();
        let mut demangled_names = StringTableWriter::new();
        let mut signatures = StringTableWriter::new();
        let mut symbols = ArrayTableWriter::<DynamicSymbolDescriptor>::new();
        let mut indexer = SymbolIndexerWriter::new();
        let mut links = Vec::with_capacity(descriptors.len());

        for d in descriptors.iter() {
            trace!(module = %d.target_name, "link descriptor");
            let mut locals = Vec::with_capacity(d.resolved_symbols.len());
            for s in d.resolved_symbols.iter() {
                let name = names.push(BStr::new(&s.name));
                let demangled = demangled_names.push(BStr::new(&s.demangled_name));
                debug_assert_eq!(name, demangled);

                let desc = match &s.signature {
                    Some(sig) => {
                        trace!(symbol = %s.name, signature = %sig);
                        let signature = signatures.push(BStr::new(sig));
                        DynamicSymbolDescriptor::with_signature(name, signature)
                    }
                    None => {
                        trace!(symbol = %s.name, address = s.address.unwrap_or(0));
                        DynamicSymbolDescriptor::with_address(name, s.address.unwrap_or(0))
                    }
                };
                locals.push(symbols.push(&desc));
            }
            links.push((BStr::new(&d.target_name), indexer.push_list(&locals)));
        }

        debug!(
            descriptors = links.len(),
            symbols = symbols.len(),
            signatures = signatures.len(),
            "built side tables"
        );

        Self {
            link_descriptors: write_link_descriptor_table(&links),
            symbol_indexer: indexer.finish(),
            symbol_descriptors: symbols.finish(),
            symbol_names: names.finish(),
            demangled_names: demangled_names.finish(),
            signatures: signatures.finish(),
        }
    }

    /// Copies the side tables out of an image. Returns `None` unless all six sections are
    /// present; a partial set is treated as absent.
    pub fn from_image(image: &PeImage) -> Option<Self> {
        let present = sections::SIDE_TABLES
            .iter()
            .filter(|name| image.has_section(name))
            .count();
        if present != sections::SIDE_TABLES.len() {
            if present != 0 {
                warn!(
                    present,
                    "the image has only some of the side-table sections; ignoring them"
                );
            }
            return None;
        }

        let get = |name: &str| section_bytes(image, name).map(|b| b.to_vec());
        Some(Self {
            link_descriptors: get(sections::LINK_DESCRIPTORS)?,
            symbol_indexer: get(sections::SYMBOL_INDEXER)?,
            symbol_descriptors: get(sections::SYMBOL_DESCRIPTORS)?,
            symbol_names: get(sections::SYMBOL_NAMES)?,
            demangled_names: get(sections::SYMBOL_DEMANGLED_NAMES)?,
            signatures: get(sections::SYMBOL_SIGNATURES)?,
        })
    }

    /// Section names paired with their contents, in the order the sections are added.
    pub fn sections(&self) -> [(&'static str, &[u8]); 6] {
        [
            (sections::LINK_DESCRIPTORS, self.link_descriptors.as_slice()),
            (sections::SYMBOL_INDEXER, self.symbol_indexer.as_slice()),
            (sections::SYMBOL_DESCRIPTORS, self.symbol_descriptors.as_slice()),
            (sections::SYMBOL_NAMES, self.symbol_names.as_slice()),
            (sections::SYMBOL_DEMANGLED_NAMES, self.demangled_names.as_slice()),
            (sections::SYMBOL_SIGNATURES, self.signatures.as_slice()),
        ]
    }

    /// Adds the six sections to `image`, replacing any that exist. The layout must be aligned
    /// afterwards.
    pub fn install(&self, image: &mut PeImage) -> anyhow::Result<()> {
        for (name, data) in self.sections() {
            while image.remove_section(name).is_some() {}
            image.add_section(name, data.to_vec(), SectionCharacteristics::READ_ONLY_DATA)?;
        }
        Ok(())
    }

    /// Decodes the tables back into descriptors.
    pub fn decode(&self) -> Result<Vec<ResolvedDynamicLinkDescriptor>, PatchError> {
        let _span = debug_span!("SideTables::decode").entered();

        let malformed = PatchError::MalformedSideTable;

        let links = LinkDescriptorTable::parse(&self.link_descriptors)
            .map_err(|_| malformed(sections::LINK_DESCRIPTORS))?;
        let symbols: Vec<DynamicSymbolDescriptor> = read_array_table(&self.symbol_descriptors)
            .map_err(|_| malformed(sections::SYMBOL_DESCRIPTORS))?;
        let names =
            StringTable::parse(&self.symbol_names).map_err(|_| malformed(sections::SYMBOL_NAMES))?;
        let demangled_names = StringTable::parse(&self.demangled_names)
            .map_err(|_| malformed(sections::SYMBOL_DEMANGLED_NAMES))?;
        let signatures = StringTable::parse(&self.signatures)
            .map_err(|_| malformed(sections::SYMBOL_SIGNATURES))?;

        let mut descriptors = Vec::with_capacity(links.descriptors.len());
        for link in links.descriptors.iter() {
            let target_name = links
                .target_name(link)
                .map_err(|_| malformed(sections::LINK_DESCRIPTORS))?;
            let ordinals = read_symbol_list(&self.symbol_indexer, link.symbol_indexer())
                .map_err(|_| malformed(sections::SYMBOL_INDEXER))?;

            let mut resolved_symbols = Vec::with_capacity(ordinals.len());
            for ordinal in ordinals {
                let sym = ordinal
                    .index()
                    .and_then(|i| symbols.get(i))
                    .ok_or(malformed(sections::SYMBOL_DESCRIPTORS))?;

                let name = names
                    .get(sym.symbol())
                    .ok_or(malformed(sections::SYMBOL_NAMES))?;

                let demangled_name = demangled_names
                    .get(sym.symbol())
                    .map(|s| s.to_string())
                    .unwrap_or_default();

                let signature = match sym.signature() {
                    Ordinal::ABSENT => None,
                    s => Some(
                        signatures
                            .get(s)
                            .ok_or(malformed(sections::SYMBOL_SIGNATURES))?
                            .to_string(),
                    ),
                };

                resolved_symbols.push(ResolvedDynamicSymbolDescriptor {
                    name: name.to_string(),
                    demangled_name,
                    signature,
                    address: sym.address(),
                });
            }

            descriptors.push(ResolvedDynamicLinkDescriptor {
                target_name: target_name.to_string(),
                resolved_symbols,
            });
        }

        debug!(descriptors = descriptors.len(), "decoded side tables");
        Ok(descriptors)
    }
}
