use super::*;
use crate::records::{IndexerOffset, NameOffset};
use dynlink_coff::IMAGE_FILE_MACHINE;
use pretty_hex::PrettyHex;

macro_rules! assert_bytes_eq {
    ($a:expr, $b:expr) => {
        match (&($a), &($b)) {
            (a, b) => {
                let a_bytes: &[u8] = a.as_ref();
                let b_bytes: &[u8] = b.as_ref();

                if a_bytes != b_bytes {
                    panic!(
                        "Bytes do not match:\n{}\n{}",
                        a_bytes.hex_dump(),
                        b_bytes.hex_dump()
                    );
                }
            }
        }
    };
}

fn symbol(
    name: &str,
    demangled: &str,
    signature: Option<&str>,
    address: Option<u64>,
) -> ResolvedDynamicSymbolDescriptor {
    ResolvedDynamicSymbolDescriptor {
        name: name.to_string(),
        demangled_name: demangled.to_string(),
        signature: signature.map(|s| s.to_string()),
        address,
    }
}

fn sample() -> Vec<ResolvedDynamicLinkDescriptor> {
    vec![
        ResolvedDynamicLinkDescriptor {
            target_name: "foo.dll".to_string(),
            resolved_symbols: vec![
                symbol("?Bar@@YAXXZ", "void __cdecl Bar(void)", None, Some(0x100)),
                symbol("Baz", "", Some("48 8B ? 89"), None),
            ],
        },
        ResolvedDynamicLinkDescriptor {
            target_name: "empty.dll".to_string(),
            resolved_symbols: vec![],
        },
        ResolvedDynamicLinkDescriptor {
            target_name: "qux.dll".to_string(),
            resolved_symbols: vec![symbol("Qux", "", Some("CC"), None)],
        },
    ]
}

#[test]
fn single_symbol_layout() {
    let tables = SideTables::build(&[ResolvedDynamicLinkDescriptor {
        target_name: "foo.dll".to_string(),
        resolved_symbols: vec![symbol("Bar", "", None, Some(0x100))],
    }]);

    assert_bytes_eq!(
        tables.link_descriptors,
        b"\x01\0\0\0\x0c\0\0\0\x01\0\0\0foo.dll\0"
    );
    assert_bytes_eq!(tables.symbol_indexer, [1, 0, 0, 0, 1, 0, 0, 0]);
    assert_bytes_eq!(
        tables.symbol_descriptors,
        [
            1, 0, 0, 0, // count
            1, 0, 0, 0, // SymbolIndex
            0, 0, 0, 0, // SignatureIndex
            0, 1, 0, 0, 0, 0, 0, 0, // AddressOffset
        ]
    );
    assert_bytes_eq!(tables.symbol_names, b"\x01\0\0\0Bar\0");
    assert_bytes_eq!(tables.demangled_names, b"\x01\0\0\0\0");
    assert_bytes_eq!(tables.signatures, [0, 0, 0, 0]);
}

#[test]
fn ordinals_follow_table_order() {
    let tables = SideTables::build(&sample());

    let links = LinkDescriptorTable::parse(&tables.link_descriptors).unwrap();
    assert_eq!(links.descriptors.len(), 3);
    assert_eq!(links.descriptors[0].target_name(), NameOffset(4 + 3 * 8));
    assert_eq!(links.descriptors[0].symbol_indexer(), IndexerOffset(1));
    // foo.dll's list holds two ordinals, so the next list starts 12 bytes later.
    assert_eq!(links.descriptors[1].symbol_indexer(), IndexerOffset(13));
    assert_eq!(links.descriptors[2].symbol_indexer(), IndexerOffset(17));

    let symbols: Vec<DynamicSymbolDescriptor> =
        read_array_table(&tables.symbol_descriptors).unwrap();
    assert_eq!(symbols.len(), 3);
    assert_eq!(symbols[1].symbol(), Ordinal(2));
    assert_eq!(symbols[1].signature(), Ordinal(1));
    assert_eq!(symbols[1].address_offset.get(), 0);
    assert_eq!(symbols[2].symbol(), Ordinal(3));
    assert_eq!(symbols[2].signature(), Ordinal(2));

    let names = StringTable::parse(&tables.symbol_names).unwrap();
    let demangled = StringTable::parse(&tables.demangled_names).unwrap();
    let signatures = StringTable::parse(&tables.signatures).unwrap();
    assert_eq!(names.get(symbols[0].symbol()).unwrap(), "?Bar@@YAXXZ");
    assert_eq!(
        demangled.get(symbols[0].symbol()).unwrap(),
        "void __cdecl Bar(void)"
    );
    assert_eq!(signatures.get(symbols[2].signature()).unwrap(), "CC");
    assert_eq!(names.len(), demangled.len());
}

#[test]
fn decode_inverts_build() {
    let descriptors = sample();
    let tables = SideTables::build(&descriptors);
    assert_eq!(tables.decode().unwrap(), descriptors);

    // Rebuilding what was decoded gives the same bytes.
    assert_eq!(SideTables::build(&tables.decode().unwrap()), tables);

    assert!(SideTables::build(&[]).decode().unwrap().is_empty());
}

#[test]
fn malformed_tables() {
    let tables = SideTables::build(&sample());

    let mut t = tables.clone();
    t.symbol_names = StringTableWriter::new().finish();
    assert!(matches!(
        t.decode(),
        Err(PatchError::MalformedSideTable(sections::SYMBOL_NAMES))
    ));

    let mut t = tables.clone();
    t.symbol_indexer.truncate(6);
    assert!(matches!(
        t.decode(),
        Err(PatchError::MalformedSideTable(sections::SYMBOL_INDEXER))
    ));

    let mut t = tables.clone();
    t.symbol_descriptors.truncate(4 + 16);
    assert!(matches!(
        t.decode(),
        Err(PatchError::MalformedSideTable(sections::SYMBOL_DESCRIPTORS))
    ));

    let mut t = tables.clone();
    t.signatures = StringTableWriter::new().finish();
    assert!(matches!(
        t.decode(),
        Err(PatchError::MalformedSideTable(sections::SYMBOL_SIGNATURES))
    ));

    let mut t = tables.clone();
    t.link_descriptors.clear();
    assert!(matches!(
        t.decode(),
        Err(PatchError::MalformedSideTable(sections::LINK_DESCRIPTORS))
    ));

    // Missing demangled names are tolerated.
    let mut t = tables;
    t.demangled_names = StringTableWriter::new().finish();
    let decoded = t.decode().unwrap();
    assert_eq!(decoded[0].resolved_symbols[0].demangled_name, "");
}

#[test]
fn partial_family_is_absent() {
    let tables = SideTables::build(&sample());
    let mut image = PeImage::new(IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_AMD64);
    assert!(SideTables::from_image(&image).is_none());

    tables.install(&mut image).unwrap();
    image.align_sections().unwrap();
    assert_eq!(image.sections().len(), 6);

    let found = SideTables::from_image(&image).unwrap();
    assert_eq!(found, tables);

    image.remove_section(sections::SYMBOL_DEMANGLED_NAMES);
    assert!(SideTables::from_image(&image).is_none());

    // Installing again replaces the sections rather than duplicating them.
    tables.install(&mut image).unwrap();
    tables.install(&mut image).unwrap();
    assert_eq!(image.sections().len(), 6);
}
