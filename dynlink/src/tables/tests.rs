use super::*;
use crate::records::DynamicSymbolDescriptor;
use bstr::ByteSlice;

#[test]
fn array_table_sizes() {
    for n in [0u32, 1, 100] {
        let mut w = ArrayTableWriter::<DynamicSymbolDescriptor>::new();
        for i in 0..n {
            let ordinal = w.push(&DynamicSymbolDescriptor::with_address(
                Ordinal(i + 1),
                u64::from(i) * 0x10,
            ));
            assert_eq!(ordinal, Ordinal(i + 1));
        }
        assert_eq!(w.len(), n as usize);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 4 + 16 * n as usize);
        assert_eq!(&bytes[..4], &n.to_le_bytes());

        let records: Vec<DynamicSymbolDescriptor> = read_array_table(&bytes).unwrap();
        assert_eq!(records.len(), n as usize);
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.symbol(), Ordinal::from_index(i));
            assert_eq!(r.address_offset.get(), i as u64 * 0x10);
        }
    }
}

#[test]
fn array_table_count_is_advisory() {
    let mut w = ArrayTableWriter::<DynamicImportDescriptor>::new();
    w.push(&DynamicImportDescriptor::new(NameOffset(1), IndexerOffset(2)));
    w.push(&DynamicImportDescriptor::new(NameOffset(3), IndexerOffset(4)));
    let mut bytes = w.finish();

    // Claim more records than are present.
    bytes[0] = 5;
    let records: Vec<DynamicImportDescriptor> = read_array_table(&bytes).unwrap();
    assert_eq!(records.len(), 2);

    // Claim fewer; the rest is not read.
    bytes[0] = 1;
    let records: Vec<DynamicImportDescriptor> = read_array_table(&bytes).unwrap();
    assert_eq!(records.len(), 1);

    assert!(read_array_table::<DynamicImportDescriptor>(&[1, 0]).is_err());
}

#[test]
fn string_table_ordinals() {
    let mut w = StringTableWriter::new();
    assert_eq!(w.push(BStr::new("?Bar@@YAXXZ")), Ordinal(1));
    assert_eq!(w.push(BStr::new("")), Ordinal(2));
    assert_eq!(w.push(BStr::new("?Bar@@YAXXZ")), Ordinal(3));
    let bytes = w.finish();
    assert_eq!(&bytes[..4], &[3, 0, 0, 0]);
    assert_eq!(&bytes[4..], b"?Bar@@YAXXZ\0\0?Bar@@YAXXZ\0");

    let t = StringTable::parse(&bytes).unwrap();
    assert_eq!(t.len(), 3);
    assert_eq!(t.get(Ordinal(1)).unwrap(), "?Bar@@YAXXZ");
    assert_eq!(t.get(Ordinal(2)).unwrap(), "");
    assert_eq!(t.get(Ordinal(3)).unwrap(), "?Bar@@YAXXZ");
    assert!(t.get(Ordinal::ABSENT).is_none());
    assert!(t.get(Ordinal(4)).is_none());
}

#[test]
fn string_table_truncated() {
    let bytes = b"\x03\0\0\0one\0two";
    let t = StringTable::parse(bytes).unwrap();
    assert_eq!(t.iter().collect::<Vec<_>>(), vec!["one".as_bytes().as_bstr()]);

    let empty = StringTableWriter::new().finish();
    assert_eq!(empty, [0, 0, 0, 0]);
    assert!(StringTable::parse(&empty).unwrap().is_empty());
}

#[test]
fn symbol_indexer_lists() {
    let mut w = SymbolIndexerWriter::new();
    let first = w.push_list(&[Ordinal(1), Ordinal(2)]);
    let empty = w.push_list(&[]);
    let third = w.push_list(&[Ordinal(3)]);
    let bytes = w.finish();

    assert_eq!(first, IndexerOffset(1));
    assert_eq!(empty, IndexerOffset(13));
    assert_eq!(third, IndexerOffset(17));
    assert_eq!(bytes.len(), 12 + 4 + 8);

    assert_eq!(
        read_symbol_list(&bytes, first).unwrap(),
        vec![Ordinal(1), Ordinal(2)]
    );
    assert!(read_symbol_list(&bytes, empty).unwrap().is_empty());
    assert_eq!(read_symbol_list(&bytes, third).unwrap(), vec![Ordinal(3)]);

    assert!(read_symbol_list(&bytes, IndexerOffset(0)).is_err());
    assert!(read_symbol_list(&bytes, IndexerOffset(100)).is_err());
    // A list that claims more ordinals than remain.
    assert!(read_symbol_list(&bytes[..20], third).is_err());
}

#[test]
fn link_descriptor_names() {
    let bytes = write_link_descriptor_table(&[
        (BStr::new("foo.dll"), IndexerOffset(1)),
        (BStr::new("bar.dll"), IndexerOffset(13)),
    ]);
    assert_eq!(&bytes[..4], &[2, 0, 0, 0]);
    assert_eq!(&bytes[20..], b"foo.dll\0bar.dll\0");

    let table = LinkDescriptorTable::parse(&bytes).unwrap();
    assert_eq!(table.descriptors.len(), 2);
    assert_eq!(table.descriptors[0].target_name(), NameOffset(20));
    assert_eq!(table.descriptors[1].target_name(), NameOffset(28));
    assert_eq!(table.descriptors[1].symbol_indexer(), IndexerOffset(13));
    assert_eq!(table.target_name(&table.descriptors[0]).unwrap(), "foo.dll");
    assert_eq!(table.target_name(&table.descriptors[1]).unwrap(), "bar.dll");

    let bad = DynamicImportDescriptor::new(NameOffset(1000), IndexerOffset(1));
    assert!(table.target_name(&bad).is_err());

    let empty = write_link_descriptor_table(&[]);
    assert_eq!(empty, [0, 0, 0, 0]);
}
