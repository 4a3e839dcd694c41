use super::*;

fn encode<T: Record>(r: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    r.encode(&mut Encoder::new(&mut buf));
    buf
}

#[test]
fn record_sizes() {
    assert_eq!(ImportDirectoryEntry::SIZE, 20);
    assert_eq!(DynamicImportDescriptor::SIZE, 8);
    assert_eq!(DynamicSymbolDescriptor::SIZE, 16);
    assert_eq!(NormalImportsHeader::SIZE, 8);
}

#[test]
fn extreme_values_survive() {
    for v in [0u32, 1, 0x1234_5678, u32::MAX] {
        let entry = ImportDirectoryEntry::new(v, v, v, Rva(v), v);
        let bytes = encode(&entry);
        assert_eq!(bytes.len(), 20);
        assert_eq!(
            ImportDirectoryEntry::decode(&mut Parser::new(&bytes)),
            Some(entry)
        );

        let desc = DynamicImportDescriptor::new(NameOffset(v), IndexerOffset(v));
        let bytes = encode(&desc);
        let decoded = DynamicImportDescriptor::decode(&mut Parser::new(&bytes)).unwrap();
        assert_eq!(decoded.target_name(), NameOffset(v));
        assert_eq!(decoded.symbol_indexer(), IndexerOffset(v));
    }

    for a in [0u64, 1, u64::MAX] {
        let sym = DynamicSymbolDescriptor::with_address(Ordinal(u32::MAX), a);
        let bytes = encode(&sym);
        let decoded = DynamicSymbolDescriptor::decode(&mut Parser::new(&bytes)).unwrap();
        assert_eq!(decoded, sym);
        assert_eq!(decoded.address_offset.get(), a);
    }
}

#[test]
fn little_endian_layout() {
    let sym = DynamicSymbolDescriptor::with_address(Ordinal(1), 0x100);
    assert_eq!(
        encode(&sym),
        [1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0]
    );

    let header = NormalImportsHeader::new(Rva(0x2000), 0x28);
    assert_eq!(encode(&header), [0, 0x20, 0, 0, 0x28, 0, 0, 0]);
}

#[test]
fn short_input_is_absent() {
    let bytes = [0xffu8; 15];
    let mut p = Parser::new(&bytes);
    assert!(DynamicSymbolDescriptor::decode(&mut p).is_none());
    assert_eq!(p.len(), 15);

    // 15 bytes is enough for one 8-byte descriptor but not two.
    assert!(DynamicImportDescriptor::decode(&mut p).is_some());
    assert!(DynamicImportDescriptor::decode(&mut p).is_none());
    assert_eq!(p.len(), 7);

    assert!(ImportDirectoryEntry::decode(&mut Parser::new(&[])).is_none());
}

#[test]
fn import_entries_stop_at_terminator() {
    let a = ImportDirectoryEntry::new(0x1100, 0, 0, Rva(0x1200), 0x1300);
    let b = ImportDirectoryEntry::new(0x1400, 0, 0, Rva(0x1500), 0x1600);

    let mut buf = Vec::new();
    ImportDirectoryEntry::write_all(&[a.clone(), b.clone()], &mut Encoder::new(&mut buf));
    assert_eq!(buf.len(), 60);
    assert!(buf[40..].iter().all(|&x| x == 0));

    // Anything after the terminator is ignored.
    buf.extend_from_slice(encode(&a).as_slice());
    assert_eq!(ImportDirectoryEntry::read_all(&buf), vec![a.clone(), b.clone()]);

    // Without a terminator, reading stops at the end of the data, and a trailing partial entry
    // is ignored.
    let mut unterminated = encode(&a);
    unterminated.extend_from_slice(&[1, 2, 3]);
    assert_eq!(ImportDirectoryEntry::read_all(&unterminated), vec![a]);

    assert!(ImportDirectoryEntry::ZERO.is_zero());
    assert!(!b.is_zero());
}

#[test]
fn ordinals_are_one_based() {
    assert_eq!(Ordinal::from_index(0), Ordinal(1));
    assert_eq!(Ordinal(1).index(), Some(0));
    assert_eq!(Ordinal::ABSENT.index(), None);
    assert!(Ordinal(0).is_absent());

    assert_eq!(IndexerOffset::from_position(0), IndexerOffset(1));
    assert_eq!(IndexerOffset(9).position(), Some(8));
    assert_eq!(IndexerOffset(0).position(), None);
}

#[test]
fn symbol_address() {
    assert_eq!(
        DynamicSymbolDescriptor::with_address(Ordinal(1), 0x100).address(),
        Some(0x100)
    );
    assert_eq!(
        DynamicSymbolDescriptor::with_address(Ordinal(1), 0).address(),
        None
    );

    let sig = DynamicSymbolDescriptor::with_signature(Ordinal(2), Ordinal(1));
    assert_eq!(sig.address_offset.get(), 0);
    assert_eq!(sig.address(), None);
    assert_eq!(sig.signature(), Ordinal(1));
}
