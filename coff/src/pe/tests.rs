use super::*;
use crate::IMAGE_DIRECTORY_ENTRY_IMPORT;
use pretty_hex::PrettyHex;

#[static_init::dynamic]
static INIT_LOGGER: () = {
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .compact()
        .without_time()
        .init();
};

fn two_section_image() -> PeImage {
    let mut image = PeImage::new(IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_AMD64);
    image
        .add_section(
            ".text",
            vec![0xcc; 0x300],
            SectionCharacteristics::IMAGE_SCN_CNT_CODE
                | SectionCharacteristics::IMAGE_SCN_MEM_EXECUTE
                | SectionCharacteristics::IMAGE_SCN_MEM_READ,
        )
        .unwrap();
    image
        .add_section(".rdata", b"hello\0world\0".to_vec(), SectionCharacteristics::READ_ONLY_DATA)
        .unwrap();
    image.align_sections().unwrap();
    image
}

#[test]
fn new_image_layout() {
    let image = two_section_image();
    let sections = image.sections();
    assert_eq!(sections.len(), 2);

    assert_eq!(sections[0].virtual_address(), Rva(0x1000));
    assert_eq!(sections[0].header.pointer_to_raw_data, 0x200);
    assert_eq!(sections[0].header.size_of_raw_data, 0x400);

    assert_eq!(sections[1].virtual_address(), Rva(0x2000));
    assert_eq!(sections[1].virtual_size(), 12);
    assert_eq!(sections[1].header.pointer_to_raw_data, 0x600);
    assert_eq!(sections[1].header.size_of_raw_data, 0x200);

    assert_eq!(image.optional_header().size_of_headers(), 0x200);
    assert_eq!(image.optional_header().size_of_image(), 0x3000);
    assert_eq!(image.file_header().number_of_sections, 2);
}

#[test]
fn write_then_parse() {
    let image = two_section_image();
    let bytes = image.to_bytes().unwrap();
    assert_eq!(bytes.len(), 0x800);
    assert_eq!(&bytes[..2], b"MZ");

    let parsed = PeImage::parse(&bytes).unwrap();
    assert!(parsed.is_pe32_plus());
    assert_eq!(parsed.machine(), IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_AMD64);
    assert_eq!(parsed.sections().len(), 2);
    assert_eq!(parsed.section(".rdata").unwrap().virtual_size(), 12);
    assert!(!parsed.is_layout_stale());

    let again = parsed.to_bytes().unwrap();
    if again != bytes {
        panic!(
            "Bytes do not match:\n{:?}\n{:?}",
            bytes.hex_dump(),
            again.hex_dump()
        );
    }
}

#[test]
fn strings_at_rva() {
    let image = two_section_image();
    assert_eq!(image.strz_at_rva(Rva(0x2000)).unwrap(), "hello");
    assert_eq!(image.strz_at_rva(Rva(0x2006)).unwrap(), "world");
    assert!(image.strz_at_rva(Rva(0x5000)).is_none());
    assert!(image.slice_at_rva(Rva(0x0fff)).is_none());
    assert_eq!(image.slice_at_rva(Rva(0x1000)).unwrap().len(), 0x400);
}

#[test]
fn stale_layout_is_rejected() {
    let mut image = two_section_image();
    image
        .add_section(".new", vec![1, 2, 3], SectionCharacteristics::READ_ONLY_DATA)
        .unwrap();
    assert!(image.is_layout_stale());

    let err = image.to_bytes().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LayoutError>(),
        Some(LayoutError::Stale)
    ));

    image.align_sections().unwrap();
    assert_eq!(image.section(".new").unwrap().virtual_address(), Rva(0x3000));
    image.to_bytes().unwrap();
}

#[test]
fn remove_section_restores_layout() {
    let image = two_section_image();
    let original = image.to_bytes().unwrap();

    let mut edited = image.clone();
    edited
        .add_section(".extra", vec![0xab; 0x1234], SectionCharacteristics::READ_ONLY_DATA)
        .unwrap();
    edited.align_sections().unwrap();
    assert_eq!(edited.optional_header().size_of_image(), 0x5000);

    assert!(edited.remove_section(".extra").is_some());
    assert!(edited.remove_section(".extra").is_none());
    edited.align_sections().unwrap();

    assert_eq!(edited.to_bytes().unwrap(), original);
}

#[test]
fn existing_sections_keep_their_addresses() {
    let mut image = two_section_image();
    // Leave a gap between .text and .rdata.
    image.sections[1].header.virtual_address = 0x3000;
    image.align_sections().unwrap();
    assert_eq!(image.section(".rdata").unwrap().virtual_address(), Rva(0x3000));
    assert_eq!(image.optional_header().size_of_image(), 0x4000);

    let original = image.to_bytes().unwrap();
    let mut parsed = PeImage::parse(&original).unwrap();
    parsed
        .add_section(".new", vec![1; 0x10], SectionCharacteristics::READ_ONLY_DATA)
        .unwrap();
    parsed.align_sections().unwrap();

    let vas: Vec<Rva> = parsed.sections().iter().map(|s| s.virtual_address()).collect();
    assert_eq!(vas, [Rva(0x1000), Rva(0x3000), Rva(0x4000)]);
    assert_eq!(parsed.optional_header().size_of_image(), 0x5000);
    assert_eq!(parsed.strz_at_rva(Rva(0x3000)).unwrap(), "hello");

    assert!(parsed.remove_section(".new").is_some());
    parsed.align_sections().unwrap();
    assert_eq!(parsed.to_bytes().unwrap(), original);
}

#[test]
fn new_sections_follow_highest_section() {
    let mut image = two_section_image();
    // Sections need not be listed in address order.
    image.sections[0].header.virtual_address = 0x5000;
    image
        .add_section(".new", vec![1; 0x10], SectionCharacteristics::READ_ONLY_DATA)
        .unwrap();
    image.align_sections().unwrap();

    let vas: Vec<Rva> = image.sections().iter().map(|s| s.virtual_address()).collect();
    assert_eq!(vas, [Rva(0x5000), Rva(0x2000), Rva(0x6000)]);
    assert_eq!(image.optional_header().size_of_image(), 0x7000);
}

#[test]
fn data_directories() {
    let mut image = two_section_image();
    assert!(
        !image
            .data_directory(IMAGE_DIRECTORY_ENTRY_IMPORT)
            .unwrap()
            .is_present()
    );
    image
        .set_data_directory(
            IMAGE_DIRECTORY_ENTRY_IMPORT,
            IMAGE_DATA_DIRECTORY::new(0x2000, 0x28),
        )
        .unwrap();

    let parsed = PeImage::parse(&image.to_bytes().unwrap()).unwrap();
    assert_eq!(
        parsed.data_directory(IMAGE_DIRECTORY_ENTRY_IMPORT),
        Some(IMAGE_DATA_DIRECTORY::new(0x2000, 0x28))
    );
    assert!(image.set_data_directory(16, IMAGE_DATA_DIRECTORY::default()).is_err());
    assert!(image.data_directory(16).is_none());
}

#[test]
fn overlay_follows_last_section() {
    let image = two_section_image();
    let mut bytes = image.to_bytes().unwrap();
    let overlay_offset = bytes.len() as u32;
    bytes.extend_from_slice(&[0x5a; 0x18]);

    let mut parsed = PeImage::parse(&bytes).unwrap();
    parsed
        .set_data_directory(
            IMAGE_DIRECTORY_ENTRY_SECURITY,
            IMAGE_DATA_DIRECTORY::new(overlay_offset, 0x18),
        )
        .unwrap();
    parsed
        .add_section(".tail", vec![7; 0x10], SectionCharacteristics::READ_ONLY_DATA)
        .unwrap();
    parsed.align_sections().unwrap();

    let out = parsed.to_bytes().unwrap();
    assert_eq!(out.len(), 0xa00 + 0x18);
    assert_eq!(&out[0xa00..], &[0x5a; 0x18]);
    assert_eq!(
        parsed
            .data_directory(IMAGE_DIRECTORY_ENTRY_SECURITY)
            .unwrap()
            .virtual_address,
        0xa00
    );
}

#[test]
fn headers_cannot_grow_into_first_section() {
    let mut image = PeImage::new(IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_I386);
    for i in 0..120 {
        image
            .add_section(&format!(".s{i}"), vec![0; 4], SectionCharacteristics::READ_ONLY_DATA)
            .unwrap();
    }
    // With no fixed first section, the headers simply take more room.
    image.align_sections().unwrap();
    let first_va = image.sections()[0].virtual_address();
    assert_eq!(first_va, Rva(0x2000));

    // Once the first section has an address, that address is fixed.
    for i in 120..220 {
        image
            .add_section(&format!(".s{i}"), vec![0; 4], SectionCharacteristics::READ_ONLY_DATA)
            .unwrap();
    }
    let err = image.align_sections().unwrap_err();
    assert!(matches!(err, LayoutError::HeadersOverflow { .. }));
}

#[test]
fn rejects_non_pe() {
    let err = PeImage::parse(b"not a pe file at all").err().unwrap();
    assert!(err.downcast_ref::<BadImageError>().is_some());

    let mut bytes = two_section_image().to_bytes().unwrap();
    bytes[0x40] = b'X';
    let err = PeImage::parse(&bytes).err().unwrap();
    assert!(err.downcast_ref::<BadImageError>().is_some());

    let err = PeImage::parse(&bytes[..0x30]).err().unwrap();
    assert!(err.downcast_ref::<BadImageError>().is_some());
}

#[test]
fn long_section_names_are_rejected() {
    let mut image = two_section_image();
    assert!(
        image
            .add_section(".toolongname", vec![], SectionCharacteristics::READ_ONLY_DATA)
            .is_err()
    );
    assert!(!image.is_layout_stale());
}
