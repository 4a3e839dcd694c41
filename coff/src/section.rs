//! Image section
//!
//! # References
//! * <https://learn.microsoft.com/en-us/windows/win32/api/winnt/ns-winnt-image_section_header>

use bstr::BStr;
use core::fmt::Debug;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy_derive::*;

#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Default,
    Hash,
    Ord,
    PartialOrd,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
#[repr(transparent)]
pub struct SectionCharacteristics(pub u32);

bitflags::bitflags! {
    impl SectionCharacteristics: u32 {
        const IMAGE_SCN_CNT_CODE                   = 0x00000020;  // Section contains code.
        const IMAGE_SCN_CNT_INITIALIZED_DATA       = 0x00000040;  // Section contains initialized data.
        const IMAGE_SCN_CNT_UNINITIALIZED_DATA     = 0x00000080;  // Section contains uninitialized data.

        const IMAGE_SCN_LNK_INFO                   = 0x00000200;  // Section contains comments or some other type of information.
        const IMAGE_SCN_LNK_REMOVE                 = 0x00000800;  // Section contents will not become part of image.

        const IMAGE_SCN_ALIGN_MASK                 = 0x00F00000;

        const IMAGE_SCN_MEM_DISCARDABLE            = 0x02000000;  // Section can be discarded.
        const IMAGE_SCN_MEM_NOT_CACHED             = 0x04000000;  // Section is not cachable.
        const IMAGE_SCN_MEM_NOT_PAGED              = 0x08000000;  // Section is not pageable.
        const IMAGE_SCN_MEM_SHARED                 = 0x10000000;  // Section is shareable.
        const IMAGE_SCN_MEM_EXECUTE                = 0x20000000;  // Section is executable.
        const IMAGE_SCN_MEM_READ                   = 0x40000000;  // Section is readable.
        const IMAGE_SCN_MEM_WRITE                  = 0x80000000;  // Section is writeable.
    }
}

impl SectionCharacteristics {
    /// Read-only initialized data.
    pub const READ_ONLY_DATA: Self = Self(
        Self::IMAGE_SCN_CNT_INITIALIZED_DATA.bits() | Self::IMAGE_SCN_MEM_READ.bits(),
    );

    /// Returns true if this contains `IMAGE_SCN_MEM_READ`
    pub fn is_read(self) -> bool {
        self.intersects(Self::IMAGE_SCN_MEM_READ)
    }

    /// Returns true if this contains `IMAGE_SCN_MEM_WRITE`
    pub fn is_write(self) -> bool {
        self.intersects(Self::IMAGE_SCN_MEM_WRITE)
    }

    /// Returns true if this contains `IMAGE_SCN_MEM_EXECUTE`
    pub fn is_exec(self) -> bool {
        self.intersects(Self::IMAGE_SCN_MEM_EXECUTE)
    }
}

impl Debug for SectionCharacteristics {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{:08x}", self.0)?;
        if self.is_read() {
            f.write_str(" R")?;
        }
        if self.is_write() {
            f.write_str(" W")?;
        }
        if self.is_exec() {
            f.write_str(" X")?;
        }
        write!(f, "]")
    }
}

pub const IMAGE_SIZEOF_SHORT_NAME: usize = 8;

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_SECTION_HEADER {
    pub name: [u8; IMAGE_SIZEOF_SHORT_NAME],
    pub physical_address_or_virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: SectionCharacteristics,
}

impl IMAGE_SECTION_HEADER {
    pub fn name(&self) -> &BStr {
        BStr::new(if let Some(i) = self.name.iter().position(|&b| b == 0) {
            &self.name[..i]
        } else {
            &self.name
        })
    }

    /// Builds the fixed-size, NUL-padded name field. Returns `None` if `name` does not fit.
    pub fn encode_name(name: &str) -> Option<[u8; IMAGE_SIZEOF_SHORT_NAME]> {
        let bytes = name.as_bytes();
        if bytes.len() > IMAGE_SIZEOF_SHORT_NAME || bytes.contains(&0) {
            return None;
        }
        let mut field = [0u8; IMAGE_SIZEOF_SHORT_NAME];
        field[..bytes.len()].copy_from_slice(bytes);
        Some(field)
    }
}

pub const IMAGE_SIZEOF_SECTION_HEADER: usize = 40;

const_assert_eq!(
    size_of::<IMAGE_SECTION_HEADER>(),
    IMAGE_SIZEOF_SECTION_HEADER
);

#[test]
fn section_names() {
    let mut h = IMAGE_SECTION_HEADER::default();
    h.name = IMAGE_SECTION_HEADER::encode_name(".symidx").unwrap();
    assert_eq!(h.name(), ".symidx");

    assert!(IMAGE_SECTION_HEADER::encode_name(".12345678").is_none());
    assert!(IMAGE_SECTION_HEADER::encode_name("12345678").is_some());
    assert!(IMAGE_SECTION_HEADER::encode_name("a\0b").is_none());
}
