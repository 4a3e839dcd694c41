//! Image headers: DOS header, file header, optional header and data directories.
//!
//! # References
//! * <https://learn.microsoft.com/en-us/windows/win32/debug/pe-format>

use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, FromZeros, IntoBytes};
use zerocopy_derive::*;

/// `MZ`
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5a4d;
/// `PE\0\0`
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

#[repr(C)]
#[derive(Clone, Default, Eq, PartialEq, Hash, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct IMAGE_DOS_HEADER {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],
    /// File offset of the NT headers.
    pub e_lfanew: u32,
}

pub const IMAGE_SIZEOF_DOS_HEADER: usize = 64;
const_assert_eq!(size_of::<IMAGE_DOS_HEADER>(), IMAGE_SIZEOF_DOS_HEADER);

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_FILE_HEADER {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

pub const IMAGE_SIZEOF_FILE_HEADER: usize = 20;
const_assert_eq!(size_of::<IMAGE_FILE_HEADER>(), IMAGE_SIZEOF_FILE_HEADER);

pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
pub const IMAGE_FILE_LARGE_ADDRESS_AWARE: u16 = 0x0020;
pub const IMAGE_FILE_32BIT_MACHINE: u16 = 0x0100;
pub const IMAGE_FILE_DLL: u16 = 0x2000;

#[repr(C)]
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_DATA_DIRECTORY {
    pub virtual_address: u32,
    pub size: u32,
}

impl IMAGE_DATA_DIRECTORY {
    pub fn new(virtual_address: u32, size: u32) -> Self {
        Self {
            virtual_address,
            size,
        }
    }

    /// A directory is present when both its address and its size are nonzero.
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size != 0
    }
}

pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: usize = 16;

pub const IMAGE_DIRECTORY_ENTRY_EXPORT: usize = 0;
pub const IMAGE_DIRECTORY_ENTRY_IMPORT: usize = 1;
pub const IMAGE_DIRECTORY_ENTRY_RESOURCE: usize = 2;
pub const IMAGE_DIRECTORY_ENTRY_EXCEPTION: usize = 3;
/// The certificate table. Unlike the other directories, its address is a file offset.
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: usize = 4;
pub const IMAGE_DIRECTORY_ENTRY_BASERELOC: usize = 5;
pub const IMAGE_DIRECTORY_ENTRY_DEBUG: usize = 6;
pub const IMAGE_DIRECTORY_ENTRY_IAT: usize = 12;

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_OPTIONAL_HEADER32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [IMAGE_DATA_DIRECTORY; IMAGE_NUMBEROF_DIRECTORY_ENTRIES],
}

const_assert_eq!(size_of::<IMAGE_OPTIONAL_HEADER32>(), 224);

#[repr(C)]
#[derive(
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    IntoBytes,
    FromBytes,
    Immutable,
    KnownLayout,
)]
pub struct IMAGE_OPTIONAL_HEADER64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
    pub data_directory: [IMAGE_DATA_DIRECTORY; IMAGE_NUMBEROF_DIRECTORY_ENTRIES],
}

const_assert_eq!(size_of::<IMAGE_OPTIONAL_HEADER64>(), 240);

pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10b;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20b;

pub const IMAGE_SUBSYSTEM_WINDOWS_CUI: u16 = 3;

/// A relative virtual address: an offset from the base address the image is loaded at.
///
/// This is kept distinct from plain `u32` offsets so that offsets into private buffers are never
/// confused with addresses in the loaded image.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Rva(pub u32);

impl core::fmt::Display for Rva {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// The optional header, in either of its two layouts.
#[derive(Clone)]
pub enum OptionalHeader {
    Pe32(IMAGE_OPTIONAL_HEADER32),
    Pe64(IMAGE_OPTIONAL_HEADER64),
}

macro_rules! with_header {
    ($self:expr, $h:ident => $e:expr) => {
        match $self {
            OptionalHeader::Pe32($h) => $e,
            OptionalHeader::Pe64($h) => $e,
        }
    };
}

impl OptionalHeader {
    /// Decodes the optional header from the bytes that follow the file header. `bytes` should be
    /// exactly `size_of_optional_header` long. Headers that declare fewer than 16 data directories
    /// are zero-extended.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let magic = u16::from_le_bytes([*bytes.first()?, *bytes.get(1)?]);
        match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => {
                let mut h = IMAGE_OPTIONAL_HEADER32::new_zeroed();
                copy_prefix(h.as_mut_bytes(), bytes);
                Some(Self::Pe32(h))
            }
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => {
                let mut h = IMAGE_OPTIONAL_HEADER64::new_zeroed();
                copy_prefix(h.as_mut_bytes(), bytes);
                Some(Self::Pe64(h))
            }
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        with_header!(self, h => h.as_bytes())
    }

    pub fn magic(&self) -> u16 {
        with_header!(self, h => h.magic)
    }

    pub fn is_pe32_plus(&self) -> bool {
        matches!(self, Self::Pe64(_))
    }

    pub fn section_alignment(&self) -> u32 {
        with_header!(self, h => h.section_alignment)
    }

    pub fn file_alignment(&self) -> u32 {
        with_header!(self, h => h.file_alignment)
    }

    pub fn size_of_headers(&self) -> u32 {
        with_header!(self, h => h.size_of_headers)
    }

    pub fn set_size_of_headers(&mut self, value: u32) {
        with_header!(self, h => h.size_of_headers = value)
    }

    pub fn size_of_image(&self) -> u32 {
        with_header!(self, h => h.size_of_image)
    }

    pub fn set_size_of_image(&mut self, value: u32) {
        with_header!(self, h => h.size_of_image = value)
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        with_header!(self, h => h.number_of_rva_and_sizes)
    }

    /// Returns the data directory at `index`, or `None` if the header does not declare that many
    /// directories.
    pub fn data_directory(&self, index: usize) -> Option<IMAGE_DATA_DIRECTORY> {
        if index >= self.number_of_rva_and_sizes() as usize {
            return None;
        }
        with_header!(self, h => h.data_directory.get(index).copied())
    }

    pub fn data_directory_mut(&mut self, index: usize) -> Option<&mut IMAGE_DATA_DIRECTORY> {
        if index >= self.number_of_rva_and_sizes() as usize {
            return None;
        }
        with_header!(self, h => h.data_directory.get_mut(index))
    }
}

fn copy_prefix(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}
