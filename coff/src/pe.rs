//! An in-memory PE image that supports editing the section list.
//!
//! [`PeImage`] keeps just enough of the file to write it back out: the DOS header and stub, the
//! NT headers, the raw data of every section, and the overlay (anything after the last section's
//! raw data, usually an Authenticode certificate table).
//!
//! Adding or removing sections invalidates the layout. [`PeImage::align_sections`] must be called
//! afterwards to recompute virtual addresses, file offsets and the header sizes. Serializing an
//! image whose layout is stale fails with [`LayoutError::Stale`]; it is never silently fixed up.

#[cfg(test)]
mod tests;

use crate::{
    IMAGE_DATA_DIRECTORY, IMAGE_DIRECTORY_ENTRY_SECURITY, IMAGE_DOS_HEADER, IMAGE_DOS_SIGNATURE,
    IMAGE_FILE_32BIT_MACHINE, IMAGE_FILE_EXECUTABLE_IMAGE, IMAGE_FILE_HEADER,
    IMAGE_FILE_LARGE_ADDRESS_AWARE, IMAGE_FILE_MACHINE, IMAGE_NT_OPTIONAL_HDR32_MAGIC,
    IMAGE_NT_OPTIONAL_HDR64_MAGIC, IMAGE_NT_SIGNATURE, IMAGE_NUMBEROF_DIRECTORY_ENTRIES,
    IMAGE_OPTIONAL_HEADER32, IMAGE_OPTIONAL_HEADER64, IMAGE_SECTION_HEADER,
    IMAGE_SIZEOF_DOS_HEADER, IMAGE_SIZEOF_FILE_HEADER, IMAGE_SIZEOF_SECTION_HEADER,
    IMAGE_SUBSYSTEM_WINDOWS_CUI, OptionalHeader, Rva, SectionCharacteristics, align_up,
};
use anyhow::{Context, bail};
use bstr::BStr;
use std::fmt::Display;
use std::path::Path;
use tracing::{debug, debug_span, trace, warn};
use zerocopy::{FromBytes, IntoBytes};

/// The input is not a PE image, or its headers are inconsistent.
#[derive(Clone, Debug)]
pub struct BadImageError(pub String);

impl std::error::Error for BadImageError {}

impl Display for BadImageError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "The file is not a valid PE image: {}", self.0)
    }
}

/// Errors that prevent the section layout from being computed or written.
#[derive(Clone, Debug)]
pub enum LayoutError {
    /// Sections were added or removed and `align_sections` has not been called since.
    Stale,
    /// The section table no longer fits below the first section.
    HeadersOverflow { size_of_headers: u32, first_section: u32 },
    /// A size or address does not fit in 32 bits.
    Overflow,
    /// The image has more sections than the file header can describe.
    TooManySections(usize),
}

impl std::error::Error for LayoutError {}

impl Display for LayoutError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Stale => fmt.write_str(
                "The section layout is stale. Sections must be aligned before the image is written.",
            ),
            Self::HeadersOverflow {
                size_of_headers,
                first_section,
            } => write!(
                fmt,
                "The image headers (0x{size_of_headers:x} bytes) would overlap the first section at 0x{first_section:x}."
            ),
            Self::Overflow => fmt.write_str("The image layout overflows 32-bit addresses."),
            Self::TooManySections(n) => write!(fmt, "Too many sections ({n})."),
        }
    }
}

/// One section: its header and its raw (file) data.
#[derive(Clone)]
pub struct Section {
    pub header: IMAGE_SECTION_HEADER,
    /// The raw data of the section, as stored in the file. After alignment the length is a
    /// multiple of the file alignment.
    pub data: Vec<u8>,
}

impl Section {
    pub fn name(&self) -> &BStr {
        self.header.name()
    }

    pub fn virtual_address(&self) -> Rva {
        Rva(self.header.virtual_address)
    }

    pub fn virtual_size(&self) -> u32 {
        self.header.physical_address_or_virtual_size
    }

    pub fn characteristics(&self) -> SectionCharacteristics {
        self.header.characteristics
    }

    /// The number of bytes of address space that the loader maps for this section, before
    /// alignment. Some linkers leave the virtual size at zero; the raw size is used then.
    fn span(&self) -> u32 {
        match self.virtual_size() {
            0 => self.data.len() as u32,
            n => n,
        }
    }

    /// Checks whether `rva` falls within this section.
    pub fn contains(&self, rva: Rva) -> bool {
        let start = self.header.virtual_address;
        let len = self.span().max(self.data.len() as u32);
        rva.0 >= start && (rva.0 - start) < len
    }
}

/// An editable PE image.
#[derive(Clone)]
pub struct PeImage {
    /// Everything before the NT signature: the DOS header and the DOS stub.
    dos: Vec<u8>,
    file_header: IMAGE_FILE_HEADER,
    optional_header: OptionalHeader,
    /// The optional header exactly as declared by `size_of_optional_header`. The decoded header
    /// is copied over the front of this when the image is written.
    optional_header_raw: Vec<u8>,
    sections: Vec<Section>,
    overlay: Vec<u8>,
    overlay_offset: u32,
    layout_stale: bool,
}

impl PeImage {
    /// Creates an image with no sections, using the usual alignments (0x1000 in memory, 0x200 in
    /// the file).
    pub fn new(machine: IMAGE_FILE_MACHINE) -> Self {
        let pe32_plus = machine != IMAGE_FILE_MACHINE::IMAGE_FILE_MACHINE_I386;

        let dos_header = IMAGE_DOS_HEADER {
            e_magic: IMAGE_DOS_SIGNATURE,
            e_lfanew: IMAGE_SIZEOF_DOS_HEADER as u32,
            ..Default::default()
        };

        let optional_header = if pe32_plus {
            OptionalHeader::Pe64(IMAGE_OPTIONAL_HEADER64 {
                magic: IMAGE_NT_OPTIONAL_HDR64_MAGIC,
                image_base: 0x1_4000_0000,
                section_alignment: 0x1000,
                file_alignment: 0x200,
                major_operating_system_version: 6,
                major_subsystem_version: 6,
                subsystem: IMAGE_SUBSYSTEM_WINDOWS_CUI,
                number_of_rva_and_sizes: IMAGE_NUMBEROF_DIRECTORY_ENTRIES as u32,
                ..Default::default()
            })
        } else {
            OptionalHeader::Pe32(IMAGE_OPTIONAL_HEADER32 {
                magic: IMAGE_NT_OPTIONAL_HDR32_MAGIC,
                image_base: 0x40_0000,
                section_alignment: 0x1000,
                file_alignment: 0x200,
                major_operating_system_version: 6,
                major_subsystem_version: 6,
                subsystem: IMAGE_SUBSYSTEM_WINDOWS_CUI,
                number_of_rva_and_sizes: IMAGE_NUMBEROF_DIRECTORY_ENTRIES as u32,
                ..Default::default()
            })
        };

        let optional_header_raw = optional_header.as_bytes().to_vec();

        let characteristics = IMAGE_FILE_EXECUTABLE_IMAGE
            | if pe32_plus {
                IMAGE_FILE_LARGE_ADDRESS_AWARE
            } else {
                IMAGE_FILE_32BIT_MACHINE
            };

        Self {
            dos: dos_header.as_bytes().to_vec(),
            file_header: IMAGE_FILE_HEADER {
                machine: machine.0,
                size_of_optional_header: optional_header_raw.len() as u16,
                characteristics,
                ..Default::default()
            },
            optional_header,
            optional_header_raw,
            sections: Vec::new(),
            overlay: Vec::new(),
            overlay_offset: 0,
            layout_stale: true,
        }
    }

    /// Parses a PE image. The data of every section is copied out of `bytes`.
    pub fn parse(bytes: &[u8]) -> anyhow::Result<Self> {
        let _span = debug_span!("PeImage::parse").entered();

        let bad = |reason: &str| BadImageError(reason.to_string());

        let Ok((dos_header, _)) = IMAGE_DOS_HEADER::read_from_prefix(bytes) else {
            bail!(bad("the file is too small to contain a DOS header"));
        };
        if dos_header.e_magic != IMAGE_DOS_SIGNATURE {
            bail!(bad("the DOS signature is missing"));
        }

        let nt_offset = dos_header.e_lfanew as usize;
        if nt_offset < IMAGE_SIZEOF_DOS_HEADER {
            bail!(bad("e_lfanew points inside the DOS header"));
        }
        let Some(nt) = bytes.get(nt_offset..) else {
            bail!(bad("e_lfanew points past the end of the file"));
        };

        let Ok((signature, rest)) = u32::read_from_prefix(nt) else {
            bail!(bad("the NT headers are truncated"));
        };
        if u32::from_le(signature) != IMAGE_NT_SIGNATURE {
            bail!(bad("the NT signature is missing"));
        }

        let Ok((file_header, rest)) = IMAGE_FILE_HEADER::read_from_prefix(rest) else {
            bail!(bad("the file header is truncated"));
        };

        let opt_len = file_header.size_of_optional_header as usize;
        let Some(optional_header_raw) = rest.get(..opt_len) else {
            bail!(bad("the optional header is truncated"));
        };
        let Some(optional_header) = OptionalHeader::parse(optional_header_raw) else {
            bail!(bad("the optional header has an unrecognized magic number"));
        };
        let rest = &rest[opt_len..];

        let num_sections = file_header.number_of_sections as usize;
        let mut end_of_sections = optional_header.size_of_headers() as usize;
        let mut sections = Vec::with_capacity(num_sections);
        let mut table = rest;
        for _ in 0..num_sections {
            let Ok((header, next)) = IMAGE_SECTION_HEADER::read_from_prefix(table) else {
                bail!(bad("the section table is truncated"));
            };
            table = next;

            let start = header.pointer_to_raw_data as usize;
            let len = header.size_of_raw_data as usize;
            let data = if start == 0 || len == 0 {
                Vec::new()
            } else {
                let Some(data) = bytes.get(start..start + len) else {
                    bail!(BadImageError(format!(
                        "the raw data of section {} is outside the file",
                        header.name()
                    )));
                };
                end_of_sections = end_of_sections.max(start + len);
                data.to_vec()
            };

            trace!(
                name = %header.name(),
                va = header.virtual_address,
                raw_len = data.len(),
                "section"
            );

            sections.push(Section { header, data });
        }

        let overlay = bytes.get(end_of_sections..).unwrap_or_default().to_vec();
        if !overlay.is_empty() {
            debug!(
                offset = end_of_sections,
                len = overlay.len(),
                "image has an overlay"
            );
        }

        Ok(Self {
            dos: bytes[..nt_offset].to_vec(),
            file_header,
            optional_header,
            optional_header_raw: optional_header_raw.to_vec(),
            sections,
            overlay,
            overlay_offset: end_of_sections as u32,
            layout_stale: false,
        })
    }

    /// Reads and parses the image at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&bytes)
    }

    pub fn machine(&self) -> IMAGE_FILE_MACHINE {
        IMAGE_FILE_MACHINE(self.file_header.machine)
    }

    pub fn file_header(&self) -> &IMAGE_FILE_HEADER {
        &self.file_header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.optional_header
    }

    pub fn is_pe32_plus(&self) -> bool {
        self.optional_header.is_pe32_plus()
    }

    /// Returns the data directory at `index`. Returns `None` if the optional header does not
    /// declare that many directories.
    pub fn data_directory(&self, index: usize) -> Option<IMAGE_DATA_DIRECTORY> {
        self.optional_header.data_directory(index)
    }

    /// Replaces the data directory at `index`. Fails if the optional header does not declare
    /// that many directories.
    pub fn set_data_directory(
        &mut self,
        index: usize,
        dir: IMAGE_DATA_DIRECTORY,
    ) -> anyhow::Result<()> {
        let Some(slot) = self.optional_header.data_directory_mut(index) else {
            bail!(BadImageError(format!(
                "the optional header does not have a data directory at index {index}"
            )));
        };
        debug!(
            index,
            rva = dir.virtual_address,
            size = dir.size,
            "set data directory"
        );
        *slot = dir;
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Finds the first section with the given name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name() == name)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Appends a new section. Its address and file offset are assigned by the next call to
    /// [`Self::align_sections`].
    pub fn add_section(
        &mut self,
        name: &str,
        data: Vec<u8>,
        characteristics: SectionCharacteristics,
    ) -> anyhow::Result<()> {
        let Some(name_field) = IMAGE_SECTION_HEADER::encode_name(name) else {
            bail!("Section name {name:?} is longer than 8 bytes.");
        };
        let Ok(virtual_size) = u32::try_from(data.len()) else {
            bail!(LayoutError::Overflow);
        };

        debug!(name, len = data.len(), "adding section");
        self.sections.push(Section {
            header: IMAGE_SECTION_HEADER {
                name: name_field,
                physical_address_or_virtual_size: virtual_size,
                characteristics,
                ..Default::default()
            },
            data,
        });
        self.layout_stale = true;
        Ok(())
    }

    /// Removes the first section with the given name and returns it.
    pub fn remove_section(&mut self, name: &str) -> Option<Section> {
        let i = self.sections.iter().position(|s| s.name() == name)?;
        debug!(name, "removing section");
        self.layout_stale = true;
        Some(self.sections.remove(i))
    }

    /// Returns the raw data starting at `rva` and running to the end of the section that
    /// contains it. Addresses in the zero-filled tail of a section give an empty slice.
    pub fn slice_at_rva(&self, rva: Rva) -> Option<&[u8]> {
        let section = self.sections.iter().find(|s| s.contains(rva))?;
        let offset = (rva.0 - section.header.virtual_address) as usize;
        Some(section.data.get(offset..).unwrap_or_default())
    }

    /// Reads a NUL-terminated string at `rva`.
    pub fn strz_at_rva(&self, rva: Rva) -> Option<&BStr> {
        let bytes = self.slice_at_rva(rva)?;
        let len = bytes.iter().position(|&b| b == 0)?;
        Some(BStr::new(&bytes[..len]))
    }

    /// Indicates whether sections were added or removed since the last layout.
    pub fn is_layout_stale(&self) -> bool {
        self.layout_stale
    }

    /// Recomputes the section layout after sections have been added or removed.
    ///
    /// * `SizeOfHeaders` grows if the section table needs more room. It must stay below the
    ///   lowest section address, because code cannot be relocated.
    /// * Sections that already have a virtual address keep it, gaps included. New sections are
    ///   placed one after another, after the highest section end.
    /// * Sections keep their file offsets when those do not collide with earlier data; other
    ///   sections (including all new ones) are packed after the previous section.
    /// * The overlay follows the last section. The certificate table directory, which holds a file
    ///   offset, is moved along with it.
    pub fn align_sections(&mut self) -> Result<(), LayoutError> {
        let _span = debug_span!("PeImage::align_sections").entered();

        let file_align = self.optional_header.file_alignment();
        let section_align = self.optional_header.section_alignment();

        let Ok(num_sections) = u16::try_from(self.sections.len()) else {
            return Err(LayoutError::TooManySections(self.sections.len()));
        };

        let headers_len = self.dos.len()
            + 4
            + IMAGE_SIZEOF_FILE_HEADER
            + self.optional_header_raw.len()
            + IMAGE_SIZEOF_SECTION_HEADER * self.sections.len();
        let headers_len = u32::try_from(headers_len).map_err(|_| LayoutError::Overflow)?;
        let size_of_headers = align_up(headers_len, file_align)
            .ok_or(LayoutError::Overflow)?
            .max(self.optional_header.size_of_headers());
        let headers_span = align_up(size_of_headers, section_align).ok_or(LayoutError::Overflow)?;

        // Virtual layout. Sections that already have an address keep it; new sections (address
        // 0) are placed after the highest section end.
        let mut next_va = headers_span;
        let mut lowest_va: Option<u32> = None;
        for s in self.sections.iter().filter(|s| s.header.virtual_address != 0) {
            let va = s.header.virtual_address;
            lowest_va = Some(lowest_va.map_or(va, |low| low.min(va)));
            let end = va
                .checked_add(s.span().max(1))
                .and_then(|end| align_up(end, section_align))
                .ok_or(LayoutError::Overflow)?;
            next_va = next_va.max(end);
        }
        if let Some(lowest) = lowest_va {
            if headers_span > lowest {
                return Err(LayoutError::HeadersOverflow {
                    size_of_headers,
                    first_section: lowest,
                });
            }
        }

        for s in self
            .sections
            .iter_mut()
            .filter(|s| s.header.virtual_address == 0)
        {
            trace!(name = %s.name(), va = next_va, "placing section");
            s.header.virtual_address = next_va;
            next_va = next_va
                .checked_add(s.span().max(1))
                .and_then(|end| align_up(end, section_align))
                .ok_or(LayoutError::Overflow)?;
        }
        let size_of_image = next_va;

        // File layout
        let mut file_offset = size_of_headers;
        for s in self.sections.iter_mut() {
            if s.data.is_empty() {
                s.header.pointer_to_raw_data = 0;
                s.header.size_of_raw_data = 0;
                continue;
            }

            let raw_len = u32::try_from(s.data.len()).map_err(|_| LayoutError::Overflow)?;
            let raw_len = align_up(raw_len, file_align).ok_or(LayoutError::Overflow)?;
            s.data.resize(raw_len as usize, 0);

            let old = s.header.pointer_to_raw_data;
            let offset = if old != 0 && old >= file_offset && old % file_align.max(1) == 0 {
                old
            } else {
                file_offset
            };

            s.header.pointer_to_raw_data = offset;
            s.header.size_of_raw_data = raw_len;
            file_offset = offset.checked_add(raw_len).ok_or(LayoutError::Overflow)?;
        }

        // The overlay is not subject to file alignment, but certificates must be 8-aligned.
        if !self.overlay.is_empty() && self.overlay_offset != file_offset {
            let new_overlay_offset = align_up(file_offset, 8).ok_or(LayoutError::Overflow)?;
            if let Some(dir) = self
                .optional_header
                .data_directory_mut(IMAGE_DIRECTORY_ENTRY_SECURITY)
            {
                if dir.is_present() && dir.virtual_address >= self.overlay_offset {
                    let moved = dir.virtual_address - self.overlay_offset + new_overlay_offset;
                    debug!(
                        old = dir.virtual_address,
                        new = moved,
                        "moving certificate table"
                    );
                    dir.virtual_address = moved;
                }
            }
            self.overlay_offset = new_overlay_offset;
        } else if self.overlay.is_empty() {
            self.overlay_offset = file_offset;
        }

        self.file_header.number_of_sections = num_sections;
        self.optional_header.set_size_of_headers(size_of_headers);
        self.optional_header.set_size_of_image(size_of_image);
        self.layout_stale = false;

        debug!(
            num_sections,
            size_of_headers, size_of_image, "sections aligned"
        );
        Ok(())
    }

    /// Serializes the image. Fails if the layout is stale.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        if self.layout_stale {
            bail!(LayoutError::Stale);
        }

        let size_of_headers = self.optional_header.size_of_headers() as usize;

        let mut out: Vec<u8> = Vec::with_capacity(
            size_of_headers
                + self.sections.iter().map(|s| s.data.len()).sum::<usize>()
                + self.overlay.len(),
        );
        out.extend_from_slice(&self.dos);
        out.extend_from_slice(&IMAGE_NT_SIGNATURE.to_le_bytes());
        out.extend_from_slice(self.file_header.as_bytes());

        let mut opt = self.optional_header_raw.clone();
        let decoded = self.optional_header.as_bytes();
        let n = opt.len().min(decoded.len());
        opt[..n].copy_from_slice(&decoded[..n]);
        out.extend_from_slice(&opt);

        for s in self.sections.iter() {
            out.extend_from_slice(s.header.as_bytes());
        }

        if out.len() > size_of_headers {
            bail!(LayoutError::HeadersOverflow {
                size_of_headers: size_of_headers as u32,
                first_section: out.len() as u32,
            });
        }
        out.resize(size_of_headers, 0);

        for s in self.sections.iter() {
            if s.data.is_empty() {
                continue;
            }
            let offset = s.header.pointer_to_raw_data as usize;
            if offset < out.len() {
                bail!(
                    "Section {} at file offset 0x{offset:x} overlaps earlier data.",
                    s.name()
                );
            }
            out.resize(offset, 0);
            out.extend_from_slice(&s.data);
        }

        if !self.overlay.is_empty() {
            let offset = self.overlay_offset as usize;
            if offset < out.len() {
                warn!("overlay overlaps section data; appending it instead");
            } else {
                out.resize(offset, 0);
            }
            out.extend_from_slice(&self.overlay);
        }

        Ok(out)
    }

    /// Serializes the image and writes it to `path`.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), len = bytes.len(), "wrote image");
        Ok(())
    }
}
