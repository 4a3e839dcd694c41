//! Splitting the import directory into normal and dynamic imports.
//!
//! After a patch, the import directory data directory points into the normal-imports section,
//! just past its [`NormalImportsHeader`]. The loader therefore never sees the modules that were
//! moved to the dynamic-imports section.


use crate::encoder::Encoder;
use crate::parser::Parser;
use crate::records::{ImportDirectoryEntry, NormalImportsHeader, Record};
use crate::sections;
use bstr::BStr;
use dynlink_coff::{IMAGE_DATA_DIRECTORY, PeImage, Rva};
use tracing::{debug, warn};

/// Reads the import directory entries that `dir` points at. Reading stops at the zero entry or
/// at the end of the section, whichever comes first.
pub fn read_import_directory(
    image: &PeImage,
    dir: IMAGE_DATA_DIRECTORY,
) -> Vec<ImportDirectoryEntry> {
    match image.slice_at_rva(Rva(dir.virtual_address)) {
        Some(bytes) => ImportDirectoryEntry::read_all(bytes),
        None => {
            warn!(
                rva = dir.virtual_address,
                "import directory is outside of every section"
            );
            Vec::new()
        }
    }
}

/// Reads the entries of the dynamic-imports section, if there is one.
pub fn read_dynamic_imports(image: &PeImage) -> Vec<ImportDirectoryEntry> {
    image
        .section(sections::DYNAMIC_IMPORTS)
        .map(|s| ImportDirectoryEntry::read_all(&s.data))
        .unwrap_or_default()
}

/// Reads the header of the normal-imports section, if there is one.
pub fn read_normal_imports_header(image: &PeImage) -> Option<NormalImportsHeader> {
    let section = image.section(sections::NORMAL_IMPORTS)?;
    NormalImportsHeader::decode(&mut Parser::new(&section.data))
}

/// The contents of the normal-imports section: the header, then the entries and a zero entry.
pub fn encode_normal_imports(
    header: &NormalImportsHeader,
    entries: &[ImportDirectoryEntry],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        NormalImportsHeader::SIZE + (entries.len() + 1) * ImportDirectoryEntry::SIZE,
    );
    let mut e = Encoder::new(&mut buf);
    header.encode(&mut e);
    ImportDirectoryEntry::write_all(entries, &mut e);
    buf
}

/// The contents of the dynamic-imports section: the entries and a zero entry.
pub fn encode_dynamic_imports(entries: &[ImportDirectoryEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity((entries.len() + 1) * ImportDirectoryEntry::SIZE);
    ImportDirectoryEntry::write_all(entries, &mut Encoder::new(&mut buf));
    buf
}

/// The size that the import directory data directory declares for `n` entries (the zero entry
/// is counted too).
pub fn import_directory_size(n: usize) -> u32 {
    ((n + 1) * ImportDirectoryEntry::SIZE) as u32
}

/// The result of [`split`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImportSplit {
    pub normal: Vec<ImportDirectoryEntry>,
    pub dynamic: Vec<ImportDirectoryEntry>,
    /// Whether the target module was found among the normal imports.
    pub moved: bool,
}

/// Moves the entry for `target` from the normal imports to the dynamic imports.
///
/// `module_name` resolves the `Name` RVA of an entry. Module names are compared without regard to
/// ASCII case, as the loader does. Every normal entry for the target is moved; if there is none,
/// the lists are returned unchanged. The dynamic list never holds the same entry twice.
pub fn split<'a, F>(
    normal: Vec<ImportDirectoryEntry>,
    dynamic: Vec<ImportDirectoryEntry>,
    target: &str,
    module_name: F,
) -> ImportSplit
where
    F: Fn(Rva) -> Option<&'a BStr>,
{
    let is_target = |entry: &ImportDirectoryEntry| {
        module_name(entry.name_rva())
            .is_some_and(|name| name.eq_ignore_ascii_case(target.as_bytes()))
    };

    let (moved, normal): (Vec<_>, Vec<_>) = normal.into_iter().partition(|e| is_target(e));
    if moved.is_empty() {
        if dynamic.iter().any(is_target) {
            debug!(module = target, "the target module is already a dynamic import");
        } else {
            warn!(module = target, "the target module was not found in the import directory");
        }
        return ImportSplit {
            normal,
            dynamic,
            moved: false,
        };
    }

    let mut dynamic = dynamic;
    for entry in moved {
        if dynamic.contains(&entry) {
            debug!(module = target, "entry is already a dynamic import");
        } else {
            dynamic.push(entry);
        }
    }

    debug!(
        module = target,
        normal = normal.len(),
        dynamic = dynamic.len(),
        "split import directory"
    );
    ImportSplit {
        normal,
        dynamic,
        moved: true,
    }
}
