//! Patching and restoring images.
//!
//! A patch moves the import directory entry of the manifest's target module out of the import
//! directory and records the module's symbols in the side-tables. The first patch saves the
//! location of the original import directory in the header of the normal-imports section, so
//! that [`restore`] can put it back after any number of patches.
//!
//! Both operations leave the image with an aligned layout, ready to be written.


use crate::error::PatchError;
use crate::import_dir::{
    encode_dynamic_imports, encode_normal_imports, import_directory_size, read_dynamic_imports,
    read_import_directory, read_normal_imports_header, split,
};
use crate::manifest::{DynamicImportModel, DynamicSymbol};
use crate::records::{ImportDirectoryEntry, NormalImportsHeader, Record};
use crate::sections;
use crate::side_tables::SideTables;
use crate::symbols::{ResolvedDynamicLinkDescriptor, demangle_all, merge};
use crate::toolchain::Demangler;
use crate::version::{Architecture, Version};
use anyhow::{Context, bail};
use dynlink_coff::{
    IMAGE_DATA_DIRECTORY, IMAGE_DIRECTORY_ENTRY_IMPORT, PeImage, Rva, SectionCharacteristics,
};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, debug_span, info, warn};

/// Whether an image carries any of the sections that a patch adds.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PatchState {
    Unpatched,
    Patched,
}

impl PatchState {
    pub fn of(image: &PeImage) -> Self {
        if sections::ALL.iter().any(|name| image.has_section(name)) {
            Self::Patched
        } else {
            Self::Unpatched
        }
    }
}

impl Display for PatchState {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(match self {
            Self::Unpatched => "unpatched",
            Self::Patched => "patched",
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct PatchOptions {
    /// Restore the image before patching, discarding the tables of earlier patches.
    pub erase_old: bool,
}

/// What [`patch`] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PatchReport {
    pub architecture: Architecture,
    /// The manifest symbols that apply to the image.
    pub selected_symbols: usize,
    /// Link descriptors in the side-tables, including those of earlier patches.
    pub descriptors: usize,
    /// Symbols in the side-tables, including those of earlier patches.
    pub symbols: usize,
    /// Whether the target module was moved out of the import directory.
    pub moved: bool,
    pub normal_imports: usize,
    pub dynamic_imports: usize,
}

/// What [`restore`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RestoreReport {
    pub removed_sections: Vec<&'static str>,
    /// Whether the import directory was reset to the location saved by the first patch.
    pub import_directory_restored: bool,
}

fn image_architecture(image: &PeImage) -> Result<Architecture, PatchError> {
    let arch = Architecture::from_pe32_plus(image.is_pe32_plus());
    if image.machine() != arch.machine() {
        return Err(PatchError::UnsupportedImage(format!(
            "machine {:?} is neither x86 nor x64",
            image.machine()
        )));
    }
    Ok(arch)
}

fn import_directory(image: &PeImage) -> Result<IMAGE_DATA_DIRECTORY, PatchError> {
    image
        .data_directory(IMAGE_DIRECTORY_ENTRY_IMPORT)
        .filter(|dir| dir.is_present())
        .ok_or(PatchError::MissingImportDirectory)
}

/// Applies `model` to `image`.
///
/// The side-tables already in the image are decoded and merged with the manifest's symbols, so
/// patching twice with the same manifest gives the same image. `version` is the version of the
/// target module that the manifest symbols are selected for.
pub fn patch(
    image: &mut PeImage,
    model: &DynamicImportModel,
    version: &Version,
    demangler: &dyn Demangler,
    options: &PatchOptions,
) -> anyhow::Result<PatchReport> {
    let _span = debug_span!("patch").entered();

    import_directory(image)?;
    let arch = image_architecture(image)?;

    if options.erase_old {
        let erased = restore(image)?;
        debug!(removed = erased.removed_sections.len(), "erased earlier patches");
    }

    // Restoring may have moved the import directory.
    let import_dir = import_directory(image)?;

    let selected: Vec<&DynamicSymbol> = model.select(arch, version).collect();
    if selected.is_empty() {
        warn!(
            module = %model.target,
            %arch,
            %version,
            "no manifest symbol applies to this image"
        );
    }

    let existing = match SideTables::from_image(image) {
        Some(tables) => tables.decode()?,
        None => Vec::new(),
    };
    debug!(existing = existing.len(), "existing link descriptors");

    let mut descriptors = merge(existing, &model.target, &selected);
    demangle_all(&mut descriptors, demangler, arch);
    let tables = SideTables::build(&descriptors);

    let had_normal_imports = image.has_section(sections::NORMAL_IMPORTS);
    let header = read_normal_imports_header(image)
        .filter(|h| h.is_present())
        .unwrap_or_else(|| {
            NormalImportsHeader::new(Rva(import_dir.virtual_address), import_dir.size)
        });

    let normal = read_import_directory(image, import_dir);
    let dynamic = read_dynamic_imports(image);
    let imports = split(normal, dynamic, &model.target, |rva| image.strz_at_rva(rva));
    let rewrite_imports = imports.moved || had_normal_imports;

    tables.install(image)?;

    if rewrite_imports {
        while image.remove_section(sections::NORMAL_IMPORTS).is_some() {}
        while image.remove_section(sections::DYNAMIC_IMPORTS).is_some() {}
        image.add_section(
            sections::NORMAL_IMPORTS,
            encode_normal_imports(&header, &imports.normal),
            SectionCharacteristics::READ_ONLY_DATA,
        )?;
        image.add_section(
            sections::DYNAMIC_IMPORTS,
            encode_dynamic_imports(&imports.dynamic),
            SectionCharacteristics::READ_ONLY_DATA,
        )?;
    }

    image.align_sections()?;

    if rewrite_imports {
        let section = image
            .section(sections::NORMAL_IMPORTS)
            .context("The normal-imports section was not added")?;
        let rva = section.virtual_address().0 + NormalImportsHeader::SIZE as u32;
        image.set_data_directory(
            IMAGE_DIRECTORY_ENTRY_IMPORT,
            IMAGE_DATA_DIRECTORY::new(rva, import_directory_size(imports.normal.len())),
        )?;
    }

    let report = PatchReport {
        architecture: arch,
        selected_symbols: selected.len(),
        descriptors: descriptors.len(),
        symbols: descriptors.iter().map(|d| d.resolved_symbols.len()).sum(),
        moved: imports.moved,
        normal_imports: imports.normal.len(),
        dynamic_imports: imports.dynamic.len(),
    };
    info!(
        module = %model.target,
        descriptors = report.descriptors,
        symbols = report.symbols,
        moved = report.moved,
        "patched image"
    );
    Ok(report)
}

/// Removes every section that a patch adds and puts the import directory back where it was
/// before the first patch. An image that was never patched is left unchanged.
pub fn restore(image: &mut PeImage) -> anyhow::Result<RestoreReport> {
    let _span = debug_span!("restore").entered();

    let mut report = RestoreReport::default();

    if let Some(header) = read_normal_imports_header(image).filter(|h| h.is_present()) {
        image.set_data_directory(
            IMAGE_DIRECTORY_ENTRY_IMPORT,
            IMAGE_DATA_DIRECTORY::new(header.rva().0, header.size()),
        )?;
        report.import_directory_restored = true;
    } else if image.has_section(sections::NORMAL_IMPORTS) {
        warn!("the normal-imports section has no saved import directory");
    }

    for name in sections::ALL {
        if image.remove_section(name).is_some() {
            while image.remove_section(name).is_some() {}
            report.removed_sections.push(name);
        }
    }

    if !report.removed_sections.is_empty() || image.is_layout_stale() {
        image.align_sections()?;
    }

    info!(
        removed = report.removed_sections.len(),
        import_directory_restored = report.import_directory_restored,
        "restored image"
    );
    Ok(report)
}

/// An import directory entry and the name of the module it imports.
#[derive(Clone, Debug)]
pub struct NamedImport {
    pub module: Option<String>,
    pub entry: ImportDirectoryEntry,
}

/// A decoded view of everything a patch has written into an image.
#[derive(Clone, Debug)]
pub struct Inspection {
    pub state: PatchState,
    pub import_directory: Option<IMAGE_DATA_DIRECTORY>,
    /// The import directory saved by the first patch.
    pub saved_import_directory: Option<NormalImportsHeader>,
    pub normal_imports: Vec<NamedImport>,
    pub dynamic_imports: Vec<NamedImport>,
    pub descriptors: Vec<ResolvedDynamicLinkDescriptor>,
}

/// Decodes the import directory and side-tables of an image.
pub fn inspect(image: &PeImage) -> anyhow::Result<Inspection> {
    let name = |entry: ImportDirectoryEntry| NamedImport {
        module: image.strz_at_rva(entry.name_rva()).map(|s| s.to_string()),
        entry,
    };

    let import_directory = image
        .data_directory(IMAGE_DIRECTORY_ENTRY_IMPORT)
        .filter(|dir| dir.is_present());
    let normal_imports: Vec<NamedImport> = match import_directory {
        Some(dir) => read_import_directory(image, dir).into_iter().map(name).collect(),
        None => Vec::new(),
    };

    let descriptors = match SideTables::from_image(image) {
        Some(tables) => tables.decode()?,
        None => Vec::new(),
    };

    Ok(Inspection {
        state: PatchState::of(image),
        import_directory,
        saved_import_directory: read_normal_imports_header(image),
        normal_imports,
        dynamic_imports: read_dynamic_imports(image).into_iter().map(name).collect(),
        descriptors,
    })
}

fn write_imports(
    f: &mut std::fmt::Formatter,
    title: &str,
    list: &[NamedImport],
) -> std::fmt::Result {
    writeln!(f, "{title} ({}):", list.len())?;
    for i in list.iter() {
        writeln!(
            f,
            "    {:<32} name {} thunks {}",
            i.module.as_deref().unwrap_or("??"),
            i.entry.name_rva(),
            Rva(i.entry.first_thunk.get())
        )?;
    }
    Ok(())
}

impl Display for Inspection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "State: {}", self.state)?;

        match &self.import_directory {
            Some(dir) => writeln!(
                f,
                "Import directory: {} size 0x{:x}",
                Rva(dir.virtual_address),
                dir.size
            )?,
            None => writeln!(f, "Import directory: (none)")?,
        }

        if let Some(saved) = &self.saved_import_directory {
            writeln!(
                f,
                "Original import directory: {} size 0x{:x}",
                saved.rva(),
                saved.size()
            )?;
        }

        write_imports(f, "Normal imports", &self.normal_imports)?;
        write_imports(f, "Dynamic imports", &self.dynamic_imports)?;

        writeln!(f, "Link descriptors ({}):", self.descriptors.len())?;
        for d in self.descriptors.iter() {
            writeln!(f, "    {} ({} symbols)", d.target_name, d.resolved_symbols.len())?;
            for s in d.resolved_symbols.iter() {
                match (&s.signature, s.address) {
                    (Some(sig), _) => writeln!(f, "        {} signature [{sig}]", s.name)?,
                    (None, Some(a)) => writeln!(f, "        {} offset 0x{a:x}", s.name)?,
                    (None, None) => writeln!(f, "        {} (no pointer)", s.name)?,
                }
                if !s.demangled_name.is_empty() {
                    writeln!(f, "            {}", s.demangled_name)?;
                }
            }
        }
        Ok(())
    }
}

/// The path that the result of processing `input` is written to: the input's file name, in
/// `out_dir`.
pub fn output_path(input: &Path, out_dir: &Path) -> anyhow::Result<PathBuf> {
    let Some(file_name) = input.file_name() else {
        bail!("The input path {} has no file name", input.display());
    };
    Ok(out_dir.join(file_name))
}

/// Writes `image` to [`output_path`], creating the output directory if needed.
pub fn write_output(image: &PeImage, input: &Path, out_dir: &Path) -> anyhow::Result<PathBuf> {
    let out = output_path(input, out_dir)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory {}", out_dir.display()))?;
    image.write(&out)?;
    info!(path = %out.display(), "wrote image");
    Ok(out)
}
