//! Module-definition (`.def`) files and import libraries for the manifest's target module.
//!
//! Code that calls the dynamically linked symbols still needs an import library to link against.
//! The library is generated from a module-definition file that exports the manifest symbols
//! selected for one architecture and version.


use crate::manifest::DynamicImportModel;
use crate::toolchain::Toolchain;
use crate::version::{Architecture, Version};
use anyhow::Context;
use std::collections::HashSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, debug_span, info, trace};

/// Builds the module-definition file for the symbols that apply to `arch` and `version`. A symbol
/// listed more than once is exported once.
pub fn module_definition(
    model: &DynamicImportModel,
    arch: Architecture,
    version: &Version,
) -> String {
    let mut def = String::new();
    _ = writeln!(def, "LIBRARY \"{}\"", model.target);
    def.push_str("EXPORTS\n");

    let mut seen = HashSet::new();
    for s in model.select(arch, version) {
        if !seen.insert(s.symbol.as_str()) {
            debug!(symbol = %s.symbol, "symbol is already exported");
            continue;
        }
        trace!(symbol = %s.symbol, "export");
        _ = writeln!(def, "    {}", s.symbol);
    }
    def
}

/// The path of the module-definition file for `model`: the target's file stem with a `.def`
/// extension, in `out_dir`.
pub fn definition_path(model: &DynamicImportModel, out_dir: &Path) -> PathBuf {
    let mut file_name = Path::new(&model.target)
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| model.target.clone().into());
    file_name.push(".def");
    out_dir.join(file_name)
}

/// Writes the module-definition file to `out_dir`, creating the directory if needed.
pub fn write_module_definition(
    model: &DynamicImportModel,
    arch: Architecture,
    version: &Version,
    out_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let def = module_definition(model, arch, version);
    let path = definition_path(model, out_dir);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory {}", out_dir.display()))?;
    std::fs::write(&path, def).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "wrote module definition");
    Ok(path)
}

/// Writes the module-definition file and runs the librarian on it. The import library is written
/// next to the `.def` file, with a `.lib` extension.
pub fn generate_import_library(
    toolchain: &Toolchain,
    model: &DynamicImportModel,
    arch: Architecture,
    version: &Version,
    out_dir: &Path,
) -> anyhow::Result<PathBuf> {
    let _span = debug_span!("generate_import_library").entered();

    // Fail before writing anything if the tools are missing.
    toolchain.tools_dir(arch)?;

    let def = write_module_definition(model, arch, version, out_dir)?;
    let lib = def.with_extension("lib");
    toolchain
        .lib(&def, arch, &lib)
        .with_context(|| format!("Failed to generate the import library for {}", model.target))?;

    info!(module = %model.target, path = %lib.display(), "generated import library");
    Ok(lib)
}
