use anyhow::Context;
use dynlink::coff::PeImage;
use dynlink::patch::write_output;
use dynlink::{
    Architecture, BuiltinDemangler, Demangler, DynamicImportModel, Toolchain, ToolchainConfig,
    Version,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Copy, Clone, Eq, PartialEq, clap::ValueEnum)]
pub enum DemanglerKind {
    /// Run `undname` from the Visual C++ tools.
    Undname,
    /// Demangle names in process. The Visual C++ tools are not needed.
    Builtin,
}

#[derive(clap::Parser)]
pub struct PatchOptions {
    /// The PE image to patch.
    pub module: PathBuf,

    /// The JSON manifest that names the target module and its symbols.
    #[arg(long, short)]
    pub manifest: PathBuf,

    /// The version of the target module. Components may be `*`, e.g. `1.2.*`.
    #[arg(long)]
    pub target_version: Version,

    /// The directory that the patched image is written to. It gets the same file name as the
    /// input.
    #[arg(long, short, default_value = ".")]
    pub output: PathBuf,

    /// Remove the tables of earlier patches before patching.
    #[arg(long)]
    pub erase_old: bool,

    #[arg(long, value_enum, default_value_t = DemanglerKind::Undname)]
    pub demangler: DemanglerKind,
}

#[derive(clap::Parser)]
pub struct UnpatchOptions {
    /// The PE image to restore.
    pub module: PathBuf,

    /// The directory that the restored image is written to.
    #[arg(long, short, default_value = ".")]
    pub output: PathBuf,
}

pub fn patch_command(
    toolchain_config: &ToolchainConfig,
    options: &PatchOptions,
) -> anyhow::Result<()> {
    info!("Input file: {}", options.manifest.display());
    let model = DynamicImportModel::open(&options.manifest)?;

    info!("Target PE: {}", options.module.display());
    let mut image = PeImage::open(&options.module)
        .with_context(|| format!("Failed to parse {}", options.module.display()))?;

    // The tools must be found before the image is modified.
    let toolchain = match options.demangler {
        DemanglerKind::Undname => {
            let toolchain = Toolchain::locate(toolchain_config)?;
            info!("Visual C++ tools version: {}", toolchain.version());
            toolchain.tools_dir(Architecture::from_pe32_plus(image.is_pe32_plus()))?;
            Some(toolchain)
        }
        DemanglerKind::Builtin => None,
    };
    let demangler: &dyn Demangler = match &toolchain {
        Some(toolchain) => toolchain,
        None => &BuiltinDemangler,
    };

    let report = dynlink::patch(
        &mut image,
        &model,
        &options.target_version,
        demangler,
        &dynlink::PatchOptions {
            erase_old: options.erase_old,
        },
    )?;
    info!(
        "{} link descriptors, {} symbols ({} from the manifest)",
        report.descriptors, report.symbols, report.selected_symbols
    );

    let out = write_output(&image, &options.module, &options.output)?;
    info!("Patched image written to {}", out.display());
    Ok(())
}

pub fn unpatch_command(options: &UnpatchOptions) -> anyhow::Result<()> {
    info!("Target PE: {}", options.module.display());
    let mut image = PeImage::open(&options.module)
        .with_context(|| format!("Failed to parse {}", options.module.display()))?;

    let report = dynlink::restore(&mut image)?;
    if report.removed_sections.is_empty() {
        info!("The image was not patched");
    } else {
        info!("Removed sections: {}", report.removed_sections.join(", "));
    }

    let out = write_output(&image, &options.module, &options.output)?;
    info!("Restored image written to {}", out.display());
    Ok(())
}
