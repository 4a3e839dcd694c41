use dynlink::exports::generate_import_library;
use dynlink::{Architecture, DynamicImportModel, Toolchain, ToolchainConfig, Version};
use std::path::PathBuf;
use tracing::info;

#[derive(clap::Parser)]
pub struct GenerateLibOptions {
    /// The JSON manifest that names the target module and its symbols.
    #[arg(long, short)]
    pub manifest: PathBuf,

    /// The version of the target module. Only the symbols for this version are exported.
    #[arg(long)]
    pub target_version: Version,

    /// The architecture of the library (`x64` or `x86`). Defaults to the host architecture.
    #[arg(long)]
    pub arch: Option<Architecture>,

    /// The directory that the `.def` and `.lib` files are written to.
    #[arg(long, short, default_value = ".")]
    pub output: PathBuf,
}

pub fn command(
    toolchain_config: &ToolchainConfig,
    options: &GenerateLibOptions,
) -> anyhow::Result<()> {
    let model = DynamicImportModel::open(&options.manifest)?;
    let arch = options.arch.unwrap_or_else(Architecture::host);
    info!("Architecture: {arch}");

    let toolchain = Toolchain::locate(toolchain_config)?;
    info!("Visual C++ tools version: {}", toolchain.version());

    let lib = generate_import_library(
        &toolchain,
        &model,
        arch,
        &options.target_version,
        &options.output,
    )?;
    info!("Generated library for {} at {}", model.target, lib.display());
    Ok(())
}
