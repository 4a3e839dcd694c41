#![forbid(unused_must_use)]
#![forbid(unsafe_code)]

use clap::Parser;
use dynlink::ToolchainConfig;
use std::path::PathBuf;
use tracing::error;

mod dump;
mod generate_lib;
mod patch;

#[derive(clap::Parser)]
#[command(about)]
struct CommandWithFlags {
    /// Reduce logging to just warnings and errors.
    #[arg(long, global = true)]
    quiet: bool,

    /// Turn on debug output. Noisy!
    #[arg(long, global = true)]
    verbose: bool,

    /// Show timestamps in log messages
    #[arg(long, global = true)]
    timestamps: bool,

    /// The Visual Studio installation directory that contains the Visual C++ tools.
    #[arg(long, global = true, env = "DYNLINKER_VC_ROOT")]
    vc_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Moves the manifest's target module out of the import directory of a PE image and records
    /// its symbols in the dynamic import side-tables.
    Patch(patch::PatchOptions),
    /// Removes everything that earlier patches added to a PE image.
    Unpatch(patch::UnpatchOptions),
    /// Generates a module-definition file and an import library for the manifest's target module.
    GenerateLib(generate_lib::GenerateLibOptions),
    /// Shows the import directory and the dynamic import side-tables of a PE image.
    Dump(dump::DumpOptions),
    /// Shows the version and license of this tool.
    Info,
}

fn main() {
    let command_with_flags = CommandWithFlags::parse();
    configure_tracing(&command_with_flags);

    if let Err(e) = run(command_with_flags) {
        error!("{e:#}");
        std::process::exit(-1);
    }
}

fn run(command_with_flags: CommandWithFlags) -> anyhow::Result<()> {
    let toolchain_config = ToolchainConfig {
        root: command_with_flags.vc_root,
    };

    match command_with_flags.command {
        Command::Patch(args) => patch::patch_command(&toolchain_config, &args)?,
        Command::Unpatch(args) => patch::unpatch_command(&args)?,
        Command::GenerateLib(args) => generate_lib::command(&toolchain_config, &args)?,
        Command::Dump(args) => dump::command(&args)?,
        Command::Info => {
            println!("dynlinker v{}", env!("CARGO_PKG_VERSION"));
            println!("dynlinker was created by {}", env!("CARGO_PKG_AUTHORS"));
            println!("dynlinker is licensed under {}", env!("CARGO_PKG_LICENSE"));
        }
    }

    Ok(())
}

fn configure_tracing(args: &CommandWithFlags) {
    use tracing_subscriber::filter::LevelFilter;

    let max_level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if args.timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
