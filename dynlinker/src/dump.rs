use anyhow::Context;
use dynlink::coff::PeImage;
use std::path::PathBuf;

#[derive(clap::Parser)]
pub struct DumpOptions {
    /// The PE image to dump.
    pub module: PathBuf,
}

pub fn command(options: &DumpOptions) -> anyhow::Result<()> {
    let image = PeImage::open(&options.module)
        .with_context(|| format!("Failed to parse {}", options.module.display()))?;

    println!("Machine: {:?}", image.machine());
    println!("Sections:");
    for s in image.sections() {
        println!(
            "    {:<8} {} size 0x{:x}",
            s.name().to_string(),
            s.virtual_address(),
            s.virtual_size()
        );
    }

    let inspection = dynlink::inspect(&image)?;
    print!("{inspection}");
    Ok(())
}
