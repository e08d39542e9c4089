use std::path::PathBuf;

use clap::Args;
use netlab::LabOptions;

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Where to write the gzip-compressed archive
    #[arg(short, long)]
    pub output: PathBuf,

    /// Take image settings (toolset, kernel version, modules) from this lab file
    #[arg(long)]
    pub lab: Option<PathBuf>,
}

pub fn execute(args: ImageArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let options = match &args.lab {
        Some(path) => global.load_lab(path)?.options().clone(),
        None => {
            let mut options = LabOptions::default();
            global.apply(&mut options);
            options
        }
    };

    let image = netlab::rootfs::build_image(&options, &args.output)?;

    println!("{}", image.path.display());
    eprintln!(
        "{} bytes, {} applets, {} libraries, {} modules",
        image.size,
        image.applets,
        image.libraries.len(),
        image.modules.len()
    );
    if !image.skipped_modules.is_empty() {
        eprintln!(
            "Skipped modules (unresolved dependencies): {}",
            image.skipped_modules.join(", ")
        );
    }
    Ok(())
}
