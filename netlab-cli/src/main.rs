mod cli;
mod commands;

use clap::Parser;

use crate::cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    let _log_guard = cli::init_logging(&cli.global);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args, &cli.global),
        Commands::Plan(args) => commands::plan::execute(args, &cli.global),
        Commands::Image(args) => commands::image::execute(args, &cli.global),
    };

    if let Err(error) = result {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}
