//! Grove CLI: datasheet knowledge tree builder and query tool.
//!
//! Classifies datasheet pages, organizes the relevant ones into a
//! knowledge tree, and serves configuration lookups over it.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
