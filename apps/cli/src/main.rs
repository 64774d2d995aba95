//! patientsplit CLI: resolve which pages of a multi-patient scan belong to
//! which patient.
//!
//! Reads per-page identifier records (or OCR page text), links them into
//! patient identities, assigns pages, and writes split metadata.

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
