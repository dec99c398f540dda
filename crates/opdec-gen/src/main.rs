//! opdec-gen - standalone table generator CLI
//!
//! Usage:
//!   opdec-gen <spec-file> <output-file>
//!
//! Parses the instruction description file and writes the generated
//! dispatch tables as Rust source. Exits nonzero with a diagnostic and
//! writes nothing on any inconsistency in the input.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "opdec-gen")]
#[command(about = "Generate opdec dispatch tables from an instruction description file", long_about = None)]
struct Cli {
    /// Instruction description file
    spec: PathBuf,

    /// Output Rust source file
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let input = fs::read_to_string(&cli.spec)
        .with_context(|| format!("reading {}", cli.spec.display()))?;
    let source = opdec_gen::generate(&input)
        .with_context(|| format!("generating tables from {}", cli.spec.display()))?;
    fs::write(&cli.output, source)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    Ok(())
}
