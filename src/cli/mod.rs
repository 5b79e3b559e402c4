pub mod build;
mod inspect;
mod ropefix;
pub mod scan;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kebab")]
#[command(version)]
#[command(about = "KeBaB: k-mer based breaking of DNA reads")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a KeBaB index from a reference FASTA
    Build(build::BuildArgs),
    /// Break reads into fragments using a KeBaB index
    Scan(scan::ScanArgs),
    /// Print the parameters and occupancy of a saved index
    Inspect(inspect::InspectArgs),
    /// Rewrite MEM coordinates from fragment space to read space
    Ropefix(ropefix::RopefixArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => build::run(args),
        Commands::Scan(args) => scan::run(args),
        Commands::Inspect(args) => inspect::run(args),
        Commands::Ropefix(args) => ropefix::run(args),
    }
}
