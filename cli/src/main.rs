mod compress;
mod util;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use compress::CompressArgs;
use tracing_subscriber::EnvFilter;

/// PCA image compression
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    tool: Tool,
}

/// PCA image compression
#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Tool {
    /// Compress an image with principal component analysis
    #[command(version, about, long_about = None)]
    Compress(CompressArgs),

    /// Check that the tool runs
    #[command(version, about, long_about = None)]
    Health,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.tool {
        Tool::Compress(args) => compress::compress_main(args),
        Tool::Health => {
            println!("{}", util::HEALTH);
            ExitCode::SUCCESS
        }
    }
}
