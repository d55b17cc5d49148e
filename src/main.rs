//! Strata CLI: typed construct trees, deterministic synthesis.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Typed construct trees for infrastructure definition, with deterministic synthesis"
)]
struct Cli {
    #[command(subcommand)]
    command: strata::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = strata::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
