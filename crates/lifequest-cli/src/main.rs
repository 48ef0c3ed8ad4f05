use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = lifequest_cli::Cli::parse();
    lifequest_cli::run_cli(cli)
}
