use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use skillforge::cli::{execute, Cli};

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "skillforge=warn",
        1 => "skillforge=info",
        _ => "skillforge=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli).await
}
