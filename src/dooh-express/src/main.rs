//! Thin entry point: initializes tracing, parses the CLI, hands off to
//! `dooh_express::run`, and maps its return value to a process exit code —
//! the same split `src/license-admin/src/main.rs` uses around its
//! `Commands` dispatch.

use clap::Parser;
use dooh_express::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dooh_express=info,tower_http=info")))
        .json()
        .init();

    let cli = Cli::parse();
    let code = dooh_express::run(cli).await;
    std::process::exit(code);
}
