//! obd-link - OBD-II adapter session from the command line

use clap::Parser;
use obd_cli::{init_logging, run, Cli};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    info!("=== obd-link v{} ===", env!("CARGO_PKG_VERSION"));
    run(cli).await
}
