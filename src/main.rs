mod cli;
mod logging;
mod model;
mod narration;
mod scenario;
mod sequencer;
mod server;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logging::init(args.wants_tui());

    if let Err(e) = cli::run(args).await {
        tracing::error!("{e:#}");
        return Err(e);
    }
    Ok(())
}
