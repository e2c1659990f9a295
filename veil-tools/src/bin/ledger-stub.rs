use veil_node::ledger::{self, MemoryLedger};

use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[command(
    name = "ledger-stub",
    version = "0.2.0",
    author = "Shapooo",
    about = "In-memory public ledger endpoint for local groups"
)]
struct Cli {
    /// Listen address
    #[arg(short, long, default_value = "127.0.0.1:2999")]
    pub addr: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    let cli = Cli::parse();
    ledger::serve(cli.addr, MemoryLedger::new()).await?;
    info!("ledger stub listening on {}", cli.addr);
    futures::future::pending::<()>().await;
    Ok(())
}
