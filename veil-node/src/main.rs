use veil_node::{config::Config, node};

use anyhow::Result;
use clap::{Arg, Command};
use log::LevelFilter;
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    let args = Command::new("veil-node")
        .about("Privacy group member node for veil.")
        .version(clap::crate_version!())
        .arg(
            Arg::new("config")
                .short('c')
                .long("config_dir")
                .action(clap::ArgAction::Set)
                .help(
                    "set config directory, defaults to `config/' \
                     in the same directory as veil-node binary",
                ),
        )
        .get_matches();
    let config = if let Some(path) = args.get_one::<String>("config") {
        Config::from_path(path)?
    } else {
        Config::new()?
    };

    let _node = node::start(config).await?;
    futures::future::pending::<()>().await;
    Ok(())
}
