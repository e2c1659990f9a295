use veil_client::{client::Client, config::Config, transaction::CallTemplate};

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use simple_logger::SimpleLogger;

#[tokio::main]
async fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()?;
    let args = Command::new("veil-client")
        .about("Sends private proposals to a veil node.")
        .version(clap::crate_version!())
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .action(ArgAction::Set)
                .help(
                    "set config file, defaults to `client_config.yaml' \
                     in the same directory as veil-client binary",
                ),
        )
        .arg(Arg::new("contract").required(true).help("private contract id"))
        .arg(Arg::new("method").required(true).help("contract method"))
        .arg(
            Arg::new("arg")
                .long("arg")
                .action(ArgAction::Append)
                .help("private argument as name=u64"),
        )
        .arg(
            Arg::new("public")
                .long("public")
                .action(ArgAction::Append)
                .help("public input as name=u64"),
        )
        .arg(
            Arg::new("count")
                .short('n')
                .long("count")
                .value_parser(clap::value_parser!(u64))
                .default_value("1")
                .help("number of proposals to send"),
        )
        .arg(
            Arg::new("window")
                .short('w')
                .long("window")
                .value_parser(clap::value_parser!(u64))
                .default_value("10")
                .help("maximum proposals in flight"),
        )
        .get_matches();

    let config = if let Some(path) = args.get_one::<String>("config") {
        Config::from_path(path)?
    } else {
        Config::new()?
    };
    let template = CallTemplate {
        contract: required(&args, "contract")?,
        method: required(&args, "method")?,
        args: parse_pairs(args.get_many::<String>("arg"))?,
        public_inputs: parse_pairs(args.get_many::<String>("public"))?,
    };
    let count = args.get_one::<u64>("count").copied().unwrap_or(1);
    let window = args.get_one::<u64>("window").copied().unwrap_or(10);

    Client::new(&config, template).run(count, window).await
}

fn required(args: &clap::ArgMatches, name: &str) -> Result<String> {
    args.get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing {}", name))
}

fn parse_pairs<'a>(
    pairs: Option<impl Iterator<Item = &'a String>>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    pairs
        .into_iter()
        .flatten()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("expected name=value, got {}", pair))?;
            let value: u64 = value
                .parse()
                .map_err(|e| anyhow!("bad value for {}: {}", name, e))?;
            Ok((name.to_string(), value.to_le_bytes().to_vec()))
        })
        .collect()
}
