use veil_client::config::{Config as ClientConfig, GroupConfig};
use veil_common::{crypto, PrivacyGroup};
use veil_node::config::{Config, PeerConfig};

use std::fs::{create_dir_all, write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "config-gen",
    version = "0.2.0",
    author = "Shapooo",
    about = "Generate node directories, group file and a client config"
)]
struct Cli {
    /// Number of group members to generate
    #[arg(short, long, default_value = "2")]
    pub count: u16,
    /// Name of the privacy group
    #[arg(short, long, default_value = "veil")]
    pub group: String,
    /// Output path
    #[arg(short, long, default_value = "./")]
    pub output_path: PathBuf,
    /// Start port; member n listens for peers on start+2n and clients on start+2n+1
    #[arg(short, long, default_value = "3000")]
    pub start_port: u16,
    /// Address of the public ledger endpoint
    #[arg(short, long, default_value = "127.0.0.1:2999")]
    pub ledger_addr: SocketAddr,
    /// Public contract written by the storage contract
    #[arg(long, default_value = "public-storage")]
    pub public_contract: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !cli.output_path.is_dir() {
        return Err(anyhow!("output path is not a directory"));
    }
    if cli.count == 0 {
        return Err(anyhow!("a group needs at least one member"));
    }
    if 2 * cli.count as u32 + cli.start_port as u32 > u16::MAX as u32 {
        return Err(anyhow!("port overflow"));
    }

    let keypairs: Vec<_> = (0..cli.count).map(|_| crypto::generate_keypair()).collect();
    let peers = keypairs
        .iter()
        .zip(0..)
        .map(|(keypair, n)| {
            Ok(PeerConfig {
                host_addr: local_addr(cli.start_port + 2 * n)?,
                public_key: keypair.public.to_bytes(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    for (n, keypair) in keypairs.iter().enumerate() {
        let dir = cli.output_path.join(n.to_string());
        create_dir_all(dir.join("peers"))?;
        let config = Config {
            group_name: cli.group.clone(),
            peer_listen_addr: peers[n].host_addr,
            client_listen_addr: local_addr(cli.start_port + 2 * n as u16 + 1)?,
            ledger_addr: cli.ledger_addr,
            public_storage_contract: cli.public_contract.clone(),
            my_keypair: None,
            peer_addresses: Default::default(),
            endorsement_timeout: Duration::from_millis(2000),
            ledger_timeout: Duration::from_millis(5000),
        };
        write(dir.join("config.yaml"), serde_yaml::to_string(&config)?)?;
        write(dir.join("sec_key"), crypto::keypair_to_pem(keypair)?)?;
        for (i, peer) in peers.iter().enumerate() {
            write(
                dir.join("peers").join(format!("{}.yaml", i)),
                serde_yaml::to_string(peer)?,
            )?;
        }
    }

    let group = PrivacyGroup::new(cli.group.clone(), peers.iter().map(|p| p.public_key));
    write(
        cli.output_path.join("group.yaml"),
        serde_yaml::to_string(&GroupConfig::from_group(&group))?,
    )?;
    gen_client_config(&cli.output_path, local_addr(cli.start_port + 1)?)?;
    println!(
        "group {} ({}) with {} members written to {}",
        cli.group,
        crypto::short(&group.id()),
        cli.count,
        cli.output_path.display()
    );
    Ok(())
}

fn gen_client_config(output_path: &Path, node_addr: SocketAddr) -> Result<()> {
    let keypair = crypto::generate_keypair();
    write(output_path.join("client_key"), crypto::keypair_to_pem(&keypair)?)?;
    let config = ClientConfig {
        node_addr,
        group: "group.yaml".into(),
        keypair: "client_key".into(),
        group_id: Default::default(),
        caller: Default::default(),
    };
    write(
        output_path.join("client_config.yaml"),
        serde_yaml::to_string(&config)?,
    )?;
    Ok(())
}

fn local_addr(port: u16) -> Result<SocketAddr> {
    Ok(format!("127.0.0.1:{}", port).parse()?)
}
