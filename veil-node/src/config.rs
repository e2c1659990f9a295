use veil_common::{crypto, MemberId, PrivacyGroup};

use std::collections::HashMap;
use std::env::current_exe;
use std::fs::{read_dir, read_to_string};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::Keypair;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};

/// Node configuration, read from a directory holding `config.yaml`, the
/// node's `sec_key` and one `peers/*.yaml` file per group member.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub group_name: String,
    pub peer_listen_addr: SocketAddr,
    pub client_listen_addr: SocketAddr,
    pub ledger_addr: SocketAddr,
    /// Public contract the built-in storage contract writes to.
    pub public_storage_contract: String,
    #[serde(skip)]
    pub my_keypair: Option<Keypair>,
    #[serde(skip)]
    pub peer_addresses: HashMap<MemberId, SocketAddr>,
    #[serde(
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "endorsement_timeout_ms"
    )]
    pub endorsement_timeout: Duration,
    #[serde(
        deserialize_with = "parse_milliseconds",
        serialize_with = "serialize_milliseconds",
        rename = "ledger_timeout_ms"
    )]
    pub ledger_timeout: Duration,
}

impl Config {
    pub fn from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.is_dir() {
            return Err(anyhow!("config dir not found, or not a directory"));
        }
        let config_str = read_to_string(config_dir.join("config.yaml"))
            .context("cannot read config.yaml")?;
        let mut res = serde_yaml::from_str::<Config>(&config_str)?;
        let pem = read_to_string(config_dir.join("sec_key")).context("cannot read sec_key")?;
        let keypair = crypto::keypair_from_pem(&pem)?;
        debug!(
            "my pubkey is {}",
            crypto::publickey_to_base64(keypair.public.to_bytes())
        );
        res.load_peers(config_dir.join("peers"))?;
        if !res.peer_addresses.contains_key(&keypair.public.to_bytes()) {
            return Err(anyhow!("this node is not listed in its own peers directory"));
        }
        res.my_keypair = Some(keypair);
        Ok(res)
    }

    pub fn new() -> Result<Self> {
        let current_exe = current_exe()?;
        let config_dir = current_exe
            .parent()
            .ok_or_else(|| anyhow!("binary has no parent directory"))?
            .join("config");
        Self::from_path(config_dir)
    }

    fn load_peers(&mut self, peers_dir: PathBuf) -> Result<()> {
        let entries = read_dir(&peers_dir)
            .with_context(|| format!("cannot access peers directory {}", peers_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let buf = read_to_string(&path)
                .with_context(|| format!("cannot read peer config {}", path.display()))?;
            let conf = serde_yaml::from_str::<PeerConfig>(&buf)
                .with_context(|| format!("parse peer config {} failed", path.display()))?;
            self.peer_addresses.insert(conf.public_key, conf.host_addr);
        }
        Ok(())
    }

    /// The allow-list as configured. Read-only for the rest of the node.
    pub fn group(&self) -> PrivacyGroup {
        PrivacyGroup::new(self.group_name.clone(), self.peer_addresses.keys().copied())
    }
}

fn parse_milliseconds<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millisecs: u64 = Deserialize::deserialize(d)?;
    Ok(Duration::from_millis(millisecs))
}

fn serialize_milliseconds<S>(duration: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(duration.as_millis() as u64)
}

/// One member of the privacy group: where its peer port listens and its key.
#[derive(Clone, Deserialize, Serialize)]
pub struct PeerConfig {
    pub host_addr: SocketAddr,
    #[serde(deserialize_with = "parse_pubkey", serialize_with = "serialize_pubkey")]
    pub public_key: MemberId,
}

fn parse_pubkey<'de, D>(d: D) -> Result<MemberId, D::Error>
where
    D: Deserializer<'de>,
{
    let pubkey: String = Deserialize::deserialize(d)?;
    crypto::publickey_from_base64(&pubkey).map_err(serde::de::Error::custom)
}

fn serialize_pubkey<S>(key: &MemberId, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&crypto::publickey_to_base64(*key))
}

#[cfg(test)]
mod config_test {
    use super::*;

    use std::fs::{create_dir_all, remove_dir_all, write};

    const CONFIG: &str = "
group_name: banks
peer_listen_addr: 127.0.0.1:4000
client_listen_addr: 127.0.0.1:5000
ledger_addr: 127.0.0.1:6000
public_storage_contract: public-storage
endorsement_timeout_ms: 1500
ledger_timeout_ms: 3000
";

    #[test]
    fn durations_are_milliseconds() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        assert_eq!(config.endorsement_timeout, Duration::from_millis(1500));
        assert_eq!(config.ledger_timeout, Duration::from_secs(3));
        let back = serde_yaml::to_string(&config).unwrap();
        assert!(back.contains("endorsement_timeout_ms: 1500"));
    }

    #[test]
    fn peer_config_round_trip() {
        let key = crypto::generate_keypair().public.to_bytes();
        let peer = PeerConfig {
            host_addr: "127.0.0.1:4001".parse().unwrap(),
            public_key: key,
        };
        let yaml = serde_yaml::to_string(&peer).unwrap();
        let back: PeerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.public_key, key);
        assert!(serde_yaml::from_str::<PeerConfig>("host_addr: 127.0.0.1:1\npublic_key: nope").is_err());
    }

    #[test]
    fn loads_directory_and_group() {
        let dir = std::env::temp_dir().join(format!("veil-config-test-{}", std::process::id()));
        let _ = remove_dir_all(&dir);
        create_dir_all(dir.join("peers")).unwrap();
        let me = crypto::generate_keypair();
        let other = crypto::generate_keypair().public.to_bytes();
        write(dir.join("config.yaml"), CONFIG).unwrap();
        write(dir.join("sec_key"), crypto::keypair_to_pem(&me).unwrap()).unwrap();
        for (i, key) in [me.public.to_bytes(), other].into_iter().enumerate() {
            let peer = PeerConfig {
                host_addr: format!("127.0.0.1:{}", 4000 + i).parse().unwrap(),
                public_key: key,
            };
            write(
                dir.join("peers").join(format!("{i}.yaml")),
                serde_yaml::to_string(&peer).unwrap(),
            )
            .unwrap();
        }

        let config = Config::from_path(&dir).unwrap();
        let group = config.group();
        assert_eq!(group.len(), 2);
        assert!(group.contains(&me.public.to_bytes()));
        assert!(group.contains(&other));
        assert_eq!(group.name, "banks");
        remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_dir_is_an_error() {
        assert!(Config::from_path("/definitely/not/here").is_err());
    }
}
