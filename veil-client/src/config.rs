use veil_common::{crypto, GroupId, MemberId, PrivacyGroup};

use std::env::current_exe;
use std::fs::read_to_string;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Client port of the node that coordinates our proposals.
    pub node_addr: SocketAddr,
    /// Group membership file, relative to the config file.
    pub group: PathBuf,
    /// PEM keypair identifying the caller, relative to the config file.
    pub keypair: PathBuf,
    #[serde(skip)]
    pub group_id: GroupId,
    #[serde(skip)]
    pub caller: MemberId,
}

impl Config {
    pub fn new() -> Result<Self> {
        let current_exe = current_exe()?;
        let config_path = current_exe
            .parent()
            .ok_or_else(|| anyhow!("binary has no parent directory"))?
            .join("client_config.yaml");
        Self::from_path(config_path)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(anyhow!("config file not found, or not a file"));
        }
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let config_str = read_to_string(path).context("cannot read client config")?;
        let mut config = serde_yaml::from_str::<Config>(&config_str)?;

        let group = GroupConfig::from_path(base.join(&config.group))?.to_group()?;
        config.group_id = group.id();
        let pem = read_to_string(base.join(&config.keypair))
            .with_context(|| format!("cannot read keypair {}", config.keypair.display()))?;
        config.caller = crypto::keypair_from_pem(&pem)?.public.to_bytes();
        Ok(config)
    }
}

/// The group membership file shared by every node and client of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    /// Base64 public keys.
    pub members: Vec<String>,
}

impl GroupConfig {
    pub fn from_group(group: &PrivacyGroup) -> Self {
        Self {
            name: group.name.clone(),
            members: group
                .members
                .iter()
                .map(|m| crypto::publickey_to_base64(*m))
                .collect(),
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let buf = read_to_string(path)
            .with_context(|| format!("cannot read group file {}", path.display()))?;
        Ok(serde_yaml::from_str(&buf)?)
    }

    pub fn to_group(&self) -> Result<PrivacyGroup> {
        let members = self
            .members
            .iter()
            .map(|m| crypto::publickey_from_base64(m))
            .collect::<Result<Vec<_>>>()?;
        Ok(PrivacyGroup::new(self.name.clone(), members))
    }
}

#[cfg(test)]
mod config_test {
    use super::*;
    use std::fs;

    #[test]
    fn loads_group_and_caller_relative_to_config() {
        let dir = std::env::temp_dir().join(format!("veil-client-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let (ka, kb, caller) = (
            crypto::generate_keypair(),
            crypto::generate_keypair(),
            crypto::generate_keypair(),
        );
        let group = PrivacyGroup::new("banks", [ka.public.to_bytes(), kb.public.to_bytes()]);
        fs::write(
            dir.join("group.yaml"),
            serde_yaml::to_string(&GroupConfig::from_group(&group)).unwrap(),
        )
        .unwrap();
        fs::write(dir.join("client_key"), crypto::keypair_to_pem(&caller).unwrap()).unwrap();
        fs::write(
            dir.join("client_config.yaml"),
            "node_addr: 127.0.0.1:4000\ngroup: group.yaml\nkeypair: client_key\n",
        )
        .unwrap();

        let config = Config::from_path(dir.join("client_config.yaml")).unwrap();
        assert_eq!(config.group_id, group.id());
        assert_eq!(config.caller, caller.public.to_bytes());
        assert_eq!(config.node_addr, "127.0.0.1:4000".parse().unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn group_file_with_bad_key_is_refused() {
        let conf = GroupConfig {
            name: "banks".into(),
            members: vec!["not a key".into()],
        };
        assert!(conf.to_group().is_err());
    }
}
