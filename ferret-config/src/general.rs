//! General server settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn host() -> String {
    "0.0.0.0".into()
}

fn remote_port() -> u16 {
    8880
}

fn replication_port() -> u16 {
    8881
}

fn node_name() -> String {
    "ferret".into()
}

fn database_root() -> PathBuf {
    "data".into()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct General {
    /// Address to bind the listeners to.
    #[serde(default = "host")]
    pub host: String,
    /// Remote binary protocol port.
    #[serde(default = "remote_port")]
    pub remote_port: u16,
    /// Replication protocol port.
    #[serde(default = "replication_port")]
    pub replication_port: u16,
    /// This node's name in the cluster.
    #[serde(default = "node_name")]
    pub node_name: String,
    /// Directory holding the shard directories.
    #[serde(default = "database_root")]
    pub database_root: PathBuf,
}

impl Default for General {
    fn default() -> Self {
        Self {
            host: host(),
            remote_port: remote_port(),
            replication_port: replication_port(),
            node_name: node_name(),
            database_root: database_root(),
        }
    }
}

impl General {
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.host, self.remote_port)
    }

    pub fn replication_addr(&self) -> String {
        format!("{}:{}", self.host, self.replication_port)
    }
}
