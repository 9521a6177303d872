//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// On-disk format version
pub const CONFIG_VERSION: u32 = 1;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub control: ControlConfig,
    #[serde(default)]
    pub forward: ForwardConfig,
}

/// Provisioning endpoint credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Base URL of the provisioning endpoint
    pub url: String,
    /// Secret sent with every provisioning request
    pub key: String,
}

/// Forwarding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Address the local listeners bind to
    pub local_host: IpAddr,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Transfer chunk size in bytes
    pub buffer_size: usize,
    pub listen_backlog: u32,
    pub mappings: Vec<PortMapping>,
}

/// One local port to remote port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortMapping {
    pub local_port: u16,
    pub remote_port: u16,
}

impl PortMapping {
    /// A mapping that forwards a local port to the same remote port number
    pub fn same(port: u16) -> Self {
        Self {
            local_port: port,
            remote_port: port,
        }
    }
}

impl Config {
    /// Build a fresh configuration around the given credentials
    pub fn new(url: String, key: String) -> Self {
        Self {
            version: CONFIG_VERSION,
            control: ControlConfig { url, key },
            forward: ForwardConfig::default(),
        }
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            local_host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            buffer_size: 4096,
            listen_backlog: 64,
            mappings: vec![
                PortMapping::same(1910),
                PortMapping::same(1911),
                PortMapping::same(1912),
            ],
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}
