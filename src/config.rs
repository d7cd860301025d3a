use std::collections::HashMap;
use std::fs::read_to_string;

use clap::Parser;
use serde::Deserialize;

/// Bus type, mirroring the daemon's historical `type` config key.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "session")]
    Session,
    #[serde(rename = "alljoyn")]
    AllJoyn,
    #[serde(rename = "alljoyn_bundled")]
    AllJoynBundled,
}

impl Default for BusType {
    fn default() -> Self {
        Self::System
    }
}

#[derive(Deserialize, Debug)]
pub struct Limits {
    /// milliseconds; bounds a pending TCP authentication.
    #[serde(default = "Limits::auth_timeout_ms")]
    pub auth_timeout_ms: u64,
    #[serde(default = "Limits::max_incomplete")]
    pub max_incomplete_connections_tcp: usize,
    #[serde(default = "Limits::max_completed")]
    pub max_completed_connections_tcp: usize,
}

impl Limits {
    fn auth_timeout_ms() -> u64 {
        30_000
    }

    fn max_incomplete() -> usize {
        10
    }

    fn max_completed() -> usize {
        50
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            auth_timeout_ms: Self::auth_timeout_ms(),
            max_incomplete_connections_tcp: Self::max_incomplete(),
            max_completed_connections_tcp: Self::max_completed(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct IceLimits {
    #[serde(default = "default_max_incomplete")]
    pub max_incomplete_connections: usize,
    #[serde(default = "default_max_completed")]
    pub max_completed_connections: usize,
}

fn default_max_incomplete() -> usize {
    ::ice::transport::DEFAULT_MAX_INCOMPLETE
}

fn default_max_completed() -> usize {
    ::ice::transport::DEFAULT_MAX_COMPLETED
}

impl Default for IceLimits {
    fn default() -> Self {
        Self {
            max_incomplete_connections: default_max_incomplete(),
            max_completed_connections: default_max_completed(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RendezvousProtocol {
    Http,
    Https,
}

impl Default for RendezvousProtocol {
    fn default() -> Self {
        Self::Https
    }
}

#[derive(Deserialize, Debug)]
pub struct IceDiscoveryManager {
    #[serde(default = "IceDiscoveryManager::interfaces")]
    pub interfaces: String,
    pub server: String,
    #[serde(default)]
    pub protocol: RendezvousProtocol,
    #[serde(default)]
    pub enable_ipv6: bool,
}

impl IceDiscoveryManager {
    fn interfaces() -> String {
        "*".to_string()
    }
}

impl Default for IceDiscoveryManager {
    fn default() -> Self {
        Self {
            interfaces: Self::interfaces(),
            server: String::new(),
            protocol: RendezvousProtocol::default(),
            enable_ipv6: false,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct IpNameService {
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub disable_directed_broadcast: bool,
    #[serde(default = "truthy")]
    pub enable_ipv4: bool,
    #[serde(default)]
    pub enable_ipv6: bool,
}

fn truthy() -> bool {
    true
}

impl Default for IpNameService {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            disable_directed_broadcast: false,
            enable_ipv4: true,
            enable_ipv6: false,
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    /// Listen specifications: `scheme:key=value[,key=value]...`. Recognized
    /// schemes are `tcp`, `ice`, `unix`, `launchd`, `bluetooth`.
    #[serde(default)]
    pub listen: Vec<String>,

    #[serde(default, rename = "type")]
    pub bus_type: BusType,

    #[serde(default)]
    pub limit: Limits,

    #[serde(default)]
    pub ice: IceSection,

    #[serde(default)]
    pub ice_discovery_manager: IceDiscoveryManager,

    #[serde(default)]
    pub ip_name_service: IpNameService,

    /// Allowed authentication mechanisms.
    #[serde(default)]
    pub auth: Vec<String>,

    /// Drop-privileges target user.
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub pidfile: Option<String>,

    #[serde(default)]
    pub syslog: bool,

    #[serde(default)]
    pub fork: bool,

    #[serde(default)]
    pub log: Log,

    /// Static rendezvous username/password, the one high-priority
    /// authentication path this daemon accepts ahead of any interactive flow.
    #[serde(default)]
    pub rendezvous_auth: HashMap<String, String>,

    /// `daemonID` presented at rendezvous client-login.
    #[serde(default = "Config::daemon_id")]
    pub daemon_id: String,
}

impl Config {
    fn daemon_id() -> String {
        format!("meshbusd-{}", std::process::id())
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct IceSection {
    #[serde(default)]
    pub limit: IceLimits,
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
)]
struct Cli {
    /// Path to the daemon's JSON5 configuration file.
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Parses command-line arguments and, if `--config` was given, merges in
    /// the on-disk configuration; otherwise falls back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let cfg_str = Cli::parse()
            .config
            .map(read_to_string)
            .transpose()?
            .unwrap_or_else(|| "{}".to_string());

        Ok(serde_json5::from_str(&cfg_str)?)
    }
}
