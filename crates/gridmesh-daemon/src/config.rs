//! Command line and configuration file handling

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use gridmesh_bridge::{BackendConfig, BridgeConfig, MqttConfig};
use gridmesh_logging::{FileConfig, LogConfig};
use gridmesh_node::NodeConfig;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "gridmesh", about = "Mesh networking node for community energy sharing")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the node until interrupted
    Run(ConfigArgs),
    /// Validate the configuration and print it as JSON
    Check(ConfigArgs),
}

/// Flags shared by every subcommand; each overrides the config file
#[derive(Args, Debug, Default)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Node identity (generated from boot time when absent)
    #[arg(long)]
    pub identity: Option<String>,
    /// Deliver backend-bound packets to the backend from this node
    #[arg(long)]
    pub gateway: bool,
    /// UDP port for mesh frames
    #[arg(long)]
    pub port: Option<u16>,
    /// Broadcast address for beacons
    #[arg(long)]
    pub broadcast_addr: Option<IpAddr>,
    /// Attach the wireless interface to batman-adv at startup
    #[arg(long)]
    pub configure_interface: bool,
    /// Local MQTT broker host
    #[arg(long)]
    pub mqtt_host: Option<String>,
    /// Local MQTT broker port
    #[arg(long)]
    pub mqtt_port: Option<u16>,
    /// Backend base URL
    #[arg(long)]
    pub backend_url: Option<String>,
    /// Backend bearer token
    #[arg(long, env = "GRIDMESH_BACKEND_TOKEN")]
    pub backend_token: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
    /// Human-readable console logs instead of JSONL
    #[arg(long)]
    pub pretty: bool,
    /// Also write JSONL logs to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

/// Everything the daemon needs to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Mesh node settings
    pub node: NodeConfig,
    /// Bus bridge settings
    pub bridge: BridgeConfig,
    /// Backend endpoint (used on gateways)
    pub backend: BackendConfig,
    /// Local broker connection
    pub mqtt: MqttConfig,
    /// Seconds between packet processing ticks
    pub process_interval_secs: u64,
    /// Most packets processed per tick
    pub drain_batch: usize,
    /// Logging
    pub log: LogConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            bridge: BridgeConfig::default(),
            backend: BackendConfig::default(),
            mqtt: MqttConfig::default(),
            process_interval_secs: 5,
            drain_batch: 64,
            log: LogConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Resolve the config for a command line: file (or defaults), then flags
    pub fn from_args(args: &ConfigArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides
    pub fn apply(&mut self, args: &ConfigArgs) {
        if let Some(identity) = &args.identity {
            self.node.identity_seed = Some(identity.clone());
        }
        if args.gateway {
            self.node.gateway = true;
        }
        if let Some(port) = args.port {
            self.node.transport.port = port;
        }
        if let Some(addr) = args.broadcast_addr {
            self.node.transport.broadcast_addr = addr;
        }
        if args.configure_interface {
            self.node.transport.interface.configure = true;
        }
        if let Some(host) = &args.mqtt_host {
            self.mqtt.host = host.clone();
        }
        if let Some(port) = args.mqtt_port {
            self.mqtt.port = port;
        }
        if let Some(url) = &args.backend_url {
            self.backend.url = url.clone();
        }
        if let Some(token) = &args.backend_token {
            self.backend.token = Some(token.clone());
        }
        if let Some(level) = &args.log_level {
            self.log.default_level = level.clone();
        }
        if args.pretty {
            self.log.console.pretty = true;
            self.log.console.ansi = true;
        }
        if let Some(dir) = &args.log_dir {
            self.log.file = Some(FileConfig {
                directory: dir.clone(),
                ..self.log.file.clone().unwrap_or_default()
            });
        }
    }

    /// Check the configuration for values the daemon cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        self.node.validate()?;
        self.bridge.validate()?;
        if self.process_interval_secs == 0 {
            bail!("process_interval_secs must be positive");
        }
        if self.drain_batch == 0 {
            bail!("drain_batch must be positive");
        }
        Ok(())
    }

    /// Time between processing ticks
    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }
}
