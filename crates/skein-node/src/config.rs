//! Command line and configuration file for a mesh node
//!
//! Settings come from an optional TOML file; flags given on the command
//! line win over the file.
//!
//! ```toml
//! node_id = 1001
//! listen = "0.0.0.0:5555"
//! connect = ["10.0.0.2:5555"]
//!
//! [mesh]
//! node_timeout_ms = 10000
//!
//! [tcp]
//! send_buffer = 5744
//!
//! [log]
//! default_level = "info"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use skein_core::{ConfigError, NodeId};
use skein_logging::LogConfig;
use skein_mesh::MeshConfig;
use skein_transport::TcpConfig;

#[derive(Debug, Parser)]
#[command(name = "skein-node", about = "Run a Skein mesh node over TCP")]
pub struct Cli {
    /// Mesh id of this node (random when omitted)
    #[arg(long)]
    pub node_id: Option<u32>,

    /// Address to accept mesh links on
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Peer to link to at startup (repeatable)
    #[arg(long)]
    pub connect: Vec<SocketAddr>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log filter directive (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Human-readable console logs instead of JSONL
    #[arg(long)]
    pub pretty: bool,
}

/// Contents of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeFileConfig {
    pub node_id: Option<u32>,
    pub listen: Option<SocketAddr>,
    pub connect: Vec<SocketAddr>,
    pub mesh: MeshConfig,
    pub tcp: TcpConfig,
    pub log: LogConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error("node id 0 is reserved")]
    ZeroNodeId,
}

impl NodeFileConfig {
    pub fn load(path: &Path) -> Result<Self, NodeConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| NodeConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| NodeConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved settings for one node
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub node_id: NodeId,
    pub listen: Option<SocketAddr>,
    pub connect: Vec<SocketAddr>,
    pub mesh: MeshConfig,
    pub tcp: TcpConfig,
    pub log: LogConfig,
}

impl NodeSettings {
    /// Merge the command line over the file it names, if any
    pub fn resolve(cli: Cli) -> Result<Self, NodeConfigError> {
        let file = match &cli.config {
            Some(path) => NodeFileConfig::load(path)?,
            None => NodeFileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: NodeFileConfig) -> Result<Self, NodeConfigError> {
        let node_id = match cli.node_id.or(file.node_id) {
            Some(0) => return Err(NodeConfigError::ZeroNodeId),
            Some(id) => NodeId(id),
            None => NodeId(rand::random_range(1..=u32::MAX)),
        };

        let mut connect = file.connect;
        connect.extend(cli.connect);

        let mut log = file.log;
        if let Some(level) = cli.log_level {
            log.default_level = level;
        }
        if cli.pretty {
            log.console.pretty = true;
            log.console.ansi = true;
        }

        file.mesh.validate()?;
        file.tcp.validate()?;

        Ok(Self {
            node_id,
            listen: cli.listen.or(file.listen),
            connect,
            mesh: file.mesh,
            tcp: file.tcp,
            log,
        })
    }
}
