//! Node Configuration Module
//!
//! Loads one process's configuration from a base TOML file, an optional
//! environment override file and `LOCATION_*` environment variables, in that
//! order of precedence (later wins).
//!
//! ```toml
//! [node]
//! process_id = 1
//!
//! [network]
//! protocol = "udp"
//! bind_address = "0.0.0.0:20001"
//!
//! [location]
//! registry_address = "${REGISTRY_HOST}:20001"
//!
//! [[processes]]
//! process_id = 2
//! inner_address = "10.0.0.2:20001"
//! ```
//!
//! Environment variables use `__` between section and key:
//! `LOCATION_NETWORK__RPC_TIMEOUT_MS=5000`.

use anyhow::{bail, Context, Result};
use codec::PayloadFormat;
use config_crate::{Config, Environment, File};
use network::ServiceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "LOCATION";

/// Envelope header (11) plus the UDP MSG header (13)
const MIN_DATAGRAM_SIZE: usize = 24;
const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub network: NetworkSection,
    pub location: LocationSection,
    pub logging: LoggingSection,
    /// Inner addresses of the other processes, for actor routing
    pub processes: Vec<ProcessEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeSection {
    pub process_id: i32,
    pub name: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            process_id: 1,
            name: "location-server".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkSection {
    pub protocol: ServiceKind,
    pub bind_address: String,
    pub max_frame_size: usize,
    /// 0 disables the per-call timeout
    pub rpc_timeout_ms: u64,
    /// 0 disables idle session disposal
    pub session_idle_timeout_ms: u64,
    pub idle_check_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub payload_format: PayloadFormat,
    pub udp: UdpSection,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            protocol: ServiceKind::Tcp,
            bind_address: "127.0.0.1:20001".to_string(),
            max_frame_size: 1024 * 1024,
            rpc_timeout_ms: 30_000,
            session_idle_timeout_ms: 60_000,
            idle_check_interval_ms: 5_000,
            connect_timeout_ms: 5_000,
            payload_format: PayloadFormat::Bincode,
            udp: UdpSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UdpSection {
    pub resend_interval_ms: u64,
    pub max_resends: u32,
    pub send_window: usize,
    pub max_datagram_size: usize,
}

impl Default for UdpSection {
    fn default() -> Self {
        Self {
            resend_interval_ms: 200,
            max_resends: 10,
            send_window: 128,
            max_datagram_size: 1400,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LocationSection {
    /// Host the registry in this process
    pub serve_registry: bool,
    pub registry_address: String,
    pub lock_wait_timeout_ms: u64,
    pub default_lock_time_ms: u64,
    pub sender_retry_count: u32,
    pub sender_retry_interval_ms: u64,
}

impl Default for LocationSection {
    fn default() -> Self {
        Self {
            serve_registry: true,
            registry_address: "127.0.0.1:20001".to_string(),
            lock_wait_timeout_ms: 10_000,
            default_lock_time_ms: 60_000,
            sender_retry_count: 5,
            sender_retry_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessEntry {
    pub process_id: i32,
    pub inner_address: String,
}

impl NodeConfig {
    /// Load configuration from files with environment overrides
    ///
    /// `environment` selects `<base dir>/environments/<environment>.toml`;
    /// a missing environment file is logged and skipped.
    pub fn load(base_path: &Path, environment: Option<&str>) -> Result<Self> {
        Self::load_with_prefix(base_path, environment, ENV_PREFIX)
    }

    /// [`load`](Self::load) reading overrides from `<prefix>_*` variables
    pub fn load_with_prefix(base_path: &Path, environment: Option<&str>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from(base_path).required(true));

        if let Some(env) = environment {
            let env_file = environment_file(base_path, env);
            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file.as_path()).required(true));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: NodeConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.finish()
    }

    /// Parse a complete configuration from TOML text, without overrides
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(text).context("Failed to parse configuration")?;
        config.finish()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    fn finish(mut self) -> Result<Self> {
        self.expand_env_vars()?;
        self.validate()?;
        debug!(process_id = self.node.process_id, "Configuration loaded");
        Ok(self)
    }

    /// Expand `$VAR` / `${VAR}` in address strings
    pub fn expand_env_vars(&mut self) -> Result<()> {
        self.network.bind_address = expand(&self.network.bind_address, "network.bind_address")?;
        self.location.registry_address = expand(&self.location.registry_address, "location.registry_address")?;
        for process in &mut self.processes {
            process.inner_address = expand(&process.inner_address, "processes.inner_address")?;
        }
        Ok(())
    }

    /// Reject settings the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.network.max_frame_size == 0 {
            bail!("network.max_frame_size must be greater than zero");
        }
        let datagram = self.network.udp.max_datagram_size;
        if !(MIN_DATAGRAM_SIZE..=MAX_DATAGRAM_SIZE).contains(&datagram) {
            bail!(
                "network.udp.max_datagram_size {} outside {}..={}",
                datagram,
                MIN_DATAGRAM_SIZE,
                MAX_DATAGRAM_SIZE
            );
        }
        if self.network.udp.send_window == 0 {
            bail!("network.udp.send_window must be greater than zero");
        }
        if self.network.udp.resend_interval_ms == 0 {
            bail!("network.udp.resend_interval_ms must be greater than zero");
        }
        if self.network.idle_check_interval_ms == 0 && self.network.session_idle_timeout_ms != 0 {
            bail!("network.idle_check_interval_ms must be greater than zero when idle timeout is enabled");
        }
        if self.network.rpc_timeout_ms != 0 && self.location.lock_wait_timeout_ms >= self.network.rpc_timeout_ms {
            bail!(
                "location.lock_wait_timeout_ms ({}) must be below network.rpc_timeout_ms ({})",
                self.location.lock_wait_timeout_ms,
                self.network.rpc_timeout_ms
            );
        }

        self.bind_address()?;
        self.registry_address()?;

        let mut seen = HashSet::new();
        for process in &self.processes {
            if !seen.insert(process.process_id) {
                bail!("Duplicate process id {} in [[processes]]", process.process_id);
            }
            parse_addr(&process.inner_address, "processes.inner_address")?;
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        parse_addr(&self.network.bind_address, "network.bind_address")
    }

    pub fn registry_address(&self) -> Result<SocketAddr> {
        parse_addr(&self.location.registry_address, "location.registry_address")
    }
}

/// `<base dir>/environments/<env>.toml`
fn environment_file(base_path: &Path, env: &str) -> PathBuf {
    base_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("environments")
        .join(format!("{}.toml", env))
}

fn expand(value: &str, field: &str) -> Result<String> {
    Ok(shellexpand::env(value)
        .with_context(|| format!("Failed to expand {}", field))?
        .into_owned())
}

fn parse_addr(value: &str, field: &str) -> Result<SocketAddr> {
    value
        .parse()
        .with_context(|| format!("Invalid socket address for {}: '{}'", field, value))
}
