//! # Locus Node Configuration
//!
//! One [`NodeConfig`] per process, loaded from TOML with environment
//! overrides and converted into the runtime configs of the transport,
//! registry and sender.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use node_config::NodeConfig;
//! use std::path::Path;
//!
//! let config = NodeConfig::load(Path::new("config/location.toml"), Some("production"))?;
//! let service = config.service_config()?;
//! let registry = config.registry_config();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod node_config;
pub mod runtime;

pub use node_config::{
    LocationSection, LoggingSection, NetworkSection, NodeConfig, NodeSection, ProcessEntry,
    UdpSection, ENV_PREFIX,
};
