//! Conversions from [`NodeConfig`] into the runtime structs of each crate

use crate::node_config::NodeConfig;
use anyhow::{Context, Result};
use location::{RegistryConfig, SenderConfig};
use network::{ServiceConfig, ServiceKind, SessionConfig, TcpConfig, UdpConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// 0 means disabled
fn optional_millis(value: u64) -> Option<Duration> {
    (value != 0).then(|| millis(value))
}

impl NodeConfig {
    pub fn session_config(&self) -> SessionConfig {
        let network = &self.network;
        SessionConfig {
            rpc_timeout: optional_millis(network.rpc_timeout_ms),
            idle_timeout: optional_millis(network.session_idle_timeout_ms),
            idle_check_interval: millis(network.idle_check_interval_ms.max(1)),
            payload_format: network.payload_format,
        }
    }

    pub fn tcp_config(&self) -> Result<TcpConfig> {
        Ok(TcpConfig {
            bind_address: Some(self.bind_address()?),
            connect_timeout: millis(self.network.connect_timeout_ms),
            max_frame_size: self.network.max_frame_size,
        })
    }

    pub fn udp_config(&self) -> Result<UdpConfig> {
        let udp = &self.network.udp;
        Ok(UdpConfig {
            bind_address: self.bind_address()?,
            connect_timeout: millis(self.network.connect_timeout_ms),
            resend_interval: millis(udp.resend_interval_ms),
            max_resends: udp.max_resends,
            send_window: udp.send_window,
            max_datagram_size: udp.max_datagram_size,
        })
    }

    /// Transport selected by `network.protocol`
    pub fn service_config(&self) -> Result<ServiceConfig> {
        Ok(match self.network.protocol {
            ServiceKind::Tcp => ServiceConfig::Tcp(self.tcp_config()?),
            ServiceKind::Udp => ServiceConfig::Udp(self.udp_config()?),
        })
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            lock_wait_timeout: millis(self.location.lock_wait_timeout_ms),
            default_lock_time: millis(self.location.default_lock_time_ms),
        }
    }

    pub fn sender_config(&self) -> SenderConfig {
        SenderConfig {
            retry_count: self.location.sender_retry_count,
            retry_interval: millis(self.location.sender_retry_interval_ms),
            queue_timeout: millis(self.location.lock_wait_timeout_ms),
        }
    }

    /// Process id → inner address, for [`actors::ActorRouter`]
    pub fn process_table(&self) -> Result<HashMap<i32, SocketAddr>> {
        self.processes
            .iter()
            .map(|p| {
                let addr = p
                    .inner_address
                    .parse()
                    .with_context(|| format!("Invalid inner address for process {}", p.process_id))?;
                Ok((p.process_id, addr))
            })
            .collect()
    }
}
