//! End-to-End Test Harness for Locus
//!
//! Starts several [`LocationNode`]s on loopback, process 1 hosting the
//! registry, and wires their routers to each other.

use actors::{Actor, ActorMail, FiberContext, FiberHandle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use codec::PayloadFormat;
use location_server::LocationNode;
use network::ServiceKind;
use node_config::NodeConfig;
use std::net::SocketAddr;
use types::{ActorId, Address};

/// Cluster shape
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub protocol: ServiceKind,
    pub payload_format: PayloadFormat,
    pub nodes: usize,
    pub lock_wait_timeout_ms: u64,
    pub rpc_timeout_ms: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            protocol: ServiceKind::Tcp,
            payload_format: PayloadFormat::Bincode,
            nodes: 3,
            lock_wait_timeout_ms: 2_000,
            rpc_timeout_ms: 10_000,
        }
    }
}

/// Configuration of process `process_id`; the registry lives in process 1
pub fn node_config(options: &ClusterOptions, process_id: i32, registry: Option<SocketAddr>) -> Result<NodeConfig> {
    let mut config = NodeConfig::default();
    config.node.process_id = process_id;
    config.node.name = format!("e2e-{}", process_id);
    config.network.protocol = options.protocol;
    config.network.payload_format = options.payload_format;
    config.network.bind_address = "127.0.0.1:0".to_string();
    config.network.rpc_timeout_ms = options.rpc_timeout_ms;
    config.network.udp.resend_interval_ms = 50;
    config.location.lock_wait_timeout_ms = options.lock_wait_timeout_ms;
    config.location.sender_retry_interval_ms = 20;
    if let Some(registry) = registry {
        config.location.serve_registry = false;
        config.location.registry_address = registry.to_string();
    }
    config.validate()?;
    Ok(config)
}

pub struct Cluster {
    nodes: Vec<LocationNode>,
}

impl Cluster {
    pub async fn start(options: ClusterOptions) -> Result<Self> {
        let registry = LocationNode::start(node_config(&options, 1, None)?).await?;
        let registry_addr = registry.local_addr();
        let mut nodes = vec![registry];
        for process_id in 2..=options.nodes as i32 {
            let config = node_config(&options, process_id, Some(registry_addr))?;
            nodes.push(LocationNode::start(config).await?);
        }

        // Every router learns every other process's address
        for node in &nodes {
            for peer in &nodes {
                let pid = peer.config().node.process_id;
                if pid != node.config().node.process_id {
                    node.router().set_process_address(pid, peer.local_addr());
                }
            }
        }
        Ok(Self { nodes })
    }

    /// Node of `process_id` (1-based)
    pub fn node(&self, process_id: i32) -> &LocationNode {
        &self.nodes[(process_id - 1) as usize]
    }

    /// Existing fiber or a new one at `(process_id, fiber_id)`
    pub fn fiber(&self, process_id: i32, fiber_id: i32) -> Result<FiberHandle> {
        let fibers = self.node(process_id).fibers();
        if let Some(handle) = fibers.get(Address::new(process_id, fiber_id)) {
            return Ok(handle);
        }
        Ok(fibers.create(fiber_id)?)
    }

    /// Start `actor` on a fiber and return its id
    pub async fn spawn<A>(&self, process_id: i32, fiber_id: i32, actor: A) -> Result<ActorId>
    where
        A: Actor + Send,
    {
        let fiber = self.fiber(process_id, fiber_id)?;
        let actor_id = fiber
            .run(move |ctx| async move { ctx.spawn_actor(None, actor) })
            .await??;
        Ok(actor_id)
    }

    /// Stop an actor; returns how many actors went with it
    pub async fn stop(&self, actor_id: ActorId) -> Result<usize> {
        let address = actor_id.address;
        let fiber = self
            .node(address.process)
            .fibers()
            .get(address)
            .context("Actor's fiber is not running")?;
        Ok(fiber.run(move |ctx| async move { ctx.remove_actor(actor_id) }).await?)
    }

    pub fn shutdown(&self) {
        for node in self.nodes.iter().rev() {
            node.shutdown();
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Counts deliveries; replies with the new count, little-endian
pub struct Counter {
    pub count: u64,
}

impl Counter {
    pub fn starting_at(count: u64) -> Self {
        Self { count }
    }
}

#[async_trait(?Send)]
impl Actor for Counter {
    async fn handle(&mut self, _ctx: &FiberContext, mail: ActorMail) {
        self.count += 1;
        mail.reply(self.count.to_le_bytes().to_vec());
    }
}

/// Decode a [`Counter`] reply
pub fn count_of(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Tracing for a test binary; repeated calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
