//! # Location Server
//!
//! Wires one process together from its [`NodeConfig`]:
//!
//! ```text
//!   ServiceFactory ─► NetComponent ─► MessageDispatcher
//!                                        ├─ ActorDeliverRequest ─► ActorRouter ─► fibers
//!                                        └─ Object*Request      ─► LocationRegistry (optional)
//!
//!   LocationSender ─► LocationProxy ─► registry process
//! ```

use actors::{ActorRouter, FiberManager, TimerService, TokioTimer};
use anyhow::{Context, Result};
use location::{register_handlers, LocationProxy, LocationRegistry, LocationSender};
use network::{MessageDispatcher, NetComponent, ServiceFactory};
use node_config::NodeConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// A running process
pub struct LocationNode {
    config: NodeConfig,
    net: Arc<NetComponent>,
    router: Arc<ActorRouter>,
    fibers: FiberManager,
    registry: Option<LocationRegistry>,
    proxy: LocationProxy,
    sender: LocationSender,
}

impl LocationNode {
    /// Bind the transport and register every handler this process serves
    pub async fn start(config: NodeConfig) -> Result<Self> {
        let timer: Arc<dyn TimerService> = TokioTimer::shared();
        let router = ActorRouter::new(config.node.process_id, config.process_table()?);

        let mut dispatcher = MessageDispatcher::new();
        router
            .register_handlers(&mut dispatcher)
            .context("Failed to register actor handlers")?;

        let registry = if config.location.serve_registry {
            let registry = LocationRegistry::new(config.registry_config(), timer.clone());
            register_handlers(&registry, &mut dispatcher).context("Failed to register location handlers")?;
            Some(registry)
        } else {
            None
        };

        let (service, events) = ServiceFactory::create(config.service_config()?)
            .await
            .context("Failed to start transport")?;
        let net = NetComponent::start(service, events, dispatcher, config.session_config());
        router.attach(&net);

        // A registry hosted here is reached through the bound address
        let registry_address = if registry.is_some() {
            net.local_addr()
        } else {
            config.registry_address()?
        };
        let proxy = LocationProxy::new(net.clone(), registry_address);
        let sender = LocationSender::new(proxy.clone(), router.clone(), timer.clone(), config.sender_config());
        let fibers = FiberManager::new(router.clone(), timer);

        info!(
            process_id = config.node.process_id,
            name = %config.node.name,
            protocol = ?config.network.protocol,
            local_addr = %net.local_addr(),
            registry = %registry_address,
            serves_registry = registry.is_some(),
            "Node started"
        );

        Ok(Self {
            config,
            net,
            router,
            fibers,
            registry,
            proxy,
            sender,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.net.local_addr()
    }

    pub fn net(&self) -> &Arc<NetComponent> {
        &self.net
    }

    pub fn router(&self) -> &Arc<ActorRouter> {
        &self.router
    }

    pub fn fibers(&self) -> &FiberManager {
        &self.fibers
    }

    /// `None` when the registry lives in another process
    pub fn registry(&self) -> Option<&LocationRegistry> {
        self.registry.as_ref()
    }

    /// Registry client for migration (Lock / UnLock) and registration
    pub fn proxy(&self) -> &LocationProxy {
        &self.proxy
    }

    pub fn sender(&self) -> &LocationSender {
        &self.sender
    }

    /// Stop fibers, then fail every pending call and close the transport
    pub fn shutdown(&self) {
        info!(process_id = self.config.node.process_id, "Node shutting down");
        self.fibers.shutdown();
        self.net.shutdown();
    }
}

impl std::fmt::Debug for LocationNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationNode")
            .field("process_id", &self.config.node.process_id)
            .field("local_addr", &self.net.local_addr())
            .field("serves_registry", &self.registry.is_some())
            .finish()
    }
}
