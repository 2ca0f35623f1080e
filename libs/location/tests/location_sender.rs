//! Sending by location key across a migration

use actors::{Actor, ActorMail, ActorRouter, FiberContext, FiberManager, TokioTimer};
use async_trait::async_trait;
use bytes::Bytes;
use location::{
    register_handlers, LocationError, LocationProxy, LocationRegistry, LocationSender,
    RegistryConfig, SenderConfig,
};
use network::{MessageDispatcher, NetComponent, ServiceConfig, ServiceFactory, SessionConfig, TcpConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use types::{LocationKey, LocationType};

const T: LocationType = LocationType::DEFAULT;

struct Tagged(&'static str);

#[async_trait(?Send)]
impl Actor for Tagged {
    async fn handle(&mut self, _ctx: &FiberContext, mail: ActorMail) {
        let mut reply = self.0.as_bytes().to_vec();
        reply.extend_from_slice(&mail.payload);
        mail.reply(reply);
    }
}

/// Takes its first mail and never answers it
struct Stuck {
    started: mpsc::UnboundedSender<()>,
}

#[async_trait(?Send)]
impl Actor for Stuck {
    async fn handle(&mut self, _ctx: &FiberContext, _mail: ActorMail) {
        let _ = self.started.send(());
        std::future::pending::<()>().await;
    }
}

async fn net(dispatcher: MessageDispatcher) -> Arc<NetComponent> {
    let (service, events) = ServiceFactory::create(ServiceConfig::Tcp(TcpConfig {
        bind_address: Some("127.0.0.1:0".parse().unwrap()),
        ..TcpConfig::default()
    }))
    .await
    .unwrap();
    NetComponent::start(service, events, dispatcher, SessionConfig::default())
}

struct World {
    registry: LocationRegistry,
    fibers: FiberManager,
    sender: LocationSender,
    nets: Vec<Arc<NetComponent>>,
}

/// P1 hosts the registry and the actors, P2 sends
async fn world(config: SenderConfig) -> World {
    let registry = LocationRegistry::new(RegistryConfig::default(), TokioTimer::shared());
    let router1 = ActorRouter::new(1, HashMap::new());
    let mut dispatcher = MessageDispatcher::new();
    register_handlers(&registry, &mut dispatcher).unwrap();
    router1.register_handlers(&mut dispatcher).unwrap();
    let net1 = net(dispatcher).await;
    router1.attach(&net1);

    let router2 = ActorRouter::new(2, HashMap::from([(1, net1.local_addr())]));
    let mut dispatcher = MessageDispatcher::new();
    router2.register_handlers(&mut dispatcher).unwrap();
    let net2 = net(dispatcher).await;
    router2.attach(&net2);

    let proxy = LocationProxy::new(net2.clone(), net1.local_addr());
    World {
        registry,
        fibers: FiberManager::new(router1, TokioTimer::shared()),
        sender: LocationSender::new(proxy, router2, TokioTimer::shared(), config),
        nets: vec![net1, net2],
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.fibers.shutdown();
        for net in &self.nets {
            net.shutdown();
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sender_follows_migration() {
    let world = world(SenderConfig {
        retry_interval: Duration::from_millis(10),
        ..SenderConfig::default()
    })
    .await;
    let key = LocationKey::new(100);

    let f1 = world.fibers.create(1).unwrap();
    let f2 = world.fibers.create(2).unwrap();
    let old = f1.run(|ctx| async move { ctx.spawn_actor(None, Tagged("old:")).unwrap() }).await.unwrap();
    world.registry.add(T, key, old).await.unwrap();

    let reply = world.sender.call(T, key, 10_001, Bytes::from_static(b"a")).await.unwrap();
    assert_eq!(reply.payload, b"old:a");
    assert_eq!(world.sender.cached(T, key), Some(old));

    // Migrate: lock, move the actor to F2, commit
    world.registry.lock(T, key, old, Duration::ZERO).await.unwrap();
    let new = f2.run(|ctx| async move { ctx.spawn_actor(None, Tagged("new:")).unwrap() }).await.unwrap();
    f1.run(move |ctx| async move { ctx.remove_actor(old) }).await.unwrap();
    world.registry.unlock(T, key, old, new).unwrap();

    // Cached owner is gone; the sender re-resolves and reaches the new one
    let reply = world.sender.call(T, key, 10_001, Bytes::from_static(b"b")).await.unwrap();
    assert_eq!(reply.payload, b"new:b");
    assert_eq!(world.sender.cached(T, key), Some(new));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mail_lost_with_removed_owner_is_resent_to_new_owner() {
    let world = world(SenderConfig {
        retry_interval: Duration::from_millis(10),
        ..SenderConfig::default()
    })
    .await;
    let key = LocationKey::new(101);
    let f1 = world.fibers.create(1).unwrap();
    let f2 = world.fibers.create(2).unwrap();
    let (started, mut handling) = mpsc::unbounded_channel();
    let old = f1
        .run(move |ctx| async move { ctx.spawn_actor(None, Stuck { started }).unwrap() })
        .await
        .unwrap();
    world.registry.add(T, key, old).await.unwrap();

    let migrate = async {
        // The call is in the old owner's hands when it is removed
        handling.recv().await.unwrap();
        world.registry.lock(T, key, old, Duration::ZERO).await.unwrap();
        let new = f2.run(|ctx| async move { ctx.spawn_actor(None, Tagged("new:")).unwrap() }).await.unwrap();
        assert_eq!(f1.run(move |ctx| async move { ctx.remove_actor(old) }).await.unwrap(), 1);
        world.registry.unlock(T, key, old, new).unwrap();
        new
    };
    let (reply, new) = tokio::join!(world.sender.call(T, key, 10_001, Bytes::from_static(b"c")), migrate);

    let reply = reply.unwrap();
    assert_eq!(reply.error, 0);
    assert_eq!(reply.payload, b"new:c");
    assert_eq!(world.sender.cached(T, key), Some(new));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_key_of_another_type_is_not_queued() {
    let world = world(SenderConfig {
        queue_timeout: Duration::from_millis(200),
        ..SenderConfig::default()
    })
    .await;
    let key = LocationKey::new(55);
    let (player, room) = (LocationType::new(1), LocationType::new(2));
    let fiber = world.fibers.create(1).unwrap();
    let (started, mut handling) = mpsc::unbounded_channel();
    let stuck = fiber
        .run(move |ctx| async move { ctx.spawn_actor(None, Stuck { started }).unwrap() })
        .await
        .unwrap();
    let tagged = fiber.run(|ctx| async move { ctx.spawn_actor(None, Tagged("room:")).unwrap() }).await.unwrap();
    world.registry.add(player, key, stuck).await.unwrap();
    world.registry.add(room, key, tagged).await.unwrap();

    // Holds the player queue for the key while the actor sits on the mail
    let blocked = world.sender.call(player, key, 10_001, Bytes::new());
    tokio::pin!(blocked);
    tokio::select! {
        _ = &mut blocked => panic!("stuck actor answered"),
        _ = handling.recv() => {}
    }

    let reply = world.sender.call(room, key, 10_001, Bytes::from_static(b"r")).await.unwrap();
    assert_eq!(reply.payload, b"room:r");

    let err = world.sender.call(player, key, 10_001, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, LocationError::LockTimeout { .. }), "{err}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unregistered_key() {
    let world = world(SenderConfig::default()).await;
    let err = world
        .sender
        .call(T, LocationKey::new(404), 10_001, Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::NotFound { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_owner_exhausts_retries() {
    let world = world(SenderConfig {
        retry_count: 2,
        retry_interval: Duration::from_millis(10),
        ..SenderConfig::default()
    })
    .await;
    let key = LocationKey::new(7);

    let fiber = world.fibers.create(1).unwrap();
    let actor = fiber.run(|ctx| async move { ctx.spawn_actor(None, Tagged("x")).unwrap() }).await.unwrap();
    world.registry.add(T, key, actor).await.unwrap();
    // Actor stops but its registration is left behind
    fiber.run(move |ctx| async move { ctx.remove_actor(actor) }).await.unwrap();

    let err = world.sender.call(T, key, 10_001, Bytes::new()).await.unwrap_err();
    assert!(matches!(err, LocationError::ActorNotFound { attempts: 3, .. }));
    assert_eq!(world.sender.cached(T, key), None);
}
