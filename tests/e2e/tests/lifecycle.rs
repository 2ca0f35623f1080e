//! Lock contention, shutdown and payload formats across processes

use bytes::Bytes;
use codec::error_code::ERR_SERVICE_DISPOSED;
use codec::PayloadFormat;
use location::LocationError;
use location_e2e_tests::{count_of, init_tracing, Cluster, ClusterOptions, Counter};
use network::ServiceKind;
use std::time::Duration;
use types::{ActorId, Address, LocationKey, LocationType};

const T: LocationType = LocationType::DEFAULT;

fn actor(process: i32, instance: i64) -> ActorId {
    ActorId::new(Address::new(process, 1), instance)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_contended_lock_over_udp() {
    init_tracing();
    let cluster = Cluster::start(ClusterOptions {
        protocol: ServiceKind::Udp,
        nodes: 2,
        lock_wait_timeout_ms: 400,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let key = LocationKey::new(9);
    let (a, b) = (actor(1, 1), actor(2, 1));
    let first = cluster.node(1).proxy();
    let second = cluster.node(2).proxy().clone();

    first.add(T, key, a).await.unwrap();
    first.lock(T, key, a, Duration::ZERO).await.unwrap();

    let err = second.lock(T, key, b, Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, LocationError::LockTimeout { .. }), "{err}");

    let waiting = tokio::spawn(async move { second.lock(T, key, b, Duration::ZERO).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    first.unlock(T, key, a, b).await.unwrap();
    waiting.await.unwrap().unwrap();

    assert_eq!(first.get(T, key).await.unwrap(), Some(b));
    assert!(cluster.node(1).registry().unwrap().is_locked(T, key));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_fails_pending_calls() {
    init_tracing();
    let cluster = Cluster::start(ClusterOptions {
        nodes: 2,
        lock_wait_timeout_ms: 5_000,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let key = LocationKey::new(3);
    let (a, b) = (actor(1, 1), actor(2, 1));
    cluster.node(1).proxy().lock(T, key, a, Duration::ZERO).await.unwrap();

    // Parked in the registry behind the held lock
    let proxy = cluster.node(2).proxy().clone();
    let pending = tokio::spawn(async move { proxy.lock(T, key, b, Duration::ZERO).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    cluster.node(2).shutdown();
    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("pending call completes on shutdown")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.code(), ERR_SERVICE_DISPOSED);

    // The registry still answers its own process
    cluster.node(1).proxy().unlock(T, key, a, a).await.unwrap();
    assert_eq!(cluster.node(1).proxy().get(T, key).await.unwrap(), Some(a));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_json_payloads_end_to_end() {
    let cluster = Cluster::start(ClusterOptions {
        payload_format: PayloadFormat::Json,
        nodes: 2,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let key = LocationKey::new(12);
    let owner = cluster.spawn(1, 1, Counter::starting_at(41)).await.unwrap();
    cluster.node(2).proxy().add(T, key, owner).await.unwrap();

    let reply = cluster
        .node(2)
        .sender()
        .call(T, key, 20_001, Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert_eq!(count_of(&reply.payload), Some(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lock_expires_without_unlock() {
    let cluster = Cluster::start(ClusterOptions {
        nodes: 2,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let key = LocationKey::new(4);
    let owner = actor(2, 8);
    let proxy = cluster.node(2).proxy();
    proxy.add(T, key, owner).await.unwrap();
    proxy.lock(T, key, owner, Duration::from_millis(150)).await.unwrap();

    // Owner crashes mid-migration; the lock lapses and the record is untouched
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!cluster.node(1).registry().unwrap().is_locked(T, key));
    assert_eq!(proxy.get(T, key).await.unwrap(), Some(owner));
    let err = proxy.unlock(T, key, owner, actor(1, 9)).await.unwrap_err();
    assert!(matches!(err, LocationError::NotLocked { .. }), "{err}");
}
