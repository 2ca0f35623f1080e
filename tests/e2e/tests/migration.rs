//! Actor migration seen from a third process

use bytes::Bytes;
use futures::future::join_all;
use location::LocationError;
use location_e2e_tests::{count_of, init_tracing, Cluster, ClusterOptions, Counter};
use network::ServiceKind;
use std::collections::BTreeSet;
use std::time::Duration;
use types::{LocationKey, LocationType};

const T: LocationType = LocationType::DEFAULT;
const OPCODE: u16 = 20_001;

async fn call_count(cluster: &Cluster, process_id: i32, key: LocationKey) -> u64 {
    let reply = cluster
        .node(process_id)
        .sender()
        .call(T, key, OPCODE, Bytes::new())
        .await
        .unwrap();
    assert_eq!(reply.error, 0);
    count_of(&reply.payload).unwrap()
}

/// P1 hosts the registry and the first owner, P2 receives the actor, P3 sends
async fn migration_scenario(protocol: ServiceKind) {
    init_tracing();
    let cluster = Cluster::start(ClusterOptions {
        protocol,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let key = LocationKey::new(1001);

    let old = cluster.spawn(1, 1, Counter::starting_at(0)).await.unwrap();
    cluster.node(1).proxy().add(T, key, old).await.unwrap();
    for expected in 1..=3 {
        assert_eq!(call_count(&cluster, 3, key).await, expected);
    }
    assert_eq!(cluster.node(3).sender().cached(T, key), Some(old));

    // Migration: lock, transfer state to P2, stop the old actor, commit
    let registry = cluster.node(1).proxy();
    registry.lock(T, key, old, Duration::from_secs(5)).await.unwrap();
    assert_eq!(registry.get(T, key).await.unwrap(), Some(old));

    let new = cluster.spawn(2, 4, Counter::starting_at(3)).await.unwrap();
    assert_eq!(cluster.stop(old).await.unwrap(), 1);
    registry.unlock(T, key, old, new).await.unwrap();

    // P3 still caches the old owner, hits NOT_FOUND_ACTOR, re-resolves
    assert_eq!(call_count(&cluster, 3, key).await, 4);
    assert_eq!(cluster.node(3).sender().cached(T, key), Some(new));
    // A process that never cached anything resolves straight to the new owner
    assert_eq!(call_count(&cluster, 1, key).await, 5);

    let stats = cluster.node(1).registry().unwrap().stats();
    assert_eq!(stats.records, 1);
    assert_eq!(stats.locked, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_migration_over_tcp() {
    migration_scenario(ServiceKind::Tcp).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_migration_over_udp() {
    migration_scenario(ServiceKind::Udp).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_key_is_not_found() {
    init_tracing();
    let cluster = Cluster::start(ClusterOptions::default()).await.unwrap();
    let key = LocationKey::new(77);

    let actor = cluster.spawn(2, 1, Counter::starting_at(0)).await.unwrap();
    cluster.node(2).proxy().add(T, key, actor).await.unwrap();
    assert_eq!(call_count(&cluster, 3, key).await, 1);

    // Actor exits and deregisters
    cluster.stop(actor).await.unwrap();
    cluster.node(2).proxy().remove(T, key).await.unwrap();
    assert_eq!(cluster.node(3).proxy().get(T, key).await.unwrap(), None);

    let err = cluster
        .node(3)
        .sender()
        .call(T, key, OPCODE, Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LocationError::NotFound { .. }), "{err}");
    assert_eq!(cluster.node(3).sender().cached(T, key), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_calls_each_get_their_reply() {
    init_tracing();
    let cluster = Cluster::start(ClusterOptions {
        protocol: ServiceKind::Udp,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let key = LocationKey::new(5);
    let actor = cluster.spawn(1, 2, Counter::starting_at(0)).await.unwrap();
    cluster.node(1).proxy().add(T, key, actor).await.unwrap();

    let calls = (0..32).map(|_| call_count(&cluster, 2, key));
    let counts: BTreeSet<u64> = join_all(calls).await.into_iter().collect();
    assert_eq!(counts, (1..=32).collect::<BTreeSet<u64>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_independent_keys_on_one_fiber() {
    let cluster = Cluster::start(ClusterOptions {
        nodes: 2,
        ..ClusterOptions::default()
    })
    .await
    .unwrap();
    let a = LocationKey::new(1);
    let b = LocationKey::new(2);
    let actor_a = cluster.spawn(1, 1, Counter::starting_at(100)).await.unwrap();
    let actor_b = cluster.spawn(1, 1, Counter::starting_at(200)).await.unwrap();
    cluster.node(1).proxy().add(T, a, actor_a).await.unwrap();
    cluster.node(1).proxy().add(T, b, actor_b).await.unwrap();

    // Locking one key does not hold up sends to the other
    cluster.node(1).proxy().lock(T, a, actor_a, Duration::ZERO).await.unwrap();
    assert_eq!(call_count(&cluster, 2, b).await, 201);
    assert_eq!(call_count(&cluster, 2, a).await, 101);
    cluster.node(1).proxy().unlock(T, a, actor_a, actor_a).await.unwrap();
}
