//! Cluster coordination: registration, heartbeats, and mirroring of
//! peer-announced topics and lines between brokers sharing one
//! coordinator.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use linehouse_broker::{Broker, BrokerConfig, QueueStat};
use linehouse_cluster::{ClusterEvent, MemoryCoordinator};
use linehouse_kv::MemoryKv;

fn config(addr: &str) -> BrokerConfig {
    BrokerConfig {
        backup_interval: Duration::from_secs(10),
        clean_interval: Duration::from_secs(10),
        clean_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_millis(50),
        self_addr: addr.to_string(),
    }
}

async fn open_broker(coordinator: Arc<MemoryCoordinator>, addr: &str) -> Arc<Broker> {
    Broker::open(Arc::new(MemoryKv::new()), coordinator, config(addr))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_creates_are_registered() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let broker = open_broker(Arc::clone(&coordinator), "10.0.0.1:8808").await;

    broker.create("orders", None).await.unwrap();
    broker
        .create("orders/billing", Some(Duration::from_secs(30)))
        .await
        .unwrap();

    assert_eq!(coordinator.topics().await, vec!["orders".to_string()]);
    assert_eq!(
        coordinator.lines().await,
        vec![(
            "orders".to_string(),
            "billing".to_string(),
            "30s".to_string()
        )]
    );

    broker.remove("orders/billing").await.unwrap();
    assert!(coordinator.lines().await.is_empty());

    broker.close().await;
}

#[tokio::test]
async fn test_heartbeat_announces_address() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let broker = open_broker(Arc::clone(&coordinator), "10.0.0.7:8808").await;

    // The first beat fires immediately; more follow on the interval.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let announcements = coordinator.announcements().await;
    assert!(
        announcements.len() >= 2,
        "expected repeated heartbeats, saw {announcements:?}"
    );
    assert!(announcements.iter().all(|a| a == "10.0.0.7:8808"));

    broker.close().await;

    // No further beats after shutdown.
    let after_close = coordinator.announcements().await.len();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(coordinator.announcements().await.len(), after_close);
}

#[tokio::test]
async fn test_peer_topic_and_line_are_mirrored() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = open_broker(Arc::clone(&coordinator), "10.0.0.1:8808").await;
    let b = open_broker(Arc::clone(&coordinator), "10.0.0.2:8808").await;

    a.create("orders", None).await.unwrap();
    a.create("orders/billing", Some(Duration::from_secs(30)))
        .await
        .unwrap();

    // Give b's watch loop a moment to apply the announcements.
    tokio::time::sleep(Duration::from_millis(100)).await;

    match b.stat("orders/billing").await.unwrap() {
        QueueStat::Line(stat) => assert_eq!(stat.recycle, "30s"),
        QueueStat::Topic(_) => panic!("expected line stat"),
    }

    // The mirrored topic serves traffic against b's own storage.
    b.push("orders", Bytes::from("x")).await.unwrap();
    assert_eq!(
        b.pop("orders/billing").await.unwrap(),
        Some((0, Bytes::from("x")))
    );

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_peer_line_removal_is_mirrored() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let a = open_broker(Arc::clone(&coordinator), "10.0.0.1:8808").await;
    let b = open_broker(Arc::clone(&coordinator), "10.0.0.2:8808").await;

    a.create("t", None).await.unwrap();
    a.create("t/l", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(b.stat("t/l").await.is_ok());

    a.remove("t/l").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(b.stat("t/l").await.is_err());

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn test_line_announced_before_topic_is_applied() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let broker = open_broker(Arc::clone(&coordinator), "10.0.0.1:8808").await;

    // A peer we never saw announces a line directly.
    coordinator.publish(ClusterEvent::LineCreated {
        topic: "ghost".to_string(),
        line: "l".to_string(),
        recycle: "2m".to_string(),
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    match broker.stat("ghost/l").await.unwrap() {
        QueueStat::Line(stat) => assert_eq!(stat.recycle, "2m"),
        QueueStat::Topic(_) => panic!("expected line stat"),
    }

    broker.close().await;
}

#[tokio::test]
async fn test_own_echo_does_not_corrupt_state() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let broker = open_broker(Arc::clone(&coordinator), "10.0.0.1:8808").await;

    // The broker's own registration comes back through watch; applying
    // it must be a harmless no-op.
    broker.create("t", None).await.unwrap();
    broker.create("t/l", None).await.unwrap();
    broker.push("t", Bytes::from("x")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    match broker.stat("t").await.unwrap() {
        QueueStat::Topic(stat) => {
            assert_eq!(stat.tail, 1, "echoed create must not reset the topic");
            assert_eq!(stat.lines.len(), 1);
        }
        QueueStat::Line(_) => panic!("expected topic stat"),
    }

    broker.close().await;
}
