//! Background worker behavior: storage reclamation frontiers and line
//! snapshot backups, observed through a shared in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use linehouse_broker::{Broker, BrokerConfig, QueueStat, TopicStat};
use linehouse_cluster::NoopCoordinator;
use linehouse_kv::{KvStore, MemoryKv};

fn fast_config() -> BrokerConfig {
    BrokerConfig {
        backup_interval: Duration::from_millis(100),
        clean_interval: Duration::from_millis(100),
        clean_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_secs(30),
        self_addr: "127.0.0.1:0".to_string(),
    }
}

async fn open_broker(kv: Arc<MemoryKv>) -> Arc<Broker> {
    Broker::open(kv, Arc::new(NoopCoordinator::new()), fast_config())
        .await
        .unwrap()
}

fn topic_stat(stat: QueueStat) -> TopicStat {
    match stat {
        QueueStat::Topic(topic) => topic,
        QueueStat::Line(_) => panic!("expected topic stat"),
    }
}

#[tokio::test]
async fn test_clean_reclaims_consumed_messages() {
    let kv = Arc::new(MemoryKv::new());
    let broker = open_broker(Arc::clone(&kv)).await;
    broker.create("t", None).await.unwrap();
    broker.create("t/l", None).await.unwrap();

    for payload in ["a", "b", "c"] {
        broker.push("t", Bytes::from(payload)).await.unwrap();
    }
    for _ in 0..3 {
        broker.pop("t/l").await.unwrap().unwrap();
    }

    // Give the worker a couple of clean intervals.
    tokio::time::sleep(Duration::from_millis(350)).await;

    for id in 0..3 {
        assert_eq!(
            kv.get(&format!("t:{id}")).await.unwrap(),
            None,
            "message t:{id} should be reclaimed"
        );
    }
    let stat = topic_stat(broker.stat("t").await.unwrap());
    assert_eq!(stat.head, 3);
    assert_eq!(stat.tail, 3);
    assert_eq!(stat.count, 0);

    broker.close().await;
}

#[tokio::test]
async fn test_reclamation_stops_at_slowest_line() {
    let kv = Arc::new(MemoryKv::new());
    let broker = open_broker(Arc::clone(&kv)).await;
    broker.create("t", None).await.unwrap();
    // l1 auto-acks; l2 tracks confirmations.
    broker.create("t/l1", None).await.unwrap();
    broker
        .create("t/l2", Some(Duration::from_secs(10)))
        .await
        .unwrap();

    let batch: Vec<Bytes> = (0..5).map(|i| Bytes::from(format!("m{i}"))).collect();
    broker.push_many("t", batch).await.unwrap();

    // l1 consumes everything; l2 takes two without confirming.
    for _ in 0..5 {
        broker.pop("t/l1").await.unwrap().unwrap();
    }
    broker.pop("t/l2").await.unwrap().unwrap();
    broker.pop("t/l2").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    // l2 has confirmed nothing, so its frontier pins the head at 0.
    let stat = topic_stat(broker.stat("t").await.unwrap());
    assert_eq!(stat.head, 0);
    assert_eq!(kv.get("t:0").await.unwrap(), Some(Bytes::from("m0")));

    // Confirm the two deliveries; the frontier moves to 2.
    broker.confirm("t/l2/0").await.unwrap();
    broker.confirm("t/l2/1").await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;

    let stat = topic_stat(broker.stat("t").await.unwrap());
    assert_eq!(stat.head, 2);
    assert_eq!(kv.get("t:0").await.unwrap(), None);
    assert_eq!(kv.get("t:1").await.unwrap(), None);
    assert_eq!(kv.get("t:2").await.unwrap(), Some(Bytes::from("m2")));

    broker.close().await;
}

#[tokio::test]
async fn test_untouched_messages_persist_without_lines() {
    let kv = Arc::new(MemoryKv::new());
    let broker = open_broker(Arc::clone(&kv)).await;
    broker.create("t", None).await.unwrap();

    for payload in ["a", "b"] {
        broker.push("t", Bytes::from(payload)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(250)).await;

    // No lines attached: the reclamation frontier is the head itself,
    // so nothing is deleted.
    let stat = topic_stat(broker.stat("t").await.unwrap());
    assert_eq!(stat.head, 0);
    assert_eq!(kv.get("t:0").await.unwrap(), Some(Bytes::from("a")));
    assert_eq!(kv.get("t:1").await.unwrap(), Some(Bytes::from("b")));

    broker.close().await;
}

#[tokio::test]
async fn test_backup_tick_persists_line_cursor() {
    let kv = Arc::new(MemoryKv::new());
    let broker = open_broker(Arc::clone(&kv)).await;
    broker.create("t", None).await.unwrap();
    broker.create("t/l", None).await.unwrap();

    let before = kv.get("t/l").await.unwrap().unwrap();

    broker.push("t", Bytes::from("a")).await.unwrap();
    broker.pop("t/l").await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;

    // The periodic backup rewrote the cursor snapshot after delivery.
    let after = kv.get("t/l").await.unwrap().unwrap();
    assert_ne!(before, after);

    broker.close().await;
}

#[tokio::test]
async fn test_empty_topic_releases_storage() {
    let kv = Arc::new(MemoryKv::new());
    let broker = open_broker(Arc::clone(&kv)).await;
    broker.create("t", None).await.unwrap();
    broker
        .create("t/l", Some(Duration::from_secs(10)))
        .await
        .unwrap();

    for payload in ["a", "b", "c"] {
        broker.push("t", Bytes::from(payload)).await.unwrap();
    }
    broker.pop("t/l").await.unwrap().unwrap();

    broker.empty("t").await.unwrap();

    // Payload keys are gone immediately, not stranded below the head.
    for id in 0..3 {
        assert_eq!(kv.get(&format!("t:{id}")).await.unwrap(), None);
    }
    let stat = topic_stat(broker.stat("t").await.unwrap());
    assert_eq!(stat.head, 3);
    assert_eq!(stat.tail, 3);

    broker.close().await;
}
