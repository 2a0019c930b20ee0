use std::collections::HashSet;
use std::sync::Arc;

use lora_downlink_dispatch::envelope::EnvelopePayload;
use lora_downlink_dispatch::{
    CommandKind, DeviceAddress, DispatchGateway, FileQueueStore, InMemoryQueueStore, QueueKey,
    QueueStore,
};

const PRODUCERS: usize = 8;
const PER_PRODUCER: usize = 25;

/// Hammer one key from several tasks and check that every envelope comes
/// back exactly once, with each producer's own submissions still in order.
async fn check_concurrent_appends(store: Arc<dyn QueueStore>) {
    let gw = DispatchGateway::new(store.clone());
    let mut handles = Vec::new();
    for p in 0..PRODUCERS {
        let gw = gw.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..PER_PRODUCER {
                gw.submit_downlink("10FC2942", &format!("{p:02x}{i:02x}"))
                    .await
                    .expect("accepted");
            }
        }));
    }
    for h in handles {
        h.await.expect("producer task");
    }

    let addr: DeviceAddress = "10FC2942".parse().unwrap();
    let key = QueueKey::new(CommandKind::RawDownlink, addr);
    assert_eq!(store.length(&key).await.unwrap(), PRODUCERS * PER_PRODUCER);

    let mut seen = HashSet::new();
    let mut last_per_producer = vec![None::<usize>; PRODUCERS];
    while let Some(env) = store.pop(&key).await.unwrap() {
        let EnvelopePayload::RawDownlink { payload } = env.payload() else {
            panic!("unexpected payload");
        };
        assert!(seen.insert(payload.clone()), "duplicate {payload}");
        let p = usize::from_str_radix(&payload[..2], 16).unwrap();
        let i = usize::from_str_radix(&payload[2..], 16).unwrap();
        if let Some(prev) = last_per_producer[p] {
            assert!(i > prev, "producer {p} reordered: {i} after {prev}");
        }
        last_per_producer[p] = Some(i);
    }
    assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_memory_store_keeps_every_concurrent_append() {
    check_concurrent_appends(Arc::new(InMemoryQueueStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn file_store_keeps_every_concurrent_append() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileQueueStore::open(dir.path().join("queues")).unwrap();
    check_concurrent_appends(Arc::new(store)).await;
}

/// Sixteen devices submitting at once each end up with exactly their own
/// accepted envelopes.
async fn check_independent_devices(store: Arc<dyn QueueStore>) {
    let gw = DispatchGateway::new(store.clone());
    let addrs: Vec<String> = (0..16u32).map(|n| format!("{n:08X}")).collect();
    let mut handles = Vec::new();
    for a in addrs.clone() {
        let gw = gw.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                gw.submit_mac_command(&a, "0603").await.unwrap_err();
                gw.submit_mac_command(&a, "060201").await.expect("accepted");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    for a in addrs {
        let key = QueueKey::new(CommandKind::MacCommand, a.parse().unwrap());
        assert_eq!(store.length(&key).await.unwrap(), 10, "{a}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_devices_are_independent() {
    check_independent_devices(Arc::new(InMemoryQueueStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_devices_are_independent_on_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileQueueStore::open(dir.path()).unwrap();
    check_independent_devices(Arc::new(store)).await;

    let files = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
        .count();
    assert_eq!(files, 16);
}
