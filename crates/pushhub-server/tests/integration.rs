//! End-to-end tests: several hubs sharing one in-process backplane stand in
//! for several server processes on one broker.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use pushhub_backplane::{Backplane, MemoryBackplane, Subscription};
use pushhub_core::{BackplaneError, ClientId, ConnectionId, Event, Target};
use pushhub_server::{BridgeState, Drain, Hub, PushServer};
use pushhub_settings::{BridgeSettings, HubSettings, ServerSettings};
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

fn bridge_settings() -> BridgeSettings {
    BridgeSettings {
        initial_backoff_ms: 10,
        max_backoff_ms: 100,
        jitter_factor: 0.1,
    }
}

async fn start_hub(backplane: Arc<dyn Backplane>) -> Hub {
    let hub = Hub::start(&HubSettings::default(), &bridge_settings(), backplane);
    assert!(
        timeout(TIMEOUT, hub.wait_until_subscribed()).await.unwrap(),
        "hub never subscribed"
    );
    hub
}

fn client(id: &str) -> Option<ClientId> {
    Some(ClientId::from(id))
}

async fn next_payload(drain: &mut Drain) -> Option<String> {
    timeout(TIMEOUT, drain.next())
        .await
        .ok()
        .flatten()
        .map(|p| p.to_string())
}

async fn assert_silent(drain: &mut Drain) {
    assert!(
        timeout(QUIET, drain.next()).await.is_err(),
        "connection received an unexpected payload"
    );
}

/// Backplane view of one process whose own subscriptions can be cut off
/// while other processes keep working.
struct FlakyBackplane {
    inner: MemoryBackplane,
    down: AtomicBool,
}

#[async_trait]
impl Backplane for FlakyBackplane {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), BackplaneError> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, BackplaneError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(BackplaneError::Unavailable("link down".into()));
        }
        self.inner.subscribe(channel).await
    }
}

// ── Delivery scenarios ──

#[tokio::test]
async fn targeted_publish_reaches_client() {
    let hub = start_hub(Arc::new(MemoryBackplane::new())).await;
    let alice = hub.register(client("alice"));
    let mut drain = alice.drain().unwrap();

    hub.publish(Target::client("alice"), "hi").await.unwrap();

    assert_eq!(next_payload(&mut drain).await.as_deref(), Some("hi"));
    assert_silent(&mut drain).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn targeted_publish_crosses_processes() {
    let backplane = MemoryBackplane::new();
    let a = start_hub(Arc::new(backplane.clone())).await;
    let b = start_hub(Arc::new(backplane.clone())).await;
    let bob = b.register(client("bob"));
    let mut bob_drain = bob.drain().unwrap();
    let bystander = a.register(client("alice"));
    let mut bystander_drain = bystander.drain().unwrap();

    a.publish(Target::client("bob"), "from a").await.unwrap();

    assert_eq!(next_payload(&mut bob_drain).await.as_deref(), Some("from a"));
    assert!(a.registry().connections_for(&ClientId::from("bob")).is_empty());
    assert_silent(&mut bystander_drain).await;

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn broadcast_reaches_every_process() {
    let backplane = MemoryBackplane::new();
    let a = start_hub(Arc::new(backplane.clone())).await;
    let b = start_hub(Arc::new(backplane.clone())).await;
    let mut drains = vec![
        a.register(client("alice")).drain().unwrap(),
        a.register(client("alice")).drain().unwrap(),
        b.register(client("carol")).drain().unwrap(),
    ];

    a.broadcast("tick").await.unwrap();

    for drain in &mut drains {
        assert_eq!(next_payload(drain).await.as_deref(), Some("tick"));
    }
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn broadcast_is_not_replayed_to_later_connections() {
    let hub = start_hub(Arc::new(MemoryBackplane::new())).await;
    let early = hub.register(None);
    let mut early_drain = early.drain().unwrap();

    hub.broadcast("first").await.unwrap();
    assert_eq!(next_payload(&mut early_drain).await.as_deref(), Some("first"));

    let late = hub.register(None);
    let mut late_drain = late.drain().unwrap();
    assert_silent(&mut late_drain).await;

    hub.broadcast("second").await.unwrap();
    assert_eq!(next_payload(&mut late_drain).await.as_deref(), Some("second"));
    hub.shutdown().await;
}

#[tokio::test]
async fn publish_to_unknown_client_is_silent() {
    let backplane = MemoryBackplane::new();
    let a = start_hub(Arc::new(backplane.clone())).await;
    let b = start_hub(Arc::new(backplane.clone())).await;
    let mut drains = vec![
        a.register(client("alice")).drain().unwrap(),
        b.register(client("bob")).drain().unwrap(),
    ];

    a.publish(Target::client("ghost"), "x").await.unwrap();

    for drain in &mut drains {
        assert_silent(drain).await;
    }
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn disconnect_unregisters_and_ends_drain() {
    let hub = start_hub(Arc::new(MemoryBackplane::new())).await;
    let conn = hub.register(client("alice"));
    let mut drain = conn.drain().unwrap();
    let waiter = tokio::spawn(async move { drain.next().await });

    hub.unregister(conn.id());

    assert!(hub.registry().all_connections().is_empty());
    let ended = timeout(TIMEOUT, waiter).await.unwrap().unwrap();
    assert!(ended.is_none());

    // a fresh registration for the same client is independent
    let again = hub.register(client("alice"));
    let mut again_drain = again.drain().unwrap();
    hub.publish(Target::client("alice"), "back").await.unwrap();
    assert_eq!(next_payload(&mut again_drain).await.as_deref(), Some("back"));
    hub.shutdown().await;
}

#[tokio::test]
async fn bridge_recovers_after_subscription_loss() {
    let shared = MemoryBackplane::new();
    let flaky = Arc::new(FlakyBackplane {
        inner: shared.clone(),
        down: AtomicBool::new(false),
    });
    let a = start_hub(Arc::new(shared.clone())).await;
    let b = start_hub(flaky.clone()).await;
    let carol = b.register(client("carol"));
    let mut drain = carol.drain().unwrap();

    flaky.down.store(true, Ordering::SeqCst);
    shared.sever_subscriptions();
    assert!(
        timeout(TIMEOUT, b.bridge().wait_for_state(BridgeState::Disconnected))
            .await
            .unwrap()
    );
    assert!(timeout(TIMEOUT, a.wait_until_subscribed()).await.unwrap());

    // b holds no subscription: this one is lost for b
    a.publish(Target::client("carol"), "during outage").await.unwrap();

    flaky.down.store(false, Ordering::SeqCst);
    assert!(timeout(TIMEOUT, b.wait_until_subscribed()).await.unwrap());
    a.publish(Target::client("carol"), "after").await.unwrap();

    assert_eq!(next_payload(&mut drain).await.as_deref(), Some("after"));
    assert_silent(&mut drain).await;
    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn malformed_envelope_is_skipped() {
    let backplane = MemoryBackplane::new();
    let hub = start_hub(Arc::new(backplane.clone())).await;
    let conn = hub.register(client("alice"));
    let mut drain = conn.drain().unwrap();

    backplane
        .publish(&HubSettings::default().channel, Bytes::from_static(b"garbage"))
        .await
        .unwrap();
    hub.publish(Target::client("alice"), "ok").await.unwrap();

    assert_eq!(next_payload(&mut drain).await.as_deref(), Some("ok"));
    assert_eq!(hub.bridge_state(), BridgeState::Subscribed);
    hub.shutdown().await;
}

#[tokio::test]
async fn slow_consumer_does_not_block_others() {
    let backplane = MemoryBackplane::new();
    let settings = HubSettings {
        mailbox_capacity: 2,
        ..HubSettings::default()
    };
    let hub = Hub::start(&settings, &bridge_settings(), Arc::new(backplane));
    assert!(timeout(TIMEOUT, hub.wait_until_subscribed()).await.unwrap());
    let slow = hub.register(client("slow"));
    let fast = hub.register(client("fast"));
    let mut fast_drain = fast.drain().unwrap();

    for i in 0..10 {
        timeout(TIMEOUT, hub.broadcast(format!("m{i}")))
            .await
            .expect("publish blocked")
            .unwrap();
        assert_eq!(
            next_payload(&mut fast_drain).await,
            Some(format!("m{i}"))
        );
    }

    assert_eq!(slow.delivered_count(), 2);
    assert_eq!(slow.dropped_count(), 8);
    assert_eq!(fast.dropped_count(), 0);
    hub.shutdown().await;
}

#[tokio::test]
async fn per_connection_order_is_fifo() {
    let hub = start_hub(Arc::new(MemoryBackplane::new())).await;
    let conn = hub.register(client("alice"));
    let mut drain = conn.drain().unwrap();

    for i in 0..5 {
        hub.publish(Target::client("alice"), format!("{i}")).await.unwrap();
    }
    for i in 0..5 {
        assert_eq!(next_payload(&mut drain).await, Some(format!("{i}")));
    }
    hub.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_register_unregister_publish() {
    let hub = Arc::new(start_hub(Arc::new(MemoryBackplane::new())).await);

    let tasks: Vec<_> = (0..8)
        .map(|worker| {
            let hub = hub.clone();
            tokio::spawn(async move {
                let mut kept = Vec::new();
                for i in 0..100 {
                    let conn = hub.register(Some(ClientId::from(format!("c{}", i % 5))));
                    let _ = hub
                        .router()
                        .publish_local(&Event::to_client(format!("c{}", i % 5), "x"));
                    if i % 10 == 0 {
                        hub.broadcast("b").await.unwrap();
                    }
                    if (i + worker) % 4 == 0 {
                        kept.push(conn.id().clone());
                    } else {
                        hub.unregister(conn.id());
                    }
                }
                kept
            })
        })
        .collect();

    let mut expected: HashSet<ConnectionId> = HashSet::new();
    for task in tasks {
        expected.extend(task.await.unwrap());
    }
    let actual: HashSet<ConnectionId> = hub
        .registry()
        .all_connections()
        .iter()
        .map(|c| c.id().clone())
        .collect();
    assert_eq!(actual, expected);
    hub.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_open_drains() {
    let hub = start_hub(Arc::new(MemoryBackplane::new())).await;
    let mut drain = hub.register(client("alice")).drain().unwrap();

    hub.shutdown().await;

    assert!(timeout(TIMEOUT, drain.next()).await.unwrap().is_none());
    assert_eq!(hub.bridge_state(), BridgeState::Disconnected);
    assert!(hub.publish(Target::Broadcast, "late").await.is_ok());
}

// ── HTTP / SSE ──

async fn boot_server(backplane: &MemoryBackplane) -> (String, PushServer, tokio::task::JoinHandle<()>) {
    let hub = start_hub(Arc::new(backplane.clone())).await;
    let settings = ServerSettings {
        host: "127.0.0.1".into(),
        port: 0,
        keep_alive_secs: 1,
        ..ServerSettings::default()
    };
    let server = PushServer::new(settings, Arc::new(hub));
    let (addr, handle) = server.listen().await.unwrap();
    (format!("http://{addr}"), server, handle)
}

async fn read_until<S>(stream: &mut S, buf: &mut String, needle: &str)
where
    S: futures::Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    timeout(TIMEOUT, async {
        while !buf.contains(needle) {
            let chunk = stream.next().await.expect("stream ended").unwrap();
            buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never saw {needle:?}, got {buf:?}"));
}

async fn wait_for_connections(server: &PushServer, count: usize) {
    timeout(TIMEOUT, async {
        while server.hub().registry().connection_count() != count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connection count never settled");
}

#[tokio::test]
async fn sse_stream_delivers_frames() {
    let backplane = MemoryBackplane::new();
    let (base, server, handle) = boot_server(&backplane).await;
    let http = reqwest::Client::new();

    let resp = http.get(format!("{base}/sse?id=alice")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-client-id"], "alice");
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    let mut stream = Box::pin(resp.bytes_stream());
    let mut buf = String::new();
    read_until(&mut stream, &mut buf, "event: connected").await;
    assert!(buf.contains(r#""clientId":"alice""#));

    let ping = http.post(format!("{base}/ping/alice")).send().await.unwrap();
    assert_eq!(ping.status(), 200);
    read_until(&mut stream, &mut buf, "data: Hello alice\n\n").await;

    let publish = http
        .post(format!("{base}/publish"))
        .json(&serde_json::json!({ "target": null, "payload": "to all" }))
        .send()
        .await
        .unwrap();
    assert_eq!(publish.status(), 202);
    read_until(&mut stream, &mut buf, "data: to all\n\n").await;

    drop(stream);
    wait_for_connections(&server, 0).await;

    server.shutdown().shutdown();
    server.hub().shutdown().await;
    timeout(TIMEOUT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn sse_generates_client_id_when_absent() {
    let backplane = MemoryBackplane::new();
    let (base, server, handle) = boot_server(&backplane).await;

    let resp = reqwest::get(format!("{base}/sse")).await.unwrap();
    let client_id = resp.headers()["x-client-id"].to_str().unwrap().to_owned();
    assert!(!client_id.is_empty());
    wait_for_connections(&server, 1).await;
    assert_eq!(
        server.hub().registry().connections_for(&ClientId::from(client_id.as_str())).len(),
        1
    );

    drop(resp);
    server.shutdown().shutdown();
    server.hub().shutdown().await;
    timeout(TIMEOUT, handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn sse_streams_across_servers() {
    let backplane = MemoryBackplane::new();
    let (base_a, server_a, handle_a) = boot_server(&backplane).await;
    let (base_b, server_b, handle_b) = boot_server(&backplane).await;
    let http = reqwest::Client::new();

    let resp = http.get(format!("{base_b}/sse?id=bob")).send().await.unwrap();
    let mut stream = Box::pin(resp.bytes_stream());
    let mut buf = String::new();
    read_until(&mut stream, &mut buf, "event: connected").await;

    let ping = http.post(format!("{base_a}/ping/bob")).send().await.unwrap();
    assert_eq!(ping.status(), 200);
    read_until(&mut stream, &mut buf, "data: Hello bob\n\n").await;

    let health: serde_json::Value = http
        .get(format!("{base_a}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);

    // hub shutdown ends the open stream from the server side
    server_b.shutdown().shutdown();
    server_b.hub().shutdown().await;
    let rest = timeout(TIMEOUT, async { while stream.next().await.is_some() {} }).await;
    assert!(rest.is_ok());
    timeout(TIMEOUT, handle_b).await.unwrap().unwrap();

    server_a.shutdown().shutdown();
    server_a.hub().shutdown().await;
    timeout(TIMEOUT, handle_a).await.unwrap().unwrap();
}
