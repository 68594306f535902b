/// End-to-end tests: fake broker + relay pool + local service
mod common;

use common::{
    accept_relay, assignment_json, eventually, round_trip, start_fake_broker, start_ping_server,
    CannedResponse, RecordingObserver,
};
use local_tunnel::{ConnectionPool, PoolState, ReconnectPolicy, Side, TunnelConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

struct Broker {
    http_port: u16,
    relay: TcpListener,
    requests: tokio::sync::mpsc::UnboundedReceiver<String>,
    server: tokio::task::JoinHandle<()>,
}

async fn start_broker(max_conn_count: usize) -> Broker {
    let relay = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay listener");
    let relay_port = relay.local_addr().unwrap().port();
    let (http_port, requests, server) = start_fake_broker(CannedResponse::json(assignment_json(
        "abc123",
        relay_port,
        max_conn_count,
    )))
    .await;

    Broker {
        http_port,
        relay,
        requests,
        server,
    }
}

fn config_for(broker: &Broker) -> TunnelConfig {
    TunnelConfig::builder()
        .broker_url(format!("http://127.0.0.1:{}/", broker.http_port))
        .local_host("127.0.0.1")
        .keepalive_secs(None)
        .reconnect(ReconnectPolicy {
            initial_delay_ms: 10,
            max_delay_ms: 100,
            ..Default::default()
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_end_to_end_ping() {
    let (local_port, _service) = start_ping_server().await;
    let mut broker = start_broker(2).await;
    let observer = RecordingObserver::shared();

    let mut pool = ConnectionPool::with_observer(config_for(&broker), observer.clone()).unwrap();
    pool.start(local_port).await.unwrap();
    assert_eq!(pool.state(), PoolState::Running);
    assert_eq!(pool.url().await.unwrap(), "http://abc123.example-broker.com");
    assert_eq!(broker.requests.recv().await.unwrap(), "/?new");

    // 每条中继都能把公网流量转发到本地服务
    let mut first = accept_relay(&broker.relay).await;
    let mut second = accept_relay(&broker.relay).await;
    assert_eq!(round_trip(&mut first, b"PING").await, b"PONG");
    assert_eq!(round_trip(&mut second, b"PING").await, b"PONG");
    assert_eq!(round_trip(&mut first, b"PING").await, b"PONG");

    eventually(
        || {
            let total_in: u64 = pool.stats().iter().map(|s| s.broker_to_local).sum();
            let total_out: u64 = pool.stats().iter().map(|s| s.local_to_broker).sum();
            total_in == 12 && total_out == 12
        },
        "byte counters",
    )
    .await;

    assert_eq!(observer.assigned.lock().unwrap().len(), 1);
    assert_eq!(*observer.started.lock().unwrap(), vec![0, 1]);

    pool.stop();
    timeout(Duration::from_secs(2), pool.wait())
        .await
        .expect("pool should stop promptly")
        .unwrap();
    assert_eq!(observer.stopped.lock().unwrap().len(), 2);

    broker.server.abort();
}

#[tokio::test]
async fn test_named_domain_pool() {
    let (local_port, _service) = start_ping_server().await;
    let mut broker = start_broker(1).await;
    let mut config = config_for(&broker);
    config.domain = Some("alice".to_string());

    let mut pool = ConnectionPool::new(config).unwrap();
    pool.start(local_port).await.unwrap();
    assert_eq!(broker.requests.recv().await.unwrap(), "/alice");
    assert_eq!(pool.relays().len(), 1);

    pool.stop();
    pool.wait().await.unwrap();
    broker.server.abort();
}

#[tokio::test]
async fn test_broker_error_starts_no_relays() {
    let (local_port, _service) = start_ping_server().await;
    let (http_port, _requests, server) = start_fake_broker(CannedResponse::status(500)).await;
    let config = TunnelConfig::builder()
        .broker_url(format!("http://127.0.0.1:{}/", http_port))
        .local_host("127.0.0.1")
        .build()
        .unwrap();

    let mut pool = ConnectionPool::new(config).unwrap();
    let err = pool.start(local_port).await.err().unwrap();
    assert!(err.is_broker_error());
    assert!(pool.relays().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_relay_survives_broker_reconnect() {
    let (local_port, _service) = start_ping_server().await;
    let broker = start_broker(1).await;
    let observer = RecordingObserver::shared();

    let mut pool = ConnectionPool::with_observer(config_for(&broker), observer.clone()).unwrap();
    pool.start(local_port).await.unwrap();

    let mut relay = accept_relay(&broker.relay).await;
    assert_eq!(round_trip(&mut relay, b"PING").await, b"PONG");

    // broker 端关闭连接后中继应重新拨号并继续转发
    drop(relay);
    let mut relay = accept_relay(&broker.relay).await;
    assert_eq!(round_trip(&mut relay, b"PING").await, b"PONG");

    eventually(
        || {
            observer
                .reconnected
                .lock()
                .unwrap()
                .contains(&(0, Side::Broker))
        },
        "broker reconnect event",
    )
    .await;

    pool.stop();
    pool.wait().await.unwrap();
    broker.server.abort();
}

#[tokio::test]
async fn test_large_transfer_is_byte_exact() {
    let broker = start_broker(1).await;
    let local = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let local_port = local.local_addr().unwrap().port();

    let mut pool = ConnectionPool::new(config_for(&broker)).unwrap();
    pool.start(local_port).await.unwrap();

    let mut relay = accept_relay(&broker.relay).await;
    let (mut service, _) = local.accept().await.unwrap();

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let writer = tokio::spawn(async move {
        use tokio::io::AsyncWriteExt;
        for chunk in payload.chunks(4093) {
            relay.write_all(chunk).await.unwrap();
        }
        relay
    });

    let mut received = vec![0u8; expected.len()];
    {
        use tokio::io::AsyncReadExt;
        timeout(Duration::from_secs(10), service.read_exact(&mut received))
            .await
            .expect("timed out receiving payload")
            .unwrap();
    }
    assert_eq!(received, expected);
    let _relay = writer.await.unwrap();

    eventually(
        || pool.stats()[0].broker_to_local == expected.len() as u64,
        "broker_to_local counter",
    )
    .await;

    pool.stop();
    pool.wait().await.unwrap();
    broker.server.abort();
}
