#![allow(dead_code)]
/// Common utilities for integration tests

use local_tunnel::{AssignedPool, RelayObserver, RelayStats, Side};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// A canned HTTP response served by the fake broker
#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub body: String,
}

impl CannedResponse {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }
}

/// Fake broker assignment endpoint
///
/// Answers every request with the same canned response and forwards the
/// request target (path + query) to the returned receiver.
pub async fn start_fake_broker(
    response: CannedResponse,
) -> (u16, mpsc::UnboundedReceiver<String>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake broker");
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let request = String::from_utf8_lossy(&request);
                if let Some(target) = request
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                {
                    let _ = tx.send(target.to_string());
                }

                let reply = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    response.status,
                    response.body.len(),
                    response.body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (port, rx, handle)
}

/// Assignment body in the broker's wire format
pub fn assignment_json(id: &str, port: u16, max_conn_count: usize) -> String {
    format!(
        r#"{{"id":"{id}","url":"http://{id}.example-broker.com","port":{port},"max_conn_count":{max_conn_count}}}"#
    )
}

/// Local service that answers every 4-byte "PING" with "PONG"
pub async fn start_ping_server() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind ping server");
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                while socket.read_exact(&mut buf).await.is_ok() {
                    let reply: &[u8] = if &buf == b"PING" { b"PONG" } else { b"????" };
                    if socket.write_all(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    (port, handle)
}

/// Accept a relay connection on the fake broker relay port
pub async fn accept_relay(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("Timeout waiting for relay connection")
        .expect("Failed to accept relay connection");
    stream
}

/// Send data into a relay and read back a reply of the same length
pub async fn round_trip(stream: &mut TcpStream, data: &[u8]) -> Vec<u8> {
    stream.write_all(data).await.expect("Failed to write data");
    let mut reply = vec![0u8; data.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .expect("Timeout waiting for response")
        .expect("Failed to read response");
    reply
}

/// Poll until the condition holds or the timeout expires
pub async fn eventually<F>(mut condition: F, what: &str)
where
    F: FnMut() -> bool,
{
    let result = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "Timed out waiting for {}", what);
}

/// Observer that records the events tests care about
#[derive(Default)]
pub struct RecordingObserver {
    pub assigned: Mutex<Vec<AssignedPool>>,
    pub started: Mutex<Vec<usize>>,
    pub reconnected: Mutex<Vec<(usize, Side)>>,
    pub stopped: Mutex<Vec<RelayStats>>,
}

impl RecordingObserver {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl RelayObserver for RecordingObserver {
    fn assigned(&self, pool: &AssignedPool) {
        self.assigned.lock().unwrap().push(pool.clone());
    }

    fn relay_started(&self, index: usize, _broker_addr: &str, _local_addr: &str) {
        self.started.lock().unwrap().push(index);
    }

    fn reconnected(&self, index: usize, side: Side, _generation: u64) {
        self.reconnected.lock().unwrap().push((index, side));
    }

    fn relay_stopped(&self, stats: &RelayStats) {
        self.stopped.lock().unwrap().push(*stats);
    }
}
