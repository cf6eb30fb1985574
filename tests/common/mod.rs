// Mock Shui firmware listening on a local port, shared by the integration tests
#![allow(dead_code)]

use shui_rs::{Endpoint, ExchangeTimings};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub const BANNER: &str = "Shui 3D Printer\r\nWiFi module ready\r\nok\r\nok\r\n";

/// Timings short enough for tests but with room for loopback scheduling.
pub fn fast_timings() -> ExchangeTimings {
    ExchangeTimings {
        connect_timeout: Duration::from_millis(500),
        read_timeout: Duration::from_millis(300),
        settle_delay: Duration::from_millis(100),
        banner_lines: 4,
        drain_chunk_size: 10_000,
    }
}

pub struct MockFirmware {
    pub endpoint: Endpoint,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockFirmware {
    /// Greets with `banner`, reads one command per connection and answers
    /// with `reply(command)`.
    pub async fn spawn(banner: &'static str, reply: fn(&str) -> String) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let accepted = connections.clone();
        let log = received.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let (socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let log = log.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = socket.into_split();
                    let mut reader = BufReader::new(read_half);
                    write_half.write_all(banner.as_bytes()).await.unwrap();

                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        return;
                    }
                    let command = line.trim().to_string();
                    log.lock().unwrap().push(line.clone());
                    write_half.write_all(reply(&command).as_bytes()).await.unwrap();

                    // hold the socket until the client hangs up
                    let mut rest = Vec::new();
                    let _ = reader.read_to_end(&mut rest).await;
                });
            }
        });

        Self {
            endpoint: Endpoint::new("127.0.0.1", port),
            connections,
            received,
            accept_task,
        }
    }

    /// Stop listening; later dials are refused.
    pub async fn stop(&mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Raw command lines as read off the socket, up to and including `\n`.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

/// Answers like the Bluer does: temperatures for everything, SD status for M27.
pub fn printing_reply(command: &str) -> String {
    match command {
        "M27" => "ok\r\nT0:205.0 /210.0 B:60.2 /60.0\r\nSD printing byte 1200/4000\r\n".to_string(),
        cmd if cmd.starts_with("M140") => {
            let target = cmd.trim_start_matches("M140 S");
            format!("ok\r\nT0:205.0 /210.0 B:60.4 /{}.0\r\n", target)
        }
        _ => "ok\r\nT0:205.0 /210.0 B:60.2 /60.0\r\n".to_string(),
    }
}

/// An endpoint nothing listens on.
pub async fn closed_endpoint() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Endpoint::new("127.0.0.1", port)
}
