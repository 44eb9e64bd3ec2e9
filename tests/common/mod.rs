//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use server_frame::config::FrameConfig;
use server_frame::observability::{LogEntry, LogSink};

/// Loopback listener, short bounds, no grace period.
pub fn fast_config() -> FrameConfig {
    let mut config = FrameConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.shutdown.drain_timeout_ms = 10_000;
    config.shutdown.log_shutdown_timeout_ms = 1_000;
    config.shutdown.grace_period_ms = 0;
    config
}

/// Client that never keeps idle connections, so a stopped endpoint drains fast.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

/// Sink that keeps every entry for inspection.
#[derive(Clone, Default)]
pub struct CollectSink(pub Arc<Mutex<Vec<LogEntry>>>);

impl CollectSink {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.0.lock().unwrap().clone()
    }
}

impl LogSink for CollectSink {
    fn write(&mut self, entry: &LogEntry) {
        self.0.lock().unwrap().push(entry.clone());
    }
}

/// Sink that blocks its worker for a fixed time per entry.
pub struct SlowSink(pub Duration);

impl LogSink for SlowSink {
    fn write(&mut self, _entry: &LogEntry) {
        std::thread::sleep(self.0);
    }
}

/// Counts drops; a handler holding one records its exit however it ends.
pub struct ExitRecorder(pub Arc<AtomicUsize>);

impl Drop for ExitRecorder {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
