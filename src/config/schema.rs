//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the frame.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FrameConfig {
    /// Listener configuration (host, port, TLS).
    pub listener: ListenerConfig,

    /// Shutdown sequence timing.
    pub shutdown: ShutdownConfig,

    /// Cross-origin filtering applied in front of every endpoint.
    pub cors: CorsConfig,

    /// Log pipeline and subscriber settings.
    pub log: LogConfig,

    /// Metrics exporter settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timing of the shutdown sequence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for in-flight work after accept loops stop.
    pub drain_timeout_ms: u64,

    /// Upper bound on waiting for the log pipeline to flush.
    pub log_shutdown_timeout_ms: u64,

    /// Delay held after cancellation before `wait_for_shutdown` returns.
    pub grace_period_ms: u64,

    /// Number of countdown notifications the grace period is split into.
    pub grace_stages: u32,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 30_000,
            log_shutdown_timeout_ms: 4_000,
            grace_period_ms: 3_000,
            grace_stages: 3,
        }
    }
}

impl ShutdownConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn log_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.log_shutdown_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// CORS filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; `"*"` allows any.
    pub allowed_origins: Vec<String>,

    /// Allowed request headers.
    pub allowed_headers: Vec<String>,

    /// Allowed methods.
    pub allowed_methods: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_headers: [
                "X-Requested-With",
                "Accept",
                "Content-Type",
                "Content-Length",
                "Accept-Encoding",
                "X-CSRF-Token",
                "Authorization",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            allowed_methods: ["GET", "HEAD", "POST"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Log pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,

    /// Capacity of the publisher queue.
    pub queue_capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "server_frame=info,tower_http=info".to_string(),
            json: false,
            queue_capacity: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
