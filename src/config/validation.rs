//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (queue capacity > 0, grace stages > 0)
//! - Check that addresses, header names and methods parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FrameConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::{IpAddr, SocketAddr};

use axum::http::{HeaderName, HeaderValue, Method};

use crate::config::schema::FrameConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.host `{0}` is not an IP address")]
    InvalidHost(String),

    #[error("listener.tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),

    #[error("shutdown.grace_stages must be at least 1 when a grace period is set")]
    ZeroGraceStages,

    #[error("log.queue_capacity must be greater than 0")]
    ZeroQueueCapacity,

    #[error("cors.allowed_origins entry `{0}` is not a valid origin")]
    InvalidOrigin(String),

    #[error("cors.allowed_headers entry `{0}` is not a valid header name")]
    InvalidHeader(String),

    #[error("cors.allowed_methods entry `{0}` is not a valid method")]
    InvalidMethod(String),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &FrameConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::InvalidHost(config.listener.host.clone()));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    if config.shutdown.grace_period_ms > 0 && config.shutdown.grace_stages == 0 {
        errors.push(ValidationError::ZeroGraceStages);
    }

    if config.log.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }

    for origin in &config.cors.allowed_origins {
        if origin != "*" && HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
    }
    for header in &config.cors.allowed_headers {
        if HeaderName::from_bytes(header.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidHeader(header.clone()));
        }
    }
    for method in &config.cors.allowed_methods {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::InvalidMethod(method.clone()));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
