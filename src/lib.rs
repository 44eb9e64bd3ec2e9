//! Process-lifecycle coordination for network servers.
//!
//! A [`LifecycleCoordinator`] owns signal handling, the shared
//! outstanding-work counter and the log pipeline; each [`EndpointGuard`] owns
//! one listening socket and wraps every handler with work accounting and a
//! panic boundary.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::FrameConfig;
pub use http::{EndpointError, EndpointGuard, HandlerFault};
pub use lifecycle::{LifecycleCoordinator, LifecycleError, LifecycleHooks, ShutdownTrigger};
pub use net::WorkTracker;
