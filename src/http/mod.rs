//! HTTP endpoint subsystem.
//!
//! # Data Flow
//! ```text
//! accepted connection (net::ReleasingListener / rustls)
//!     → TraceLayer
//!     → cors.rs (cross-origin filter)
//!     → axum Router (dispatch table, unmatched → 404)
//!     → guard.rs (work accounting + panic boundary)
//!     → registered handler
//! ```

pub mod cors;
pub mod endpoint;
pub mod guard;

pub use endpoint::{EndpointError, EndpointGuard};
pub use guard::{call_guarded, HandlerFault};
