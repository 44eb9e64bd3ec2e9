//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! EndpointGuard::bind
//!     → listener.rs (bind socket, BindError on refusal)
//!     → tls.rs (optional certificate loading for serve_tls)
//!     → ReleasingListener handed to the accept loop
//!
//! Every accept loop and dispatched request
//!     → work.rs (WorkGuard held for its lifetime)
//! ```
//!
//! # Design Decisions
//! - A socket's release is observable, so rebinding the same port never races
//!   the previous accept loop
//! - Work accounting is RAII; no code path decrements by hand

pub mod listener;
pub mod tls;
pub mod work;

pub use listener::{BindError, ReleasingListener, Released};
pub use work::{WorkGuard, WorkTracker};
