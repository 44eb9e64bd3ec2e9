//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (coordinator.rs):
//!     new(config) → init(hooks): subscribe signals, start publisher, on_init
//!                 → run(): on_run
//!
//! Shutdown (coordinator.rs):
//!     Signal received → on_shutdown → Stop accepting → Drain work
//!         → Flush logs → Cancel → Grace → Return
//!
//! Signals (signals.rs, shutdown.rs):
//!     SIGINT/SIGTERM/SIGHUP/SIGQUIT → termination inbox
//!     ShutdownTrigger::trigger      → termination inbox
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, flush, cancel
//! - Every wait in the sequence has a bound; exit is never blocked forever
//! - One inbox, one reader: the sequence runs at most once

pub mod coordinator;
pub mod hooks;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use coordinator::{LifecycleCoordinator, LifecycleError, ShutdownReport};
pub use hooks::LifecycleHooks;
pub use shutdown::ShutdownTrigger;
pub use signals::{SignalKind, TerminationSignal};
pub use state::LifecycleState;
