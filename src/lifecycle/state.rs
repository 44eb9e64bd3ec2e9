//! Coordinator state machine.
//!
//! ```text
//! Created → Initialized → Running → ShuttingDown → Terminated
//!     └──── init failed ─────────────────────────────┘
//! ```
//!
//! Transitions only move forward.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Created,
    Initialized,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_are_ordered_forward() {
        assert!(LifecycleState::Created < LifecycleState::Initialized);
        assert!(LifecycleState::Running < LifecycleState::ShuttingDown);
        assert!(LifecycleState::ShuttingDown < LifecycleState::Terminated);
        assert_eq!(LifecycleState::ShuttingDown.to_string(), "shutting down");
    }
}
