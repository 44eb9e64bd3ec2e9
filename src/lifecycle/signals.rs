//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for interrupt, terminate, hang-up and quit
//! - Forward each delivery into the coordinator's termination inbox
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Subscriptions belong to one coordinator and end with its root token
//! - SIGKILL cannot be intercepted, so it is never subscribed
//! - Hang-up terminates like the others; there is no reload

use std::fmt;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::lifecycle::shutdown::ShutdownTrigger;

/// OS signals that start a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Hangup,
    Quit,
}

impl SignalKind {
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Interrupt,
        SignalKind::Terminate,
        SignalKind::Hangup,
        SignalKind::Quit,
    ];
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Hangup => "SIGHUP",
            SignalKind::Quit => "SIGQUIT",
        };
        f.write_str(name)
    }
}

/// Anything that starts the shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationSignal {
    Os(SignalKind),
    Manual(String),
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Os(kind) => write!(f, "{kind}"),
            TerminationSignal::Manual(message) => write!(f, "manual ({message})"),
        }
    }
}

/// Spawn one forwarding task per signal kind on `tasks`.
///
/// The tasks exit when `stop` is cancelled.
#[cfg(unix)]
pub(crate) fn subscribe(
    trigger: &ShutdownTrigger,
    tasks: &TaskTracker,
    stop: &CancellationToken,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind as UnixSignal};

    for kind in SignalKind::ALL {
        let unix_signal = match kind {
            SignalKind::Interrupt => UnixSignal::interrupt(),
            SignalKind::Terminate => UnixSignal::terminate(),
            SignalKind::Hangup => UnixSignal::hangup(),
            SignalKind::Quit => UnixSignal::quit(),
        };
        let mut stream = signal(unix_signal)?;
        let trigger = trigger.clone();
        let stop = stop.clone();

        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    received = stream.recv() => match received {
                        Some(()) => trigger.send(TerminationSignal::Os(kind)),
                        None => break,
                    },
                }
            }
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn subscribe(
    trigger: &ShutdownTrigger,
    tasks: &TaskTracker,
    stop: &CancellationToken,
) -> std::io::Result<()> {
    let trigger = trigger.clone();
    let stop = stop.clone();
    tasks.spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = tokio::signal::ctrl_c() => match received {
                    Ok(()) => trigger.send(TerminationSignal::Os(SignalKind::Interrupt)),
                    Err(err) => {
                        tracing::error!(error = %err, "Ctrl-C handler failed");
                        break;
                    }
                },
            }
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_display() {
        assert_eq!(TerminationSignal::Os(SignalKind::Terminate).to_string(), "SIGTERM");
        assert_eq!(
            TerminationSignal::Manual("shutdown".into()).to_string(),
            "manual (shutdown)"
        );
    }

    #[tokio::test]
    async fn forwarders_exit_on_cancel() {
        let (trigger, _rx) = ShutdownTrigger::channel();
        let tasks = TaskTracker::new();
        let stop = CancellationToken::new();

        subscribe(&trigger, &tasks, &stop).unwrap();
        tasks.close();
        stop.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(1), tasks.wait())
            .await
            .expect("forwarders should exit");
    }
}
