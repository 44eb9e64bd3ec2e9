//! Process lifecycle coordinator.
//!
//! # Shutdown Sequence
//! ```text
//! termination signal (OS or manual)
//!     → report
//!     → hooks.on_shutdown()
//!     → endpoints stop accepting
//!     → drain outstanding work          (bounded by drain_timeout)
//!     → log publisher shutdown          (bounded by log_shutdown_timeout)
//!     → cancel root token
//!     → grace interval, staged countdown
//!     → return
//! ```
//!
//! Timeouts in the sequence are warnings, never errors: a slow handler or log
//! pipeline delays exit by at most its bound.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::validation::validate_config;
use crate::config::{ConfigError, FrameConfig};
use crate::http::EndpointGuard;
use crate::lifecycle::hooks::LifecycleHooks;
use crate::lifecycle::shutdown::ShutdownTrigger;
use crate::lifecycle::signals::{self, TerminationSignal};
use crate::lifecycle::state::LifecycleState;
use crate::net::WorkTracker;
use crate::observability::{LogEntry, LogPublisher, LogSink, PublisherShutdown, TracingSink};

/// Error type for coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("initialization hook reported failure")]
    InitializationFailure,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to subscribe to OS signals: {0}")]
    Signal(#[source] std::io::Error),

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

/// What happened during [`LifecycleCoordinator::wait_for_shutdown`].
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub signal: TerminationSignal,
    /// Whether outstanding work reached zero within the drain bound.
    pub drained: bool,
    /// Work still outstanding when draining ended.
    pub outstanding: usize,
    pub log_shutdown: PublisherShutdown,
}

/// Owns the signal subscription, the root cancellation token, the shared
/// outstanding-work counter and the log publisher, and runs the shutdown
/// sequence exactly once.
pub struct LifecycleCoordinator {
    config: FrameConfig,
    state: LifecycleState,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    trigger: ShutdownTrigger,
    inbox: Option<mpsc::Receiver<TerminationSignal>>,
    root: CancellationToken,
    accepting: CancellationToken,
    work: WorkTracker,
    signal_tasks: TaskTracker,
    sink: Option<Box<dyn LogSink>>,
    publisher: Option<LogPublisher>,
}

impl std::fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("state", &self.state)
            .field("outstanding", &self.work.outstanding())
            .field("cancelled", &self.root.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl LifecycleCoordinator {
    pub fn new(config: FrameConfig) -> Self {
        let (trigger, inbox) = ShutdownTrigger::channel();
        Self {
            config,
            state: LifecycleState::Created,
            hooks: None,
            trigger,
            inbox: Some(inbox),
            root: CancellationToken::new(),
            accepting: CancellationToken::new(),
            work: WorkTracker::new(),
            signal_tasks: TaskTracker::new(),
            sink: None,
            publisher: None,
        }
    }

    /// Replace the default [`TracingSink`] of the log publisher built by
    /// `init`. Has no effect after `init`.
    pub fn with_log_sink(mut self, sink: impl LogSink) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    /// Token cancelled at the end of the shutdown sequence.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// The process-wide outstanding-work counter.
    pub fn work_tracker(&self) -> &WorkTracker {
        &self.work
    }

    /// The log publisher; available after `init`.
    pub fn publisher(&self) -> Option<&LogPublisher> {
        self.publisher.as_ref()
    }

    /// A handle for requesting shutdown without borrowing the coordinator.
    pub fn trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    /// Validate the configuration, subscribe to OS signals, start the log
    /// publisher, and run `on_init`.
    ///
    /// A failed init is terminal: the coordinator moves to `Terminated` and
    /// refuses `run`.
    pub fn init(&mut self, hooks: Option<Arc<dyn LifecycleHooks>>) -> Result<(), LifecycleError> {
        self.require("init", &[LifecycleState::Created])?;

        if let Err(errors) = validate_config(&self.config) {
            tracing::error!(count = errors.len(), "Configuration rejected");
            self.abandon();
            return Err(ConfigError::Validation(errors).into());
        }

        let subscribed = signals::subscribe(&self.trigger, &self.signal_tasks, &self.root);
        self.signal_tasks.close();
        if let Err(e) = subscribed {
            tracing::error!(error = %e, "Signal subscription failed");
            self.abandon();
            return Err(LifecycleError::Signal(e));
        }

        let sink = self.sink.take().unwrap_or_else(|| Box::new(TracingSink));
        let capacity = self.config.log.queue_capacity.max(1);
        self.publisher = Some(LogPublisher::spawn(&self.root, capacity, sink));
        self.hooks = hooks;

        if let Some(hooks) = &self.hooks {
            if !hooks.on_init() {
                tracing::error!("Initialization hook reported failure");
                self.publish(LogEntry::error("OnInit reported failure"));
                self.abandon();
                return Err(LifecycleError::InitializationFailure);
            }
        }

        self.state = LifecycleState::Initialized;
        tracing::info!("Lifecycle initialized");
        Ok(())
    }

    /// Run `on_run`. Returns the hook's verdict.
    ///
    /// A `false` verdict is reported but does not start a shutdown; the
    /// application decides whether to call [`LifecycleCoordinator::shutdown`].
    pub fn run(&mut self) -> Result<bool, LifecycleError> {
        self.require("run", &[LifecycleState::Initialized])?;
        self.state = LifecycleState::Running;

        let ok = self.hooks.as_ref().map_or(true, |hooks| hooks.on_run());
        if ok {
            tracing::info!("Lifecycle running");
        } else {
            tracing::warn!("Run hook reported failure; waiting for an explicit shutdown");
            self.publish(LogEntry::warn("OnRun reported failure"));
        }
        Ok(ok)
    }

    /// Run `on_stop`.
    pub fn stop(&self) {
        if let Some(hooks) = &self.hooks {
            hooks.on_stop();
        }
    }

    /// Request a manual shutdown. Never blocks.
    pub fn shutdown(&self) {
        self.trigger.trigger("shutdown");
    }

    /// Build an endpoint attached to this coordinator: its work counts into
    /// the shared counter and it stops accepting when shutdown begins.
    pub fn endpoint(&self, name: impl Into<String>) -> EndpointGuard {
        let host = match self.config.listener.host.parse::<IpAddr>() {
            Ok(host) => host,
            Err(_) => {
                tracing::warn!(
                    host = %self.config.listener.host,
                    "listener.host is not an IP address; binding to loopback"
                );
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        };

        let endpoint = EndpointGuard::new(name, &self.work)
            .with_host(host)
            .with_cors(&self.config.cors)
            .with_accepting(self.accepting.clone());

        match &self.publisher {
            Some(publisher) => endpoint.with_publisher(publisher.clone()),
            None => endpoint,
        }
    }

    /// Wait for a termination signal, then run the shutdown sequence.
    pub async fn wait_for_shutdown(&mut self) -> Result<ShutdownReport, LifecycleError> {
        self.require(
            "wait for shutdown",
            &[LifecycleState::Initialized, LifecycleState::Running],
        )?;
        let mut inbox = self.inbox.take().ok_or(LifecycleError::InvalidState {
            operation: "wait for shutdown",
            state: self.state,
        })?;

        let signal = inbox
            .recv()
            .await
            .unwrap_or_else(|| TerminationSignal::Manual("inbox closed".to_string()));
        drop(inbox);
        self.state = LifecycleState::ShuttingDown;

        tracing::info!(%signal, "Termination signal received");
        self.publish(LogEntry::info(format!("get exit signal: {signal}")));

        if let Some(hooks) = &self.hooks {
            hooks.on_shutdown();
        }

        self.accepting.cancel();
        let (drained, outstanding) = self.drain().await;

        let log_timeout = self.config.shutdown.log_shutdown_timeout();
        let log_shutdown = match &self.publisher {
            Some(publisher) => publisher.shutdown(log_timeout).await,
            None => PublisherShutdown {
                elapsed: Duration::ZERO,
                timed_out: false,
            },
        };
        if log_shutdown.timed_out {
            tracing::warn!(
                timeout_ms = self.config.shutdown.log_shutdown_timeout_ms,
                "Log publisher shutdown timed out"
            );
        }

        self.root.cancel();
        self.signal_tasks.wait().await;

        self.hold_grace().await;
        self.state = LifecycleState::Terminated;
        tracing::info!("Shutdown sequence complete");

        Ok(ShutdownReport {
            signal,
            drained,
            outstanding,
            log_shutdown,
        })
    }

    async fn drain(&self) -> (bool, usize) {
        let timeout = self.config.shutdown.drain_timeout();
        let drained = tokio::time::timeout(timeout, self.work.wait_idle())
            .await
            .is_ok();
        let outstanding = self.work.outstanding();

        if drained {
            tracing::info!("Outstanding work drained");
        } else {
            tracing::warn!(
                outstanding,
                timeout_ms = self.config.shutdown.drain_timeout_ms,
                "Drain timed out; continuing shutdown"
            );
            self.publish(LogEntry::warn(format!(
                "Drain timed out with {outstanding} units of work outstanding"
            )));
        }
        (drained, outstanding)
    }

    async fn hold_grace(&self) {
        let grace = self.config.shutdown.grace_period();
        if grace.is_zero() {
            return;
        }

        let stages = self.config.shutdown.grace_stages.max(1);
        let step = grace / stages;
        for remaining in (1..=stages).rev() {
            tracing::info!(
                remaining_ms = (step * remaining).as_millis() as u64,
                "Returning after grace period"
            );
            tokio::time::sleep(step).await;
        }
    }

    fn abandon(&mut self) {
        self.state = LifecycleState::Terminated;
        self.accepting.cancel();
        self.root.cancel();
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[LifecycleState],
    ) -> Result<(), LifecycleError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn publish(&self, entry: LogEntry) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(entry);
        }
    }
}
