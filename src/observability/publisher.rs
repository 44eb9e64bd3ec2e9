//! Asynchronous log publisher.
//!
//! # Responsibilities
//! - Accept severity-leveled entries from any task without blocking
//! - Hand entries to a [`LogSink`] on a background worker
//! - Drain the queue on shutdown within a caller-supplied bound
//!
//! # Design Decisions
//! - Entries that cannot be queued (full queue, publisher closed) are written
//!   straight to `tracing` instead of being dropped
//! - The sink is synchronous and runs on a blocking thread, never on a runtime
//!   worker
//! - A shutdown that exceeds its bound detaches the worker; it keeps draining
//!   in the background until the root token fires, after which leftovers go
//!   straight to `tracing`

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Severity of a published entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// One structured log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub caption: String,
    /// Identity of the function the entry is about, if any.
    pub function: Option<String>,
    /// Call-stack snapshot, if any.
    pub callstack: Option<String>,
    pub at: SystemTime,
}

impl LogEntry {
    pub fn new(level: LogLevel, caption: impl Into<String>) -> Self {
        Self {
            level,
            caption: caption.into(),
            function: None,
            callstack: None,
            at: SystemTime::now(),
        }
    }

    pub fn info(caption: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, caption)
    }

    pub fn warn(caption: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, caption)
    }

    pub fn error(caption: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, caption)
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_callstack(mut self, callstack: impl Into<String>) -> Self {
        self.callstack = Some(callstack.into());
        self
    }
}

/// Destination for published entries. Runs on the publisher's worker task.
pub trait LogSink: Send + 'static {
    fn write(&mut self, entry: &LogEntry);

    fn flush(&mut self) {}
}

/// Default sink: re-emits entries as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&mut self, entry: &LogEntry) {
        emit(entry);
    }
}

fn emit(entry: &LogEntry) {
    let function = entry.function.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Debug => tracing::debug!(target: "server_frame::published", function, "{}", entry.caption),
        LogLevel::Info => tracing::info!(target: "server_frame::published", function, "{}", entry.caption),
        LogLevel::Warn => tracing::warn!(target: "server_frame::published", function, "{}", entry.caption),
        LogLevel::Error => match &entry.callstack {
            Some(callstack) => tracing::error!(
                target: "server_frame::published",
                function,
                callstack = %callstack,
                "{}",
                entry.caption
            ),
            None => tracing::error!(target: "server_frame::published", function, "{}", entry.caption),
        },
    }
}

/// Outcome of [`LogPublisher::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherShutdown {
    pub elapsed: Duration,
    pub timed_out: bool,
}

/// Handle to the log pipeline. Cheap to clone.
#[derive(Clone)]
pub struct LogPublisher {
    tx: mpsc::Sender<LogEntry>,
    closing: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for LogPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogPublisher")
            .field("closing", &self.closing.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl LogPublisher {
    /// Spawn the worker. `capacity` must be greater than zero.
    ///
    /// The sink runs on the blocking pool, so a slow sink never stalls the
    /// runtime that is waiting on [`LogPublisher::shutdown`].
    pub fn spawn(root: &CancellationToken, capacity: usize, mut sink: Box<dyn LogSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<LogEntry>(capacity);
        let closing = CancellationToken::new();

        let worker = {
            let closing = closing.clone();
            let root = root.clone();
            let runtime = Handle::current();
            tokio::task::spawn_blocking(move || {
                loop {
                    let next = runtime.block_on(async {
                        tokio::select! {
                            biased;
                            _ = root.cancelled() => None,
                            entry = rx.recv() => entry,
                            _ = closing.cancelled() => None,
                        }
                    });
                    match next {
                        Some(entry) => sink.write(&entry),
                        None => break,
                    }
                }

                // Once the root token fires nobody waits for the sink anymore.
                rx.close();
                while let Ok(entry) = rx.try_recv() {
                    if root.is_cancelled() {
                        emit(&entry);
                    } else {
                        sink.write(&entry);
                    }
                }
                sink.flush();
                tracing::debug!("Log publisher drained");
            })
        };

        Self {
            tx,
            closing,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Queue an entry without waiting.
    pub fn publish(&self, entry: LogEntry) {
        if self.closing.is_cancelled() {
            emit(&entry);
            return;
        }
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) | Err(TrySendError::Closed(entry)) => emit(&entry),
        }
    }

    /// Whether [`LogPublisher::shutdown`] has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Stop accepting entries and wait up to `timeout` for the queue to drain.
    ///
    /// Only the first call waits; later calls report immediate completion.
    pub async fn shutdown(&self, timeout: Duration) -> PublisherShutdown {
        let started = Instant::now();
        self.closing.cancel();

        let worker = self.worker.lock().ok().and_then(|mut slot| slot.take());
        let Some(worker) = worker else {
            return PublisherShutdown {
                elapsed: started.elapsed(),
                timed_out: false,
            };
        };

        let timed_out = tokio::time::timeout(timeout, worker).await.is_err();
        PublisherShutdown {
            elapsed: started.elapsed(),
            timed_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<String>>>);

    impl LogSink for Collect {
        fn write(&mut self, entry: &LogEntry) {
            self.0.lock().unwrap().push(entry.caption.clone());
        }
    }

    struct Slow(Duration);

    impl LogSink for Slow {
        fn write(&mut self, _entry: &LogEntry) {
            std::thread::sleep(self.0);
        }
    }

    #[tokio::test]
    async fn shutdown_drains_queued_entries() {
        let root = CancellationToken::new();
        let sink = Collect::default();
        let publisher = LogPublisher::spawn(&root, 16, Box::new(sink.clone()));

        for i in 0..5 {
            publisher.publish(LogEntry::info(format!("entry {i}")));
        }

        let outcome = publisher.shutdown(Duration::from_secs(1)).await;
        assert!(!outcome.timed_out);
        assert_eq!(sink.0.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn second_shutdown_returns_immediately() {
        let root = CancellationToken::new();
        let publisher = LogPublisher::spawn(&root, 4, Box::new(TracingSink));

        assert!(!publisher.shutdown(Duration::from_secs(1)).await.timed_out);
        let again = publisher.clone().shutdown(Duration::from_secs(1)).await;
        assert!(!again.timed_out);
        assert!(again.elapsed < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn slow_sink_times_out_on_current_thread_runtime() {
        let root = CancellationToken::new();
        let publisher = LogPublisher::spawn(&root, 16, Box::new(Slow(Duration::from_millis(200))));

        for i in 0..8 {
            publisher.publish(LogEntry::warn(format!("slow {i}")));
        }

        let outcome = publisher.shutdown(Duration::from_millis(100)).await;
        assert!(outcome.timed_out);
        assert!(outcome.elapsed < Duration::from_millis(500));

        // Leftovers bypass the sink once the root token fires.
        root.cancel();
    }

    #[tokio::test]
    async fn root_cancel_skips_sink_for_backlog() {
        let root = CancellationToken::new();
        let sink = Collect::default();
        let publisher = LogPublisher::spawn(&root, 16, Box::new(sink.clone()));

        root.cancel();
        publisher.publish(LogEntry::info("after root"));

        let outcome = publisher.shutdown(Duration::from_secs(1)).await;
        assert!(!outcome.timed_out);
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn publish_after_close_does_not_queue() {
        let root = CancellationToken::new();
        let sink = Collect::default();
        let publisher = LogPublisher::spawn(&root, 4, Box::new(sink.clone()));

        publisher.shutdown(Duration::from_secs(1)).await;
        assert!(publisher.is_closing());
        publisher.publish(LogEntry::error("late"));

        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn entry_builders() {
        let entry = LogEntry::error("boom")
            .with_function("handler")
            .with_callstack("frame 0");
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.function.as_deref(), Some("handler"));
        assert_eq!(entry.callstack.as_deref(), Some("frame 0"));
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
