//! Programmatic shutdown requests.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::lifecycle::signals::TerminationSignal;

/// Capacity of the termination inbox. One pending signal is enough: any
/// further trigger before it is consumed would start the same sequence.
pub(crate) const INBOX_CAPACITY: usize = 1;

/// Cloneable handle that asks the coordinator to shut down.
///
/// Sending never blocks, so it is safe from any task, including request
/// handlers. Requests made while one is already pending, or after the
/// coordinator stopped listening, are absorbed.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: mpsc::Sender<TerminationSignal>,
}

impl ShutdownTrigger {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<TerminationSignal>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        (Self { tx }, rx)
    }

    /// Request a manual shutdown.
    pub fn trigger(&self, message: impl Into<String>) {
        self.send(TerminationSignal::Manual(message.into()));
    }

    pub(crate) fn send(&self, signal: TerminationSignal) {
        match self.tx.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                tracing::debug!(%signal, "Shutdown already pending");
            }
            Err(TrySendError::Closed(signal)) => {
                tracing::debug!(%signal, "Shutdown already in progress");
            }
        }
    }
}
