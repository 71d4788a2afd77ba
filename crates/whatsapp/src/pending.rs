//! One-shot reply slot for the caller waiting on a new session's QR code.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Terminal result of an open attempt, as seen by the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// PNG data URL of the QR challenge.
    Qr(String),
    /// Existing credentials authenticated without a challenge.
    Connected,
    Failed(String),
}

/// At most one response is ever written; later ones are dropped.
///
/// Cloning shares the slot so the same waiter survives reconnect attempts.
#[derive(Debug, Clone)]
pub struct QrWaiter {
    slot: Arc<Mutex<Option<oneshot::Sender<OpenOutcome>>>>,
}

impl QrWaiter {
    pub fn new() -> (Self, oneshot::Receiver<OpenOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Whether a response can still be written (the caller may have gone away).
    pub fn is_pending(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|tx| !tx.is_closed()),
            Err(_) => false,
        }
    }

    /// Write the response. Returns `false` if one was already written or the
    /// caller stopped waiting.
    pub fn respond(&self, outcome: OpenOutcome) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        sender.is_some_and(|tx| tx.send(outcome).is_ok())
    }
}
