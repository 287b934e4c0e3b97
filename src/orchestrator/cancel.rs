//! Run cancellation.
//!
//! A [`CancelSignal`] fires when its [`CancelHandle`] is triggered or when its
//! deadline passes, whichever comes first.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Triggers the paired [`CancelSignal`]s.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Observed by a run to know when to stop.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Creates a linked handle and signal.
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx: Arc::new(tx) },
        CancelSignal { rx, deadline: None },
    )
}

impl CancelHandle {
    /// Cancels every signal linked to this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    /// A signal that only fires on its deadline, if given one.
    #[must_use]
    pub fn never() -> Self {
        let (_, signal) = cancel_pair();
        signal
    }

    /// Adds a deadline, keeping the earlier one if already set.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Adds a deadline `timeout` from now. `None` leaves the signal as is.
    #[must_use]
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => self.with_deadline(Instant::now() + timeout),
            None => self,
        }
    }

    /// Returns true if the signal has already fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let triggered = async move {
            let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
            if closed {
                // Dropped handle: only the deadline can fire now.
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = triggered => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => triggered.await,
        }
    }
}
