//! Cooperative Cancellation
//!
//! A watch-channel token pair for the engine's root cancellation scope.
//! `Stop` flips the handle; every suspension point in the loop selects
//! against [`CancelToken::cancelled`]. Dropping the handle also cancels,
//! so an abandoned engine can never leave its loop task running.

use tokio::sync::watch;

/// Create a linked handle/token pair
#[must_use]
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Owning side of the cancellation scope
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every token
    pub fn cancel(&self) {
        // send only fails when all receivers are gone, which is fine
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been signalled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observing side of the cancellation scope; cheap to clone
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Whether cancellation has been signalled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled
    ///
    /// Also resolves when the handle is dropped: an orphaned token treats
    /// the missing handle as a cancelled scope.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// A token that is never cancelled (for standalone component use)
    #[must_use]
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(false);
        // leak the sender so the channel stays open forever
        std::mem::forget(tx);
        Self { rx }
    }
}
