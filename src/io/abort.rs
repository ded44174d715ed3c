//! Cooperative cancellation for fetches, decodes and whole read operations.
//!
//! An [`AbortController`] owns the trigger; every [`AbortSignal`] cloned from
//! it observes the same state. A signal only aborts the operation it was
//! handed to: shared cache work started on behalf of several callers keeps
//! running as long as one of them is still waiting.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of a cancellation token.
#[derive(Debug, Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Get a signal bound to this controller.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Abort every operation holding a signal from this controller.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation token.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires. Never resolves if the controller is
    /// dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Race `fut` against an optional signal.
///
/// Returns `on_abort()` as the error if the signal fires first; the inner
/// future is dropped at that point.
pub async fn with_signal<T, E, F>(
    signal: Option<&AbortSignal>,
    on_abort: impl FnOnce() -> E,
    fut: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match signal {
        None => fut.await,
        Some(signal) => {
            if signal.is_aborted() {
                return Err(on_abort());
            }
            tokio::select! {
                biased;
                _ = signal.aborted() => Err(on_abort()),
                result = fut => result,
            }
        }
    }
}
