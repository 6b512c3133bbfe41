//! Politeness pacing and cancellation.
//!
//! Target sites run bot-detection heuristics keyed on inhumanly regular
//! action timing, so the pipeline sleeps a randomized bounded interval
//! between UI actions. The delay is policy, not correctness — it must be
//! cancellable at any moment, and cancellation must also be observable
//! between stages so a torn-down run never leaks its browser session.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

/// Caller-held side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal every [`CancelToken`] cloned from this pair.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Pipeline-held side of a cancellation pair. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for tokens created without a handle.
    keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is signalled. Returns immediately if the
    /// handle was dropped or already fired.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        // An Err from changed() means the handle is gone; treat as cancelled
        // so waits never become unbounded.
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// A token that never fires, for callers without a cancellation source.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            keepalive: Some(std::sync::Arc::new(tx)),
        }
    }
}

/// Create a linked cancel handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelToken {
            rx,
            keepalive: None,
        },
    )
}

/// Randomized bounded delay between UI actions.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    min_ms: u64,
    max_ms: u64,
}

impl Pacing {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Zero-length pacing, used by fixture tests.
    pub fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    /// Sleep a jittered interval. Returns `false` if cancelled before the
    /// interval elapsed.
    pub async fn pause(&self, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let ms = if self.max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(self.min_ms..=self.max_ms)
        };
        if ms == 0 {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
