//! Progress observation.
//!
//! The composer reports header bytes and block bytes as read from the
//! source, before any transform, so progress ends at the declared total.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Receives the declared total and consumed-byte updates.
pub trait ProgressObserver: Send + Sync {
    /// Called once when reading starts.
    fn start(&self, total: u64);

    /// `n` more bytes have been consumed.
    fn advance(&self, n: u64);

    /// Called once when the session closes.
    fn finish(&self) {}
}

impl<T: ProgressObserver + ?Sized> ProgressObserver for Arc<T> {
    fn start(&self, total: u64) {
        (**self).start(total)
    }

    fn advance(&self, n: u64) {
        (**self).advance(n)
    }

    fn finish(&self) {
        (**self).finish()
    }
}

/// Logs every 10% milestone at info level.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicU64,
    done: AtomicU64,
    /// last milestone logged, in tenths
    reported: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes consumed so far
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl ProgressObserver for LogProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
        self.reported.store(0, Ordering::Relaxed);
        info!(total, "acquisition started");
    }

    fn advance(&self, n: u64) {
        let done = self.done.fetch_add(n, Ordering::Relaxed) + n;
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return;
        }
        let tenths = (done.min(total) as u128 * 10 / total as u128) as u64;
        let prev = self.reported.fetch_max(tenths, Ordering::Relaxed);
        if tenths > prev {
            info!(done, total, percent = tenths * 10, "acquisition progress");
        }
    }

    fn finish(&self) {
        info!(
            done = self.done.load(Ordering::Relaxed),
            total = self.total.load(Ordering::Relaxed),
            "acquisition finished"
        );
    }
}
