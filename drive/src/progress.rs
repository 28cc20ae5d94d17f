use std::sync::Arc;
use std::time::Instant;

/// Callback receiving transfer progress snapshots.
pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

/// A transfer progress snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Bytes transferred so far, resumed bytes included.
    pub transferred: u64,
    /// Expected total, `0` when unknown.
    pub total: u64,
    /// Throughput in KiB/s since the transfer (re)started.
    pub speed: f64,
}

impl Progress {
    /// Completion percentage, `0.0` when the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.transferred as f64 / self.total as f64 * 100.0
        }
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.transferred >= self.total
    }
}

/// Progress accounting of a single transfer.
pub(crate) struct Meter {
    start: Instant,
    /// Bytes already there when the meter started, excluded from throughput.
    offset: u64,
    transferred: u64,
    total: u64,
    callback: Option<ProgressFn>,
}

impl Meter {
    pub(crate) fn new(offset: u64, total: u64, callback: Option<ProgressFn>) -> Self {
        Self {
            start: Instant::now(),
            offset,
            transferred: offset,
            total,
            callback,
        }
    }

    pub(crate) fn advance(&mut self, n: u64) -> Progress {
        self.transferred += n;

        let kib = (self.transferred - self.offset) as f64 / 1_024.0;
        let elapsed = self.start.elapsed().as_secs_f64();
        let speed = if elapsed == 0.0 { kib } else { kib / elapsed };

        let progress = Progress {
            transferred: self.transferred,
            total: self.total,
            speed,
        };

        tracing::trace!(
            "{:.2}% ({}/{} bytes, {:.2} KB/s)",
            progress.percent(),
            progress.transferred,
            progress.total,
            progress.speed
        );

        if let Some(ref callback) = self.callback {
            callback(progress);
        }

        progress
    }
}
