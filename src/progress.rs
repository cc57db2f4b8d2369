//! Transfer progress reporting
//!
//! Observers are called synchronously on the uploading task. They exist for
//! observability only and can't influence the transfer.

use tracing::{info, warn};

/// Bytes between two "transferred" notices of the logging observer (100 MiB)
pub const TRANSFER_NOTICE_BYTES: u64 = 100 * 1024 * 1024;

/// Callbacks around a single file transfer
pub trait TransferObserver: Send {
    /// The data connection is open and bytes are about to flow
    fn on_start(&mut self) {}

    /// `delta` more bytes were sent
    fn on_progress(&mut self, delta: u64) {
        let _ = delta;
    }

    /// The server confirmed the transfer of `total` bytes
    fn on_complete(&mut self, total: u64) {
        let _ = total;
    }

    /// The transfer was abandoned before completion (dropped or cancelled)
    fn on_abort(&mut self) {}

    /// The transfer failed
    fn on_fail(&mut self) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TransferObserver for NoopObserver {}

/// Byte counter with a "next notice" threshold, reset per transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes sent so far
    pub bytes_transferred: u64,
    /// Byte count at which the next notice is due
    pub next_notice_threshold: u64,
    interval: u64,
}

impl TransferProgress {
    /// Start counting with notices every `interval` bytes
    pub fn new(interval: u64) -> Self {
        let interval = interval.max(1);
        Self {
            bytes_transferred: 0,
            next_notice_threshold: interval,
            interval,
        }
    }

    /// Add `delta` bytes; returns true when a notice threshold was crossed
    pub fn advance(&mut self, delta: u64) -> bool {
        self.bytes_transferred = self.bytes_transferred.saturating_add(delta);
        if self.bytes_transferred < self.next_notice_threshold {
            return false;
        }
        self.next_notice_threshold = (self.bytes_transferred / self.interval + 1) * self.interval;
        true
    }
}

/// Observer that logs transfer events for one remote file
#[derive(Debug)]
pub struct LoggingTransferObserver {
    remote_path: String,
    progress: TransferProgress,
}

impl LoggingTransferObserver {
    /// Log events for `remote_path`
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            progress: TransferProgress::new(TRANSFER_NOTICE_BYTES),
        }
    }

    /// Current byte counter
    pub fn progress(&self) -> &TransferProgress {
        &self.progress
    }
}

impl TransferObserver for LoggingTransferObserver {
    fn on_start(&mut self) {
        self.progress = TransferProgress::new(TRANSFER_NOTICE_BYTES);
        info!(remote_path = %self.remote_path, "Upload started");
    }

    fn on_progress(&mut self, delta: u64) {
        if self.progress.advance(delta) {
            info!(
                remote_path = %self.remote_path,
                bytes = self.progress.bytes_transferred,
                "Upload transferred {} MiB",
                self.progress.bytes_transferred / (1024 * 1024)
            );
        }
    }

    fn on_complete(&mut self, total: u64) {
        info!(remote_path = %self.remote_path, bytes = total, "Upload completed");
    }

    fn on_abort(&mut self) {
        warn!(
            remote_path = %self.remote_path,
            bytes = self.progress.bytes_transferred,
            "Upload aborted"
        );
    }

    fn on_fail(&mut self) {
        warn!(
            remote_path = %self.remote_path,
            bytes = self.progress.bytes_transferred,
            "Upload failed"
        );
    }
}
