//! Cooperative cancellation shared between a session and the outside world.
//!
//! # Design
//! The transport blocks the calling thread for the whole request, so the
//! only way to stop it is for the progress callback to tell it to abort.
//! `TransferState` is the value that callback consults: an interrupt flag
//! plus the latest progress counters. It sits behind an `Arc` so that
//! `InterruptHandle`s held by other threads and the process-wide registry
//! can flip the flag without touching the session itself.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

const NOT_INTERRUPTED: u8 = 0;
const ABORT: u8 = 1;
const DOWNLOAD_OVERFLOW: u8 = 2;

/// Why an in-flight call was told to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// `interrupt()` on the session or a handle, a registry broadcast, or a
    /// cancelled background call.
    Abort,
    /// The response grew past the configured download byte limit.
    DownloadOverflow,
}

/// Transfer counters as last reported by the transport, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub download_total: u64,
    pub download_now: u64,
    pub upload_total: u64,
    pub upload_now: u64,
}

/// Interrupt flag and progress counters of one session.
#[derive(Debug, Default)]
pub struct TransferState {
    interrupt: AtomicU8,
    download_total: AtomicU64,
    download_now: AtomicU64,
    upload_total: AtomicU64,
    upload_now: AtomicU64,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self, reason: InterruptReason) {
        let value = match reason {
            InterruptReason::Abort => ABORT,
            InterruptReason::DownloadOverflow => DOWNLOAD_OVERFLOW,
        };
        self.interrupt.store(value, Ordering::SeqCst);
    }

    pub fn clear_interrupt(&self) {
        self.interrupt.store(NOT_INTERRUPTED, Ordering::SeqCst);
    }

    pub fn interrupt_reason(&self) -> Option<InterruptReason> {
        match self.interrupt.load(Ordering::SeqCst) {
            NOT_INTERRUPTED => None,
            DOWNLOAD_OVERFLOW => Some(InterruptReason::DownloadOverflow),
            _ => Some(InterruptReason::Abort),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst) != NOT_INTERRUPTED
    }

    pub fn record_progress(&self, progress: Progress) {
        self.download_total
            .store(progress.download_total, Ordering::Relaxed);
        self.download_now.store(progress.download_now, Ordering::Relaxed);
        self.upload_total.store(progress.upload_total, Ordering::Relaxed);
        self.upload_now.store(progress.upload_now, Ordering::Relaxed);
    }

    pub fn progress(&self) -> Progress {
        Progress {
            download_total: self.download_total.load(Ordering::Relaxed),
            download_now: self.download_now.load(Ordering::Relaxed),
            upload_total: self.upload_total.load(Ordering::Relaxed),
            upload_now: self.upload_now.load(Ordering::Relaxed),
        }
    }

    pub fn reset_progress(&self) {
        self.record_progress(Progress::default());
    }
}

/// Cloneable, thread-safe handle that interrupts one session's in-flight
/// call. Interrupting an idle session has no effect on its next call: the
/// flag is cleared when a call starts.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    state: Arc<TransferState>,
}

impl InterruptHandle {
    pub(crate) fn new(state: Arc<TransferState>) -> Self {
        Self { state }
    }

    pub fn interrupt(&self) {
        self.state.interrupt(InterruptReason::Abort);
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.is_interrupted()
    }

    /// Latest counters of the session's current or most recent call.
    pub fn progress(&self) -> Progress {
        self.state.progress()
    }
}
