//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

/// The execution context a run reports to.
///
/// Polled only by the draining thread, never by workers.
pub trait ExecutionHost: Sync {
    fn is_cancelled(&self) -> bool;

    /// `fraction` lies in `0.0..=1.0`.
    fn report_progress(&self, fraction: f64, message: &str);
}

/// Host that never cancels and ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentHost;

impl ExecutionHost for SilentHost {
    fn is_cancelled(&self) -> bool {
        false
    }

    fn report_progress(&self, _fraction: f64, _message: &str) {}
}

/// Host backed by a cancellation flag that can be raised from any thread.
/// Progress is forwarded to the log.
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ExecutionHost for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn report_progress(&self, fraction: f64, message: &str) {
        tracing::debug!(progress = fraction, message, "progress");
    }
}

/// Maps the progress of a sub-phase onto a slice of the parent's range.
pub struct ScaledHost<'a> {
    inner: &'a dyn ExecutionHost,
    start: f64,
    span: f64,
}

impl<'a> ScaledHost<'a> {
    pub fn new(inner: &'a dyn ExecutionHost, start: f64, span: f64) -> Self {
        ScaledHost { inner, start, span }
    }
}

impl ExecutionHost for ScaledHost<'_> {
    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    fn report_progress(&self, fraction: f64, message: &str) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.inner.report_progress(self.start + fraction * self.span, message);
    }
}
