use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives progress of a verification run.
///
/// The archive reader announces the number of entries with `begin`, reports
/// one unit of work per entry and calls `done` once the scan completes.
pub trait ProgressSink {
    fn begin(&mut self, _task: &str, _total: usize) {}

    fn worked(&mut self, _units: usize) {}

    fn done(&mut self) {}
}

/// A sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {}

/// Counts reported units. Useful for embedding code that polls progress.
#[derive(Debug, Default, Clone)]
pub struct CountingProgress {
    pub total: usize,
    pub worked: usize,
    pub finished: bool,
}

impl ProgressSink for CountingProgress {
    fn begin(&mut self, _task: &str, total: usize) {
        self.total = total;
        self.worked = 0;
        self.finished = false;
    }

    fn worked(&mut self, units: usize) {
        self.worked += units;
    }

    fn done(&mut self) {
        self.finished = true;
    }
}

/// Cooperative cancellation flag shared between a run and its controller.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
