use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

/// Cancellation and status reporting handle shared between a build and the
/// code that requested it.  The builder polls [`Progress::is_canceled`] at
/// range granularity; cancellation is cooperative and the partially built
/// structure is discarded by the caller.
#[derive(Debug, Default)]
pub struct Progress {
    cancel: AtomicBool,
    count: AtomicUsize,
    total: AtomicUsize,
    status: Mutex<String>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the build to unwind at the next cancellation point
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Lock-free check used from inside the build tasks
    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Replace the status line describing the current build phase
    pub fn set_substatus(&self, status: &str) {
        *self.status.lock().unwrap() = status.to_owned();
    }

    pub fn substatus(&self) -> String {
        self.status.lock().unwrap().clone()
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_total(&self, extra: usize) {
        self.total.fetch_add(extra, Ordering::Relaxed);
    }

    pub(crate) fn add_completed(&self, count: usize) {
        self.count.fetch_add(count, Ordering::Relaxed);
    }

    /// Fraction of references consumed into leaves so far, in 0..=1
    pub fn fraction(&self) -> f32 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.count.load(Ordering::Relaxed) as f32 / total as f32).min(1.0)
    }
}
