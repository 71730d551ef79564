//! Progress callbacks for bulk transfers.
//!
//! `get`, `put` and the copy family report the number of items up front
//! and tick once per completed item. The default sink discards
//! everything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Progress sink. All methods have no-op defaults so implementors pick
/// what they care about.
pub trait Callback: Send + Sync {
    /// Total amount of upcoming work, when known.
    fn set_size(&self, size: u64) {
        let _ = size;
    }

    /// Jump progress to an absolute value.
    fn absolute_update(&self, value: u64) {
        let _ = value;
    }

    /// Advance progress by `increment`.
    fn relative_update(&self, increment: u64) {
        let _ = increment;
    }

    /// A child callback for one transfer within a bulk operation.
    fn branch(&self, src: &str, dst: &str) -> Arc<dyn Callback> {
        let _ = (src, dst);
        Arc::new(NoOpCallback)
    }
}

/// Discards all progress.
pub struct NoOpCallback;

impl Callback for NoOpCallback {}

/// Counts ticks; handy in tests and simple CLIs.
#[derive(Default)]
pub struct CountingCallback {
    size: AtomicU64,
    value: AtomicU64,
}

impl CountingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

impl Callback for CountingCallback {
    fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::SeqCst);
    }

    fn absolute_update(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
    }

    fn relative_update(&self, increment: u64) {
        self.value.fetch_add(increment, Ordering::SeqCst);
    }
}
