use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide swap-in statistics, exposed to whatever reports them.
#[derive(Debug, Default)]
pub struct SwapInStats {
    ins: AtomicU64,
}

impl SwapInStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of completed swap-ins, successful or not.
    pub fn ins(&self) -> u64 {
        self.ins.load(Ordering::Relaxed)
    }

    pub(crate) fn record_completion(&self) {
        self.ins.fetch_add(1, Ordering::Relaxed);
    }
}
