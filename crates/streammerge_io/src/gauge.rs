use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks how many reads are running at once, and the most we've seen.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct ReadGauge {
    inner: Arc<GaugeCounters>,
}

#[derive(Debug, Default)]
struct GaugeCounters {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ReadGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a read as started. The read is considered finished when the
    /// returned guard is dropped.
    pub fn enter(&self) -> ReadGaugeGuard {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        ReadGaugeGuard {
            gauge: self.clone(),
        }
    }

    pub fn current(&self) -> usize {
        self.inner.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ReadGaugeGuard {
    gauge: ReadGauge,
}

impl Drop for ReadGaugeGuard {
    fn drop(&mut self) {
        self.gauge.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_peak() {
        let gauge = ReadGauge::new();

        let g1 = gauge.enter();
        let g2 = gauge.enter();
        assert_eq!(2, gauge.current());
        std::mem::drop(g1);
        let g3 = gauge.enter();
        std::mem::drop(g2);
        std::mem::drop(g3);

        assert_eq!(0, gauge.current());
        assert_eq!(2, gauge.peak());
    }
}
