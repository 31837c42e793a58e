use crate::models::Collection;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected while sweeping one source collection
#[derive(Default)]
pub struct SweepStats {
    pub records_read: AtomicU64,
    pub records_written: AtomicU64,
    pub skipped_existing: AtomicU64,
    pub unresolved_refs: AtomicU64,
    pub chunks_committed: AtomicU64,
}

/// Plain snapshot of [`SweepStats`] for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub collection: Option<Collection>,
    pub read: u64,
    pub written: u64,
    pub skipped_existing: u64,
    pub unresolved: u64,
    pub chunks: u64,
}

impl SweepStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, count: u64) {
        self.records_read.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_written(&self, count: u64) {
        self.records_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.skipped_existing.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_unresolved(&self) {
        self.unresolved_refs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_chunks(&self) {
        self.chunks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped_existing.load(Ordering::Relaxed)
    }

    pub fn unresolved(&self) -> u64 {
        self.unresolved_refs.load(Ordering::Relaxed)
    }

    pub fn chunks(&self) -> u64 {
        self.chunks_committed.load(Ordering::Relaxed)
    }

    pub fn summary(&self, collection: Collection) -> SweepSummary {
        SweepSummary {
            collection: Some(collection),
            read: self.read(),
            written: self.written(),
            skipped_existing: self.skipped(),
            unresolved: self.unresolved(),
            chunks: self.chunks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = SweepStats::new();
        assert_eq!(stats.read(), 0);
        assert_eq!(stats.written(), 0);
        assert_eq!(stats.skipped(), 0);
        assert_eq!(stats.unresolved(), 0);
        assert_eq!(stats.chunks(), 0);
    }

    #[test]
    fn summary_captures_state() {
        let stats = SweepStats::new();
        stats.add_read(10);
        stats.add_read(3);
        stats.add_written(2);
        stats.add_skipped(1);
        stats.inc_unresolved();
        stats.inc_chunks();

        let summary = stats.summary(Collection::Comments);
        assert_eq!(summary.collection, Some(Collection::Comments));
        assert_eq!(summary.read, 13);
        assert_eq!(summary.written, 2);
        assert_eq!(summary.skipped_existing, 1);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.chunks, 1);
    }
}
