//! Read-only counters the engine publishes alongside per-bucket snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncStats {
    direct_applied: AtomicU64,
    bucket_applied: AtomicU64,
    skipped: AtomicU64,
    duplicates: AtomicU64,
    fetch_count: AtomicU64,
    fetch_failures: AtomicU64,
    too_long: AtomicU64,
    follow_ups: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub direct_applied: u64,
    pub bucket_applied: u64,
    pub skipped: u64,
    pub duplicates: u64,
    pub fetch_count: u64,
    pub fetch_failures: u64,
    pub too_long: u64,
    pub follow_ups: u64,
}

impl SyncStats {
    pub(crate) fn direct_applied(&self, n: u64) {
        self.direct_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn bucket_applied(&self, n: u64) {
        self.bucket_applied.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_started(&self) {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_failed(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn too_long(&self) {
        self.too_long.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn follow_up(&self) {
        self.follow_ups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            direct_applied: self.direct_applied.load(Ordering::Relaxed),
            bucket_applied: self.bucket_applied.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            fetch_count: self.fetch_count.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            too_long: self.too_long.load(Ordering::Relaxed),
            follow_ups: self.follow_ups.load(Ordering::Relaxed),
        }
    }
}
