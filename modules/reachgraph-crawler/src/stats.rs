use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-lifetime counters across all crawl jobs. Cheap to bump from any
/// worker; snapshot for reporting.
#[derive(Default)]
pub struct CrawlStats {
    pub jobs_created: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    pub jobs_cancelled: AtomicU64,
    pub units_processed: AtomicU64,
    pub units_failed: AtomicU64,
    pub units_retried: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub records_analyzed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CrawlStatsSnapshot {
    pub jobs_created: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub units_processed: u64,
    pub units_failed: u64,
    pub units_retried: u64,
    pub batches_flushed: u64,
    pub records_analyzed: u64,
}

impl CrawlStats {
    pub fn snapshot(&self) -> CrawlStatsSnapshot {
        CrawlStatsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            units_processed: self.units_processed.load(Ordering::Relaxed),
            units_failed: self.units_failed.load(Ordering::Relaxed),
            units_retried: self.units_retried.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_analyzed: self.records_analyzed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Display for CrawlStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Crawl Stats ===")?;
        writeln!(
            f,
            "Jobs:    {} created / {} completed / {} failed / {} cancelled",
            self.jobs_created, self.jobs_completed, self.jobs_failed, self.jobs_cancelled
        )?;
        writeln!(
            f,
            "Units:   {} processed / {} failed / {} retried",
            self.units_processed, self.units_failed, self.units_retried
        )?;
        writeln!(
            f,
            "Batches: {} flushed covering {} records",
            self.batches_flushed, self.records_analyzed
        )?;
        Ok(())
    }
}
