use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One scraped entity waiting for AI analysis.
#[derive(Debug, Clone)]
pub struct BufferedRecord {
    pub job_id: Uuid,
    pub identity: String,
    pub bio: String,
    pub captions: Vec<String>,
    pub enqueued_at: DateTime<Utc>,
}

impl BufferedRecord {
    pub fn new(job_id: Uuid, identity: String, bio: String, captions: Vec<String>) -> Self {
        Self { job_id, identity, bio, captions, enqueued_at: Utc::now() }
    }
}

/// FIFO of records awaiting analysis, shared by all crawl workers.
///
/// Drains are guarded by a single token claimed with compare-exchange: a
/// drain that loses the claim returns empty instead of queueing, so at most
/// one drain sees any given record and losers simply skip their cycle.
#[derive(Default)]
pub struct AnalysisBuffer {
    records: Mutex<VecDeque<BufferedRecord>>,
    draining: AtomicBool,
}

struct DrainToken<'a>(&'a AtomicBool);

impl Drop for DrainToken<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AnalysisBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record; returns the buffer length after insertion so the
    /// caller can decide whether to kick off a threshold drain.
    pub fn append(&self, record: BufferedRecord) -> usize {
        let mut records = self.records.lock().unwrap();
        records.push_back(record);
        records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_claim(&self) -> Option<DrainToken<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| DrainToken(&self.draining))
    }

    /// Pop up to `n` records from the head. Empty result when another drain
    /// holds the token.
    pub fn drain_up_to(&self, n: usize) -> Vec<BufferedRecord> {
        let Some(_token) = self.try_claim() else {
            return Vec::new();
        };
        let mut records = self.records.lock().unwrap();
        let take = n.min(records.len());
        records.drain(..take).collect()
    }

    /// Remove and return every record belonging to `job_id`, leaving the
    /// rest in place in their original order. Empty result when another
    /// drain holds the token.
    pub fn drain_for_job(&self, job_id: Uuid) -> Vec<BufferedRecord> {
        let Some(_token) = self.try_claim() else {
            return Vec::new();
        };
        let mut records = self.records.lock().unwrap();
        let mut matched = Vec::new();
        let mut remainder = VecDeque::with_capacity(records.len());
        for record in records.drain(..) {
            if record.job_id == job_id {
                matched.push(record);
            } else {
                remainder.push_back(record);
            }
        }
        *records = remainder;
        matched
    }
}
