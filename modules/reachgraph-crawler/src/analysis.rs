use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use reachgraph_store::GraphStore;

use crate::buffer::{AnalysisBuffer, BufferedRecord};
use crate::stats::CrawlStats;

// --- AI collaborator ---

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisInput {
    pub identity: String,
    pub bio: String,
    pub captions: Vec<String>,
}

/// Derived attributes for one profile, as returned by the analysis model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProfileInsights {
    pub identity: String,
    pub interests: Vec<String>,
    pub niche: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub identity: String,
    pub text: String,
}

#[async_trait]
pub trait ProfileAnalyzer: Send + Sync {
    /// One model call for the whole batch; results come back per identity.
    async fn analyze_batch(&self, batch: Vec<AnalysisInput>) -> Result<Vec<ProfileInsights>>;

    /// One bulk embedding call for the whole batch. The collaborator
    /// persists the vectors itself; nothing comes back.
    async fn create_embeddings_batch(&self, inputs: Vec<EmbeddingInput>) -> Result<()>;
}

// --- Batch processor ---

/// Drains the analysis buffer and spends exactly one analysis call and one
/// embedding call per drained batch, however many records it holds.
pub struct BatchProcessor {
    buffer: Arc<AnalysisBuffer>,
    analyzer: Arc<dyn ProfileAnalyzer>,
    store: Arc<dyn GraphStore>,
    stats: Arc<CrawlStats>,
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(
        buffer: Arc<AnalysisBuffer>,
        analyzer: Arc<dyn ProfileAnalyzer>,
        store: Arc<dyn GraphStore>,
        stats: Arc<CrawlStats>,
        batch_size: usize,
    ) -> Self {
        Self { buffer, analyzer, store, stats, batch_size }
    }

    /// Flush up to one threshold's worth of records. Returns how many were
    /// processed; zero when the buffer was empty or another drain won.
    pub async fn run_threshold_batch(&self) -> usize {
        let records = self.buffer.drain_up_to(self.batch_size);
        if records.is_empty() {
            return 0;
        }
        debug!(records = records.len(), "Running threshold batch");
        self.process(records).await
    }

    /// Flush everything the buffer still holds for one job. Called when the
    /// job's last unit settles so no record is left stranded below the
    /// threshold.
    pub async fn run_job_batch(&self, job_id: Uuid) -> usize {
        let records = self.buffer.drain_for_job(job_id);
        if records.is_empty() {
            return 0;
        }
        debug!(job_id = %job_id, records = records.len(), "Running job batch");
        self.process(records).await
    }

    async fn process(&self, records: Vec<BufferedRecord>) -> usize {
        let count = records.len();

        let inputs: Vec<AnalysisInput> = records
            .iter()
            .map(|r| AnalysisInput {
                identity: r.identity.clone(),
                bio: r.bio.clone(),
                captions: r.captions.clone(),
            })
            .collect();

        match self.analyzer.analyze_batch(inputs).await {
            Ok(insights) => {
                for insight in insights {
                    if let Err(e) = self
                        .store
                        .save_insights(&insight.identity, insight.interests, insight.niche)
                        .await
                    {
                        warn!(identity = %insight.identity, error = %e,
                            "Failed to persist insights, continuing with the batch");
                    }
                }
            }
            // The batch keeps going: embeddings do not depend on analysis
            // output, and the crawl must never stall on the AI service.
            Err(e) => warn!(records = count, error = %e, "Batch analysis call failed"),
        }

        let embed_inputs: Vec<EmbeddingInput> = records
            .iter()
            .map(|r| EmbeddingInput { identity: r.identity.clone(), text: embedding_text(r) })
            .collect();

        if let Err(e) = self.analyzer.create_embeddings_batch(embed_inputs).await {
            warn!(records = count, error = %e, "Bulk embedding call failed");
        }

        self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.stats.records_analyzed.fetch_add(count as u64, Ordering::Relaxed);
        info!(records = count, "Analysis batch flushed");
        count
    }
}

fn embedding_text(record: &BufferedRecord) -> String {
    let mut text = record.bio.clone();
    for caption in &record.captions {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(caption);
    }
    text
}
