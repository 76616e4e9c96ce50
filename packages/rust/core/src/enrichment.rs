//! Batch metadata enhancement.
//!
//! Runs the [`MetadataEnhancer`] over many documents with bounded
//! concurrency. A document whose enhancement fails is logged, recorded in the
//! [`EnrichmentSummary`] and left unenhanced; the rest of the batch carries on.
//! Cancellation halts the whole batch.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use docharvest_shared::{DocHarvestError, Document, Result};

use crate::enhancer::MetadataEnhancer;

/// A document that could not be enhanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichmentFailure {
    pub url: String,
    pub error: String,
}

/// Aggregated results for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    /// Documents in the batch.
    pub total: usize,
    /// Documents that received metadata.
    pub enhanced: usize,
    /// Documents left unenhanced, with the reason.
    pub failures: Vec<EnrichmentFailure>,
    /// Completion attempts across all enhanced documents.
    pub attempts: u64,
    /// Prompt + completion tokens across all enhanced documents.
    pub total_tokens: u64,
}

/// Enhance `docs` in place, at most `concurrency` at a time (minimum 1).
///
/// Returns [`DocHarvestError::Cancelled`] as soon as the batch is cancelled;
/// documents already enhanced keep their metadata.
#[instrument(skip_all, fields(documents = docs.len(), concurrency = concurrency))]
pub async fn enhance_documents(
    enhancer: &MetadataEnhancer,
    docs: &mut [Document],
    concurrency: usize,
    cancel: &CancellationToken,
    progress: &dyn EnrichmentProgress,
) -> Result<EnrichmentSummary> {
    let total = docs.len();
    let mut summary = EnrichmentSummary {
        total,
        ..EnrichmentSummary::default()
    };

    progress.phase("Enhancing documents");

    let mut results = stream::iter(docs.iter_mut())
        .map(move |doc| async move {
            if cancel.is_cancelled() {
                return (doc.url.clone(), Err(DocHarvestError::Cancelled));
            }
            let result = enhancer.enhance(cancel, doc).await;
            (doc.url.clone(), result)
        })
        .buffer_unordered(concurrency.max(1));

    let mut completed = 0;
    while let Some((url, result)) = results.next().await {
        completed += 1;
        match result {
            Ok(report) => {
                summary.enhanced += 1;
                summary.attempts += u64::from(report.attempts);
                summary.total_tokens += u64::from(report.usage.total_tokens);
            }
            Err(err) if err.is_cancellation() => {
                warn!(completed, total, "enhancement cancelled");
                return Err(DocHarvestError::Cancelled);
            }
            Err(err) => {
                warn!(
                    url = %url,
                    error = %err,
                    "document enhancement failed, keeping it unenhanced"
                );
                summary.failures.push(EnrichmentFailure {
                    url: url.clone(),
                    error: err.to_string(),
                });
            }
        }
        progress.task_progress(completed, total, &url);
    }

    info!(
        enhanced = summary.enhanced,
        failed = summary.failures.len(),
        tokens = summary.total_tokens,
        "enhancement complete"
    );

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for batch enhancement.
pub trait EnrichmentProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each document finishes, successfully or not.
    fn task_progress(&self, current: usize, total: usize, detail: &str);
}

/// No-op enrichment progress.
pub struct SilentEnrichmentProgress;

impl EnrichmentProgress for SilentEnrichmentProgress {
    fn phase(&self, _name: &str) {}
    fn task_progress(&self, _current: usize, _total: usize, _detail: &str) {}
}
