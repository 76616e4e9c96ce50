//! Core enhancement logic for docharvest.
//!
//! - [`extract`]: pulling `{summary, tags, category}` out of model output
//! - [`enhancer`]: the per-document prompt/extract/retry loop
//! - [`enrichment`]: batch enhancement with bounded concurrency
//! - [`loader`]: Markdown files to [`Document`](docharvest_shared::Document)s

pub mod enhancer;
pub mod enrichment;
pub mod extract;
pub mod loader;

pub use enhancer::{EnhanceReport, MetadataEnhancer};
pub use enrichment::{
    EnrichmentFailure, EnrichmentProgress, EnrichmentSummary, SilentEnrichmentProgress,
    enhance_documents,
};
pub use extract::{ExtractedMetadata, extract_metadata};
pub use loader::{collect_markdown_paths, load_markdown};
