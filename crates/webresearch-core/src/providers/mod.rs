//! Capability interfaces consumed by the research loop.

pub mod openai;
pub mod tavily;

pub use openai::OpenAiCompatibleModel;
pub use tavily::TavilySearch;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ModelBackendError, SearchBackendError};
use crate::model::{SearchResult, StepDigest};

/// Web-search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchBackendError>;
}

/// Completion backend used for every model-driven stage of the loop.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_queries(
        &self,
        question: &str,
        count: usize,
    ) -> Result<Vec<String>, ModelBackendError>;

    async fn analyze(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<String, ModelBackendError>;

    async fn synthesize(
        &self,
        question: &str,
        steps: &[StepDigest],
    ) -> Result<String, ModelBackendError>;

    async fn regenerate_with_guidance(
        &self,
        question: &str,
        steps: &[StepDigest],
        guidance: &str,
    ) -> Result<String, ModelBackendError>;

    /// Returns the judge's raw structured payload; decoding happens in
    /// [`crate::judge::decode_verdict`].
    async fn judge(
        &self,
        question: &str,
        answer: &str,
        context: &str,
    ) -> Result<String, ModelBackendError>;
}

pub type DynSearchProvider = Arc<dyn SearchProvider>;
pub type DynLanguageModel = Arc<dyn LanguageModel>;

/// Render `{query, analysis}` pairs the way the synthesis prompts expect.
pub(crate) fn render_digests(steps: &[StepDigest]) -> String {
    steps
        .iter()
        .map(|step| format!("Query: {}\nAnalysis: {}", step.query, step.analysis))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Render search hits for the analysis prompt.
pub(crate) fn render_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "(no search results were returned for this query)".to_string();
    }
    results
        .iter()
        .map(|result| {
            format!(
                "Title: {}\nURL: {}\nContent: {}",
                result.title, result.url, result.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
