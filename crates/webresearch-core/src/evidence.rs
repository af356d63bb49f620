//! Append-only accumulation of research steps and the views derived from them.

use chrono::Utc;

use crate::model::{ResearchStep, SearchResult, StepDigest};

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Ordered evidence pool for one session.
///
/// Ordinals are assigned on append and form a dense `1..=len` sequence. The
/// synthesis digests and the judge context are extended on every append so
/// neither view is rebuilt from scratch.
#[derive(Debug, Default)]
pub struct EvidenceStore {
    steps: Vec<ResearchStep>,
    digests: Vec<StepDigest>,
    context: String,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordinal the next appended step will receive.
    pub fn next_ordinal(&self) -> usize {
        self.steps.len() + 1
    }

    /// Record a step and return its ordinal.
    pub fn append(
        &mut self,
        query: impl Into<String>,
        results: Vec<SearchResult>,
        analysis: impl Into<String>,
    ) -> usize {
        let ordinal = self.next_ordinal();
        let step = ResearchStep {
            ordinal,
            query: query.into(),
            results,
            analysis: analysis.into(),
            created_at: Utc::now(),
        };

        if !self.context.is_empty() {
            self.context.push_str(CONTEXT_SEPARATOR);
        }
        self.context.push_str(&render_block(&step.query, &step.analysis));
        self.digests.push(StepDigest {
            query: step.query.clone(),
            analysis: step.analysis.clone(),
        });
        self.steps.push(step);

        ordinal
    }

    pub fn steps(&self) -> &[ResearchStep] {
        &self.steps
    }

    /// `{query, analysis}` pairs in step order, for answer synthesis.
    pub fn digests(&self) -> &[StepDigest] {
        &self.digests
    }

    /// `Query: …\nAnalysis: …` blocks joined by blank lines, for the judge.
    pub fn judge_context(&self) -> &str {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_steps(self) -> Vec<ResearchStep> {
        self.steps
    }
}

fn render_block(query: &str, analysis: &str) -> String {
    format!("Query: {query}\nAnalysis: {analysis}")
}
