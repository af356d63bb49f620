//! One-way progress delivery for research sessions.
//!
//! The loop reports each transition through a [`ProgressReporter`]. Sinks are
//! synchronous and must not block; a failing sink is logged and ignored so it
//! can never fail a research run.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Number of coarse phases reported as `total_steps`.
pub const TOTAL_PHASES: u32 = 6;

/// Status codes emitted at loop transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    GeneratingQueries,
    QueriesGenerated,
    Searching,
    SearchComplete,
    SearchFailed,
    Analyzing,
    AnalysisComplete,
    Synthesizing,
    Regenerating,
    Evaluating,
    Verdict,
    ExtraResearch,
    ExtraResearchComplete,
    Completed,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::GeneratingQueries => "generating_queries",
            ProgressStatus::QueriesGenerated => "queries_generated",
            ProgressStatus::Searching => "searching",
            ProgressStatus::SearchComplete => "search_complete",
            ProgressStatus::SearchFailed => "search_failed",
            ProgressStatus::Analyzing => "analyzing",
            ProgressStatus::AnalysisComplete => "analysis_complete",
            ProgressStatus::Synthesizing => "synthesizing",
            ProgressStatus::Regenerating => "regenerating",
            ProgressStatus::Evaluating => "evaluating",
            ProgressStatus::Verdict => "verdict",
            ProgressStatus::ExtraResearch => "extra_research",
            ProgressStatus::ExtraResearchComplete => "extra_research_complete",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Error => "error",
        }
    }

    /// Coarse phase ordinal out of [`TOTAL_PHASES`]; `0` marks a failure.
    pub fn phase(&self) -> u32 {
        match self {
            ProgressStatus::GeneratingQueries | ProgressStatus::QueriesGenerated => 1,
            ProgressStatus::Searching
            | ProgressStatus::SearchComplete
            | ProgressStatus::SearchFailed => 2,
            ProgressStatus::Analyzing
            | ProgressStatus::AnalysisComplete
            | ProgressStatus::ExtraResearch
            | ProgressStatus::ExtraResearchComplete => 3,
            ProgressStatus::Synthesizing | ProgressStatus::Regenerating => 4,
            ProgressStatus::Evaluating | ProgressStatus::Verdict => 5,
            ProgressStatus::Completed => 6,
            ProgressStatus::Error => 0,
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub step_number: u32,
    pub total_steps: u32,
    pub status: ProgressStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for progress updates.
pub trait ProgressSink: Send + Sync {
    fn deliver(&self, update: ProgressUpdate) -> anyhow::Result<()>;
}

impl ProgressSink for mpsc::UnboundedSender<ProgressUpdate> {
    fn deliver(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        self.send(update)
            .map_err(|_| anyhow::anyhow!("progress receiver dropped"))
    }
}

/// Adapts a closure into a [`ProgressSink`].
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(ProgressUpdate) -> anyhow::Result<()> + Send + Sync,
{
    fn deliver(&self, update: ProgressUpdate) -> anyhow::Result<()> {
        (self.0)(update)
    }
}

pub type DynProgressSink = Arc<dyn ProgressSink>;

/// Session-bound front of an optional sink.
#[derive(Clone)]
pub struct ProgressReporter {
    session_id: String,
    sink: Option<DynProgressSink>,
}

impl ProgressReporter {
    pub fn new(session_id: impl Into<String>, sink: Option<DynProgressSink>) -> Self {
        Self {
            session_id: session_id.into(),
            sink,
        }
    }

    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self::new(session_id, None)
    }

    pub fn emit(&self, status: ProgressStatus, message: impl Into<String>) {
        let Some(sink) = &self.sink else {
            return;
        };

        let update = ProgressUpdate {
            session_id: self.session_id.clone(),
            step_number: status.phase(),
            total_steps: TOTAL_PHASES,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        };

        if let Err(err) = sink.deliver(update) {
            tracing::warn!(
                session_id = %self.session_id,
                status = %status,
                error = %err,
                "progress sink rejected update"
            );
        }
    }
}

/// Shorten a query for inclusion in a status line.
pub fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut short: String = text.chars().take(limit).collect();
    short.push_str("...");
    short
}
