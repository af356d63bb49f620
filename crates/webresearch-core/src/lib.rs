//! Iterative web research with self-evaluation.
//!
//! The crate answers a question by generating search queries, gathering and
//! analyzing web results, synthesizing an answer, and judging it. The judge's
//! verdict steers the next attempt until the answer is sufficient or the
//! attempt budget is spent. Providers are pluggable through
//! [`SearchProvider`] and [`LanguageModel`].

mod config;
mod error;
mod evidence;
mod judge;
mod logging;
mod metrics;
mod model;
mod progress;
pub mod providers;
mod report;
mod research;
mod security;
mod telemetry;

pub use config::{Config, ConfigLoader, LlmConfig, LoggingConfig, ResearchConfig, SearchConfig};
pub use error::{JudgeParseError, ModelBackendError, ModelStage, ResearchError, SearchBackendError};
pub use evidence::EvidenceStore;
pub use judge::{JUDGE_TOOL_NAME, decode_verdict, judge_tool_schema};
pub use logging::{
    JournalLevel, JournalSettings, SessionJournal, is_valid_session_id, read_session_log,
    remove_session_log,
};
pub use metrics::init_metrics_from_env;
pub use model::{
    Action, EvaluationAttempt, EvaluationMetrics, EvaluationResult, FALLBACK_SCORE, ResearchStep,
    SearchResult, Session, StepDigest,
};
pub use progress::{
    DynProgressSink, FnSink, ProgressReporter, ProgressSink, ProgressStatus, ProgressUpdate,
    TOTAL_PHASES, preview,
};
pub use providers::{DynLanguageModel, DynSearchProvider, LanguageModel, SearchProvider};
pub use report::{persist_report, render_report};
pub use research::{
    GENERIC_GUIDANCE, ResearchLoop, ResearchOptions, ResearchSettings, research_question,
};
pub use security::{SecretValue, require_env};
pub use telemetry::{TelemetryOptions, init_telemetry};
