use std::{fmt, path::PathBuf, time::Duration};

use thiserror::Error;

/// The single error type surfaced to callers of the research loop.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("language model returned no search queries")]
    NoQueriesGenerated,
    #[error("every search request failed: {0}")]
    Search(#[source] SearchBackendError),
    #[error("language model failed during {stage}: {source}")]
    Model {
        stage: ModelStage,
        #[source]
        source: ModelBackendError,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn model(stage: ModelStage, source: ModelBackendError) -> Self {
        Self::Model { stage, source }
    }

    /// Short machine-readable label used in metrics and progress payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) | Self::MissingSecret(_) | Self::ConfigIo { .. } => {
                "configuration"
            }
            Self::NoQueriesGenerated => "no_queries",
            Self::Search(_) => "search",
            Self::Model { .. } => "model",
            Self::Other(_) => "other",
        }
    }
}

/// Which model call was in flight when a fatal model error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStage {
    QueryGeneration,
    Analysis,
    Synthesis,
    Regeneration,
    Evaluation,
}

impl ModelStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStage::QueryGeneration => "query generation",
            ModelStage::Analysis => "analysis",
            ModelStage::Synthesis => "synthesis",
            ModelStage::Regeneration => "regeneration",
            ModelStage::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure talking to the web-search backend.
#[derive(Debug, Error)]
pub enum SearchBackendError {
    #[error("search transport error: {0}")]
    Transport(String),
    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode search response: {0}")]
    Decode(String),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure talking to the completion backend.
#[derive(Debug, Error)]
pub enum ModelBackendError {
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model response contained no choices")]
    EmptyResponse,
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
}

/// The judge payload could not be decoded into an evaluation.
#[derive(Debug, Error)]
pub enum JudgeParseError {
    #[error("judge payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown judge action `{0}`")]
    UnknownAction(String),
}
