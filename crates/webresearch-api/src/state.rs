use crate::config::ApiConfig;
use crate::error::AppError;
use anyhow::Result;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{info, warn};
use uuid::Uuid;
use webresearch_core::{DynProgressSink, ResearchLoop, ResearchOptions, Session};

const MAX_SEARCH_QUERIES: u32 = 10;
const MAX_ITERATIONS: u32 = 5;

/// Body of `POST /api/research` and of the websocket `query` frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchRequest {
    #[serde(default, alias = "content")]
    pub question: String,
    #[serde(default)]
    pub max_search_queries: Option<u32>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ResearchRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.question.trim().is_empty() {
            return Err(AppError::bad_request("Question is required"));
        }
        if let Some(value) = self.max_search_queries
            && !(1..=MAX_SEARCH_QUERIES).contains(&value)
        {
            return Err(AppError::bad_request(format!(
                "max_search_queries must be between 1 and {MAX_SEARCH_QUERIES}"
            )));
        }
        if let Some(value) = self.max_iterations
            && !(1..=MAX_ITERATIONS).contains(&value)
        {
            return Err(AppError::bad_request(format!(
                "max_iterations must be between 1 and {MAX_ITERATIONS}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    pub num_searches: u32,
    pub num_rewordings: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            num_searches: 3,
            num_rewordings: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub session_id: String,
    pub question: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacitySnapshot {
    pub max_concurrency: usize,
    pub available_permits: usize,
    pub running_sessions: usize,
}

#[derive(Clone)]
pub struct AppState {
    research: Arc<ResearchLoop>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    active: Arc<DashMap<String, ActiveSession>>,
    defaults: SessionDefaults,
}

impl AppState {
    pub fn new(research: ResearchLoop, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            research: Arc::new(research),
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            active: Arc::new(DashMap::new()),
            defaults: SessionDefaults::default(),
        }
    }

    pub fn with_defaults(mut self, defaults: SessionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn try_from_config(config: &ApiConfig) -> Result<Self> {
        let research = ResearchLoop::from_config(&config.research)?;
        let defaults = SessionDefaults {
            num_searches: config.research.research.num_searches,
            num_rewordings: config.research.research.num_rewordings,
        };
        Ok(Self::new(research, config.max_concurrency).with_defaults(defaults))
    }

    pub fn journal_dir(&self) -> Option<PathBuf> {
        self.research.settings().journal.dir.clone()
    }

    pub fn capacity(&self) -> CapacitySnapshot {
        CapacitySnapshot {
            max_concurrency: self.max_concurrency,
            available_permits: self.permits.available_permits(),
            running_sessions: self.active.len(),
        }
    }

    pub fn active_sessions(&self) -> Vec<ActiveSession> {
        let mut sessions: Vec<ActiveSession> =
            self.active.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        sessions
    }

    fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|err| match err {
                TryAcquireError::NoPermits => AppError::new(
                    StatusCode::TOO_MANY_REQUESTS,
                    "maximum concurrent research sessions reached",
                ),
                TryAcquireError::Closed => AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "research capacity unavailable",
                ),
            })
    }

    fn register(&self, session_id: &str, question: &str) -> Result<ActiveGuard, AppError> {
        use dashmap::mapref::entry::Entry;

        match self.active.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(AppError::new(
                StatusCode::CONFLICT,
                format!("session {session_id} is already running"),
            )),
            Entry::Vacant(slot) => {
                slot.insert(ActiveSession {
                    session_id: session_id.to_string(),
                    question: question.to_string(),
                    started_at: Utc::now(),
                });
                Ok(ActiveGuard {
                    active: self.active.clone(),
                    session_id: session_id.to_string(),
                })
            }
        }
    }

    /// Validate, admit, and run one research session.
    pub async fn run_session(
        &self,
        request: ResearchRequest,
        progress: Option<DynProgressSink>,
    ) -> Result<Session, AppError> {
        request.validate()?;
        let _permit = self.acquire_permit()?;

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let question = request.question.trim().to_string();
        let _guard = self.register(&session_id, &question)?;

        let mut options = ResearchOptions::default()
            .with_searches(request.max_search_queries.unwrap_or(self.defaults.num_searches))
            .with_rewordings(request.max_iterations.unwrap_or(self.defaults.num_rewordings))
            .with_session_id(session_id.clone());
        if let Some(sink) = progress {
            options = options.with_progress(sink);
        }

        info!(session_id = %session_id, "research session admitted");
        match self.research.research(&question, options).await {
            Ok(session) => Ok(session),
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "research session failed");
                Err(AppError::from(err))
            }
        }
    }
}

struct ActiveGuard {
    active: Arc<DashMap<String, ActiveSession>>,
    session_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.remove(&self.session_id);
    }
}
