//! The research/evaluation control loop.
//!
//! A session generates queries, gathers evidence for each, then alternates
//! between producing an answer and judging it. After each verdict the loop
//! either stops (`sufficient` or budget exhausted), regenerates the answer
//! with guidance (`redo_response`), or researches the missing topics and
//! synthesizes again (`research_again`).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::time::timeout;
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use crate::config::{Config, ConfigLoader, ResearchConfig};
use crate::error::{ModelBackendError, ModelStage, ResearchError, SearchBackendError};
use crate::evidence::EvidenceStore;
use crate::judge::decode_verdict;
use crate::logging::{JournalSettings, SessionJournal, is_valid_session_id};
use crate::metrics;
use crate::model::{Action, EvaluationAttempt, EvaluationResult, SearchResult, Session};
use crate::progress::{DynProgressSink, ProgressReporter, ProgressStatus, preview};
use crate::providers::{
    DynLanguageModel, DynSearchProvider, LanguageModel, OpenAiCompatibleModel, SearchProvider,
    TavilySearch,
};

/// Guidance used when the judge asks for a rewrite without saying how.
pub const GENERIC_GUIDANCE: &str = "Improve clarity and completeness of the answer.";

const PREVIEW_LEN: usize = 60;

/// Tunables that stay fixed across sessions run by one [`ResearchLoop`].
#[derive(Debug, Clone)]
pub struct ResearchSettings {
    pub results_per_query: usize,
    pub results_per_topic: usize,
    pub search_timeout: Duration,
    pub model_timeout: Duration,
    /// Abort with [`ResearchError::Search`] when every initial search fails.
    pub fail_when_all_searches_fail: bool,
    pub journal: JournalSettings,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            results_per_query: 3,
            results_per_topic: 2,
            search_timeout: Duration::from_secs(30),
            model_timeout: Duration::from_secs(60),
            fail_when_all_searches_fail: false,
            journal: JournalSettings::default(),
        }
    }
}

impl From<&Config> for ResearchSettings {
    fn from(config: &Config) -> Self {
        let research = &config.research;
        Self {
            results_per_query: research.results_per_query,
            results_per_topic: research.results_per_topic,
            search_timeout: Duration::from_secs(research.search_timeout_secs),
            model_timeout: Duration::from_secs(research.model_timeout_secs),
            fail_when_all_searches_fail: research.fail_when_all_searches_fail,
            journal: JournalSettings::from(&config.logging),
        }
    }
}

/// Per-session options.
#[derive(Clone)]
pub struct ResearchOptions {
    pub num_searches: u32,
    pub num_rewordings: u32,
    pub session_id: Option<String>,
    pub progress: Option<DynProgressSink>,
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self {
            num_searches: 3,
            num_rewordings: 3,
            session_id: None,
            progress: None,
        }
    }
}

impl ResearchOptions {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            num_searches: config.num_searches,
            num_rewordings: config.num_rewordings,
            ..Self::default()
        }
    }

    pub fn with_searches(mut self, num_searches: u32) -> Self {
        self.num_searches = num_searches;
        self
    }

    pub fn with_rewordings(mut self, num_rewordings: u32) -> Self {
        self.num_rewordings = num_rewordings;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_progress(mut self, sink: DynProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Drives research sessions against a pair of providers.
#[derive(Clone)]
pub struct ResearchLoop {
    search: DynSearchProvider,
    model: DynLanguageModel,
    settings: ResearchSettings,
}

impl ResearchLoop {
    pub fn new(
        search: DynSearchProvider,
        model: DynLanguageModel,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            search,
            model,
            settings,
        }
    }

    /// Wire the shipped Tavily and OpenAI-compatible providers from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ResearchError> {
        ConfigLoader::validate(config)?;
        let settings = ResearchSettings::from(config);

        let llm_key = config.llm_api_key()?;
        let search_key = config.search_api_key()?;
        debug!(
            llm_key = %llm_key.fingerprint(),
            search_key = %search_key.fingerprint(),
            "provider keys resolved"
        );

        let model = OpenAiCompatibleModel::new(&config.llm, llm_key, settings.model_timeout)
            .map_err(|err| {
                ResearchError::InvalidConfiguration(format!("failed to build model client: {err}"))
            })?;
        let search = TavilySearch::new(&config.search, search_key, settings.search_timeout)
            .map_err(|err| {
                ResearchError::InvalidConfiguration(format!("failed to build search client: {err}"))
            })?;

        Ok(Self::new(Arc::new(search), Arc::new(model), settings))
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Run one session end to end.
    #[instrument(
        name = "research.session",
        skip_all,
        fields(session_id = tracing::field::Empty)
    )]
    pub async fn research(
        &self,
        question: &str,
        options: ResearchOptions,
    ) -> Result<Session, ResearchError> {
        let question = question.trim();
        validate_request(question, &options)?;

        let session_id = options
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Span::current().record("session_id", session_id.as_str());

        let started_at = Utc::now();
        let started = Instant::now();

        let mut run = SessionRun {
            search: self.search.as_ref(),
            model: self.model.as_ref(),
            settings: &self.settings,
            question,
            session_id: session_id.clone(),
            journal: SessionJournal::open(&session_id, &self.settings.journal),
            progress: ProgressReporter::new(session_id, options.progress.clone()),
            evidence: EvidenceStore::new(),
        };
        run.journal
            .info(format!("Starting research session: {}", run.session_id));
        run.journal.info(format!("Question: {question}"));

        let outcome = run
            .execute(options.num_searches, options.num_rewordings)
            .await;
        run.finish(outcome, started_at, started)
    }
}

/// Load configuration from the default locations and research `question`.
pub async fn research_question(
    question: &str,
    options: ResearchOptions,
) -> Result<Session, ResearchError> {
    let config = ConfigLoader::load(None)?;
    ResearchLoop::from_config(&config)?
        .research(question, options)
        .await
}

fn validate_request(question: &str, options: &ResearchOptions) -> Result<(), ResearchError> {
    if question.is_empty() {
        return Err(ResearchError::InvalidConfiguration(
            "question must not be empty".into(),
        ));
    }
    if options.num_searches < 1 {
        return Err(ResearchError::InvalidConfiguration(
            "num_searches must be at least 1".into(),
        ));
    }
    if options.num_rewordings < 1 {
        return Err(ResearchError::InvalidConfiguration(
            "num_rewordings must be at least 1".into(),
        ));
    }
    if let Some(session_id) = &options.session_id {
        if !is_valid_session_id(session_id) {
            return Err(ResearchError::InvalidConfiguration(format!(
                "session id `{session_id}` may only contain ASCII letters, digits, '-' and '_'"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum SearchPhase {
    Initial,
    Extra,
}

impl SearchPhase {
    fn as_str(&self) -> &'static str {
        match self {
            SearchPhase::Initial => "initial",
            SearchPhase::Extra => "extra",
        }
    }
}

/// How the next answer is produced, decided by the previous verdict.
enum AnswerPlan {
    Synthesize,
    Regenerate(String),
    ResearchThenSynthesize(Vec<String>),
}

impl AnswerPlan {
    fn after(verdict: &EvaluationResult) -> Option<Self> {
        match verdict.action {
            Action::Sufficient => None,
            Action::RedoResponse => Some(Self::Regenerate(
                verdict
                    .improvement_guidance
                    .clone()
                    .unwrap_or_else(|| GENERIC_GUIDANCE.to_string()),
            )),
            Action::ResearchAgain => Some(Self::ResearchThenSynthesize(verdict.topics().to_vec())),
        }
    }
}

struct Conclusion {
    answer: String,
    evaluations: Vec<EvaluationAttempt>,
}

/// Mutable state of a single in-flight session.
struct SessionRun<'a> {
    search: &'a dyn SearchProvider,
    model: &'a dyn LanguageModel,
    settings: &'a ResearchSettings,
    question: &'a str,
    session_id: String,
    journal: SessionJournal,
    progress: ProgressReporter,
    evidence: EvidenceStore,
}

impl<'a> SessionRun<'a> {
    async fn execute(
        &mut self,
        num_searches: u32,
        num_rewordings: u32,
    ) -> Result<Conclusion, ResearchError> {
        let queries = self.generate_queries(num_searches).await?;
        self.gather(&queries).await?;

        let mut evaluations = Vec::new();
        let mut plan = AnswerPlan::Synthesize;
        let mut attempt = 1;
        loop {
            let answer = self.produce_answer(plan).await?;
            let evaluation = self.evaluate(attempt, num_rewordings, &answer).await?;
            let next = AnswerPlan::after(&evaluation.result);
            evaluations.push(evaluation);

            match next {
                Some(next) if attempt < num_rewordings => {
                    plan = next;
                    attempt += 1;
                }
                Some(_) => {
                    self.journal.warn(format!(
                        "Attempt budget of {num_rewordings} exhausted; returning best-effort answer"
                    ));
                    return Ok(Conclusion {
                        answer,
                        evaluations,
                    });
                }
                None => {
                    return Ok(Conclusion {
                        answer,
                        evaluations,
                    });
                }
            }
        }
    }

    async fn generate_queries(&mut self, num_searches: u32) -> Result<Vec<String>, ResearchError> {
        self.progress.emit(
            ProgressStatus::GeneratingQueries,
            "Analyzing your question and generating search queries...",
        );
        self.journal.info("Generating search queries");

        let count = num_searches as usize;
        let model = self.model;
        let mut queries = with_model_timeout(
            self.settings.model_timeout,
            ModelStage::QueryGeneration,
            model.generate_queries(self.question, count),
        )
        .await?;
        queries.retain(|query| !query.trim().is_empty());
        queries.truncate(count);

        if queries.is_empty() {
            self.journal.error("Language model returned no search queries");
            return Err(ResearchError::NoQueriesGenerated);
        }

        self.journal
            .info(format!("Generated {} queries: {queries:?}", queries.len()));
        self.progress.emit(
            ProgressStatus::QueriesGenerated,
            format!("Generated {} targeted search queries", queries.len()),
        );
        Ok(queries)
    }

    async fn gather(&mut self, queries: &[String]) -> Result<(), ResearchError> {
        let total = queries.len();
        let mut failures = 0;

        for (index, query) in queries.iter().enumerate() {
            let position = index + 1;
            self.progress.emit(
                ProgressStatus::Searching,
                format!(
                    "Searching for: \"{}\" ({position}/{total})",
                    preview(query, PREVIEW_LEN)
                ),
            );
            self.journal
                .info(format!("Searching for query {position}/{total}: {query}"));

            let results = match self.search(query, self.settings.results_per_query).await {
                Ok(results) => {
                    self.progress.emit(
                        ProgressStatus::SearchComplete,
                        format!(
                            "Found {} results for search {position}/{total}",
                            results.len()
                        ),
                    );
                    results
                }
                Err(err) => {
                    failures += 1;
                    if self.settings.fail_when_all_searches_fail && failures == total {
                        self.journal
                            .error(format!("All {total} searches failed; last error: {err}"));
                        return Err(ResearchError::Search(err));
                    }
                    self.degrade(SearchPhase::Initial, query, &err);
                    Vec::new()
                }
            };

            self.analyze_into_step(query, results).await?;
        }

        Ok(())
    }

    async fn extra_research(&mut self, topics: Vec<String>) -> Result<(), ResearchError> {
        let total = topics.len();
        self.progress.emit(
            ProgressStatus::ExtraResearch,
            format!("Researching {total} missing topics"),
        );
        self.journal
            .info(format!("Researching missing topics: {topics:?}"));

        for (index, topic) in topics.iter().enumerate() {
            let position = index + 1;
            self.progress.emit(
                ProgressStatus::Searching,
                format!(
                    "Searching missing topic: \"{}\" ({position}/{total})",
                    preview(topic, PREVIEW_LEN)
                ),
            );

            let results = match self.search(topic, self.settings.results_per_topic).await {
                Ok(results) => {
                    self.progress.emit(
                        ProgressStatus::SearchComplete,
                        format!(
                            "Found {} results for topic {position}/{total}",
                            results.len()
                        ),
                    );
                    results
                }
                Err(err) => {
                    self.degrade(SearchPhase::Extra, topic, &err);
                    Vec::new()
                }
            };

            self.analyze_into_step(topic, results).await?;
        }

        self.progress.emit(
            ProgressStatus::ExtraResearchComplete,
            format!(
                "Additional research complete; {} research steps available",
                self.evidence.len()
            ),
        );
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchBackendError> {
        let limit = self.settings.search_timeout;
        match timeout(limit, self.search.search(query, max_results)).await {
            Ok(result) => result,
            Err(_) => Err(SearchBackendError::Timeout(limit)),
        }
    }

    fn degrade(&mut self, phase: SearchPhase, query: &str, err: &SearchBackendError) {
        let ordinal = self.evidence.next_ordinal();
        let reason = match err {
            SearchBackendError::Timeout(_) => "timeout",
            _ => "error",
        };
        metrics::record_degraded_search(phase.as_str(), reason);

        self.journal.warn(format!(
            "Search failed for step {ordinal} (\"{query}\"): {err}; continuing with no results"
        ));
        self.progress.emit(
            ProgressStatus::SearchFailed,
            format!(
                "Search failed for \"{}\"; continuing without results",
                preview(query, PREVIEW_LEN)
            ),
        );
    }

    async fn analyze_into_step(
        &mut self,
        query: &str,
        results: Vec<SearchResult>,
    ) -> Result<usize, ResearchError> {
        let ordinal = self.evidence.next_ordinal();
        self.progress.emit(
            ProgressStatus::Analyzing,
            format!(
                "Analyzing {} sources for: \"{}\"",
                results.len(),
                preview(query, PREVIEW_LEN)
            ),
        );

        let model = self.model;
        let analysis = with_model_timeout(
            self.settings.model_timeout,
            ModelStage::Analysis,
            model.analyze(query, &results),
        )
        .await?;

        let appended = self.evidence.append(query, results, analysis);
        debug!(session_id = %self.session_id, ordinal = appended, %query, "research step recorded");
        self.journal
            .info(format!("Completed analysis for step {ordinal}"));
        self.progress.emit(
            ProgressStatus::AnalysisComplete,
            format!("Completed analysis for step {ordinal}"),
        );
        Ok(appended)
    }

    async fn produce_answer(&mut self, plan: AnswerPlan) -> Result<String, ResearchError> {
        match plan {
            AnswerPlan::Synthesize => self.synthesize().await,
            AnswerPlan::Regenerate(guidance) => {
                self.progress.emit(
                    ProgressStatus::Regenerating,
                    "Regenerating the answer with evaluator guidance...",
                );
                self.journal
                    .info(format!("Regenerating answer with guidance: {guidance}"));

                let model = self.model;
                with_model_timeout(
                    self.settings.model_timeout,
                    ModelStage::Regeneration,
                    model.regenerate_with_guidance(
                        self.question,
                        self.evidence.digests(),
                        &guidance,
                    ),
                )
                .await
            }
            AnswerPlan::ResearchThenSynthesize(topics) => {
                self.extra_research(topics).await?;
                self.synthesize().await
            }
        }
    }

    async fn synthesize(&mut self) -> Result<String, ResearchError> {
        self.progress.emit(
            ProgressStatus::Synthesizing,
            format!(
                "Synthesizing an answer from {} research analyses...",
                self.evidence.len()
            ),
        );
        self.journal.info("Synthesizing final answer");

        let model = self.model;
        with_model_timeout(
            self.settings.model_timeout,
            ModelStage::Synthesis,
            model.synthesize(self.question, self.evidence.digests()),
        )
        .await
    }

    async fn evaluate(
        &mut self,
        attempt: u32,
        max_attempts: u32,
        answer: &str,
    ) -> Result<EvaluationAttempt, ResearchError> {
        self.progress.emit(
            ProgressStatus::Evaluating,
            format!("Evaluating answer quality (attempt {attempt}/{max_attempts})"),
        );

        let model = self.model;
        let payload = with_model_timeout(
            self.settings.model_timeout,
            ModelStage::Evaluation,
            model.judge(self.question, answer, self.evidence.judge_context()),
        )
        .await?;

        let (result, fallback) = match decode_verdict(&payload) {
            Ok(result) => (result, false),
            Err(err) => {
                metrics::record_judge_fallback();
                self.journal.warn(format!(
                    "Judge payload could not be decoded on attempt {attempt}: {err}; defaulting to sufficient"
                ));
                (EvaluationResult::fail_open(&err), true)
            }
        };

        self.journal.info(format!(
            "Attempt {attempt}/{max_attempts}: action={} overall={:.1}",
            result.action.as_str(),
            result.overall_score()
        ));
        self.progress.emit(
            ProgressStatus::Verdict,
            format!(
                "Attempt {attempt}/{max_attempts}: {} (score {:.1}/10)",
                result.action.as_str(),
                result.overall_score()
            ),
        );

        Ok(EvaluationAttempt {
            attempt,
            result,
            fallback,
            created_at: Utc::now(),
        })
    }

    fn finish(
        self,
        outcome: Result<Conclusion, ResearchError>,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> Result<Session, ResearchError> {
        let SessionRun {
            question,
            session_id,
            mut journal,
            progress,
            evidence,
            ..
        } = self;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Conclusion {
                answer,
                evaluations,
            }) => {
                let iterations = evaluations.len() as u32;
                let session = Session {
                    id: session_id,
                    question: question.to_string(),
                    steps: evidence.into_steps(),
                    answer,
                    evaluation: evaluations.last().map(|attempt| attempt.result.clone()),
                    evaluations,
                    iterations,
                    started_at,
                    finished_at: Utc::now(),
                };

                metrics::record_session("completed", duration_ms, iterations, session.total_steps());
                journal.info(format!(
                    "Research completed with {} steps after {iterations} evaluation attempts",
                    session.total_steps()
                ));
                progress.emit(
                    ProgressStatus::Completed,
                    "Research completed! Comprehensive answer ready.",
                );
                journal.close("completed");
                Ok(session)
            }
            Err(err) => {
                metrics::record_session(err.kind(), duration_ms, 0, evidence.len());
                journal.error(format!("Research failed: {err}"));
                progress.emit(ProgressStatus::Error, format!("Research failed: {err}"));
                journal.close("failed");
                Err(err)
            }
        }
    }
}

async fn with_model_timeout<T>(
    limit: Duration,
    stage: ModelStage,
    call: impl Future<Output = Result<T, ModelBackendError>>,
) -> Result<T, ResearchError> {
    match timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ResearchError::model(stage, err)),
        Err(_) => Err(ResearchError::model(stage, ModelBackendError::Timeout(limit))),
    }
}
