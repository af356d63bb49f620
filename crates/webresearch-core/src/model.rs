//! Records produced and consumed by the research loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Neutral score used for every metric of the fail-open verdict.
pub const FALLBACK_SCORE: f64 = 7.0;

const METRIC_MIN: f64 = 0.0;
const METRIC_MAX: f64 = 10.0;

/// A single hit returned by a search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// One query's search-and-analysis record within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchStep {
    pub ordinal: usize,
    pub query: String,
    pub results: Vec<SearchResult>,
    pub analysis: String,
    pub created_at: DateTime<Utc>,
}

/// The `{query, analysis}` pair handed to answer synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDigest {
    pub query: String,
    pub analysis: String,
}

/// Corrective action chosen by the judge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[serde(alias = "sufficient_return")]
    Sufficient,
    #[serde(alias = "redo_final_response")]
    RedoResponse,
    ResearchAgain,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Sufficient => "sufficient",
            Action::RedoResponse => "redo_response",
            Action::ResearchAgain => "research_again",
        }
    }

    /// Parse an action name, accepting the legacy judge vocabulary.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sufficient" | "sufficient_return" => Some(Action::Sufficient),
            "redo_response" | "redo_final_response" => Some(Action::RedoResponse),
            "research_again" => Some(Action::ResearchAgain),
            _ => None,
        }
    }
}

/// Five quality scores, each clamped to `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub completeness: f64,
    pub relevance: f64,
    pub clarity: f64,
    pub confidence: f64,
}

impl EvaluationMetrics {
    pub fn new(
        accuracy: f64,
        completeness: f64,
        relevance: f64,
        clarity: f64,
        confidence: f64,
    ) -> Self {
        Self {
            accuracy: clamp_metric(accuracy),
            completeness: clamp_metric(completeness),
            relevance: clamp_metric(relevance),
            clarity: clamp_metric(clarity),
            confidence: clamp_metric(confidence),
        }
    }

    pub fn uniform(score: f64) -> Self {
        Self::new(score, score, score, score, score)
    }

    pub fn mean(&self) -> f64 {
        (self.accuracy + self.completeness + self.relevance + self.clarity + self.confidence) / 5.0
    }
}

fn clamp_metric(value: f64) -> f64 {
    value.clamp(METRIC_MIN, METRIC_MAX)
}

/// Verdict of one judge call.
///
/// `overall_score` is derived from the metrics at construction time and is
/// not settable from outside the crate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub action: Action,
    pub metrics: EvaluationMetrics,
    overall_score: f64,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_guidance: Option<String>,
}

impl EvaluationResult {
    pub fn new(action: Action, metrics: EvaluationMetrics, reasoning: impl Into<String>) -> Self {
        Self {
            action,
            metrics,
            overall_score: metrics.mean(),
            reasoning: reasoning.into(),
            missing_topics: None,
            improvement_guidance: None,
        }
    }

    pub fn with_missing_topics(mut self, topics: Vec<String>) -> Self {
        self.missing_topics = Some(topics);
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.improvement_guidance = Some(guidance.into());
        self
    }

    /// The verdict substituted when the judge payload cannot be decoded.
    pub fn fail_open(reason: impl std::fmt::Display) -> Self {
        Self::new(
            Action::Sufficient,
            EvaluationMetrics::uniform(FALLBACK_SCORE),
            format!("Evaluation parsing failed, defaulting to sufficient ({reason})"),
        )
    }

    pub fn overall_score(&self) -> f64 {
        self.overall_score
    }

    pub fn topics(&self) -> &[String] {
        self.missing_topics.as_deref().unwrap_or_default()
    }
}

/// One entry of the evaluation audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationAttempt {
    pub attempt: u32,
    pub result: EvaluationResult,
    /// True when `result` is the fail-open default rather than a decoded verdict.
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

/// One complete invocation of the research loop for a single question.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub question: String,
    pub steps: Vec<ResearchStep>,
    pub answer: String,
    pub evaluation: Option<EvaluationResult>,
    pub evaluations: Vec<EvaluationAttempt>,
    pub iterations: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Session {
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Unique source URLs in first-seen order.
    pub fn sources(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.steps
            .iter()
            .flat_map(|step| step.results.iter())
            .filter(|result| !result.url.is_empty())
            .filter(|result| seen.insert(result.url.as_str()))
            .map(|result| result.url.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_score_is_mean_of_metrics() {
        let metrics = EvaluationMetrics::new(8.0, 6.0, 9.0, 7.0, 5.0);
        let result = EvaluationResult::new(Action::RedoResponse, metrics, "ok");
        assert!((result.overall_score() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn metrics_are_clamped_into_range() {
        let metrics = EvaluationMetrics::new(12.0, -3.0, 10.0, 0.0, 5.5);
        assert_eq!(metrics.accuracy, 10.0);
        assert_eq!(metrics.completeness, 0.0);
        let result = EvaluationResult::new(Action::Sufficient, metrics, "");
        assert!((result.overall_score() - 5.1).abs() < 1e-9);
    }

    #[test]
    fn fail_open_is_sufficient_with_neutral_scores() {
        let result = EvaluationResult::fail_open("bad json");
        assert_eq!(result.action, Action::Sufficient);
        assert_eq!(result.metrics, EvaluationMetrics::uniform(7.0));
        assert!((result.overall_score() - 7.0).abs() < 1e-9);
        assert!(result.reasoning.contains("parsing failed"));
    }

    #[test]
    fn legacy_action_names_are_accepted() {
        assert_eq!(Action::parse("sufficient_return"), Some(Action::Sufficient));
        assert_eq!(
            Action::parse("redo_final_response"),
            Some(Action::RedoResponse)
        );
        assert_eq!(Action::parse(" Research_Again "), Some(Action::ResearchAgain));
        assert_eq!(Action::parse("shrug"), None);
    }

    #[test]
    fn topics_default_to_empty() {
        let result = EvaluationResult::new(Action::ResearchAgain, EvaluationMetrics::uniform(3.0), "");
        assert!(result.topics().is_empty());
        let result = result.with_missing_topics(vec!["topic A".into()]);
        assert_eq!(result.topics(), ["topic A".to_string()]);
    }
}
