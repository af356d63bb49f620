use chrono::{DateTime, Utc};
use serde::Serialize;
use webresearch_core::{EvaluationResult, Session};

#[derive(Debug, Clone, Serialize)]
pub struct StepPayload {
    pub ordinal: usize,
    pub query: String,
    pub analysis: String,
    pub timestamp: DateTime<Utc>,
    pub result_count: usize,
}

/// Wire shape of a finished session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPayload {
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub iterations: u32,
    pub research_steps: Vec<StepPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
    pub sources: Vec<String>,
}

impl From<&Session> for SessionPayload {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            question: session.question.clone(),
            answer: session.answer.clone(),
            iterations: session.iterations,
            research_steps: session
                .steps
                .iter()
                .map(|step| StepPayload {
                    ordinal: step.ordinal,
                    query: step.query.clone(),
                    analysis: step.analysis.clone(),
                    timestamp: step.created_at,
                    result_count: step.results.len(),
                })
                .collect(),
            evaluation: session.evaluation.clone(),
            sources: session.sources(),
        }
    }
}
