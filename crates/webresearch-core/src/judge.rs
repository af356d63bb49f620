//! Typed decoding of the judge's structured verdict.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::JudgeParseError;
use crate::model::{Action, EvaluationMetrics, EvaluationResult};

/// Name of the function tool the judge is asked to call.
pub const JUDGE_TOOL_NAME: &str = "evaluate_answer";

#[derive(Debug, Deserialize)]
struct VerdictPayload {
    action: String,
    accuracy: f64,
    completeness: f64,
    relevance: f64,
    clarity: f64,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    missing_topics: Option<Vec<String>>,
    #[serde(default)]
    improvement_guidance: Option<String>,
}

/// Decode a judge payload into an [`EvaluationResult`].
///
/// Any overall score present in the payload is ignored; the result always
/// derives it from the five metrics.
pub fn decode_verdict(payload: &str) -> Result<EvaluationResult, JudgeParseError> {
    let raw: VerdictPayload = serde_json::from_str(strip_code_fence(payload))?;

    let action =
        Action::parse(&raw.action).ok_or_else(|| JudgeParseError::UnknownAction(raw.action.clone()))?;

    let metrics = EvaluationMetrics::new(
        raw.accuracy,
        raw.completeness,
        raw.relevance,
        raw.clarity,
        raw.confidence,
    );
    let mut result = EvaluationResult::new(action, metrics, raw.reasoning);

    if let Some(topics) = raw.missing_topics {
        let topics: Vec<String> = topics
            .into_iter()
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect();
        if !topics.is_empty() {
            result = result.with_missing_topics(topics);
        }
    }

    if let Some(guidance) = raw.improvement_guidance {
        if !guidance.trim().is_empty() {
            result = result.with_guidance(guidance.trim());
        }
    }

    Ok(result)
}

// Some backends wrap tool arguments in a markdown fence when tools are unsupported.
fn strip_code_fence(payload: &str) -> &str {
    let trimmed = payload.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// OpenAI function-tool definition describing the verdict payload.
pub fn judge_tool_schema() -> Value {
    let metric = |description: &str| {
        json!({
            "type": "number",
            "minimum": 0,
            "maximum": 10,
            "description": description,
        })
    };

    json!({
        "type": "function",
        "function": {
            "name": JUDGE_TOOL_NAME,
            "description": "Evaluate the quality of an answer based on multiple metrics.",
            "parameters": {
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["sufficient", "redo_response", "research_again"],
                        "description": "Action to take: sufficient, redo_response, or research_again",
                    },
                    "accuracy": metric("How factually accurate is the response (0-10)"),
                    "completeness": metric("How complete is the response (0-10)"),
                    "relevance": metric("How relevant is the response to the question (0-10)"),
                    "clarity": metric("How clear and well-structured is the response (0-10)"),
                    "confidence": metric("Overall confidence in the response quality (0-10)"),
                    "reasoning": {
                        "type": "string",
                        "description": "Explanation for the evaluation decision",
                    },
                    "missing_topics": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Topics that need more research",
                    },
                    "improvement_guidance": {
                        "type": "string",
                        "description": "Specific guidance for improving the answer",
                    },
                },
                "required": [
                    "action", "accuracy", "completeness", "relevance",
                    "clarity", "confidence", "reasoning"
                ],
            },
        },
    })
}
