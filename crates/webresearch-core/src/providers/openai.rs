//! OpenAI-compatible `/chat/completions` backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{LanguageModel, render_digests, render_results};
use crate::config::LlmConfig;
use crate::error::ModelBackendError;
use crate::judge::{JUDGE_TOOL_NAME, judge_tool_schema};
use crate::model::{SearchResult, StepDigest};
use crate::security::SecretValue;

const QUERY_TEMPERATURE: f64 = 0.3;
const ANALYSIS_TEMPERATURE: f64 = 0.5;
const SYNTHESIS_TEMPERATURE: f64 = 0.6;
const JUDGE_TEMPERATURE: f64 = 0.2;

const JUDGE_SYSTEM_PROMPT: &str = "You are an expert evaluator. Evaluate the quality of the provided answer based on the original question and research context.

Evaluation criteria:
- Accuracy (0-10): How factually correct is the information?
- Completeness (0-10): Does it fully address all aspects of the question?
- Relevance (0-10): How well does it directly answer what was asked?
- Clarity (0-10): Is it well-structured and easy to understand?
- Confidence (0-10): Overall quality and trustworthiness

Actions:
- sufficient: Answer is good enough (average score >= 7.0)
- redo_response: Answer needs improvement but research is sufficient (average score 5.0-6.9); provide improvement_guidance
- research_again: More research needed (average score < 5.0 or missing key information); list missing_topics

Be honest and critical in your evaluation.";

pub struct OpenAiCompatibleModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
    max_tokens: u32,
}

impl OpenAiCompatibleModel {
    pub fn new(
        config: &LlmConfig,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, ModelBackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ModelBackendError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
        })
    }

    async fn complete(
        &self,
        system: &str,
        user: String,
        temperature: f64,
        tools: Option<Value>,
    ) -> Result<String, ModelBackendError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut payload = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": temperature,
            "max_tokens": self.max_tokens,
        });
        if let Some(tools) = tools {
            payload["tools"] = json!([tools]);
            payload["tool_choice"] = json!({
                "type": "function",
                "function": { "name": JUDGE_TOOL_NAME },
            });
        }

        debug!(%url, model = %self.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&payload)
            .send()
            .await
            .map_err(|err| ModelBackendError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelBackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|err| ModelBackendError::Decode(err.to_string()))?;

        extract_message(&data)
    }
}

/// Pull the tool-call arguments, or else the text content, out of a completion.
fn extract_message(data: &Value) -> Result<String, ModelBackendError> {
    let message = data
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or(ModelBackendError::EmptyResponse)?;

    let arguments = message
        .get("tool_calls")
        .and_then(|calls| calls.as_array())
        .and_then(|calls| calls.first())
        .and_then(|call| call.get("function"))
        .and_then(|function| function.get("arguments"))
        .and_then(|arguments| arguments.as_str());
    if let Some(arguments) = arguments {
        return Ok(arguments.to_string());
    }

    Ok(message
        .get("content")
        .and_then(|content| content.as_str())
        .unwrap_or_default()
        .to_string())
}

/// Split the model's line-oriented query list into clean queries.
fn parse_queries(raw: &str, count: usize) -> Vec<String> {
    raw.lines()
        .map(strip_list_marker)
        .map(|line| line.trim_matches('"').trim())
        .filter(|line| !line.is_empty())
        .take(count)
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim();
    // A marker only counts when whitespace follows it, so "1.5 degrees" survives.
    if let Some(rest) = line
        .strip_prefix(['-', '*', '•'])
        .filter(|rest| rest.starts_with(char::is_whitespace))
    {
        return rest.trim_start();
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0
        && let Some(rest) = line[digits..]
            .strip_prefix(['.', ')'])
            .filter(|rest| rest.starts_with(char::is_whitespace))
    {
        return rest.trim_start();
    }
    line
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn generate_queries(
        &self,
        question: &str,
        count: usize,
    ) -> Result<Vec<String>, ModelBackendError> {
        let system = format!(
            "You are a research assistant. Generate {count} specific search queries to thoroughly research the given question. Return only the queries, one per line."
        );
        let raw = self
            .complete(&system, format!("Question: {question}"), QUERY_TEMPERATURE, None)
            .await?;
        Ok(parse_queries(&raw, count))
    }

    async fn analyze(
        &self,
        query: &str,
        results: &[SearchResult],
    ) -> Result<String, ModelBackendError> {
        let user = format!(
            "Query: {query}\n\nSearch Results:\n{}",
            render_results(results)
        );
        self.complete(
            "You are a research analyst. Analyze the search results and extract the most relevant information for the query. Be concise but comprehensive.",
            user,
            ANALYSIS_TEMPERATURE,
            None,
        )
        .await
    }

    async fn synthesize(
        &self,
        question: &str,
        steps: &[StepDigest],
    ) -> Result<String, ModelBackendError> {
        let user = format!(
            "Question: {question}\n\nResearch Data:\n{}",
            render_digests(steps)
        );
        self.complete(
            "You are a research expert. Based on the research data provided, give a comprehensive answer to the user's question. Cite relevant information and be factual.",
            user,
            SYNTHESIS_TEMPERATURE,
            None,
        )
        .await
    }

    async fn regenerate_with_guidance(
        &self,
        question: &str,
        steps: &[StepDigest],
        guidance: &str,
    ) -> Result<String, ModelBackendError> {
        let system = format!(
            "You are a research expert. Based on the research data provided, give a comprehensive answer to the user's question.\n\nIMPORTANT: Pay special attention to this improvement guidance: {guidance}\n\nCite relevant information and be factual. Ensure your answer addresses the specific areas for improvement mentioned in the guidance."
        );
        let user = format!(
            "Question: {question}\n\nResearch Data:\n{}",
            render_digests(steps)
        );
        self.complete(&system, user, SYNTHESIS_TEMPERATURE, None)
            .await
    }

    async fn judge(
        &self,
        question: &str,
        answer: &str,
        context: &str,
    ) -> Result<String, ModelBackendError> {
        let user = format!(
            "Original Question: {question}\n\nAnswer to Evaluate:\n{answer}\n\nResearch Context:\n{context}\n\nPlease evaluate this answer and provide your assessment."
        );
        self.complete(
            JUDGE_SYSTEM_PROMPT,
            user,
            JUDGE_TEMPERATURE,
            Some(judge_tool_schema()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn model_for(server: &MockServer) -> OpenAiCompatibleModel {
        let config = LlmConfig {
            base_url: format!("{}/v1/", server.uri()),
            model: "test-model".into(),
            ..LlmConfig::default()
        };
        OpenAiCompatibleModel::new(&config, SecretValue::new("sk-test"), Duration::from_secs(5))
            .expect("client builds")
    }

    fn content_reply(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        }))
    }

    #[test]
    fn query_lines_are_cleaned_and_truncated() {
        let raw = "1. solar panel efficiency\n\n- \"wind turbine costs\"\n* grid storage\n2) hydro";
        assert_eq!(
            parse_queries(raw, 3),
            vec!["solar panel efficiency", "wind turbine costs", "grid storage"]
        );
    }

    #[test]
    fn numeric_queries_are_not_mangled() {
        assert_eq!(parse_queries("2024 election turnout", 1), vec!["2024 election turnout"]);
    }

    #[test]
    fn decimal_queries_keep_their_leading_number() {
        assert_eq!(
            parse_queries(
                "1.5 degree warming target\n3.5 billion people without internet",
                2
            ),
            vec!["1.5 degree warming target", "3.5 billion people without internet"]
        );
        assert_eq!(
            parse_queries("1) -5 celsius records\n2.  arctic ice", 2),
            vec!["-5 celsius records", "arctic ice"]
        );
    }

    #[tokio::test]
    async fn generate_queries_posts_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({ "model": "test-model", "temperature": 0.3 })))
            .respond_with(content_reply("first query\nsecond query\nthird query"))
            .expect(1)
            .mount(&server)
            .await;

        let queries = model_for(&server)
            .generate_queries("What is photosynthesis?", 2)
            .await
            .expect("queries");
        assert_eq!(queries, vec!["first query", "second query"]);
    }

    #[tokio::test]
    async fn judge_returns_tool_call_arguments() {
        let server = MockServer::start().await;
        let arguments = r#"{"action":"sufficient","accuracy":8,"completeness":8,"relevance":8,"clarity":8,"confidence":8,"reasoning":"good"}"#;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "tool_choice": { "function": { "name": JUDGE_TOOL_NAME } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "type": "function",
                            "function": { "name": JUDGE_TOOL_NAME, "arguments": arguments }
                        }]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let payload = model_for(&server)
            .judge("q", "a", "Query: q\nAnalysis: a")
            .await
            .expect("judge payload");
        assert_eq!(payload, arguments);
    }

    #[tokio::test]
    async fn error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = model_for(&server)
            .synthesize("q", &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ModelBackendError::Status { status: 429, ref body } if body == "slow down"
        ));
    }

    #[tokio::test]
    async fn missing_choices_is_an_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = model_for(&server).analyze("q", &[]).await.unwrap_err();
        assert!(matches!(err, ModelBackendError::EmptyResponse));
    }
}
