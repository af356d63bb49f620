use serde_json::json;
use webresearch_core::{
    Action, ConfigLoader, ResearchError, ResearchLoop, ResearchOptions, persist_report,
    read_session_log,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

async fn mount_llm(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "temperature": 0.3 })))
        .respond_with(completion("1. tidal forces of the moon\n2. solar tides"))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "temperature": 0.5 })))
        .respond_with(completion("The moon's gravity raises two tidal bulges."))
        .expect(2)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "temperature": 0.6 })))
        .respond_with(completion("Tides are caused mainly by the moon, with help from the sun."))
        .expect(1)
        .mount(server)
        .await;

    let verdict = json!({
        "action": "sufficient",
        "accuracy": 9, "completeness": 8, "relevance": 9, "clarity": 8, "confidence": 8,
        "reasoning": "Accurate and complete.",
        "overall_score": 1.0
    })
    .to_string();
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "temperature": 0.2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "type": "function",
                        "function": { "name": "evaluate_answer", "arguments": verdict }
                    }]
                }
            }]
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_search(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(body_partial_json(json!({ "api_key": "tvly-integration", "max_results": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "title": "Tides", "url": "https://ocean.example/tides", "content": "Tides rise and fall." },
                { "url": "https://ocean.example/moon", "content": "The moon pulls the ocean." }
            ]
        })))
        .expect(2)
        .mount(server)
        .await;
}

#[tokio::test]
async fn research_runs_end_to_end_over_http() {
    let llm = MockServer::start().await;
    let search = MockServer::start().await;
    mount_llm(&llm).await;
    mount_search(&search).await;

    let temp = tempfile::TempDir::new().expect("temp dir");
    unsafe {
        std::env::set_var("WEBRESEARCH_IT_LLM_KEY", "sk-integration");
        std::env::set_var("WEBRESEARCH_IT_SEARCH_KEY", "tvly-integration");
    }

    let config = ConfigLoader::parse(&format!(
        r#"
        [llm]
        base_url = "{}/v1"
        api_key_env = "WEBRESEARCH_IT_LLM_KEY"

        [search]
        base_url = "{}"
        api_key_env = "WEBRESEARCH_IT_SEARCH_KEY"

        [research]
        num_searches = 2
        num_rewordings = 2

        [logging]
        dir = "{}"
        "#,
        llm.uri(),
        search.uri(),
        temp.path().join("logs").display()
    ))
    .expect("config parses");

    let research = ResearchLoop::from_config(&config).expect("providers build");
    let session = research
        .research(
            "What causes ocean tides?",
            ResearchOptions::from_config(&config.research),
        )
        .await
        .expect("session completes");

    assert_eq!(session.total_steps(), 2);
    assert_eq!(session.steps[0].query, "tidal forces of the moon");
    assert_eq!(session.steps[1].query, "solar tides");
    assert_eq!(session.steps[0].results[1].title, "No title");
    assert_eq!(
        session.sources(),
        vec!["https://ocean.example/tides", "https://ocean.example/moon"]
    );
    assert_eq!(
        session.answer,
        "Tides are caused mainly by the moon, with help from the sun."
    );

    let evaluation = session.evaluation.as_ref().expect("evaluated");
    assert_eq!(evaluation.action, Action::Sufficient);
    assert!((evaluation.overall_score() - 8.4).abs() < 1e-9);

    let journal = read_session_log(&temp.path().join("logs"), &session.id)
        .expect("journal readable")
        .expect("journal exists");
    assert!(journal.contains("Session closed: completed"));
    assert!(!journal.contains("sk-integration"));

    let report = persist_report(temp.path().join("output"), &session).expect("report saved");
    let contents = std::fs::read_to_string(report).expect("report readable");
    assert!(contents.contains("Overall Score: 8.4/10"));
}

#[tokio::test]
async fn missing_secret_is_reported_before_any_request() {
    let config = ConfigLoader::parse(
        r#"
        [llm]
        api_key_env = "WEBRESEARCH_IT_ABSENT_KEY"
        "#,
    )
    .expect("config parses");
    unsafe { std::env::remove_var("WEBRESEARCH_IT_ABSENT_KEY") };

    let err = match ResearchLoop::from_config(&config) {
        Ok(_) => panic!("expected a missing secret"),
        Err(err) => err,
    };
    assert!(matches!(err, ResearchError::MissingSecret(var) if var == "WEBRESEARCH_IT_ABSENT_KEY"));
}
