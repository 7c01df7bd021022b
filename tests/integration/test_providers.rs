//! Integration tests running the loop against local stand-ins for the chat
//! completions and search HTTP APIs.
//!
//! The stubs are small axum routers bound to ephemeral ports, so these tests
//! need no network access or API keys. Code execution is still scripted.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use reflex_orchestrator::testing::ScriptedSandbox;
use reflex_orchestrator::{
    Budget, Collaborator, Driver, LlmConfig, OpenAiGenerator, RetryController, RunOutcome,
    SearchConfig, StepEvent, TavilySearch,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Requests captured by a stub, in arrival order.
type Captured = Arc<Mutex<Vec<Value>>>;

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    format!("http://{addr}")
}

fn completion(prefix: &str, imports: &str, code: &str) -> Value {
    let content = json!({ "prefix": prefix, "imports": imports, "code": code }).to_string();
    json!({
        "choices": [
            { "index": 0, "message": { "role": "assistant", "content": content } }
        ]
    })
}

/// Chat stub answering with a broken solution first and a working one after.
async fn chat_stub(captured: Captured) -> String {
    async fn handler(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
        let count = {
            let mut requests = captured.lock().expect("lock");
            requests.push(body);
            requests.len()
        };
        if count == 1 {
            Json(completion("Reads the total", "", "print(totl)"))
        } else {
            Json(completion("Prints the total", "", "total = 6\nprint(total)"))
        }
    }

    serve(
        Router::new()
            .route("/v1/chat/completions", post(handler))
            .with_state(captured),
    )
    .await
}

async fn search_stub(captured: Captured) -> String {
    async fn handler(State(captured): State<Captured>, Json(body): Json<Value>) -> Json<Value> {
        captured.lock().expect("lock").push(body);
        Json(json!({
            "query": "ignored",
            "results": [
                {
                    "title": "NameError in Python",
                    "url": "https://docs.python.org/3/library/exceptions.html#NameError",
                    "content": "Raised when a local or global name is not found."
                }
            ]
        }))
    }

    serve(
        Router::new()
            .route("/search", post(handler))
            .with_state(captured),
    )
    .await
}

fn llm_config(base_url: String) -> LlmConfig {
    LlmConfig {
        base_url: format!("{base_url}/v1"),
        model: "stub-model".to_string(),
        timeout_seconds: 5,
        ..LlmConfig::default()
    }
}

fn search_config(base_url: String) -> SearchConfig {
    SearchConfig {
        base_url,
        max_results: 3,
        timeout_seconds: 5,
        ..SearchConfig::default()
    }
}

#[tokio::test]
async fn test_loop_over_http_providers() {
    let chat_requests = Captured::default();
    let search_requests = Captured::default();
    let chat_url = chat_stub(Arc::clone(&chat_requests)).await;
    let search_url = search_stub(Arc::clone(&search_requests)).await;

    let generator = OpenAiGenerator::new(&llm_config(chat_url), "sk-test").expect("generator");
    let search = TavilySearch::new(&search_config(search_url), "tvly-test").expect("search");
    let sandbox = ScriptedSandbox::default()
        .fail_code_containing("totl", "NameError: name 'totl' is not defined");

    let driver = Driver::new(
        RetryController::new(generator, search, sandbox, Budget::new(1, 2))
            .with_search_feedback(true),
    );
    let trace = driver.run_to_completion("Print the total of 1, 2 and 3").await;

    assert_eq!(trace.outcome(), Some(&RunOutcome::Succeeded));
    let state = trace.final_state().expect("final state");
    assert_eq!(state.search_attempts(), 1);
    assert_eq!(state.total_generations(), 2);
    assert_eq!(
        state.current_solution.as_ref().map(|s| s.code.as_str()),
        Some("total = 6\nprint(total)")
    );

    let search_requests = search_requests.lock().expect("lock").clone();
    assert_eq!(search_requests.len(), 1);
    assert_eq!(search_requests[0]["query"], "NameError: name 'totl' is not defined");
    assert_eq!(search_requests[0]["max_results"], 3);
    assert_eq!(search_requests[0]["api_key"], "tvly-test");

    let chat_requests = chat_requests.lock().expect("lock").clone();
    assert_eq!(chat_requests.len(), 2);
    assert_eq!(chat_requests[0]["model"], "stub-model");

    // System prompt, question, first answer, failure notice, search notice.
    let messages = chat_requests[1]["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[1]["content"], "Print the total of 1, 2 and 3");
    assert_eq!(messages[2]["role"], "assistant");
    assert!(messages[3]["content"]
        .as_str()
        .is_some_and(|c| c.contains("name 'totl' is not defined")));
    assert!(messages[4]["content"].as_str().is_some_and(
        |c| c.starts_with("Web search results:") && c.contains("NameError in Python")
    ));
}

#[tokio::test]
async fn test_chat_api_outage_ends_run() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "upstream overloaded") }),
    );
    let chat_url = serve(router).await;

    let generator = OpenAiGenerator::new(&llm_config(chat_url), "sk-test").expect("generator");
    let search = TavilySearch::new(&search_config("http://127.0.0.1:1".to_string()), "unused")
        .expect("search");

    let driver = Driver::new(RetryController::new(
        generator,
        search,
        ScriptedSandbox::default(),
        Budget::default(),
    ));
    let trace = driver.run_to_completion("q").await;

    assert_eq!(trace.len(), 1);
    match &trace.snapshots[0].event {
        StepEvent::CollaboratorFailed {
            collaborator,
            cause,
        } => {
            assert_eq!(*collaborator, Collaborator::Generator);
            assert!(cause.contains("HTTP 503"), "{cause}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_search_api_ends_run() {
    let chat_url = chat_stub(Captured::default()).await;

    let generator = OpenAiGenerator::new(&llm_config(chat_url), "sk-test").expect("generator");
    let search = TavilySearch::new(&search_config("http://127.0.0.1:1".to_string()), "tvly-test")
        .expect("search");
    let sandbox =
        ScriptedSandbox::default().failing_execution("NameError: name 'totl' is not defined");

    let driver = Driver::new(RetryController::new(generator, search, sandbox, Budget::default()));
    let trace = driver.run_to_completion("q").await;

    assert!(matches!(
        trace.outcome(),
        Some(RunOutcome::CollaboratorFailed {
            collaborator: Collaborator::Search,
            ..
        })
    ));
    assert_eq!(trace.final_state().expect("final state").total_generations(), 1);
}
