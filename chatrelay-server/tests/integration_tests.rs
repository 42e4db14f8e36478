//! End-to-end tests for the `ChatRelay` HTTP surface with scripted providers.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use axum_test::TestServer;
use futures::{StreamExt, stream};
use serde_json::{Value, json};
use server::{
    app_state::AppState,
    server::{create_app_router, metrics_handle},
    services::{ChatStore, EventLog, InMemoryChatStore, ProviderRegistry},
};
use shared::{
    config::{
        seed::{UserSeed, WorkspaceSeed},
        server::{Config, Profile},
    },
    llms::{
        ChatProvider, ChatRequest, Completion, LLMError, LLMResult, ProviderChunk,
        ProviderChunkStream, UsagePayload,
    },
};
use tower::ServiceExt;
use uuid::Uuid;

/// One upstream item of a scripted stream.
#[derive(Clone, Copy)]
enum Step {
    Token(&'static str),
    Usage(u64, u64),
    Finish(&'static str),
    Fail(&'static str),
}

impl Step {
    fn chunk(self) -> LLMResult<ProviderChunk> {
        match self {
            Self::Token(token) => Ok(ProviderChunk::content(token)),
            Self::Usage(prompt, completion) => {
                Ok(ProviderChunk::usage(Some(prompt), Some(completion)))
            }
            Self::Finish(reason) => Ok(ProviderChunk::finish(reason)),
            Self::Fail(reason) => Err(LLMError::Stream {
                reason: reason.into(),
            }),
        }
    }
}

/// What a scripted provider does once its stream is opened.
enum Script {
    Steps(Vec<Step>),
    /// Yields one token, then waits forever.
    Hang(Arc<AtomicBool>),
}

struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Flags the upstream as released when the hanging stream is dropped.
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn stream_chat(&self, _request: ChatRequest) -> LLMResult<ProviderChunkStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Steps(steps) => {
                let chunks: Vec<_> = steps.iter().map(|step| step.chunk()).collect();
                Ok(Box::pin(stream::iter(chunks)))
            }
            Script::Hang(released) => {
                let guard = ReleaseFlag(Arc::clone(released));
                Ok(Box::pin(stream::unfold(
                    (guard, false),
                    |(guard, sent)| async move {
                        if sent {
                            std::future::pending::<()>().await;
                        }
                        Some((Ok(ProviderChunk::content("partial")), (guard, true)))
                    },
                )))
            }
        }
    }

    async fn chat_sync(&self, request: ChatRequest) -> LLMResult<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            text: format!("echo {}", request.prompt),
            finish_reason: None,
            usage: Some(UsagePayload {
                prompt_tokens: Some(4),
                completion_tokens: Some(2),
                total_tokens: Some(6),
            }),
        })
    }
}

#[derive(Default)]
struct RecordingEventLog {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingEventLog {
    fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn find(&self, name: &str) -> Option<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|(event, _)| event == name)
            .map(|(_, details)| details.clone())
    }
}

#[async_trait]
impl EventLog for RecordingEventLog {
    async fn log_event(
        &self,
        name: &str,
        details: Value,
        _actor_id: Option<Uuid>,
    ) -> anyhow::Result<()> {
        self.events.lock().unwrap().push((name.to_string(), details));
        Ok(())
    }
}

struct Harness {
    app: Router,
    provider: Arc<ScriptedProvider>,
    store: Arc<InMemoryChatStore>,
    events: Arc<RecordingEventLog>,
}

impl Harness {
    fn server(&self) -> TestServer {
        TestServer::new(self.app.clone()).expect("test server")
    }
}

async fn harness_with(script: Script, configure: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::default_for_profile(Profile::Test);
    configure(&mut config);

    let store = Arc::new(InMemoryChatStore::from_seeds(&[
        WorkspaceSeed::new("docs", "Docs").with_thread("t1")
    ]));
    let provider = ScriptedProvider::new(script);
    let events = Arc::new(RecordingEventLog::default());

    let state = AppState::builder(config)
        .with_store(store.clone())
        .with_providers(
            ProviderRegistry::new("scripted").with_provider("scripted", provider.clone()),
        )
        .with_event_log(events.clone())
        .build()
        .await
        .expect("app state");

    Harness {
        app: create_app_router(Arc::new(state), metrics_handle()),
        provider,
        store,
        events,
    }
}

async fn harness(script: Script) -> Harness {
    harness_with(script, |_| {}).await
}

fn tokens(chunks: &[&'static str], finish: Option<&'static str>) -> Script {
    let mut steps: Vec<Step> = chunks.iter().copied().map(Step::Token).collect();
    if let Some(reason) = finish {
        steps.push(Step::Finish(reason));
    }
    Script::Steps(steps)
}

fn frames(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let payload = frame.strip_prefix("data: ").expect("data frame");
            serde_json::from_str(payload).expect("json frame")
        })
        .collect()
}

fn terminal_count(events: &[Value]) -> usize {
    events
        .iter()
        .filter(|event| event["close"] == true)
        .count()
}

#[tokio::test]
async fn stream_chat_relays_tokens_then_exactly_one_terminal_event() {
    let h = harness(tokens(&["Hel", "lo"], Some("stop"))).await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .json(&json!({ "message": "Hi" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "text/event-stream");
    assert_eq!(response.header(header::CACHE_CONTROL), "no-cache");
    assert_eq!(response.header(header::CONNECTION), "keep-alive");
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN), "*");

    let events = frames(&response.text());
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["textResponse"], "Hel");
    assert_eq!(events[1]["textResponse"], "lo");
    assert_eq!(events[2]["close"], true);
    assert_eq!(events[2]["type"], "textResponseChunk");
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().all(|event| event["id"] == events[0]["id"]));

    assert_eq!(h.store.chat_count().await, 1);
    let end = h.events.find("StreamEnd").expect("stream_end logged");
    assert_eq!(end["fullText"], "Hello");
    assert!(h.events.names().contains(&"sent_chat".to_string()));
}

#[tokio::test]
async fn stream_without_finish_reason_still_terminates_once() {
    let h = harness(tokens(&["only"], None)).await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .json(&json!({ "message": "Hi" }))
        .await;

    let events = frames(&response.text());
    assert_eq!(events.len(), 2);
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn empty_message_is_rejected_without_calling_the_provider() {
    let h = harness(tokens(&["never"], Some("stop"))).await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .json(&json!({ "message": "" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["type"], "abort");
    assert_eq!(body["close"], true);
    assert_eq!(body["error"], "Message is empty.");
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn unknown_workspace_is_unauthorized_for_stream_chat() {
    let h = harness(tokens(&["x"], Some("stop"))).await;

    let response = h
        .server()
        .post("/api/workspace/missing/stream-chat")
        .json(&json!({ "message": "Hi" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn upstream_error_mid_stream_ends_with_single_abort() {
    let h = harness(Script::Steps(vec![
        Step::Token("par"),
        Step::Fail("connection reset"),
        Step::Token("ignored"),
    ]))
    .await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .json(&json!({ "message": "Hi" }))
        .await;

    let events = frames(&response.text());
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["textResponse"], "par");
    assert_eq!(events[1]["type"], "abort");
    assert!(events[1]["error"].is_string());
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn usage_reported_by_upstream_is_logged_with_stream_end() {
    let h = harness(Script::Steps(vec![
        Step::Token("a"),
        Step::Token("b"),
        Step::Usage(12, 7),
        Step::Finish("stop"),
    ]))
    .await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .json(&json!({ "message": "Hi" }))
        .await;
    assert_eq!(terminal_count(&frames(&response.text())), 1);

    let end = h.events.find("StreamEnd").expect("stream_end logged");
    assert_eq!(end["usage"]["prompt_tokens"], 12);
    assert_eq!(end["usage"]["completion_tokens"], 7);
}

#[tokio::test]
async fn first_thread_message_renames_the_thread_after_the_terminal_event() {
    let h = harness(tokens(&["ok"], Some("stop"))).await;

    let response = h
        .server()
        .post("/api/workspace/docs/thread/t1/stream-chat")
        .json(&json!({ "message": "How do I configure the relay buffer?" }))
        .await;

    let events = frames(&response.text());
    assert_eq!(terminal_count(&events), 1);
    let rename = events.last().unwrap();
    assert_eq!(rename["type"], "action");
    assert_eq!(rename["action"], "rename_thread");
    assert_eq!(rename["thread"]["slug"], "t1");
    assert_eq!(rename["thread"]["name"], "How do I configure the…");

    let sent = h.events.find("sent_chat").expect("sent_chat logged");
    assert_eq!(sent["thread"], "How do I configure the…");
}

#[tokio::test]
async fn exhausted_quota_streams_a_single_abort() {
    let h = harness_with(tokens(&["never"], Some("stop")), |config| {
        config.features.multi_user_mode = true;
        config.users = vec![UserSeed {
            username: "ada".into(),
            token: "tok-ada".into(),
            daily_message_limit: Some(0),
        }];
    })
    .await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .add_header(header::AUTHORIZATION, "Bearer tok-ada")
        .json(&json!({ "message": "Hi" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let events = frames(&response.text());
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "abort");
    assert!(
        events[0]["error"]
            .as_str()
            .unwrap()
            .contains("24 hour chat quota of 0")
    );
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn multi_user_mode_requires_a_known_token() {
    let h = harness_with(tokens(&["x"], Some("stop")), |config| {
        config.features.multi_user_mode = true;
    })
    .await;

    let response = h
        .server()
        .post("/api/workspace/docs/stream-chat")
        .add_header(header::AUTHORIZATION, "Bearer nobody")
        .json(&json!({ "message": "Hi" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn client_disconnect_releases_the_upstream_stream() {
    let released = Arc::new(AtomicBool::new(false));
    let h = harness(Script::Hang(Arc::clone(&released))).await;

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/workspace/docs/stream-chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"message":"Hi"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(String::from_utf8_lossy(&first).contains("partial"));
    drop(body);

    tokio::time::timeout(Duration::from_secs(2), async {
        while !released.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("upstream released after disconnect");

    tokio::time::timeout(Duration::from_secs(2), async {
        while h.events.find("StreamEnd").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stream_end logged after disconnect");
    assert!(h.events.names().contains(&"StreamAborted".to_string()));
}

#[tokio::test]
async fn chat_history_lists_persisted_exchanges() {
    let h = harness(tokens(&["Hello"], Some("stop"))).await;
    let server = h.server();

    server
        .post("/api/workspace/docs/stream-chat")
        .json(&json!({ "message": "Hi" }))
        .await;

    let response = server.get("/api/workspace/docs/chats").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "user");
    assert_eq!(history[0]["content"], "Hi");
    assert_eq!(history[1]["role"], "assistant");
    assert_eq!(history[1]["content"], "Hello");
}

#[tokio::test]
async fn models_lists_one_entry_per_workspace() {
    let h = harness(tokens(&[], None)).await;

    let response = h.server().get("/api/v1/openai/models").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["model"], "docs");
    assert_eq!(data[0]["llm"]["provider"], "scripted");
    assert!(h.events.names().contains(&"api_get_models".to_string()));
}

#[tokio::test]
async fn sync_completion_returns_envelope() {
    let h = harness(tokens(&[], None)).await;

    let response = h
        .server()
        .post("/api/v1/openai/chat/completions")
        .json(&json!({
            "model": "docs",
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "user", "content": "ping" }
            ]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], "docs");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["choices"][0]["message"]["role"], "assistant");
    assert_eq!(body["choices"][0]["message"]["content"], "echo ping");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 6);
    assert_eq!(h.store.chat_count().await, 1);
}

#[tokio::test]
async fn completion_for_unknown_workspace_is_unauthorized() {
    let h = harness(tokens(&[], None)).await;

    let response = h
        .server()
        .post("/api/v1/openai/chat/completions")
        .json(&json!({
            "model": "nope",
            "messages": [{ "role": "user", "content": "ping" }]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(h.provider.calls(), 0);
    assert!(h.events.names().contains(&"workspace_error".to_string()));
}

#[tokio::test]
async fn streaming_completion_uses_the_relay_protocol() {
    let h = harness(tokens(&["po", "ng"], Some("stop"))).await;

    let response = h
        .server()
        .post("/api/v1/openai/chat/completions")
        .json(&json!({
            "model": "docs",
            "stream": true,
            "messages": [{ "role": "user", "content": "ping" }]
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header(header::CONTENT_TYPE), "text/event-stream");
    let events = frames(&response.text());
    assert_eq!(events.len(), 3);
    assert_eq!(terminal_count(&events), 1);
    assert!(h.events.names().contains(&"stream_complete".to_string()));
}

#[tokio::test]
async fn health_and_metrics_are_served_outside_the_api() {
    let h = harness(tokens(&[], None)).await;
    let server = h.server();

    assert_eq!(server.get("/healthz").await.status_code(), StatusCode::OK);
    assert_eq!(server.get("/readyz").await.status_code(), StatusCode::OK);
    assert_eq!(server.get("/metrics").await.status_code(), StatusCode::OK);

    let store: &dyn ChatStore = h.store.as_ref();
    assert_eq!(store.list_workspaces().await.unwrap().len(), 1);
}
