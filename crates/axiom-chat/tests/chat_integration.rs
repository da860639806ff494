#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axiom_chat::{
    ChatBackend, ChatOrchestrator, ChatRequest, ChatUpdate, ChunkStream, EndpointConfig,
    HttpChatBackend, Notification, NotificationLevel, Notifier, Phase, SubmitOutcome,
};
use axiom_core::{AxiomError, AxiomResult, Role};
use axiom_session::{FileKeyValueStore, MemoryKeyValueStore, SessionRegistry};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "pk-test";

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Notification>>);

impl RecordingNotifier {
    fn errors(&self) -> Vec<Notification> {
        self.0
            .lock()
            .iter()
            .filter(|n| n.level == NotificationLevel::Error)
            .cloned()
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.0.lock().push(notification);
    }
}

fn delta(text: &str) -> String {
    format!(
        "data: {}\n",
        serde_json::json!({"choices": [{"delta": {"content": text}}]})
    )
}

fn http_backend(server: &MockServer) -> Arc<HttpChatBackend> {
    let config = EndpointConfig::new(format!("{}/functions/v1/axiom-chat", server.uri()), API_KEY);
    Arc::new(HttpChatBackend::new(config).unwrap())
}

fn memory_registry() -> SessionRegistry {
    SessionRegistry::new(Arc::new(MemoryKeyValueStore::new()))
}

async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/functions/v1/axiom-chat"))
        .and(header("authorization", format!("Bearer {API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

// --- HTTP backend ---

#[tokio::test]
async fn test_backend_streams_body_with_bearer_token() {
    let server = MockServer::start().await;
    let body = format!("{}data: [DONE]\n", delta("hi"));
    mount_stream(&server, body.clone()).await;

    let backend = http_backend(&server);
    let request = ChatRequest { messages: vec![] };
    let mut stream = backend.open_stream(&request).await.unwrap();

    let mut received = Vec::new();
    while let Some(chunk) = stream.next().await {
        received.extend(chunk.unwrap());
    }
    assert_eq!(received, body.into_bytes());
}

#[tokio::test]
async fn test_backend_maps_error_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": {"message": "bad key"}})),
        )
        .mount(&server)
        .await;

    let err = match http_backend(&server)
        .open_stream(&ChatRequest { messages: vec![] })
        .await
    {
        Ok(_) => panic!("expected an HTTP error"),
        Err(e) => e,
    };
    match err {
        AxiomError::Http { status, message } => {
            assert_eq!(status, 401);
            assert_eq!(message, "bad key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_backend_falls_back_to_status_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let err = match http_backend(&server)
        .open_stream(&ChatRequest { messages: vec![] })
        .await
    {
        Ok(_) => panic!("expected an HTTP error"),
        Err(e) => e,
    };
    assert_eq!(err.user_message(), "Request failed with status 503");
}

// --- Orchestrator over HTTP ---

#[tokio::test]
async fn test_streamed_reply_accumulates() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        format!("{}{}data: [DONE]\n", delta("Hel"), delta("lo")),
    )
    .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let mut chat = ChatOrchestrator::new(http_backend(&server), memory_registry(), notifier.clone());

    let outcome = chat.submit("Say hello").await.unwrap();
    let SubmitOutcome::Completed { message_id, .. } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };

    let reply = chat.transcript().last().unwrap();
    assert_eq!(reply.id, message_id);
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "Hello");
    assert!(notifier.errors().is_empty());
}

#[tokio::test]
async fn test_rate_limited_request_fails_cleanly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "rate limited"})),
        )
        .mount(&server)
        .await;

    let notifier = Arc::new(RecordingNotifier::default());
    let mut chat = ChatOrchestrator::new(http_backend(&server), memory_registry(), notifier.clone());

    let outcome = chat.submit("hello?").await.unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Failed {
            error: AxiomError::Http { status: 400, .. }
        }
    ));
    assert_eq!(chat.phase(), Phase::Failed);
    assert!(chat
        .transcript()
        .iter()
        .all(|m| m.role != Role::Assistant));
    assert!(chat.registry().is_empty());

    let errors = notifier.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].description.contains("rate limited"));
}

#[tokio::test]
async fn test_resubmission_after_failure_sends_single_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "rate limited"})),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_stream(&server, format!("{}data: [DONE]\n", delta("ok"))).await;

    let mut chat = ChatOrchestrator::new(
        http_backend(&server),
        memory_registry(),
        Arc::new(RecordingNotifier::default()),
    );
    let first = chat.submit("hello").await.unwrap();
    assert!(matches!(first, SubmitOutcome::Failed { .. }));
    let second = chat.submit("hello").await.unwrap();
    assert!(matches!(second, SubmitOutcome::Completed { .. }));

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"messages": [{"role": "user", "content": "hello"}]})
    );

    let session = chat.registry().sessions().next().unwrap();
    let roles: Vec<_> = session.transcript.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_first_submission_creates_titled_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(serde_json::json!({
            "messages": [{"role": "user", "content": "Explain your decision-making process"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            format!("{}data: [DONE]\n", delta("I weigh options.")),
            "text/event-stream",
        ))
        .mount(&server)
        .await;

    let mut chat = ChatOrchestrator::new(
        http_backend(&server),
        memory_registry(),
        Arc::new(RecordingNotifier::default()),
    );
    assert!(chat.current_session().is_none());

    chat.submit("Explain your decision-making process")
        .await
        .unwrap();

    assert_eq!(chat.session_count(), 1);
    let session = chat.registry().sessions().next().unwrap();
    assert_eq!(Some(session.id), chat.current_session());
    assert_eq!(session.title, "Explain your decision-making p...");

    let roles: Vec<_> = session.transcript.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant]);
    assert_eq!(session.transcript.messages()[1].content, "I weigh options.");
}

#[tokio::test]
async fn test_follow_up_sends_full_transcript() {
    let server = MockServer::start().await;
    mount_stream(&server, format!("{}data: [DONE]\n", delta("ok"))).await;

    let mut chat = ChatOrchestrator::new(
        http_backend(&server),
        memory_registry(),
        Arc::new(RecordingNotifier::default()),
    );
    chat.submit("one").await.unwrap();
    chat.submit("two").await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let second: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(
        second,
        serde_json::json!({
            "messages": [
                {"role": "user", "content": "one"},
                {"role": "assistant", "content": "ok"},
                {"role": "user", "content": "two"}
            ]
        })
    );
}

#[tokio::test]
async fn test_network_error_is_reported() {
    // Nothing listens on port 1.
    let config = EndpointConfig::new("http://127.0.0.1:1/chat", API_KEY);
    let backend = Arc::new(HttpChatBackend::new(config).unwrap());

    let notifier = Arc::new(RecordingNotifier::default());
    let mut chat = ChatOrchestrator::new(backend, memory_registry(), notifier.clone());

    let outcome = chat.submit("anyone there?").await.unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Failed {
            error: AxiomError::Network(_)
        }
    ));
    assert!(chat.transcript().is_empty());
    assert_eq!(notifier.errors().len(), 1);
}

#[tokio::test]
async fn test_completed_session_survives_restart() {
    let server = MockServer::start().await;
    mount_stream(&server, format!("{}data: [DONE]\n", delta("stored"))).await;

    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileKeyValueStore::new(tmp.path().to_path_buf()).await.unwrap());

    let mut chat = ChatOrchestrator::new(
        http_backend(&server),
        SessionRegistry::open(store.clone()).await,
        Arc::new(RecordingNotifier::default()),
    );
    chat.submit("remember me").await.unwrap();
    let id = chat.current_session().unwrap();

    let restored = SessionRegistry::open(store).await;
    let session = restored.load(id).unwrap();
    assert_eq!(session.transcript.len(), 2);
    assert_eq!(session.transcript.messages()[1].content, "stored");
}

// --- Cancellation ---

/// Backend that sends one chunk and then never finishes.
struct Hanging;

#[async_trait]
impl ChatBackend for Hanging {
    async fn open_stream(&self, _request: &ChatRequest) -> AxiomResult<ChunkStream> {
        let items: Vec<AxiomResult<Vec<u8>>> = vec![Ok(delta("partial").into_bytes())];
        let first = futures_util::stream::iter(items);
        Ok(Box::pin(first.chain(futures_util::stream::pending())))
    }
}

#[tokio::test]
async fn test_cancel_discards_placeholder_without_commit() {
    let mut chat = ChatOrchestrator::new(
        Arc::new(Hanging),
        memory_registry(),
        Arc::new(RecordingNotifier::default()),
    );
    let mut updates = chat.subscribe();
    let cancel = chat.cancel_handle();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let outcome = chat.submit("long answer please").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Cancelled));
    assert_eq!(chat.phase(), Phase::Idle);
    assert!(chat.transcript().is_empty());
    assert!(chat.registry().is_empty());

    let mut saw_partial = false;
    let mut saw_removal = false;
    while let Ok(update) = updates.try_recv() {
        match update {
            ChatUpdate::ContentReplaced { content, .. } => saw_partial |= content == "partial",
            ChatUpdate::MessageRemoved { .. } => saw_removal = true,
            _ => {}
        }
    }
    assert!(saw_partial);
    assert!(saw_removal);
}

#[tokio::test]
async fn test_cancel_before_submission_does_not_stick() {
    let server = MockServer::start().await;
    mount_stream(&server, format!("{}data: [DONE]\n", delta("fine"))).await;

    let mut chat = ChatOrchestrator::new(
        http_backend(&server),
        memory_registry(),
        Arc::new(RecordingNotifier::default()),
    );
    chat.cancel_handle().cancel();

    let outcome = chat.submit("go").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Completed { .. }));
}
