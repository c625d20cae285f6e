use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

use parley_protocol::ServerFrame;

use super::{SessionError, SessionManager};
use crate::genai::{AudioStream, ChatTurn, GenerationBackend, ModelInfo, TextStream};
use crate::store::{ChatDb, ConversationStore};
use crate::ws::ConnectionHub;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Backend that replays a fixed fragment script.
struct ScriptedBackend {
    fragments: Vec<&'static str>,
    fail_at_end: bool,
    title: Option<&'static str>,
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Err(anyhow!("not used"))
    }

    async fn stream_text(&self, _model: &str, _turns: Vec<ChatTurn>) -> Result<TextStream> {
        let mut items: Vec<Result<String>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        if self.fail_at_end {
            items.push(Err(anyhow!("scripted upstream failure")));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn generate_title(&self, _user: &str, _assistant: &str) -> Result<String> {
        self.title
            .map(|t| t.to_string())
            .ok_or_else(|| anyhow!("no title scripted"))
    }

    async fn transcribe(&self, _audio: Bytes) -> Result<String> {
        Err(anyhow!("not used"))
    }

    async fn synthesize(&self, _text: &str) -> Result<AudioStream> {
        Err(anyhow!("not used"))
    }
}

/// Backend whose fragment stream is driven by the test through a channel.
struct ChannelBackend {
    rx: std::sync::Mutex<Option<mpsc::Receiver<Result<String>>>>,
}

impl ChannelBackend {
    fn new() -> (Arc<Self>, mpsc::Sender<Result<String>>) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Self {
                rx: std::sync::Mutex::new(Some(rx)),
            }),
            tx,
        )
    }
}

#[async_trait]
impl GenerationBackend for ChannelBackend {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Err(anyhow!("not used"))
    }

    async fn stream_text(&self, _model: &str, _turns: Vec<ChatTurn>) -> Result<TextStream> {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| anyhow!("stream already taken"))?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn generate_title(&self, _user: &str, _assistant: &str) -> Result<String> {
        Err(anyhow!("no title"))
    }

    async fn transcribe(&self, _audio: Bytes) -> Result<String> {
        Err(anyhow!("not used"))
    }

    async fn synthesize(&self, _text: &str) -> Result<AudioStream> {
        Err(anyhow!("not used"))
    }
}

struct Harness {
    _temp: TempDir,
    store: ConversationStore,
    hub: Arc<ConnectionHub>,
    manager: Arc<SessionManager>,
}

async fn setup(backend: Arc<dyn GenerationBackend>) -> Harness {
    let temp = TempDir::new().unwrap();
    let db = ChatDb::open(&temp.path().join("test.db")).await.unwrap();
    let store = ConversationStore::new(db);
    let hub = Arc::new(ConnectionHub::new());
    let manager = Arc::new(SessionManager::new(
        store.clone(),
        hub.clone(),
        backend,
        Duration::from_secs(5),
    ));
    Harness {
        _temp: temp,
        store,
        hub,
        manager,
    }
}

async fn next_frame(rx: &mut mpsc::Receiver<ServerFrame>) -> ServerFrame {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("hub channel closed")
}

async fn wait_idle(manager: &SessionManager) {
    for _ in 0..500 {
        if manager.active_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never finished");
}

#[tokio::test]
async fn completion_persists_concatenation_and_emits_one_done() {
    let harness = setup(Arc::new(ScriptedBackend {
        fragments: vec!["Hello", ", ", "world"],
        fail_at_end: false,
        title: Some("Greetings"),
    }))
    .await;

    let conversation = harness.store.create_conversation().await.unwrap();
    let (conn, mut rx) = harness.hub.register();
    harness.hub.watch(conn, &conversation.id);

    harness
        .manager
        .create(
            "evt-1".to_string(),
            conversation.id.clone(),
            "say hi".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap();

    let mut streamed = String::new();
    loop {
        match next_frame(&mut rx).await {
            ServerFrame::StreamResponse {
                event_id, content, ..
            } => {
                assert_eq!(event_id, "evt-1");
                streamed.push_str(&content);
            }
            ServerFrame::StreamDone { event_id, .. } => {
                assert_eq!(event_id, "evt-1");
                break;
            }
            other => panic!("unexpected frame before done: {:?}", other),
        }
    }
    assert_eq!(streamed, "Hello, world");

    // Title generation follows completion for untitled conversations.
    match next_frame(&mut rx).await {
        ServerFrame::TitleUpdate { title, .. } => assert_eq!(title, "Greetings"),
        other => panic!("expected title update, got {:?}", other),
    }

    wait_idle(&harness.manager).await;

    let messages = harness.store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[0].content, "say hi");
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "Hello, world");

    let current = harness
        .store
        .get_conversation(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.title.as_deref(), Some("Greetings"));

    // Exactly one done, nothing after the title update.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn titled_conversations_are_not_retitled() {
    let harness = setup(Arc::new(ScriptedBackend {
        fragments: vec!["ok"],
        fail_at_end: false,
        title: Some("Should not appear"),
    }))
    .await;

    let conversation = harness.store.create_conversation().await.unwrap();
    harness
        .store
        .rename_conversation(&conversation.id, "Kept title")
        .await
        .unwrap();

    let (conn, mut rx) = harness.hub.register();
    harness.hub.watch(conn, &conversation.id);

    harness
        .manager
        .create(
            "evt-1".to_string(),
            conversation.id.clone(),
            "hi".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap();

    loop {
        if matches!(next_frame(&mut rx).await, ServerFrame::StreamDone { .. }) {
            break;
        }
    }
    wait_idle(&harness.manager).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    let current = harness
        .store
        .get_conversation(&conversation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.title.as_deref(), Some("Kept title"));
}

#[tokio::test]
async fn cancel_discards_partial_output_and_emits_no_done() {
    let (backend, tx) = ChannelBackend::new();
    let harness = setup(backend).await;

    let conversation = harness.store.create_conversation().await.unwrap();
    let (conn, mut rx) = harness.hub.register();
    harness.hub.watch(conn, &conversation.id);

    harness
        .manager
        .create(
            "evt-1".to_string(),
            conversation.id.clone(),
            "tell me a story".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap();

    tx.send(Ok("Once".to_string())).await.unwrap();
    tx.send(Ok(" upon".to_string())).await.unwrap();

    assert!(matches!(
        next_frame(&mut rx).await,
        ServerFrame::StreamResponse { .. }
    ));
    assert!(matches!(
        next_frame(&mut rx).await,
        ServerFrame::StreamResponse { .. }
    ));

    harness.manager.cancel("evt-1", &conversation.id);
    // A fragment racing the cancel must be discarded, not forwarded.
    let _ = tx.send(Ok(" a time".to_string())).await;

    wait_idle(&harness.manager).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    // Only the user message was persisted.
    let messages = harness.store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}

#[tokio::test]
async fn duplicate_event_id_is_rejected_without_disturbing_the_first() {
    let (backend, tx) = ChannelBackend::new();
    let harness = setup(backend).await;

    let conversation = harness.store.create_conversation().await.unwrap();
    let (conn, mut rx) = harness.hub.register();
    harness.hub.watch(conn, &conversation.id);

    harness
        .manager
        .create(
            "evt-1".to_string(),
            conversation.id.clone(),
            "first".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap();

    let err = harness
        .manager
        .create(
            "evt-1".to_string(),
            conversation.id.clone(),
            "second".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Duplicate(_)));
    assert_eq!(harness.manager.active_count(), 1);

    // The first stream keeps flowing.
    tx.send(Ok("still here".to_string())).await.unwrap();
    match next_frame(&mut rx).await {
        ServerFrame::StreamResponse { content, .. } => assert_eq!(content, "still here"),
        other => panic!("unexpected frame: {:?}", other),
    }

    drop(tx);
    loop {
        if matches!(next_frame(&mut rx).await, ServerFrame::StreamDone { .. }) {
            break;
        }
    }
    wait_idle(&harness.manager).await;
}

#[tokio::test]
async fn upstream_failure_persists_nothing_and_emits_no_done() {
    let harness = setup(Arc::new(ScriptedBackend {
        fragments: vec!["par"],
        fail_at_end: true,
        title: None,
    }))
    .await;

    let conversation = harness.store.create_conversation().await.unwrap();
    let (conn, mut rx) = harness.hub.register();
    harness.hub.watch(conn, &conversation.id);

    harness
        .manager
        .create(
            "evt-1".to_string(),
            conversation.id.clone(),
            "hi".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap();

    // The fragment before the failure is forwarded.
    assert!(matches!(
        next_frame(&mut rx).await,
        ServerFrame::StreamResponse { .. }
    ));

    wait_idle(&harness.manager).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    let messages = harness.store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}

#[tokio::test]
async fn create_for_missing_conversation_fails_with_not_found() {
    let harness = setup(Arc::new(ScriptedBackend {
        fragments: vec![],
        fail_at_end: false,
        title: None,
    }))
    .await;

    let err = harness
        .manager
        .create(
            "evt-1".to_string(),
            "no-such-conversation".to_string(),
            "hi".to_string(),
            "small".to_string(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Store(crate::store::StoreError::NotFound(_))
    ));
    assert_eq!(harness.manager.active_count(), 0);
}

#[tokio::test]
async fn event_id_is_reusable_after_the_session_ends() {
    let harness = setup(Arc::new(ScriptedBackend {
        fragments: vec!["one"],
        fail_at_end: false,
        title: None,
    }))
    .await;

    let conversation = harness.store.create_conversation().await.unwrap();
    let (conn, mut rx) = harness.hub.register();
    harness.hub.watch(conn, &conversation.id);

    for round in 0..2 {
        harness
            .manager
            .create(
                "evt-1".to_string(),
                conversation.id.clone(),
                format!("round {}", round),
                "small".to_string(),
            )
            .await
            .unwrap();
        loop {
            if matches!(next_frame(&mut rx).await, ServerFrame::StreamDone { .. }) {
                break;
            }
        }
        wait_idle(&harness.manager).await;
    }

    let messages = harness.store.list_messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 4);
}
