//! Streaming session manager.
//!
//! One actor-wide table of in-flight generation streams keyed by the
//! caller's event id. A session is born on `chat.stream.create`, lives
//! while fragments flow, and is garbage the moment it completes, fails
//! or is cancelled:
//!
//! - natural completion persists the accumulated text as one assistant
//!   message and emits exactly one `chat.stream.done`;
//! - cancellation is cooperative (a token checked between fragments),
//!   discards the partial buffer, and emits no `done`;
//! - upstream failure emits nothing and persists nothing — retrying is
//!   the client's job, with a fresh event id.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_protocol::ServerFrame;

use crate::genai::{ChatTurn, GenerationBackend, TextStream};
use crate::store::{ConversationStore, MessageRole, StoreError};
use crate::ws::ConnectionHub;

/// Errors surfaced to the caller of `create`.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session with this event id is already streaming.
    #[error("duplicate session: {0}")]
    Duplicate(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("upstream generation failure: {0}")]
    Upstream(#[source] anyhow::Error),
}

/// Bookkeeping for one in-flight stream.
///
/// Holds no connection reference: sessions are independent of any one
/// socket's lifetime.
struct ActiveSession {
    conversation_id: String,
    cancel: CancellationToken,
}

/// Actor-wide table of in-flight generation sessions.
pub struct SessionManager {
    store: ConversationStore,
    hub: Arc<ConnectionHub>,
    backend: Arc<dyn GenerationBackend>,
    fragment_timeout: Duration,
    sessions: DashMap<String, ActiveSession>,
}

impl SessionManager {
    pub fn new(
        store: ConversationStore,
        hub: Arc<ConnectionHub>,
        backend: Arc<dyn GenerationBackend>,
        fragment_timeout: Duration,
    ) -> Self {
        Self {
            store,
            hub,
            backend,
            fragment_timeout,
            sessions: DashMap::new(),
        }
    }

    /// Start a generation stream for a conversation.
    ///
    /// Persists the user message, opens the upstream fragment stream and
    /// spawns the forwarding task. Rejects a second create with an event
    /// id that is still active.
    pub async fn create(
        self: &Arc<Self>,
        event_id: String,
        conversation_id: String,
        content: String,
        model: String,
    ) -> Result<(), SessionError> {
        let cancel = CancellationToken::new();
        match self.sessions.entry(event_id.clone()) {
            Entry::Occupied(_) => {
                return Err(SessionError::Duplicate(event_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveSession {
                    conversation_id: conversation_id.clone(),
                    cancel: cancel.clone(),
                });
            }
        }

        let result = self.start_stream(&conversation_id, &content, &model).await;

        match result {
            Ok(stream) => {
                info!(event_id, conversation_id, model, "session streaming");
                let manager = Arc::clone(self);
                let user_text = content;
                tokio::spawn(async move {
                    manager
                        .run_stream(event_id, conversation_id, user_text, stream, cancel)
                        .await;
                });
                Ok(())
            }
            Err(e) => {
                self.sessions.remove(&event_id);
                Err(e)
            }
        }
    }

    /// Request cancellation of an in-flight stream.
    ///
    /// Best-effort and cooperative: fragments already in flight are
    /// discarded, not forwarded. Unknown or finished sessions are a
    /// no-op.
    pub fn cancel(&self, event_id: &str, conversation_id: &str) {
        match self.sessions.get(event_id) {
            Some(session) if session.conversation_id == conversation_id => {
                info!(event_id, conversation_id, "cancelling session");
                session.cancel.cancel();
            }
            Some(session) => {
                debug!(
                    event_id,
                    requested = conversation_id,
                    actual = %session.conversation_id,
                    "cancel for mismatched conversation ignored"
                );
            }
            None => {
                debug!(event_id, "cancel for unknown session ignored");
            }
        }
    }

    /// Number of sessions currently streaming.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Persist the user turn and open the upstream stream.
    async fn start_stream(
        &self,
        conversation_id: &str,
        content: &str,
        model: &str,
    ) -> Result<TextStream, SessionError> {
        self.store
            .append_message(conversation_id, MessageRole::User, content)
            .await?;

        let turns: Vec<ChatTurn> = self
            .store
            .list_messages(conversation_id)
            .await?
            .into_iter()
            .map(|m| ChatTurn {
                role: MessageRole::from_str(&m.role).unwrap_or(MessageRole::User),
                content: m.content,
            })
            .collect();

        let stream = self
            .backend
            .stream_text(model, turns)
            .await
            .map_err(SessionError::Upstream)?;

        Ok(stream)
    }

    /// Forward fragments until completion, cancellation or failure.
    async fn run_stream(
        self: Arc<Self>,
        event_id: String,
        conversation_id: String,
        user_text: String,
        mut stream: TextStream,
        cancel: CancellationToken,
    ) {
        let mut accumulated = String::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    self.sessions.remove(&event_id);
                    info!(event_id, conversation_id, "session cancelled; partial output discarded");
                    return;
                }
                next = tokio::time::timeout(self.fragment_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    self.sessions.remove(&event_id);
                    warn!(event_id, conversation_id, "session failed: fragment deadline expired");
                    return;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    self.sessions.remove(&event_id);
                    warn!(event_id, conversation_id, error = %e, "session failed upstream");
                    return;
                }
                Ok(Some(Ok(fragment))) => {
                    if cancel.is_cancelled() {
                        // Late fragment racing the cancel: drop it.
                        continue;
                    }
                    accumulated.push_str(&fragment);
                    self.hub
                        .broadcast(
                            &conversation_id,
                            ServerFrame::StreamResponse {
                                event_id: event_id.clone(),
                                conversation_id: conversation_id.clone(),
                                content: fragment,
                            },
                        )
                        .await;
                }
            }
        }

        self.sessions.remove(&event_id);
        if cancel.is_cancelled() {
            info!(event_id, conversation_id, "session cancelled at end of stream");
            return;
        }

        match self
            .store
            .append_message(&conversation_id, MessageRole::Assistant, &accumulated)
            .await
        {
            Ok(_) => {
                self.hub
                    .broadcast(
                        &conversation_id,
                        ServerFrame::StreamDone {
                            event_id: event_id.clone(),
                            conversation_id: conversation_id.clone(),
                        },
                    )
                    .await;
                info!(event_id, conversation_id, "session completed");

                self.maybe_generate_title(&event_id, &conversation_id, &user_text, &accumulated)
                    .await;
            }
            Err(StoreError::NotFound(_)) => {
                // Conversation deleted mid-stream: completion is dropped.
                warn!(event_id, conversation_id, "conversation gone; dropping completion");
            }
            Err(e) => {
                warn!(event_id, conversation_id, error = %e, "persisting completion failed");
            }
        }
    }

    /// Best-effort auto-titling for untitled conversations.
    ///
    /// Skipped unless the conversation still exists and has no title;
    /// any upstream or storage error is swallowed.
    async fn maybe_generate_title(
        &self,
        event_id: &str,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) {
        let untitled = match self.store.get_conversation(conversation_id).await {
            Ok(Some(conversation)) => conversation.title.is_none(),
            _ => false,
        };
        if !untitled {
            return;
        }

        let title = match self.backend.generate_title(user_text, assistant_text).await {
            Ok(title) => title,
            Err(e) => {
                debug!(conversation_id, error = %e, "title generation skipped");
                return;
            }
        };

        match self.store.rename_conversation(conversation_id, &title).await {
            Ok(()) => {
                self.hub
                    .broadcast(
                        conversation_id,
                        ServerFrame::TitleUpdate {
                            event_id: event_id.to_string(),
                            conversation_id: conversation_id.to_string(),
                            title,
                        },
                    )
                    .await;
            }
            Err(e) => {
                debug!(conversation_id, error = %e, "storing generated title failed");
            }
        }
    }
}

#[cfg(test)]
mod tests;
