//! REST handlers for the RPC surface.

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::Response,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::audio::{FrameBuffer, segment_text};
use crate::genai::ModelInfo;
use crate::store::{Conversation, Message};

// ============================================================================
// Response/request shapes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct Empty {}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

// ============================================================================
// Models
// ============================================================================

pub async fn list_models(State(state): State<AppState>) -> ApiResult<Json<ModelsResponse>> {
    let models = state
        .backend
        .list_models()
        .await
        .map_err(|e| ApiError::bad_gateway(e.to_string()))?;
    Ok(Json(ModelsResponse { models }))
}

// ============================================================================
// Conversations
// ============================================================================

pub async fn list_conversations(
    State(state): State<AppState>,
) -> ApiResult<Json<ConversationsResponse>> {
    let conversations = state.store.list_conversations().await?;
    Ok(Json(ConversationsResponse { conversations }))
}

pub async fn create_conversation(
    State(state): State<AppState>,
) -> ApiResult<Json<ConversationResponse>> {
    let conversation = state.store.create_conversation().await?;
    Ok(Json(ConversationResponse { conversation }))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state.store.delete_conversation(&conversation_id).await?;
    Ok(Json(Empty {}))
}

pub async fn rename_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<Empty>> {
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    state
        .store
        .rename_conversation(&conversation_id, request.title.trim())
        .await?;
    Ok(Json(Empty {}))
}

pub async fn pin_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state.store.pin_conversation(&conversation_id).await?;
    Ok(Json(Empty {}))
}

pub async fn unpin_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<Empty>> {
    state.store.unpin_conversation(&conversation_id).await?;
    Ok(Json(Empty {}))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Json<MessagesResponse>> {
    let messages = state.store.list_messages(&conversation_id).await?;
    Ok(Json(MessagesResponse { messages }))
}

// ============================================================================
// Speech
// ============================================================================

/// Transcribe uploaded audio. Stateless pass-through to the backend.
pub async fn speech_to_text(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<TranscriptionResponse>> {
    if body.is_empty() {
        return Err(ApiError::bad_request("empty audio body"));
    }
    let text = state
        .backend
        .transcribe(body)
        .await
        .map_err(|e| ApiError::bad_gateway(e.to_string()))?;
    Ok(Json(TranscriptionResponse { text }))
}

/// Synthesize speech and stream it back one fixed-size frame per HTTP
/// chunk.
///
/// Long text is segmented up front; each segment is one synthesis call
/// run through a fresh rebuffering accumulator, so a short final frame
/// can occur once per segment. Mid-stream upstream errors end the body
/// early and are logged; headers have already been sent at that point.
pub async fn stream_tts(
    State(state): State<AppState>,
    Json(request): Json<TtsRequest>,
) -> ApiResult<Response> {
    let segments = segment_text(&request.text, state.config.speech.segment_chars);
    if segments.is_empty() {
        return Err(ApiError::bad_request("text must not be empty"));
    }

    let frame_size = state.config.speech.frame_size;
    let backend = state.backend.clone();
    let (tx, rx) = mpsc::channel::<Result<bytes::Bytes, std::io::Error>>(8);

    tokio::spawn(async move {
        for segment in segments {
            let mut audio = match backend.synthesize(&segment).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "speech synthesis failed");
                    let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                    return;
                }
            };

            let mut buffer = FrameBuffer::new(frame_size);
            while let Some(chunk) = audio.next().await {
                match chunk {
                    Ok(bytes) => {
                        for frame in buffer.push(&bytes) {
                            if tx.send(Ok(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "speech stream interrupted");
                        let _ = tx.send(Err(std::io::Error::other(e.to_string()))).await;
                        return;
                    }
                }
            }

            if let Some(last) = buffer.finish()
                && tx.send(Ok(last)).await.is_err()
            {
                return;
            }
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .header(header::CONTENT_TYPE, "audio/mpeg")
        .body(body)
        .map_err(|e| ApiError::internal(e.to_string()))
}
