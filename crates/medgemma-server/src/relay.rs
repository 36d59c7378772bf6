//! The consuming half of the streaming relay: drain generated fragments into server-sent events.
use crate::auth::User;
use crate::store::{ConversationStore, ConversationTurn};
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::Stream;
use medgemma::models::content::ContentPart;
use medgemma::models::usage::TokenUsage;
use medgemma::stream::StreamChunk;
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

pub const DONE_EVENT: &str = "data: [DONE]\n\n";

// Server-sent event body fed from a channel
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    pub fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let body = Body::from_stream(self);

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

pub fn format_fragment(content: &str) -> String {
    format!("data: {}\n\n", json!({ "content": content }))
}

/// Where a finished (or abandoned) stream gets written
pub struct TurnSink {
    pub store: Arc<dyn ConversationStore>,
    pub user: User,
    pub conversation_id: String,
    pub user_message: Vec<ContentPart>,
}

impl TurnSink {
    /// Best effort: a failed write is logged, the stream still ends normally
    async fn persist(&self, text: String, usage: Option<TokenUsage>) {
        let turn = match usage {
            Some(usage) => ConversationTurn::complete(self.user_message.clone(), text, usage),
            None => ConversationTurn::partial(self.user_message.clone(), text),
        };
        if let Err(e) = self
            .store
            .save_turn(&self.user, &self.conversation_id, turn)
            .await
        {
            tracing::error!(
                "Failed to save conversation {}: {}",
                self.conversation_id,
                e
            );
        }
    }
}

/// Forward fragments from `chunks` to `events` until the usage record arrives, the producer
/// goes away, or no chunk arrives within `read_timeout`. Always finishes with the done event.
///
/// A complete stream is persisted with its usage. A stream cut short is persisted flagged
/// incomplete, unless nothing was generated at all.
pub async fn drain(
    mut chunks: mpsc::Receiver<StreamChunk>,
    events: mpsc::Sender<String>,
    sink: TurnSink,
    read_timeout: Duration,
) {
    let mut text = String::new();
    let mut persisted = false;

    loop {
        match timeout(read_timeout, chunks.recv()).await {
            Ok(Some(StreamChunk::Fragment { content })) => {
                text.push_str(&content);
                if events.send(format_fragment(&content)).await.is_err() {
                    tracing::debug!("Client disconnected from {}", sink.conversation_id);
                    break;
                }
            }
            Ok(Some(StreamChunk::TokenUsage(usage))) => {
                sink.persist(std::mem::take(&mut text), Some(usage)).await;
                persisted = true;
                break;
            }
            Ok(None) => {
                tracing::debug!("Producer closed the stream without a usage record");
                break;
            }
            Err(_) => {
                tracing::warn!(
                    "No output for {:?}, ending stream for {}",
                    read_timeout,
                    sink.conversation_id
                );
                break;
            }
        }
    }

    // Dropping the receiver tells the producer to stop
    drop(chunks);

    if !persisted && !text.is_empty() {
        sink.persist(text, None).await;
    }

    let _ = events.send(DONE_EVENT.to_string()).await;
}

/// Start `drain` in the background and return the response that streams its events
pub fn relay(
    chunks: mpsc::Receiver<StreamChunk>,
    sink: TurnSink,
    read_timeout: Duration,
    capacity: usize,
) -> SseResponse {
    let (events, rx) = mpsc::channel(capacity);
    tokio::spawn(drain(chunks, events, sink, read_timeout));
    SseResponse::new(ReceiverStream::new(rx))
}
