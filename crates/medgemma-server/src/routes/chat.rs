use crate::error::ApiError;
use crate::relay::{relay, TurnSink};
use crate::state::AppState;
use crate::store::{ConversationTurn, MODEL_NAME};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use medgemma::generation::{complete_in_background, GenerationParameters};
use medgemma::models::message::{Message, UserContent};
use medgemma::models::role::Role;
use medgemma::normalize::normalize_history;
use medgemma::prompt::format_prompt;
use medgemma::prompt_template::default_system_prompt;
use medgemma::stream::spawn_producer;
use serde::Deserialize;
use tokio::sync::mpsc;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub user_message: UserContent,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let user = state.authorizer.authenticate(&headers).await?;
    state
        .authorizer
        .check_permissions(&user, MODEL_NAME)
        .await?;

    let history = state
        .store
        .history(&user, &request.conversation_id)
        .await?;

    let user_parts = request.user_message.into_parts();
    let mut messages = history;
    messages.push(Message::new(Role::User, user_parts.clone()));
    let messages = normalize_history(messages, &state.storage.upload_root).await;

    let parameters = GenerationParameters {
        temperature: request
            .temperature
            .unwrap_or(state.generation.default_temperature),
        max_new_tokens: state.generation.max_new_tokens,
        stream: request.stream,
        system_message: request
            .system_message
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default_system_prompt().to_string()),
    };
    let prompt = format_prompt(&messages, Some(parameters.system_message.as_str()))?;

    // Load before answering so access problems surface as HTTP errors, not a silent stream
    let handle = state.slot.get().await?;

    if parameters.stream {
        let (tx, rx) = mpsc::channel(state.generation.queue_capacity);
        spawn_producer(
            handle,
            prompt,
            parameters.sampling(),
            state.generation.max_input_tokens,
            tx,
        );

        let sink = TurnSink {
            store: state.store.clone(),
            user,
            conversation_id: request.conversation_id,
            user_message: user_parts,
        };
        return Ok(relay(
            rx,
            sink,
            state.generation.stream_timeout(),
            state.generation.queue_capacity,
        )
        .into_response());
    }

    let completion = complete_in_background(
        handle,
        prompt,
        parameters.sampling(),
        state.generation.max_input_tokens,
    )
    .await
    .map_err(ApiError::generation)?;

    state
        .store
        .save_turn(
            &user,
            &request.conversation_id,
            ConversationTurn::complete(
                user_parts,
                completion.content.clone(),
                completion.token_usage,
            ),
        )
        .await?;

    Ok(Json(completion).into_response())
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/medgemma", post(handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{StaticKeyAuthorizer, User};
    use crate::relay::DONE_EVENT;
    use crate::routes::test_support::{body_json, body_text, state_with};
    use crate::store::test_support::RecordingStore;
    use crate::store::{ConversationStore, JsonlStore};
    use async_trait::async_trait;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use medgemma::errors::{ModelError, ModelResult};
    use medgemma::model::mock::MockModel;
    use medgemma::model::ModelHandle;
    use medgemma::slot::{ModelLoader, ModelSlot};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn chat_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .uri("/medgemma")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_non_streaming_reply_is_persisted() {
        let store = Arc::new(RecordingStore::with_history(vec![
            Message::user().with_text("I have a rash"),
            Message::assistant().with_text("Where is it?"),
        ]));
        let state = state_with(Arc::new(MockModel::new("See a doctor.")), store.clone());
        let app = routes(state);

        let response = app
            .oneshot(chat_request(json!({
                "conversation_id": "conv-1",
                "user_message": "On my arm",
                "temperature": 0.2
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["content"], "See a doctor.");
        assert_eq!(body["token_usage"]["output_tokens"], 13);

        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].1.assistant, "See a doctor.");
        assert_eq!(
            saved[0].1.user_message,
            vec![medgemma::models::content::ContentPart::text("On my arm")]
        );
    }

    #[tokio::test]
    async fn test_streaming_reply_emits_events_then_done() {
        let store = Arc::new(RecordingStore::default());
        let state = state_with(Arc::new(MockModel::new("Rest")), store.clone());
        let app = routes(state);

        let response = app
            .oneshot(chat_request(json!({
                "conversation_id": "conv-2",
                "user_message": [{"type": "text", "text": "Tired all day"}],
                "stream": true
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let body = body_text(response).await;
        assert_eq!(
            body,
            format!(
                "data: {{\"content\":\"R\"}}\n\n\
                 data: {{\"content\":\"e\"}}\n\n\
                 data: {{\"content\":\"s\"}}\n\n\
                 data: {{\"content\":\"t\"}}\n\n{}",
                DONE_EVENT
            )
        );

        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].0, "conv-2");
        assert_eq!(saved[0].1.assistant, "Rest");
        assert_eq!(saved[0].1.token_usage.map(|u| u.output_tokens), Some(4));
    }

    #[tokio::test]
    async fn test_streaming_failure_ends_with_done_and_no_turn() {
        let store = Arc::new(RecordingStore::default());
        let state = state_with(Arc::new(MockModel::failing("device lost")), store.clone());

        let response = routes(state)
            .oneshot(chat_request(json!({
                "conversation_id": "conv-3",
                "user_message": "hi",
                "stream": true
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, DONE_EVENT);
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_is_500() {
        let store = Arc::new(RecordingStore::default());
        let state = state_with(Arc::new(MockModel::failing("out of memory")), store.clone());

        let response = routes(state)
            .oneshot(chat_request(json!({
                "conversation_id": "conv-4",
                "user_message": "hi"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Error generating response: out of memory"})
        );
        assert!(store.saved().is_empty());
    }

    struct UnconfiguredLoader;

    #[async_trait]
    impl ModelLoader for UnconfiguredLoader {
        async fn load(&self) -> ModelResult<Arc<dyn ModelHandle>> {
            Err(ModelError::Unconfigured("HUGGINGFACE_TOKEN".to_string()))
        }
    }

    #[tokio::test]
    async fn test_missing_token_is_500_and_slot_stays_empty() {
        let store = Arc::new(RecordingStore::default());
        let mut state = state_with(Arc::new(MockModel::new("")), store);
        state.slot = Arc::new(ModelSlot::new(Arc::new(UnconfiguredLoader)));
        let slot = state.slot.clone();

        let response = routes(state)
            .oneshot(chat_request(json!({
                "conversation_id": "conv-5",
                "user_message": "hi",
                "stream": true
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("HUGGINGFACE_TOKEN"));
        assert!(!slot.is_loaded());
    }

    struct DenyAll;

    #[async_trait]
    impl crate::auth::Authorizer for DenyAll {
        async fn authenticate(&self, _headers: &HeaderMap) -> Result<User, ApiError> {
            Ok(User::new("broke"))
        }

        async fn check_permissions(&self, _user: &User, _model: &str) -> Result<(), ApiError> {
            Err(ApiError::PermissionDenied("Insufficient balance".to_string()))
        }
    }

    #[tokio::test]
    async fn test_permission_denied_is_400() {
        let store = Arc::new(RecordingStore::default());
        let model = Arc::new(MockModel::new("never"));
        let mut state = state_with(model.clone(), store);
        state.authorizer = Arc::new(DenyAll);

        let response = routes(state)
            .oneshot(chat_request(json!({
                "conversation_id": "conv-6",
                "user_message": "hi"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Insufficient balance"})
        );
        assert_eq!(model.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let store = Arc::new(RecordingStore::default());
        let mut state = state_with(Arc::new(MockModel::new("ok")), store);
        state.authorizer = Arc::new(StaticKeyAuthorizer::new(HashMap::from([(
            "sk-1".to_string(),
            "alice".to_string(),
        )])));

        let response = routes(state)
            .oneshot(chat_request(json!({
                "conversation_id": "conv-7",
                "user_message": "hi"
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_history_accumulates_in_jsonl_store() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonlStore::new(dir.path()));
        let state = state_with(Arc::new(MockModel::new("Noted.")), store.clone());

        for text in ["first", "second"] {
            let response = routes(state.clone())
                .oneshot(chat_request(json!({
                    "conversation_id": "conv-8",
                    "user_message": text
                })))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let history = store.history(&User::local(), "conv-8").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], Message::user().with_text("second"));

        let usage = store.usage(&User::local()).await.unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[1].output_tokens, 6);
    }
}
