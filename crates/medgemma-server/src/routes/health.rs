use crate::error::ApiError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModelInfoResponse {
    model_name: String,
    device: String,
    parameters: u64,
    trainable_parameters: u64,
}

// Reports on the model without ever triggering a load
async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.slot.loaded() {
        Some(handle) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                model_loaded: true,
                device: Some(handle.device()),
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                model_loaded: false,
                device: None,
            }),
        ),
    }
}

async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfoResponse>, ApiError> {
    let handle = state
        .slot
        .loaded()
        .ok_or_else(|| ApiError::Unavailable("Model not loaded".to_string()))?;
    let count = handle.parameter_count();

    Ok(Json(ModelInfoResponse {
        model_name: handle.model_name().to_string(),
        device: handle.device(),
        parameters: count.parameters,
        trainable_parameters: count.trainable_parameters,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/model_info", get(model_info))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, state_with};
    use crate::store::test_support::RecordingStore;
    use axum::{body::Body, http::Request};
    use medgemma::errors::ModelError;
    use medgemma::model::mock::MockModel;
    use medgemma::slot::{ModelLoader, ModelSlot};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct NeverLoader;

    #[async_trait::async_trait]
    impl ModelLoader for NeverLoader {
        async fn load(
            &self,
        ) -> medgemma::errors::ModelResult<Arc<dyn medgemma::model::ModelHandle>> {
            Err(ModelError::Load("not in tests".to_string()))
        }
    }

    fn unloaded_state() -> AppState {
        let mut state = state_with(
            Arc::new(MockModel::new("")),
            Arc::new(RecordingStore::default()),
        );
        state.slot = Arc::new(ModelSlot::new(Arc::new(NeverLoader)));
        state
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_when_loaded() {
        let state = state_with(
            Arc::new(MockModel::new("")),
            Arc::new(RecordingStore::default()),
        );
        let response = routes(state).oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "healthy", "model_loaded": true, "device": "cpu"})
        );
    }

    #[tokio::test]
    async fn test_health_when_not_loaded_does_not_load() {
        let state = unloaded_state();
        let slot = state.slot.clone();
        let response = routes(state).oneshot(get_request("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            json!({"status": "unhealthy", "model_loaded": false})
        );
        assert!(!slot.is_loaded());
    }

    #[tokio::test]
    async fn test_model_info() {
        let state = state_with(
            Arc::new(MockModel::new("")),
            Arc::new(RecordingStore::default()),
        );
        let response = routes(state)
            .oneshot(get_request("/model_info"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["model_name"], "mock/medgemma");
        assert_eq!(body["device"], "cpu");
        assert!(body["parameters"].is_u64());
        assert!(body["trainable_parameters"].is_u64());
    }

    #[tokio::test]
    async fn test_model_info_not_loaded() {
        let response = routes(unloaded_state())
            .oneshot(get_request("/model_info"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Model not loaded"})
        );
    }
}
