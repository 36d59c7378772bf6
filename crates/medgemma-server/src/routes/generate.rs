use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::header,
    routing::post,
    Json, Router,
};
use medgemma::generation::generate_text_in_background;
use medgemma::model::SamplingOptions;
use medgemma::normalize::image_placeholder;
use serde::{Deserialize, Serialize};

const TEMPERATURE_RANGE: (f64, f64) = (0.1, 0.9);
const TOP_P_RANGE: (f64, f64) = (0.1, 0.95);
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.1;

#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub prompt: String,
    pub max_new_tokens: Option<usize>,
    pub do_sample: Option<bool>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    /// Names of uploaded images, multipart only
    #[serde(skip)]
    pub images: Vec<String>,
}

impl GenerateRequest {
    /// Sampling options with the client's values clamped into the supported ranges
    pub fn sampling(&self, default_max_new_tokens: usize) -> SamplingOptions {
        let (t_min, t_max) = TEMPERATURE_RANGE;
        let (p_min, p_max) = TOP_P_RANGE;
        SamplingOptions {
            max_new_tokens: self.max_new_tokens.unwrap_or(default_max_new_tokens),
            do_sample: self.do_sample.unwrap_or(true),
            temperature: self
                .temperature
                .unwrap_or(DEFAULT_TEMPERATURE)
                .clamp(t_min, t_max),
            top_p: Some(self.top_p.unwrap_or(DEFAULT_TOP_P).clamp(p_min, p_max)),
            ..Default::default()
        }
    }

    /// The trimmed prompt with a placeholder for every image
    pub fn full_prompt(&self) -> String {
        std::iter::once(self.prompt.trim().to_string())
            .chain(self.images.iter().map(|name| image_placeholder(name)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub response: String,
    pub generated_text: String,
    pub input_prompt: String,
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid value for {}", name)))
}

async fn read_multipart(mut multipart: Multipart) -> Result<GenerateRequest, ApiError> {
    let mut request = GenerateRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if let Some(file_name) = field.file_name().map(str::to_string) {
            tracing::debug!("Received image {} ({})", file_name, name);
            request.images.push(file_name);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        match name.as_str() {
            "prompt" => request.prompt = value,
            "max_new_tokens" => request.max_new_tokens = Some(parse_field(&name, &value)?),
            "do_sample" => request.do_sample = Some(parse_field(&name, &value)?),
            "temperature" => request.temperature = Some(parse_field(&name, &value)?),
            "top_p" => request.top_p = Some(parse_field(&name, &value)?),
            other => tracing::warn!("Ignoring unknown form field {}", other),
        }
    }

    Ok(request)
}

async fn generate(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<GenerateResponse>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let body = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(body) = Json::<GenerateRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        body
    };

    if body.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt is empty".to_string()));
    }

    let prompt = body.full_prompt();
    let options = body.sampling(state.generation.max_new_tokens);
    let handle = state.slot.get().await?;
    let result = generate_text_in_background(handle, prompt.clone(), options).await?;

    Ok(Json(GenerateResponse {
        response: result.response,
        generated_text: result.generated_text,
        input_prompt: prompt,
    }))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, state_with};
    use crate::store::test_support::RecordingStore;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
    };
    use medgemma::model::mock::MockModel;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(reply: &str) -> Router {
        routes(state_with(
            Arc::new(MockModel::new(reply)),
            Arc::new(RecordingStore::default()),
        ))
    }

    fn json_request(body: serde_json::Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri("/generate")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_json() {
        let response = app(" Chest X-ray shows no abnormality. ")
            .oneshot(json_request(json!({"prompt": "  Describe the image:  "})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "response": "Chest X-ray shows no abnormality.",
                "generated_text": "Describe the image: Chest X-ray shows no abnormality. ",
                "input_prompt": "Describe the image:"
            })
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_is_rejected() {
        for body in [json!({"prompt": ""}), json!({"prompt": "   "}), json!({})] {
            let response = app("unused").oneshot(json_request(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                body_json(response).await,
                json!({"error": "Prompt is empty"})
            );
        }
    }

    #[tokio::test]
    async fn test_max_new_tokens_is_honoured() {
        let response = app("abcdef")
            .oneshot(json_request(json!({"prompt": "q", "max_new_tokens": 2})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["response"], "ab");
    }

    #[tokio::test]
    async fn test_generation_failure_is_500() {
        let app = routes(state_with(
            Arc::new(MockModel::failing("boom")),
            Arc::new(RecordingStore::default()),
        ));
        let response = app
            .oneshot(json_request(json!({"prompt": "q"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("boom"));
    }

    #[tokio::test]
    async fn test_multipart_with_image() {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"prompt\"\r\n\r\n\
             What does this show?\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"temperature\"\r\n\r\n\
             0.3\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"image\"; filename=\"scan.png\"\r\n\
             Content-Type: image/png\r\n\r\n\
             \u{1}\u{2}\u{3}\r\n\
             --{b}--\r\n",
            b = boundary
        );
        let request = HttpRequest::builder()
            .uri("/generate")
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app("A scan.").oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(
            body["input_prompt"],
            "What does this show? [Image file: scan.png]"
        );
        assert_eq!(body["response"], "A scan.");
    }

    #[test]
    fn test_sampling_is_clamped() {
        let request = GenerateRequest {
            temperature: Some(5.0),
            top_p: Some(0.0),
            ..Default::default()
        };
        let options = request.sampling(512);
        assert_eq!(options.temperature, 0.9);
        assert_eq!(options.top_p, Some(0.1));
        assert_eq!(options.max_new_tokens, 512);
        assert!(options.do_sample);

        let request = GenerateRequest {
            temperature: Some(0.01),
            top_p: Some(0.99),
            do_sample: Some(false),
            max_new_tokens: Some(50),
            ..Default::default()
        };
        let options = request.sampling(512);
        assert_eq!(options.temperature, 0.1);
        assert_eq!(options.top_p, Some(0.95));
        assert_eq!(options.max_new_tokens, 50);
        assert!(!options.do_sample);
    }

    #[test]
    fn test_defaults() {
        let options = GenerateRequest::default().sampling(512);
        assert_eq!(options.temperature, 0.7);
        assert_eq!(options.top_p, Some(0.1));
    }
}
