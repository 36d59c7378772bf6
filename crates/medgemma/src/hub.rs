//! Minimal client for the Hugging Face model registry: access checks and artifact downloads.
use crate::errors::{ModelError, ModelResult};
use reqwest::{Client, Response, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub const HUGGINGFACE_ENDPOINT: &str = "https://huggingface.co";

const USER_AGENT: &str = concat!("medgemma/", env!("CARGO_PKG_VERSION"));

pub struct HubClient {
    client: Client,
    endpoint: String,
    token: String,
    token_env: String,
}

impl HubClient {
    /// `token_env` names the variable the token came from, for error messages
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        token_env: impl Into<String>,
    ) -> ModelResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600)) // 1 hour for multi-GB weights
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ModelError::Registry(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
            token_env: token_env.into(),
        })
    }

    fn status_error(&self, status: StatusCode, repo: &str) -> ModelError {
        match status {
            StatusCode::UNAUTHORIZED => ModelError::InvalidCredential(self.token_env.clone()),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                ModelError::ModelAccessDenied(repo.to_string())
            }
            _ => ModelError::Registry(format!("Unexpected response: {}", status)),
        }
    }

    async fn get(&self, url: &str, repo: &str) -> ModelResult<Response> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ModelError::Registry(e.to_string()))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.status_error(response.status(), repo))
        }
    }

    /// Verify the token is valid and has been granted access to `repo`
    pub async fn check_access(&self, repo: &str) -> ModelResult<()> {
        let url = format!("{}/api/models/{}", self.endpoint, repo);
        self.get(&url, repo).await?;
        tracing::info!("Token is valid and can access {}", repo);
        Ok(())
    }

    /// Download one file of a repository into `cache_dir/<repo>/<revision>/<file>`, reusing a
    /// previous download of the same revision when one exists.
    pub async fn download(
        &self,
        repo: &str,
        revision: &str,
        filename: &str,
        cache_dir: &Path,
    ) -> ModelResult<PathBuf> {
        let target_dir = cache_dir.join(repo).join(revision);
        let output_path = target_dir.join(filename);

        if let Ok(metadata) = fs::metadata(&output_path).await {
            if metadata.len() > 0 {
                tracing::info!("Using cached {}", output_path.display());
                return Ok(output_path);
            }
        }

        fs::create_dir_all(&target_dir)
            .await
            .map_err(|e| ModelError::Load(format!("Failed to create cache dir: {}", e)))?;

        let url = format!(
            "{}/{}/resolve/{}/{}",
            self.endpoint, repo, revision, filename
        );
        tracing::info!("Downloading {}", url);
        let mut response = self.get(&url, repo).await?;

        let temp_path = target_dir.join(format!("{}.tmp", filename));
        let mut temp_file = File::create(&temp_path)
            .await
            .map_err(|e| ModelError::Load(format!("Failed to create temp file: {}", e)))?;

        let expected = response.content_length();
        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ModelError::Registry(format!("Download error: {}", e)))?
        {
            temp_file
                .write_all(&chunk)
                .await
                .map_err(|e| ModelError::Load(format!("Write error: {}", e)))?;
            downloaded += chunk.len() as u64;
        }
        temp_file
            .flush()
            .await
            .map_err(|e| ModelError::Load(format!("Write error: {}", e)))?;

        if let Some(expected) = expected {
            if downloaded != expected {
                return Err(ModelError::Registry(format!(
                    "Download incomplete: got {} bytes, expected {}",
                    downloaded, expected
                )));
            }
        }

        fs::rename(&temp_path, &output_path)
            .await
            .map_err(|e| ModelError::Load(format!("Failed to move downloaded file: {}", e)))?;
        tracing::info!("Downloaded {} ({} bytes)", output_path.display(), downloaded);

        Ok(output_path)
    }
}
