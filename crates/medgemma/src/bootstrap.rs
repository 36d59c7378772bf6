//! Turn configuration plus an access token into a loaded model.
//!
//! Order matters: the token is read before anything touches the network, the registry check
//! runs before any download, and the weights are only parsed once both artifacts are cached.
use crate::errors::ModelResult;
use crate::hub::{HubClient, HUGGINGFACE_ENDPOINT};
use crate::key_manager::{get_access_token, Environment, RealEnvironment, HUGGINGFACE_TOKEN};
use crate::model::gemma::{DeviceKind, GemmaModel};
use crate::model::ModelHandle;
use crate::slot::ModelLoader;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

pub const MEDGEMMA_REPO: &str = "google/medgemma-4b-it";
pub const MEDGEMMA_GGUF_REPO: &str = "unsloth/medgemma-4b-it-GGUF";
pub const MEDGEMMA_GGUF_FILE: &str = "medgemma-4b-it-Q4_K_M.gguf";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

#[derive(Debug, Clone, Deserialize)]
pub struct ModelSettings {
    /// Gated repository the token must have access to; also provides the tokenizer
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(default = "default_gguf_repo")]
    pub gguf_repo: String,
    #[serde(default = "default_gguf_file")]
    pub gguf_file: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub device: DeviceKind,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default)]
    pub preload: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            gguf_repo: default_gguf_repo(),
            gguf_file: default_gguf_file(),
            revision: default_revision(),
            endpoint: default_endpoint(),
            cache_dir: default_cache_dir(),
            device: DeviceKind::default(),
            token_env: default_token_env(),
            preload: false,
        }
    }
}

fn default_repo() -> String {
    MEDGEMMA_REPO.to_string()
}

fn default_gguf_repo() -> String {
    MEDGEMMA_GGUF_REPO.to_string()
}

fn default_gguf_file() -> String {
    MEDGEMMA_GGUF_FILE.to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_endpoint() -> String {
    HUGGINGFACE_ENDPOINT.to_string()
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("medgemma")
}

fn default_token_env() -> String {
    HUGGINGFACE_TOKEN.to_string()
}

/// Loads MedGemma from the Hugging Face registry
pub struct HubLoader {
    settings: ModelSettings,
    env: Arc<dyn Environment>,
}

impl HubLoader {
    pub fn new(settings: ModelSettings) -> Self {
        Self::with_environment(settings, Arc::new(RealEnvironment))
    }

    pub fn with_environment(settings: ModelSettings, env: Arc<dyn Environment>) -> Self {
        Self { settings, env }
    }

    /// A registry client authenticated with the configured token
    pub fn client(&self) -> ModelResult<HubClient> {
        let token = get_access_token(&self.settings.token_env, self.env.as_ref())?;
        HubClient::new(&self.settings.endpoint, token, &self.settings.token_env)
    }

    /// Validate the token and fetch both artifacts into the cache
    pub async fn fetch(&self) -> ModelResult<(PathBuf, PathBuf)> {
        let settings = &self.settings;
        let client = self.client()?;
        client.check_access(&settings.repo).await?;

        let tokenizer = client
            .download(
                &settings.repo,
                &settings.revision,
                TOKENIZER_FILE,
                &settings.cache_dir,
            )
            .await?;
        let weights = client
            .download(
                &settings.gguf_repo,
                &settings.revision,
                &settings.gguf_file,
                &settings.cache_dir,
            )
            .await?;
        Ok((weights, tokenizer))
    }
}

#[async_trait]
impl ModelLoader for HubLoader {
    async fn load(&self) -> ModelResult<Arc<dyn ModelHandle>> {
        let (weights, tokenizer) = self.fetch().await?;

        let name = self.settings.repo.clone();
        let device = self.settings.device;
        tracing::info!("Loading {} on {:?}", weights.display(), device);
        let model = tokio::task::spawn_blocking(move || {
            GemmaModel::load(name, weights, tokenizer, device)
        })
        .await??;

        Ok(Arc::new(model))
    }
}
