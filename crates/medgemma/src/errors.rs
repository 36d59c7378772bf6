use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Hugging Face access token not configured. Please set the {0} environment variable.")]
    Unconfigured(String),

    #[error("Invalid Hugging Face access token. Please check your {0} environment variable.")]
    InvalidCredential(String),

    #[error("Model {0} not found. Please check if you have access to this model on Hugging Face.")]
    ModelAccessDenied(String),

    #[error("Model registry request failed: {0}")]
    Registry(String),

    #[error("Failed to load model: {0}")]
    Load(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Client disconnected")]
    ClientDisconnected,
}

impl ModelError {
    /// Configuration and access problems the client can act on, as opposed to runtime failures
    pub fn is_access_error(&self) -> bool {
        matches!(
            self,
            ModelError::Unconfigured(_)
                | ModelError::InvalidCredential(_)
                | ModelError::ModelAccessDenied(_)
        )
    }
}

impl From<candle_core::Error> for ModelError {
    fn from(err: candle_core::Error) -> Self {
        ModelError::Generation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ModelError {
    fn from(err: tokio::task::JoinError) -> Self {
        ModelError::Generation(format!("Task join error: {}", err))
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
