use crate::errors::{ModelError, ModelResult};
use std::env;
#[cfg(test)]
use mockall::automock;

/// Environment variable holding the Hugging Face access token
pub const HUGGINGFACE_TOKEN: &str = "HUGGINGFACE_TOKEN";

#[cfg_attr(test, automock)]
pub trait Environment: Send + Sync {
    fn get_var(&self, key: &str) -> Result<String, env::VarError>;
}

// Implement the trait for the actual environment
pub struct RealEnvironment;

impl Environment for RealEnvironment {
    fn get_var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

/// Read the registry token. A missing or blank value is `Unconfigured`.
pub fn get_access_token(token_env: &str, env: &dyn Environment) -> ModelResult<String> {
    match env.get_var(token_env) {
        Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => {
            tracing::error!("{} environment variable not set", token_env);
            Err(ModelError::Unconfigured(token_env.to_string()))
        }
    }
}

/// First characters of a token, safe to print
pub fn token_preview(token: &str) -> String {
    let preview: String = token.chars().take(8).collect();
    format!("{}...", preview)
}
