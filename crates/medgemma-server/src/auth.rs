use crate::error::ApiError;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use std::collections::HashMap;

/// The caller a request is made on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
}

impl User {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self { id: id.into() }
    }

    /// Used when the server runs without API keys
    pub fn local() -> Self {
        Self::new("local")
    }
}

/// Identity and permission checks, owned by the surrounding backend
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<User, ApiError>;

    /// Whether `user` may chat with `model`. Rejections are `PermissionDenied`.
    async fn check_permissions(&self, user: &User, model: &str) -> Result<(), ApiError>;
}

/// Bearer API keys from configuration. With no keys configured every request is the local user.
pub struct StaticKeyAuthorizer {
    keys: HashMap<String, String>,
}

impl StaticKeyAuthorizer {
    pub fn new(keys: HashMap<String, String>) -> Self {
        Self { keys }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

#[async_trait]
impl Authorizer for StaticKeyAuthorizer {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<User, ApiError> {
        if self.keys.is_empty() {
            return Ok(User::local());
        }

        bearer_token(headers)
            .and_then(|token| self.keys.get(token))
            .map(User::new)
            .ok_or(ApiError::Unauthorized)
    }

    async fn check_permissions(&self, _user: &User, _model: &str) -> Result<(), ApiError> {
        Ok(())
    }
}
