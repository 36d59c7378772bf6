//! Conversation history and token usage persistence.
//!
//! The bundled store keeps one JSONL file per conversation under a directory per user, plus a
//! per-user usage ledger.
use crate::auth::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medgemma::models::content::ContentPart;
use medgemma::models::message::Message;
use medgemma::models::role::Role;
use medgemma::models::usage::TokenUsage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const MODEL_NAME: &str = "medgemma";
// Not a valid conversation id, so it cannot collide with a conversation file
const USAGE_LEDGER: &str = "usage.ledger";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt conversation record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One exchange: the user message as it was sent and the reply it got
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_message: Vec<ContentPart>,
    pub assistant: String,
    /// Absent when a stream ended before its usage record arrived
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub incomplete: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn complete(user_message: Vec<ContentPart>, assistant: String, usage: TokenUsage) -> Self {
        Self {
            user_message,
            assistant,
            token_usage: Some(usage),
            incomplete: false,
            created_at: Utc::now(),
        }
    }

    pub fn partial(user_message: Vec<ContentPart>, assistant: String) -> Self {
        Self {
            user_message,
            assistant,
            token_usage: None,
            incomplete: true,
            created_at: Utc::now(),
        }
    }

    /// The turn as history: the user message followed by the reply, if any
    pub fn into_messages(self) -> Vec<Message> {
        let mut messages = vec![Message::new(Role::User, self.user_message)];
        if !self.assistant.is_empty() {
            messages.push(Message::assistant().with_text(self.assistant));
        }
        messages
    }
}

/// A line in the usage ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub conversation_id: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Earlier messages of the conversation, oldest first. Unknown conversations are empty.
    async fn history(&self, user: &User, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Append a turn, and record its usage when it has any
    async fn save_turn(
        &self,
        user: &User,
        conversation_id: &str,
        turn: ConversationTurn,
    ) -> Result<(), StoreError>;
}

/// Reject anything that could escape the storage directory
fn validate_id(id: &str) -> Result<&str, StoreError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

pub struct JsonlStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn user_dir(&self, user: &User) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(validate_id(&user.id)?))
    }

    fn conversation_file(&self, user: &User, conversation_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self
            .user_dir(user)?
            .join(format!("{}.jsonl", validate_id(conversation_id)?)))
    }

    /// Usage records for a user, oldest first
    #[cfg(test)]
    pub async fn usage(&self, user: &User) -> Result<Vec<UsageRecord>, StoreError> {
        read_lines(&self.user_dir(user)?.join(USAGE_LEDGER)).await
    }
}

async fn read_lines<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>, StoreError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StoreError::from))
        .collect()
}

async fn append_line<T: Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl ConversationStore for JsonlStore {
    async fn history(&self, user: &User, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let turns: Vec<ConversationTurn> =
            read_lines(&self.conversation_file(user, conversation_id)?).await?;
        Ok(turns
            .into_iter()
            .flat_map(ConversationTurn::into_messages)
            .collect())
    }

    async fn save_turn(
        &self,
        user: &User,
        conversation_id: &str,
        turn: ConversationTurn,
    ) -> Result<(), StoreError> {
        let path = self.conversation_file(user, conversation_id)?;
        let user_dir = self.user_dir(user)?;

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&user_dir).await?;
        append_line(&path, &turn).await?;

        if let Some(usage) = turn.token_usage {
            let record = UsageRecord {
                conversation_id: conversation_id.to_string(),
                model: MODEL_NAME.to_string(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                created_at: turn.created_at,
            };
            append_line(&user_dir.join(USAGE_LEDGER), &record).await?;
        }

        tracing::debug!(
            "Saved turn for conversation {} (incomplete: {})",
            conversation_id,
            turn.incomplete
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unknown_conversation_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::new(dir.path());
        let history = store.history(&User::local(), "conv-1").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_turns_round_trip_as_history() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::new(dir.path());
        let user = User::new("alice");

        store
            .save_turn(
                &user,
                "conv-1",
                ConversationTurn::complete(
                    vec![ContentPart::text("I feel dizzy"), ContentPart::file("/notes.txt")],
                    "When did it start?".to_string(),
                    TokenUsage::new(40, 5),
                ),
            )
            .await
            .unwrap();
        store
            .save_turn(
                &user,
                "conv-1",
                ConversationTurn::partial(vec![ContentPart::text("This morning")], "Ok".to_string()),
            )
            .await
            .unwrap();

        let history = store.history(&user, "conv-1").await.unwrap();
        assert_eq!(
            history,
            vec![
                Message::user()
                    .with_text("I feel dizzy")
                    .with_content(ContentPart::file("/notes.txt")),
                Message::assistant().with_text("When did it start?"),
                Message::user().with_text("This morning"),
                Message::assistant().with_text("Ok"),
            ]
        );

        // only the complete turn reaches the ledger
        let usage = store.usage(&user).await.unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0].conversation_id, "conv-1");
        assert_eq!(usage[0].model, MODEL_NAME);
        assert_eq!((usage[0].input_tokens, usage[0].output_tokens), (40, 5));
    }

    #[tokio::test]
    async fn test_conversations_are_per_user() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::new(dir.path());

        store
            .save_turn(
                &User::new("alice"),
                "shared-id",
                ConversationTurn::complete(
                    vec![ContentPart::text("hi")],
                    "hello".to_string(),
                    TokenUsage::new(1, 1),
                ),
            )
            .await
            .unwrap();

        let history = store.history(&User::new("bob"), "shared-id").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::new(dir.path());

        for id in ["../escape", "a/b", "", "conv.jsonl"] {
            let result = store.history(&User::local(), id).await;
            assert!(matches!(result, Err(StoreError::InvalidId(_))), "{:?}", id);
        }
    }

    #[test]
    fn test_turn_wire_shape() {
        let turn = ConversationTurn::partial(vec![ContentPart::text("q")], "a".to_string());
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["incomplete"], true);
        assert_eq!(value["token_usage"], serde_json::Value::Null);
        assert_eq!(value["user_message"][0]["type"], "text");
    }
}
