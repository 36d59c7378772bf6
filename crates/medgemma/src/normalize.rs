//! Resolve non-text content parts into text before prompt formatting.
use crate::models::content::ContentPart;
use crate::models::message::Message;
use crate::models::role::Role;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Resolve an uploaded path against the upload root. Leading slashes are stripped so that
/// `/uploads/a.txt` stays inside the root.
fn resolve_upload(root: &Path, path: &str) -> PathBuf {
    root.join(path.trim_start_matches('/'))
}

/// Placeholder used wherever an image stands in for text
pub fn image_placeholder(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path);
    format!("[Image file: {}]", name)
}

/// Convert one part into a text part. Returns None when the part cannot be resolved;
/// the failure is logged and the part is dropped from the message.
pub async fn normalize_part(part: ContentPart, upload_root: &Path) -> Option<ContentPart> {
    match part {
        ContentPart::Text { .. } => Some(part),
        ContentPart::Url { content } => Some(ContentPart::text(content)),
        ContentPart::Image { content } => Some(ContentPart::text(image_placeholder(&content))),
        ContentPart::File { content } => {
            let path = resolve_upload(upload_root, &content);
            match fs::read_to_string(&path).await {
                Ok(text) => Some(ContentPart::text(text)),
                Err(e) => {
                    tracing::error!("FILE_PROCESS_ERROR: {}: {}", path.display(), e);
                    None
                }
            }
        }
    }
}

/// Normalize a whole message. User content is resolved part by part; assistant and system
/// content only ever contributes its text.
pub async fn normalize_message(message: Message, upload_root: &Path) -> Message {
    let content = match message.role {
        Role::User => {
            let mut content = Vec::with_capacity(message.content.len());
            for part in message.content {
                if let Some(part) = normalize_part(part, upload_root).await {
                    content.push(part);
                }
            }
            content
        }
        Role::Assistant | Role::System => message
            .content
            .into_iter()
            .filter(|part| part.as_text().is_some())
            .collect(),
    };
    Message::new(message.role, content)
}

/// Normalize every message of a conversation, keeping their order
pub async fn normalize_history(messages: Vec<Message>, upload_root: &Path) -> Vec<Message> {
    let mut normalized = Vec::with_capacity(messages.len());
    for message in messages {
        normalized.push(normalize_message(message, upload_root).await);
    }
    normalized
}
