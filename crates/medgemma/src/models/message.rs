use super::content::ContentPart;
use super::role::Role;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message in a conversation with the model
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentPart>) -> Self {
        Message { role, content }
    }

    /// Create an empty user message
    pub fn user() -> Self {
        Message::new(Role::User, Vec::new())
    }

    /// Create an empty assistant message
    pub fn assistant() -> Self {
        Message::new(Role::Assistant, Vec::new())
    }

    /// Add any ContentPart to the message
    pub fn with_content(mut self, content: ContentPart) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentPart::text(text))
    }

    /// Text parts in order, skipping anything that was not normalized to text
    pub fn text_parts(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(ContentPart::as_text)
    }
}

/// The user turn as it arrives over HTTP: either a bare string or a list of parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl UserContent {
    pub fn into_parts(self) -> Vec<ContentPart> {
        match self {
            UserContent::Text(text) => vec![ContentPart::text(text)],
            UserContent::Parts(parts) => parts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_parts_skip_unresolved_content() {
        let message = Message::user()
            .with_text("first")
            .with_content(ContentPart::image("scan.png"))
            .with_text("second");

        let texts: Vec<&str> = message.text_parts().collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn test_user_content_accepts_string_or_parts() {
        let bare: UserContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(bare.into_parts(), vec![ContentPart::text("hello")]);

        let parts: UserContent =
            serde_json::from_value(json!([{"type": "text", "text": "hi"}])).unwrap();
        assert_eq!(parts.into_parts(), vec![ContentPart::text("hi")]);
    }
}
