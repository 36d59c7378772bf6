use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// A typed piece of message content
///
/// Only `Text` reaches the prompt directly. The other variants carry a path or URL in
/// `content` and are resolved to text before formatting.
pub enum ContentPart {
    Text { text: String },
    Image { content: String },
    File { content: String },
    Url { content: String },
}

impl ContentPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image<S: Into<String>>(path: S) -> Self {
        ContentPart::Image {
            content: path.into(),
        }
    }

    pub fn file<S: Into<String>>(path: S) -> Self {
        ContentPart::File {
            content: path.into(),
        }
    }

    pub fn url<S: Into<String>>(url: S) -> Self {
        ContentPart::Url {
            content: url.into(),
        }
    }

    /// Get the text if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_matches_frontend() {
        let parts: Vec<ContentPart> = serde_json::from_value(json!([
            {"type": "text", "text": "What does this scan show?"},
            {"type": "image", "content": "/uploads/scan.png"},
            {"type": "file", "content": "/uploads/notes.txt"},
            {"type": "url", "content": "https://example.org/guideline"}
        ]))
        .unwrap();

        assert_eq!(parts[0], ContentPart::text("What does this scan show?"));
        assert_eq!(parts[1], ContentPart::image("/uploads/scan.png"));
        assert!(matches!(parts[2], ContentPart::File { .. }));
        assert_eq!(parts[3].as_text(), None);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<ContentPart, _> =
            serde_json::from_value(json!({"type": "audio", "content": "x.wav"}));
        assert!(result.is_err());
    }
}
