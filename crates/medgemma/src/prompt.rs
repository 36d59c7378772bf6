//! Flatten a conversation into the single prompt string the model consumes.
//!
//! Every turn is wrapped in `<|im_start|>{role}\n...<|im_end|>\n` and the prompt ends with an
//! open assistant turn. Delimiters inside user text are not escaped, so a user can forge
//! turns; the model is the only consumer of this string.
use crate::errors::{ModelError, ModelResult};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::prompt_template::load_prompt;
use serde::Serialize;

pub const TURN_START: &str = "<|im_start|>";
pub const TURN_END: &str = "<|im_end|>";

const CHAT_TEMPLATE: &str = "{% if system %}<|im_start|>system\n{{ system }}<|im_end|>\n{% endif %}\
{% for turn in turns %}<|im_start|>{{ turn.role }}\n{{ turn.text }}<|im_end|>\n{% endfor %}\
<|im_start|>assistant\n";

#[derive(Serialize)]
struct Turn<'a> {
    role: &'a str,
    text: String,
}

#[derive(Serialize)]
struct ChatContext<'a> {
    system: Option<&'a str>,
    turns: Vec<Turn<'a>>,
}

fn turn_text(message: &Message) -> String {
    match message.role {
        Role::User => message.text_parts().collect::<Vec<_>>().join(" "),
        Role::Assistant | Role::System => message.text_parts().collect(),
    }
}

/// Build the prompt for a conversation. `messages` already contains the new user turn as its
/// last element and every message has been normalized.
pub fn format_prompt(messages: &[Message], system_message: Option<&str>) -> ModelResult<String> {
    let context = ChatContext {
        system: system_message.filter(|s| !s.is_empty()),
        turns: messages
            .iter()
            .map(|message| Turn {
                role: message.role.as_str(),
                text: turn_text(message),
            })
            .collect(),
    };

    load_prompt(CHAT_TEMPLATE, &context)
        .map_err(|e| ModelError::Generation(format!("Failed to render prompt: {}", e)))
}
