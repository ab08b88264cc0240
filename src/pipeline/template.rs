//! Chat prompt templating.
//!
//! Every request is rendered into the same two-turn shape: a fixed system
//! prompt followed by the user's prompt, untouched.

use serde::{Deserialize, Serialize};

/// System prompt used when the config does not override it.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message, in the provider wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Fixed prompt template wrapping each user prompt.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    system_prompt: String,
}

impl PromptTemplate {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// Render a user prompt into the messages sent upstream.
    pub fn render(&self, prompt: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system_prompt.clone()),
            ChatMessage::user(prompt),
        ]
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_is_system_then_user() {
        let template = PromptTemplate::default();
        let messages = template.render("hello there");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system(DEFAULT_SYSTEM_PROMPT));
        assert_eq!(messages[1], ChatMessage::user("hello there"));
    }

    #[test]
    fn test_custom_system_prompt() {
        let template = PromptTemplate::new("Answer in haiku.");
        let messages = template.render("why is the sky blue?");

        assert_eq!(messages[0].content, "Answer in haiku.");
        assert_eq!(messages[0].role, Role::System);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
