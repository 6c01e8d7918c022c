//! Minimal message types for LLM calls.
//!
//! Message roles: System (usually first in the list), User, Assistant.
//! Used by [`crate::llm::LlmClient`] implementations and by agents building prompts.

/// A single message in a conversation with a chat model.
///
/// Roles: system prompt, user input, assistant reply.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    /// System prompt; typically placed first in the message list.
    System(String),
    /// User input.
    User(String),
    /// Model/agent reply.
    Assistant(String),
}

impl Message {
    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::System(content.into())
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::User(content.into())
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant(content.into())
    }

    /// Returns the text content regardless of role.
    pub fn content(&self) -> &str {
        match self {
            Message::System(s) | Message::User(s) | Message::Assistant(s) => s,
        }
    }

    /// Appends text to this message's content in place.
    pub fn append(&mut self, suffix: &str) {
        match self {
            Message::System(s) | Message::User(s) | Message::Assistant(s) => s.push_str(suffix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: system/user/assistant constructors produce the correct variant with content.
    #[test]
    fn message_constructors() {
        let sys = Message::system("s");
        assert!(matches!(&sys, Message::System(c) if c == "s"));
        let usr = Message::user("u");
        assert!(matches!(&usr, Message::User(c) if c == "u"));
        let ast = Message::assistant("a");
        assert!(matches!(&ast, Message::Assistant(c) if c == "a"));
    }

    /// **Scenario**: append extends the content of any variant.
    #[test]
    fn message_append_extends_content() {
        let mut msg = Message::user("질문");
        msg.append(" 추가");
        assert_eq!(msg.content(), "질문 추가");
    }
}
