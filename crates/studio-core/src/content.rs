//! The host agent's message model and its flattening to plain text.
//!
//! Hosts describe messages as a role plus either a bare string or a list of
//! typed content blocks. Only literal text blocks of assistant messages are
//! ever shown to studio clients.

use serde::{Deserialize, Serialize};

/// Author of a conversation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human side of the conversation.
    User,
    /// The agent.
    Assistant,
    /// Output of a tool invocation.
    ToolResult,
    /// Any role this crate does not model.
    #[serde(other)]
    Other,
}

/// One typed segment of a message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Literal text.
    Text {
        /// The text.
        text: String,
    },
    /// Model reasoning; never shown.
    Thinking {
        /// The reasoning text.
        thinking: String,
    },
    /// A tool invocation.
    ToolCall {
        /// Tool call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Tool arguments.
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// Any other block kind (images, citations, ...).
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Build a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Message body: either a bare string or typed blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Bare string body.
    Text(String),
    /// Structured body.
    Blocks(Vec<ContentBlock>),
}

/// One conversation entry as reported by the host agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Who authored the message.
    pub role: MessageRole,
    /// Message body.
    pub content: MessageContent,
}

impl AgentMessage {
    /// An assistant message made of the given blocks.
    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// An assistant message with a single text block.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(vec![ContentBlock::text(text)])
    }

    /// A user message with a bare string body.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Plain text of an assistant message.
    ///
    /// Concatenates the text blocks in order, separated by newlines, and
    /// ignores every other block kind. Returns `None` for non-assistant
    /// messages and for bodies that are empty or whitespace-only.
    pub fn assistant_text_content(&self) -> Option<String> {
        if self.role != MessageRole::Assistant {
            return None;
        }
        let text = match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    }
}

/// Text of the most recent assistant message that has any.
pub fn latest_assistant_text(entries: &[AgentMessage]) -> Option<String> {
    entries
        .iter()
        .rev()
        .find_map(AgentMessage::assistant_text_content)
}
