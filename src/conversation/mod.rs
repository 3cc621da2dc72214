//! ConversationHistory.
//!
//! Grounded on `llm/chat_thread.rs`'s ordered message list shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block within a `ConversationMessage`'s content sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Content is either a plain string or an ordered sequence of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ConversationMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// `tool_use` ids present in this message's blocks, in order.
    fn tool_use_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => vec![],
        }
    }

    fn tool_result_ids(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => vec![],
        }
    }
}

/// Error raised when a message violates the conversation's tool-use/
/// tool-result referential invariant.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("tool_result references unknown tool_use id '{0}'")]
    DanglingToolResult(String),
}

/// Ordered, append-only list of role-tagged messages.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message, enforcing that every `tool_result` references an
    /// earlier `tool_use` id in the same history.
    pub fn push(&mut self, message: ConversationMessage) -> Result<(), ConversationError> {
        for tr_id in message.tool_result_ids() {
            let seen = self
                .messages
                .iter()
                .any(|m| m.tool_use_ids().contains(&tr_id));
            if !seen {
                return Err(ConversationError::DanglingToolResult(tr_id.to_string()));
            }
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn last_message(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    pub fn length(&self) -> usize {
        self.messages.len()
    }

    pub fn get_messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// Restore from a serialized snapshot without re-validating
    /// invariants already enforced when it was first built (used to
    /// resume a `LoopSession`).
    pub fn from_messages(messages: Vec<ConversationMessage>) -> Self {
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_and_last_message_reflect_pushes() {
        let mut history = ConversationHistory::new();
        history.push(ConversationMessage::user_text("hi")).unwrap();
        history
            .push(ConversationMessage::assistant_text("hello"))
            .unwrap();
        assert_eq!(history.length(), 2);
        matches!(
            history.last_message().unwrap().content,
            MessageContent::Text(ref s) if s == "hello"
        );
    }

    #[test]
    fn tool_result_after_matching_tool_use_is_accepted() {
        let mut history = ConversationHistory::new();
        history
            .push(ConversationMessage::assistant_blocks(vec![
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "read_file".into(),
                    input: serde_json::json!({"path": "a.rs"}),
                },
            ]))
            .unwrap();
        let result = history.push(ConversationMessage::user_blocks(vec![
            ContentBlock::ToolResult {
                tool_use_id: "tu_1".into(),
                content: "contents".into(),
            },
        ]));
        assert!(result.is_ok());
    }

    #[test]
    fn dangling_tool_result_is_rejected() {
        let mut history = ConversationHistory::new();
        let result = history.push(ConversationMessage::user_blocks(vec![
            ContentBlock::ToolResult {
                tool_use_id: "missing".into(),
                content: "x".into(),
            },
        ]));
        assert!(matches!(
            result,
            Err(ConversationError::DanglingToolResult(_))
        ));
    }

    #[test]
    fn order_of_blocks_preserved_in_round_trip() {
        let msg = ConversationMessage::assistant_blocks(vec![
            ContentBlock::Text {
                text: "thinking".into(),
            },
            ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "search".into(),
                input: serde_json::json!({}),
            },
        ]);
        let json = serde_json::to_string(&msg).unwrap();
        let back: ConversationMessage = serde_json::from_str(&json).unwrap();
        match back.content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(blocks[0], ContentBlock::Text { .. }));
                assert!(matches!(blocks[1], ContentBlock::ToolUse { .. }));
            }
            _ => panic!("expected blocks"),
        }
    }
}
