//! Prompt rendering and chat message assembly.

use crate::exact::Value;
use crate::variant::Operation;
use serde::{Deserialize, Serialize};

/// Instruction line preceding every expression
pub const INSTRUCTION: &str =
    "Compute the following and reply with just the numeric result (no explanation):";

/// Chat role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// User turn
    User,
    /// Assistant turn
    Assistant,
}

impl Role {
    /// Lowercase role name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A role-tagged chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

impl Message {
    /// Create a message
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// Render the user-turn text for `lhs <symbol> rhs`
#[must_use]
pub fn render(lhs: &Value, operation: Operation, rhs: &Value) -> String {
    format!("{INSTRUCTION}\n   {lhs} {} {rhs}", operation.symbol())
}

/// Assemble the ordered message list: optional system prompt, then the
/// extra-context dialogue, then the rendered prompt as the final user turn.
#[must_use]
pub fn build_messages(system: Option<&str>, extra_context: &[Message], prompt: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(extra_context.len() + 2);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(Message::system(system));
    }
    messages.extend_from_slice(extra_context);
    messages.push(Message::user(prompt));
    messages
}
