//! ConversationHistory: the bounded message list carried between turns.
//!
//! Pure data: append, truncate, and render for the model endpoint. Nothing
//! here touches the session registry.

use crate::inference::types::ChatMessage;

use super::types::ConversationMessage;

// ─── ConversationHistory ────────────────────────────────────────────────────

/// Ordered conversation, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A history that starts with a system prompt.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ConversationMessage::system(prompt)],
        }
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.last()
    }

    /// Keep only the most recent `limit` messages, dropping the oldest first.
    ///
    /// Returns how many messages were dropped. The system prompt gets no
    /// special treatment.
    pub fn truncate_to_recent(&mut self, limit: usize) -> usize {
        let excess = self.messages.len().saturating_sub(limit);
        if excess > 0 {
            self.messages.drain(..excess);
        }
        excess
    }

    /// Render every message in wire form, in order.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(ConversationMessage::to_chat_message)
            .collect()
    }
}

impl From<Vec<ConversationMessage>> for ConversationHistory {
    fn from(messages: Vec<ConversationMessage>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a ConversationHistory {
    type Item = &'a ConversationMessage;
    type IntoIter = std::slice::Iter<'a, ConversationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Cut `s` to at most `max_chars` characters.
///
/// Counts `char`s, not bytes, so the result is always valid UTF-8.
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
