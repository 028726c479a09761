//! Heuristic token estimation.
//!
//! Deterministic character-count approximation; it is not tokenizer-exact and
//! is only used to compare against budgets.

use crate::llm::{ChatMessage, Role};

/// Characters per token used when no policy override is given.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.8;

/// Estimated tokens for `chars` characters.
pub fn tokens_for_chars(chars: usize, chars_per_token: f64) -> u64 {
    if chars == 0 {
        return 0;
    }
    let per_token = if chars_per_token > 0.0 {
        chars_per_token
    } else {
        DEFAULT_CHARS_PER_TOKEN
    };
    (chars as f64 / per_token).ceil() as u64
}

pub fn estimate_text(text: &str, chars_per_token: f64) -> u64 {
    tokens_for_chars(text.chars().count(), chars_per_token)
}

fn role_label(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Characters a message contributes: role label, content, and any tool-call
/// names and argument strings.
pub fn message_chars(message: &ChatMessage) -> usize {
    let mut chars = role_label(&message.role).len();
    if let Some(content) = &message.content {
        chars += content.chars().count();
    }
    for call in message.tool_calls.iter().flatten() {
        chars += call.function.name.chars().count() + call.function.arguments.chars().count();
    }
    chars
}

pub fn estimate_messages(messages: &[ChatMessage], chars_per_token: f64) -> u64 {
    let chars: usize = messages.iter().map(message_chars).sum();
    tokens_for_chars(chars, chars_per_token)
}
