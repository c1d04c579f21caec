// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token estimation.

use crate::types::Message;

/// Characters per token for the default estimator (approximate).
const CHARS_PER_TOKEN: f64 = 4.0;

/// Fixed per-message overhead for role and framing.
const MESSAGE_OVERHEAD: u64 = 4;

/// Counts tokens for budgeting. Swap in a real tokenizer where accuracy matters.
pub trait TokenCounter: Send + Sync {
    fn count(&self, message: &Message) -> u64;

    fn count_all(&self, messages: &[Message]) -> u64 {
        messages.iter().map(|m| self.count(m)).sum()
    }
}

/// Character-based estimate: about four characters per token plus framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl CharEstimator {
    fn estimate_text(text: &str) -> u64 {
        (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u64
    }
}

impl TokenCounter for CharEstimator {
    fn count(&self, message: &Message) -> u64 {
        let calls: u64 = message
            .tool_calls
            .iter()
            .map(|call| Self::estimate_text(&call.name) + Self::estimate_text(&call.arguments.to_string()))
            .sum();
        MESSAGE_OVERHEAD + Self::estimate_text(&message.content) + calls
    }
}
