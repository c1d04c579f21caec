// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context window management.
//!
//! Bounds the history an agent step sends to its model:
//! - System messages are always kept.
//! - At most `max_messages` of the most recent non-system messages are kept.
//! - Oldest non-system messages are then dropped until the estimated token
//!   count fits `max_tokens`.
//! - A tool result whose originating call was dropped is dropped with it.
//! - Optionally, a single synthetic summary stands in for what was dropped,
//!   if it still fits the budget.
//!
//! Trimming is idempotent: trimming an already trimmed history changes nothing.

mod tokens;

pub use tokens::{CharEstimator, TokenCounter};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::types::{Message, Role};

/// Lower bound of the target utilization band (percent).
pub const TARGET_BAND_LOW: f64 = 70.0;
/// Upper bound of the target utilization band (percent).
pub const TARGET_BAND_HIGH: f64 = 85.0;
/// Utilization above this triggers a warning (percent).
pub const WARNING_THRESHOLD: f64 = 90.0;

/// Prefix identifying synthetic summary messages.
const SUMMARY_PREFIX: &str = "[Earlier context trimmed:";

/// Where utilization sits relative to the target band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UtilizationLevel {
    /// Below the band; room to keep more history.
    Low,
    /// Within 70–85%.
    Target,
    /// Above the band but not yet alarming.
    High,
    /// Above 90%.
    Critical,
}

impl UtilizationLevel {
    pub fn from_percent(percent: f64) -> Self {
        if percent > WARNING_THRESHOLD {
            Self::Critical
        } else if percent > TARGET_BAND_HIGH {
            Self::High
        } else if percent >= TARGET_BAND_LOW {
            Self::Target
        } else {
            Self::Low
        }
    }
}

/// Per-step history limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextBudget {
    pub max_messages: usize,
    pub max_tokens: u64,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_messages: 40,
            max_tokens: 8000,
        }
    }
}

/// Utilization measurement returned to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub tokens: u64,
    pub max_tokens: u64,
    pub percent: f64,
    pub level: UtilizationLevel,
}

impl Utilization {
    /// True above the warning threshold.
    pub fn is_warning(&self) -> bool {
        self.level == UtilizationLevel::Critical
    }
}

/// Result of a trim, with what was removed.
#[derive(Debug, Clone)]
pub struct TrimOutcome {
    pub messages: Vec<Message>,
    /// Non-system messages removed.
    pub dropped: usize,
    /// Whether a summary message was inserted.
    pub summarized: bool,
}

/// Trims histories to a budget and reports window utilization.
#[derive(Clone)]
pub struct ContextManager {
    counter: Arc<dyn TokenCounter>,
    summarize_dropped: bool,
}

impl ContextManager {
    /// Manager using the character estimator, without summaries.
    pub fn new() -> Self {
        Self {
            counter: Arc::new(CharEstimator),
            summarize_dropped: false,
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Replace dropped runs with a synthetic summary message.
    pub fn with_summaries(mut self, enabled: bool) -> Self {
        self.summarize_dropped = enabled;
        self
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    /// Trim `messages` to at most `max_messages` non-system messages and
    /// `max_tokens` estimated tokens.
    pub fn trim(&self, messages: &[Message], max_messages: usize, max_tokens: u64) -> Vec<Message> {
        self.trim_with_stats(messages, max_messages, max_tokens).messages
    }

    /// Like [`trim`](Self::trim), also reporting what was removed.
    pub fn trim_with_stats(
        &self,
        messages: &[Message],
        max_messages: usize,
        max_tokens: u64,
    ) -> TrimOutcome {
        let non_system: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| !m.is_system())
            .map(|(i, _)| i)
            .collect();

        let start = non_system.len().saturating_sub(max_messages);
        let mut kept: Vec<usize> = non_system[start..].to_vec();
        drop_orphaned_results(messages, &mut kept);

        let system_tokens: u64 = messages
            .iter()
            .filter(|m| m.is_system())
            .map(|m| self.counter.count(m))
            .sum();
        let mut kept_tokens: u64 = kept.iter().map(|&i| self.counter.count(&messages[i])).sum();

        while system_tokens + kept_tokens > max_tokens && !kept.is_empty() {
            let removed = kept.remove(0);
            kept_tokens -= self.counter.count(&messages[removed]);
            let before = kept.len();
            drop_orphaned_results(messages, &mut kept);
            if kept.len() != before {
                kept_tokens = kept.iter().map(|&i| self.counter.count(&messages[i])).sum();
            }
        }

        let kept_set: HashSet<usize> = kept.iter().copied().collect();
        let dropped_indices: Vec<usize> = non_system
            .iter()
            .copied()
            .filter(|i| !kept_set.contains(i))
            .collect();

        let summary = if self.summarize_dropped && !dropped_indices.is_empty() {
            let summary = summarize(messages, &dropped_indices);
            let fits = system_tokens + kept_tokens + self.counter.count(&summary) <= max_tokens;
            fits.then_some(summary)
        } else {
            None
        };

        let first_kept = kept.first().copied();
        let mut result = Vec::with_capacity(messages.len() - dropped_indices.len() + 1);
        let mut summary_slot = summary;
        let mut summarized = false;
        for (i, message) in messages.iter().enumerate() {
            if Some(i) == first_kept {
                if let Some(summary) = summary_slot.take() {
                    result.push(summary);
                    summarized = true;
                }
            }
            if message.is_system() || kept_set.contains(&i) {
                result.push(message.clone());
            }
        }
        // With nothing kept there is no anchor; the summary goes last.
        if let Some(summary) = summary_slot {
            result.push(summary);
            summarized = true;
        }

        if !dropped_indices.is_empty() {
            tracing::debug!(
                dropped = dropped_indices.len(),
                kept = kept.len(),
                summarized,
                "Trimmed context"
            );
        }

        TrimOutcome {
            messages: result,
            dropped: dropped_indices.len(),
            summarized,
        }
    }

    /// Trim to a [`ContextBudget`].
    pub fn fit(&self, messages: &[Message], budget: &ContextBudget) -> TrimOutcome {
        self.trim_with_stats(messages, budget.max_messages, budget.max_tokens)
    }

    /// Token usage of `messages` as a percentage of `max_tokens`.
    pub fn utilization(&self, messages: &[Message], max_tokens: u64) -> f64 {
        percent(self.counter.count_all(messages), max_tokens)
    }

    /// Utilization with its band; logs a warning above the threshold.
    pub fn assess(&self, messages: &[Message], max_tokens: u64) -> Utilization {
        let tokens = self.counter.count_all(messages);
        let percent = percent(tokens, max_tokens);
        let level = UtilizationLevel::from_percent(percent);
        if level == UtilizationLevel::Critical {
            tracing::warn!(
                tokens,
                max_tokens,
                percent = format!("{:.1}", percent),
                "Context window above {}%",
                WARNING_THRESHOLD
            );
        }
        Utilization {
            tokens,
            max_tokens,
            percent,
            level,
        }
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(tokens: u64, max_tokens: u64) -> f64 {
    if max_tokens == 0 {
        return if tokens == 0 { 0.0 } else { 100.0 };
    }
    tokens as f64 / max_tokens as f64 * 100.0
}

/// Remove tool results whose requesting assistant message is not kept.
fn drop_orphaned_results(messages: &[Message], kept: &mut Vec<usize>) {
    let live_calls: HashSet<&str> = kept
        .iter()
        .flat_map(|&i| messages[i].tool_calls.iter().map(|c| c.id.as_str()))
        .collect();
    kept.retain(|&i| {
        let message = &messages[i];
        match (&message.role, &message.tool_call_id) {
            (Role::Tool, Some(id)) => live_calls.contains(id.as_str()),
            _ => true,
        }
    });
}

/// One-line digest of the dropped messages.
fn summarize(messages: &[Message], dropped: &[usize]) -> Message {
    let mut users = 0;
    let mut assistants = 0;
    let mut tools = 0;
    for &i in dropped {
        match messages[i].role {
            Role::User => users += 1,
            Role::Assistant => assistants += 1,
            Role::Tool => tools += 1,
            Role::System => {}
        }
    }

    let opening: String = dropped
        .iter()
        .map(|&i| &messages[i])
        .find(|m| m.role == Role::User)
        .map(|m| m.content.split_whitespace().take(8).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let mut text = format!(
        "{} {} messages omitted ({} user, {} assistant, {} tool)",
        SUMMARY_PREFIX,
        dropped.len(),
        users,
        assistants,
        tools
    );
    if !opening.is_empty() {
        text.push_str(&format!("; began with \"{}\"", opening));
    }
    text.push(']');
    Message::system(text)
}
