// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context trimming over realistic histories.

use troupe::context::{ContextBudget, ContextManager};
use troupe::types::ToolCallMeta;
use troupe::Message;

/// Two system prompts followed by `turns` alternating user/assistant messages.
fn history(turns: usize) -> Vec<Message> {
    let mut messages = vec![
        Message::system("You are a research agent."),
        Message::system("Known so far: scope=repository X"),
    ];
    for i in 0..turns {
        if i % 2 == 0 {
            messages.push(Message::user(format!("question {i}")));
        } else {
            messages.push(Message::assistant(format!("answer {i}")));
        }
    }
    messages
}

#[test]
fn test_twenty_messages_capped_at_fifteen() {
    let manager = ContextManager::new();
    let messages = history(20);

    let trimmed = manager.trim(&messages, 15, 100_000);

    let system: Vec<&Message> = trimmed.iter().filter(|m| m.is_system()).collect();
    let rest: Vec<&Message> = trimmed.iter().filter(|m| !m.is_system()).collect();
    assert_eq!(system.len(), 2);
    assert_eq!(rest.len(), 15);
    // The 15 most recent, in original order.
    let expected: Vec<&Message> = messages[7..].iter().collect();
    assert_eq!(rest, expected);
    assert_eq!(trimmed.len(), 17);
}

#[test]
fn test_trim_is_idempotent() {
    let manager = ContextManager::new();
    let once = manager.trim(&history(20), 15, 100_000);
    let twice = manager.trim(&once, 15, 100_000);
    assert_eq!(once, twice);
}

#[test]
fn test_system_messages_survive_any_budget() {
    let manager = ContextManager::new();
    let trimmed = manager.trim(&history(20), 0, 0);
    assert_eq!(trimmed.len(), 2);
    assert!(trimmed.iter().all(Message::is_system));
}

#[test]
fn test_token_budget_drops_oldest_first() {
    let manager = ContextManager::new();
    let messages = history(20);
    let full = manager.assess(&messages, u64::MAX).tokens;

    let outcome = manager.fit(
        &messages,
        &ContextBudget {
            max_messages: 100,
            max_tokens: full / 2,
        },
    );

    assert!(outcome.dropped > 0);
    assert!(manager.assess(&outcome.messages, u64::MAX).tokens <= full / 2);
    assert_eq!(outcome.messages.last(), messages.last());
}

#[test]
fn test_tool_results_never_orphaned() {
    let mut messages = vec![Message::system("sys")];
    messages.push(Message::user("find retry code"));
    messages.push(Message::assistant_with_calls(
        "",
        vec![ToolCallMeta {
            id: "call_1".into(),
            name: "grep".into(),
            arguments: serde_json::json!({"pattern": "retry"}),
        }],
    ));
    messages.push(Message::tool_result("call_1", "src/bridge/retry.rs"));
    messages.push(Message::assistant("Found it."));

    // Keeping the last two would strand the tool result without its call.
    let trimmed = ContextManager::new().trim(&messages, 2, 100_000);
    assert!(trimmed.iter().all(|m| m.tool_call_id.is_none()));
    assert_eq!(trimmed.last().map(|m| m.content.as_str()), Some("Found it."));
}

#[test]
fn test_summary_replaces_dropped_turns() {
    let manager = ContextManager::new().with_summaries(true);
    let outcome = manager.fit(
        &history(20),
        &ContextBudget {
            max_messages: 15,
            max_tokens: 100_000,
        },
    );
    assert!(outcome.summarized);
    assert_eq!(outcome.dropped, 5);
}
