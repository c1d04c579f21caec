// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model that replays canned replies.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::ProviderError;
use crate::types::{LanguageModel, Message, ModelReply, ToolDefinition};

/// Returns queued replies in order, then empty replies.
///
/// Every request is recorded so tests can inspect what the model saw.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<ModelReply, ProviderError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = ModelReply>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another reply.
    pub fn push(&self, reply: ModelReply) {
        self.lock_replies().push_back(Ok(reply));
    }

    /// Queue an error.
    pub fn push_error(&self, error: ProviderError) {
        self.lock_replies().push_back(Err(error));
    }

    /// Message histories received so far.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ModelReply, ProviderError>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ModelReply, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Ok(ModelReply::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_in_order() {
        let model = ScriptedModel::new([ModelReply::text("one"), ModelReply::text("two")]);
        model.push_error(ProviderError::RateLimited("busy".into()));

        let msgs = [Message::user("hi")];
        assert_eq!(model.complete(&msgs, &[]).await.unwrap().content, "one");
        assert_eq!(model.complete(&msgs, &[]).await.unwrap().content, "two");
        assert!(model.complete(&msgs, &[]).await.is_err());
        assert_eq!(model.complete(&msgs, &[]).await.unwrap(), ModelReply::default());
        assert_eq!(model.requests().len(), 4);
    }
}
