// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pre-execution inquiry.
//!
//! Before a step runs its main logic it checks whether the task and
//! accumulated context answer every question the step declares it needs
//! answered. Unmet questions suspend the workflow until the caller resumes
//! with answers.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::types::Message;
use crate::workflow::WorkflowState;

// Alphanumerics in any script. Underscores split words, so `target_path`
// yields `target` and `path`.
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{M}\p{N}]+").unwrap());

/// Something a step needs to know before it can start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InquiryPattern {
    /// Short label, e.g. `scope`.
    pub topic: String,
    /// Words whose presence means the topic is already covered.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Question surfaced to the caller when the topic is not covered.
    pub question: String,
}

impl InquiryPattern {
    pub fn new<I, S>(topic: impl Into<String>, keywords: I, question: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topic: topic.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
            question: question.into(),
        }
    }
}

/// Everything an inquiry may consult.
#[derive(Debug, Clone, Copy)]
pub struct InquiryContext<'a> {
    pub task: &'a str,
    pub messages: &'a [Message],
    pub fields: &'a BTreeMap<String, Value>,
    /// Questions already answered by the caller.
    pub answered: &'a [String],
}

/// Outcome of evaluating a step's inquiry patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clarification {
    Clear,
    NeedsClarification(Vec<String>),
}

impl Clarification {
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear)
    }
}

/// Decides whether a pattern is satisfied by the context.
pub trait InquiryMatcher: Send + Sync {
    fn is_satisfied(&self, pattern: &InquiryPattern, context: &InquiryContext<'_>) -> bool;
}

/// Case-insensitive whole-word keyword matching.
///
/// A pattern is satisfied when any keyword appears in the task, in any
/// message, or among the words of a non-null field's key, or when its
/// question has been answered.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatcher;

fn words(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Whether `needle` occurs as a contiguous run of whole words in `haystack`.
fn contains_phrase(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

impl InquiryMatcher for KeywordMatcher {
    fn is_satisfied(&self, pattern: &InquiryPattern, context: &InquiryContext<'_>) -> bool {
        if context.answered.iter().any(|q| q == &pattern.question) {
            return true;
        }

        let keywords: Vec<Vec<String>> = pattern
            .keywords
            .iter()
            .map(|k| words(k))
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return false;
        }

        let mut sources: Vec<Vec<String>> = Vec::with_capacity(context.messages.len() + 1);
        sources.push(words(context.task));
        sources.extend(context.messages.iter().map(|m| words(&m.content)));
        sources.extend(
            context
                .fields
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, _)| words(k)),
        );

        keywords
            .iter()
            .any(|k| sources.iter().any(|source| contains_phrase(source, k)))
    }
}

/// Inquiry patterns per step plus the matcher that checks them.
#[derive(Clone)]
pub struct ClarificationProtocol {
    patterns: HashMap<String, Vec<InquiryPattern>>,
    matcher: Arc<dyn InquiryMatcher>,
}

impl ClarificationProtocol {
    pub fn new() -> Self {
        Self {
            patterns: HashMap::new(),
            matcher: Arc::new(KeywordMatcher),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn InquiryMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Declare the ordered inquiry patterns for a step.
    pub fn with_step(mut self, step: impl Into<String>, patterns: Vec<InquiryPattern>) -> Self {
        self.patterns.insert(step.into(), patterns);
        self
    }

    pub fn patterns(&self, step: &str) -> &[InquiryPattern] {
        self.patterns.get(step).map(Vec::as_slice).unwrap_or_default()
    }

    /// Questions for `step` the context does not yet answer, in declaration order.
    pub fn evaluate(&self, step: &str, context: &InquiryContext<'_>) -> Clarification {
        let unmet: Vec<String> = self
            .patterns(step)
            .iter()
            .filter(|p| !self.matcher.is_satisfied(p, context))
            .map(|p| p.question.clone())
            .collect();

        if unmet.is_empty() {
            Clarification::Clear
        } else {
            tracing::debug!(step = %step, questions = unmet.len(), "Step needs clarification");
            Clarification::NeedsClarification(unmet)
        }
    }

    /// Evaluate against a workflow's current state.
    pub fn evaluate_state(&self, step: &str, state: &WorkflowState) -> Clarification {
        let answered: Vec<String> = state.answers.iter().map(|a| a.question.clone()).collect();
        let context = InquiryContext {
            task: &state.task,
            messages: &state.messages,
            fields: &state.fields,
            answered: &answered,
        };
        self.evaluate(step, &context)
    }
}

impl Default for ClarificationProtocol {
    fn default() -> Self {
        Self::new()
    }
}
