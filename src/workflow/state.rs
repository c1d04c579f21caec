// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workflow state persisted at every step boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ErrorKind;
use crate::types::{Message, StepOutput};

/// Field holding the accumulated clarification answers.
pub const CLARIFICATIONS_FIELD: &str = "clarifications";

/// Where a thread's execution currently sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeState {
    /// About to run (or running) the named step.
    Step { name: String },
    /// Suspended until answers arrive; `step` is re-invoked on resume.
    Clarifying { step: String },
    /// No further steps.
    Done,
}

impl NodeState {
    pub fn step(name: impl Into<String>) -> Self {
        Self::Step { name: name.into() }
    }

    /// Name of the step this node refers to, if any.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Self::Step { name } => Some(name),
            Self::Clarifying { step } => Some(step),
            Self::Done => None,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step { name } => write!(f, "{}", name),
            Self::Clarifying { step } => write!(f, "CLARIFYING({})", step),
            Self::Done => f.write_str("DONE"),
        }
    }
}

/// Lifecycle status of a thread's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Whether no further execution will happen without a new submission.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answered clarification question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationAnswer {
    pub step: String,
    pub question: String,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
}

/// The failure that ended a step attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub step: String,
    pub error_kind: ErrorKind,
    pub message: String,
}

/// Everything the engine knows about one thread's run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub thread_id: String,
    /// Task text as submitted.
    pub task: String,
    pub messages: Vec<Message>,
    /// Values produced by completed steps.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    /// Increases on every checkpoint; doubles as the checkpoint step id.
    pub step_counter: u64,
    pub cursor: NodeState,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub pending_questions: Vec<String>,
    #[serde(default)]
    pub answers: Vec<ClarificationAnswer>,
    /// Attempts made at the cursor step.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<FailureRecord>,
    /// Steps completed in this run, in order.
    #[serde(default)]
    pub completed_steps: Vec<String>,
}

impl WorkflowState {
    /// Fresh state for `task`, positioned at `first_step`.
    pub fn new(thread_id: impl Into<String>, task: impl Into<String>, first_step: &str) -> Self {
        let task = task.into();
        Self {
            thread_id: thread_id.into(),
            messages: vec![Message::user(task.clone())],
            task,
            fields: BTreeMap::new(),
            step_counter: 0,
            cursor: NodeState::step(first_step),
            status: WorkflowStatus::Running,
            pending_questions: Vec::new(),
            answers: Vec::new(),
            attempts: 0,
            last_error: None,
            completed_steps: Vec::new(),
        }
    }

    /// Whether `question` already has an answer on record.
    pub fn is_answered(&self, question: &str) -> bool {
        self.answers.iter().any(|a| a.question == question)
    }

    /// Fold a completed step's output into the state.
    pub fn apply_output(&mut self, step: &str, output: &StepOutput) {
        if !output.content.is_empty() {
            self.messages.push(Message::assistant(output.content.clone()));
        }
        for (key, value) in &output.fields {
            self.fields.insert(key.clone(), value.clone());
        }
        self.completed_steps.push(step.to_string());
        self.attempts = 0;
        self.last_error = None;
    }

    /// Suspend at `step` with open questions.
    pub fn pause(&mut self, step: &str, questions: Vec<String>) {
        self.cursor = NodeState::Clarifying {
            step: step.to_string(),
        };
        self.status = WorkflowStatus::Paused;
        self.pending_questions = questions;
    }

    /// Record answers to the pending questions, positionally.
    ///
    /// Answers are added to the history as a user message and collected under
    /// the `clarifications` field, so they augment the task rather than
    /// replace it. The cursor returns to the paused step.
    pub fn answer(&mut self, answers: &[String]) {
        let Some(step) = self.cursor.step_name().map(str::to_string) else {
            return;
        };
        let now = Utc::now();
        let questions = std::mem::take(&mut self.pending_questions);

        let mut lines = Vec::with_capacity(questions.len());
        let mut recorded = match self.fields.remove(CLARIFICATIONS_FIELD) {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        for (question, answer) in questions.into_iter().zip(answers) {
            lines.push(format!("Q: {}\nA: {}", question, answer));
            recorded.insert(question.clone(), Value::String(answer.clone()));
            self.answers.push(ClarificationAnswer {
                step: step.clone(),
                question,
                answer: answer.clone(),
                answered_at: now,
            });
        }
        self.fields
            .insert(CLARIFICATIONS_FIELD.to_string(), Value::Object(recorded));
        self.messages
            .push(Message::user(format!("Clarifications:\n{}", lines.join("\n"))));

        self.cursor = NodeState::step(step);
        self.status = WorkflowStatus::Running;
        self.attempts = 0;
    }

    /// Record a failed attempt at `step`.
    pub fn record_failure(&mut self, step: &str, error_kind: ErrorKind, message: impl Into<String>) {
        self.last_error = Some(FailureRecord {
            step: step.to_string(),
            error_kind,
            message: message.into(),
        });
    }

    /// Final assistant text of the run, if any.
    pub fn final_output(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::types::Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_state_starts_at_first_step() {
        let state = WorkflowState::new("t1", "summarize repository X", "research");
        assert_eq!(state.cursor, NodeState::step("research"));
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.messages, vec![Message::user("summarize repository X")]);
        assert_eq!(state.step_counter, 0);
    }

    #[test]
    fn test_apply_output_merges_fields() {
        let mut state = WorkflowState::new("t1", "task", "a");
        state.attempts = 2;
        let mut output = StepOutput {
            content: "found it".into(),
            ..Default::default()
        };
        output.fields.insert("finding".into(), json!("bug in parser"));

        state.apply_output("a", &output);
        assert_eq!(state.fields["finding"], json!("bug in parser"));
        assert_eq!(state.messages.last().unwrap().content, "found it");
        assert_eq!(state.completed_steps, vec!["a"]);
        assert_eq!(state.attempts, 0);
        assert_eq!(state.final_output(), Some("found it"));
    }

    #[test]
    fn test_pause_then_answer_augments_context() {
        let mut state = WorkflowState::new("t1", "summarize repository X", "research");
        state.pause("research", vec!["What scope to analyze?".into()]);
        assert_eq!(state.status, WorkflowStatus::Paused);
        assert_eq!(state.cursor.to_string(), "CLARIFYING(research)");

        state.answer(&["the src directory".to_string()]);
        assert_eq!(state.status, WorkflowStatus::Running);
        assert_eq!(state.cursor, NodeState::step("research"));
        assert!(state.pending_questions.is_empty());
        assert!(state.is_answered("What scope to analyze?"));
        assert_eq!(
            state.fields[CLARIFICATIONS_FIELD]["What scope to analyze?"],
            json!("the src directory")
        );
        // Original task is still first.
        assert_eq!(state.messages[0].content, "summarize repository X");
        assert!(state.messages[1].content.contains("the src directory"));
    }

    #[test]
    fn test_status_terminal() {
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_state_serialization_round_trip() {
        let mut state = WorkflowState::new("t1", "task", "a");
        state.pause("a", vec!["Which branch?".into()]);
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
