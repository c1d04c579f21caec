// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Step graph and transition table.

use std::collections::{BTreeMap, HashMap};

use super::state::NodeState;
use crate::error::WorkflowError;
use crate::types::StepOutput;

/// Route target naming the terminal node.
pub const DONE: &str = "DONE";

/// Declared steps plus status-keyed routes.
///
/// Without a matching route a completed step moves to the next declared step,
/// and the last step moves to `DONE`. Routes may only move forward, so every
/// run is acyclic; clarification is a suspension, not an edge.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    steps: Vec<String>,
    index: HashMap<String, usize>,
    routes: HashMap<String, BTreeMap<String, NodeState>>,
}

impl WorkflowGraph {
    /// Build and validate a graph.
    ///
    /// `routes` maps a step to `{status label: target}`, where a target is a
    /// step name or `DONE`.
    pub fn new(
        steps: Vec<String>,
        routes: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Result<Self, WorkflowError> {
        if steps.is_empty() {
            return Err(WorkflowError::InvalidGraph("no steps declared".to_string()));
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if step == DONE {
                return Err(WorkflowError::InvalidGraph(format!(
                    "'{}' is reserved and cannot name a step",
                    DONE
                )));
            }
            if index.insert(step.clone(), i).is_some() {
                return Err(WorkflowError::InvalidGraph(format!(
                    "duplicate step '{}'",
                    step
                )));
            }
        }

        let mut table = HashMap::with_capacity(routes.len());
        for (from, edges) in routes {
            let Some(&from_index) = index.get(&from) else {
                return Err(WorkflowError::InvalidGraph(format!(
                    "route from unknown step '{}'",
                    from
                )));
            };
            let mut resolved = BTreeMap::new();
            for (label, to) in edges {
                let target = if to == DONE {
                    NodeState::Done
                } else {
                    let Some(&to_index) = index.get(&to) else {
                        return Err(WorkflowError::InvalidGraph(format!(
                            "route '{}' from '{}' targets unknown step '{}'",
                            label, from, to
                        )));
                    };
                    if to_index <= from_index {
                        return Err(WorkflowError::InvalidGraph(format!(
                            "route '{}' from '{}' to '{}' is a back edge",
                            label, from, to
                        )));
                    }
                    NodeState::step(to)
                };
                resolved.insert(label, target);
            }
            table.insert(from, resolved);
        }

        Ok(Self {
            steps,
            index,
            routes: table,
        })
    }

    /// Linear graph with no routes.
    pub fn linear<I, S>(steps: I) -> Result<Self, WorkflowError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(steps.into_iter().map(Into::into).collect(), BTreeMap::new())
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn first(&self) -> &str {
        // Non-empty by construction.
        self.steps.first().map(String::as_str).unwrap_or(DONE)
    }

    pub fn contains(&self, step: &str) -> bool {
        self.index.contains_key(step)
    }

    /// Node after `step` completed with `output`.
    pub fn next(&self, step: &str, output: &StepOutput) -> Result<NodeState, WorkflowError> {
        let Some(&i) = self.index.get(step) else {
            return Err(WorkflowError::UnknownStep(step.to_string()));
        };

        if let Some(label) = &output.status {
            if let Some(target) = self.routes.get(step).and_then(|r| r.get(label)) {
                return Ok(target.clone());
            }
        }

        Ok(match self.steps.get(i + 1) {
            Some(next) => NodeState::step(next.clone()),
            None => NodeState::Done,
        })
    }
}
