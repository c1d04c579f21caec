// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end workflow runs through an assembled runtime with a scripted
//! model.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use troupe::agent::AgentConfig;
use troupe::config::{get_example_config, resolve, CheckpointBackend, ResolvedConfig};
use troupe::providers::ScriptedModel;
use troupe::runtime::Runtime;
use troupe::tools::{NativeTool, ToolSpec};
use troupe::types::ToolCallMeta;
use troupe::{
    BridgeError, ErrorKind, ModelReply, Outcome, ProviderError, Role, WorkflowError,
    WorkflowStatus,
};

fn example_config() -> ResolvedConfig {
    let mut config = resolve(get_example_config()).unwrap();
    config.checkpoint.backend = CheckpointBackend::Memory;
    config
}

fn runtime(config: ResolvedConfig, model: &Arc<ScriptedModel>) -> Runtime {
    Runtime::assemble(config, Arc::clone(model) as _, Vec::new()).unwrap()
}

#[tokio::test]
async fn test_ambiguous_task_pauses_then_completes_after_answer() {
    let model = Arc::new(ScriptedModel::new([
        ModelReply::text(r#"{"content": "Retries live in the bridge.", "findings": "bridge retries"}"#),
        ModelReply::text(r#"{"content": "Repository X retries tool calls.", "summary": "ok"}"#),
    ]));
    let runtime = runtime(example_config(), &model);
    let engine = runtime.engine();

    let paused = engine.submit("t1", "summarize repository X").await.unwrap();
    assert_eq!(
        paused.outcome,
        Outcome::Paused {
            step: "research".into(),
            questions: vec!["What scope to analyze?".into()],
        }
    );
    assert_eq!(paused.outcome.exit_code(), 2);
    // Nothing ran while the scope was unknown.
    assert!(model.requests().is_empty());
    assert_eq!(engine.status("t1").await.unwrap(), Some(WorkflowStatus::Paused));

    let done = engine
        .resume("t1", &["the bridge module".to_string()])
        .await
        .unwrap();
    match &done.outcome {
        Outcome::Completed { output, fields } => {
            assert_eq!(output.as_deref(), Some("Repository X retries tool calls."));
            assert_eq!(fields["findings"], json!("bridge retries"));
            assert_eq!(fields["summary"], json!("ok"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // The answer augments the task the research step saw.
    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0]
        .iter()
        .any(|m| m.role == Role::User && m.content.contains("the bridge module")));
    assert!(requests[0].iter().any(|m| m.content.contains("summarize repository X")));

    let history = engine.history("t1").await.unwrap();
    let ids: Vec<u64> = history.iter().map(|m| m.step_id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(history.last().map(|m| m.status), Some(WorkflowStatus::Completed));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_scoped_task_runs_without_pausing() {
    let model = Arc::new(ScriptedModel::new([
        ModelReply::text("found three retry loops"),
        ModelReply::text("Summary: three retry loops."),
    ]));
    let runtime = runtime(example_config(), &model);

    let report = runtime
        .engine()
        .submit("t2", "summarize the bridge module of repository X")
        .await
        .unwrap();

    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(model.requests().len(), 2);
    assert_eq!(report.metrics.steps["research"].invocations, 1);
    assert_eq!(report.metrics.steps["write"].invocations, 1);
}

#[tokio::test]
async fn test_resume_with_wrong_answer_count_is_rejected() {
    let model = Arc::new(ScriptedModel::default());
    let runtime = runtime(example_config(), &model);
    let engine = runtime.engine();
    engine.submit("t3", "summarize repository X").await.unwrap();

    let err = engine.resume("t3", &[]).await.unwrap_err();
    assert!(matches!(
        err,
        WorkflowError::InvalidAnswers {
            expected: 1,
            got: 0
        }
    ));
    // Still paused and resumable.
    assert_eq!(engine.status("t3").await.unwrap(), Some(WorkflowStatus::Paused));
}

#[tokio::test]
async fn test_submit_on_paused_thread_is_rejected() {
    let model = Arc::new(ScriptedModel::default());
    let runtime = runtime(example_config(), &model);
    let engine = runtime.engine();
    engine.submit("t4", "summarize repository X").await.unwrap();

    let err = engine.submit("t4", "something else").await.unwrap_err();
    assert!(matches!(err, WorkflowError::ThreadActive(_)));
}

#[tokio::test]
async fn test_permission_denied_model_error_fails_without_retry() {
    let model = Arc::new(ScriptedModel::default());
    model.push_error(ProviderError::AuthError("bad key".into()));
    let runtime = runtime(example_config(), &model);

    let report = runtime
        .engine()
        .submit("t5", "summarize the crate")
        .await
        .unwrap();

    match report.outcome {
        Outcome::Failed {
            step, error_kind, ..
        } => {
            assert_eq!(step.as_deref(), Some("research"));
            assert_eq!(error_kind, ErrorKind::PermissionDenied);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(model.requests().len(), 1);
}

#[tokio::test]
async fn test_cancel_paused_thread() {
    let model = Arc::new(ScriptedModel::default());
    let runtime = runtime(example_config(), &model);
    let engine = runtime.engine();
    engine.submit("t6", "summarize repository X").await.unwrap();

    assert!(engine.cancel("t6").await.unwrap());
    assert_eq!(engine.status("t6").await.unwrap(), Some(WorkflowStatus::Cancelled));
    assert!(!engine.cancel("t6").await.unwrap());
    assert!(matches!(
        engine.resume("t6", &["x".into()]).await,
        Err(WorkflowError::NotPaused(_))
    ));
}

struct LineCount;

#[async_trait]
impl NativeTool for LineCount {
    fn name(&self) -> &str {
        "line_count"
    }

    async fn call(&self, parameters: Value) -> Result<Value, BridgeError> {
        let path = parameters["path"]
            .as_str()
            .ok_or_else(|| BridgeError::InvalidInput("path is required".into()))?;
        Ok(json!({"path": path, "lines": 120}))
    }
}

#[tokio::test]
async fn test_agent_uses_native_tool_between_model_rounds() {
    let mut config = example_config();
    config.tools.insert(
        "line_count".into(),
        ToolSpec::native("Count lines in a file"),
    );
    config.agents = vec![AgentConfig::new("measure", "You measure files.").with_tools(["line_count"])];
    config.steps = vec!["measure".into()];

    let model = Arc::new(ScriptedModel::new([
        ModelReply {
            tool_calls: vec![ToolCallMeta {
                id: "call_1".into(),
                name: "line_count".into(),
                arguments: json!({"path": "src/lib.rs"}),
            }],
            ..Default::default()
        },
        ModelReply::text("src/lib.rs has 120 lines."),
    ]));
    let runtime = Runtime::assemble(
        config,
        Arc::clone(&model) as _,
        vec![Arc::new(LineCount) as Arc<dyn NativeTool>],
    )
    .unwrap();

    let report = runtime.engine().submit("t7", "measure src/lib.rs").await.unwrap();
    match &report.outcome {
        Outcome::Completed { output, .. } => {
            assert_eq!(output.as_deref(), Some("src/lib.rs has 120 lines."))
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let second = &model.requests()[1];
    let tool_msg = second.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool_msg.content.contains("120"));
    assert_eq!(report.metrics.tool_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_threads_do_not_interfere() {
    let model = Arc::new(ScriptedModel::default());
    for _ in 0..8 {
        model.push(ModelReply::text("done"));
    }
    let runtime = Arc::new(runtime(example_config(), &model));

    let mut handles = Vec::new();
    for i in 0..4 {
        let runtime = Arc::clone(&runtime);
        handles.push(tokio::spawn(async move {
            runtime
                .engine()
                .submit(&format!("thread-{i}"), "summarize the crate")
                .await
        }));
    }
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.outcome.exit_code(), 0);
    }
    for i in 0..4 {
        assert_eq!(
            runtime.engine().status(&format!("thread-{i}")).await.unwrap(),
            Some(WorkflowStatus::Completed)
        );
    }
}
