//! Pipeline runs against scripted `sh` workers
#![cfg(unix)]

use serde_json::json;
use std::time::Duration;

use reqflow_config::{ReqflowConfig, WorkerCommand, WorkerKind};
use reqflow_ipc::ExitOutcome;
use reqflow_orchestrator::{
    Orchestrator, OutputSelector, Pipeline, PipelineError, PipelineInput, Stage,
};

const ANNOUNCE: &str = r#"echo '{"capabilities":["ping"],"name":"fake"}'"#;

/// Answers every request with `body`, echoing the request id
fn replying(body: &str) -> String {
    format!(
        r#"{ANNOUNCE}
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -E 's/^\{{"id":([^,]*),.*/\1/')
  printf '{{"id":%s,"response":{body}}}\n' "$id"
done"#
    )
}

fn sh(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").arg("-c").arg(script)
}

fn config(collector: WorkerCommand, analyzer: WorkerCommand) -> ReqflowConfig {
    let mut config = ReqflowConfig::default();
    config.pipeline.startup_timeout = Duration::from_secs(5);
    config.pipeline.call_timeout = Duration::from_secs(5);
    config.pipeline.shutdown_grace = Duration::from_millis(500);
    config.workers.set(WorkerKind::Collector, collector);
    config.workers.set(WorkerKind::Analyzer, analyzer);
    config
}

/// `ping` on the collector, then `ping` on the analyzer
fn ping_pipeline() -> Pipeline {
    Pipeline {
        name: "ping",
        stages: vec![
            Stage {
                name: "first",
                worker: WorkerKind::Collector,
                method: "ping",
                params: |ctx| Ok(json!({ "text": ctx.field("input", "text")? })),
            },
            Stage {
                name: "second",
                worker: WorkerKind::Analyzer,
                method: "ping",
                params: |ctx| Ok(json!({ "echo": ctx.field("first", "echo")? })),
            },
        ],
        output: OutputSelector {
            stage: "second",
            field: Some("echo"),
        },
    }
}

fn ok_worker() -> WorkerCommand {
    sh(&replying(r#"{"ok":true,"echo":"pong"}"#))
}

#[tokio::test]
async fn test_successful_run_threads_results() {
    let orchestrator = Orchestrator::new(config(ok_worker(), ok_worker()));
    let run = orchestrator
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap();

    assert_eq!(run.output, json!("pong"));
    let stages: Vec<&str> = run
        .context
        .stages()
        .iter()
        .map(|record| record.stage.as_str())
        .collect();
    assert_eq!(stages, vec!["first", "second"]);
    assert_eq!(run.context.run_id(), run.run_id);

    assert_eq!(run.shutdown.len(), 2);
    assert!(run
        .shutdown
        .iter()
        .all(|exit| exit.outcome == ExitOutcome::Exited(Some(0))));
}

#[tokio::test]
async fn test_stage_error_envelope_is_fatal() {
    let failing = sh(&replying(r#"{"error":"boom","trace":"at handler"}"#));
    let orchestrator = Orchestrator::new(config(ok_worker(), failing));
    let failure = orchestrator
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    match &failure.error {
        PipelineError::StageFailed {
            stage,
            worker,
            error,
            trace,
        } => {
            assert_eq!(stage, "second");
            assert_eq!(*worker, WorkerKind::Analyzer);
            assert_eq!(error, "boom");
            assert_eq!(trace.as_deref(), Some("at handler"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!failure.error.is_transport());
    assert_eq!(failure.shutdown.len(), 2);
}

#[tokio::test]
async fn test_reply_without_ok_fails_stage() {
    let refusing = sh(&replying(r#"{"ok":false,"echo":"pong"}"#));
    let failure = Orchestrator::new(config(ok_worker(), refusing))
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    match &failure.error {
        PipelineError::InvalidResponse { stage, worker, .. } => {
            assert_eq!(stage, "second");
            assert_eq!(*worker, WorkerKind::Analyzer);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!failure.error.is_transport());
    assert_eq!(failure.shutdown.len(), 2);
}

#[tokio::test]
async fn test_worker_dying_before_response() {
    let dying = sh(&format!("{ANNOUNCE}\nexit 0"));
    let orchestrator = Orchestrator::new(config(ok_worker(), dying));
    let failure = orchestrator
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    assert!(
        matches!(failure.error, PipelineError::Transport { ref stage, .. } if stage == "second"),
        "unexpected error {:?}",
        failure.error
    );
    assert!(failure.error.is_transport());

    let workers: Vec<&str> = failure.shutdown.iter().map(|e| e.worker.as_str()).collect();
    assert_eq!(workers, vec!["collector", "analyzer"]);
    assert!(failure
        .shutdown
        .iter()
        .all(|exit| matches!(exit.outcome, ExitOutcome::Exited(_) | ExitOutcome::Killed)));
}

#[tokio::test]
async fn test_missing_announcement() {
    let mut config = config(ok_worker(), sh("exec sleep 30"));
    config.pipeline.startup_timeout = Duration::from_millis(300);
    config.pipeline.shutdown_grace = Duration::from_millis(100);

    let failure = Orchestrator::new(config)
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::Startup {
            worker: WorkerKind::Analyzer,
            source: None,
            ..
        }
    ));
    let analyzer = failure
        .shutdown
        .iter()
        .find(|exit| exit.worker == "analyzer")
        .unwrap();
    assert_eq!(analyzer.outcome, ExitOutcome::Killed);
}

#[tokio::test]
async fn test_malformed_announcement() {
    let config = config(sh("echo 'ready'; exec cat"), ok_worker());
    let failure = Orchestrator::new(config)
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    match failure.error {
        PipelineError::Startup { worker, reason, .. } => {
            assert_eq!(worker, WorkerKind::Collector);
            assert!(reason.contains("ready"), "{}", reason);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(failure.shutdown.len(), 2);
}

#[tokio::test]
async fn test_launch_failure_stops_launched_workers() {
    let config = config(
        ok_worker(),
        WorkerCommand::new("/nonexistent/reqflow-analyzer"),
    );
    let failure = Orchestrator::new(config)
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    assert!(matches!(
        failure.error,
        PipelineError::Launch {
            worker: WorkerKind::Analyzer,
            ..
        }
    ));
    assert!(failure.error.is_transport());
    assert_eq!(failure.shutdown.len(), 1);
    assert_eq!(failure.shutdown[0].worker, "collector");
}

#[tokio::test]
async fn test_stage_timeout() {
    let mut config = config(ok_worker(), sh(&format!("{ANNOUNCE}\nexec sleep 30")));
    config.pipeline.call_timeout = Duration::from_millis(300);
    config.pipeline.shutdown_grace = Duration::from_millis(100);

    let failure = Orchestrator::new(config)
        .run(&ping_pipeline(), PipelineInput::new("hello"))
        .await
        .unwrap_err();

    match &failure.error {
        PipelineError::Timeout { stage, timeout, .. } => {
            assert_eq!(stage, "second");
            assert_eq!(*timeout, Duration::from_millis(300));
        }
        other => panic!("unexpected error {:?}", other),
    }
    let analyzer = failure
        .shutdown
        .iter()
        .find(|exit| exit.worker == "analyzer")
        .unwrap();
    assert_eq!(analyzer.outcome, ExitOutcome::Killed);
}

#[tokio::test]
async fn test_missing_upstream_field() {
    let mut pipeline = ping_pipeline();
    pipeline.stages[1].params = |ctx| Ok(json!({ "echo": ctx.field("first", "nothing")? }));

    let failure = Orchestrator::new(config(ok_worker(), ok_worker()))
        .run(&pipeline, PipelineInput::new("hello"))
        .await
        .unwrap_err();

    match &failure.error {
        PipelineError::MissingField { stage, field, .. } => {
            assert_eq!(stage, "second");
            assert_eq!(field, "first.nothing");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(failure.shutdown.len(), 2);
}
