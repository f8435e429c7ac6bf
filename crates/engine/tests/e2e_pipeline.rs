//! End-to-end tests for the pipeline DAG scheduler.
//!
//! These exercise real tokio tasks and a real `mpsc` result channel — no
//! stubs. Every step's `StepRunner` actually runs as a spawned task and
//! reports back over the channel `run_pipeline` itself owns.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentspec_engine::{EngineError, Invocation, PipelineStep, Response, StepRunner, TokenUsage, run_pipeline};

fn invocation_map(names: &[&str]) -> std::collections::HashMap<String, Invocation> {
    names
        .iter()
        .map(|n| (n.to_string(), Invocation::new("agent", "claude-3-sonnet", *n)))
        .collect()
}

fn echo_runner() -> StepRunner {
    Arc::new(|invocation, _ctx| {
        Box::pin(async move {
            Ok(Response {
                output: format!("ran:{}", invocation.input),
                tool_calls: Vec::new(),
                usage: TokenUsage {
                    input: 1,
                    output: 1,
                    cache_read: 0,
                    cache_write: 0,
                },
                turns: 1,
                duration: Duration::default(),
                error: None,
            })
        })
    })
}

#[tokio::test]
async fn a_fan_out_fan_in_diamond_runs_every_branch_concurrently() {
    // fetch -> {left, right} -> join
    let steps = vec![
        PipelineStep::new("fetch"),
        PipelineStep::new("left").depends_on(["fetch"]),
        PipelineStep::new("right").depends_on(["fetch"]),
        PipelineStep::new("join").depends_on(["left", "right"]),
    ];

    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let c1 = concurrent.clone();
    let m1 = max_concurrent.clone();

    let runner: StepRunner = Arc::new(move |invocation, _ctx| {
        let concurrent = c1.clone();
        let max_concurrent = m1.clone();
        Box::pin(async move {
            if invocation.input == "left" || invocation.input == "right" {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(Response {
                output: format!("ran:{}", invocation.input),
                tool_calls: Vec::new(),
                usage: TokenUsage::default(),
                turns: 1,
                duration: Duration::default(),
                error: None,
            })
        })
    });

    let result = run_pipeline(steps, invocation_map(&["fetch", "left", "right", "join"]), runner)
        .await
        .unwrap();

    assert_eq!(result.outputs.len(), 4);
    assert_eq!(result.final_output.as_deref(), Some("ran:join"));
    assert_eq!(
        max_concurrent.load(Ordering::SeqCst),
        2,
        "left and right have no dependency on each other and must overlap"
    );
}

#[tokio::test]
async fn a_long_linear_chain_runs_every_step_in_order() {
    let steps: Vec<PipelineStep> = (0..6)
        .map(|i| {
            let step = PipelineStep::new(format!("step{i}"));
            if i == 0 { step } else { step.depends_on([format!("step{}", i - 1)]) }
        })
        .collect();
    let names: Vec<&str> = vec!["step0", "step1", "step2", "step3", "step4", "step5"];

    let result = run_pipeline(steps, invocation_map(&names), echo_runner()).await.unwrap();
    assert_eq!(result.outputs.len(), 6);
    assert_eq!(result.final_output.as_deref(), Some("ran:step5"));
}

#[tokio::test]
async fn a_failure_partway_through_cancels_remaining_siblings_and_reports_the_failing_step() {
    let steps = vec![
        PipelineStep::new("a"),
        PipelineStep::new("b"),
        PipelineStep::new("join").depends_on(["a", "b"]),
    ];

    let runner: StepRunner = Arc::new(|invocation, _ctx| {
        Box::pin(async move {
            if invocation.input == "b" {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(EngineError::Internal("simulated failure".into()))
            } else {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Response {
                    output: "ok".into(),
                    tool_calls: Vec::new(),
                    usage: TokenUsage::default(),
                    turns: 1,
                    duration: Duration::default(),
                    error: None,
                })
            }
        })
    });

    let err = run_pipeline(steps, invocation_map(&["a", "b", "join"]), runner)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PipelineStepFailed { step, .. } if step == "b"));
}
