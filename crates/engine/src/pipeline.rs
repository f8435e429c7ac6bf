//! DAG pipeline scheduler: run named steps as their dependencies complete.
//!
//! An `mpsc` channel collects results from in-flight steps as they finish,
//! and a `HashMap<String, StepOutput>` accumulates completed output. Every
//! step whose dependencies are satisfied is spawned as its own `tokio::task`
//! the moment it's ready — the scheduler itself does no throttling.

use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::llm::types::TokenUsage;
use crate::strategies::{Invocation, Response};

/// One node in the pipeline DAG.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub name: String,
    /// The key this step's output is recorded under. Defaults to `name`.
    pub output: String,
    pub depends_on: Vec<String>,
    /// Advisory only — does not affect scheduling.
    pub parallel: bool,
    /// A guard expression evaluated against completed step outputs once all
    /// of `depends_on` are satisfied. See [`evaluate_guard`] for the
    /// supported grammar.
    pub when: Option<String>,
}

impl PipelineStep {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            output: name.clone(),
            name,
            depends_on: Vec::new(),
            parallel: false,
            when: None,
        }
    }

    pub fn depends_on(mut self, steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn when(mut self, guard: impl Into<String>) -> Self {
        self.when = Some(guard.into());
        self
    }
}

/// The recorded result of one completed (or guard-skipped) step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub output: String,
    pub skipped: bool,
    pub usage: TokenUsage,
    pub duration: Duration,
}

/// The result of running a whole pipeline.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub outputs: HashMap<String, StepOutput>,
    /// The terminal step's output, if exactly one step has no successors.
    pub final_output: Option<String>,
    pub usage: TokenUsage,
    pub duration: Duration,
}

/// Runs one step's invocation to completion. Supplied by the host, which
/// alone knows which strategy/agent backs a given step.
pub type StepRunner = Arc<dyn Fn(Invocation, CancellationToken) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

/// Validate `steps` for unknown dependency references, duplicate/empty
/// output keys, and cycles.
fn validate(steps: &[PipelineStep]) -> Result<()> {
    let names: HashSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    for step in steps {
        for dep in &step.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(EngineError::UnknownPipelineStep {
                    step: step.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut seen_outputs: HashSet<&str> = HashSet::new();
    for step in steps {
        if step.output.is_empty() {
            return Err(EngineError::DuplicatePipelineOutput {
                step: step.name.clone(),
                output: step.output.clone(),
            });
        }
        if !seen_outputs.insert(step.output.as_str()) {
            return Err(EngineError::DuplicatePipelineOutput {
                step: step.name.clone(),
                output: step.output.clone(),
            });
        }
    }

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    let by_name: HashMap<&str, &PipelineStep> = steps.iter().map(|s| (s.name.as_str(), s)).collect();

    fn visit<'a>(
        step: &'a PipelineStep,
        by_name: &HashMap<&'a str, &'a PipelineStep>,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> Result<()> {
        if visited.contains(step.name.as_str()) {
            return Ok(());
        }
        if !visiting.insert(step.name.as_str()) {
            return Err(EngineError::PipelineCycle { step: step.name.clone() });
        }
        for dep in &step.depends_on {
            if let Some(next) = by_name.get(dep.as_str()) {
                visit(next, by_name, visiting, visited)?;
            }
        }
        visiting.remove(step.name.as_str());
        visited.insert(step.name.as_str());
        Ok(())
    }

    for step in steps {
        visit(step, &by_name, &mut visiting, &mut visited)?;
    }
    Ok(())
}

/// Evaluate a `when` guard against completed outputs.
///
/// Grammar:
/// - absent guard: always true
/// - `<step>`: true if `<step>` completed without being guard-skipped
/// - `not <step>`: the negation of the above
/// - `<step> contains <text>`: true if `<step>`'s output contains `<text>`
fn evaluate_guard(guard: &str, outputs: &HashMap<String, StepOutput>) -> bool {
    let tokens: Vec<&str> = guard.split_whitespace().collect();
    match tokens.as_slice() {
        [] => true,
        ["not", step] => !step_truthy(step, outputs),
        [step] => step_truthy(step, outputs),
        [step, "contains", rest @ ..] => outputs
            .get(*step)
            .map(|o| o.output.contains(&rest.join(" ")))
            .unwrap_or(false),
        _ => false,
    }
}

fn step_truthy(step: &str, outputs: &HashMap<String, StepOutput>) -> bool {
    outputs.get(step).map(|o| !o.skipped).unwrap_or(false)
}

/// Run `steps` to completion, dispatching ready steps via `runner`.
pub async fn run_pipeline(
    steps: Vec<PipelineStep>,
    mut invocations: HashMap<String, Invocation>,
    runner: StepRunner,
) -> Result<PipelineResult> {
    validate(&steps)?;
    info!(steps = steps.len(), "pipeline starting");

    let start = Instant::now();
    let ctx = CancellationToken::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Result<Response>)>();

    // Readiness and the cycle/dependency bookkeeping above are keyed by
    // `name` (what `depends_on` references); `outputs` is keyed separately
    // by `output` (what guards and `final_output` read from) since the two
    // are allowed to differ per step.
    let mut completed_names: HashSet<String> = HashSet::new();
    let mut outputs: HashMap<String, StepOutput> = HashMap::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut total_usage = TokenUsage::default();

    let by_name: HashMap<String, PipelineStep> = steps.iter().cloned().map(|s| (s.name.clone(), s)).collect();

    loop {
        if completed_names.len() == steps.len() {
            break;
        }

        let ready: Vec<String> = steps
            .iter()
            .filter(|s| !completed_names.contains(&s.name) && !in_flight.contains(&s.name))
            .filter(|s| s.depends_on.iter().all(|d| completed_names.contains(d)))
            .map(|s| s.name.clone())
            .collect();

        for name in ready {
            let step = by_name.get(&name).expect("name drawn from steps").clone();
            if let Some(guard) = &step.when {
                if !evaluate_guard(guard, &outputs) {
                    debug!(step = %step.name, guard, "guard false, skipping step");
                    completed_names.insert(step.name.clone());
                    outputs.insert(
                        step.output.clone(),
                        StepOutput {
                            output: String::new(),
                            skipped: true,
                            usage: TokenUsage::default(),
                            duration: Duration::default(),
                        },
                    );
                    continue;
                }
            }

            let Some(invocation) = invocations.remove(&name) else {
                completed_names.insert(step.name.clone());
                outputs.insert(
                    step.output.clone(),
                    StepOutput {
                        output: String::new(),
                        skipped: true,
                        usage: TokenUsage::default(),
                        duration: Duration::default(),
                    },
                );
                continue;
            };

            debug!(step = %name, "dispatching step");
            in_flight.insert(name.clone());
            let child_ctx = ctx.child_token();
            let tx = tx.clone();
            let runner = runner.clone();
            tokio::spawn(async move {
                let result = runner(invocation, child_ctx).await;
                let _ = tx.send((name, result));
            });
        }

        if in_flight.is_empty() {
            // Nothing ready and nothing running: every remaining step was
            // either completed or guard-skipped above.
            continue;
        }

        let Some((name, result)) = rx.recv().await else {
            break;
        };
        in_flight.remove(&name);

        let step = by_name.get(&name).expect("name drawn from steps");
        match result {
            Ok(response) => {
                debug!(step = %name, "step completed");
                total_usage.add(&response.usage);
                completed_names.insert(name.clone());
                outputs.insert(
                    step.output.clone(),
                    StepOutput {
                        output: response.output,
                        skipped: false,
                        usage: response.usage,
                        duration: response.duration,
                    },
                );
            }
            Err(e) => {
                warn!(step = %name, error = %e, "step failed, cancelling pipeline");
                ctx.cancel();
                return Err(EngineError::PipelineStepFailed {
                    step: name,
                    source: Box::new(e),
                });
            }
        }
    }

    let successors: HashSet<&str> = steps.iter().flat_map(|s| s.depends_on.iter().map(String::as_str)).collect();
    let terminal: Vec<&PipelineStep> = steps.iter().filter(|s| !successors.contains(s.name.as_str())).collect();
    let final_output = match terminal.as_slice() {
        [only] => outputs.get(&only.output).map(|o| o.output.clone()),
        _ => None,
    };

    info!(steps = steps.len(), "pipeline completed");
    Ok(PipelineResult {
        outputs,
        final_output,
        usage: total_usage,
        duration: start.elapsed(),
    })
}
