//! The local simulator: walks a validated machine state by state, applying
//! data routing, retry and catch policies, and the concurrency semantics of
//! Map and Parallel.
//!
//! Task states never touch real services; each resource is resolved against
//! the run's [`MockRegistry`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::error::{ErrorKind, SimulationError};
use crate::machine::{Catcher, ResultPath, State, StateKind, StateMachine, Transition, WaitTrigger};
use crate::mock::MockRegistry;
use crate::path::JsonPath;
use crate::trace::{ExecutionRecord, ExecutionTrace};

/// The outcome of one simulation: the final output or the terminal error,
/// plus the full execution trace either way.
#[derive(Debug)]
pub struct SimulationRun {
    pub result: Result<Value, SimulationError>,
    pub trace: ExecutionTrace,
}

/// Executes machines against a registry of mocked task resources.
///
/// A simulator is reusable across runs; each call to [`Simulator::run`]
/// starts a fresh trace.
pub struct Simulator {
    mocks: Arc<MockRegistry>,
}

/// What a completed state hands back to the step loop.
enum Step {
    /// The state produced output; follow its Next/End transition.
    Output(Value),
    /// Control transfers to a named state, either through a choice rule or
    /// a catcher.
    Redirect { next: String, data: Value },
    /// The run ends in failure.
    Failed(SimulationError),
}

impl Simulator {
    pub fn new(mocks: MockRegistry) -> Self {
        Self {
            mocks: Arc::new(mocks),
        }
    }

    fn with_shared(mocks: Arc<MockRegistry>) -> Self {
        Self { mocks }
    }

    /// Run `machine` to completion on `input`.
    pub async fn run(&self, machine: &StateMachine, input: Value) -> SimulationRun {
        let mut trace = ExecutionTrace::new();
        debug!(run_id = %trace.run_id, start_at = %machine.start_at, "starting run");
        let result = self.run_machine(machine, input, &mut trace).await;
        match &result {
            Ok(_) => debug!(run_id = %trace.run_id, states = trace.len(), "run succeeded"),
            Err(err) => debug!(run_id = %trace.run_id, error = %err, "run failed"),
        }
        SimulationRun { result, trace }
    }

    async fn run_machine(
        &self,
        machine: &StateMachine,
        input: Value,
        trace: &mut ExecutionTrace,
    ) -> Result<Value, SimulationError> {
        let mut current = machine.start_at.clone();
        let mut data = input;
        loop {
            let Some(state) = machine.state(&current) else {
                // Unreachable for machines produced by the builder.
                return Err(SimulationError {
                    kind: ErrorKind::Custom("States.Runtime".into()),
                    state: current,
                    cause: "transition target is not defined".into(),
                });
            };
            match self.execute(state, data, trace).await {
                Step::Output(output) => match &state.transition {
                    Some(Transition::Next(next)) => {
                        current = next.clone();
                        data = output;
                    }
                    _ => return Ok(output),
                },
                Step::Redirect {
                    next,
                    data: redirected,
                } => {
                    current = next;
                    data = redirected;
                }
                Step::Failed(err) => return Err(err),
            }
        }
    }

    /// Run one state under its retry and catch policies, appending a trace
    /// record for the final outcome.
    async fn execute(&self, state: &State, input: Value, trace: &mut ExecutionTrace) -> Step {
        let started_at = Utc::now();
        debug!(state = %state.name, kind = state.kind.type_name(), "entering state");

        let mut attempt = 1u32;
        let outcome = loop {
            match self.attempt(state, input.clone(), trace).await {
                Ok(step) => break Ok(step),
                // A missing mock is a harness defect, not a workflow error.
                Err(err) if err.kind == ErrorKind::ResourceNotMocked => break Err(err),
                Err(err) => {
                    match state.retriers.iter().find(|r| r.handles(&err.kind)) {
                        Some(retrier) if attempt < retrier.attempts() => {
                            let delay = retrier.delay_after_attempt(attempt);
                            debug!(
                                state = %state.name,
                                attempt,
                                error = %err,
                                delay_secs = delay.as_secs_f64(),
                                "retrying"
                            );
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        _ => break Err(err),
                    }
                }
            }
        };

        let mut caught = None;
        let step = match outcome {
            Ok(step) => step,
            Err(err) => {
                let catcher = if err.kind == ErrorKind::ResourceNotMocked {
                    None
                } else {
                    state.catchers.iter().find(|c| c.handles(&err.kind))
                };
                match catcher {
                    Some(catcher) => match caught_data(state, catcher, &input, &err) {
                        Ok(data) => {
                            debug!(state = %state.name, error = %err, next = %catcher.next, "error caught");
                            caught = Some(err.to_string());
                            Step::Redirect {
                                next: catcher.next.clone(),
                                data,
                            }
                        }
                        Err(merge_err) => Step::Failed(merge_err),
                    },
                    None => Step::Failed(err),
                }
            }
        };

        let (output, error) = match &step {
            Step::Output(value) => (Some(value.clone()), None),
            Step::Redirect { data, .. } => (Some(data.clone()), caught),
            Step::Failed(err) => (None, Some(err.to_string())),
        };
        trace.append(ExecutionRecord {
            state_name: state.name.clone(),
            input,
            output,
            error,
            started_at,
            ended_at: Utc::now(),
        });
        step
    }

    /// One attempt at a state, with no retry or catch applied.
    async fn attempt(
        &self,
        state: &State,
        input: Value,
        trace: &mut ExecutionTrace,
    ) -> Result<Step, SimulationError> {
        let effective = state
            .input_path
            .select(&input)
            .map_err(|e| err_at(state, ErrorKind::ParameterPathFailure, e))?;

        let raw = match &state.kind {
            StateKind::Fail { error, cause } => {
                // Fail is terminal by definition; retry and catch never apply.
                return Ok(Step::Failed(SimulationError {
                    kind: ErrorKind::from_name(error),
                    state: state.name.clone(),
                    cause: cause.clone(),
                }));
            }
            StateKind::Choice { rules, default } => {
                let next = rules
                    .iter()
                    .find(|rule| rule.evaluate(&effective))
                    .map(|rule| rule.next.clone())
                    .or_else(|| default.clone());
                let Some(next) = next else {
                    return Err(err_at(
                        state,
                        ErrorKind::NoChoiceMatched,
                        "no choice rule matched and no default is set",
                    ));
                };
                // Choice bypasses result and output routing entirely.
                return Ok(Step::Redirect {
                    next,
                    data: effective,
                });
            }
            StateKind::Pass { result } => result.clone().unwrap_or_else(|| effective.clone()),
            StateKind::Task { resource } => {
                let Some(mock) = self.mocks.get(resource) else {
                    return Err(err_at(
                        state,
                        ErrorKind::ResourceNotMocked,
                        format!("no mock registered for resource {resource:?}"),
                    ));
                };
                mock(&effective).map_err(|e| SimulationError {
                    kind: e.kind,
                    state: state.name.clone(),
                    cause: e.cause,
                })?
            }
            StateKind::Wait { trigger } => {
                self.wait(state, trigger, &effective).await?;
                effective.clone()
            }
            StateKind::Succeed => effective.clone(),
            StateKind::Map {
                items_path,
                iterator,
                max_concurrency,
            } => {
                let items = items_path
                    .select(&effective)
                    .map_err(|e| err_at(state, ErrorKind::ResultPathMatchFailure, e))?;
                let Value::Array(items) = items else {
                    return Err(err_at(
                        state,
                        ErrorKind::ResultPathMatchFailure,
                        format!("items path {} did not select an array", items_path),
                    ));
                };
                self.run_map(state, items, iterator, *max_concurrency, trace)
                    .await?
            }
            StateKind::Parallel { branches } => {
                self.run_parallel(state, branches, &effective, trace).await?
            }
        };

        let selected = match &state.result_selector {
            Some(selector) => apply_result_selector(state, selector, &raw)?,
            None => raw,
        };
        let merged = match &state.result_path {
            ResultPath::Replace => selected,
            ResultPath::At(path) => path
                .merge(&input, selected)
                .map_err(|e| err_at(state, ErrorKind::ResultPathMatchFailure, e))?,
            ResultPath::Discard => input,
        };
        let output = state
            .output_path
            .select(&merged)
            .map_err(|e| err_at(state, ErrorKind::ResultPathMatchFailure, e))?;
        Ok(Step::Output(output))
    }

    /// Fan the selected items out over the iterator machine, bounded by
    /// `max_concurrency` (zero means unbounded). Results keep item order.
    async fn run_map(
        &self,
        state: &State,
        items: Vec<Value>,
        iterator: &StateMachine,
        max_concurrency: usize,
        trace: &mut ExecutionTrace,
    ) -> Result<Value, SimulationError> {
        let permits = if max_concurrency == 0 {
            Semaphore::MAX_PERMITS
        } else {
            max_concurrency
        };
        let semaphore = Arc::new(Semaphore::new(permits));
        let len = items.len();
        let mut join_set = JoinSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let machine = iterator.clone();
            let mocks = Arc::clone(&self.mocks);
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                // The semaphore is never closed, so a permit always arrives.
                let _permit = semaphore.acquire_owned().await.ok();
                (index, run_owned(machine, item, mocks).await)
            });
        }
        let outputs = collect_ordered(join_set, len, trace)
            .await
            .map_err(|err| SimulationError {
                kind: err.kind.clone(),
                state: state.name.clone(),
                cause: err.to_string(),
            })?;
        Ok(Value::Array(outputs))
    }

    /// Run every branch concurrently on the same input. A single branch
    /// failure aborts the siblings and fails the state as
    /// `States.BranchFailed`.
    async fn run_parallel(
        &self,
        state: &State,
        branches: &[StateMachine],
        input: &Value,
        trace: &mut ExecutionTrace,
    ) -> Result<Value, SimulationError> {
        let len = branches.len();
        let mut join_set = JoinSet::new();
        for (index, branch) in branches.iter().enumerate() {
            let machine = branch.clone();
            let mocks = Arc::clone(&self.mocks);
            let input = input.clone();
            join_set.spawn(async move { (index, run_owned(machine, input, mocks).await) });
        }
        let outputs = collect_ordered(join_set, len, trace)
            .await
            .map_err(|err| {
                // A missing mock stays fatal; only workflow failures become
                // branch failures.
                if err.kind == ErrorKind::ResourceNotMocked {
                    err
                } else {
                    SimulationError {
                        kind: ErrorKind::BranchFailed,
                        state: state.name.clone(),
                        cause: err.to_string(),
                    }
                }
            })?;
        Ok(Value::Array(outputs))
    }

    async fn wait(
        &self,
        state: &State,
        trigger: &WaitTrigger,
        data: &Value,
    ) -> Result<(), SimulationError> {
        match trigger {
            WaitTrigger::Seconds(seconds) => {
                tokio::time::sleep(std::time::Duration::from_secs(*seconds)).await;
            }
            WaitTrigger::SecondsPath(path) => {
                let value = path
                    .select(data)
                    .map_err(|e| err_at(state, ErrorKind::ParameterPathFailure, e))?;
                let seconds = value.as_u64().ok_or_else(|| {
                    err_at(
                        state,
                        ErrorKind::ParameterPathFailure,
                        format!("{path} must select a non-negative integer"),
                    )
                })?;
                tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;
            }
            WaitTrigger::Timestamp(when) => wait_until(when).await,
            WaitTrigger::TimestampPath(path) => {
                let value = path
                    .select(data)
                    .map_err(|e| err_at(state, ErrorKind::ParameterPathFailure, e))?;
                let raw = value.as_str().ok_or_else(|| {
                    err_at(
                        state,
                        ErrorKind::ParameterPathFailure,
                        format!("{path} must select an RFC 3339 timestamp"),
                    )
                })?;
                let when = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| err_at(state, ErrorKind::ParameterPathFailure, e))?
                    .with_timezone(&Utc);
                wait_until(&when).await;
            }
        }
        Ok(())
    }
}

/// Drain a fan-out join set, preserving spawn order in the collected
/// outputs. The first child failure aborts the remaining tasks; sub-traces
/// of finished children are folded into `trace` in spawn order either way.
async fn collect_ordered(
    mut join_set: JoinSet<(usize, SimulationRun)>,
    len: usize,
    trace: &mut ExecutionTrace,
) -> Result<Vec<Value>, SimulationError> {
    let mut slots: Vec<Option<SimulationRun>> = Vec::with_capacity(len);
    slots.resize_with(len, || None);
    let mut failure = None;

    while let Some(joined) = join_set.join_next().await {
        // Aborted siblings surface as join errors; skip them.
        let Ok((index, run)) = joined else { continue };
        if failure.is_none() {
            if let Err(err) = &run.result {
                failure = Some(err.clone());
                join_set.abort_all();
            }
        }
        slots[index] = Some(run);
    }

    let mut outputs = Vec::with_capacity(len);
    for run in slots.into_iter().flatten() {
        trace.absorb(run.trace);
        if let Ok(value) = run.result {
            outputs.push(value);
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(outputs),
    }
}

/// Entry point for spawned sub-runs; boxing cuts the recursive future type
/// a Map iterator or Parallel branch would otherwise create.
fn run_owned(
    machine: StateMachine,
    input: Value,
    mocks: Arc<MockRegistry>,
) -> BoxFuture<'static, SimulationRun> {
    Box::pin(async move { Simulator::with_shared(mocks).run(&machine, input).await })
}

async fn wait_until(when: &DateTime<Utc>) {
    if let Ok(delay) = (*when - Utc::now()).to_std() {
        tokio::time::sleep(delay).await;
    }
}

fn caught_data(
    state: &State,
    catcher: &Catcher,
    input: &Value,
    err: &SimulationError,
) -> Result<Value, SimulationError> {
    let payload = json!({"Error": err.kind.as_str(), "Cause": err.cause});
    match &catcher.result_path {
        ResultPath::Replace => Ok(payload),
        ResultPath::At(path) => path
            .merge(input, payload)
            .map_err(|e| err_at(state, ErrorKind::ResultPathMatchFailure, e)),
        ResultPath::Discard => Ok(input.clone()),
    }
}

fn apply_result_selector(
    state: &State,
    selector: &[(String, JsonPath)],
    raw: &Value,
) -> Result<Value, SimulationError> {
    let mut out = Map::new();
    for (key, path) in selector {
        let value = path
            .select(raw)
            .map_err(|e| err_at(state, ErrorKind::ResultPathMatchFailure, e))?;
        let key = key.strip_suffix(".$").unwrap_or(key);
        out.insert(key.to_string(), value);
    }
    Ok(Value::Object(out))
}

fn err_at(state: &State, kind: ErrorKind, cause: impl ToString) -> SimulationError {
    SimulationError {
        kind,
        state: state.name.clone(),
        cause: cause.to_string(),
    }
}
