use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::graph::StateMachine;
use crate::choice::ChoiceRule;
use crate::error::ErrorKind;
use crate::path::JsonPath;

/// State names are keys in the compiled document; ASL caps their length.
pub const MAX_STATE_NAME_LENGTH: usize = 128;

const DEFAULT_INTERVAL_SECONDS: u64 = 1;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_RATE: f64 = 2.0;

/// Ceiling on a single computed retry delay: one day.
pub const MAX_RETRY_DELAY_SECONDS: u64 = 86_400;

/// Where a state transfers control after completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Continue at the named state.
    Next(String),
    /// The machine ends successfully after this state.
    End,
}

/// Where a state writes its shaped result back into the execution context.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResultPath {
    /// The result replaces the whole context (the `$` default).
    #[default]
    Replace,
    /// The result is merged at this path; siblings are preserved.
    At(JsonPath),
    /// The result is discarded and the context passes through unchanged
    /// (an explicit `"ResultPath": null`).
    Discard,
}

/// What a Wait state waits for. Exactly one variant per state.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitTrigger {
    Seconds(u64),
    SecondsPath(JsonPath),
    Timestamp(DateTime<Utc>),
    TimestampPath(JsonPath),
}

/// A retry policy: which error names it handles and how the delay grows.
///
/// Unset fields fall back to the ASL defaults (interval 1s, 3 attempts,
/// backoff x2) at execution time and are omitted from compiled output.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrier {
    pub error_equals: Vec<ErrorKind>,
    pub interval_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_rate: Option<f64>,
}

impl Retrier {
    pub fn new(error_equals: Vec<ErrorKind>) -> Self {
        Self {
            error_equals,
            interval_seconds: None,
            max_attempts: None,
            backoff_rate: None,
        }
    }

    pub fn interval_seconds(mut self, seconds: u64) -> Self {
        self.interval_seconds = Some(seconds);
        self
    }

    /// Total attempts including the first; zero means the error is never
    /// retried.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn backoff_rate(mut self, rate: f64) -> Self {
        self.backoff_rate = Some(rate);
        self
    }

    /// Whether this retrier governs the given error kind.
    pub fn handles(&self, kind: &ErrorKind) -> bool {
        self.error_equals
            .iter()
            .any(|e| *e == ErrorKind::All || e == kind)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    /// Delay before re-running after the given failed attempt (1-based):
    /// `interval_seconds * backoff_rate^(attempt - 1)`, capped at
    /// [`MAX_RETRY_DELAY_SECONDS`] so exponential growth cannot overflow.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let interval = self.interval_seconds.unwrap_or(DEFAULT_INTERVAL_SECONDS) as f64;
        let backoff = self.backoff_rate.unwrap_or(DEFAULT_BACKOFF_RATE);
        let exponent = attempt.saturating_sub(1).min(1_000) as i32;
        let seconds = (interval * backoff.powi(exponent)).min(MAX_RETRY_DELAY_SECONDS as f64);
        Duration::from_secs_f64(seconds)
    }
}

/// A recovery policy: redirects execution to `next` after a matched error,
/// merging the `{ Error, Cause }` payload at `result_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct Catcher {
    pub error_equals: Vec<ErrorKind>,
    pub next: String,
    pub result_path: ResultPath,
}

impl Catcher {
    pub fn new(error_equals: Vec<ErrorKind>, next: impl Into<String>) -> Self {
        Self {
            error_equals,
            next: next.into(),
            result_path: ResultPath::Replace,
        }
    }

    pub fn result_path(mut self, result_path: ResultPath) -> Self {
        self.result_path = result_path;
        self
    }

    pub fn handles(&self, kind: &ErrorKind) -> bool {
        self.error_equals
            .iter()
            .any(|e| *e == ErrorKind::All || e == kind)
    }
}

/// The variant-specific payload of a state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateKind {
    /// Forwards its input, optionally substituting a static result.
    Pass { result: Option<Value> },
    /// Invokes the mock registered for `resource`.
    Task { resource: String },
    /// Routes to the first rule whose test holds, or to `default`.
    Choice {
        rules: Vec<ChoiceRule>,
        default: Option<String>,
    },
    /// Suspends this step for a duration or until a deadline.
    Wait { trigger: WaitTrigger },
    /// Ends the run successfully with the state's received input.
    Succeed,
    /// Ends the run with a static error and cause.
    Fail { error: String, cause: String },
    /// Runs `iterator` once per element of the selected array.
    Map {
        items_path: JsonPath,
        iterator: StateMachine,
        /// Upper bound on concurrent iterations; zero means unbounded.
        max_concurrency: usize,
    },
    /// Runs every branch concurrently on the same input.
    Parallel { branches: Vec<StateMachine> },
}

impl StateKind {
    /// The `Type` field value in Amazon States Language.
    pub fn type_name(&self) -> &'static str {
        match self {
            StateKind::Pass { .. } => "Pass",
            StateKind::Task { .. } => "Task",
            StateKind::Choice { .. } => "Choice",
            StateKind::Wait { .. } => "Wait",
            StateKind::Succeed => "Succeed",
            StateKind::Fail { .. } => "Fail",
            StateKind::Map { .. } => "Map",
            StateKind::Parallel { .. } => "Parallel",
        }
    }

    /// Terminal variants carry no outgoing transition: Succeed and Fail end
    /// the run, Choice transfers control only through its rules.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StateKind::Succeed | StateKind::Fail { .. } | StateKind::Choice { .. }
        )
    }
}

/// A single node of the workflow graph.
///
/// Construct with the variant constructors ([`State::pass`], [`State::task`],
/// ...) and refine with the `with_*` builders; wire transitions with
/// [`State::next`] / [`State::end`] or [`MachineBuilder::connect`].
///
/// [`MachineBuilder::connect`]: super::MachineBuilder::connect
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub name: String,
    pub comment: Option<String>,
    pub input_path: JsonPath,
    pub output_path: JsonPath,
    pub result_path: ResultPath,
    /// Keys keep their `.$` suffix as declared; values are paths into the
    /// raw result.
    pub result_selector: Option<Vec<(String, JsonPath)>>,
    pub retriers: Vec<Retrier>,
    pub catchers: Vec<Catcher>,
    pub transition: Option<Transition>,
    pub kind: StateKind,
}

impl State {
    fn new(name: impl Into<String>, kind: StateKind) -> Self {
        Self {
            name: name.into(),
            comment: None,
            input_path: JsonPath::root(),
            output_path: JsonPath::root(),
            result_path: ResultPath::Replace,
            result_selector: None,
            retriers: Vec::new(),
            catchers: Vec::new(),
            transition: None,
            kind,
        }
    }

    pub fn pass(name: impl Into<String>) -> Self {
        Self::new(name, StateKind::Pass { result: None })
    }

    pub fn task(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::new(
            name,
            StateKind::Task {
                resource: resource.into(),
            },
        )
    }

    pub fn choice(name: impl Into<String>, rules: Vec<ChoiceRule>) -> Self {
        Self::new(
            name,
            StateKind::Choice {
                rules,
                default: None,
            },
        )
    }

    pub fn wait(name: impl Into<String>, trigger: WaitTrigger) -> Self {
        Self::new(name, StateKind::Wait { trigger })
    }

    pub fn succeed(name: impl Into<String>) -> Self {
        Self::new(name, StateKind::Succeed)
    }

    pub fn fail(
        name: impl Into<String>,
        error: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            StateKind::Fail {
                error: error.into(),
                cause: cause.into(),
            },
        )
    }

    pub fn map(name: impl Into<String>, items_path: JsonPath, iterator: StateMachine) -> Self {
        Self::new(
            name,
            StateKind::Map {
                items_path,
                iterator,
                max_concurrency: 0,
            },
        )
    }

    pub fn parallel(name: impl Into<String>, branches: Vec<StateMachine>) -> Self {
        Self::new(name, StateKind::Parallel { branches })
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_input_path(mut self, path: JsonPath) -> Self {
        self.input_path = path;
        self
    }

    pub fn with_output_path(mut self, path: JsonPath) -> Self {
        self.output_path = path;
        self
    }

    pub fn with_result_path(mut self, result_path: ResultPath) -> Self {
        self.result_path = result_path;
        self
    }

    pub fn with_result_selector(mut self, selector: Vec<(String, JsonPath)>) -> Self {
        self.result_selector = Some(selector);
        self
    }

    /// Static result for a Pass state; ignored by other variants.
    pub fn with_result(mut self, result: Value) -> Self {
        if let StateKind::Pass { result: slot } = &mut self.kind {
            *slot = Some(result);
        }
        self
    }

    /// Default target for a Choice state; ignored by other variants.
    pub fn with_default(mut self, target: impl Into<String>) -> Self {
        if let StateKind::Choice { default, .. } = &mut self.kind {
            *default = Some(target.into());
        }
        self
    }

    /// Concurrency bound for a Map state; ignored by other variants.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        if let StateKind::Map {
            max_concurrency, ..
        } = &mut self.kind
        {
            *max_concurrency = limit;
        }
        self
    }

    pub fn retry(mut self, retrier: Retrier) -> Self {
        self.retriers.push(retrier);
        self
    }

    pub fn catch(mut self, catcher: Catcher) -> Self {
        self.catchers.push(catcher);
        self
    }

    pub fn next(mut self, target: impl Into<String>) -> Self {
        self.transition = Some(Transition::Next(target.into()));
        self
    }

    pub fn end(mut self) -> Self {
        self.transition = Some(Transition::End);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_defaults() {
        let state = State::pass("p");
        assert_eq!(state.name, "p");
        assert!(state.input_path.is_root());
        assert!(state.output_path.is_root());
        assert_eq!(state.result_path, ResultPath::Replace);
        assert!(state.retriers.is_empty());
        assert!(state.catchers.is_empty());
        assert!(state.transition.is_none());
    }

    #[test]
    fn terminal_variants() {
        assert!(State::succeed("s").is_terminal());
        assert!(State::fail("f", "E", "c").is_terminal());
        assert!(State::choice("c", vec![]).is_terminal());
        assert!(!State::pass("p").is_terminal());
        assert!(!State::task("t", "r").is_terminal());
    }

    #[test]
    fn type_names() {
        assert_eq!(State::pass("p").kind.type_name(), "Pass");
        assert_eq!(State::task("t", "r").kind.type_name(), "Task");
        assert_eq!(
            State::wait("w", WaitTrigger::Seconds(1)).kind.type_name(),
            "Wait"
        );
        assert_eq!(State::succeed("s").kind.type_name(), "Succeed");
    }

    #[test]
    fn pass_result_only_applies_to_pass() {
        let pass = State::pass("p").with_result(json!({"x": 1}));
        assert_eq!(pass.kind, StateKind::Pass { result: Some(json!({"x": 1})) });

        let task = State::task("t", "r").with_result(json!(1));
        assert_eq!(
            task.kind,
            StateKind::Task {
                resource: "r".into()
            }
        );
    }

    #[test]
    fn retrier_defaults_and_backoff() {
        let retrier = Retrier::new(vec![ErrorKind::All]);
        assert_eq!(retrier.attempts(), 3);
        assert_eq!(retrier.delay_after_attempt(1), Duration::from_secs(1));
        assert_eq!(retrier.delay_after_attempt(2), Duration::from_secs(2));
        assert_eq!(retrier.delay_after_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn retrier_custom_backoff() {
        let retrier = Retrier::new(vec![ErrorKind::Timeout])
            .interval_seconds(3)
            .backoff_rate(1.5)
            .max_attempts(5);
        assert_eq!(retrier.attempts(), 5);
        assert_eq!(retrier.delay_after_attempt(1), Duration::from_secs(3));
        assert_eq!(
            retrier.delay_after_attempt(2),
            Duration::from_secs_f64(4.5)
        );
    }

    #[test]
    fn retrier_delay_is_capped() {
        let retrier = Retrier::new(vec![ErrorKind::All])
            .interval_seconds(u64::MAX)
            .backoff_rate(f64::MAX)
            .max_attempts(u32::MAX);
        assert_eq!(
            retrier.delay_after_attempt(u32::MAX),
            Duration::from_secs(MAX_RETRY_DELAY_SECONDS)
        );
        assert_eq!(
            retrier.delay_after_attempt(1),
            Duration::from_secs(MAX_RETRY_DELAY_SECONDS)
        );
    }

    #[test]
    fn retrier_matching() {
        let wildcard = Retrier::new(vec![ErrorKind::All]);
        assert!(wildcard.handles(&ErrorKind::TaskFailed));
        assert!(wildcard.handles(&ErrorKind::Custom("Anything".into())));

        let narrow = Retrier::new(vec![ErrorKind::Timeout, ErrorKind::Permissions]);
        assert!(narrow.handles(&ErrorKind::Timeout));
        assert!(!narrow.handles(&ErrorKind::TaskFailed));
    }

    #[test]
    fn catcher_matching_and_result_path() {
        let catcher = Catcher::new(vec![ErrorKind::TaskFailed], "recover")
            .result_path(ResultPath::At(JsonPath::parse("$.error").unwrap()));
        assert!(catcher.handles(&ErrorKind::TaskFailed));
        assert!(!catcher.handles(&ErrorKind::Timeout));
        assert_eq!(catcher.next, "recover");
        assert!(matches!(catcher.result_path, ResultPath::At(_)));
    }

    #[test]
    fn transition_builders() {
        let a = State::pass("a").next("b");
        assert_eq!(a.transition, Some(Transition::Next("b".into())));

        let b = State::pass("b").end();
        assert_eq!(b.transition, Some(Transition::End));
    }
}
