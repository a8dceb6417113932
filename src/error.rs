use std::fmt;

use thiserror::Error;

/// Error names matched by Retry and Catch policies.
///
/// Covers the predefined `States.*` names from the Amazon States Language
/// plus the engine-internal kinds, with `Custom` for anything a Fail state
/// or mock resource reports under its own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wildcard, matches every error.
    All,
    Timeout,
    TaskFailed,
    Permissions,
    ResultPathMatchFailure,
    ParameterPathFailure,
    BranchFailed,
    NoChoiceMatched,
    IntrinsicFailure,
    /// A Task state's resource has no registered mock. Fatal to the run,
    /// never offered to retriers or catchers.
    ResourceNotMocked,
    /// An application-defined error name.
    Custom(String),
}

impl ErrorKind {
    /// The name used in compiled documents and in `error_equals` matching.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::All => "States.ALL",
            ErrorKind::Timeout => "States.Timeout",
            ErrorKind::TaskFailed => "States.TaskFailed",
            ErrorKind::Permissions => "States.Permissions",
            ErrorKind::ResultPathMatchFailure => "States.ResultPathMatchFailure",
            ErrorKind::ParameterPathFailure => "States.ParameterPathFailure",
            ErrorKind::BranchFailed => "States.BranchFailed",
            ErrorKind::NoChoiceMatched => "States.NoChoiceMatched",
            ErrorKind::IntrinsicFailure => "States.IntrinsicFailure",
            ErrorKind::ResourceNotMocked => "ResourceNotMocked",
            ErrorKind::Custom(name) => name,
        }
    }

    /// Parse an error name; unknown names become [`ErrorKind::Custom`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "States.ALL" => ErrorKind::All,
            "States.Timeout" => ErrorKind::Timeout,
            "States.TaskFailed" => ErrorKind::TaskFailed,
            "States.Permissions" => ErrorKind::Permissions,
            "States.ResultPathMatchFailure" => ErrorKind::ResultPathMatchFailure,
            "States.ParameterPathFailure" => ErrorKind::ParameterPathFailure,
            "States.BranchFailed" => ErrorKind::BranchFailed,
            "States.NoChoiceMatched" => ErrorKind::NoChoiceMatched,
            "States.IntrinsicFailure" => ErrorKind::IntrinsicFailure,
            "ResourceNotMocked" => ErrorKind::ResourceNotMocked,
            other => ErrorKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures from parsing or applying a JSONPath expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path {0:?} must begin with '$'")]
    MissingRoot(String),

    #[error("path {path:?} uses unsupported operator {operator:?}")]
    UnsupportedOperator { path: String, operator: String },

    #[error("path {path:?} has a malformed segment at {segment:?}")]
    MalformedSegment { path: String, segment: String },

    #[error("path {0:?} did not match the value")]
    NotFound(String),

    #[error("path {path:?} cannot descend into a non-container at {segment:?}")]
    NotAContainer { path: String, segment: String },
}

/// Structural violations found while building a state machine.
///
/// Raised at build time only; a machine that fails validation is never
/// handed to the compiler or the simulator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("duplicate state name {0:?}")]
    DuplicateState(String),

    #[error("state name {0:?} exceeds 128 characters")]
    NameTooLong(String),

    #[error("no start state declared")]
    MissingStart,

    #[error("start state {0:?} is not defined")]
    UnknownStart(String),

    #[error("cannot connect from undefined state {0:?}")]
    UnknownState(String),

    #[error("state {state:?} transitions to undefined state {target:?}")]
    UnknownTarget { state: String, target: String },

    #[error("terminal state {0:?} cannot have an outgoing transition")]
    TerminalTransition(String),

    #[error("state {0:?} must set exactly one of next or end")]
    MissingTransition(String),

    #[error("state {0:?}: wait seconds must be greater than zero")]
    ZeroWaitSeconds(String),

    #[error("state {state:?}: {reason}")]
    InvalidRetrier { state: String, reason: String },

    #[error("state {state:?}: result selector key {key:?} must end with .$")]
    InvalidResultSelector { state: String, key: String },

    #[error("state {state:?}: {field} is not supported on {kind} states")]
    UnsupportedField {
        state: String,
        field: &'static str,
        kind: &'static str,
    },
}

/// A failed simulation run: the classified error kind, the state where it
/// originated, and a human-readable cause.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} at state {state:?}: {cause}")]
pub struct SimulationError {
    pub kind: ErrorKind,
    pub state: String,
    pub cause: String,
}
