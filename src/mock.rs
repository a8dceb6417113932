//! Mock task resources for local simulation.
//!
//! Task states name a resource URI; a simulation run resolves each one
//! against a [`MockRegistry`] of closures standing in for the real service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ErrorKind;

/// An error reported by a mocked task.
///
/// Defaults to `States.TaskFailed`; use [`TaskError::with_kind`] to surface a
/// custom error name for Retry/Catch matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub cause: String,
}

impl TaskError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::TaskFailed,
            cause: cause.into(),
        }
    }

    pub fn with_kind(kind: ErrorKind, cause: impl Into<String>) -> Self {
        Self {
            kind,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.cause)
    }
}

impl std::error::Error for TaskError {}

/// The callable standing in for a task resource.
pub type MockFn = Arc<dyn Fn(&Value) -> Result<Value, TaskError> + Send + Sync>;

/// Maps resource URIs to their mocks for one simulation run.
///
/// Cloning is cheap; the closures are shared, not copied.
#[derive(Default, Clone)]
pub struct MockRegistry {
    mocks: HashMap<String, MockFn>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` as the implementation of `resource`, replacing any
    /// earlier registration.
    pub fn register<F>(&mut self, resource: impl Into<String>, f: F)
    where
        F: Fn(&Value) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        self.mocks.insert(resource.into(), Arc::new(f));
    }

    pub fn get(&self, resource: &str) -> Option<MockFn> {
        self.mocks.get(resource).cloned()
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }
}

impl fmt::Debug for MockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut resources: Vec<&str> = self.mocks.keys().map(String::as_str).collect();
        resources.sort_unstable();
        f.debug_struct("MockRegistry")
            .field("resources", &resources)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registers_and_invokes_a_mock() {
        let mut registry = MockRegistry::new();
        registry.register("arn:fake:sum", |input| {
            let a = input["a"].as_i64().unwrap_or(0);
            let b = input["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        });

        let mock = registry.get("arn:fake:sum").unwrap();
        assert_eq!(mock(&json!({"a": 2, "b": 3})).unwrap(), json!(5));
        assert!(registry.get("arn:fake:other").is_none());
    }

    #[test]
    fn later_registration_wins() {
        let mut registry = MockRegistry::new();
        registry.register("r", |_| Ok(json!(1)));
        registry.register("r", |_| Ok(json!(2)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("r").unwrap()(&json!(null)).unwrap(), json!(2));
    }

    #[test]
    fn mock_errors_carry_kind_and_cause() {
        let err = TaskError::new("boom");
        assert_eq!(err.kind, ErrorKind::TaskFailed);
        assert_eq!(err.to_string(), "States.TaskFailed: boom");

        let custom = TaskError::with_kind(ErrorKind::Custom("Throttled".into()), "slow down");
        assert_eq!(custom.to_string(), "Throttled: slow down");
    }

    #[test]
    fn debug_lists_registered_resources() {
        let mut registry = MockRegistry::new();
        registry.register("b", |_| Ok(json!(null)));
        registry.register("a", |_| Ok(json!(null)));
        let rendered = format!("{registry:?}");
        assert!(rendered.contains("\"a\""));
        assert!(rendered.contains("\"b\""));
    }
}
