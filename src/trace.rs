//! Execution traces: the per-state audit trail a simulation run returns.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// One state execution: what went in, what came out (or what failed), and
/// when.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub state_name: String,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }
}

/// The ordered record sequence of one run, nested sub-runs included.
///
/// Records appear in completion order for the top-level machine; a Map or
/// Parallel state's sub-run records are spliced in item/branch declaration
/// order, before the record of the parent state itself.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionTrace {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    records: Vec<ExecutionRecord>,
}

impl ExecutionTrace {
    pub(crate) fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            records: Vec::new(),
        }
    }

    pub(crate) fn append(&mut self, record: ExecutionRecord) {
        self.records.push(record);
    }

    /// Fold a sub-run's records into this trace, keeping their order.
    pub(crate) fn absorb(&mut self, other: ExecutionTrace) {
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&ExecutionRecord> {
        self.records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> ExecutionRecord {
        let now = Utc::now();
        ExecutionRecord {
            state_name: name.into(),
            input: json!({}),
            output: Some(json!({})),
            error: None,
            started_at: now,
            ended_at: now + chrono::Duration::milliseconds(25),
        }
    }

    #[test]
    fn appends_in_order() {
        let mut trace = ExecutionTrace::new();
        assert!(trace.is_empty());
        trace.append(record("a"));
        trace.append(record("b"));
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.records()[0].state_name, "a");
        assert_eq!(trace.last().unwrap().state_name, "b");
    }

    #[test]
    fn absorb_splices_subrun_records() {
        let mut parent = ExecutionTrace::new();
        parent.append(record("before"));

        let mut child = ExecutionTrace::new();
        child.append(record("inner-1"));
        child.append(record("inner-2"));

        parent.absorb(child);
        parent.append(record("map"));

        let names: Vec<&str> = parent
            .records()
            .iter()
            .map(|r| r.state_name.as_str())
            .collect();
        assert_eq!(names, ["before", "inner-1", "inner-2", "map"]);
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(ExecutionTrace::new().run_id, ExecutionTrace::new().run_id);
    }

    #[test]
    fn record_duration() {
        assert_eq!(record("a").duration_ms(), 25);
    }

    #[test]
    fn trace_serializes_to_json() {
        let mut trace = ExecutionTrace::new();
        trace.append(record("a"));
        let value = serde_json::to_value(&trace).unwrap();
        assert_eq!(value["records"][0]["state_name"], json!("a"));
        assert!(value["run_id"].is_string());
    }
}
