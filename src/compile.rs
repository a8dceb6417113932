//! Compilation of a validated machine into an Amazon States Language
//! document.
//!
//! Output is deterministic: states appear in declaration order, fields in a
//! fixed order per state, and defaulted settings (root paths, unset retrier
//! knobs) are omitted so the document stays minimal.

use std::io::Write;

use serde_json::{Map, Value, json};

use crate::choice::ChoiceRule;
use crate::machine::{
    Catcher, ResultPath, Retrier, State, StateKind, StateMachine, Transition, WaitTrigger,
};

/// Render the machine as an ASL document.
pub fn compile(machine: &StateMachine) -> Value {
    let mut doc = Map::new();
    if let Some(comment) = &machine.comment {
        doc.insert("Comment".into(), json!(comment));
    }
    doc.insert("StartAt".into(), json!(machine.start_at));

    let mut states = Map::new();
    for state in machine.states() {
        states.insert(state.name.clone(), compile_state(state));
    }
    doc.insert("States".into(), Value::Object(states));
    Value::Object(doc)
}

/// Serialize the compiled document, pretty-printed, to a writer.
pub fn compile_to_writer<W: Write>(
    machine: &StateMachine,
    writer: W,
) -> Result<(), serde_json::Error> {
    serde_json::to_writer_pretty(writer, &compile(machine))
}

fn compile_state(state: &State) -> Value {
    let mut doc = Map::new();
    doc.insert("Type".into(), json!(state.kind.type_name()));
    if let Some(comment) = &state.comment {
        doc.insert("Comment".into(), json!(comment));
    }
    if !state.input_path.is_root() {
        doc.insert("InputPath".into(), json!(state.input_path.as_str()));
    }
    if !state.output_path.is_root() {
        doc.insert("OutputPath".into(), json!(state.output_path.as_str()));
    }

    match &state.kind {
        StateKind::Pass { result } => {
            if let Some(result) = result {
                doc.insert("Result".into(), result.clone());
            }
        }
        StateKind::Task { resource } => {
            doc.insert("Resource".into(), json!(resource));
        }
        StateKind::Choice { rules, default } => {
            let choices: Vec<Value> = rules.iter().map(compile_rule).collect();
            doc.insert("Choices".into(), Value::Array(choices));
            if let Some(default) = default {
                doc.insert("Default".into(), json!(default));
            }
        }
        StateKind::Wait { trigger } => match trigger {
            WaitTrigger::Seconds(seconds) => {
                doc.insert("Seconds".into(), json!(seconds));
            }
            WaitTrigger::SecondsPath(path) => {
                doc.insert("SecondsPath".into(), json!(path.as_str()));
            }
            WaitTrigger::Timestamp(when) => {
                doc.insert("Timestamp".into(), json!(when.to_rfc3339()));
            }
            WaitTrigger::TimestampPath(path) => {
                doc.insert("TimestampPath".into(), json!(path.as_str()));
            }
        },
        StateKind::Succeed => {}
        StateKind::Fail { error, cause } => {
            doc.insert("Error".into(), json!(error));
            doc.insert("Cause".into(), json!(cause));
        }
        StateKind::Map {
            items_path,
            iterator,
            max_concurrency,
        } => {
            if !items_path.is_root() {
                doc.insert("ItemsPath".into(), json!(items_path.as_str()));
            }
            doc.insert("Iterator".into(), compile(iterator));
            if *max_concurrency > 0 {
                doc.insert("MaxConcurrency".into(), json!(max_concurrency));
            }
        }
        StateKind::Parallel { branches } => {
            let branches: Vec<Value> = branches.iter().map(compile).collect();
            doc.insert("Branches".into(), Value::Array(branches));
        }
    }

    if let Some(selector) = &state.result_selector {
        let mut fields = Map::new();
        for (key, path) in selector {
            fields.insert(key.clone(), json!(path.as_str()));
        }
        doc.insert("ResultSelector".into(), Value::Object(fields));
    }

    match &state.result_path {
        ResultPath::Replace => {}
        ResultPath::At(path) => {
            doc.insert("ResultPath".into(), json!(path.as_str()));
        }
        ResultPath::Discard => {
            doc.insert("ResultPath".into(), Value::Null);
        }
    }

    if !state.retriers.is_empty() {
        let retriers: Vec<Value> = state.retriers.iter().map(compile_retrier).collect();
        doc.insert("Retry".into(), Value::Array(retriers));
    }
    if !state.catchers.is_empty() {
        let catchers: Vec<Value> = state.catchers.iter().map(compile_catcher).collect();
        doc.insert("Catch".into(), Value::Array(catchers));
    }

    match &state.transition {
        Some(Transition::Next(target)) => {
            doc.insert("Next".into(), json!(target));
        }
        Some(Transition::End) => {
            doc.insert("End".into(), json!(true));
        }
        None => {}
    }

    Value::Object(doc)
}

fn compile_rule(rule: &ChoiceRule) -> Value {
    let mut doc = Map::new();
    doc.insert("Variable".into(), json!(rule.variable.as_str()));
    doc.insert(rule.test.asl_field().into(), rule.test.asl_value());
    doc.insert("Next".into(), json!(rule.next));
    Value::Object(doc)
}

fn compile_retrier(retrier: &Retrier) -> Value {
    let mut doc = Map::new();
    let names: Vec<&str> = retrier.error_equals.iter().map(|e| e.as_str()).collect();
    doc.insert("ErrorEquals".into(), json!(names));
    if let Some(seconds) = retrier.interval_seconds {
        doc.insert("IntervalSeconds".into(), json!(seconds));
    }
    if let Some(attempts) = retrier.max_attempts {
        doc.insert("MaxAttempts".into(), json!(attempts));
    }
    if let Some(rate) = retrier.backoff_rate {
        doc.insert("BackoffRate".into(), json!(rate));
    }
    Value::Object(doc)
}

fn compile_catcher(catcher: &Catcher) -> Value {
    let mut doc = Map::new();
    let names: Vec<&str> = catcher.error_equals.iter().map(|e| e.as_str()).collect();
    doc.insert("ErrorEquals".into(), json!(names));
    match &catcher.result_path {
        ResultPath::Replace => {}
        ResultPath::At(path) => {
            doc.insert("ResultPath".into(), json!(path.as_str()));
        }
        ResultPath::Discard => {
            doc.insert("ResultPath".into(), Value::Null);
        }
    }
    doc.insert("Next".into(), json!(catcher.next));
    Value::Object(doc)
}
