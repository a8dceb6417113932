use crate::error::BuildError;
use crate::machine::state::{
    MAX_STATE_NAME_LENGTH, ResultPath, State, StateKind, Transition, WaitTrigger,
};

/// A validated workflow graph: named states in declaration order plus the
/// designated start state.
///
/// Machines are immutable once built. Nested machines (a Map iterator,
/// Parallel branches) are owned by value inside their parent state and are
/// validated independently when they are built.
#[derive(Debug, Clone, PartialEq)]
pub struct StateMachine {
    pub comment: Option<String>,
    pub start_at: String,
    states: Vec<State>,
}

impl StateMachine {
    pub fn builder() -> MachineBuilder {
        MachineBuilder::default()
    }

    /// States in declaration order.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// Incremental construction of a [`StateMachine`].
///
/// `connect` edges are recorded as declared and applied before validation,
/// so states can be wired in any order. `build` runs the full structural
/// checks and returns the first violation it finds.
#[derive(Debug, Default)]
pub struct MachineBuilder {
    comment: Option<String>,
    start_at: Option<String>,
    states: Vec<State>,
    edges: Vec<(String, String)>,
}

impl MachineBuilder {
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn start_at(mut self, name: impl Into<String>) -> Self {
        self.start_at = Some(name.into());
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.states.push(state);
        self
    }

    /// Declare that `from` transitions to `to`, overriding any transition
    /// already set on `from`.
    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Validate the graph shape and produce an executable machine.
    pub fn build(mut self) -> Result<StateMachine, BuildError> {
        for (from, to) in std::mem::take(&mut self.edges) {
            let state = self
                .states
                .iter_mut()
                .find(|s| s.name == from)
                .ok_or_else(|| BuildError::UnknownState(from.clone()))?;
            state.transition = Some(Transition::Next(to));
        }

        for (index, state) in self.states.iter().enumerate() {
            if state.name.len() > MAX_STATE_NAME_LENGTH {
                return Err(BuildError::NameTooLong(state.name.clone()));
            }
            if self.states[..index].iter().any(|s| s.name == state.name) {
                return Err(BuildError::DuplicateState(state.name.clone()));
            }
        }

        let start_at = self.start_at.ok_or(BuildError::MissingStart)?;
        if !self.states.iter().any(|s| s.name == start_at) {
            return Err(BuildError::UnknownStart(start_at));
        }

        for state in &self.states {
            Self::check_state(state, &self.states)?;
        }

        Ok(StateMachine {
            comment: self.comment,
            start_at,
            states: self.states,
        })
    }

    fn check_state(state: &State, states: &[State]) -> Result<(), BuildError> {
        let resolve = |target: &str| -> Result<(), BuildError> {
            if states.iter().any(|s| s.name == target) {
                Ok(())
            } else {
                Err(BuildError::UnknownTarget {
                    state: state.name.clone(),
                    target: target.to_string(),
                })
            }
        };

        if state.is_terminal() {
            if state.transition.is_some() {
                return Err(BuildError::TerminalTransition(state.name.clone()));
            }
        } else if state.transition.is_none() {
            return Err(BuildError::MissingTransition(state.name.clone()));
        }

        if let Some(Transition::Next(target)) = &state.transition {
            resolve(target)?;
        }
        for catcher in &state.catchers {
            resolve(&catcher.next)?;
        }
        if let StateKind::Choice { rules, default } = &state.kind {
            for rule in rules {
                resolve(&rule.next)?;
            }
            if let Some(default) = default {
                resolve(default)?;
            }
        }

        if let StateKind::Wait {
            trigger: WaitTrigger::Seconds(0),
        } = &state.kind
        {
            return Err(BuildError::ZeroWaitSeconds(state.name.clone()));
        }

        Self::check_fields(state)?;

        for retrier in &state.retriers {
            if retrier.interval_seconds == Some(0) {
                return Err(BuildError::InvalidRetrier {
                    state: state.name.clone(),
                    reason: "interval_seconds must be greater than zero".into(),
                });
            }
            if retrier.backoff_rate.is_some_and(|rate| rate < 1.0) {
                return Err(BuildError::InvalidRetrier {
                    state: state.name.clone(),
                    reason: "backoff_rate must be at least 1.0".into(),
                });
            }
        }

        if let Some(selector) = &state.result_selector {
            for (key, _) in selector {
                if !key.ends_with(".$") {
                    return Err(BuildError::InvalidResultSelector {
                        state: state.name.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Reject routing and policy fields on variants whose ASL state object
    /// does not carry them.
    fn check_fields(state: &State) -> Result<(), BuildError> {
        let unsupported = |field: &'static str| BuildError::UnsupportedField {
            state: state.name.clone(),
            field,
            kind: state.kind.type_name(),
        };

        // Retry and Catch exist on Task, Map and Parallel only.
        let has_policies = matches!(
            state.kind,
            StateKind::Task { .. } | StateKind::Map { .. } | StateKind::Parallel { .. }
        );
        if !has_policies {
            if !state.retriers.is_empty() {
                return Err(unsupported("Retry"));
            }
            if !state.catchers.is_empty() {
                return Err(unsupported("Catch"));
            }
        }

        // ResultPath additionally exists on Pass; ResultSelector does not.
        let has_result_path = has_policies || matches!(state.kind, StateKind::Pass { .. });
        if !has_result_path && state.result_path != ResultPath::Replace {
            return Err(unsupported("ResultPath"));
        }
        if !has_policies && state.result_selector.is_some() {
            return Err(unsupported("ResultSelector"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::{ChoiceRule, DataTest};
    use crate::error::ErrorKind;
    use crate::machine::state::{Catcher, Retrier};
    use crate::path::JsonPath;

    fn two_state_builder() -> MachineBuilder {
        StateMachine::builder()
            .start_at("a")
            .state(State::pass("a").next("b"))
            .state(State::pass("b").end())
    }

    #[test]
    fn builds_a_valid_machine() {
        let machine = two_state_builder().build().unwrap();
        assert_eq!(machine.start_at, "a");
        assert_eq!(machine.len(), 2);
        assert_eq!(machine.state("b").unwrap().transition, Some(Transition::End));
        assert!(machine.state("missing").is_none());
    }

    #[test]
    fn preserves_declaration_order() {
        let machine = StateMachine::builder()
            .start_at("z")
            .state(State::pass("z").next("m"))
            .state(State::pass("m").next("a"))
            .state(State::pass("a").end())
            .build()
            .unwrap();
        let names: Vec<_> = machine.states().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["z", "m", "a"]);
    }

    #[test]
    fn connect_wires_states() {
        let machine = StateMachine::builder()
            .start_at("a")
            .state(State::pass("a"))
            .state(State::pass("b").end())
            .connect("a", "b")
            .build()
            .unwrap();
        assert_eq!(
            machine.state("a").unwrap().transition,
            Some(Transition::Next("b".into()))
        );
    }

    #[test]
    fn connect_unknown_source_fails() {
        let err = StateMachine::builder()
            .start_at("a")
            .state(State::pass("a").end())
            .connect("ghost", "a")
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::UnknownState("ghost".into()));
    }

    #[test]
    fn duplicate_names_rejected() {
        let err = StateMachine::builder()
            .start_at("a")
            .state(State::pass("a").end())
            .state(State::pass("a").end())
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::DuplicateState("a".into()));
    }

    #[test]
    fn missing_start_rejected() {
        let err = StateMachine::builder()
            .state(State::pass("a").end())
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingStart);
    }

    #[test]
    fn unknown_start_rejected() {
        let err = StateMachine::builder()
            .start_at("nope")
            .state(State::pass("a").end())
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::UnknownStart("nope".into()));
    }

    #[test]
    fn unresolvable_next_rejected() {
        let err = StateMachine::builder()
            .start_at("a")
            .state(State::pass("a").next("ghost"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::UnknownTarget {
                state: "a".into(),
                target: "ghost".into()
            }
        );
    }

    #[test]
    fn unresolvable_catcher_target_rejected() {
        let err = StateMachine::builder()
            .start_at("t")
            .state(
                State::task("t", "r")
                    .catch(Catcher::new(vec![ErrorKind::All], "ghost"))
                    .end(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownTarget { .. }));
    }

    #[test]
    fn unresolvable_choice_targets_rejected() {
        let rule = ChoiceRule::new(
            JsonPath::parse("$.x").unwrap(),
            DataTest::IsPresent(true),
            "ghost",
        );
        let err = StateMachine::builder()
            .start_at("c")
            .state(State::choice("c", vec![rule]))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownTarget { .. }));
    }

    #[test]
    fn terminal_state_with_transition_rejected() {
        let err = StateMachine::builder()
            .start_at("s")
            .state(State::succeed("s").next("s"))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::TerminalTransition("s".into()));
    }

    #[test]
    fn nonterminal_without_transition_rejected() {
        let err = StateMachine::builder()
            .start_at("a")
            .state(State::pass("a"))
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::MissingTransition("a".into()));
    }

    #[test]
    fn zero_wait_seconds_rejected() {
        let err = StateMachine::builder()
            .start_at("w")
            .state(State::wait("w", WaitTrigger::Seconds(0)).end())
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::ZeroWaitSeconds("w".into()));
    }

    #[test]
    fn bad_retrier_parameters_rejected() {
        let err = StateMachine::builder()
            .start_at("t")
            .state(
                State::task("t", "r")
                    .retry(Retrier::new(vec![ErrorKind::All]).backoff_rate(0.5))
                    .end(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidRetrier { .. }));
    }

    #[test]
    fn result_selector_keys_must_end_with_dollar() {
        let err = StateMachine::builder()
            .start_at("t")
            .state(
                State::task("t", "r")
                    .with_result_selector(vec![("Id".into(), JsonPath::root())])
                    .end(),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::InvalidResultSelector {
                state: "t".into(),
                key: "Id".into()
            }
        );
    }

    #[test]
    fn retry_on_a_pass_state_rejected() {
        let err = StateMachine::builder()
            .start_at("p")
            .state(
                State::pass("p")
                    .retry(Retrier::new(vec![ErrorKind::All]))
                    .end(),
            )
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::UnsupportedField {
                state: "p".into(),
                field: "Retry",
                kind: "Pass"
            }
        );
    }

    #[test]
    fn catch_on_a_wait_state_rejected() {
        let err = StateMachine::builder()
            .start_at("w")
            .state(
                State::wait("w", WaitTrigger::Seconds(1))
                    .catch(Catcher::new(vec![ErrorKind::All], "w"))
                    .end(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnsupportedField { field: "Catch", .. }
        ));
    }

    #[test]
    fn result_path_allowed_on_pass_but_not_wait() {
        let with_pass = StateMachine::builder()
            .start_at("p")
            .state(
                State::pass("p")
                    .with_result_path(ResultPath::At(JsonPath::parse("$.out").unwrap()))
                    .end(),
            )
            .build();
        assert!(with_pass.is_ok());

        let err = StateMachine::builder()
            .start_at("w")
            .state(
                State::wait("w", WaitTrigger::Seconds(1))
                    .with_result_path(ResultPath::Discard)
                    .end(),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnsupportedField {
                field: "ResultPath",
                ..
            }
        ));
    }

    #[test]
    fn result_selector_on_a_succeed_state_rejected() {
        let err = StateMachine::builder()
            .start_at("s")
            .state(
                State::succeed("s")
                    .with_result_selector(vec![("Id.$".into(), JsonPath::root())]),
            )
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnsupportedField {
                field: "ResultSelector",
                ..
            }
        ));
    }

    #[test]
    fn name_length_cap_enforced() {
        let long = "x".repeat(MAX_STATE_NAME_LENGTH + 1);
        let err = StateMachine::builder()
            .start_at(long.clone())
            .state(State::pass(long.clone()).end())
            .build()
            .unwrap_err();
        assert_eq!(err, BuildError::NameTooLong(long));
    }

    #[test]
    fn cycles_are_permitted() {
        // Choice and retry flows may revisit states.
        let rule = ChoiceRule::new(
            JsonPath::parse("$.again").unwrap(),
            DataTest::BooleanEquals(true),
            "a",
        );
        let machine = StateMachine::builder()
            .start_at("a")
            .state(State::pass("a").next("check"))
            .state(State::choice("check", vec![rule]).with_default("done"))
            .state(State::succeed("done"))
            .build();
        assert!(machine.is_ok());
    }
}
