//! Declarative workflow graphs with an Amazon States Language compiler and
//! a local simulator.
//!
//! Build a [`StateMachine`] from typed states, compile it to an ASL JSON
//! document with [`compile::compile`], or run it locally with a
//! [`Simulator`] and a [`MockRegistry`] of task mocks:
//!
//! ```no_run
//! use serde_json::json;
//! use stateflow::{MockRegistry, Simulator, State, StateMachine};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let machine = StateMachine::builder()
//!     .start_at("double")
//!     .state(State::task("double", "arn:fake:double").end())
//!     .build()?;
//!
//! let mut mocks = MockRegistry::new();
//! mocks.register("arn:fake:double", |input| {
//!     Ok(json!(input.as_i64().unwrap_or(0) * 2))
//! });
//!
//! let run = Simulator::new(mocks).run(&machine, json!(21)).await;
//! assert_eq!(run.result?, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod choice;
pub mod compile;
pub mod engine;
pub mod error;
pub mod machine;
pub mod mock;
pub mod path;
pub mod trace;

pub use choice::{ChoiceRule, DataTest};
pub use engine::{SimulationRun, Simulator};
pub use error::{BuildError, ErrorKind, PathError, SimulationError};
pub use machine::{
    Catcher, MachineBuilder, ResultPath, Retrier, State, StateKind, StateMachine, Transition,
    WaitTrigger,
};
pub use mock::{MockFn, MockRegistry, TaskError};
pub use path::JsonPath;
pub use trace::{ExecutionRecord, ExecutionTrace};
