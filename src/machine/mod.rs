//! The workflow graph model: states, their wiring, and the validated
//! machine the compiler and simulator consume.

mod graph;
mod state;

pub use graph::{MachineBuilder, StateMachine};
pub use state::{
    Catcher, MAX_RETRY_DELAY_SECONDS, MAX_STATE_NAME_LENGTH, ResultPath, Retrier, State,
    StateKind, Transition, WaitTrigger,
};
