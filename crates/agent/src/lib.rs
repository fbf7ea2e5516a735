//! The cliz agent loop.
//!
//! One user turn runs as an explicit state machine:
//!
//! 1. **AwaitingUserInput**: the instruction is appended to the session
//! 2. **Reasoning**: the model sees the history view and the tool catalog
//! 3. **Acting**: each requested call is recorded, gated, run (or denied),
//!    and its result appended, then back to Reasoning
//! 4. **Responding**: the final answer is appended and returned
//!
//! The loop ends on a final answer, on cancellation, on a model failure, or
//! when the iteration bound is reached.

pub mod loop_runner;

pub use loop_runner::{AgentLoop, DEFAULT_MAX_ITERATIONS};
