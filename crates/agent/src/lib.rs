//! The tool-use conversation engine.
//!
//! One [`Orchestrator::run`] drives a **Send → Stream → Decide** cycle:
//!
//! 1. **Build** the request once: history, tool specs, response format and
//!    any attachments of the trailing user message
//! 2. **Send** it to the provider and stream the answer back
//! 3. **Decide**: if the model called tools, run them, append the results and
//!    go back to step 2
//!
//! The loop ends when the model answers without tool calls, when tool calls
//! are left for the caller, or when the provider-call budget is spent.

pub mod loop_runner;

pub use loop_runner::{Orchestrator, RunOptions, RunOutcome, StructuredOutput};
