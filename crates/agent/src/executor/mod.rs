//! Agent workflow executor (spec §4.3): executes a declarative step
//! graph with bounded concurrency, retries, conditionals, hooks, and
//! clean cancellation.

mod runner;
pub mod steps;

pub use runner::{JobSnapshot, ReportSink, WorkflowExecutor};
