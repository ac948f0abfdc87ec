//! Prompt Analyzer, Task Decomposer, and DAG Planner (spec.md §4.H).

mod analyzer;
mod decomposer;
mod planner;

pub use analyzer::Analyzer;
pub use decomposer::{Decomposer, HEURISTIC_COMPLEXITY_THRESHOLD, HEURISTIC_SUBTASK_THRESHOLD};
pub use planner::Planner;
