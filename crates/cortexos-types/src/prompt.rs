use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// User-facing intent of a request, ordered so the analyzer can match the
/// most specific pattern first (fix before modify, test before analyze).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Create,
    Modify,
    Fix,
    Refactor,
    Test,
    Document,
    Analyze,
    Optimize,
    Deploy,
    Unknown,
}

/// Role a task or agent is specialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Researcher,
    Designer,
    Developer,
    Tester,
    Reviewer,
    Documenter,
    Validator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 7] = [
        AgentRole::Researcher,
        AgentRole::Designer,
        AgentRole::Developer,
        AgentRole::Tester,
        AgentRole::Reviewer,
        AgentRole::Documenter,
        AgentRole::Validator,
    ];
}

/// Immutable record of what the analyzer extracted from a raw prompt.
///
/// Produced once per request; nothing downstream mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptAnalysis {
    pub original_text: String,
    pub complexity: f64,
    pub intent: Intent,
    pub domain_tags: BTreeSet<String>,
    pub estimated_subtasks: u8,
    pub detected_languages: BTreeSet<String>,
    pub entities: BTreeSet<String>,
    pub suggested_roles: Vec<AgentRole>,
}

impl PromptAnalysis {
    pub const MIN_COMPLEXITY: f64 = 0.1;
    pub const MAX_COMPLEXITY: f64 = 1.0;
}
