//! Task Decomposer (spec.md §4.H).
//!
//! Below the complexity/subtask threshold, decomposition is a fixed
//! heuristic chain. Above it, one provider call is asked to propose the
//! task graph; a defensive parse falls back to the heuristic on anything
//! that doesn't look like the expected shape rather than propagating the
//! failure.

use std::collections::BTreeSet;

use serde::Deserialize;

use cortexos_providers::{ChatMessage, Provider, ProviderRequest};
use cortexos_types::{AgentRole, DecomposedTask, Intent, PromptAnalysis, TaskId};

/// Below this complexity (or subtask estimate), decomposition skips the
/// provider call entirely and falls back straight to the heuristic chain.
pub const HEURISTIC_COMPLEXITY_THRESHOLD: f64 = 0.3;
pub const HEURISTIC_SUBTASK_THRESHOLD: u8 = 1;

const DEFAULT_PRIORITY: u8 = 5;

pub struct Decomposer;

impl Decomposer {
    /// Chooses heuristic or LLM-driven decomposition based on the
    /// analysis, calling `provider` only in the latter case.
    pub async fn decompose(
        analysis: &PromptAnalysis,
        provider: &dyn Provider,
        model: &str,
    ) -> Vec<DecomposedTask> {
        if analysis.complexity < HEURISTIC_COMPLEXITY_THRESHOLD
            || analysis.estimated_subtasks <= HEURISTIC_SUBTASK_THRESHOLD
        {
            return Self::heuristic(analysis);
        }

        match Self::llm_driven(analysis, provider, model).await {
            Some(tasks) if !tasks.is_empty() => tasks,
            _ => Self::heuristic(analysis),
        }
    }

    /// Linear chain: optional research -> optional design -> implement ->
    /// optional test -> validate. Each stage depends on the one before it.
    pub fn heuristic(analysis: &PromptAnalysis) -> Vec<DecomposedTask> {
        let mut tasks = Vec::new();
        let mut previous: Option<TaskId> = None;

        let wants_research = analysis.intent == Intent::Analyze || analysis.complexity > 0.6;
        let wants_design = analysis.intent == Intent::Create && analysis.complexity > 0.5;
        let wants_test = !matches!(analysis.intent, Intent::Document | Intent::Analyze);

        if wants_research {
            previous = Some(push_stage(
                &mut tasks,
                "Research",
                "Investigate the request and gather the context needed to implement it.",
                AgentRole::Researcher,
                previous,
                analysis,
            ));
        }

        if wants_design {
            previous = Some(push_stage(
                &mut tasks,
                "Design",
                "Sketch the approach and interfaces before implementation begins.",
                AgentRole::Designer,
                previous,
                analysis,
            ));
        }

        previous = Some(push_stage(
            &mut tasks,
            "Implement",
            &analysis.original_text,
            AgentRole::Developer,
            previous,
            analysis,
        ));

        if wants_test {
            previous = Some(push_stage(
                &mut tasks,
                "Test",
                "Write or update tests covering the change.",
                AgentRole::Tester,
                previous,
                analysis,
            ));
        }

        push_stage(
            &mut tasks,
            "Validate",
            "Review the result against the original request.",
            AgentRole::Validator,
            previous,
            analysis,
        );

        tasks
    }

    async fn llm_driven(
        analysis: &PromptAnalysis,
        provider: &dyn Provider,
        model: &str,
    ) -> Option<Vec<DecomposedTask>> {
        let prompt = format!(
            "Break the following request into a JSON array of tasks. Each item must have \
             \"title\", \"description\", \"role\" (one of researcher, designer, developer, \
             tester, reviewer, documenter, validator), \"priority\" (1-10), \"complexity\" \
             (0.0-1.0) and \"depends_on\" (array of zero-based indices into this same array, \
             referring only to earlier items). Respond with only the JSON array.\n\n\
             Request: {}\nIntent: {:?}\nEstimated subtasks: {}",
            analysis.original_text, analysis.intent, analysis.estimated_subtasks
        );

        let request = ProviderRequest {
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            model: model.to_string(),
            max_tokens: 2048,
            temperature: 0.2,
            tools: None,
        };

        let response = provider.complete(request).await.ok()?;
        let json_slice = extract_json_array(&response.content)?;
        let raw: Vec<RawTask> = serde_json::from_str(json_slice).ok()?;
        if raw.is_empty() {
            return None;
        }

        let ids: Vec<TaskId> = raw.iter().map(|_| TaskId::new()).collect();
        let mut tasks = Vec::with_capacity(raw.len());
        for (index, item) in raw.into_iter().enumerate() {
            let role = parse_role(&item.role)?;
            let dependencies: BTreeSet<TaskId> = item
                .depends_on
                .iter()
                .filter(|&&dep_index| dep_index < index)
                .filter_map(|&dep_index| ids.get(dep_index).copied())
                .collect();

            tasks.push(DecomposedTask {
                id: ids[index],
                title: item.title,
                description: item.description,
                role,
                dependencies,
                priority: DecomposedTask::clamp_priority(item.priority),
                estimated_complexity: DecomposedTask::clamp_complexity(item.complexity),
                required_tools: Vec::new(),
                context: analysis.original_text.clone(),
            });
        }
        Some(tasks)
    }
}

#[derive(Debug, Deserialize)]
struct RawTask {
    title: String,
    description: String,
    role: String,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default)]
    complexity: f64,
    #[serde(default)]
    depends_on: Vec<usize>,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY as i32
}

fn parse_role(raw: &str) -> Option<AgentRole> {
    match raw.to_ascii_lowercase().as_str() {
        "researcher" => Some(AgentRole::Researcher),
        "designer" => Some(AgentRole::Designer),
        "developer" => Some(AgentRole::Developer),
        "tester" => Some(AgentRole::Tester),
        "reviewer" => Some(AgentRole::Reviewer),
        "documenter" => Some(AgentRole::Documenter),
        "validator" => Some(AgentRole::Validator),
        _ => None,
    }
}

fn push_stage(
    tasks: &mut Vec<DecomposedTask>,
    title: &str,
    description: &str,
    role: AgentRole,
    dependency: Option<TaskId>,
    analysis: &PromptAnalysis,
) -> TaskId {
    let id = TaskId::new();
    let dependencies = dependency.into_iter().collect();
    tasks.push(DecomposedTask {
        id,
        title: title.to_string(),
        description: description.to_string(),
        role,
        dependencies,
        priority: DEFAULT_PRIORITY,
        estimated_complexity: analysis.complexity,
        required_tools: Vec::new(),
        context: analysis.original_text.clone(),
    });
    id
}

/// Scans for the first balanced top-level `[...]` in `text`, tolerating
/// surrounding prose (an LLM rarely replies with *only* JSON), and
/// correctly skips brackets that appear inside string literals.
fn extract_json_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexos_providers::EchoProvider;
    use std::collections::BTreeSet as Set;

    fn analysis(text: &str, complexity: f64, intent: Intent, subtasks: u8) -> PromptAnalysis {
        PromptAnalysis {
            original_text: text.to_string(),
            complexity,
            intent,
            domain_tags: Set::new(),
            estimated_subtasks: subtasks,
            detected_languages: Set::new(),
            entities: Set::new(),
            suggested_roles: vec![AgentRole::Developer],
        }
    }

    #[test]
    fn heuristic_chain_is_linear() {
        let analysis = analysis("fix the bug", 0.2, Intent::Fix, 1);
        let tasks = Decomposer::heuristic(&analysis);
        assert!(tasks.len() >= 2);
        for window in tasks.windows(2) {
            assert!(window[1].dependencies.contains(&window[0].id));
        }
    }

    #[test]
    fn heuristic_skips_test_stage_for_documentation_requests() {
        let analysis = analysis("document the api", 0.2, Intent::Document, 1);
        let tasks = Decomposer::heuristic(&analysis);
        assert!(tasks.iter().all(|t| t.role != AgentRole::Tester));
    }

    #[tokio::test]
    async fn low_complexity_never_calls_the_provider() {
        let analysis = analysis("fix typo", 0.1, Intent::Fix, 1);
        let provider = EchoProvider::new("unused");
        let tasks = Decomposer::decompose(&analysis, &provider, "echo-model").await;
        assert!(!tasks.is_empty());
    }

    #[test]
    fn json_array_is_extracted_from_surrounding_prose() {
        let text = "Sure, here is the plan:\n[{\"a\": 1}, {\"a\": \"]\"}]\nHope that helps.";
        let extracted = extract_json_array(text).unwrap();
        assert_eq!(extracted, "[{\"a\": 1}, {\"a\": \"]\"}]");
    }
}
