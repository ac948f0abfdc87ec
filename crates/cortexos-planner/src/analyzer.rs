//! Prompt Analyzer (spec.md §4.H).

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use cortexos_types::{AgentRole, Intent, PromptAnalysis};

static ACTION_VERBS: &[&str] = &[
    "add", "fix", "implement", "create", "refactor", "remove", "update", "build", "write",
    "test", "optimize", "migrate", "debug", "resolve", "design", "configure",
];

static CONJUNCTIONS: &[&str] = &["and", "then", "also", "additionally", "plus"];

static TECH_TERMS: &[&str] = &[
    "api", "database", "authentication", "endpoint", "schema", "migration", "docker",
    "kubernetes", "async", "thread", "mutex", "websocket", "graphql", "cache", "queue",
    "index", "token", "session", "encryption",
];

static LANGUAGES: &[&str] = &[
    "rust", "python", "javascript", "typescript", "go", "java", "ruby", "c++", "c#", "kotlin",
    "swift",
];

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).unwrap());
static CAMEL_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-zA-Z0-9]*[a-z][A-Za-z0-9]*\b").unwrap());
static PATH_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[\w\-./]+/[\w\-./]+|\b[\w\-]+\.[A-Za-z0-9]{1,6}\b").unwrap());

/// Turns a raw natural-language request into a [`PromptAnalysis`].
///
/// Every signal here is a cheap regex/keyword count, not a model call --
/// the analyzer runs before any provider is selected.
pub struct Analyzer;

impl Analyzer {
    pub fn analyze(text: &str) -> PromptAnalysis {
        let lower = text.to_ascii_lowercase();

        let complexity = Self::complexity(&lower);
        let intent = Self::intent(&lower);
        let domain_tags = Self::domain_tags(&lower);
        let detected_languages = Self::detected_languages(&lower);
        let entities = Self::entities(text);
        let estimated_subtasks = (1.0 + complexity * 9.0).round().clamp(1.0, 10.0) as u8;
        let suggested_roles = Self::suggested_roles(intent, complexity);

        PromptAnalysis {
            original_text: text.to_string(),
            complexity,
            intent,
            domain_tags,
            estimated_subtasks,
            detected_languages,
            entities,
            suggested_roles,
        }
    }

    fn complexity(lower: &str) -> f64 {
        let word_count = lower.split_whitespace().count();
        let length_band = if word_count < 10 {
            0.1
        } else if word_count < 30 {
            0.4
        } else if word_count < 80 {
            0.7
        } else {
            1.0
        };

        let action_count = count_keyword_hits(lower, ACTION_VERBS);
        let conjunction_count = count_keyword_hits(lower, CONJUNCTIONS);
        let file_ref_count = PATH_LIKE.find_iter(lower).count();
        let tech_count = count_keyword_hits(lower, TECH_TERMS);

        let score = 0.25 * length_band
            + 0.2 * normalize(action_count, 3)
            + 0.15 * normalize(conjunction_count, 3)
            + 0.2 * normalize(file_ref_count, 3)
            + 0.2 * normalize(tech_count, 3);

        score.clamp(PromptAnalysis::MIN_COMPLEXITY, PromptAnalysis::MAX_COMPLEXITY)
    }

    /// Ordered so the most specific intent wins: fix before modify, test
    /// before analyze (spec.md §4.H).
    fn intent(lower: &str) -> Intent {
        const PATTERNS: &[(Intent, &[&str])] = &[
            (Intent::Fix, &["fix", "bug", "broken", "crash", " fail"]),
            (Intent::Test, &["test", "spec coverage", " coverage"]),
            (Intent::Refactor, &["refactor", "restructure", "reorganize", "clean up"]),
            (Intent::Document, &["document", "docs", "write comments"]),
            (Intent::Optimize, &["optimize", "optimise", "performance", "speed up", "faster"]),
            (Intent::Deploy, &["deploy", "release", "publish", "ship"]),
            (Intent::Create, &["create", "add ", "new ", "build", "implement", "scaffold"]),
            (Intent::Modify, &["modify", "change", "update", "edit", "alter"]),
            (Intent::Analyze, &["analyze", "analyse", "investigate", "explain", "understand", "review"]),
        ];
        for (intent, needles) in PATTERNS {
            if needles.iter().any(|n| lower.contains(n)) {
                return *intent;
            }
        }
        Intent::Unknown
    }

    fn domain_tags(lower: &str) -> BTreeSet<String> {
        TECH_TERMS
            .iter()
            .filter(|term| lower.contains(*term))
            .map(|term| term.to_string())
            .collect()
    }

    fn detected_languages(lower: &str) -> BTreeSet<String> {
        LANGUAGES
            .iter()
            .filter(|lang| lower.contains(*lang))
            .map(|lang| lang.to_string())
            .collect()
    }

    fn entities(text: &str) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();
        for cap in QUOTED.captures_iter(text) {
            if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
                entities.insert(m.as_str().to_string());
            }
        }
        for m in CAMEL_CASE.find_iter(text) {
            entities.insert(m.as_str().to_string());
        }
        for m in PATH_LIKE.find_iter(text) {
            entities.insert(m.as_str().to_string());
        }
        entities
    }

    fn suggested_roles(intent: Intent, complexity: f64) -> Vec<AgentRole> {
        let mut roles = match intent {
            Intent::Fix => vec![AgentRole::Developer, AgentRole::Tester],
            Intent::Test => vec![AgentRole::Tester],
            Intent::Document => vec![AgentRole::Documenter],
            Intent::Analyze => vec![AgentRole::Researcher, AgentRole::Reviewer],
            Intent::Deploy => vec![AgentRole::Developer, AgentRole::Validator],
            Intent::Refactor | Intent::Optimize => vec![AgentRole::Developer, AgentRole::Reviewer],
            Intent::Create | Intent::Modify | Intent::Unknown => vec![AgentRole::Developer],
        };
        if complexity > 0.6 && !roles.contains(&AgentRole::Researcher) {
            roles.insert(0, AgentRole::Researcher);
        }
        if complexity > 0.5 && matches!(intent, Intent::Create) && !roles.contains(&AgentRole::Designer) {
            roles.insert(roles.len().saturating_sub(1), AgentRole::Designer);
        }
        roles.push(AgentRole::Validator);
        roles.dedup();
        roles
    }
}

fn count_keyword_hits(lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|kw| lower.contains(*kw)).count()
}

fn normalize(count: usize, scale: usize) -> f64 {
    (count as f64 / scale as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prompt_gets_floor_complexity() {
        let analysis = Analyzer::analyze("fix typo");
        assert!(analysis.complexity >= PromptAnalysis::MIN_COMPLEXITY);
        assert!(analysis.complexity < 0.5);
    }

    #[test]
    fn long_multi_clause_prompt_scores_higher_than_short_one() {
        let short = Analyzer::analyze("fix the bug");
        let long = Analyzer::analyze(
            "Add a new authentication endpoint to the API and then update the database \
             schema, and also implement a caching layer for the session tokens, and write \
             tests for the websocket handler in src/auth/mod.rs and docker/Dockerfile",
        );
        assert!(long.complexity > short.complexity);
    }

    #[test]
    fn fix_wins_over_modify_when_both_present() {
        let analysis = Analyzer::analyze("modify the login flow to fix the broken redirect");
        assert_eq!(analysis.intent, Intent::Fix);
    }

    #[test]
    fn test_wins_over_analyze_when_both_present() {
        let analysis = Analyzer::analyze("analyze the coverage report and test the parser");
        assert_eq!(analysis.intent, Intent::Test);
    }

    #[test]
    fn quoted_and_camel_case_entities_are_captured() {
        let analysis = Analyzer::analyze("rename the `UserAccount` struct referenced in \"config.toml\"");
        assert!(analysis.entities.contains("UserAccount"));
        assert!(analysis.entities.contains("config.toml"));
    }
}
