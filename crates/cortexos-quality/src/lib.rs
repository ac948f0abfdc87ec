//! Quality Gates & Auto-fixer (spec.md §4.D).

mod autofix;
mod gates;

pub use autofix::{AutoFixOutcome, AutoFixer};
pub use gates::{ComplexityGate, LintGate, SecurityGate, TestGate, TypeCheckGate};

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use cortexos_types::{GateResult, QualityContext};

#[async_trait]
pub trait Gate: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &QualityContext) -> GateResult;
}

/// Runs a configured gate pipeline in order. A gate is only allowed to
/// stop the pipeline early if its name is listed in `fatal_gates`
/// (default: empty, so every gate always runs and all issues surface
/// together).
pub struct QualityVerifier {
    gates: Vec<Arc<dyn Gate>>,
    fatal_gates: HashSet<String>,
}

impl QualityVerifier {
    pub fn new(gates: Vec<Arc<dyn Gate>>) -> Self {
        Self {
            gates,
            fatal_gates: HashSet::new(),
        }
    }

    pub fn with_fatal_gates(mut self, fatal: impl IntoIterator<Item = String>) -> Self {
        self.fatal_gates = fatal.into_iter().collect();
        self
    }

    pub async fn run_all(&self, ctx: &QualityContext) -> Vec<GateResult> {
        let mut results = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let result = gate.run(ctx).await;
            let should_stop = !result.passed && self.fatal_gates.contains(gate.name());
            results.push(result);
            if should_stop {
                break;
            }
        }
        results
    }
}

pub fn all_passed(results: &[GateResult]) -> bool {
    results.iter().all(|r| r.passed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortexos_types::{GateIssue, Severity};
    use std::time::Duration;

    struct AlwaysFails(&'static str);

    #[async_trait]
    impl Gate for AlwaysFails {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(&self, _ctx: &QualityContext) -> GateResult {
            GateResult::from_issues(
                self.0,
                vec![GateIssue {
                    severity: Severity::Error,
                    message: "boom".to_string(),
                    file: None,
                    line: None,
                    column: None,
                    rule: None,
                    auto_fixable: false,
                    suggestion: None,
                }],
                Duration::from_millis(1),
            )
        }
    }

    struct AlwaysPasses(&'static str);

    #[async_trait]
    impl Gate for AlwaysPasses {
        fn name(&self) -> &str {
            self.0
        }
        async fn run(&self, _ctx: &QualityContext) -> GateResult {
            GateResult::from_issues(self.0, vec![], Duration::from_millis(1))
        }
    }

    fn ctx() -> QualityContext {
        QualityContext {
            working_dir: std::path::PathBuf::from("."),
            files_changed: vec![],
            execution_id: "exec-1".to_string(),
        }
    }

    #[tokio::test]
    async fn non_fatal_failure_does_not_stop_the_pipeline() {
        let verifier = QualityVerifier::new(vec![
            Arc::new(AlwaysFails("gate-a")),
            Arc::new(AlwaysPasses("gate-b")),
        ]);
        let results = verifier.run_all(&ctx()).await;
        assert_eq!(results.len(), 2);
        assert!(!all_passed(&results));
    }

    #[tokio::test]
    async fn fatal_failure_stops_the_pipeline() {
        let verifier = QualityVerifier::new(vec![
            Arc::new(AlwaysFails("gate-a")),
            Arc::new(AlwaysPasses("gate-b")),
        ])
        .with_fatal_gates(["gate-a".to_string()]);
        let results = verifier.run_all(&ctx()).await;
        assert_eq!(results.len(), 1);
    }
}
