use tokio::process::Command;

use cortexos_types::QualityContext;

/// Literal debugger-statement markers removed verbatim, independent of
/// language (spec.md §4.D).
const DEBUGGER_MARKERS: &[&str] = &["debugger;", "console.trace(", "dbg!("];

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoFixOutcome {
    pub lint_fix_invoked: bool,
    pub lint_fix_succeeded: bool,
    pub debugger_lines_removed: usize,
}

/// Replays lint-rule-attributed issues through the linter's own `--fix`,
/// then strips debugger-statement lines directly.
pub struct AutoFixer {
    lint_fix_binary: String,
    lint_fix_args: Vec<String>,
}

impl AutoFixer {
    pub fn new(lint_fix_binary: impl Into<String>, lint_fix_args: Vec<String>) -> Self {
        Self {
            lint_fix_binary: lint_fix_binary.into(),
            lint_fix_args,
        }
    }

    pub fn cargo_clippy_fix() -> Self {
        Self::new(
            "cargo",
            vec!["clippy".to_string(), "--fix".to_string(), "--allow-dirty".to_string()],
        )
    }

    pub async fn run(
        &self,
        has_lint_issues: bool,
        ctx: &QualityContext,
    ) -> anyhow::Result<AutoFixOutcome> {
        let mut outcome = AutoFixOutcome::default();

        if has_lint_issues {
            outcome.lint_fix_invoked = true;
            let status = Command::new(&self.lint_fix_binary)
                .args(&self.lint_fix_args)
                .current_dir(&ctx.working_dir)
                .status()
                .await?;
            outcome.lint_fix_succeeded = status.success();
        }

        for file in &ctx.files_changed {
            let full_path = ctx.working_dir.join(file);
            let Ok(content) = tokio::fs::read_to_string(&full_path).await else {
                continue;
            };
            let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
            let mut flagged: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| DEBUGGER_MARKERS.iter().any(|m| line.contains(m)))
                .map(|(idx, _)| idx)
                .collect();
            if flagged.is_empty() {
                continue;
            }
            // P8: delete highest-to-lowest so earlier indices stay valid.
            flagged.sort_unstable_by(|a, b| b.cmp(a));
            for idx in &flagged {
                lines.remove(*idx);
            }
            outcome.debugger_lines_removed += flagged.len();
            let mut rewritten = lines.join("\n");
            if content.ends_with('\n') {
                rewritten.push('\n');
            }
            tokio::fs::write(&full_path, rewritten).await?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn removes_debugger_marker_lines_highest_to_lowest() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("app.js");
        tokio::fs::write(
            &file_path,
            "function f() {\n  debugger;\n  return 1;\n  console.trace(\"x\");\n}\n",
        )
        .await
        .unwrap();
        let ctx = QualityContext {
            working_dir: dir.path().to_path_buf(),
            files_changed: vec![PathBuf::from("app.js")],
            execution_id: "exec-1".to_string(),
        };
        let fixer = AutoFixer::cargo_clippy_fix();
        let outcome = fixer.run(false, &ctx).await.unwrap();
        assert_eq!(outcome.debugger_lines_removed, 2);
        let content = tokio::fs::read_to_string(&file_path).await.unwrap();
        assert!(!content.contains("debugger;"));
        assert!(!content.contains("console.trace"));
        assert!(content.contains("return 1;"));
    }

    #[tokio::test]
    async fn leaves_files_without_markers_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("clean.rs");
        tokio::fs::write(&file_path, "fn main() {}\n").await.unwrap();
        let ctx = QualityContext {
            working_dir: dir.path().to_path_buf(),
            files_changed: vec![PathBuf::from("clean.rs")],
            execution_id: "exec-1".to_string(),
        };
        let outcome = AutoFixer::cargo_clippy_fix().run(false, &ctx).await.unwrap();
        assert_eq!(outcome.debugger_lines_removed, 0);
    }
}
