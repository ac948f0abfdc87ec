use std::path::Path;

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use serde_json::{json, Value};
use tokio::fs;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use cortexos_types::{FileChange, FileChangeKind, ToolContext, ToolResult, ToolSchema};

use crate::Tool;

/// Literal substrings that cause a shell invocation to be refused before
/// `tokio::process::Command` is ever spawned (spec.md §4.C).
const DENY_SUBSTRINGS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    ":(){",
    ":(){:|:&};:",
    "mkfs",
    "dd if=/dev/zero",
    "> /dev/sda",
];

fn deny_reason(command: &str) -> Option<&'static str> {
    DENY_SUBSTRINGS
        .iter()
        .find(|needle| command.contains(*needle))
        .copied()
}

fn denied_result() -> ToolResult {
    ToolResult {
        success: false,
        output: String::new(),
        error: Some("refused: dangerous command".to_string()),
        metadata: None,
    }
}

fn path_allowed(ctx: &ToolContext, relative: &str) -> Option<std::path::PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute() {
        return None;
    }
    if candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return None;
    }
    Some(ctx.working_dir.join(candidate))
}

fn denied_path_result(path: &str) -> ToolResult {
    ToolResult {
        success: false,
        output: String::new(),
        error: Some(format!("path denied by sandbox policy: {path}")),
        metadata: None,
    }
}

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "bash".to_string(),
            description: "Run a shell command in the task's working directory".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        self.execute_with_cancel(args, ctx, CancellationToken::new())
            .await
    }

    async fn execute_with_cancel(
        &self,
        args: Value,
        ctx: &ToolContext,
        cancel: CancellationToken,
    ) -> anyhow::Result<ToolResult> {
        let command = args["command"].as_str().unwrap_or("");
        if let Some(reason) = deny_reason(command) {
            tracing::warn!(reason, "refused shell command");
            return Ok(denied_result());
        }

        let mut shell = Command::new(if cfg!(windows) { "powershell" } else { "bash" });
        if cfg!(windows) {
            shell.args(["-NoProfile", "-Command", command]);
        } else {
            shell.args(["-lc", command]);
        }
        shell.current_dir(&ctx.working_dir);

        let mut child = shell.spawn()?;
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Ok(ToolResult {
                    success: false,
                    output: String::new(),
                    error: Some("cancelled".to_string()),
                    metadata: None,
                });
            }
            result = child.wait_with_output() => result?,
        };

        Ok(ToolResult {
            success: output.status.success(),
            output: String::from_utf8_lossy(&output.stdout).to_string(),
            error: (!output.status.success())
                .then(|| String::from_utf8_lossy(&output.stderr).to_string()),
            metadata: Some(json!({"exit_code": output.status.code()})),
        })
    }
}

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read".to_string(),
            description: "Read file contents".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let path = args["path"].as_str().unwrap_or("");
        let Some(resolved) = path_allowed(ctx, path) else {
            return Ok(denied_path_result(path));
        };
        let content = fs::read_to_string(&resolved).await?;
        Ok(ToolResult {
            success: true,
            output: content,
            error: None,
            metadata: None,
        })
    }
}

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write".to_string(),
            description: "Write file contents, creating parent directories as needed"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"},
                },
                "required": ["path", "content"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let path = args["path"].as_str().unwrap_or("");
        let content = args["content"].as_str().unwrap_or("");
        let Some(resolved) = path_allowed(ctx, path) else {
            return Ok(denied_path_result(path));
        };
        let kind = if resolved.exists() {
            FileChangeKind::Modify
        } else {
            FileChangeKind::Create
        };
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&resolved, content).await?;
        let file_change = FileChange {
            path: resolved,
            kind,
            content: Some(content.to_string()),
        };
        Ok(ToolResult {
            success: true,
            output: format!("wrote {} bytes to {path}", content.len()),
            error: None,
            metadata: Some(json!({"file_change": file_change})),
        })
    }
}

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "edit".to_string(),
            description: "Replace the first occurrence of old_string with new_string"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old_string": {"type": "string"},
                    "new_string": {"type": "string"},
                },
                "required": ["path", "old_string", "new_string"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let path = args["path"].as_str().unwrap_or("");
        let old = args["old_string"].as_str().unwrap_or("");
        let new = args["new_string"].as_str().unwrap_or("");
        let Some(resolved) = path_allowed(ctx, path) else {
            return Ok(denied_path_result(path));
        };
        let content = fs::read_to_string(&resolved).await?;
        let Some(pos) = content.find(old) else {
            return Ok(ToolResult {
                success: false,
                output: String::new(),
                error: Some("old_string not found in file".to_string()),
                metadata: None,
            });
        };
        let mut updated = String::with_capacity(content.len());
        updated.push_str(&content[..pos]);
        updated.push_str(new);
        updated.push_str(&content[pos + old.len()..]);
        fs::write(&resolved, &updated).await?;
        let file_change = FileChange {
            path: resolved,
            kind: FileChangeKind::Modify,
            content: Some(updated),
        };
        Ok(ToolResult {
            success: true,
            output: "ok".to_string(),
            error: None,
            metadata: Some(json!({"file_change": file_change})),
        })
    }
}

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "glob".to_string(),
            description: "Find files matching a glob pattern rooted at the working directory"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"pattern": {"type": "string"}},
                "required": ["pattern"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let pattern = args["pattern"].as_str().unwrap_or("*");
        if pattern.contains("..") {
            return Ok(denied_path_result(pattern));
        }
        let full_pattern = ctx.working_dir.join(pattern);
        let mut files = Vec::new();
        for entry in (glob::glob(&full_pattern.to_string_lossy())?).flatten() {
            files.push(entry.display().to_string());
            if files.len() >= 200 {
                break;
            }
        }
        Ok(ToolResult {
            success: true,
            output: files.join("\n"),
            error: None,
            metadata: Some(json!({"count": files.len()})),
        })
    }
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "grep".to_string(),
            description: "Regex search across files under the working directory".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "path": {"type": "string"},
                },
                "required": ["pattern"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let pattern = args["pattern"].as_str().unwrap_or("");
        let relative_root = args["path"].as_str().unwrap_or(".");
        let Some(root) = path_allowed(ctx, relative_root) else {
            return Ok(denied_path_result(relative_root));
        };
        let regex = Regex::new(pattern)?;
        let mut hits = Vec::new();
        for entry in WalkBuilder::new(&root).build().flatten() {
            if hits.len() >= 200 {
                break;
            }
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let Ok(content) = fs::read_to_string(path).await else {
                continue;
            };
            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    hits.push(format!("{}:{}:{}", path.display(), idx + 1, line));
                    if hits.len() >= 200 {
                        break;
                    }
                }
            }
        }
        Ok(ToolResult {
            success: true,
            output: hits.join("\n"),
            error: None,
            metadata: Some(json!({"count": hits.len()})),
        })
    }
}

pub struct GitTool;

#[async_trait]
impl Tool for GitTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "git".to_string(),
            description: "Run a read-oriented git subcommand in the working directory"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "args": {"type": "array", "items": {"type": "string"}},
                },
                "required": ["args"],
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let git_args: Vec<String> = args["args"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if git_args.is_empty() {
            return Ok(ToolResult {
                success: false,
                output: String::new(),
                error: Some("git tool requires at least one argument".to_string()),
                metadata: None,
            });
        }
        let joined = git_args.join(" ");
        if let Some(reason) = deny_reason(&joined) {
            tracing::warn!(reason, "refused git invocation");
            return Ok(denied_result());
        }

        let output = Command::new("git")
            .args(&git_args)
            .current_dir(&ctx.working_dir)
            .output()
            .await?;

        Ok(ToolResult {
            success: output.status.success(),
            output: String::from_utf8_lossy(&output.stdout).to_string(),
            error: (!output.status.success())
                .then(|| String::from_utf8_lossy(&output.stderr).to_string()),
            metadata: Some(json!({"exit_code": output.status.code()})),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx_for(dir: &std::path::Path) -> ToolContext {
        ToolContext {
            working_dir: dir.to_path_buf(),
            execution_id: "exec-test".to_string(),
        }
    }

    #[tokio::test]
    async fn bash_refuses_fork_bomb() {
        let dir = tempdir().unwrap();
        let result = BashTool
            .execute(json!({"command": ":(){:|:&};:"}), &ctx_for(dir.path()))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("refused: dangerous command"));
    }

    #[tokio::test]
    async fn read_rejects_absolute_paths() {
        let dir = tempdir().unwrap();
        let result = ReadTool
            .execute(json!({"path": "/etc/passwd"}), &ctx_for(dir.path()))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn read_rejects_parent_dir_escape() {
        let dir = tempdir().unwrap();
        let result = ReadTool
            .execute(json!({"path": "../secret.txt"}), &ctx_for(dir.path()))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let ctx = ctx_for(dir.path());
        WriteTool
            .execute(json!({"path": "out.txt", "content": "hello"}), &ctx)
            .await
            .unwrap();
        let result = ReadTool
            .execute(json!({"path": "out.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn edit_replaces_first_occurrence() {
        let dir = tempdir().unwrap();
        let ctx = ctx_for(dir.path());
        WriteTool
            .execute(json!({"path": "f.txt", "content": "foo bar foo"}), &ctx)
            .await
            .unwrap();
        let result = EditTool
            .execute(
                json!({"path": "f.txt", "old_string": "foo", "new_string": "baz"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(result.success);
        let after = ReadTool.execute(json!({"path": "f.txt"}), &ctx).await.unwrap();
        assert_eq!(after.output, "baz bar foo");
    }

    #[tokio::test]
    async fn edit_reports_failure_when_old_string_absent() {
        let dir = tempdir().unwrap();
        let ctx = ctx_for(dir.path());
        WriteTool
            .execute(json!({"path": "f.txt", "content": "content"}), &ctx)
            .await
            .unwrap();
        let result = EditTool
            .execute(
                json!({"path": "f.txt", "old_string": "missing", "new_string": "x"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.success);
    }
}
