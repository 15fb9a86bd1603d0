//! Regex search over project files.

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::tool::{Tool, ToolContext, ToolOutput};
use holdfast_security::{display_relative, validate_path};
use regex::{Regex, RegexBuilder};
use serde_json::json;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", "dist", "build", "__pycache__"];

pub struct GrepSearchTool {
    max_results: usize,
    max_file_bytes: u64,
}

impl GrepSearchTool {
    pub fn new(max_results: usize, max_file_bytes: u64) -> Self {
        Self {
            max_results,
            max_file_bytes,
        }
    }
}

impl Default for GrepSearchTool {
    fn default() -> Self {
        Self::new(200, 1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hit {
    path: String,
    line: usize,
    text: String,
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search project files with a regular expression. Returns matching lines \
         as path:line: text. Build output and VCS directories are skipped."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory or file to search, relative to the project root"
                },
                "include": {
                    "type": "string",
                    "description": "Only search files matching this pattern, e.g. *.rs"
                },
                "case_insensitive": {
                    "type": "boolean",
                    "description": "Ignore case when matching"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let pattern = arguments["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'pattern' argument".into()))?;
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(arguments["case_insensitive"].as_bool().unwrap_or(false))
            .build()
            .map_err(|e| ToolError::InvalidArguments(format!("invalid pattern: {e}")))?;

        let start = match arguments["path"].as_str() {
            Some(p) if !p.trim().is_empty() => validate_path(p, &ctx.project_root)?,
            _ => ctx.project_root.clone(),
        };
        let include = arguments["include"].as_str().map(str::to_string);

        let root = ctx.project_root.clone();
        let limit = self.max_results;
        let max_bytes = self.max_file_bytes;
        let (hits, truncated) = tokio::task::spawn_blocking(move || {
            search(&root, &start, &regex, include.as_deref(), limit, max_bytes)
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "grep_search".into(),
            reason: e.to_string(),
        })?;

        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("No matches for /{pattern}/"))
                .with_data(json!({ "matches": 0, "truncated": false })));
        }

        let mut text = hits
            .iter()
            .map(|h| format!("{}:{}: {}", h.path, h.line, h.text))
            .collect::<Vec<_>>()
            .join("\n");
        if truncated {
            text.push_str(&format!(
                "\n... (stopped after {limit} matches; narrow the pattern or path)"
            ));
        }

        Ok(ToolOutput::text(text).with_data(json!({
            "matches": hits.len(),
            "truncated": truncated,
        })))
    }
}

fn search(
    root: &Path,
    start: &Path,
    regex: &Regex,
    include: Option<&str>,
    limit: usize,
    max_bytes: u64,
) -> (Vec<Hit>, bool) {
    let mut hits = Vec::new();
    let mut files: Vec<PathBuf> = WalkDir::new(start)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped_dir(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.metadata().map(|m| m.len() <= max_bytes).unwrap_or(false))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    for path in files {
        let rel = display_relative(&path, root);
        if let Some(include) = include
            && !include_matches(include, &rel)
        {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            if regex.is_match(line) {
                if hits.len() == limit {
                    return (hits, true);
                }
                hits.push(Hit {
                    path: rel.clone(),
                    line: idx + 1,
                    text: line.trim_end().to_string(),
                });
            }
        }
    }
    (hits, false)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

/// `*.ext` matches by suffix; anything else is a substring of the relative path.
fn include_matches(include: &str, rel: &str) -> bool {
    match include.strip_prefix('*') {
        Some(suffix) => rel.ends_with(suffix),
        None => rel.contains(include),
    }
}
