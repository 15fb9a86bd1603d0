//! Workflow tracking: externally authored checklists the loop can follow.
//!
//! A workflow is a forest of steps. When a user request matches one, the
//! loop injects the flattened step list as a critical instruction and
//! advances through it as the model reports progress.

use async_trait::async_trait;
use holdfast_core::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// One authored step; children are sub-steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<WorkflowNode>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<WorkflowNode>) -> Self {
        self.children = children;
        self
    }
}

/// A named workflow as authored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Words or phrases that select this workflow for a request
    #[serde(default)]
    pub triggers: Vec<String>,
    pub steps: Vec<WorkflowNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    fn icon(&self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
        }
    }
}

/// A step in execution order, annotated with its nesting depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub title: String,
    pub depth: usize,
    pub status: StepStatus,
}

/// Flatten a step forest depth-first, parents before their children.
pub fn flatten(nodes: &[WorkflowNode]) -> Vec<WorkflowStep> {
    fn walk(nodes: &[WorkflowNode], depth: usize, out: &mut Vec<WorkflowStep>) {
        for node in nodes {
            out.push(WorkflowStep {
                id: node.id.clone(),
                title: node.title.clone(),
                depth,
                status: StepStatus::Pending,
            });
            walk(&node.children, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    walk(nodes, 0, &mut out);
    out
}

/// Workflow loading and matching errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow at {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse workflow at {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Workflow matcher failed: {0}")]
    Matcher(String),
}

/// Picks a workflow for a user request, if any applies.
#[async_trait]
pub trait WorkflowMatcher: Send + Sync {
    async fn match_request(&self, request: &str) -> Result<Option<Workflow>, WorkflowError>;
}

// ── Keyword matcher ─────────────────────────────────────────────────────────

/// Matches by counting how many of a workflow's triggers occur in the
/// request. The highest count wins; ties go to the earlier workflow.
#[derive(Debug, Default, Clone)]
pub struct KeywordWorkflowMatcher {
    workflows: Vec<Workflow>,
}

impl KeywordWorkflowMatcher {
    pub fn new(workflows: Vec<Workflow>) -> Self {
        Self { workflows }
    }

    pub fn with_workflow(mut self, workflow: Workflow) -> Self {
        self.workflows.push(workflow);
        self
    }

    /// Load every `*.toml` workflow file in `dir`. Files that fail to parse
    /// are skipped with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self, WorkflowError> {
        let entries = std::fs::read_dir(dir).map_err(|e| WorkflowError::Read {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut workflows = Vec::new();
        for path in paths {
            match load_file(&path) {
                Ok(wf) => workflows.push(wf),
                Err(e) => warn!(error = %e, "Skipping workflow file"),
            }
        }
        info!(count = workflows.len(), dir = %dir.display(), "Loaded workflows");
        Ok(Self { workflows })
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    fn score(workflow: &Workflow, request: &str) -> usize {
        workflow
            .triggers
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty() && request.contains(t.as_str()))
            .count()
    }
}

#[async_trait]
impl WorkflowMatcher for KeywordWorkflowMatcher {
    async fn match_request(&self, request: &str) -> Result<Option<Workflow>, WorkflowError> {
        let request = request.to_lowercase();
        let mut best: Option<(&Workflow, usize)> = None;
        for wf in &self.workflows {
            let score = Self::score(wf, &request);
            if score > 0 && best.is_none_or(|(_, s)| score > s) {
                best = Some((wf, score));
            }
        }
        if let Some((wf, score)) = best {
            debug!(workflow = %wf.id, score, "Workflow matched");
        }
        Ok(best.map(|(wf, _)| wf.clone()))
    }
}

/// Parse one workflow file.
pub fn load_file(path: &Path) -> Result<Workflow, WorkflowError> {
    let content = std::fs::read_to_string(path).map_err(|e| WorkflowError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| WorkflowError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

// ── Active workflow ─────────────────────────────────────────────────────────

const COMPLETION_CUES: &[&str] = &[
    "done",
    "completed",
    "complete",
    "finished",
    "implemented",
    "fixed",
    "added",
    "created",
    "updated",
    "resolved",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "into", "from", "that", "this", "all", "any", "are", "its",
    "then", "each", "new",
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn title_keywords(title: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(title)
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Result of a successful [`ActiveWorkflow::try_advance`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepAdvance {
    pub completed: WorkflowStep,
    pub next: Option<WorkflowStep>,
}

/// A matched workflow being worked through by one session.
#[derive(Debug, Clone)]
pub struct ActiveWorkflow {
    workflow: Workflow,
    steps: Vec<WorkflowStep>,
    current: Option<usize>,
}

impl ActiveWorkflow {
    pub fn new(workflow: Workflow) -> Self {
        let mut steps = flatten(&workflow.steps);
        let current = if steps.is_empty() { None } else { Some(0) };
        if let Some(first) = steps.first_mut() {
            first.status = StepStatus::InProgress;
        }
        Self {
            workflow,
            steps,
            current,
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&WorkflowStep> {
        self.current.and_then(|i| self.steps.get(i))
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    /// (completed, total)
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        (done, self.steps.len())
    }

    /// Mark the current step completed if `text` reads like a report of
    /// finishing it: a completion cue plus at least half of the step title's
    /// keywords (minimum one).
    pub fn try_advance(&mut self, text: &str) -> Option<StepAdvance> {
        let index = self.current?;
        let step = self.steps.get(index)?;

        let text_words: HashSet<String> = words(text).collect();
        if !COMPLETION_CUES.iter().any(|c| text_words.contains(*c)) {
            return None;
        }

        let keywords = title_keywords(&step.title);
        let needed = keywords.len().div_ceil(2).max(1);
        let hits = keywords.iter().filter(|k| text_words.contains(*k)).count();
        if hits < needed {
            return None;
        }

        self.advance()
    }

    /// Complete the current step unconditionally and move to the next.
    pub fn advance(&mut self) -> Option<StepAdvance> {
        let index = self.current?;
        self.steps[index].status = StepStatus::Completed;
        let completed = self.steps[index].clone();

        let next_index = index + 1;
        self.current = if next_index < self.steps.len() {
            self.steps[next_index].status = StepStatus::InProgress;
            Some(next_index)
        } else {
            None
        };

        debug!(workflow = %self.workflow.id, step = %completed.id, "Workflow step completed");
        Some(StepAdvance {
            completed,
            next: self.current_step().cloned(),
        })
    }

    /// Indented checklist of every step with its status.
    pub fn render_checklist(&self) -> String {
        self.steps
            .iter()
            .map(|s| {
                format!(
                    "{}{} {}. {}",
                    "  ".repeat(s.depth),
                    s.status.icon(),
                    s.id,
                    s.title
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The critical system message that introduces the workflow to the model.
    pub fn instructions_message(&self) -> Message {
        let mut text = format!("## Workflow: {}\n", self.workflow.name);
        if !self.workflow.description.is_empty() {
            text.push_str(&format!("\n{}\n", self.workflow.description));
        }
        text.push_str(
            "\nFollow these steps in order. When you finish a step, say so \
             explicitly (for example \"Step done: <title>\") before moving on.\n\n",
        );
        text.push_str(&self.render_checklist());
        Message::critical_system(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Workflow {
        Workflow {
            id: "add-endpoint".into(),
            name: "Add API endpoint".into(),
            description: String::new(),
            triggers: vec!["endpoint".into(), "api route".into()],
            steps: vec![
                WorkflowNode::new("1", "Define request types").with_children(vec![
                    WorkflowNode::new("1.1", "Add validation rules"),
                ]),
                WorkflowNode::new("2", "Register handler in router"),
            ],
        }
    }

    #[test]
    fn flatten_orders_parents_first_with_depth() {
        let steps = flatten(&sample().steps);
        let ids: Vec<_> = steps.iter().map(|s| (s.id.as_str(), s.depth)).collect();
        assert_eq!(ids, vec![("1", 0), ("1.1", 1), ("2", 0)]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn keyword_matcher_picks_highest_overlap() {
        let other = Workflow {
            id: "docs".into(),
            name: "Docs".into(),
            description: String::new(),
            triggers: vec!["endpoint".into()],
            steps: vec![],
        };
        let matcher = KeywordWorkflowMatcher::new(vec![other, sample()]);

        let hit = matcher
            .match_request("Add an API route and endpoint for users")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.id, "add-endpoint");

        assert!(matcher.match_request("refactor the parser").await.unwrap().is_none());
    }

    #[test]
    fn first_step_starts_in_progress() {
        let wf = ActiveWorkflow::new(sample());
        assert_eq!(wf.current_step().unwrap().id, "1");
        assert_eq!(wf.current_step().unwrap().status, StepStatus::InProgress);
        assert_eq!(wf.progress(), (0, 3));
    }

    #[test]
    fn advance_needs_cue_and_keywords() {
        let mut wf = ActiveWorkflow::new(sample());

        // Keywords without a completion cue
        assert!(wf.try_advance("Now looking at request types").is_none());
        // Cue without keywords
        assert!(wf.try_advance("Done with that.").is_none());

        let adv = wf.try_advance("Done: defined the request types.").unwrap();
        assert_eq!(adv.completed.id, "1");
        assert_eq!(adv.next.unwrap().id, "1.1");
        assert_eq!(wf.progress(), (1, 3));
    }

    #[test]
    fn finishing_last_step_ends_workflow() {
        let mut wf = ActiveWorkflow::new(sample());
        wf.advance();
        wf.advance();
        let adv = wf.try_advance("Registered the handler in the router, finished.").unwrap();
        assert!(adv.next.is_none());
        assert!(wf.is_finished());
        assert!(wf.try_advance("done router handler").is_none());
    }

    #[test]
    fn instructions_are_critical_and_list_steps() {
        let wf = ActiveWorkflow::new(sample());
        let msg = wf.instructions_message();
        assert!(msg.critical);
        assert!(msg.text().contains("[~] 1. Define request types"));
        assert!(msg.text().contains("  [ ] 1.1. Add validation rules"));
    }

    #[test]
    fn load_dir_reads_toml_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("endpoint.toml"),
            r#"
id = "add-endpoint"
name = "Add API endpoint"
triggers = ["endpoint"]

[[steps]]
id = "1"
title = "Define request types"

[[steps.children]]
id = "1.1"
title = "Add validation rules"
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.toml"), "id = ").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let matcher = KeywordWorkflowMatcher::load_dir(dir.path()).unwrap();
        assert_eq!(matcher.len(), 1);
        assert_eq!(matcher.workflows[0].steps[0].children.len(), 1);
    }
}
