//! Run state for the synthesis loop.
//!
//! [`RunState`] is the single accumulating record of a run: every artifact,
//! every execution, the verdicts of the last critique and diagnosis, and
//! the budget counters. Stage handlers never mutate it directly; they
//! return a [`StateUpdate`] that the engine applies, so every transition
//! leaves a serializable trail.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::ExecutionResult;
use crate::stages::{DiagnosisVerdict, FeedbackContext};

/// Immutable description of the task a run is solving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Natural-language instruction for the script.
    pub instruction: String,
    /// Description of the input data and expected I/O.
    pub data_perception: String,
    /// Script from the preceding workflow step, when part of one.
    pub prior_code: Option<String>,
    /// Reference snippets accomplishing similar tasks, in ranking order.
    pub reference_snippets: Vec<String>,
    /// Directory holding the task's data; scripts run with this as cwd.
    pub work_dir: PathBuf,
    /// Whether candidates pass through review before execution.
    pub review_required: bool,
}

impl TaskContext {
    /// Creates a task context with review enabled.
    pub fn new(
        instruction: impl Into<String>,
        data_perception: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            data_perception: data_perception.into(),
            prior_code: None,
            reference_snippets: Vec::new(),
            work_dir: work_dir.into(),
            review_required: true,
        }
    }

    /// Attaches the preceding workflow step's script.
    pub fn with_prior_code(mut self, code: impl Into<String>) -> Self {
        self.prior_code = Some(code.into());
        self
    }

    /// Attaches reference snippets.
    pub fn with_references(mut self, snippets: Vec<String>) -> Self {
        self.reference_snippets = snippets;
        self
    }

    /// Joins reference snippets into one prompt section, when any exist.
    pub fn references_text(&self) -> Option<String> {
        if self.reference_snippets.is_empty() {
            None
        } else {
            Some(self.reference_snippets.join("\n\n---\n\n"))
        }
    }

    /// Disables the pre-execution review stage.
    pub fn without_review(mut self) -> Self {
        self.review_required = false;
        self
    }
}

/// One generated script, timestamped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Script source.
    pub code: String,
    /// Language, lowercased.
    pub language: String,
    /// When the artifact was produced.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
            created_at: Utc::now(),
        }
    }
}

/// One execution of an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Language the script ran as.
    pub language: String,
    /// Whether it ran in a container.
    pub isolated: bool,
    /// Captured outcome.
    pub result: ExecutionResult,
    /// Classification of this execution, attached once diagnosis runs.
    pub verdict: Option<DiagnosisVerdict>,
    /// When the execution finished.
    pub recorded_at: DateTime<Utc>,
}

/// Verdict of the most recent critique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CritiqueStatus {
    /// The current artifact has not been reviewed.
    #[default]
    Pending,
    /// Cleared for execution.
    Approved,
    /// Rejected with feedback.
    RevisionsRequested,
}

/// Accumulating state of one synthesis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    /// Total generation calls made, fresh and repair alike.
    pub generation_attempts: u32,
    /// Repair-mode generations made.
    pub repair_attempts: u32,
    /// Consecutive critique rounds for the current artifact cycle.
    pub critique_rounds: u32,
    /// Every artifact produced, oldest first.
    pub artifacts: Vec<Artifact>,
    /// Every execution performed, oldest first.
    pub executions: Vec<ExecutionRecord>,
    /// Verdict of the latest critique.
    pub critique_status: CritiqueStatus,
    /// Feedback from the latest rejection.
    pub critique_feedback: Option<String>,
    /// Latest diagnosis said the execution failed.
    pub error_status: bool,
    /// Root-cause summary from the latest diagnosis.
    pub error_summary: Option<String>,
    /// Latest diagnosis recommended web research.
    pub research_warranted: bool,
    /// Remediation summary from the latest research, consumed by repair.
    pub web_summary: Option<String>,
}

/// Patch produced by one stage handler.
///
/// `Option<Option<T>>` fields distinguish "leave unchanged" (outer `None`)
/// from "clear" (inner `None`).
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub new_artifact: Option<Artifact>,
    pub new_execution: Option<ExecutionRecord>,
    /// Diagnosis of the most recent execution; recorded on its log entry.
    pub diagnosis: Option<DiagnosisVerdict>,
    pub critique_status: Option<CritiqueStatus>,
    pub critique_feedback: Option<Option<String>>,
    pub error_status: Option<bool>,
    pub error_summary: Option<Option<String>>,
    pub research_warranted: Option<bool>,
    pub web_summary: Option<Option<String>>,
    pub bump_generation: bool,
    pub bump_repair: bool,
    pub bump_critique_round: bool,
    pub reset_critique_rounds: bool,
}

impl RunState {
    /// Applies a stage's patch.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(artifact) = update.new_artifact {
            self.artifacts.push(artifact);
        }
        if let Some(record) = update.new_execution {
            self.executions.push(record);
        }
        if let Some(verdict) = update.diagnosis {
            if let Some(record) = self.executions.last_mut() {
                record.verdict = Some(verdict);
            }
        }
        if let Some(status) = update.critique_status {
            self.critique_status = status;
        }
        if let Some(feedback) = update.critique_feedback {
            self.critique_feedback = feedback;
        }
        if let Some(status) = update.error_status {
            self.error_status = status;
        }
        if let Some(summary) = update.error_summary {
            self.error_summary = summary;
        }
        if let Some(warranted) = update.research_warranted {
            self.research_warranted = warranted;
        }
        if let Some(summary) = update.web_summary {
            self.web_summary = summary;
        }
        if update.bump_generation {
            self.generation_attempts += 1;
        }
        if update.bump_repair {
            self.repair_attempts += 1;
        }
        if update.bump_critique_round {
            self.critique_rounds += 1;
        }
        if update.reset_critique_rounds {
            self.critique_rounds = 0;
        }
    }

    /// The most recent artifact.
    pub fn last_artifact(&self) -> Option<&Artifact> {
        self.artifacts.last()
    }

    /// The most recent execution.
    pub fn last_execution(&self) -> Option<&ExecutionRecord> {
        self.executions.last()
    }

    /// Derives what the next generation call reacts to.
    ///
    /// Critique rejection takes precedence: an artifact that never ran has
    /// no execution feedback to act on.
    pub fn feedback_context(&self) -> FeedbackContext {
        if self.critique_status == CritiqueStatus::RevisionsRequested {
            return FeedbackContext::Critique(
                self.critique_feedback.clone().unwrap_or_default(),
            );
        }
        if self.error_status {
            return FeedbackContext::Repair {
                diagnosis: self.error_summary.clone().unwrap_or_default(),
                web_summary: self.web_summary.clone(),
            };
        }
        FeedbackContext::Fresh
    }
}
