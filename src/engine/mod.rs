//! The synthesis engine: generate, critique, execute, diagnose, repair.
//!
//! The loop is a small state machine. [`next_stage`] is a pure function of
//! the current stage and [`RunState`], so transition logic is testable
//! without any I/O; the engine owns the side effects and applies each
//! stage's [`StateUpdate`] before asking for the next transition.

pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SynthesisConfig;
use crate::environment::EnvProfile;
use crate::error::{ExecutionError, PromptError};
use crate::execution::ScriptExecutor;
use crate::llm::LlmProvider;
use crate::prompts::PromptLibrary;
use crate::research::{ResearchPipeline, SearchProvider};
use crate::stages::{
    CodeGenerator, EnvRouter, ExecutionDiagnostician, FeedbackContext, GenerateInput, ScriptCritic,
    StageError,
};

pub use state::{Artifact, CritiqueStatus, ExecutionRecord, RunState, StateUpdate, TaskContext};

/// Stages of the synthesis loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Generate,
    Critique,
    Execute,
    Diagnose,
    Research,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Diagnosis cleared an execution.
    Success,
    /// A budget ran out before any execution was cleared.
    Exhausted,
    /// The caller requested a stop.
    Aborted,
}

/// Result of [`next_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(Stage),
    Done(Outcome),
}

/// Picks the stage that follows `stage` given the run's state.
pub fn next_stage(
    stage: Stage,
    task: &TaskContext,
    state: &RunState,
    config: &SynthesisConfig,
) -> Transition {
    match stage {
        Stage::Generate => {
            if task.review_required && state.critique_rounds < config.max_critique_iterations {
                Transition::Next(Stage::Critique)
            } else {
                Transition::Next(Stage::Execute)
            }
        }
        Stage::Critique => match state.critique_status {
            CritiqueStatus::Approved => Transition::Next(Stage::Execute),
            // Budget spent on review: run the artifact as-is.
            CritiqueStatus::RevisionsRequested
                if state.critique_rounds >= config.max_critique_iterations =>
            {
                Transition::Next(Stage::Execute)
            }
            CritiqueStatus::RevisionsRequested => Transition::Next(Stage::Generate),
            CritiqueStatus::Pending => Transition::Next(Stage::Execute),
        },
        Stage::Execute => Transition::Next(Stage::Diagnose),
        Stage::Diagnose => {
            if !state.error_status {
                Transition::Done(Outcome::Success)
            } else if state.repair_attempts >= config.max_repair_attempts {
                Transition::Done(Outcome::Exhausted)
            } else if state.research_warranted && state.web_summary.is_none() {
                Transition::Next(Stage::Research)
            } else {
                Transition::Next(Stage::Generate)
            }
        }
        Stage::Research => Transition::Next(Stage::Generate),
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// A run that ended on an infrastructure failure rather than an outcome.
///
/// Carries the state accumulated up to the failure so callers can inspect
/// or persist the partial history.
#[derive(Debug, Error)]
#[error("Run failed during {stage:?}: {error}")]
pub struct RunFailure {
    /// Stage that raised the error.
    pub stage: Stage,
    /// The underlying failure.
    pub error: EngineError,
    /// State at the time of failure.
    pub state: RunState,
}

/// Final report of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: Outcome,
    /// Full accumulated state.
    pub state: RunState,
}

impl RunReport {
    /// Whether the run produced a cleared script.
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// The script the run settled on, when one exists.
    pub fn final_script(&self) -> Option<&Artifact> {
        self.state.last_artifact()
    }
}

/// Orchestrator running the synthesis loop for one task at a time.
pub struct SynthesisEngine {
    config: SynthesisConfig,
    profile: EnvProfile,
    executor: Arc<dyn ScriptExecutor>,
    generator: CodeGenerator,
    critic: ScriptCritic,
    diagnostician: ExecutionDiagnostician,
    router: EnvRouter,
    research: Option<ResearchPipeline>,
    abort: Arc<AtomicBool>,
}

impl SynthesisEngine {
    /// Builds an engine from a provider, executor and environment profile.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ScriptExecutor>,
        profile: EnvProfile,
        config: SynthesisConfig,
    ) -> Result<Self, PromptError> {
        let prompts = Arc::new(PromptLibrary::builtin()?);

        Ok(Self {
            generator: CodeGenerator::new(provider.clone(), prompts.clone(), &config),
            critic: ScriptCritic::new(provider.clone(), prompts.clone(), &config),
            diagnostician: ExecutionDiagnostician::new(provider.clone(), prompts.clone(), &config),
            router: EnvRouter::new(provider.clone(), prompts.clone(), &config),
            research: None,
            config,
            profile,
            executor,
            abort: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Enables web research with the given search backend.
    pub fn with_research(
        mut self,
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
    ) -> Result<Self, PromptError> {
        let prompts = Arc::new(PromptLibrary::builtin()?);
        self.research = Some(ResearchPipeline::new(provider, search, prompts, &self.config));
        Ok(self)
    }

    /// Handle for cooperative cancellation; checked between stages.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Runs the synthesis loop for one task.
    ///
    /// Sandbox teardown happens exactly once on every exit path; a teardown
    /// failure is logged, never surfaced over the run's own outcome.
    pub async fn run(&self, task: &TaskContext) -> Result<RunReport, RunFailure> {
        let mut state = RunState::default();
        let mut stage = Stage::Generate;

        let outcome = loop {
            if self.abort.load(Ordering::SeqCst) {
                tracing::info!("Run aborted by caller");
                break Outcome::Aborted;
            }

            if stage == Stage::Generate
                && state.generation_attempts >= self.config.max_iterations
            {
                tracing::info!(
                    attempts = state.generation_attempts,
                    "Generation budget exhausted"
                );
                break Outcome::Exhausted;
            }

            tracing::debug!(?stage, generation = state.generation_attempts, "Entering stage");

            if let Err(error) = self.handle_stage(stage, task, &mut state).await {
                self.teardown().await;
                return Err(RunFailure {
                    stage,
                    error,
                    state,
                });
            }

            match next_stage(stage, task, &state, &self.config) {
                Transition::Next(next) => stage = next,
                Transition::Done(outcome) => break outcome,
            }
        };

        self.teardown().await;
        tracing::info!(?outcome, artifacts = state.artifacts.len(), "Run finished");
        Ok(RunReport { outcome, state })
    }

    async fn teardown(&self) {
        if let Err(e) = self.executor.teardown().await {
            tracing::warn!(error = %e, "Sandbox teardown failed");
        }
    }

    async fn handle_stage(
        &self,
        stage: Stage,
        task: &TaskContext,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        match stage {
            Stage::Generate => self.handle_generate(task, state).await,
            Stage::Critique => self.handle_critique(task, state).await,
            Stage::Execute => self.handle_execute(state).await,
            Stage::Diagnose => self.handle_diagnose(state).await,
            Stage::Research => self.handle_research(state).await,
        }
    }

    async fn handle_generate(
        &self,
        task: &TaskContext,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        let feedback = state.feedback_context();
        let is_repair = matches!(feedback, FeedbackContext::Repair { .. });

        let references = task.references_text();
        let input = GenerateInput {
            task_instruction: &task.instruction,
            data_perception: &task.data_perception,
            prior_code: task.prior_code.as_deref(),
            references: references.as_deref(),
            last_artifact: state.last_artifact().map(|a| a.code.as_str()),
            preferred_language: state.last_artifact().map(|a| a.language.as_str()),
            feedback: &feedback,
        };

        let script = self.generator.generate(&input).await?;
        tracing::info!(
            language = %script.language,
            repair = is_repair,
            "Generated candidate script"
        );

        // A new artifact consumes whatever feedback produced it.
        state.apply(StateUpdate {
            new_artifact: Some(Artifact::new(script.code, script.language)),
            critique_status: Some(CritiqueStatus::Pending),
            critique_feedback: Some(None),
            error_status: Some(false),
            error_summary: Some(None),
            research_warranted: Some(false),
            web_summary: Some(None),
            bump_generation: true,
            bump_repair: is_repair,
            ..Default::default()
        });
        Ok(())
    }

    async fn handle_critique(
        &self,
        task: &TaskContext,
        state: &mut RunState,
    ) -> Result<(), EngineError> {
        let code = state
            .last_artifact()
            .map(|a| a.code.clone())
            .ok_or_else(|| StageError::MalformedResponse("no artifact to review".into()))?;

        let verdict = self.critic.review(&task.instruction, &code).await?;
        tracing::info!(approved = verdict.approved, "Critique verdict");

        let (status, feedback) = if verdict.approved {
            (CritiqueStatus::Approved, None)
        } else {
            (CritiqueStatus::RevisionsRequested, Some(verdict.feedback))
        };

        state.apply(StateUpdate {
            critique_status: Some(status),
            critique_feedback: Some(feedback),
            bump_critique_round: true,
            ..Default::default()
        });
        Ok(())
    }

    async fn handle_execute(&self, state: &mut RunState) -> Result<(), EngineError> {
        let artifact = state
            .last_artifact()
            .cloned()
            .ok_or_else(|| StageError::MalformedResponse("no artifact to execute".into()))?;

        let decision = self.router.route(&artifact.code, &self.profile).await?;
        tracing::info!(
            language = %decision.language,
            isolated = decision.use_isolated,
            image = decision.image.as_deref().unwrap_or("-"),
            "Routed execution"
        );

        let request = decision.into_request(artifact.code);
        let language = request.language.clone();
        let isolated = request.isolated;

        let result = self.executor.execute(&request).await?;
        tracing::info!(exit_ok = result.exit_ok, "Execution finished");

        state.apply(StateUpdate {
            new_execution: Some(ExecutionRecord {
                language,
                isolated,
                result,
                verdict: None,
                recorded_at: chrono::Utc::now(),
            }),
            reset_critique_rounds: true,
            ..Default::default()
        });
        Ok(())
    }

    async fn handle_diagnose(&self, state: &mut RunState) -> Result<(), EngineError> {
        let report = state
            .last_execution()
            .map(|r| r.result.report())
            .ok_or_else(|| StageError::MalformedResponse("no execution to diagnose".into()))?;

        let verdict = self.diagnostician.diagnose(&report).await?;
        tracing::info!(
            error = verdict.error_occurred,
            research = verdict.need_web_search,
            "Diagnosis verdict"
        );

        let error_occurred = verdict.error_occurred;
        let research_warranted = verdict.error_occurred && verdict.need_web_search;
        let summary = if error_occurred {
            Some(verdict.error_summary.clone())
        } else {
            None
        };

        state.apply(StateUpdate {
            // The verdict lands on the execution's own log entry too, so the
            // history keeps every cycle's classification after this run-level
            // snapshot is overwritten.
            diagnosis: Some(verdict),
            error_status: Some(error_occurred),
            error_summary: Some(summary),
            research_warranted: Some(research_warranted),
            // Each diagnosis starts a fresh research cycle.
            web_summary: Some(None),
            ..Default::default()
        });
        Ok(())
    }

    async fn handle_research(&self, state: &mut RunState) -> Result<(), EngineError> {
        let Some(pipeline) = &self.research else {
            tracing::info!("Research warranted but no search backend configured");
            return Ok(());
        };

        let code = state
            .last_artifact()
            .map(|a| a.code.clone())
            .unwrap_or_default();
        let error_summary = state.error_summary.clone().unwrap_or_default();

        // No relevant results after the bounded query rounds is not a
        // failure; the repair prompt falls back to diagnosis-only feedback.
        match pipeline.research(&code, &error_summary).await? {
            Some(summary) => {
                tracing::info!("Research produced a remediation summary");
                state.apply(StateUpdate {
                    web_summary: Some(Some(summary)),
                    ..Default::default()
                });
            }
            None => {
                tracing::info!("Research found nothing relevant");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskContext {
        TaskContext::new("task", "data", "/tmp/t")
    }

    #[test]
    fn test_generate_routes_to_critique_when_reviewed() {
        let config = SynthesisConfig::default();
        let state = RunState::default();
        assert_eq!(
            next_stage(Stage::Generate, &task(), &state, &config),
            Transition::Next(Stage::Critique)
        );
        assert_eq!(
            next_stage(Stage::Generate, &task().without_review(), &state, &config),
            Transition::Next(Stage::Execute)
        );
    }

    #[test]
    fn test_critique_rejection_loops_until_forced() {
        let config = SynthesisConfig::default();
        let mut state = RunState {
            critique_status: CritiqueStatus::RevisionsRequested,
            critique_rounds: 1,
            ..Default::default()
        };

        assert_eq!(
            next_stage(Stage::Critique, &task(), &state, &config),
            Transition::Next(Stage::Generate)
        );

        state.critique_rounds = config.max_critique_iterations;
        assert_eq!(
            next_stage(Stage::Critique, &task(), &state, &config),
            Transition::Next(Stage::Execute)
        );
    }

    #[test]
    fn test_clean_diagnosis_is_success() {
        let config = SynthesisConfig::default();
        let state = RunState::default();
        assert_eq!(
            next_stage(Stage::Diagnose, &task(), &state, &config),
            Transition::Done(Outcome::Success)
        );
    }

    #[test]
    fn test_failed_diagnosis_routes_repair_or_research() {
        let config = SynthesisConfig::default();
        let mut state = RunState {
            error_status: true,
            error_summary: Some("boom".into()),
            ..Default::default()
        };

        assert_eq!(
            next_stage(Stage::Diagnose, &task(), &state, &config),
            Transition::Next(Stage::Generate)
        );

        state.research_warranted = true;
        assert_eq!(
            next_stage(Stage::Diagnose, &task(), &state, &config),
            Transition::Next(Stage::Research)
        );

        // A summary already in hand means research is not repeated.
        state.web_summary = Some("found it".into());
        assert_eq!(
            next_stage(Stage::Diagnose, &task(), &state, &config),
            Transition::Next(Stage::Generate)
        );
    }

    #[test]
    fn test_repair_budget_exhaustion() {
        let config = SynthesisConfig::default();
        let state = RunState {
            error_status: true,
            repair_attempts: config.max_repair_attempts,
            ..Default::default()
        };

        assert_eq!(
            next_stage(Stage::Diagnose, &task(), &state, &config),
            Transition::Done(Outcome::Exhausted)
        );
    }

    #[test]
    fn test_research_always_returns_to_generate() {
        let config = SynthesisConfig::default();
        let state = RunState::default();
        assert_eq!(
            next_stage(Stage::Research, &task(), &state, &config),
            Transition::Next(Stage::Generate)
        );
    }
}
