//! Prompt templates for the synthesis stages.
//!
//! System prompts are compile-time constants; user-side prompt bodies are
//! tera templates rendered through [`PromptLibrary`]. Template failures are
//! configuration defects and are surfaced as [`PromptError`] without retry.

use tera::{Context, Tera};

use crate::error::PromptError;

/// System prompt for fresh code generation and revision.
pub const GENERATE_SYSTEM: &str = r#"You are an expert data-analysis engineer writing a single runnable script.

Task instruction:
{task_instruction}

REQUIREMENTS:
1. Produce ONE complete script inside a single fenced code block with a language tag
2. The script must be self-contained and runnable as-is against the described data
3. Read inputs from the working directory paths given in the data description
4. Print key intermediate results so execution output is diagnosable
5. No placeholders, no TODO comments, no elided sections

Respond with the fenced code block only. Any explanation goes in comments inside the script."#;

/// System prompt for repair-mode generation.
pub const REPAIR_SYSTEM: &str = r#"You are an expert data-analysis engineer fixing a script that failed at runtime.

Study the original code, the data description, and the error context, then
return the corrected COMPLETE script. Do not return a fragment or a diff.

Respond with one fenced code block only, using the same language as the original."#;

/// System prompt for the critique stage.
pub const CRITIQUE_SYSTEM: &str = r#"You are a meticulous code reviewer evaluating whether a script fulfils an analysis task.

Task instruction:
{task_instruction}

Judge the candidate on: correctness with respect to the task, use of the
described input data, and whether it would run end to end.

You MUST respond with ONLY valid JSON in this exact format:
{
  "approved": true,
  "feedback": "specific, actionable critique (empty string when approved)"
}"#;

/// System prompt for the diagnosis stage.
pub const DIAGNOSE_SYSTEM: &str = r#"You classify the outcome of a script execution.

Decide three things:
1. Did the execution fail? Warnings and partial output do not count as failure
   unless the script clearly did not accomplish its work.
2. If it failed, summarize the root-cause error in a few sentences, quoting
   the decisive part of the output.
3. Would a web search for the error message plausibly help fix it (unfamiliar
   library error, version incompatibility, cryptic message), or is the fix
   evident from the output alone (typo, wrong path, missing import)?

You MUST respond with ONLY valid JSON in this exact format:
{
  "error_occurred": false,
  "need_web_search": false,
  "error_summary": ""
}"#;

/// System prompt for the environment routing stage.
pub const ROUTER_SYSTEM: &str = r#"You decide how to execute a script given the available runtimes.

Rules:
- Pick the language the script is written in.
- Prefer a native runtime when one supports the script's dependencies;
  otherwise pick the best-matching container image from the profile.
- If the language cannot be piped to an interpreter directly (e.g. R scripts
  run via Rscript), set needs_wrap and give the shell command that runs the
  script file.

You MUST respond with ONLY valid JSON in this exact format:
{
  "language": "python",
  "use_isolated": false,
  "image": null,
  "needs_wrap": false,
  "wrapped_command": null,
  "script_file": null
}"#;

/// System prompt for research query generation.
pub const RESEARCH_QUERY_SYSTEM: &str = r#"You write web search queries for debugging a programming error.

Produce 2-4 short, distinct queries. Quote exact error text where it is
distinctive; drop file paths and line numbers that are local to this run.

You MUST respond with ONLY valid JSON in this exact format:
{
  "queries": ["query one", "query two"]
}"#;

/// System prompt for research result filtering.
pub const RESEARCH_FILTER_SYSTEM: &str = r#"You select which search results are worth reading in full to fix a programming error.

Pick only results that plausibly discuss the same error or library. Return an
empty list when nothing is relevant.

You MUST respond with ONLY valid JSON in this exact format:
{
  "selected_indexes": [0, 2]
}"#;

/// System prompt for condensing fetched pages into a remediation summary.
pub const RESEARCH_CONDENSE_SYSTEM: &str = r#"You condense web pages into a remediation summary for a failing script.

Write a short, concrete summary of the recommended fixes: what to change,
which versions or APIs are involved, and any pitfalls mentioned. Ignore page
content unrelated to the error."#;

/// Raw tera templates for user-side prompt bodies, keyed by template id.
const USER_TEMPLATES: &[(&str, &str)] = &[
    (
        "generate.user",
        r#"## Input data and I/O
The script serves the following data:
{{ data_perception }}
{% if prior_code %}
## Previous step in the workflow
The preceding script in this workflow is below; keep the same coding style:
{{ prior_code }}
{% endif %}{% if last_artifact %}
## Iterative generation
The script you previously generated for this task is below; revise and improve it according to the instructions:
{{ last_artifact }}
{% endif %}{% if critique %}
## Reviewer feedback
{{ critique }}
{% endif %}{% if references %}
## Reference snippets
Code that accomplishes similar tasks; details may differ from this task:
{{ references }}
{% endif %}"#,
    ),
    (
        "repair.user",
        r#"## Original code
{{ code }}

## Data information
{{ data_perception }}

## Error message
The error and related information:
---
{{ error_summary }}
---
{% if web_summary %}
## Web solution
Searching the web, the recommended solutions are:
---
{{ web_summary }}
{% endif %}"#,
    ),
    (
        "critique.user",
        r#"## Code to be evaluated
The script generated for the task above is below; evaluate it:
{{ code }}"#,
    ),
    (
        "diagnose.user",
        r#"The script executed with the following output:
{{ execution_output }}"#,
    ),
    (
        "router.user",
        r#"## Script to execute
{{ code }}

## Runtime environment profile
### Native runtimes
{{ native_runtimes }}

### Container images
{{ container_images }}"#,
    ),
    (
        "research.queries",
        r#"## Summary of error
{{ error_summary }}"#,
    ),
    (
        "research.filter",
        r#"## Search objective
{{ error_summary }}

## Queried web pages
{{ results }}"#,
    ),
    (
        "research.condense",
        r#"## Code that needs fixing
{{ code }}

## Error summary
{{ error_summary }}

## Fetched pages
{{ pages }}"#,
    ),
];

/// Template provider for user-side prompt bodies.
pub struct PromptLibrary {
    tera: Tera,
}

impl PromptLibrary {
    /// Builds the library from the built-in template set.
    ///
    /// # Errors
    ///
    /// Returns `PromptError::Registration` when a template fails to compile;
    /// this is a startup configuration failure, not a runtime condition.
    pub fn builtin() -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(USER_TEMPLATES.to_vec())
            .map_err(|e| PromptError::Registration(e.to_string()))?;
        Ok(Self { tera })
    }

    /// Renders the template with the given variables.
    pub fn render(&self, template_id: &str, context: &Context) -> Result<String, PromptError> {
        if !self.tera.get_template_names().any(|n| n == template_id) {
            return Err(PromptError::NotFound(template_id.to_string()));
        }
        self.tera
            .render(template_id, context)
            .map_err(|e| PromptError::RenderFailed {
                template: template_id.to_string(),
                message: e.to_string(),
            })
    }
}

/// Builds the generate-stage system prompt for a task instruction.
pub fn build_generate_system(task_instruction: &str) -> String {
    GENERATE_SYSTEM.replace("{task_instruction}", task_instruction)
}

/// Builds the critique-stage system prompt for a task instruction.
pub fn build_critique_system(task_instruction: &str) -> String {
    CRITIQUE_SYSTEM.replace("{task_instruction}", task_instruction)
}
