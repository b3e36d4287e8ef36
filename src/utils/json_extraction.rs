//! JSON extraction from LLM responses.
//!
//! Structured stages ask the model for a JSON verdict, but responses often
//! arrive wrapped in markdown fences or preceded by prose. Extraction tries,
//! in order:
//! 1. A ```json fenced block
//! 2. Any generic fenced block that parses as JSON
//! 3. Direct JSON (content starts with '{' or '[')
//! 4. Bracket-matched JSON object/array anywhere in the content
//!
//! Truncated output (unclosed braces) is reported distinctly so callers can
//! treat it as a transient failure and retry.

use regex::Regex;

/// Outcome of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtraction {
    /// Successfully extracted balanced JSON.
    Success(String),
    /// JSON started but was cut off mid-structure.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    /// No JSON-like content found.
    NotFound,
}

impl JsonExtraction {
    /// Returns the extracted JSON for the success case.
    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtraction::Success(json) => Some(json),
            _ => None,
        }
    }

    /// Converts the extraction into a `Result` with a human-readable error.
    pub fn into_result(self, content: &str) -> Result<String, String> {
        match self {
            JsonExtraction::Success(json) => Ok(json),
            JsonExtraction::Truncated {
                partial_json,
                unclosed_braces,
                unclosed_brackets,
            } => {
                let preview: String = partial_json.chars().take(120).collect();
                Err(format!(
                    "JSON truncated: {} unclosed braces, {} unclosed brackets. Partial: {}...",
                    unclosed_braces, unclosed_brackets, preview
                ))
            }
            JsonExtraction::NotFound => {
                let preview: String = content.trim().chars().take(80).collect();
                Err(format!(
                    "No JSON found in response. Content starts with: '{}'",
                    preview
                ))
            }
        }
    }
}

/// Structural scan of a candidate JSON string.
struct StructureScan {
    unclosed_braces: usize,
    unclosed_brackets: usize,
    in_string: bool,
    json_start: Option<usize>,
}

fn scan_structure(s: &str) -> StructureScan {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut json_start: Option<usize> = None;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if json_start.is_none() {
                    json_start = Some(i);
                }
                brace_depth += 1;
            }
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => {
                if json_start.is_none() {
                    json_start = Some(i);
                }
                bracket_depth += 1;
            }
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    StructureScan {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
        json_start,
    }
}

/// Returns the balanced JSON value starting at the first '{' or '[', if any.
fn bracket_match(content: &str) -> Option<String> {
    let start = content.find(['{', '['])?;
    let open = content[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in content[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + i + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

fn is_valid_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Attempts to extract a JSON value from an LLM response.
pub fn extract_json(content: &str) -> JsonExtraction {
    let trimmed = content.trim();

    // Fenced ```json block first: most reliable for structured output.
    let fenced_json = Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("static regex");
    if let Some(caps) = fenced_json.captures(trimmed) {
        let candidate = caps[1].trim();
        if is_valid_json(candidate) {
            return JsonExtraction::Success(candidate.to_string());
        }
    }

    // Generic fenced block that happens to hold JSON.
    let fenced = Regex::new(r"(?s)```\w*\s*(.*?)\s*```").expect("static regex");
    if let Some(caps) = fenced.captures(trimmed) {
        let candidate = caps[1].trim();
        if is_valid_json(candidate) {
            return JsonExtraction::Success(candidate.to_string());
        }
    }

    // Direct JSON.
    if (trimmed.starts_with('{') || trimmed.starts_with('[')) && is_valid_json(trimmed) {
        return JsonExtraction::Success(trimmed.to_string());
    }

    // Bracket-matched JSON embedded in prose.
    if let Some(candidate) = bracket_match(trimmed) {
        if is_valid_json(&candidate) {
            return JsonExtraction::Success(candidate);
        }
    }

    // Nothing parsed; report truncation when the structure starts but never closes.
    let scan = scan_structure(trimmed);
    if let Some(start) = scan.json_start {
        if scan.unclosed_braces > 0 || scan.unclosed_brackets > 0 || scan.in_string {
            return JsonExtraction::Truncated {
                partial_json: trimmed[start..].to_string(),
                unclosed_braces: scan.unclosed_braces,
                unclosed_brackets: scan.unclosed_brackets,
            };
        }
    }

    JsonExtraction::NotFound
}
