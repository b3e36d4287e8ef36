//! Shared parsing utilities for LLM responses.

pub mod codeblock;
pub mod json_extraction;

pub use codeblock::extract_code_block;
pub use json_extraction::{extract_json, JsonExtraction};
