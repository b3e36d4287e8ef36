//! Fenced code-block extraction from markdown text.
//!
//! Code-generation stages ask the model to answer with a single fenced
//! block. Responses sometimes include several blocks or drop the closing
//! fence; extraction keeps every block and tolerates the missing fence.

/// One extracted code block with its declared fence language, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag after the opening fence (e.g., "python"), lowercased.
    pub language: Option<String>,
    /// Block content with original line breaks and indentation.
    pub code: String,
}

/// Extracts all fenced code blocks from markdown text.
///
/// An unterminated final block is kept rather than dropped, so a response
/// cut off mid-stream still yields usable code.
pub fn extract_code_blocks(markdown: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(Option<String>, Vec<&str>)> = None;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some((language, lines)) => {
                    blocks.push(CodeBlock {
                        language,
                        code: lines.join("\n"),
                    });
                }
                None => {
                    let tag = line.trim_start().trim_start_matches('`').trim();
                    let language = if tag.is_empty() {
                        None
                    } else {
                        Some(tag.to_lowercase())
                    };
                    current = Some((language, Vec::new()));
                }
            }
        } else if let Some((_, ref mut lines)) = current {
            lines.push(line);
        }
    }

    // Missing closing fence: keep what we have.
    if let Some((language, lines)) = current {
        blocks.push(CodeBlock {
            language,
            code: lines.join("\n"),
        });
    }

    blocks
}

/// Extracts the first non-empty code block, preferring blocks whose fence
/// language matches `preferred` when given.
pub fn extract_code_block(markdown: &str, preferred: Option<&str>) -> Option<CodeBlock> {
    let blocks = extract_code_blocks(markdown);

    if let Some(want) = preferred {
        let want = want.to_lowercase();
        if let Some(block) = blocks
            .iter()
            .find(|b| b.language.as_deref() == Some(want.as_str()) && !b.code.trim().is_empty())
        {
            return Some(block.clone());
        }
    }

    blocks.into_iter().find(|b| !b.code.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block() {
        let md = "Intro text\n```python\nimport pandas as pd\nprint(1)\n```\nOutro";
        let blocks = extract_code_blocks(md);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language.as_deref(), Some("python"));
        assert_eq!(blocks[0].code, "import pandas as pd\nprint(1)");
    }

    #[test]
    fn test_multiple_blocks() {
        let md = "```r\nlibrary(Seurat)\n```\ntext\n```bash\nRscript run.R\n```";
        let blocks = extract_code_blocks(md);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].language.as_deref(), Some("bash"));
    }

    #[test]
    fn test_unterminated_block_is_kept() {
        let md = "```python\nx = 1\ny = 2";
        let blocks = extract_code_blocks(md);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].code, "x = 1\ny = 2");
    }

    #[test]
    fn test_no_language_tag() {
        let md = "```\nplain code\n```";
        let blocks = extract_code_blocks(md);
        assert_eq!(blocks[0].language, None);
    }

    #[test]
    fn test_preferred_language_wins() {
        let md = "```text\nnot code\n```\n```python\nimport os\n```";
        let block = extract_code_block(md, Some("python")).expect("block");
        assert_eq!(block.code, "import os");
    }

    #[test]
    fn test_skips_empty_blocks() {
        let md = "```python\n\n```\n```python\nreal = True\n```";
        let block = extract_code_block(md, None).expect("block");
        assert_eq!(block.code, "real = True");
    }

    #[test]
    fn test_no_blocks() {
        assert!(extract_code_block("just prose", None).is_none());
    }

    #[test]
    fn test_indentation_preserved() {
        let md = "```python\ndef f():\n    return 1\n```";
        let blocks = extract_code_blocks(md);
        assert_eq!(blocks[0].code, "def f():\n    return 1");
    }
}
