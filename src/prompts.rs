use crate::error::ConfigError;
use crate::models::Prompt;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Load the ordered prompt list.
///
/// `.jsonl` files carry one `{prompt_id, prompt_text, topic_hint?}` object per
/// line. Anything else is read as one prompt per line, skipping blank lines and
/// `#` comments, with ids derived from the prompt text.
pub fn load(path: &Path) -> Result<Vec<Prompt>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt source: {}", path.display()))?;

    let is_jsonl = path.extension().is_some_and(|ext| ext == "jsonl");
    let prompts = if is_jsonl {
        parse_jsonl(&content)
            .with_context(|| format!("Failed to parse prompt source: {}", path.display()))?
    } else {
        parse_lines(&content)
    };

    if prompts.is_empty() {
        return Err(ConfigError::EmptyPromptSource(path.to_path_buf()).into());
    }
    Ok(prompts)
}

fn parse_lines(content: &str) -> Vec<Prompt> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let base = content_id(line);
            let occurrence = seen.entry(base.clone()).or_insert(0);
            *occurrence += 1;
            let prompt_id = if *occurrence == 1 {
                base
            } else {
                format!("{base}-{occurrence}")
            };
            Prompt {
                prompt_id,
                prompt_text: line.to_string(),
                topic_hint: None,
            }
        })
        .collect()
}

fn parse_jsonl(content: &str) -> Result<Vec<Prompt>> {
    let mut ids = HashSet::new();
    let mut prompts = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let prompt: Prompt = serde_json::from_str(line)
            .with_context(|| format!("Invalid prompt on line {}", index + 1))?;
        if !ids.insert(prompt.prompt_id.clone()) {
            return Err(ConfigError::DuplicatePromptId(prompt.prompt_id).into());
        }
        prompts.push(prompt);
    }
    Ok(prompts)
}

/// Stable id for a prompt text: `p-` followed by 12 hex digits of its SHA-256
pub fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    format!("p-{hex}")
}
