// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between `LLMProvider` and one vendor API. The
// helpers below pull structured payloads out of free-form model replies.

pub mod ollama;
pub mod openai;
pub mod registry;

pub use registry::ProviderRegistry;

/// JSON object in a model reply: a ```json block, a bare reply, a generic
/// fenced block holding an object, or the outermost `{...}` span.
pub fn extract_json(text: &str) -> Option<String> {
    let start_marker = "```json";
    if let Some(start) = text.find(start_marker) {
        let content_start = start + start_marker.len();
        if let Some(end_offset) = text[content_start..].find("```") {
            let content_end = content_start + end_offset;
            return Some(text[content_start..content_end].trim().to_string());
        }
    }

    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    if let Some(block) = extract_code_block(text) {
        if block.starts_with('{') {
            return Some(block);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

/// Body of the first fenced code block, without its language tag.
pub fn extract_code_block(text: &str) -> Option<String> {
    let marker = "```";
    let start = text.find(marker)?;
    let after_marker = start + marker.len();
    let end_offset = text[after_marker..].find(marker)?;
    let block = &text[after_marker..after_marker + end_offset];

    // The rest of the opening line is a language tag.
    let body = match block.find('\n') {
        Some(newline) if !block[..newline].trim().contains(' ') => &block[newline + 1..],
        _ => block,
    };
    let body = body.trim();
    (!body.is_empty()).then(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_json_fence() {
        let reply = "Here you go:\n```json\n{\"approved\": true}\n```\nthanks";
        assert_eq!(extract_json(reply).as_deref(), Some("{\"approved\": true}"));
    }

    #[test]
    fn test_extract_json_bare_object() {
        assert_eq!(extract_json("  {\"a\": 1}  ").as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let reply = "My verdict is {\"approved\": false, \"score\": 0.2} overall.";
        assert_eq!(
            extract_json(reply).as_deref(),
            Some("{\"approved\": false, \"score\": 0.2}")
        );
    }

    #[test]
    fn test_extract_json_none_without_braces() {
        assert!(extract_json("no structured content").is_none());
    }

    #[test]
    fn test_extract_code_block_strips_language_tag() {
        let reply = "```rust\nfn main() {}\n```";
        assert_eq!(extract_code_block(reply).as_deref(), Some("fn main() {}"));
    }

    #[test]
    fn test_extract_code_block_without_tag() {
        let reply = "```\nlet x = 1;\n```";
        assert_eq!(extract_code_block(reply).as_deref(), Some("let x = 1;"));
    }
}
