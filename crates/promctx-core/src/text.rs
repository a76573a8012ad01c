//! Helpers for text returned by language models.

/// Removes a surrounding Markdown code fence, with or without a language tag.
///
/// Text without a fence is returned trimmed.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // the tag may be followed directly by the payload on a one-line fence
    let tag_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+')))
        .unwrap_or(rest.len());
    let body = rest[tag_len..].trim();
    body.strip_suffix("```").unwrap_or(body).trim()
}
