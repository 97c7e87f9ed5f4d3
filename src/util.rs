//! Shared utility functions for the anvil crate.

/// Turn a free-text task into a branch-safe slug, capped at `max_len` bytes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        let mut end = max_len;
        while !slug.is_char_boundary(end) {
            end -= 1;
        }
        slug[..end].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

/// Strip decorative markdown code fences from a model completion.
///
/// Completions routinely arrive as ```` ```lang ... ``` ```` blocks; the
/// verification boundary requires the bare artifact text. When the response
/// contains a fenced block, the content of the first block is returned;
/// otherwise the text is trimmed and passed through.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip the optional language tag on the opening fence line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
        return body.trim().to_string();
    }
    trimmed.to_string()
}

/// Truncate text to at most `max_bytes`, cutting on a char boundary and
/// marking the cut. Keeps repo maps and experience snippets inside prompt
/// budgets.
pub fn truncate_for_prompt(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated]", &text[..end])
}
