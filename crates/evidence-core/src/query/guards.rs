//! Shared guardrails for query payload bounds and result limits.

pub const MAX_CRITERIA_LENGTH: usize = 4096;
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_DISPLAY_TOKENS: usize = 32768;
pub const MIN_DISPLAY_TOKENS: usize = 1;
pub const MAX_LOCATE_RESULTS: usize = 20;

pub fn clamp_int(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

/// Caps a requested result count. Zero stays zero.
pub fn clamp_limit(value: usize, maximum: usize) -> usize {
    value.min(maximum)
}

pub fn clamp_budget(value: usize) -> usize {
    clamp_int(value, MIN_DISPLAY_TOKENS, MAX_DISPLAY_TOKENS)
}

/// Trim and cap criteria text at `MAX_CRITERIA_LENGTH` bytes without
/// splitting a character.
pub fn truncate_query(query: &str) -> &str {
    let stripped = query.trim();
    if stripped.len() <= MAX_CRITERIA_LENGTH {
        return stripped;
    }
    let mut end = MAX_CRITERIA_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    &stripped[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_clamped() {
        assert_eq!(clamp_limit(0, MAX_SEARCH_LIMIT), 0);
        assert_eq!(clamp_limit(7, MAX_SEARCH_LIMIT), 7);
        assert_eq!(clamp_limit(500, MAX_SEARCH_LIMIT), MAX_SEARCH_LIMIT);
        assert_eq!(clamp_budget(0), MIN_DISPLAY_TOKENS);
        assert_eq!(clamp_budget(usize::MAX), MAX_DISPLAY_TOKENS);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MAX_CRITERIA_LENGTH);
        let cut = truncate_query(&long);
        assert!(cut.len() <= MAX_CRITERIA_LENGTH);
        assert!(cut.chars().all(|c| c == 'é'));
        assert_eq!(truncate_query("  find foo  "), "find foo");
    }
}
