//! Shared guardrails for request bounds and traversal limits.

pub const MAX_QUESTION_LENGTH: usize = 2000;
pub const MAX_SEARCH_LIMIT: usize = 100;
pub const MAX_PASSES_LIMIT: usize = 8;
pub const MAX_NEIGHBORHOOD_HOPS: usize = 4;
pub const MAX_FLOW_DEPTH: usize = 10;
pub const MAX_FLOW_PATHS: usize = 50;
pub const MAX_GRAPH_VISITED: usize = 2000;
pub const MAX_EXPLORE_DEPTH: usize = 3;
pub const MAX_HOTSPOTS: usize = 25;
pub const MAX_SYMBOL_SCAN: usize = 5000;
pub const MIN_SESSION_NODES: usize = 1;
pub const MAX_SESSION_NODES: usize = 10_000;

pub fn clamp_usize(value: usize, minimum: usize, maximum: usize) -> usize {
    value.max(minimum).min(maximum)
}

pub fn clamp_limit(value: usize, maximum: usize) -> usize {
    clamp_usize(value, 1, maximum)
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Trim and cap a question or gap at [`MAX_QUESTION_LENGTH`] bytes without
/// splitting a UTF-8 character.
pub fn truncate_question(question: &str) -> String {
    let stripped = question.trim();
    if stripped.len() <= MAX_QUESTION_LENGTH {
        return stripped.to_string();
    }
    let mut end = MAX_QUESTION_LENGTH;
    while !stripped.is_char_boundary(end) {
        end -= 1;
    }
    stripped[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_never_returns_zero() {
        assert_eq!(clamp_limit(0, MAX_SEARCH_LIMIT), 1);
        assert_eq!(clamp_limit(500, MAX_SEARCH_LIMIT), MAX_SEARCH_LIMIT);
        assert_eq!(clamp_limit(7, MAX_SEARCH_LIMIT), 7);
    }

    #[test]
    fn clamp_confidence_handles_nan() {
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(1.5), 1.0);
    }

    #[test]
    fn truncate_question_respects_char_boundaries() {
        let long = "é".repeat(MAX_QUESTION_LENGTH);
        let truncated = truncate_question(&long);
        assert!(truncated.len() <= MAX_QUESTION_LENGTH);
        assert!(truncated.chars().all(|c| c == 'é'));
        assert_eq!(truncate_question("  why?  "), "why?");
    }
}
