//! Model-pattern authorisation.
//!
//! Patterns are glob-style: `*` matches any character run, `?` a single
//! character. A pattern ending in `*` additionally matches by literal prefix
//! of the un-starred part, so `openai/*` admits every `openai/...` model
//! unambiguously.

/// True iff `patterns` is empty (no restriction) or some pattern admits
/// the full `provider/model` string.
pub fn is_model_allowed(patterns: &[String], model: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|pattern| matches_pattern(pattern, model))
}

fn matches_pattern(pattern: &str, model: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if glob_match(pattern.as_bytes(), model.as_bytes()) {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if model.starts_with(prefix) {
            return true;
        }
    }
    false
}

/// Iterative glob match with single-star backtracking.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_pattern_list_allows_everything() {
        assert!(is_model_allowed(&[], "openai/gpt-4o"));
        assert!(is_model_allowed(&[], "anything at all"));
    }

    #[test]
    fn lone_star_admits_every_model() {
        let pats = patterns(&["*"]);
        assert!(is_model_allowed(&pats, "openai/gpt-4o"));
        assert!(is_model_allowed(&pats, "anthropic/claude-3-haiku-20240307"));
    }

    #[test]
    fn provider_wildcard_scopes_by_prefix() {
        let pats = patterns(&["openai/*"]);
        assert!(is_model_allowed(&pats, "openai/gpt-4o"));
        assert!(is_model_allowed(&pats, "openai/gpt-3.5-turbo"));
        assert!(!is_model_allowed(&pats, "anthropic/claude-3-haiku-20240307"));
    }

    #[test]
    fn exact_pattern_matches_only_itself() {
        let pats = patterns(&["openai/gpt-4o"]);
        assert!(is_model_allowed(&pats, "openai/gpt-4o"));
        assert!(!is_model_allowed(&pats, "openai/gpt-4o-mini"));
    }

    #[test]
    fn model_wildcard_crosses_the_slash() {
        let pats = patterns(&["*/gpt-4*"]);
        assert!(is_model_allowed(&pats, "openai/gpt-4o"));
        assert!(is_model_allowed(&pats, "openai/gpt-4-turbo"));
        assert!(!is_model_allowed(&pats, "openai/o1-mini"));
    }

    #[test]
    fn question_mark_matches_one_character() {
        let pats = patterns(&["openai/gpt-?"]);
        assert!(is_model_allowed(&pats, "openai/gpt-4"));
        assert!(!is_model_allowed(&pats, "openai/gpt-40"));
    }

    #[test]
    fn any_matching_pattern_in_the_list_admits() {
        let pats = patterns(&["anthropic/*", "openai/gpt-4o"]);
        assert!(is_model_allowed(&pats, "openai/gpt-4o"));
        assert!(is_model_allowed(&pats, "anthropic/claude-3-opus-20240229"));
        assert!(!is_model_allowed(&pats, "openai/o1"));
    }

    #[test]
    fn trailing_star_falls_back_to_literal_prefix() {
        // `?` here is a literal question mark for the prefix fallback.
        assert!(matches_pattern("openai/gpt*", "openai/gpt-4o"));
        assert!(matches_pattern("a*", "anything"));
        assert!(!matches_pattern("b*", "anything"));
    }
}
