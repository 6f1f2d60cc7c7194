//! Parsing of `ANSWER:` / `MISSING` shaped model responses into answer text
//! and gap descriptions, plus gap classification helpers.

use std::sync::LazyLock;

use regex::Regex;

static ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)ANSWER:").unwrap());

static MISSING_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^[ \t]*MISSING[^\n:]*:").unwrap());

static NONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^NONE\b").unwrap());

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

const SYMBOL_KEYWORDS: &[&str] = &["function", "class", "method", "def"];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "about", "are", "be", "body", "by", "call", "called", "calls", "class",
    "code", "context", "def", "definition", "detail", "details", "do", "does", "exact", "file",
    "for", "from", "function", "how", "implementation", "in", "information", "is", "it", "its",
    "method", "missing", "module", "more", "need", "of", "on", "or", "source", "that", "the",
    "this", "to", "used", "uses", "what", "where", "which", "with",
];

/// Answer text plus the gaps the model reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub answer: String,
    pub gaps: Vec<String>,
}

pub fn parse_response(text: &str) -> ParsedResponse {
    ParsedResponse {
        answer: parse_answer(text),
        gaps: parse_gaps(text),
    }
}

/// Text between `ANSWER:` and the `MISSING...:` section header.
///
/// Without a header, everything after `ANSWER:`; without `ANSWER:`, the
/// whole response.
pub fn parse_answer(text: &str) -> String {
    let Some(marker) = ANSWER_RE.find(text) else {
        return text.trim().to_string();
    };
    let rest = &text[marker.end()..];
    let body = match MISSING_SECTION_RE.find(rest) {
        Some(header) => &rest[..header.start()],
        None => rest,
    };
    body.trim().to_string()
}

/// Gap lines of the `MISSING...:` section, in order. A body beginning with
/// `NONE` yields no gaps, as does a response without the section.
pub fn parse_gaps(text: &str) -> Vec<String> {
    let Some(header) = MISSING_SECTION_RE.find(text) else {
        return Vec::new();
    };
    let body = text[header.end()..].trim();
    if NONE_RE.is_match(body) {
        return Vec::new();
    }
    body.lines()
        .map(|line| line.trim_start_matches(|c: char| c == '-' || c.is_whitespace()).trim_end())
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("none"))
        .map(str::to_string)
        .collect()
}

/// Whether a gap names something concrete enough for a graph lookup.
pub fn is_specific_gap(gap: &str) -> bool {
    gap.contains("::")
        || gap.contains(" in ")
        || IDENT_RE
            .find_iter(gap)
            .any(|m| SYMBOL_KEYWORDS.iter().any(|k| m.as_str().eq_ignore_ascii_case(k)))
}

/// Best-effort symbol name mentioned by a gap.
pub fn extract_node_name(gap: &str) -> Option<String> {
    let gap = gap.trim();
    if let Some(idx) = gap.rfind("::") {
        if let Some(m) = IDENT_RE.find(&gap[idx + 2..]) {
            return Some(m.as_str().to_string());
        }
    }
    if let Some(idx) = gap.find(" in ") {
        let before = gap[..idx].trim().trim_matches(|c: char| c == '`' || c == '"' || c == '\'');
        if let Some(m) = IDENT_RE.find(before) {
            if m.start() == 0 && m.end() == before.len() {
                return Some(m.as_str().to_string());
            }
        }
        if let Some(name) = name_from_words(before) {
            return Some(name);
        }
    }
    name_from_words(gap)
}

/// Keyword rule (`function foo`) then the first non-stopword identifier.
fn name_from_words(text: &str) -> Option<String> {
    let tokens: Vec<&str> = IDENT_RE.find_iter(text).map(|m| m.as_str()).collect();
    for pair in tokens.windows(2) {
        if SYMBOL_KEYWORDS.iter().any(|k| pair[0].eq_ignore_ascii_case(k)) {
            return Some(pair[1].to_string());
        }
    }
    tokens
        .into_iter()
        .find(|t| !STOPWORDS.contains(&t.to_lowercase().as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NONE_RESPONSE: &str = "ANSWER:\nfoo bar\n\nMISSING (or \"NONE\" if nothing needed):\nNONE";

    #[test]
    fn answer_stops_at_missing_header() {
        assert_eq!(parse_answer(NONE_RESPONSE), "foo bar");
        assert!(parse_gaps(NONE_RESPONSE).is_empty());
    }

    #[test]
    fn answer_without_markers_is_whole_text() {
        assert_eq!(parse_answer("  just prose  "), "just prose");
        assert_eq!(parse_answer("answer: lower case\nmore"), "lower case\nmore");
        assert!(parse_gaps("just prose").is_empty());
    }

    #[test]
    fn gaps_strip_bullets_and_stray_none() {
        let text = "ANSWER:\nPartial.\n\nmissing:\n- helper in utils.py\n\n  -  app/db.py::get_db  \nnone\n";
        assert_eq!(parse_answer(text), "Partial.");
        assert_eq!(
            parse_gaps(text),
            vec!["helper in utils.py".to_string(), "app/db.py::get_db".to_string()]
        );
    }

    #[test]
    fn missing_word_inside_answer_is_not_a_header() {
        let text = "ANSWER:\nThe MISSING key is handled.\nMISSING:\n- loader in cfg.py";
        assert_eq!(parse_answer(text), "The MISSING key is handled.");
        assert_eq!(parse_gaps(text), vec!["loader in cfg.py".to_string()]);
    }

    #[test]
    fn answer_line_starting_with_missing_is_kept() {
        let text = "ANSWER:\nLoads the config.\nMissing values are defaulted.\n\nMISSING:\nNONE";
        assert_eq!(parse_answer(text), "Loads the config.\nMissing values are defaulted.");
        assert!(parse_gaps(text).is_empty());

        let no_section = "ANSWER:\nMissing keys raise KeyError.";
        assert_eq!(parse_answer(no_section), "Missing keys raise KeyError.");
    }

    #[test]
    fn specificity() {
        assert!(is_specific_gap("verify_token in auth/verify.py"));
        assert!(is_specific_gap("auth/verify.py::verify_token"));
        assert!(is_specific_gap("the Function that parses config"));
        assert!(!is_specific_gap("the database connection handler"));
        assert!(!is_specific_gap("definitions of inbound routes"));
    }

    #[test]
    fn node_name_extraction_rules() {
        assert_eq!(extract_node_name("auth/verify.py::verify_token()").as_deref(), Some("verify_token"));
        assert_eq!(extract_node_name("helper in utils.py").as_deref(), Some("helper"));
        assert_eq!(extract_node_name("`helper` in utils.py").as_deref(), Some("helper"));
        assert_eq!(extract_node_name("the function load_config").as_deref(), Some("load_config"));
        assert_eq!(extract_node_name("the load_config function in cfg.py").as_deref(), Some("load_config"));
        assert_eq!(extract_node_name("the database connection handler").as_deref(), Some("database"));
        assert_eq!(extract_node_name("how is it used?"), None);
    }

    proptest! {
        #[test]
        fn rendered_gap_lists_round_trip(
            gaps in prop::collection::vec("[a-z_][a-z0-9_./: ]{0,30}[a-z0-9_]", 0..8)
                .prop_filter("no bare none lines", |gs| gs.iter().all(|g| !g.eq_ignore_ascii_case("none"))),
        ) {
            let body: Vec<String> = gaps.iter().map(|g| format!("- {g}")).collect();
            let text = format!("ANSWER:\nsomething\n\nMISSING (or \"NONE\" if nothing needed):\n{}", body.join("\n"));
            prop_assert_eq!(parse_gaps(&text), gaps);
        }
    }
}
