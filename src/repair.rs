//! Pulls a JSON object out of an LLM completion and patches the usual damage:
//! token-limit truncation, raw control characters, bare values, trailing commas.
//!
//! Every repair step walks the text with string-literal tracking, so braces,
//! colons and commas inside quoted values are left alone.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{error::Category, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::client::excerpt;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("no JSON object found in completion")]
    Extraction,
    #[error("JSON still invalid after repair: {category} error at line {line}, column {column} ({payload_len} bytes)")]
    Repair {
        category: &'static str,
        line: usize,
        column: usize,
        payload_len: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Ok { value: Value, repaired: bool },
    Degraded(ParseFailure),
}

/// Never fails: anything unusable comes back as `Parsed::Degraded`.
pub fn parse_completion(raw: &str) -> Parsed {
    match try_parse(raw) {
        Ok((value, repaired)) => Parsed::Ok { value, repaired },
        Err(e) => Parsed::Degraded(e),
    }
}

pub fn try_parse(raw: &str) -> Result<(Value, bool), ParseFailure> {
    let candidates = extract_candidates(raw);
    let Some(&payload) = candidates.first() else {
        warn!(
            raw_len = raw.len(),
            raw_excerpt = %excerpt(raw, 200),
            "no JSON object in completion"
        );
        return Err(ParseFailure::Extraction);
    };

    if let Ok(value) = serde_json::from_str::<Value>(payload) {
        return Ok((value, false));
    }

    let mut first_failure = None;
    for (attempt, candidate) in candidates.iter().enumerate() {
        let repaired = repair(candidate);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(value) => {
                debug!(
                    attempt,
                    original_len = candidate.len(),
                    repaired_len = repaired.len(),
                    "completion JSON repaired"
                );
                return Ok((value, true));
            }
            Err(e) if first_failure.is_none() => first_failure = Some((e, repaired)),
            Err(_) => {}
        }
    }

    let Some((e, repaired)) = first_failure else {
        return Err(ParseFailure::Extraction);
    };
    let category = category_name(e.classify());
    warn!(
        error = %e,
        category,
        line = e.line(),
        column = e.column(),
        payload_len = repaired.len(),
        payload = %repaired,
        candidates = candidates.len(),
        "completion JSON could not be repaired"
    );
    Err(ParseFailure::Repair {
        category,
        line: e.line(),
        column: e.column(),
        payload_len: repaired.len(),
    })
}

fn category_name(c: Category) -> &'static str {
    match c {
        Category::Io => "io",
        Category::Syntax => "syntax",
        Category::Data => "data",
        Category::Eof => "eof",
    }
}

// ── Stage A: extraction ──

/// The first payload candidate; see `extract_candidates`.
pub fn extract_payload(raw: &str) -> Option<&str> {
    extract_candidates(raw).into_iter().next()
}

/// Payload candidates in the order they are tried. A closed ```json fence
/// wins, then an unclosed one (truncated reply), then the widest `{ ... }`
/// span. An unbalanced span yields everything after the first brace first,
/// then the span itself, for replies where the tail is only trailing prose.
pub fn extract_candidates(raw: &str) -> Vec<&str> {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    static OPEN_FENCE: OnceLock<Regex> = OnceLock::new();
    let fence =
        FENCE.get_or_init(|| Regex::new(r"(?s)```(?i:json)[ \t]*\r?\n?(.*?)```").unwrap());
    let open_fence =
        OPEN_FENCE.get_or_init(|| Regex::new(r"(?s)```(?i:json)[ \t]*\r?\n?(.*)$").unwrap());

    let scope = fence
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .filter(|m| m.as_str().contains('{'))
        .or_else(|| {
            open_fence
                .captures(raw)
                .and_then(|caps| caps.get(1))
                .filter(|m| m.as_str().contains('{'))
        })
        .map(|m| m.as_str())
        .unwrap_or(raw);
    brace_candidates(scope)
}

fn brace_candidates(text: &str) -> Vec<&str> {
    let Some(start) = text.find('{') else {
        return Vec::new();
    };
    let span = text
        .rfind('}')
        .filter(|&end| end > start)
        .map(|end| &text[start..=end]);
    if let Some(balanced) = span.filter(|s| open_depth(s) == 0) {
        return vec![balanced];
    }

    let tail = text[start..].trim_end();
    let tail = tail.strip_suffix("```").unwrap_or(tail).trim_end();
    let mut out = vec![tail];
    if let Some(span) = span.filter(|s| *s != tail) {
        out.push(span);
    }
    out
}

/// `{` minus `}` outside string literals.
fn open_depth(text: &str) -> i64 {
    let mut depth = 0i64;
    let mut lexer = Lexer::default();
    for c in text.chars() {
        if lexer.feed(c) {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
        }
    }
    depth
}

// ── Stage C: repair ──

pub fn repair(payload: &str) -> String {
    let text = sanitize_control_chars(payload);
    let text = close_unterminated_string(&text);
    let text = drop_dangling_key(&text);
    let text = quote_bare_values(&text);
    let text = balance_delimiters(&text);
    remove_trailing_commas(&text)
}

/// Tracks whether the current char sits inside a string literal.
#[derive(Debug, Default, Clone, Copy)]
struct Lexer {
    in_string: bool,
    escaped: bool,
}

impl Lexer {
    /// Advances over `c`; true when `c` is structural (outside any string,
    /// opening quote excluded).
    fn feed(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            false
        } else if c == '"' {
            self.in_string = true;
            false
        } else {
            true
        }
    }
}

fn is_control(c: char) -> bool {
    (c as u32) < 0x20
}

/// Raw newlines/tabs inside strings become escapes; other control chars go.
pub fn sanitize_control_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
                match c {
                    '\n' => out.push('n'),
                    '\r' => out.push('r'),
                    '\t' => out.push('t'),
                    c if is_control(c) => {
                        out.pop();
                    }
                    c => out.push(c),
                }
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if is_control(c) => {}
                c => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                '\n' | '\r' | '\t' => out.push(c),
                c if is_control(c) => {}
                c => out.push(c),
            }
        }
    }
    out
}

pub fn close_unterminated_string(input: &str) -> String {
    let mut lexer = Lexer::default();
    for c in input.chars() {
        lexer.feed(c);
    }
    if !lexer.in_string {
        return input.to_string();
    }
    let mut out = input.to_string();
    if lexer.escaped {
        out.pop();
    }
    out.push('"');
    out
}

/// Drops an object key the reply was cut off after, e.g. `{"a": 1, "b"`.
pub fn drop_dangling_key(input: &str) -> String {
    let trimmed = input.trim_end();
    if !trimmed.ends_with('"') {
        return input.to_string();
    }

    let mut lexer = Lexer::default();
    let mut containers: Vec<char> = Vec::new();
    let mut last_literal: Option<(usize, Option<char>)> = None;
    for (i, c) in trimmed.char_indices() {
        let was_in_string = lexer.in_string;
        let structural = lexer.feed(c);
        if !was_in_string && lexer.in_string {
            last_literal = Some((i, containers.last().copied()));
        }
        if structural {
            match c {
                '{' | '[' => containers.push(c),
                '}' | ']' => {
                    containers.pop();
                }
                _ => {}
            }
        }
    }

    let Some((start, Some('{'))) = last_literal else {
        return input.to_string();
    };
    let before = trimmed[..start].trim_end();
    if before.ends_with('{') || before.ends_with(',') {
        before.to_string()
    } else {
        input.to_string()
    }
}

/// Quotes bare words after `:` (`"impact": high` → `"impact": "high"`) and
/// fills a dangling `:` with `null`.
pub fn quote_bare_values(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut lexer = Lexer::default();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let structural = lexer.feed(c);
        out.push(c);
        i += 1;
        if !structural || c != ':' {
            continue;
        }

        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j == chars.len() {
            out.push_str(" null");
            i = j;
            continue;
        }
        if !(chars[j].is_alphabetic() || chars[j] == '_') {
            continue;
        }

        let start = j;
        while j < chars.len() && !matches!(chars[j], ',' | '}' | ']' | '\n' | '\r') {
            j += 1;
        }
        out.extend(&chars[i..start]);
        let token: String = chars[start..j].iter().collect();
        let word = token.trim_end();
        if matches!(word, "true" | "false" | "null") {
            out.push_str(word);
        } else {
            out.push('"');
            out.push_str(&word.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        }
        out.push_str(&token[word.len()..]);
        i = j;
    }
    out
}

/// Appends the `}` / `]` closers still owed, innermost first.
pub fn balance_delimiters(input: &str) -> String {
    let mut lexer = Lexer::default();
    let mut owed: Vec<char> = Vec::new();
    for c in input.chars() {
        if !lexer.feed(c) {
            continue;
        }
        match c {
            '{' => owed.push('}'),
            '[' => owed.push(']'),
            '}' | ']' => {
                if owed.last() == Some(&c) {
                    owed.pop();
                }
            }
            _ => {}
        }
    }
    let mut out = input.trim_end().to_string();
    while let Some(closer) = owed.pop() {
        out.push(closer);
    }
    out
}

pub fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut lexer = Lexer::default();
    for (i, &c) in chars.iter().enumerate() {
        let structural = lexer.feed(c);
        if structural && c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, None | Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
    }

    #[test]
    fn fenced_block_parses_without_repair() {
        let raw = fixture("fenced.txt");
        let (value, repaired) = try_parse(&raw).unwrap();
        assert!(!repaired);
        assert_eq!(value["scores"]["overall"], json!(82));
        assert_eq!(value["keywords"]["primary"][0], json!("rust ownership"));
    }

    #[test]
    fn well_formed_payload_round_trips() {
        let original = json!({
            "scores": {"overall": 90, "title": 80, "content": 75, "keyword": 60, "readability": 88},
            "analysis": {"title_analysis": "Braces {like} these stay put"},
            "recommendations": [{"title": "a", "description": "b", "action": "c", "impact": "low"}]
        });
        let raw = format!("Sure! Here it is:\n```json\n{}\n```\nAnything else?", original);
        assert_eq!(
            parse_completion(&raw),
            Parsed::Ok { value: original, repaired: false }
        );
    }

    #[test]
    fn prose_wrapped_object_uses_brace_span() {
        let raw = fixture("prose_wrapped.txt");
        let (value, repaired) = try_parse(&raw).unwrap();
        assert!(!repaired);
        assert_eq!(value["scores"]["title"], json!(71));
    }

    #[test]
    fn truncated_fixture_is_recovered() {
        let raw = fixture("truncated.txt");
        let (value, repaired) = try_parse(&raw).unwrap();
        assert!(repaired);
        assert_eq!(value["scores"]["readability"], json!(77));
        let recs = value["recommendations"].as_array().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1]["title"], json!("Add internal links"));
    }

    #[test]
    fn missing_closing_braces_are_balanced() {
        let full = r#"{"scores": {"overall": 80, "detail": {"title": 70, "meta": {"len": 3}}}}"#;
        for missing in 1..=3 {
            let cut = &full[..full.len() - missing];
            let (value, repaired) = try_parse(cut).unwrap();
            assert!(repaired, "missing {} braces", missing);
            assert_eq!(value["scores"]["detail"]["meta"]["len"], json!(3));
        }
    }

    #[test]
    fn unbalanced_object_followed_by_prose_is_recovered() {
        let raw = "Here you go:\n{\"scores\": {\"overall\": 88, \"title\": 80}\nHope this helps!";
        let candidates = extract_candidates(raw);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].ends_with("Hope this helps!"));
        assert_eq!(candidates[1], r#"{"scores": {"overall": 88, "title": 80}"#);

        let (value, repaired) = try_parse(raw).unwrap();
        assert!(repaired);
        assert_eq!(value["scores"]["overall"], json!(88));
        assert_eq!(value["scores"]["title"], json!(80));
    }

    #[test]
    fn balanced_span_is_the_only_candidate() {
        let raw = "Result: {\"scores\": {\"overall\": 70}} done";
        assert_eq!(extract_candidates(raw), vec![r#"{"scores": {"overall": 70}}"#]);
    }

    #[test]
    fn no_brace_means_extraction_failure() {
        assert_eq!(
            parse_completion("I'm sorry, I cannot analyze this article."),
            Parsed::Degraded(ParseFailure::Extraction)
        );
    }

    #[test]
    fn hopeless_payload_degrades() {
        match parse_completion("{\"scores\": [1, 2 3 4 :: }") {
            Parsed::Degraded(ParseFailure::Repair { payload_len, .. }) => assert!(payload_len > 0),
            other => panic!("expected repair failure, got {:?}", other),
        }
    }

    #[test]
    fn raw_newlines_inside_strings_are_escaped() {
        let payload = "{\"a\": \"line one\nline two\ttabbed\", \"b\": 1}";
        let (value, repaired) = try_parse(payload).unwrap();
        assert!(repaired);
        assert_eq!(value["a"], json!("line one\nline two\ttabbed"));
    }

    #[test]
    fn control_chars_dropped_but_unicode_kept() {
        let payload = "{\"a\": \"内容\u{0007}优化 ✓\"}\u{0001}";
        assert_eq!(sanitize_control_chars(payload), "{\"a\": \"内容优化 ✓\"}");
    }

    #[test]
    fn closes_string_cut_mid_value() {
        let payload = r#"{"analysis": {"title_analysis": "The title is too sh"#;
        let (value, _) = try_parse(payload).unwrap();
        assert_eq!(value["analysis"]["title_analysis"], json!("The title is too sh"));
    }

    #[test]
    fn drops_key_cut_before_colon() {
        assert_eq!(drop_dangling_key(r#"{"a": 1, "secon"#), r#"{"a": 1, "secon"#);
        assert_eq!(drop_dangling_key(r#"{"a": 1, "secon""#), r#"{"a": 1,"#);
        assert_eq!(drop_dangling_key(r#"["a", "b""#), r#"["a", "b""#);
        assert_eq!(drop_dangling_key(r#"{"a": "b""#), r#"{"a": "b""#);
    }

    #[test]
    fn dangling_colon_becomes_null() {
        let (value, _) = try_parse(r#"{"a": 1, "b": "#).unwrap();
        assert_eq!(value, json!({"a": 1, "b": null}));
    }

    #[test]
    fn quotes_bare_words_only() {
        assert_eq!(
            quote_bare_values(r#"{"impact": high priority, "n": 5, "ok": true, "s": "x: y"}"#),
            r#"{"impact": "high priority", "n": 5, "ok": true, "s": "x: y"}"#
        );
    }

    #[test]
    fn trailing_commas_removed_outside_strings() {
        assert_eq!(
            remove_trailing_commas(r#"{"a": [1, 2, ], "b": "x, }", }"#),
            r#"{"a": [1, 2 ], "b": "x, }" }"#
        );
    }

    #[test]
    fn balances_mixed_containers() {
        assert_eq!(balance_delimiters(r#"{"a": [{"b": 1"#), r#"{"a": [{"b": 1}]}"#);
        assert_eq!(balance_delimiters(r#"{"a": "}}"}"#), r#"{"a": "}}"}"#);
        assert_eq!(balance_delimiters(r#"{"a": "{{""#), r#"{"a": "{{"}"#);
    }
}
