use std::sync::OnceLock;

use regex::Regex;

use crate::models::{ContentStats, HeadingCounts, Post};

pub const MAX_BODY_CHARS: usize = 2000;
pub const TRUNCATION_MARKER: &str = "...";

/// Everything the prompt and the heuristics need to know about one post.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub post_id: i64,
    pub title: String,
    pub excerpt: Option<String>,
    /// Plain text, cut to `MAX_BODY_CHARS`.
    pub body: String,
    pub stats: ContentStats,
}

pub fn prepare(post: &Post, site_url: &str) -> AnalysisRequest {
    let text = strip_html(&post.content);
    let lower = post.content.to_lowercase();
    let (internal_links, external_links) = count_links(&post.content, site_url);

    let stats = ContentStats {
        word_count: text.split_whitespace().count() as u32,
        title_length: post.title.trim().chars().count() as u32,
        image_count: lower.matches("<img").count() as u32,
        internal_links,
        external_links,
        headings: count_headings(&lower),
    };

    AnalysisRequest {
        post_id: post.id,
        title: post.title.trim().to_string(),
        excerpt: post
            .excerpt
            .as_deref()
            .map(strip_html)
            .filter(|e| !e.is_empty()),
        body: truncate_chars(&text, MAX_BODY_CHARS),
        stats,
    }
}

pub fn strip_html(html: &str) -> String {
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    static WS_RE: OnceLock<Regex> = OnceLock::new();
    let script_re = SCRIPT_RE
        .get_or_init(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)>").unwrap());
    let tag_re = TAG_RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap());
    let ws_re = WS_RE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let without_scripts = script_re.replace_all(html, " ");
    let without_tags = tag_re.replace_all(&without_scripts, " ");
    let decoded = decode_entities(&without_tags);
    ws_re.replace_all(&decoded, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&hellip;", "…")
        .replace("&mdash;", "—")
        .replace("&ndash;", "–")
        .replace("&amp;", "&")
}

/// Cuts at a char boundary and appends the marker when anything was dropped.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}{}", cut.trim_end(), TRUNCATION_MARKER)
    }
}

/// Substring counting on purpose: `<h2 class="x">` and unclosed tags still count.
fn count_headings(lower_html: &str) -> HeadingCounts {
    let count = |level: u8| lower_html.matches(&format!("<h{}", level)).count() as u32;
    HeadingCounts {
        h1: count(1),
        h2: count(2),
        h3: count(3),
        h4: count(4),
        h5: count(5),
        h6: count(6),
    }
}

fn count_links(html: &str, site_url: &str) -> (u32, u32) {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']*)["']"#).unwrap());
    let origin = origin_of(site_url);
    let mut internal = 0;
    let mut external = 0;
    for caps in re.captures_iter(html) {
        match classify_href(caps[1].trim(), origin.as_deref()) {
            Some(LinkKind::Internal) => internal += 1,
            Some(LinkKind::External) => external += 1,
            None => {}
        }
    }
    (internal, external)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Internal,
    External,
}

pub fn classify_href(href: &str, origin: Option<&str>) -> Option<LinkKind> {
    let lower = href.to_lowercase();
    if lower.is_empty()
        || lower.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("javascript:")
    {
        return None;
    }
    if lower.starts_with("//") {
        let absolute = format!("https:{}", lower);
        return Some(match origin {
            Some(o) if same_origin(&absolute, o) => LinkKind::Internal,
            _ => LinkKind::External,
        });
    }
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(match origin {
            Some(o) if same_origin(&lower, o) => LinkKind::Internal,
            _ => LinkKind::External,
        });
    }
    // relative paths stay on the site
    Some(LinkKind::Internal)
}

/// Scheme-less lowercase host[:port], e.g. `example.com`.
fn origin_of(site_url: &str) -> Option<String> {
    let lower = site_url.trim().to_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host.trim_start_matches("www.").to_string())
    }
}

fn same_origin(absolute_lower: &str, origin: &str) -> bool {
    origin_of(absolute_lower).is_some_and(|host| host == origin)
}
