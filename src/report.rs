use itertools::Itertools;
use serde_json::Value;

use crate::models::{MetaSuggestions, Narrative, Recommendation, Scores};

pub const DEFAULT_AI_SCORE: f64 = 70.0;
pub const DEGRADED_SCORE: f64 = 70.0;
pub const FAILED_SCORE: f64 = 60.0;

/// What the model said, normalized into typed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct AiReport {
    pub scores: Scores,
    pub narrative: Narrative,
    pub recommendations: Vec<Recommendation>,
    pub primary_keywords: Vec<String>,
    pub secondary_keywords: Vec<String>,
    pub meta: MetaSuggestions,
}

impl AiReport {
    pub fn from_value(value: &Value) -> AiReport {
        let scores = &value["scores"];
        let analysis = &value["analysis"];
        let meta = &value["meta_info"];
        let (primary_keywords, secondary_keywords) = keywords(value);

        AiReport {
            scores: Scores {
                overall: score(&scores["overall"]),
                title: score(&scores["title"]),
                content: score(&scores["content"]),
                keyword: score(&scores["keyword"]),
                readability: score(&scores["readability"]),
            },
            narrative: Narrative {
                title_analysis: text(&analysis["title_analysis"]),
                content_analysis: text(&analysis["content_analysis"]),
                keyword_analysis: text(&analysis["keyword_analysis"]),
                readability_analysis: text(&analysis["readability_analysis"]),
            },
            recommendations: recommendations(&value["recommendations"]),
            primary_keywords,
            secondary_keywords,
            meta: MetaSuggestions {
                suggested_title: text(&meta["suggested_title"]),
                suggested_description: text(&meta["suggested_description"]),
                focus_keywords: string_list(&meta["focus_keywords"]),
            },
        }
    }

    /// Stand-in when the completion could not be parsed or repaired.
    pub fn degraded() -> AiReport {
        let note = "AI response parsing failed; this is a placeholder result.".to_string();
        AiReport {
            scores: Scores::uniform(DEGRADED_SCORE),
            narrative: Narrative {
                title_analysis: note.clone(),
                content_analysis: note.clone(),
                keyword_analysis: note.clone(),
                readability_analysis: note,
            },
            recommendations: vec![Recommendation {
                title: "Re-run the analysis".to_string(),
                description: "The AI response could not be parsed, so these scores are placeholders.".to_string(),
                action: "Run the analysis again; if it keeps failing, lower max_tokens or check the logs for the raw payload.".to_string(),
                impact: "high".to_string(),
            }],
            primary_keywords: Vec::new(),
            secondary_keywords: Vec::new(),
            meta: MetaSuggestions::default(),
        }
    }

    /// Stand-in when the API call itself failed.
    pub fn failed(reason: &str) -> AiReport {
        let note = format!("AI analysis unavailable: {}", reason);
        AiReport {
            scores: Scores::uniform(FAILED_SCORE),
            narrative: Narrative {
                title_analysis: note.clone(),
                content_analysis: note.clone(),
                keyword_analysis: note.clone(),
                readability_analysis: note,
            },
            recommendations: vec![Recommendation {
                title: "Check the AI configuration".to_string(),
                description: "The analysis service could not be reached or rejected the request.".to_string(),
                action: "Verify api_key, api_base and model with `seokit config show`, then retry.".to_string(),
                impact: "high".to_string(),
            }],
            primary_keywords: Vec::new(),
            secondary_keywords: Vec::new(),
            meta: MetaSuggestions::default(),
        }
    }
}

/// Numbers or numeric strings, clamped to 0..=100; anything else is the default.
fn score(v: &Value) -> f64 {
    let raw = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(x) if x.is_finite() => x.clamp(0.0, 100.0),
        _ => DEFAULT_AI_SCORE,
    }
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn string_list(v: &Value) -> Vec<String> {
    let items: Vec<String> = match v {
        Value::Array(arr) => arr.iter().map(text).collect(),
        Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    items.into_iter().filter(|s| !s.is_empty()).unique().collect()
}

/// Accepts `{"primary": [..], "secondary": [..]}`, a flat array (first three
/// are primary), or top-level `primary_keywords` / `secondary_keywords`.
fn keywords(value: &Value) -> (Vec<String>, Vec<String>) {
    match &value["keywords"] {
        Value::Object(_) => (
            string_list(&value["keywords"]["primary"]),
            string_list(&value["keywords"]["secondary"]),
        ),
        flat @ Value::Array(_) => {
            let mut all = string_list(flat);
            let rest = all.split_off(all.len().min(3));
            (all, rest)
        }
        _ => (
            string_list(&value["primary_keywords"]),
            string_list(&value["secondary_keywords"]),
        ),
    }
}

fn recommendations(v: &Value) -> Vec<Recommendation> {
    let Value::Array(items) = v else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Some(Recommendation {
                title: s.trim().to_string(),
                description: String::new(),
                action: String::new(),
                impact: "medium".to_string(),
            }),
            Value::Object(_) => {
                let title = text(&item["title"]);
                let description = text(&item["description"]);
                if title.is_empty() && description.is_empty() {
                    return None;
                }
                Some(Recommendation {
                    title,
                    description,
                    action: text(&item["action"]),
                    impact: normalize_impact(&text(&item["impact"])),
                })
            }
            _ => None,
        })
        .collect()
}

fn normalize_impact(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("high") || lower.contains("critical") {
        "high"
    } else if lower.contains("low") || lower.contains("minor") {
        "low"
    } else {
        "medium"
    }
    .to_string()
}
