use serde::{Deserialize, Serialize};

pub const ANALYSIS_TYPE_SEO: &str = "seo";

/// A content record as handed to the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub excerpt: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub overall: f64,
    pub title: f64,
    pub content: f64,
    pub keyword: f64,
    pub readability: f64,
}

impl Scores {
    pub fn uniform(value: f64) -> Self {
        Scores {
            overall: value,
            title: value,
            content: value,
            keyword: value,
            readability: value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub title_analysis: String,
    pub content_analysis: String,
    pub keyword_analysis: String,
    pub readability_analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub action: String,
    pub impact: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaSuggestions {
    pub suggested_title: String,
    pub suggested_description: String,
    pub focus_keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingCounts {
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
    pub h4: u32,
    pub h5: u32,
    pub h6: u32,
}

impl HeadingCounts {
    pub fn total(&self) -> u32 {
        self.h1 + self.h2 + self.h3 + self.h4 + self.h5 + self.h6
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStats {
    pub word_count: u32,
    pub title_length: u32,
    pub image_count: u32,
    pub internal_links: u32,
    pub external_links: u32,
    pub headings: HeadingCounts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Complete,
    Degraded,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Complete => "complete",
            AnalysisStatus::Degraded => "degraded",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "degraded" => AnalysisStatus::Degraded,
            "failed" => AnalysisStatus::Failed,
            _ => AnalysisStatus::Complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub post_id: i64,
    pub analysis_type: String,
    pub status: AnalysisStatus,
    pub scores: Scores,
    pub narrative: Narrative,
    pub recommendations: Vec<Recommendation>,
    pub primary_keywords: Vec<String>,
    pub secondary_keywords: Vec<String>,
    pub meta: MetaSuggestions,
    pub stats: ContentStats,
    pub provider: String,
    pub model: String,
    /// Wall-clock seconds spent in the pipeline.
    pub analysis_time: f64,
    pub raw_response: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}
