use crate::content::AnalysisRequest;

pub const SYSTEM_PROMPT: &str = "You are a professional SEO analyst. Always return valid JSON that matches the requested schema, with no commentary outside the JSON.";

const RESPONSE_SCHEMA: &str = r#"{
  "keywords": {
    "primary": ["3-5 core keywords"],
    "secondary": ["5-8 supporting keywords"]
  },
  "scores": {
    "overall": 0-100,
    "title": 0-100,
    "content": 0-100,
    "keyword": 0-100,
    "readability": 0-100
  },
  "analysis": {
    "title_analysis": "assessment of the title",
    "content_analysis": "assessment of the content quality and structure",
    "keyword_analysis": "assessment of keyword usage and density",
    "readability_analysis": "assessment of readability"
  },
  "recommendations": [
    {
      "title": "short name of the improvement",
      "description": "what is wrong and why it matters",
      "action": "the concrete change to make",
      "impact": "high|medium|low"
    }
  ],
  "meta_info": {
    "suggested_title": "an improved SEO title",
    "suggested_description": "a meta description of 120-160 characters",
    "focus_keywords": ["keyword"]
  }
}"#;

pub fn build_prompt(req: &AnalysisRequest) -> String {
    let stats = &req.stats;
    let headings = &stats.headings;
    let excerpt = req.excerpt.as_deref().unwrap_or("(none)");

    format!(
        r#"You are a professional SEO analyst. Analyze the following article and produce a detailed SEO assessment.

## Article
Title: {title}
Existing summary: {excerpt}

Content:
{body}

## Statistics
- Word count: {words}
- Title length: {title_len} characters
- Images: {images}
- Internal links: {internal}
- External links: {external}
- Headings: H1={h1}, H2={h2}, H3={h3}, H4={h4}, H5={h5}, H6={h6}

## Required output
Return the analysis as JSON with exactly this structure:

{schema}

Rules:
1. Every score is a number between 0 and 100.
2. Give between 3 and 8 recommendations, ordered by impact.
3. Return JSON only, inside a ```json fenced code block, nothing else."#,
        title = req.title,
        excerpt = excerpt,
        body = req.body,
        words = stats.word_count,
        title_len = stats.title_length,
        images = stats.image_count,
        internal = stats.internal_links,
        external = stats.external_links,
        h1 = headings.h1,
        h2 = headings.h2,
        h3 = headings.h3,
        h4 = headings.h4,
        h5 = headings.h5,
        h6 = headings.h6,
        schema = RESPONSE_SCHEMA,
    )
}
