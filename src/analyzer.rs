use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::client::{excerpt, Completer};
use crate::content::prepare;
use crate::db::ContentSource;
use crate::models::{AnalysisResult, AnalysisStatus, Post, ANALYSIS_TYPE_SEO};
use crate::prompt::build_prompt;
use crate::repair::{parse_completion, Parsed};
use crate::report::AiReport;
use crate::scoring::{blend, heuristic_scores};
use crate::store::AnalysisStore;

#[derive(Debug, Clone)]
pub struct SeoAnalyzer {
    site_url: String,
    store_raw_response: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub saved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub complete: usize,
    pub degraded: usize,
    pub failed: usize,
    /// Ids that had no post behind them.
    pub missing: Vec<i64>,
    /// Ids left untouched because the time ceiling was near.
    pub remaining: Vec<i64>,
    pub stopped_early: bool,
    pub elapsed_secs: f64,
}

impl SeoAnalyzer {
    pub fn new(site_url: &str, store_raw_response: bool) -> Self {
        SeoAnalyzer {
            site_url: site_url.to_string(),
            store_raw_response,
        }
    }

    /// Runs every stage for one post. Never fails: API errors and unparseable
    /// replies come back as placeholder results with a non-complete status.
    pub fn analyze(&self, post: &Post, client: &dyn Completer) -> AnalysisResult {
        let started = Instant::now();
        let req = prepare(post, &self.site_url);
        let heuristic = heuristic_scores(&req.stats);
        let prompt = build_prompt(&req);

        let mut raw_response = None;
        let (status, report, scores) = match client.complete(&prompt) {
            Err(e) => {
                error!(post_id = post.id, error = %e, "AI request failed");
                let report = AiReport::failed(&e.to_string());
                let scores = report.scores;
                (AnalysisStatus::Failed, report, scores)
            }
            Ok(raw) => {
                let parsed = parse_completion(&raw);
                if self.store_raw_response {
                    raw_response = Some(raw.clone());
                }
                match parsed {
                    Parsed::Ok { value, repaired } => {
                        if repaired {
                            info!(post_id = post.id, "AI response needed repair");
                        }
                        let report = AiReport::from_value(&value);
                        let scores = blend(&report.scores, &heuristic);
                        (AnalysisStatus::Complete, report, scores)
                    }
                    Parsed::Degraded(e) => {
                        warn!(
                            post_id = post.id,
                            error = %e,
                            raw_len = raw.len(),
                            raw_excerpt = %excerpt(&raw, 300),
                            "AI response unusable, storing placeholder"
                        );
                        let report = AiReport::degraded();
                        let scores = report.scores;
                        (AnalysisStatus::Degraded, report, scores)
                    }
                }
            }
        };

        AnalysisResult {
            post_id: post.id,
            analysis_type: ANALYSIS_TYPE_SEO.to_string(),
            status,
            scores,
            narrative: report.narrative,
            recommendations: report.recommendations,
            primary_keywords: report.primary_keywords,
            secondary_keywords: report.secondary_keywords,
            meta: report.meta,
            stats: req.stats,
            provider: client.provider().to_string(),
            model: client.model().to_string(),
            analysis_time: (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0,
            raw_response,
            created_at: None,
            updated_at: None,
        }
    }

    /// Analyze and persist. Failed API calls are returned but not stored, so a
    /// configuration problem never overwrites an earlier good analysis.
    pub fn run(
        &self,
        conn: &Connection,
        store: &mut AnalysisStore,
        source: &dyn ContentSource,
        client: &dyn Completer,
        post_id: i64,
    ) -> Result<AnalysisOutcome> {
        let post = source
            .fetch_post(post_id)?
            .ok_or_else(|| anyhow!("post {} not found", post_id))?;
        let result = self.analyze(&post, client);
        let saved = if result.status == AnalysisStatus::Failed {
            false
        } else {
            store.save(conn, &result)?;
            true
        };
        info!(
            post_id,
            status = result.status.as_str(),
            overall = result.scores.overall,
            saved,
            "analysis finished"
        );
        Ok(AnalysisOutcome { result, saved })
    }

    /// Sequential batch. Before each post it checks whether another analysis
    /// (as long as the slowest one so far) still fits under `ceiling`; if not,
    /// it stops and reports the rest as remaining. The first post always runs.
    #[allow(clippy::too_many_arguments)]
    pub fn batch(
        &self,
        conn: &Connection,
        store: &mut AnalysisStore,
        source: &dyn ContentSource,
        client: &dyn Completer,
        post_ids: &[i64],
        ceiling: Option<Duration>,
        mut on_progress: impl FnMut(i64, Option<AnalysisStatus>),
    ) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::default();
        let mut slowest = Duration::ZERO;

        for (i, &post_id) in post_ids.iter().enumerate() {
            if let Some(limit) = ceiling {
                if i > 0 && started.elapsed() + slowest > limit {
                    report.stopped_early = true;
                    report.remaining = post_ids[i..].to_vec();
                    warn!(
                        done = i,
                        remaining = report.remaining.len(),
                        elapsed_secs = started.elapsed().as_secs_f64(),
                        "batch stopped before the time ceiling"
                    );
                    break;
                }
            }

            let item_started = Instant::now();
            let post = match source.fetch_post(post_id) {
                Ok(Some(post)) => post,
                Ok(None) => {
                    warn!(post_id, "batch: post not found, skipping");
                    report.missing.push(post_id);
                    on_progress(post_id, None);
                    continue;
                }
                Err(e) => {
                    error!(post_id, error = %e, "batch: failed to load post");
                    report.failed += 1;
                    on_progress(post_id, Some(AnalysisStatus::Failed));
                    continue;
                }
            };

            let result = self.analyze(&post, client);
            let mut status = result.status;
            if status != AnalysisStatus::Failed {
                if let Err(e) = store.save(conn, &result) {
                    error!(post_id, error = %e, "batch: failed to save analysis");
                    status = AnalysisStatus::Failed;
                }
            }

            report.processed += 1;
            match status {
                AnalysisStatus::Complete => report.complete += 1,
                AnalysisStatus::Degraded => report.degraded += 1,
                AnalysisStatus::Failed => report.failed += 1,
            }
            slowest = slowest.max(item_started.elapsed());
            on_progress(post_id, Some(status));
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            processed = report.processed,
            failed = report.failed,
            stopped_early = report.stopped_early,
            "batch finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use crate::models::Scores;

    struct Canned(Result<String, u16>);

    impl Completer for Canned {
        fn complete(&self, _prompt: &str) -> Result<String, ClientError> {
            match &self.0 {
                Ok(s) => Ok(s.clone()),
                Err(status) => Err(ClientError::UpstreamStatus {
                    status: *status,
                    body: "nope".into(),
                }),
            }
        }
        fn provider(&self) -> &str {
            "stub"
        }
        fn model(&self) -> &str {
            "stub-1"
        }
    }

    fn post() -> Post {
        Post {
            id: 3,
            title: "How to dial in espresso at home".into(),
            content: "<h2>Grind</h2><p>Start fine and adjust.</p>".into(),
            excerpt: None,
        }
    }

    #[test]
    fn blends_parsed_scores() {
        let analyzer = SeoAnalyzer::new("https://example.com", false);
        let client = Canned(Ok(r#"{"scores": {"overall": 80, "title": 80, "content": 80, "keyword": 80, "readability": 80}}"#.into()));
        let result = analyzer.analyze(&post(), &client);
        assert_eq!(result.status, AnalysisStatus::Complete);
        // 31-char title → 85 heuristic title score
        assert_eq!(result.scores.title, 81.5);
        assert_eq!(result.provider, "stub");
        assert!(result.raw_response.is_none());
    }

    #[test]
    fn garbage_reply_degrades() {
        let analyzer = SeoAnalyzer::new("", true);
        let result = analyzer.analyze(&post(), &Canned(Ok("no json here".into())));
        assert_eq!(result.status, AnalysisStatus::Degraded);
        assert_eq!(result.scores, Scores::uniform(70.0));
        assert_eq!(result.raw_response.as_deref(), Some("no json here"));
    }

    #[test]
    fn api_error_gives_fallback() {
        let analyzer = SeoAnalyzer::new("", false);
        let result = analyzer.analyze(&post(), &Canned(Err(401)));
        assert_eq!(result.status, AnalysisStatus::Failed);
        assert_eq!(result.scores, Scores::uniform(60.0));
        assert!(result.narrative.title_analysis.contains("401"));
    }
}
