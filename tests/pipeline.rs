use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;

use seokit::app::Toolkit;
use seokit::client::{ClientError, Completer};
use seokit::db::{self, PostRepo};
use seokit::models::{AnalysisResult, AnalysisStatus, Post, Scores, ANALYSIS_TYPE_SEO};
use seokit::router::Router;
use seokit::store::AnalysisStore;

fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/fixtures/{}", name)).unwrap()
}

/// Replays one canned completion, optionally after a delay.
struct Stub {
    reply: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl Stub {
    fn new(reply: impl Into<String>) -> Self {
        Stub {
            reply: reply.into(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(reply: impl Into<String>, delay: Duration) -> Self {
        Stub {
            delay,
            ..Stub::new(reply)
        }
    }
}

impl Completer for Stub {
    fn complete(&self, _prompt: &str) -> Result<String, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(self.reply.clone())
    }
    fn provider(&self) -> &str {
        "stub"
    }
    fn model(&self) -> &str {
        "stub-chat"
    }
}

fn kit_with(reply: impl Into<String>) -> Toolkit {
    Toolkit::with_client(db::open_in_memory().unwrap(), Box::new(Stub::new(reply))).unwrap()
}

fn add_post(kit: &Toolkit, title: &str, content: &str) -> i64 {
    PostRepo::new(&kit.conn).insert(title, content, None).unwrap()
}

fn long_article(words: usize) -> String {
    format!("<h2>Moves</h2><p>{}</p>", "ownership ".repeat(words - 1))
}

/// Reads straight from SQLite, bypassing any cache.
fn stored(kit: &Toolkit, post_id: i64) -> Option<AnalysisResult> {
    AnalysisStore::new(Duration::ZERO)
        .get(&kit.conn, post_id, ANALYSIS_TYPE_SEO)
        .unwrap()
}

fn row_count(kit: &Toolkit, post_id: i64) -> i64 {
    kit.conn
        .query_row(
            "SELECT COUNT(*) FROM seo_analyses WHERE post_id = ?1",
            [post_id],
            |r| r.get(0),
        )
        .unwrap()
}

fn without_timing(mut r: AnalysisResult) -> AnalysisResult {
    r.created_at = None;
    r.updated_at = None;
    r.analysis_time = 0.0;
    r
}

#[test]
fn reanalysis_is_idempotent() {
    let router = Router::default();
    let mut kit = kit_with(fixture("fenced.txt"));
    let id = add_post(&kit, "Rust ownership explained for working engineers", &long_article(1200));

    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();
    let first = stored(&kit, id).unwrap();
    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();
    let second = stored(&kit, id).unwrap();

    assert_eq!(row_count(&kit, id), 1);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(without_timing(first), without_timing(second));
}

#[test]
fn fenced_reply_is_blended_with_heuristics() {
    let router = Router::default();
    let mut kit = kit_with(fixture("fenced.txt"));
    // 46-char title, 1200 words: heuristic overall 79.75
    let id = add_post(&kit, "Rust ownership explained for working engineers", &long_article(1200));

    let out = router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();
    assert_eq!(out["saved"], json!(true));

    let r = stored(&kit, id).unwrap();
    assert_eq!(r.status, AnalysisStatus::Complete);
    assert_eq!(r.stats.word_count, 1200);
    assert_eq!(r.stats.headings.h2, 1);
    assert_eq!(r.scores.overall, 81.3);
    assert_eq!(r.primary_keywords[0], "rust ownership");
    assert_eq!(r.recommendations.len(), 2);
    assert_eq!(r.provider, "stub");
    assert!(r.meta.suggested_title.starts_with("Rust Ownership Explained"));
}

#[test]
fn truncated_reply_is_repaired_and_kept() {
    let router = Router::default();
    let mut kit = kit_with(fixture("truncated.txt"));
    let id = add_post(&kit, "A title that sits in the ideal band", &long_article(400));

    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();
    let r = stored(&kit, id).unwrap();
    assert_eq!(r.status, AnalysisStatus::Complete);
    assert!(r.recommendations.iter().any(|rec| rec.title == "Add internal links"));
}

#[test]
fn reply_without_braces_degrades_gracefully() {
    let router = Router::default();
    let mut kit = kit_with("I'm sorry, I can't analyze this article right now.");
    let id = add_post(&kit, "Degraded run", "<p>short</p>");

    let out = router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();
    assert_eq!(out["saved"], json!(true));

    let r = stored(&kit, id).unwrap();
    assert_eq!(r.status, AnalysisStatus::Degraded);
    assert_eq!(r.scores, Scores::uniform(70.0));
    assert!(!r.recommendations.is_empty());
}

#[test]
fn second_analysis_replaces_the_first() {
    let router = Router::default();
    let mut kit = kit_with(fixture("fenced.txt"));
    let id = add_post(&kit, "Rust ownership explained for working engineers", &long_article(1200));
    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();

    PostRepo::new(&kit.conn)
        .update(&Post {
            id,
            title: "SEO basics".into(),
            content: long_article(150),
            excerpt: None,
        })
        .unwrap();
    kit.client = Box::new(Stub::new(fixture("prose_wrapped.txt")));
    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();

    assert_eq!(row_count(&kit, id), 1);
    let r = stored(&kit, id).unwrap();
    assert_eq!(r.stats.word_count, 150);
    assert_eq!(r.primary_keywords, vec!["seo basics", "meta tags", "sitemaps"]);
    assert_eq!(r.meta.focus_keywords, vec!["seo basics"]);
}

#[test]
fn batch_stops_before_the_ceiling() {
    let mut kit = Toolkit::with_client(
        db::open_in_memory().unwrap(),
        Box::new(Stub::slow(fixture("fenced.txt"), Duration::from_millis(40))),
    )
    .unwrap();
    let ids: Vec<i64> = (0..3)
        .map(|i| add_post(&kit, &format!("Post number {}", i), "<p>body</p>"))
        .collect();

    let source = PostRepo::new(&kit.conn);
    let mut seen = Vec::new();
    let report = kit
        .analyzer
        .batch(
            &kit.conn,
            &mut kit.store,
            &source,
            kit.client.as_ref(),
            &ids,
            Some(Duration::from_millis(60)),
            |id, _| seen.push(id),
        )
        .unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.processed, 1);
    assert_eq!(report.remaining, ids[1..].to_vec());
    assert_eq!(seen, vec![ids[0]]);
}

#[test]
fn batch_skips_missing_posts() {
    let router = Router::default();
    let mut kit = kit_with(fixture("fenced.txt"));
    let id = add_post(&kit, "Only real post", "<p>body</p>");

    let out = router
        .dispatch(&mut kit, "seo.batch", &json!({ "post_ids": [id, 9999] }))
        .unwrap();
    assert_eq!(out["processed"], json!(1));
    assert_eq!(out["complete"], json!(1));
    assert_eq!(out["missing"], json!([9999]));
    assert_eq!(out["stopped_early"], json!(false));
}

#[test]
fn default_batch_only_picks_pending_posts() {
    let router = Router::default();
    let mut kit = kit_with(fixture("fenced.txt"));
    let done = add_post(&kit, "Already analyzed", "<p>a</p>");
    let todo = add_post(&kit, "Still pending", "<p>b</p>");
    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": done })).unwrap();

    let out = router.dispatch(&mut kit, "seo.batch", &json!({})).unwrap();
    assert_eq!(out["processed"], json!(1));
    assert!(stored(&kit, todo).is_some());
}

#[test]
fn orphans_are_kept_until_pruned() {
    let router = Router::default();
    let mut kit = kit_with(fixture("fenced.txt"));
    let id = add_post(&kit, "Short-lived post", "<p>x</p>");
    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();

    router.dispatch(&mut kit, "post.delete", &json!({ "id": id })).unwrap();
    let stats = router.dispatch(&mut kit, "seo.stats", &json!({})).unwrap();
    assert_eq!(stats["total"], json!(1));
    assert_eq!(stats["orphaned"], json!(1));

    let pruned = router.dispatch(&mut kit, "seo.prune", &json!({})).unwrap();
    assert_eq!(pruned["removed"], json!(1));
    assert!(stored(&kit, id).is_none());
}

#[test]
fn list_filters_by_score() {
    let router = Router::default();
    let mut kit = kit_with("no json at all");
    let id = add_post(&kit, "Placeholder", "<p>x</p>");
    router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": id })).unwrap();

    let hit = router
        .dispatch(&mut kit, "seo.list", &json!({ "min_score": 60, "max_score": 80 }))
        .unwrap();
    assert_eq!(hit.as_array().unwrap().len(), 1);
    assert_eq!(hit[0]["status"], json!("degraded"));

    let miss = router
        .dispatch(&mut kit, "seo.list", &json!({ "min_score": 71 }))
        .unwrap();
    assert!(miss.as_array().unwrap().is_empty());
}
