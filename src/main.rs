use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use serde_json::{json, Value};

use seokit::app::Toolkit;
use seokit::db;
use seokit::models::AnalysisResult;
use seokit::router::Router;

#[derive(Parser)]
#[command(name = "seokit", about = "AI-assisted SEO analysis for stored posts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and tables
    Init,
    /// Manage posts
    #[command(subcommand)]
    Post(PostCmd),
    /// Analyze one post and store the result
    Analyze { post_id: i64 },
    /// Analyze several posts (default: every post without an analysis)
    Batch {
        /// Max posts to analyze
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Explicit post ids
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
        /// Re-analyze every post, not only pending ones
        #[arg(long)]
        all: bool,
    },
    /// Show the stored analysis of a post
    Show { post_id: i64 },
    /// List stored analyses
    List {
        #[arg(long)]
        min: Option<f64>,
        #[arg(long)]
        max: Option<f64>,
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Analysis statistics
    Stats,
    /// Delete the analysis of a post
    Delete { post_id: i64 },
    /// Delete stored analyses
    Clear {
        /// Every analysis type, not only SEO
        #[arg(long)]
        all: bool,
    },
    /// Delete analyses whose post no longer exists
    Prune,
    /// Read and write settings
    #[command(subcommand)]
    Config(ConfigCmd),
    /// Run a router action with JSON params
    Dispatch {
        action: String,
        #[arg(default_value = "{}")]
        params: String,
    },
}

#[derive(Subcommand)]
enum PostCmd {
    /// Add a post from inline HTML or a file
    Add {
        #[arg(short, long)]
        title: String,
        #[arg(short, long, conflicts_with = "file")]
        content: Option<String>,
        #[arg(short, long)]
        file: Option<std::path::PathBuf>,
        #[arg(short, long)]
        excerpt: Option<String>,
    },
    List {
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum ConfigCmd {
    Get { key: String },
    Set { key: String, value: String },
    Show,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let t0 = Instant::now();
    let cli = Cli::parse();
    let router = Router::default();
    let mut kit = Toolkit::open()?;

    match cli.command {
        Commands::Init => {
            println!("Database ready at {}", db::path().display());
        }
        Commands::Post(PostCmd::Add {
            title,
            content,
            file,
            excerpt,
        }) => {
            let content = match (content, file) {
                (Some(c), _) => c,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => anyhow::bail!("either --content or --file is required"),
            };
            let out = router.dispatch(
                &mut kit,
                "post.add",
                &json!({ "title": title, "content": content, "excerpt": excerpt }),
            )?;
            println!("Added post {}", out["id"]);
        }
        Commands::Post(PostCmd::List { limit }) => {
            let out = router.dispatch(&mut kit, "post.list", &json!({ "limit": limit }))?;
            let rows = out.as_array().cloned().unwrap_or_default();
            if rows.is_empty() {
                println!("No posts. Add one with 'post add'.");
            }
            for r in rows {
                println!("{:>5} | {}", r["id"], truncate(r["title"].as_str().unwrap_or(""), 70));
            }
        }
        Commands::Post(PostCmd::Delete { id }) => {
            let out = router.dispatch(&mut kit, "post.delete", &json!({ "id": id }))?;
            println!("Deleted: {}", out["deleted"]);
        }
        Commands::Analyze { post_id } => {
            let out = router.dispatch(&mut kit, "seo.analyze", &json!({ "post_id": post_id }))?;
            let result: AnalysisResult = serde_json::from_value(out["result"].clone())?;
            print_analysis(&result);
            if out["saved"] != json!(true) {
                println!("\nNot saved: the AI request failed.");
            }
        }
        Commands::Batch { limit, ids, all } => {
            let mut params = json!({ "limit": limit, "all": all });
            if !ids.is_empty() {
                params["post_ids"] = json!(ids);
            }
            let out = router.dispatch(&mut kit, "seo.batch", &params)?;
            if out["processed"] == json!(0) && out["remaining"].as_array().map_or(true, |r| r.is_empty()) {
                println!("Nothing to analyze.");
            } else {
                println!(
                    "Processed {} ({} complete, {} degraded, {} failed) in {:.1}s",
                    out["processed"], out["complete"], out["degraded"], out["failed"],
                    out["elapsed_secs"].as_f64().unwrap_or(0.0)
                );
                if out["stopped_early"] == json!(true) {
                    println!("Stopped at the time limit; {} left: {}",
                        out["remaining"].as_array().map_or(0, Vec::len),
                        join_ids(&out["remaining"]));
                }
                if out["missing"].as_array().is_some_and(|m| !m.is_empty()) {
                    println!("Missing posts: {}", join_ids(&out["missing"]));
                }
            }
        }
        Commands::Show { post_id } => {
            let out = router.dispatch(&mut kit, "seo.get", &json!({ "post_id": post_id }))?;
            if out.is_null() {
                println!("No analysis for post {}. Run 'analyze {}'.", post_id, post_id);
            } else {
                print_analysis(&serde_json::from_value(out)?);
            }
        }
        Commands::List { min, max, limit } => {
            let out = router.dispatch(
                &mut kit,
                "seo.list",
                &json!({ "min_score": min, "max_score": max, "limit": limit }),
            )?;
            let rows = out.as_array().cloned().unwrap_or_default();
            if rows.is_empty() {
                println!("No analyses found.");
                return Ok(());
            }
            println!(
                "{:>5} | {:<40} | {:<8} | {:>7} | {:<20}",
                "Post", "Title", "Status", "Overall", "Updated"
            );
            println!("{}", "-".repeat(92));
            for r in &rows {
                println!(
                    "{:>5} | {:<40} | {:<8} | {:>7.1} | {:<20}",
                    r["post_id"],
                    truncate(r["title"].as_str().unwrap_or("(deleted)"), 40),
                    r["status"].as_str().unwrap_or(""),
                    r["overall_score"].as_f64().unwrap_or(0.0),
                    truncate(r["updated_at"].as_str().unwrap_or(""), 19),
                );
            }
            println!("\n{} analyses", rows.len());
        }
        Commands::Stats => {
            let s = router.dispatch(&mut kit, "seo.stats", &json!({}))?;
            println!("Analyses: {}", s["total"]);
            println!("Degraded: {}", s["degraded"]);
            match s["average_overall"].as_f64() {
                Some(avg) => println!("Average:  {:.1}", avg),
                None => println!("Average:  -"),
            }
            println!("Orphaned: {}", s["orphaned"]);
            println!("Cached:   {}", kit.store.cached_entries());
        }
        Commands::Delete { post_id } => {
            let out = router.dispatch(&mut kit, "seo.delete", &json!({ "post_id": post_id }))?;
            println!("Deleted: {}", out["deleted"]);
        }
        Commands::Clear { all } => {
            let params = if all { json!({ "analysis_type": "all" }) } else { json!({}) };
            let out = router.dispatch(&mut kit, "seo.clear", &params)?;
            println!("Removed {} analyses", out["removed"]);
        }
        Commands::Prune => {
            let out = router.dispatch(&mut kit, "seo.prune", &json!({}))?;
            println!("Removed {} orphaned analyses", out["removed"]);
        }
        Commands::Config(cmd) => {
            let out = match cmd {
                ConfigCmd::Get { key } => router.dispatch(&mut kit, "settings.get", &json!({ "key": key }))?,
                ConfigCmd::Set { key, value } => router.dispatch(
                    &mut kit,
                    "settings.set",
                    &json!({ "key": key, "value": value }),
                )?,
                ConfigCmd::Show => router.dispatch(&mut kit, "settings.show", &json!({}))?,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Dispatch { action, params } => {
            let params: Value = serde_json::from_str(&params).context("params must be JSON")?;
            let out = router.dispatch(&mut kit, &action, &params)?;
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn print_analysis(r: &AnalysisResult) {
    let s = &r.scores;
    println!("Post {} [{}] via {}/{}", r.post_id, r.status.as_str(), r.provider, r.model);
    println!(
        "Overall {:.1} | title {:.1} | content {:.1} | keyword {:.1} | readability {:.1}",
        s.overall, s.title, s.content, s.keyword, s.readability
    );
    let st = &r.stats;
    println!(
        "{} words, {} images, {} internal / {} external links, {} headings",
        st.word_count, st.image_count, st.internal_links, st.external_links, st.headings.total()
    );
    if !r.primary_keywords.is_empty() {
        println!("Primary:   {}", r.primary_keywords.iter().join(", "));
    }
    if !r.secondary_keywords.is_empty() {
        println!("Secondary: {}", r.secondary_keywords.iter().join(", "));
    }
    if !r.meta.suggested_title.is_empty() {
        println!("Suggested title: {}", r.meta.suggested_title);
    }
    if !r.recommendations.is_empty() {
        println!("\n--- Recommendations ---");
        for (i, rec) in r.recommendations.iter().enumerate() {
            println!("{:>2}. [{}] {}", i + 1, rec.impact, truncate(&rec.title, 70));
            if !rec.action.is_empty() {
                println!("    {}", truncate(&rec.action, 100));
            }
        }
    }
}

fn join_ids(v: &Value) -> String {
    v.as_array()
        .map(|ids| ids.iter().map(|id| id.to_string()).join(", "))
        .unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
