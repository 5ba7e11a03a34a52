use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::env;
use std::path::PathBuf;

use crate::models::Post;

pub fn path() -> PathBuf {
    if let Ok(p) = env::var("SEOKIT_DB_PATH") {
        return PathBuf::from(p);
    }
    PathBuf::from("data/seokit.sqlite")
}

pub fn connect() -> Result<Connection> {
    let p = path();
    if let Some(dir) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(&p).with_context(|| format!("Failed to open {:?}", p))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS posts (
            id          INTEGER PRIMARY KEY,
            title       TEXT NOT NULL,
            content     TEXT NOT NULL,
            excerpt     TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS options (
            name        TEXT PRIMARY KEY,
            value       TEXT NOT NULL
        );

        -- No foreign key to posts: analyses outlive deleted posts until pruned.
        CREATE TABLE IF NOT EXISTS seo_analyses (
            id                   INTEGER PRIMARY KEY,
            post_id              INTEGER NOT NULL,
            analysis_type        TEXT NOT NULL DEFAULT 'seo',
            status               TEXT NOT NULL DEFAULT 'complete',
            overall_score        REAL NOT NULL DEFAULT 0,
            title_score          REAL NOT NULL DEFAULT 0,
            content_score        REAL NOT NULL DEFAULT 0,
            keyword_score        REAL NOT NULL DEFAULT 0,
            readability_score    REAL NOT NULL DEFAULT 0,
            analysis_data        TEXT,
            recommendations      TEXT,
            primary_keywords     TEXT,
            secondary_keywords   TEXT,
            meta_suggestions     TEXT,
            word_count           INTEGER NOT NULL DEFAULT 0,
            title_length         INTEGER NOT NULL DEFAULT 0,
            image_count          INTEGER NOT NULL DEFAULT 0,
            internal_links       INTEGER NOT NULL DEFAULT 0,
            external_links       INTEGER NOT NULL DEFAULT 0,
            heading_counts       TEXT,
            ai_provider          TEXT NOT NULL DEFAULT '',
            ai_model             TEXT NOT NULL DEFAULT '',
            analysis_time        REAL NOT NULL DEFAULT 0,
            raw_response         TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_analyses_post_type ON seo_analyses(post_id, analysis_type);
        CREATE INDEX IF NOT EXISTS idx_analyses_overall ON seo_analyses(overall_score);
        ",
    )?;
    Ok(())
}

// ── Content records ──

/// Read access to the posts being analyzed.
pub trait ContentSource {
    fn fetch_post(&self, id: i64) -> Result<Option<Post>>;
    fn post_ids(&self, limit: Option<usize>) -> Result<Vec<i64>>;
}

pub struct PostRepo<'a> {
    conn: &'a Connection,
}

impl<'a> PostRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        PostRepo { conn }
    }

    pub fn insert(&self, title: &str, content: &str, excerpt: Option<&str>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO posts (title, content, excerpt) VALUES (?1, ?2, ?3)",
            params![title, content, excerpt],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update(&self, post: &Post) -> Result<bool> {
        let n = self.conn.execute(
            "UPDATE posts SET title = ?1, content = ?2, excerpt = ?3 WHERE id = ?4",
            params![post.title, post.content, post.excerpt, post.id],
        )?;
        Ok(n > 0)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<(i64, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title FROM posts ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl ContentSource for PostRepo<'_> {
    fn fetch_post(&self, id: i64) -> Result<Option<Post>> {
        let post = self
            .conn
            .query_row(
                "SELECT id, title, content, excerpt FROM posts WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Post {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        content: row.get(2)?,
                        excerpt: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(post)
    }

    fn post_ids(&self, limit: Option<usize>) -> Result<Vec<i64>> {
        let sql = match limit {
            Some(n) => format!("SELECT id FROM posts ORDER BY id LIMIT {}", n),
            None => "SELECT id FROM posts ORDER BY id".to_string(),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
