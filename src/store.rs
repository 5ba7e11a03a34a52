use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::client::excerpt;
use crate::models::{
    AnalysisResult, AnalysisStatus, ContentStats, HeadingCounts, MetaSuggestions, Narrative,
    Scores,
};

const SELECT_COLUMNS: &str = "post_id, analysis_type, status, overall_score, title_score,
    content_score, keyword_score, readability_score, analysis_data, recommendations,
    primary_keywords, secondary_keywords, meta_suggestions, word_count, title_length,
    image_count, internal_links, external_links, heading_counts, ai_provider, ai_model,
    analysis_time, raw_response, created_at, updated_at";

pub fn cache_key(post_id: i64, analysis_type: &str) -> String {
    format!("{}:{}", analysis_type, post_id)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisSummary {
    pub post_id: i64,
    pub title: Option<String>,
    pub status: AnalysisStatus,
    pub overall_score: f64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub degraded: usize,
    pub average_overall: Option<f64>,
    pub orphaned: usize,
}

/// Persists analyses keyed by (post id, analysis type) behind a TTL cache.
pub struct AnalysisStore {
    cache: TtlCache<AnalysisResult>,
}

impl AnalysisStore {
    pub fn new(cache_ttl: Duration) -> Self {
        AnalysisStore {
            cache: TtlCache::new(cache_ttl),
        }
    }

    /// Check-then-write upsert. Concurrent writers race; the last one wins.
    pub fn save(&mut self, conn: &Connection, result: &AnalysisResult) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM seo_analyses WHERE post_id = ?1 AND analysis_type = ?2",
                params![result.post_id, result.analysis_type],
                |row| row.get(0),
            )
            .optional()?;

        let narrative = to_json(&result.narrative)?;
        let recommendations = to_json(&result.recommendations)?;
        let primary = to_json(&result.primary_keywords)?;
        let secondary = to_json(&result.secondary_keywords)?;
        let meta = to_json(&result.meta)?;
        let headings = to_json(&result.stats.headings)?;
        let s = &result.scores;
        let st = &result.stats;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE seo_analyses SET
                        status = ?1, overall_score = ?2, title_score = ?3, content_score = ?4,
                        keyword_score = ?5, readability_score = ?6, analysis_data = ?7,
                        recommendations = ?8, primary_keywords = ?9, secondary_keywords = ?10,
                        meta_suggestions = ?11, word_count = ?12, title_length = ?13,
                        image_count = ?14, internal_links = ?15, external_links = ?16,
                        heading_counts = ?17, ai_provider = ?18, ai_model = ?19,
                        analysis_time = ?20, raw_response = ?21, updated_at = ?22
                     WHERE id = ?23",
                    params![
                        result.status.as_str(),
                        s.overall,
                        s.title,
                        s.content,
                        s.keyword,
                        s.readability,
                        narrative,
                        recommendations,
                        primary,
                        secondary,
                        meta,
                        st.word_count,
                        st.title_length,
                        st.image_count,
                        st.internal_links,
                        st.external_links,
                        headings,
                        result.provider,
                        result.model,
                        result.analysis_time,
                        result.raw_response,
                        now,
                        id,
                    ],
                )
                .with_context(|| format!("Failed to update analysis for post {}", result.post_id))?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO seo_analyses (
                        post_id, analysis_type, status, overall_score, title_score,
                        content_score, keyword_score, readability_score, analysis_data,
                        recommendations, primary_keywords, secondary_keywords, meta_suggestions,
                        word_count, title_length, image_count, internal_links, external_links,
                        heading_counts, ai_provider, ai_model, analysis_time, raw_response,
                        created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                               ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?24)",
                    params![
                        result.post_id,
                        result.analysis_type,
                        result.status.as_str(),
                        s.overall,
                        s.title,
                        s.content,
                        s.keyword,
                        s.readability,
                        narrative,
                        recommendations,
                        primary,
                        secondary,
                        meta,
                        st.word_count,
                        st.title_length,
                        st.image_count,
                        st.internal_links,
                        st.external_links,
                        headings,
                        result.provider,
                        result.model,
                        result.analysis_time,
                        result.raw_response,
                        now,
                    ],
                )
                .with_context(|| format!("Failed to insert analysis for post {}", result.post_id))?;
                conn.last_insert_rowid()
            }
        };

        self.cache
            .invalidate(&cache_key(result.post_id, &result.analysis_type));
        debug!(post_id = result.post_id, row_id = id, updated = existing.is_some(), "analysis saved");
        Ok(id)
    }

    pub fn get(
        &mut self,
        conn: &Connection,
        post_id: i64,
        analysis_type: &str,
    ) -> Result<Option<AnalysisResult>> {
        let key = cache_key(post_id, analysis_type);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(Some(hit));
        }

        let sql = format!(
            "SELECT {} FROM seo_analyses WHERE post_id = ?1 AND analysis_type = ?2",
            SELECT_COLUMNS
        );
        let found = conn
            .query_row(&sql, params![post_id, analysis_type], read_row)
            .optional()?;

        if let Some(ref result) = found {
            self.cache.insert(key, result.clone());
        }
        Ok(found)
    }

    pub fn delete(&mut self, conn: &Connection, post_id: i64, analysis_type: &str) -> Result<bool> {
        let n = conn.execute(
            "DELETE FROM seo_analyses WHERE post_id = ?1 AND analysis_type = ?2",
            params![post_id, analysis_type],
        )?;
        self.cache.invalidate(&cache_key(post_id, analysis_type));
        Ok(n > 0)
    }

    /// Bulk delete, optionally limited to one analysis type.
    pub fn clear(&mut self, conn: &Connection, analysis_type: Option<&str>) -> Result<usize> {
        let n = match analysis_type {
            Some(t) => conn.execute(
                "DELETE FROM seo_analyses WHERE analysis_type = ?1",
                params![t],
            )?,
            None => conn.execute("DELETE FROM seo_analyses", [])?,
        };
        self.cache.clear();
        Ok(n)
    }

    /// Removes analyses whose post no longer exists. Only runs when asked.
    pub fn prune_orphans(&mut self, conn: &Connection) -> Result<usize> {
        let n = conn.execute(
            "DELETE FROM seo_analyses WHERE post_id NOT IN (SELECT id FROM posts)",
            [],
        )?;
        self.cache.clear();
        Ok(n)
    }

    pub fn list(
        &self,
        conn: &Connection,
        analysis_type: &str,
        filter: &ListFilter,
    ) -> Result<Vec<AnalysisSummary>> {
        let mut stmt = conn.prepare(
            "SELECT a.post_id, p.title, a.status, a.overall_score, a.updated_at
             FROM seo_analyses a
             LEFT JOIN posts p ON p.id = a.post_id
             WHERE a.analysis_type = ?1
               AND a.overall_score >= ?2
               AND a.overall_score <= ?3
             ORDER BY a.updated_at DESC, a.post_id DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![
                    analysis_type,
                    filter.min_score.unwrap_or(0.0),
                    filter.max_score.unwrap_or(100.0),
                    filter.limit as i64
                ],
                |row| {
                    let status: String = row.get(2)?;
                    Ok(AnalysisSummary {
                        post_id: row.get(0)?,
                        title: row.get(1)?,
                        status: AnalysisStatus::parse(&status),
                        overall_score: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self, conn: &Connection, analysis_type: &str) -> Result<StoreStats> {
        let (total, degraded, average_overall): (i64, i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status != 'complete' THEN 1 ELSE 0 END), 0),
                    AVG(overall_score)
             FROM seo_analyses WHERE analysis_type = ?1",
            params![analysis_type],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let orphaned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM seo_analyses
             WHERE analysis_type = ?1 AND post_id NOT IN (SELECT id FROM posts)",
            params![analysis_type],
            |row| row.get(0),
        )?;
        Ok(StoreStats {
            total: total as usize,
            degraded: degraded as usize,
            average_overall: average_overall.map(crate::scoring::round1),
            orphaned: orphaned as usize,
        })
    }

    /// Posts with no analysis of this type yet, oldest first.
    pub fn pending(
        &self,
        conn: &Connection,
        analysis_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT p.id FROM posts p
             LEFT JOIN seo_analyses a ON a.post_id = p.id AND a.analysis_type = ?1
             WHERE a.id IS NULL
             ORDER BY p.id{}",
            match limit {
                Some(n) => format!(" LIMIT {}", n),
                None => String::new(),
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![analysis_type], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode analysis field")
}

/// Undecodable blobs fall back to empty values instead of failing the read.
fn from_json<T: DeserializeOwned + Default>(post_id: i64, column: &str, raw: Option<String>) -> T {
    let Some(text) = raw else {
        return T::default();
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(
            post_id,
            column,
            error = %e,
            value_excerpt = %excerpt(&text, 120),
            "stored analysis column is not valid JSON, using empty value"
        );
        T::default()
    })
}

fn read_row(row: &Row) -> rusqlite::Result<AnalysisResult> {
    let post_id: i64 = row.get(0)?;
    let status: String = row.get(2)?;
    let headings: HeadingCounts = from_json(post_id, "heading_counts", row.get(18)?);
    Ok(AnalysisResult {
        post_id,
        analysis_type: row.get(1)?,
        status: AnalysisStatus::parse(&status),
        scores: Scores {
            overall: row.get(3)?,
            title: row.get(4)?,
            content: row.get(5)?,
            keyword: row.get(6)?,
            readability: row.get(7)?,
        },
        narrative: from_json::<Narrative>(post_id, "analysis_data", row.get(8)?),
        recommendations: from_json(post_id, "recommendations", row.get(9)?),
        primary_keywords: from_json(post_id, "primary_keywords", row.get(10)?),
        secondary_keywords: from_json(post_id, "secondary_keywords", row.get(11)?),
        meta: from_json::<MetaSuggestions>(post_id, "meta_suggestions", row.get(12)?),
        stats: ContentStats {
            word_count: row.get(13)?,
            title_length: row.get(14)?,
            image_count: row.get(15)?,
            internal_links: row.get(16)?,
            external_links: row.get(17)?,
            headings,
        },
        provider: row.get(19)?,
        model: row.get(20)?,
        analysis_time: row.get(21)?,
        raw_response: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
    })
}
