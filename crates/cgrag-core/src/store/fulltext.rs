//! FTS5-backed full-text channel.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use rusqlite::params;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{CgragError, CgragResult};
use crate::guards::{clamp_limit, MAX_SEARCH_LIMIT};
use crate::search::{FtsHit, FullTextSearch};
use crate::store::database::Database;
use crate::store::schema;

static TERM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").unwrap());

/// Turn free text into an FTS5 expression of quoted terms joined by `OR`.
/// Returns `None` when no searchable term remains.
pub fn sanitize_match_expr(raw: &str) -> Option<String> {
    let mut terms: Vec<&str> = Vec::new();
    for m in TERM_RE.find_iter(raw) {
        let term = m.as_str();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[derive(Debug, Clone)]
pub struct SqliteFullText {
    db: Database,
}

impl SqliteFullText {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Blocking query; `relevance_score` is the raw `bm25` value.
    pub fn query_blocking(&self, match_expr: &str, limit: usize) -> CgragResult<Vec<FtsHit>> {
        let Some(expr) = sanitize_match_expr(match_expr) else {
            return Ok(Vec::new());
        };
        let conn = self.db.connect()?;
        if !schema::fts_available(&conn) {
            return Err(CgragError::Retrieval("full-text index unavailable".into()));
        }
        let mut stmt = conn.prepare(
            "SELECT path, title, content, doc_type, bm25(documents_fts) AS score \
             FROM documents_fts WHERE documents_fts MATCH ?1 \
             ORDER BY score ASC, path ASC LIMIT ?2;",
        )?;
        let limit = clamp_limit(limit, MAX_SEARCH_LIMIT) as i64;
        let rows = stmt.query_map(params![expr, limit], |row| {
            Ok(FtsHit {
                path: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                doc_type: row.get(3)?,
                relevance_score: row.get(4)?,
            })
        })?;
        let hits: Vec<FtsHit> = rows.collect::<Result<_, _>>()?;
        debug!("FTS query {expr:?} returned {} hits", hits.len());
        Ok(hits)
    }
}

#[async_trait]
impl FullTextSearch for SqliteFullText {
    async fn query(
        &self,
        match_expr: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> CgragResult<Vec<FtsHit>> {
        let this = self.clone();
        let expr = match_expr.to_string();
        let task = tokio::task::spawn_blocking(move || this.query_blocking(&expr, limit));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CgragError::Cancelled),
            joined = task => joined
                .map_err(|e| CgragError::Retrieval(format!("full-text task failed: {e}")))?,
        }
    }
}
