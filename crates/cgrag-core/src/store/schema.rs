//! SQLite schema DDL and full-text index maintenance.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::CgragResult;

/// Core DDL statements: 7 CREATE TABLE + 8 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (7) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS repo_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS symbols (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        file_path TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        signature TEXT,
        docstring TEXT
    );",
    "CREATE TABLE IF NOT EXISTS edges (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id TEXT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        target_id TEXT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        relationship TEXT NOT NULL,
        line_number INTEGER,
        confidence REAL DEFAULT 1.0,
        UNIQUE(source_id, target_id, relationship)
    );",
    "CREATE TABLE IF NOT EXISTS symbol_raises (
        symbol_id TEXT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        exception TEXT NOT NULL,
        UNIQUE(symbol_id, exception)
    );",
    "CREATE TABLE IF NOT EXISTS symbol_mutates (
        symbol_id TEXT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        variable TEXT NOT NULL,
        UNIQUE(symbol_id, variable)
    );",
    "CREATE TABLE IF NOT EXISTS symbol_error_strings (
        symbol_id TEXT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        message TEXT NOT NULL,
        UNIQUE(symbol_id, message)
    );",
    "CREATE TABLE IF NOT EXISTS documents (
        path TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        doc_type TEXT NOT NULL DEFAULT 'wiki',
        content TEXT NOT NULL,
        updated_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    // ── indexes (8) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);",
    "CREATE INDEX IF NOT EXISTS idx_symbols_file ON symbols(file_path);",
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id, relationship);",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, relationship);",
    "CREATE INDEX IF NOT EXISTS idx_raises_exception ON symbol_raises(exception);",
    "CREATE INDEX IF NOT EXISTS idx_mutates_variable ON symbol_mutates(variable);",
    "CREATE INDEX IF NOT EXISTS idx_error_strings_symbol ON symbol_error_strings(symbol_id);",
    "CREATE INDEX IF NOT EXISTS idx_documents_type ON documents(doc_type);",
];

/// FTS5 virtual table over `documents`.
///
/// Failures are ignored by the caller because some SQLite builds lack FTS5;
/// the full-text channel then reports itself as failed at query time.
pub const FTS_STATEMENTS: &[&str] = &[
    "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts
     USING fts5(path UNINDEXED, title, content, doc_type UNINDEXED);",
];

// ─── Setup ──────────────────────────────────────────────────────────────────

/// Create every table and index, then the FTS table when this SQLite build
/// supports it. Safe to replay. Returns whether full-text search is usable.
pub fn apply_schema(conn: &Connection) -> CgragResult<bool> {
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt)?;
    }
    for stmt in FTS_STATEMENTS {
        if let Err(e) = conn.execute_batch(stmt) {
            debug!("FTS5 unavailable, full-text channel disabled: {e}");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether the `documents_fts` virtual table exists on this connection.
pub fn fts_available(conn: &Connection) -> bool {
    conn.query_row("SELECT 1 FROM documents_fts LIMIT 1;", [], |_| Ok(()))
        .map(|_| true)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(true),
            other => Err(other),
        })
        .unwrap_or(false)
}

/// Rebuild `documents_fts` when its row count disagrees with `documents`,
/// e.g. for a database written by a build without FTS5. Returns whether a
/// rebuild ran.
pub fn sync_documents_fts(conn: &Connection) -> CgragResult<bool> {
    if !fts_available(conn) {
        return Ok(false);
    }
    let documents: i64 = conn.query_row("SELECT COUNT(*) FROM documents;", [], |row| row.get(0))?;
    let indexed: i64 = conn.query_row("SELECT COUNT(*) FROM documents_fts;", [], |row| row.get(0))?;
    if documents == indexed {
        return Ok(false);
    }
    info!("Rebuilding full-text index: {indexed} indexed rows for {documents} documents");
    rebuild_documents_fts(conn)?;
    Ok(true)
}

/// Replace the FTS contents with the current `documents` rows.
pub fn rebuild_documents_fts(conn: &Connection) -> CgragResult<()> {
    conn.execute_batch(
        "SAVEPOINT cgrag_fts_rebuild;
         DELETE FROM documents_fts;
         INSERT INTO documents_fts(path, title, content, doc_type)
             SELECT path, title, content, doc_type FROM documents;
         RELEASE SAVEPOINT cgrag_fts_rebuild;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tables_only() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    fn fts_count(conn: &Connection, term: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM documents_fts WHERE documents_fts MATCH ?1;",
            [term],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn schema_statement_counts() {
        assert_eq!(SCHEMA_STATEMENTS.len(), 15);
        assert_eq!(FTS_STATEMENTS.len(), 1);
    }

    #[test]
    fn apply_schema_is_replayable() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(apply_schema(&conn).unwrap());
        assert!(apply_schema(&conn).unwrap());
        assert!(fts_available(&conn));
    }

    #[test]
    fn documents_written_before_fts_existed_get_indexed() {
        let conn = tables_only();
        assert!(!fts_available(&conn));
        assert!(!sync_documents_fts(&conn).unwrap());
        conn.execute(
            "INSERT INTO documents(path, title, doc_type, content) VALUES ('a.md', 'A', 'wiki', 'alpha beta');",
            [],
        )
        .unwrap();

        apply_schema(&conn).unwrap();
        assert!(sync_documents_fts(&conn).unwrap());
        assert_eq!(fts_count(&conn, "alpha"), 1);
        assert!(!sync_documents_fts(&conn).unwrap());
    }
}
