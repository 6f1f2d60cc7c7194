//! SQLite storage layer.
//!
//! Every public method opens its own connection so callers never manage
//! connection lifetime; `Database` itself is just a resolved path and is
//! cheap to clone into blocking tasks.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::errors::{CgragError, CgragResult};
use crate::graph::CodeGraph;
use crate::models::{DocType, Edge, EdgeKind, Node, NodeKind};
use crate::store::schema;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A document row for the full-text channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub path: String,
    pub title: String,
    pub doc_type: DocType,
    pub content: String,
}

/// Per-symbol diagnostic facts backing the symbol-index queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolFacts {
    pub symbol_id: String,
    pub raises: Vec<String>,
    pub mutates: Vec<String>,
    pub error_strings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Helper: tilde expansion
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite store for symbols, edges, diagnostic facts, and documents.
#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Create a new `Database`. The path is expanded and parent directories
    /// are created if they do not already exist.
    pub fn new(db_path: impl AsRef<Path>) -> CgragResult<Self> {
        let db_str = db_path.as_ref().to_string_lossy();
        let expanded = expand_tilde(&db_str);
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            std::env::current_dir()?.join(&expanded)
        };
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new connection with foreign keys enabled.
    pub fn connect(&self) -> CgragResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Initialise the database schema: set WAL mode, create all tables and
    /// indexes, attempt FTS5 creation, then bring the FTS index in line with
    /// the stored documents.
    pub fn init_schema(&self) -> CgragResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        if schema::apply_schema(&conn)? {
            schema::sync_documents_fts(&conn)?;
        }
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> CgragResult<Option<String>> {
        let conn = self.connect()?;
        let value = conn
            .query_row(
                "SELECT value FROM repo_meta WHERE key = ?1;",
                params![key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_meta(&self, key: &str, value: &str) -> CgragResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO repo_meta(key, value) VALUES(?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Graph
    // -----------------------------------------------------------------------

    /// Replace the whole symbol graph in one transaction. Edges whose
    /// endpoints are not among `nodes` are skipped. Returns the number of
    /// edges written.
    pub fn replace_graph(&self, nodes: &[Node], edges: &[Edge]) -> CgragResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM symbol_raises; DELETE FROM symbol_mutates; \
             DELETE FROM symbol_error_strings; DELETE FROM edges; DELETE FROM symbols;",
        )?;

        let mut known: HashSet<&str> = HashSet::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO symbols(id, name, kind, file_path, start_line, end_line, signature, docstring) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            )?;
            for node in nodes {
                stmt.execute(params![
                    node.id,
                    node.name,
                    node.kind.as_str(),
                    node.file_path,
                    node.line_start,
                    node.line_end,
                    node.signature,
                    node.docstring,
                ])?;
                known.insert(node.id.as_str());
            }
        }

        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO edges(source_id, target_id, relationship, line_number, confidence) \
                 VALUES (?1, ?2, ?3, ?4, ?5);",
            )?;
            for edge in edges {
                if !known.contains(edge.source_id.as_str()) || !known.contains(edge.target_id.as_str()) {
                    continue;
                }
                stmt.execute(params![
                    edge.source_id,
                    edge.target_id,
                    edge.kind.as_str(),
                    edge.line,
                    edge.confidence,
                ])?;
                written += 1;
            }
        }
        tx.commit()?;

        info!("Replaced graph: {} symbols, {} edges", nodes.len(), written);
        Ok(written)
    }

    /// Attach raise/mutation/error-string facts to existing symbols.
    pub fn add_symbol_facts(&self, facts: &[SymbolFacts]) -> CgragResult<()> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        for fact in facts {
            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM symbols WHERE id = ?1;",
                    params![fact.symbol_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(CgragError::Store(format!(
                    "Unknown symbol for facts: {}",
                    fact.symbol_id
                )));
            }
            for exception in &fact.raises {
                tx.execute(
                    "INSERT OR IGNORE INTO symbol_raises(symbol_id, exception) VALUES (?1, ?2);",
                    params![fact.symbol_id, exception],
                )?;
            }
            for variable in &fact.mutates {
                tx.execute(
                    "INSERT OR IGNORE INTO symbol_mutates(symbol_id, variable) VALUES (?1, ?2);",
                    params![fact.symbol_id, variable],
                )?;
            }
            for message in &fact.error_strings {
                tx.execute(
                    "INSERT OR IGNORE INTO symbol_error_strings(symbol_id, message) VALUES (?1, ?2);",
                    params![fact.symbol_id, message],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the persisted graph as an in-memory snapshot.
    pub fn load_graph(&self) -> CgragResult<CodeGraph> {
        let conn = self.connect()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, kind, file_path, start_line, end_line, signature, docstring \
             FROM symbols ORDER BY id;",
        )?;
        let mut nodes = Vec::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?;
        for row in rows {
            let (id, name, kind, file_path, start, end, signature, docstring) = row?;
            let kind: NodeKind = match kind.parse() {
                Ok(k) => k,
                Err(_) => {
                    debug!("Skipping symbol {id} with unknown kind {kind}");
                    continue;
                }
            };
            nodes.push(Node {
                id,
                kind,
                name,
                file_path,
                line_start: start,
                line_end: end,
                docstring,
                signature,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, relationship, confidence, line_number \
             FROM edges ORDER BY id;",
        )?;
        let mut edges = Vec::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<f64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?;
        for row in rows {
            let (source, target, relationship, confidence, line) = row?;
            let Ok(kind) = relationship.parse::<EdgeKind>() else {
                debug!("Skipping edge {source} -> {target} with relationship {relationship}");
                continue;
            };
            edges.push(Edge::new(
                source,
                target,
                kind,
                confidence.unwrap_or(1.0),
                line.unwrap_or(0),
            ));
        }

        Ok(CodeGraph::new(nodes, edges))
    }

    pub fn count_symbols(&self) -> CgragResult<i64> {
        let conn = self.connect()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM symbols;", [], |row| row.get(0))?)
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Insert or replace documents and keep the FTS index in step.
    pub fn upsert_documents(&self, documents: &[DocumentRecord]) -> CgragResult<()> {
        let mut conn = self.connect()?;
        let fts = schema::fts_available(&conn);
        let tx = conn.transaction()?;
        for doc in documents {
            tx.execute(
                "INSERT INTO documents(path, title, doc_type, content) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(path) DO UPDATE SET title = excluded.title, \
                 doc_type = excluded.doc_type, content = excluded.content, \
                 updated_at = CURRENT_TIMESTAMP;",
                params![doc.path, doc.title, doc.doc_type.as_str(), doc.content],
            )?;
            if fts {
                tx.execute("DELETE FROM documents_fts WHERE path = ?1;", params![doc.path])?;
                tx.execute(
                    "INSERT INTO documents_fts(path, title, content, doc_type) VALUES (?1, ?2, ?3, ?4);",
                    params![doc.path, doc.title, doc.content, doc.doc_type.as_str()],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_document(&self, path: &str) -> CgragResult<bool> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM documents WHERE path = ?1;", params![path])?;
        if schema::fts_available(&conn) {
            conn.execute("DELETE FROM documents_fts WHERE path = ?1;", params![path])?;
        }
        Ok(removed > 0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
