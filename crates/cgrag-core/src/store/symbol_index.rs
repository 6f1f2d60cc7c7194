//! Read-only symbol index over the SQLite store.

use rusqlite::{params, Connection};

use crate::errors::CgragResult;
use crate::guards::{clamp_limit, MAX_SEARCH_LIMIT, MAX_SYMBOL_SCAN};
use crate::models::SymbolEntry;
use crate::store::database::Database;

/// Query surface the mode retrievers run against.
///
/// Implementations are synchronous; async callers move them onto the
/// blocking pool.
pub trait SymbolIndex: Send + Sync {
    /// Symbols that raise the given exception type (exact match).
    fn by_raises(&self, exception: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>>;

    /// Symbols whose error strings contain `fragment` (case-insensitive).
    fn by_error_string(&self, fragment: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>>;

    /// Symbols that mutate the named variable.
    fn by_mutates(&self, variable: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>>;

    /// Symbols filtered by file pattern (`*` wildcard, otherwise substring)
    /// and/or exact symbol name. With neither filter every symbol matches,
    /// up to a larger scan cap than the other queries.
    fn find_symbols(
        &self,
        file_pattern: Option<&str>,
        name: Option<&str>,
        limit: usize,
    ) -> CgragResult<Vec<SymbolEntry>>;

    /// Symbols with a `calls` edge into any symbol named `name`.
    fn callers_of(&self, name: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>>;

    /// Symbols reached by a `calls` edge from any symbol named `name`.
    fn callees_of(&self, name: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SqliteSymbolIndex {
    db: Database,
}

impl SqliteSymbolIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn entries_for_ids(&self, sql: &str, param: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        let conn = self.db.connect()?;
        let limit = clamp_limit(limit, MAX_SEARCH_LIMIT) as i64;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params![param, limit], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        load_entries(&conn, &ids)
    }
}

/// Convert a user file pattern into a LIKE expression.
fn like_pattern(file_pattern: &str) -> String {
    if file_pattern.contains('*') {
        file_pattern.replace('*', "%")
    } else {
        format!("%{file_pattern}%")
    }
}

fn string_column(conn: &Connection, sql: &str, symbol_id: &str) -> CgragResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params![symbol_id], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<_, _>>()?)
}

fn load_entry(conn: &Connection, symbol_id: &str) -> CgragResult<Option<SymbolEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, kind, file_path, start_line, end_line, signature, docstring \
         FROM symbols WHERE id = ?1;",
    )?;
    let mut rows = stmt.query(params![symbol_id])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut entry = SymbolEntry {
        symbol_name: row.get(0)?,
        symbol_type: row.get(1)?,
        file_path: row.get(2)?,
        line_start: row.get(3)?,
        line_end: row.get(4)?,
        signature: row.get(5)?,
        docstring: row.get(6)?,
        ..Default::default()
    };
    drop(rows);

    entry.calls = string_column(
        conn,
        "SELECT DISTINCT t.name FROM edges e JOIN symbols t ON t.id = e.target_id \
         WHERE e.source_id = ?1 AND e.relationship = 'calls' ORDER BY e.id;",
        symbol_id,
    )?;
    entry.called_by = string_column(
        conn,
        "SELECT DISTINCT s.name FROM edges e JOIN symbols s ON s.id = e.source_id \
         WHERE e.target_id = ?1 AND e.relationship = 'calls' ORDER BY e.id;",
        symbol_id,
    )?;
    entry.raises = string_column(
        conn,
        "SELECT exception FROM symbol_raises WHERE symbol_id = ?1 ORDER BY rowid;",
        symbol_id,
    )?;
    entry.mutates = string_column(
        conn,
        "SELECT variable FROM symbol_mutates WHERE symbol_id = ?1 ORDER BY rowid;",
        symbol_id,
    )?;
    entry.error_strings = string_column(
        conn,
        "SELECT message FROM symbol_error_strings WHERE symbol_id = ?1 ORDER BY rowid;",
        symbol_id,
    )?;
    Ok(Some(entry))
}

fn load_entries(conn: &Connection, ids: &[String]) -> CgragResult<Vec<SymbolEntry>> {
    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(entry) = load_entry(conn, id)? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

impl SymbolIndex for SqliteSymbolIndex {
    fn by_raises(&self, exception: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        self.entries_for_ids(
            "SELECT DISTINCT s.id FROM symbol_raises r JOIN symbols s ON s.id = r.symbol_id \
             WHERE r.exception = ?1 ORDER BY s.file_path, s.name LIMIT ?2;",
            exception,
            limit,
        )
    }

    fn by_error_string(&self, fragment: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        let pattern = format!("%{}%", fragment.to_lowercase());
        self.entries_for_ids(
            "SELECT DISTINCT s.id FROM symbol_error_strings m JOIN symbols s ON s.id = m.symbol_id \
             WHERE LOWER(m.message) LIKE ?1 ORDER BY s.file_path, s.name LIMIT ?2;",
            &pattern,
            limit,
        )
    }

    fn by_mutates(&self, variable: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        self.entries_for_ids(
            "SELECT DISTINCT s.id FROM symbol_mutates m JOIN symbols s ON s.id = m.symbol_id \
             WHERE m.variable = ?1 ORDER BY s.file_path, s.name LIMIT ?2;",
            variable,
            limit,
        )
    }

    fn find_symbols(
        &self,
        file_pattern: Option<&str>,
        name: Option<&str>,
        limit: usize,
    ) -> CgragResult<Vec<SymbolEntry>> {
        let conn = self.db.connect()?;
        let mut sql = String::from("SELECT id FROM symbols WHERE 1 = 1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        let mut param_idx = 1;

        if let Some(pattern) = file_pattern.filter(|p| !p.trim().is_empty()) {
            sql.push_str(&format!(" AND file_path LIKE ?{param_idx}"));
            params.push(Box::new(like_pattern(pattern.trim())));
            param_idx += 1;
        }
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            sql.push_str(&format!(" AND name = ?{param_idx}"));
            params.push(Box::new(name.trim().to_string()));
            param_idx += 1;
        }
        sql.push_str(&format!(
            " ORDER BY LENGTH(file_path) ASC, id ASC LIMIT ?{param_idx}"
        ));
        params.push(Box::new(clamp_limit(limit, MAX_SYMBOL_SCAN) as i64));

        let ids: Vec<String> = {
            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        load_entries(&conn, &ids)
    }

    fn callers_of(&self, name: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        self.entries_for_ids(
            "SELECT DISTINCT s.id FROM edges e \
             JOIN symbols t ON t.id = e.target_id \
             JOIN symbols s ON s.id = e.source_id \
             WHERE t.name = ?1 AND e.relationship = 'calls' \
             ORDER BY s.file_path, s.name LIMIT ?2;",
            name,
            limit,
        )
    }

    fn callees_of(&self, name: &str, limit: usize) -> CgragResult<Vec<SymbolEntry>> {
        self.entries_for_ids(
            "SELECT DISTINCT t.id FROM edges e \
             JOIN symbols s ON s.id = e.source_id \
             JOIN symbols t ON t.id = e.target_id \
             WHERE s.name = ?1 AND e.relationship = 'calls' \
             ORDER BY t.file_path, t.name LIMIT ?2;",
            name,
            limit,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
