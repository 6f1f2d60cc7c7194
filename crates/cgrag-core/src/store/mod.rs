//! SQLite persistence: schema, graph and document storage, and the
//! query-side collaborators built on it.

pub mod database;
pub mod fulltext;
pub mod schema;
pub mod symbol_index;

pub use database::{Database, DocumentRecord, SymbolFacts};
pub use fulltext::SqliteFullText;
pub use symbol_index::{SqliteSymbolIndex, SymbolIndex};
