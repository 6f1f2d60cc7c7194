//! CGRAG core library: question answering over a codebase.
//!
//! A question is answered by fusing semantic and full-text search, asking a
//! language model, and then repeatedly filling the gaps the model reports
//! from the code graph and the vector store until it stops asking or the
//! pass budget runs out. Every answer carries a confidence level derived
//! from the retrieved evidence.
//!
//! External systems (the language model, the vector store) are traits;
//! the graph, symbol index, and full-text index are backed by SQLite.

pub mod cgrag;
pub mod config;
pub mod errors;
pub mod graph;
pub mod guards;
pub mod llm;
pub mod models;
pub mod search;
pub mod store;

#[cfg(test)]
mod testing;

pub use cgrag::{AskMode, AskRequest, AskResponse, AskService, CgragOrchestrator, SessionStore, StreamEvent};
pub use config::CgragConfig;
pub use errors::{CgragError, CgragResult, LlmError};
pub use graph::{CodeGraph, GraphHandle};
pub use llm::LanguageModel;
pub use search::{ConfidenceLevel, FullTextSearch, HybridSearch, VectorSearch};
