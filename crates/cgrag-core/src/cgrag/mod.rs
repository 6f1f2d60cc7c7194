//! Iterative retrieval: gap parsing, per-conversation sessions, retrieval
//! strategies, the refinement loop, and the ask entry point built on them.

pub mod ask;
pub mod modes;
pub mod orchestrator;
pub mod parser;
pub mod session;
pub mod strategies;

pub use ask::{AskRequest, AskResponse, AskService, CgragStats, SearchQuality, StreamEvent};
pub use modes::AskMode;
pub use orchestrator::{CgragLoopResult, CgragOrchestrator, Stage, Status, StatusSink};
pub use parser::{parse_answer, parse_gaps, parse_response, ParsedResponse};
pub use session::{CgragSession, SessionHandle, SessionStore};
pub use strategies::{GapOutcome, GraphLookup, RetrievalStrategy, Retrieved, StrategyChain, VectorLookup};
