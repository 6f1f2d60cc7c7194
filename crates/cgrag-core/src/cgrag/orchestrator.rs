//! The bounded multi-pass refinement loop.
//!
//! Each pass asks the model, parses its answer and gaps, and resolves gaps
//! not already known to be dead through the strategy chain. Retrieved text
//! is appended to the running context for the next pass.

use std::sync::Arc;

use indexmap::IndexSet;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cgrag::ask::StreamEvent;
use crate::cgrag::parser::parse_response;
use crate::cgrag::session::SessionHandle;
use crate::cgrag::strategies::{GapOutcome, StrategyChain};
use crate::config::{CgragConfig, DEFAULT_MAX_PASSES};
use crate::errors::{CgragError, CgragResult};
use crate::guards::{clamp_usize, MAX_PASSES_LIMIT};
use crate::llm::{build_prompt, generate_cancellable, LanguageModel};
use crate::models::SearchResult;

pub type StatusSink = mpsc::Sender<StreamEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Searching,
    Generating,
    Retrieving,
}

/// Progress notice emitted before each search, generation, or retrieval step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub stage: Stage,
    pub pass: Option<usize>,
    pub message: String,
}

/// Best-effort: a full or closed channel drops the update.
pub fn emit(sink: Option<&StatusSink>, stage: Stage, pass: Option<usize>, message: impl Into<String>) {
    let Some(tx) = sink else {
        return;
    };
    let status = Status {
        stage,
        pass,
        message: message.into(),
    };
    if let Err(e) = tx.try_send(StreamEvent::Status(status)) {
        debug!("Dropped status update: {e}");
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CgragLoopResult {
    pub answer: String,
    pub passes_used: usize,
    /// Every gap reported across passes, deduplicated, first-seen order.
    pub gaps_identified: Vec<String>,
    /// Gaps resolved in the most recent retrieval pass.
    pub gaps_resolved: Vec<String>,
    /// Gaps left unresolved in the most recent retrieval pass.
    pub gaps_unresolved: Vec<String>,
    #[serde(skip)]
    pub retrieved: Vec<SearchResult>,
    /// The model failed after an earlier pass had already answered.
    pub partial: bool,
}

#[derive(Clone)]
pub struct CgragOrchestrator {
    llm: Arc<dyn LanguageModel>,
    chain: StrategyChain,
    max_passes: usize,
    temperature: f32,
}

impl CgragOrchestrator {
    pub fn new(llm: Arc<dyn LanguageModel>, chain: StrategyChain) -> Self {
        Self {
            llm,
            chain,
            max_passes: DEFAULT_MAX_PASSES,
            temperature: 0.2,
        }
    }

    pub fn from_config(llm: Arc<dyn LanguageModel>, chain: StrategyChain, config: &CgragConfig) -> Self {
        Self::new(llm, chain)
            .with_max_passes(config.max_passes)
            .with_temperature(config.temperature)
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = clamp_usize(max_passes, 1, MAX_PASSES_LIMIT);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_chain(&self, chain: StrategyChain) -> Self {
        Self {
            chain,
            ..self.clone()
        }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub async fn run_loop(
        &self,
        question: &str,
        initial_context: &str,
        session: &SessionHandle,
        cancel: &CancellationToken,
        status: Option<&StatusSink>,
    ) -> CgragResult<CgragLoopResult> {
        let mut context = initial_context.trim().to_string();
        let mut identified: IndexSet<String> = IndexSet::new();
        let mut result = CgragLoopResult::default();
        let mut answered = false;

        for pass in 1..=self.max_passes {
            emit(status, Stage::Generating, Some(pass), format!("Generating answer (pass {pass})"));
            let prompt = build_prompt(question, &context);
            let response = match generate_cancellable(self.llm.as_ref(), &prompt, self.temperature, cancel).await {
                Ok(text) => text,
                Err(CgragError::Llm(e)) if answered => {
                    warn!("LLM failed on pass {pass}; returning the answer from pass {}: {e}", pass - 1);
                    result.partial = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            let parsed = parse_response(&response);
            result.answer = parsed.answer;
            result.passes_used = pass;
            answered = true;
            for gap in &parsed.gaps {
                identified.insert(gap.clone());
            }

            if parsed.gaps.is_empty() {
                debug!("Pass {pass}: no gaps reported");
                break;
            }

            let reported: IndexSet<&String> = parsed.gaps.iter().collect();
            let new_gaps: Vec<String> = {
                let guard = session.lock();
                reported
                    .iter()
                    .filter(|gap| !guard.is_not_found(gap.as_str()))
                    .map(|gap| gap.to_string())
                    .collect()
            };
            if new_gaps.is_empty() {
                debug!("Pass {pass}: all {} gaps already known unresolvable", reported.len());
                result.gaps_resolved.clear();
                result.gaps_unresolved = reported.into_iter().cloned().collect();
                break;
            }

            info!("Pass {pass}: retrieving {} gaps", new_gaps.len());
            emit(
                status,
                Stage::Retrieving,
                Some(pass),
                format!("Retrieving context for {} gaps", new_gaps.len()),
            );
            result.gaps_resolved.clear();
            result.gaps_unresolved.clear();
            for gap in new_gaps {
                if cancel.is_cancelled() {
                    return Err(CgragError::Cancelled);
                }
                match self.chain.retrieve_for_gap(&gap, session, cancel).await? {
                    GapOutcome::Resolved { retrieved, .. } => {
                        if !retrieved.text.is_empty() {
                            if !context.is_empty() {
                                context.push_str("\n\n");
                            }
                            context.push_str(&retrieved.text);
                        }
                        result.retrieved.extend(retrieved.results);
                        result.gaps_resolved.push(gap);
                    }
                    GapOutcome::Missed | GapOutcome::TimedOut => result.gaps_unresolved.push(gap),
                }
            }
        }

        result.gaps_identified = identified.into_iter().collect();
        Ok(result)
    }
}
