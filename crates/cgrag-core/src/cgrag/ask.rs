//! Question answering entry point: hybrid search, the refinement loop, and
//! confidence gating, with a streaming variant.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cgrag::modes::AskMode;
use crate::cgrag::orchestrator::{emit, CgragLoopResult, CgragOrchestrator, Stage, Status, StatusSink};
use crate::cgrag::parser::parse_answer;
use crate::cgrag::session::SessionStore;
use crate::cgrag::strategies::StrategyChain;
use crate::config::CgragConfig;
use crate::errors::{CgragError, CgragResult};
use crate::graph::GraphHandle;
use crate::guards::truncate_question;
use crate::llm::{build_prompt, generate_cancellable, LanguageModel};
use crate::models::SearchResult;
use crate::search::confidence::assess;
use crate::search::{ConfidenceLevel, HybridSearch};
use crate::store::SymbolIndex;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub mode: AskMode,
}

impl AskRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_mode(mut self, mode: AskMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchQuality {
    pub semantic_searched: bool,
    pub fts_searched: bool,
    pub results_found: usize,
    pub results_used: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CgragStats {
    pub passes_used: usize,
    pub gaps_identified: Vec<String>,
    pub gaps_resolved: Vec<String>,
    pub gaps_unresolved: Vec<String>,
    pub partial: bool,
}

impl From<&CgragLoopResult> for CgragStats {
    fn from(result: &CgragLoopResult) -> Self {
        Self {
            passes_used: result.passes_used,
            gaps_identified: result.gaps_identified.clone(),
            gaps_resolved: result.gaps_resolved.clone(),
            gaps_unresolved: result.gaps_unresolved.clone(),
            partial: result.partial,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub citations: Vec<String>,
    pub confidence: ConfidenceLevel,
    pub disclaimer: String,
    pub search_quality: SearchQuality,
    pub session_id: String,
    /// Absent when the refinement loop is disabled.
    pub cgrag: Option<CgragStats>,
}

/// Events on an `ask_stream` channel: any number of `status`, then exactly
/// one `done` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status(Status),
    Done {
        answer: String,
        citations: Vec<String>,
        confidence: ConfidenceLevel,
    },
    Error {
        code: String,
        message: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Status(_))
    }
}

/// Unique paths in first-seen order.
pub fn citations(results: &[SearchResult]) -> Vec<String> {
    let mut seen = HashSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.path.as_str()))
        .map(|r| r.path.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct AskService {
    config: CgragConfig,
    llm: Arc<dyn LanguageModel>,
    hybrid: HybridSearch,
    chain: StrategyChain,
    orchestrator: CgragOrchestrator,
    sessions: Arc<SessionStore>,
    symbols: Option<Arc<dyn SymbolIndex>>,
}

impl AskService {
    /// The standard strategy chain is built from `graph` and the hybrid
    /// search's vector channel.
    pub fn new(
        config: CgragConfig,
        llm: Arc<dyn LanguageModel>,
        hybrid: HybridSearch,
        graph: Option<GraphHandle>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        let hybrid = hybrid
            .with_rrf_k(config.rrf_k)
            .with_channel_timeout(config.channel_timeout());
        let chain = StrategyChain::standard(graph, hybrid.vector().cloned(), &config);
        let orchestrator = CgragOrchestrator::from_config(llm.clone(), chain.clone(), &config);
        Self {
            config,
            llm,
            hybrid,
            chain,
            orchestrator,
            sessions,
            symbols: None,
        }
    }

    /// Enable the diagnostic, exploratory, and analytical modes.
    pub fn with_symbol_index(mut self, index: Arc<dyn SymbolIndex>) -> Self {
        self.symbols = Some(index);
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn config(&self) -> &CgragConfig {
        &self.config
    }

    pub async fn ask(&self, request: AskRequest, cancel: &CancellationToken) -> CgragResult<AskResponse> {
        self.answer(request, cancel, None).await
    }

    /// Run [`Self::ask`] on a task and report progress on a bounded channel.
    /// Status events are dropped when the buffer is full; the terminal event
    /// waits for room. Dropping the receiver cancels the request.
    pub fn ask_stream(self: &Arc<Self>, request: AskRequest, cancel: CancellationToken) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.status_buffer.max(1));
        let service = Arc::clone(self);
        let token = cancel.child_token();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = service.answer(request, &token, Some(&tx)) => outcome,
                _ = tx.closed() => {
                    token.cancel();
                    debug!("Stream receiver dropped; request abandoned");
                    return;
                }
            };
            let terminal = match outcome {
                Ok(response) => StreamEvent::Done {
                    answer: response.answer,
                    citations: response.citations,
                    confidence: response.confidence,
                },
                Err(e) => StreamEvent::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                },
            };
            if tx.send(terminal).await.is_err() {
                debug!("Stream receiver dropped before the final event");
            }
        });
        rx
    }

    async fn answer(
        &self,
        request: AskRequest,
        cancel: &CancellationToken,
        status: Option<&StatusSink>,
    ) -> CgragResult<AskResponse> {
        let question = truncate_question(&request.question);
        if question.is_empty() {
            return Err(CgragError::InvalidRequest("question must not be empty".into()));
        }

        let session = self.sessions.get_or_create(request.session_id.as_deref());
        let session_id = session.lock().id().to_string();

        emit(status, Stage::Searching, None, "Searching code and documentation");
        let outcome = self.hybrid.search(&question, self.config.search_limit, cancel).await?;

        let mode_strategy = match &self.symbols {
            Some(index) => request.mode.strategy(index.clone()),
            None => {
                if request.mode != AskMode::General {
                    warn!("Mode {} requested without a symbol index; using general", request.mode);
                }
                None
            }
        };

        let mut initial: Vec<SearchResult> = Vec::new();
        if let Some(strategy) = &mode_strategy {
            match strategy.retrieve(&question, cancel).await {
                Ok(Some(retrieved)) => initial.extend(retrieved.results),
                Ok(None) => debug!("{} mode found nothing for the question", strategy.name()),
                Err(CgragError::Cancelled) => return Err(CgragError::Cancelled),
                Err(e) => warn!("{} mode retrieval failed: {e}", strategy.name()),
            }
        }
        initial.extend(outcome.results);

        let results_found = initial.len();
        initial.truncate(self.config.search_limit);
        let context = initial
            .iter()
            .map(SearchResult::context_block)
            .collect::<Vec<_>>()
            .join("\n\n");

        let (answer, loop_result) = if self.config.cgrag_enabled {
            let orchestrator = match mode_strategy {
                Some(strategy) => self.orchestrator.with_chain(self.chain.with_leading(strategy)),
                None => self.orchestrator.clone(),
            };
            let result = orchestrator
                .run_loop(&question, &context, &session, cancel, status)
                .await?;
            (result.answer.clone(), Some(result))
        } else {
            emit(status, Stage::Generating, Some(1), "Generating answer");
            let prompt = build_prompt(&question, &context);
            let text = generate_cancellable(self.llm.as_ref(), &prompt, self.config.temperature, cancel).await?;
            (parse_answer(&text), None)
        };

        let mut evidence = initial;
        let results_used = evidence.len();
        if let Some(result) = &loop_result {
            evidence.extend(result.retrieved.iter().cloned());
        }
        let assessment = assess(&evidence);
        info!(
            "Answered question in session {session_id}: confidence {}, {} sources",
            assessment.level.as_str(),
            evidence.len()
        );

        Ok(AskResponse {
            answer,
            citations: citations(&evidence),
            confidence: assessment.level,
            disclaimer: assessment.disclaimer.to_string(),
            search_quality: SearchQuality {
                semantic_searched: outcome.semantic_ok,
                fts_searched: outcome.fts_ok,
                results_found,
                results_used,
            },
            session_id,
            cgrag: loop_result.as_ref().map(CgragStats::from),
        })
    }
}
