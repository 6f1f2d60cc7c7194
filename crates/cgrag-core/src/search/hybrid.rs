//! Semantic + full-text retrieval fused with reciprocal rank fusion.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{valid_rrf_k, DEFAULT_RRF_K};
use crate::errors::{CgragError, CgragResult};
use crate::guards::{clamp_limit, MAX_SEARCH_LIMIT};
use crate::models::{normalize_path, SearchResult};
use crate::search::{FullTextSearch, VectorSearch};

/// A fused record with its RRF score.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedResult {
    pub result: SearchResult,
    pub score: f64,
}

/// Fuse two ranked lists with reciprocal rank fusion.
///
/// Ranks are 0-based; a `k` that is not strictly positive falls back to the
/// default so the top hit never scores infinity. A path appearing in both lists becomes one record
/// carrying the smaller distance and the first-seen content. Ordering is
/// score descending, then doc-type priority, then first-seen order
/// (semantic list before full-text list).
pub fn fuse(
    semantic: Vec<SearchResult>,
    fts: Vec<SearchResult>,
    k: f64,
    limit: usize,
) -> Vec<FusedResult> {
    let k = if valid_rrf_k(k) { k } else { DEFAULT_RRF_K };
    let mut fused: IndexMap<String, FusedResult> = IndexMap::new();

    for list in [semantic, fts] {
        let mut seen_in_list: Vec<String> = Vec::new();
        for (rank, result) in list.into_iter().enumerate() {
            let key = normalize_path(&result.path);
            if seen_in_list.contains(&key) {
                continue;
            }
            seen_in_list.push(key.clone());
            let contribution = 1.0 / (k + rank as f64);
            match fused.get_mut(&key) {
                Some(existing) => {
                    existing.score += contribution;
                    existing.result.distance = existing.result.distance.min(result.distance);
                }
                None => {
                    fused.insert(
                        key,
                        FusedResult {
                            result,
                            score: contribution,
                        },
                    );
                }
            }
        }
    }

    let mut ranked: Vec<FusedResult> = fused.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.result.doc_type.priority().cmp(&b.result.doc_type.priority()))
    });
    ranked.truncate(limit);
    ranked
}

/// Results of one hybrid search plus which channels answered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HybridOutcome {
    pub results: Vec<SearchResult>,
    pub semantic_ok: bool,
    pub fts_ok: bool,
}

/// Hybrid retriever over optional vector and full-text channels.
#[derive(Clone)]
pub struct HybridSearch {
    vector: Option<Arc<dyn VectorSearch>>,
    fts: Option<Arc<dyn FullTextSearch>>,
    rrf_k: f64,
    channel_timeout: Duration,
}

impl HybridSearch {
    pub fn new(
        vector: Option<Arc<dyn VectorSearch>>,
        fts: Option<Arc<dyn FullTextSearch>>,
    ) -> Self {
        Self {
            vector,
            fts,
            rrf_k: DEFAULT_RRF_K,
            channel_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_rrf_k(mut self, k: f64) -> Self {
        if valid_rrf_k(k) {
            self.rrf_k = k;
        }
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    pub fn vector(&self) -> Option<&Arc<dyn VectorSearch>> {
        self.vector.as_ref()
    }

    async fn semantic_channel(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Option<Vec<SearchResult>> {
        let vector = self.vector.as_ref()?;
        match tokio::time::timeout(self.channel_timeout, vector.query(query, limit, None, cancel))
            .await
        {
            Ok(Ok(hits)) => Some(hits.into_iter().map(|h| h.into_result()).collect()),
            Ok(Err(e)) => {
                warn!("Semantic search failed: {e}");
                None
            }
            Err(_) => {
                warn!("Semantic search timed out after {:?}", self.channel_timeout);
                None
            }
        }
    }

    async fn fts_channel(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Option<Vec<SearchResult>> {
        let fts = self.fts.as_ref()?;
        match tokio::time::timeout(self.channel_timeout, fts.query(query, limit, cancel)).await {
            Ok(Ok(hits)) => Some(hits.into_iter().map(|h| h.into_result()).collect()),
            Ok(Err(e)) => {
                warn!("Full-text search failed: {e}");
                None
            }
            Err(_) => {
                warn!("Full-text search timed out after {:?}", self.channel_timeout);
                None
            }
        }
    }

    /// Run both channels concurrently and fuse whatever came back. A failed
    /// or missing channel only clears its flag; cancellation is the sole
    /// error.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> CgragResult<HybridOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(HybridOutcome::default());
        }
        let limit = clamp_limit(limit, MAX_SEARCH_LIMIT);

        let (semantic, fts) = tokio::join!(
            self.semantic_channel(query, limit, cancel),
            self.fts_channel(query, limit, cancel),
        );
        if cancel.is_cancelled() {
            return Err(CgragError::Cancelled);
        }

        let outcome = HybridOutcome {
            semantic_ok: semantic.is_some(),
            fts_ok: fts.is_some(),
            results: fuse(
                semantic.unwrap_or_default(),
                fts.unwrap_or_default(),
                self.rrf_k,
                limit,
            )
            .into_iter()
            .map(|f| f.result)
            .collect(),
        };
        debug!(
            "Hybrid search: {} results (semantic_ok={}, fts_ok={})",
            outcome.results.len(),
            outcome.semantic_ok,
            outcome.fts_ok
        );
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocType, ResultSource};
    use crate::testing::{fts_hit, result, vector_hit, FailingFts, SlowVector, StaticFts, StaticVector};

    #[test]
    fn agreement_outranks_single_channel_top_hit() {
        let semantic = vec![
            result("a.md", DocType::Wiki, 0.2, ResultSource::Semantic),
            result("c.md", DocType::Wiki, 0.4, ResultSource::Semantic),
        ];
        let fts = vec![
            result("b.md", DocType::Wiki, 0.3, ResultSource::Fts),
            result("a.md", DocType::Wiki, 0.1, ResultSource::Fts),
        ];
        let fused = fuse(semantic, fts, 60.0, 10);
        let paths: Vec<&str> = fused.iter().map(|f| f.result.path.as_str()).collect();
        assert_eq!(paths, vec!["a.md", "b.md", "c.md"]);
        assert!((fused[0].score - (1.0 / 60.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert_eq!(fused[0].result.distance, 0.1);
        assert_eq!(fused[0].result.source, ResultSource::Semantic);
    }

    #[test]
    fn zero_k_still_rewards_agreement() {
        let semantic = vec![
            result("a.md", DocType::Wiki, 0.2, ResultSource::Semantic),
            result("b.md", DocType::Wiki, 0.3, ResultSource::Semantic),
        ];
        let fts = vec![
            result("c.md", DocType::Wiki, 0.3, ResultSource::Fts),
            result("b.md", DocType::Wiki, 0.1, ResultSource::Fts),
        ];
        let fused = fuse(semantic, fts, 0.0, 10);
        assert!(fused.iter().all(|f| f.score.is_finite()));
        assert_eq!(fused[0].result.path, "b.md");

        let hybrid = HybridSearch::new(None, None).with_rrf_k(0.0);
        assert_eq!(hybrid.rrf_k, DEFAULT_RRF_K);
    }

    #[test]
    fn duplicate_paths_merge_after_normalization() {
        let semantic = vec![result("./Docs/Auth.md", DocType::Wiki, 0.5, ResultSource::Semantic)];
        let fts = vec![result("docs/auth.md", DocType::Wiki, 0.3, ResultSource::Fts)];
        let fused = fuse(semantic, fts, 60.0, 10);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].result.distance, 0.3);
    }

    #[test]
    fn equal_scores_break_on_doc_type_then_order() {
        let semantic = vec![result("wiki.md", DocType::Wiki, 0.5, ResultSource::Semantic)];
        let fts = vec![result("note.md", DocType::Note, 0.5, ResultSource::Fts)];
        let fused = fuse(semantic.clone(), fts, 60.0, 10);
        assert_eq!(fused[0].result.path, "note.md");

        let fts_same_type = vec![result("other.md", DocType::Wiki, 0.5, ResultSource::Fts)];
        let fused = fuse(semantic, fts_same_type, 60.0, 10);
        assert_eq!(fused[0].result.path, "wiki.md");
    }

    #[test]
    fn fuse_truncates_to_limit_and_is_deterministic() {
        let semantic: Vec<_> = (0..5)
            .map(|i| result(&format!("s{i}.md"), DocType::Code, 0.4, ResultSource::Semantic))
            .collect();
        let first = fuse(semantic.clone(), Vec::new(), 60.0, 3);
        let second = fuse(semantic, Vec::new(), 60.0, 3);
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn search_survives_a_failing_channel() {
        let hybrid = HybridSearch::new(
            Some(Arc::new(StaticVector::new(vec![vector_hit("a.md", "A", "wiki", 0.2)]))),
            Some(Arc::new(FailingFts)),
        );
        let outcome = hybrid.search("auth", 5, &CancellationToken::new()).await.unwrap();
        assert!(outcome.semantic_ok);
        assert!(!outcome.fts_ok);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn search_fuses_both_channels() {
        let hybrid = HybridSearch::new(
            Some(Arc::new(StaticVector::new(vec![
                vector_hit("a.md", "A", "wiki", 0.2),
                vector_hit("c.md", "C", "wiki", 0.5),
            ]))),
            Some(Arc::new(StaticFts::new(vec![
                fts_hit("b.md", "B", "wiki", -3.0),
                fts_hit("a.md", "A", "wiki", -2.0),
            ]))),
        );
        let outcome = hybrid.search("auth", 5, &CancellationToken::new()).await.unwrap();
        assert!(outcome.semantic_ok && outcome.fts_ok);
        assert_eq!(outcome.results[0].path, "a.md");
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test]
    async fn slow_channel_times_out_without_failing_search() {
        let hybrid = HybridSearch::new(
            Some(Arc::new(SlowVector::new(Duration::from_secs(5)))),
            Some(Arc::new(StaticFts::new(vec![fts_hit("b.md", "B", "note", -1.0)]))),
        )
        .with_channel_timeout(Duration::from_millis(20));
        let outcome = hybrid.search("anything", 5, &CancellationToken::new()).await.unwrap();
        assert!(!outcome.semantic_ok);
        assert!(outcome.fts_ok);
        assert_eq!(outcome.results[0].path, "b.md");
    }

    #[tokio::test]
    async fn cancelled_search_is_an_error() {
        let hybrid = HybridSearch::new(Some(Arc::new(SlowVector::new(Duration::from_secs(5)))), None);
        let token = CancellationToken::new();
        token.cancel();
        let err = hybrid.search("anything", 5, &token).await.unwrap_err();
        assert!(matches!(err, CgragError::Cancelled));
    }

    #[tokio::test]
    async fn blank_query_skips_channels() {
        let hybrid = HybridSearch::new(None, None);
        let outcome = hybrid.search("   ", 5, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, HybridOutcome::default());
    }
}
