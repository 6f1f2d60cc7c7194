//! Query-side search collaborators and hybrid fusion.
//!
//! The vector and full-text backends are external; this module fixes the
//! shape of their hits and how those hits become [`SearchResult`]s.

pub mod confidence;
pub mod hybrid;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::CgragResult;
use crate::models::{DocType, ResultSource, SearchResult};

pub use confidence::{confidence_level, evidence_sufficient, ConfidenceLevel};
pub use hybrid::{fuse, HybridOutcome, HybridSearch};

// ---------------------------------------------------------------------------
// Vector channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub path: String,
    pub title: String,
    #[serde(rename = "type")]
    pub doc_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: VectorMetadata,
    pub distance: f64,
}

impl VectorHit {
    pub fn into_result(self) -> SearchResult {
        let path = if self.metadata.path.is_empty() {
            self.id
        } else {
            self.metadata.path
        };
        SearchResult {
            title: if self.metadata.title.is_empty() {
                path.clone()
            } else {
                self.metadata.title
            },
            path,
            content: self.document,
            doc_type: DocType::parse_lenient(&self.metadata.doc_type),
            distance: clamp_distance(self.distance),
            source: ResultSource::Semantic,
        }
    }
}

/// Optional restriction applied by the vector backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilter {
    pub doc_type: Option<DocType>,
    pub path_prefix: Option<String>,
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
        filter: Option<&VectorFilter>,
        cancel: &CancellationToken,
    ) -> CgragResult<Vec<VectorHit>>;
}

// ---------------------------------------------------------------------------
// Full-text channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtsHit {
    pub content: String,
    pub title: String,
    pub path: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub relevance_score: f64,
}

impl FtsHit {
    pub fn into_result(self) -> SearchResult {
        SearchResult {
            distance: fts_distance(self.relevance_score),
            doc_type: DocType::parse_lenient(&self.doc_type),
            path: self.path,
            content: self.content,
            title: self.title,
            source: ResultSource::Fts,
        }
    }
}

#[async_trait]
pub trait FullTextSearch: Send + Sync {
    async fn query(
        &self,
        match_expr: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> CgragResult<Vec<FtsHit>>;
}

// ---------------------------------------------------------------------------
// Distance normalization
// ---------------------------------------------------------------------------

/// Map a backend relevance score of either sign onto a [0, 1] distance;
/// larger magnitudes are closer.
pub fn fts_distance(score: f64) -> f64 {
    if !score.is_finite() {
        return 1.0;
    }
    1.0 / (1.0 + score.abs())
}

pub fn clamp_distance(distance: f64) -> f64 {
    if distance.is_nan() {
        1.0
    } else {
        distance.clamp(0.0, 1.0)
    }
}
