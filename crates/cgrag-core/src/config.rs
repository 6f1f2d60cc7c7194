//! Runtime configuration with environment overrides.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{CgragError, CgragResult};
use crate::guards::{
    clamp_confidence, clamp_limit, clamp_usize, MAX_NEIGHBORHOOD_HOPS, MAX_PASSES_LIMIT,
    MAX_SEARCH_LIMIT, MAX_SESSION_NODES, MIN_SESSION_NODES,
};

pub const DEFAULT_MAX_PASSES: usize = 3;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_SESSION_NODES: usize = 200;
pub const DEFAULT_RRF_K: f64 = 60.0;

/// RRF smoothing constant must be finite and strictly positive; at zero the
/// top-ranked hit of either list scores infinity.
pub fn valid_rrf_k(k: f64) -> bool {
    k.is_finite() && k > 0.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CgragConfig {
    pub max_passes: usize,
    pub session_ttl_secs: u64,
    pub max_session_nodes: usize,
    pub rrf_k: f64,
    pub search_limit: usize,
    pub vector_top_k: usize,
    pub graph_hops: usize,
    pub min_edge_confidence: f64,
    pub gap_timeout_ms: u64,
    pub channel_timeout_ms: u64,
    pub temperature: f32,
    pub status_buffer: usize,
    pub cgrag_enabled: bool,
}

impl Default for CgragConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_session_nodes: DEFAULT_MAX_SESSION_NODES,
            rrf_k: DEFAULT_RRF_K,
            search_limit: 10,
            vector_top_k: 5,
            graph_hops: 1,
            min_edge_confidence: 0.0,
            gap_timeout_ms: 10_000,
            channel_timeout_ms: 10_000,
            temperature: 0.2,
            status_buffer: 32,
            cgrag_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment parsing
// ---------------------------------------------------------------------------

fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable value for {key}: {raw:?}");
            None
        }
    }
}

/// Boolean flag where `0/false/no/off` disable and anything else enables.
fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            !matches!(v.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => default,
    }
}

impl CgragConfig {
    /// Defaults overridden by `CGRAG_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parsed("CGRAG_MAX_PASSES") {
            config.max_passes = v;
        }
        if let Some(v) = env_parsed("CGRAG_SESSION_TTL_SECS") {
            config.session_ttl_secs = v;
        }
        if let Some(v) = env_parsed("CGRAG_MAX_SESSION_NODES") {
            config.max_session_nodes = v;
        }
        if let Some(v) = env_parsed("CGRAG_RRF_K") {
            config.rrf_k = v;
        }
        if let Some(v) = env_parsed("CGRAG_SEARCH_LIMIT") {
            config.search_limit = v;
        }
        if let Some(v) = env_parsed("CGRAG_VECTOR_TOP_K") {
            config.vector_top_k = v;
        }
        if let Some(v) = env_parsed("CGRAG_GRAPH_HOPS") {
            config.graph_hops = v;
        }
        if let Some(v) = env_parsed("CGRAG_MIN_EDGE_CONFIDENCE") {
            config.min_edge_confidence = v;
        }
        if let Some(v) = env_parsed("CGRAG_GAP_TIMEOUT_MS") {
            config.gap_timeout_ms = v;
        }
        if let Some(v) = env_parsed("CGRAG_CHANNEL_TIMEOUT_MS") {
            config.channel_timeout_ms = v;
        }
        if let Some(v) = env_parsed("CGRAG_TEMPERATURE") {
            config.temperature = v;
        }
        if let Some(v) = env_parsed("CGRAG_STATUS_BUFFER") {
            config.status_buffer = v;
        }
        config.cgrag_enabled = env_flag("CGRAG_ENABLED", config.cgrag_enabled);
        config.clamped()
    }

    /// Load from a JSON document; missing fields take their defaults.
    pub fn from_json(raw: &str) -> CgragResult<Self> {
        let config: CgragConfig = serde_json::from_str(raw)?;
        if !valid_rrf_k(config.rrf_k) {
            return Err(CgragError::Config(format!(
                "rrf_k must be a positive number, got {}",
                config.rrf_k
            )));
        }
        Ok(config.clamped())
    }

    /// Force every field into its supported range.
    pub fn clamped(mut self) -> Self {
        self.max_passes = clamp_usize(self.max_passes, 1, MAX_PASSES_LIMIT);
        self.max_session_nodes =
            clamp_usize(self.max_session_nodes, MIN_SESSION_NODES, MAX_SESSION_NODES);
        self.search_limit = clamp_limit(self.search_limit, MAX_SEARCH_LIMIT);
        self.vector_top_k = clamp_limit(self.vector_top_k, MAX_SEARCH_LIMIT);
        self.graph_hops = clamp_usize(self.graph_hops, 1, MAX_NEIGHBORHOOD_HOPS);
        self.min_edge_confidence = clamp_confidence(self.min_edge_confidence);
        if !valid_rrf_k(self.rrf_k) {
            self.rrf_k = DEFAULT_RRF_K;
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.status_buffer = self.status_buffer.max(1);
        self.session_ttl_secs = self.session_ttl_secs.max(1);
        self
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn gap_timeout(&self) -> Duration {
        Duration::from_millis(self.gap_timeout_ms.max(1))
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_millis(self.channel_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let config = CgragConfig::default();
        assert_eq!(config.max_passes, 3);
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.session_ttl(), Duration::from_secs(3600));
        assert!(config.cgrag_enabled);
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = CgragConfig::from_json(r#"{"max_passes": 2, "search_limit": 4}"#).unwrap();
        assert_eq!(config.max_passes, 2);
        assert_eq!(config.search_limit, 4);
        assert_eq!(config.vector_top_k, 5);
    }

    #[test]
    fn from_json_clamps_out_of_range_values() {
        let config =
            CgragConfig::from_json(r#"{"max_passes": 0, "graph_hops": 99, "min_edge_confidence": 3.0}"#)
                .unwrap();
        assert_eq!(config.max_passes, 1);
        assert_eq!(config.graph_hops, MAX_NEIGHBORHOOD_HOPS);
        assert_eq!(config.min_edge_confidence, 1.0);
    }

    #[test]
    fn from_json_rejects_negative_rrf_k() {
        let err = CgragConfig::from_json(r#"{"rrf_k": -1.0}"#).unwrap_err();
        assert!(matches!(err, CgragError::Config(_)));
    }

    #[test]
    fn zero_rrf_k_is_rejected_or_reset() {
        assert!(matches!(
            CgragConfig::from_json(r#"{"rrf_k": 0.0}"#).unwrap_err(),
            CgragError::Config(_)
        ));
        let config = CgragConfig {
            rrf_k: 0.0,
            ..Default::default()
        }
        .clamped();
        assert_eq!(config.rrf_k, DEFAULT_RRF_K);
    }

    #[test]
    fn from_json_rejects_malformed_documents() {
        assert!(matches!(
            CgragConfig::from_json("{not json").unwrap_err(),
            CgragError::Json(_)
        ));
    }
}
