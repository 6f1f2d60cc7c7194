//! Evidence sufficiency and confidence scoring over a result list.

use serde::{Deserialize, Serialize};

use crate::models::SearchResult;

const SUFFICIENT_DISTANCE: f64 = 0.8;
const CLOSE_DISTANCE: f64 = 0.5;
const HIGH_BEST_DISTANCE: f64 = 0.3;
const MEDIUM_BEST_DISTANCE: f64 = 0.6;

/// Ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::High => "HIGH",
        }
    }
}

/// At least two results, at least two of them closer than 0.8.
pub fn evidence_sufficient(results: &[SearchResult]) -> bool {
    results.len() >= 2
        && results
            .iter()
            .filter(|r| r.distance < SUFFICIENT_DISTANCE)
            .count()
            >= 2
}

pub fn confidence_level(results: &[SearchResult]) -> ConfidenceLevel {
    let close = results.iter().filter(|r| r.distance < CLOSE_DISTANCE).count();
    let best = results
        .iter()
        .map(|r| r.distance)
        .fold(f64::INFINITY, f64::min);

    if close >= 3 && best < HIGH_BEST_DISTANCE {
        ConfidenceLevel::High
    } else if close >= 1 && best < MEDIUM_BEST_DISTANCE {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// User-facing qualifier attached to every answer.
pub fn disclaimer(level: ConfidenceLevel, sufficient: bool) -> &'static str {
    if !sufficient {
        return "Insufficient evidence: few relevant sources were found, so this answer may be \
                incomplete or wrong. Verify it against the source code.";
    }
    match level {
        ConfidenceLevel::High => {
            "Based on several closely matching sources from the indexed code and documentation."
        }
        ConfidenceLevel::Medium => {
            "Based on partially matching sources; some details may be missing or imprecise."
        }
        ConfidenceLevel::Low => {
            "Only weakly related sources were found; treat this answer as a best-effort reading."
        }
    }
}

/// Confidence summary for a final result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub level: ConfidenceLevel,
    pub sufficient: bool,
    pub disclaimer: &'static str,
}

pub fn assess(results: &[SearchResult]) -> Assessment {
    let level = confidence_level(results);
    let sufficient = evidence_sufficient(results);
    Assessment {
        level,
        sufficient,
        disclaimer: disclaimer(level, sufficient),
    }
}
