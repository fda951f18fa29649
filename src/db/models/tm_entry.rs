use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matching::normalize_text;

/// Identity key for a translation memory entry. At most one row exists per
/// key; upserts on an identical key fold into that row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct TMKey {
    pub normalized_source_text: String,
    pub source_language: String,
    pub target_language: String,
    pub domain_category: String,
}

impl TMKey {
    pub fn new(
        source_text: &str,
        source_language: &str,
        target_language: &str,
        domain_category: &str,
    ) -> Self {
        Self {
            normalized_source_text: normalize_text(source_text),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            domain_category: domain_category.to_string(),
        }
    }
}

/// A reusable (source, target) pair. Survives deletion of whatever project
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TMEntry {
    pub key: TMKey,
    pub target_text: String,
    pub quality_score: u8,
    pub confidence_score: u8,
    /// Monotonically increasing; upserts and accepted retrievals add to it.
    pub usage_count: u64,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TMEntry {
    /// A fresh entry representing one usage event, ready to upsert.
    pub fn new(key: TMKey, target_text: String, quality_score: u8, confidence_score: u8) -> Self {
        let now = Utc::now();
        Self {
            key,
            target_text,
            quality_score: quality_score.min(100),
            confidence_score: confidence_score.min(100),
            usage_count: 1,
            last_used: now,
            created_at: now,
        }
    }
}
