use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SegmentStatus {
    Pending,
    InProgress,
    Translated,
    Reviewed,
    Approved,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::InProgress => "inProgress",
            SegmentStatus::Translated => "translated",
            SegmentStatus::Reviewed => "reviewed",
            SegmentStatus::Approved => "approved",
        }
    }
}

impl Default for SegmentStatus {
    fn default() -> Self {
        SegmentStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TranslationMethod {
    None,
    MemoryMatch,
    MachineGenerated,
    Manual,
    Blended,
}

impl Default for TranslationMethod {
    fn default() -> Self {
        TranslationMethod::None
    }
}

/// One translatable unit of content.
///
/// Identity is stable across restore cycles: the same logical section of
/// source content always rehydrates to the same `id` (see `content::seed_segments`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: String,
    pub source_text: String,
    pub target_text: String,
    pub status: SegmentStatus,
    pub translation_method: TranslationMethod,
    /// Set only when `translation_method` is `MemoryMatch`.
    pub match_percentage: Option<u8>,
    /// 0-100; meaning depends on method (manual edits pin it to 100).
    pub confidence: u8,
    /// Set by an explicit lock action once a human finalizes the segment;
    /// blocks any further automated overwrite.
    pub is_locked: bool,
    pub last_modified: DateTime<Utc>,
}

impl Segment {
    pub fn new(id: String, source_text: String) -> Self {
        Self {
            id,
            source_text,
            target_text: String::new(),
            status: SegmentStatus::Pending,
            translation_method: TranslationMethod::None,
            match_percentage: None,
            confidence: 0,
            is_locked: false,
            last_modified: Utc::now(),
        }
    }

    pub fn word_count(&self) -> usize {
        self.source_text.split_whitespace().count()
    }
}

/// Per-status counts for the dashboard collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnitProgress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub translated: usize,
    pub reviewed: usize,
    pub approved: usize,
}

impl UnitProgress {
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.approved as f64 / self.total as f64 * 100.0
    }
}
