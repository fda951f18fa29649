use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Three-state gate on the autosave write path. No write may be issued until
/// restoration has been attempted, otherwise a slow restore could be
/// overwritten by a fast, empty initial save.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RestorationState {
    NotStarted,
    Restoring,
    /// Restoration was attempted (successfully or not); the write path is armed.
    Complete,
}

impl Default for RestorationState {
    fn default() -> Self {
        RestorationState::NotStarted
    }
}

/// Save status for one translation unit. Owned exclusively by the autosave
/// coordinator; every other component reads it through the watch channel or
/// the `SaveStatusChanged` event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveState {
    pub is_saving: bool,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restoration: RestorationState,
}

/// Tunable timings for the autosave coordinator.
#[derive(Debug, Clone)]
pub struct AutoSaveConfig {
    /// Quiet period after which batched mutations flush as one snapshot write.
    pub debounce: Duration,
    /// Delay before retrying after a failed write.
    pub retry_backoff: Duration,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            retry_backoff: Duration::from_secs(5),
        }
    }
}
